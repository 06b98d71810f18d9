// Engine configuration
#[allow(clippy::module_inception)]
pub mod settings;

pub use settings::{BufferSettings, EngineSettings, OutputMode, OutputSettings, WorkerSettings};
