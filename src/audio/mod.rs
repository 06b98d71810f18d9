// Audio streaming module
// Symphonia decodes, cpal plays, one worker thread per stream keeps the rings full

pub mod decoder;
pub mod output;
pub mod player;
mod priority;
pub mod ring;
pub(crate) mod signal;
pub mod slot;
pub mod source;
mod worker;

pub use decoder::{AudioCodec, StreamDecoder, StreamInfo, SymphoniaCodec};
pub use output::{AudioOutput, ChannelFormat, CompletionCallback, CpalOutput};
pub use player::{EngineBackends, StreamEngine};
pub use ring::{BufferStatus, WaveBuffer, RING_SLICES};
pub use slot::StreamId;
pub use source::{FileSystem, SourceOpener};
