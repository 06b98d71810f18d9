// streampool - fixed pool of streaming audio players
// Module declarations
pub mod audio;
pub mod error;
pub mod settings;
mod state;

pub use audio::{
    AudioCodec, AudioOutput, BufferStatus, ChannelFormat, CompletionCallback, CpalOutput,
    EngineBackends, FileSystem, SourceOpener, StreamDecoder, StreamEngine, StreamId, StreamInfo,
    SymphoniaCodec, WaveBuffer, RING_SLICES,
};
pub use error::{CodecError, CodecErrorKind, EngineError, OutputError, PlayError, SettingsError};
pub use settings::{EngineSettings, OutputMode};
pub use state::MAX_STREAMS;
