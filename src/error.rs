// Error types for the stream engine
// Every failure of `play` is reported synchronously through `PlayError`

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Native error classification reported by the codec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecErrorKind {
    /// The underlying source could not be read
    Read,
    /// The container or a packet is malformed
    Malformed,
    /// The container or codec is not supported
    Unsupported,
    /// The container holds no decodable audio track
    NoAudioTrack,
    /// The stream cannot be repositioned
    Seek,
    /// A decoder limit was exceeded
    Limit,
    /// The decoder must be reset before it can continue
    ResetRequired,
}

impl CodecErrorKind {
    /// Stable name used in log lines.
    pub fn name(self) -> &'static str {
        match self {
            CodecErrorKind::Read => "CODEC_EREAD",
            CodecErrorKind::Malformed => "CODEC_EMALFORMED",
            CodecErrorKind::Unsupported => "CODEC_EUNSUPPORTED",
            CodecErrorKind::NoAudioTrack => "CODEC_ENOTRACK",
            CodecErrorKind::Seek => "CODEC_ENOSEEK",
            CodecErrorKind::Limit => "CODEC_ELIMIT",
            CodecErrorKind::ResetRequired => "CODEC_ERESET",
        }
    }
}

impl fmt::Display for CodecErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error raised by an `AudioCodec` or `StreamDecoder`.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct CodecError {
    pub kind: CodecErrorKind,
    pub message: String,
}

impl CodecError {
    pub fn new(kind: CodecErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl From<symphonia::core::errors::Error> for CodecError {
    fn from(err: symphonia::core::errors::Error) -> Self {
        use symphonia::core::errors::Error as SymphoniaError;

        let kind = match &err {
            SymphoniaError::IoError(_) => CodecErrorKind::Read,
            SymphoniaError::DecodeError(_) => CodecErrorKind::Malformed,
            SymphoniaError::SeekError(_) => CodecErrorKind::Seek,
            SymphoniaError::Unsupported(_) => CodecErrorKind::Unsupported,
            SymphoniaError::LimitError(_) => CodecErrorKind::Limit,
            SymphoniaError::ResetRequired => CodecErrorKind::ResetRequired,
        };
        Self::new(kind, err.to_string())
    }
}

/// Errors raised by a hardware output backend.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("No output device available")]
    NoDevice,

    #[error("Output device error: {0}")]
    Device(String),

    #[error("Output stream error: {0}")]
    Stream(String),

    #[error("Channel {0} does not exist")]
    InvalidChannel(usize),

    #[error("Channel {0} queue is full")]
    QueueFull(usize),

    #[error("Output thread error: {0}")]
    Thread(#[from] io::Error),
}

/// Failure result of `StreamEngine::play`.
#[derive(Debug, Error)]
pub enum PlayError {
    /// Every slot of the pool is in use
    #[error("No free stream slot")]
    NoFreeSlot,

    /// The source file cannot be opened
    #[error("Cannot open source {path:?}: {source}")]
    SourceUnavailable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The codec rejected the stream
    #[error("Decoder rejected stream: {0}")]
    DecoderRejected(#[from] CodecError),

    /// The buffer ring could not be allocated
    #[error("Out of memory allocating {bytes} bytes of stream buffers")]
    OutOfMemory { bytes: usize },

    /// The worker thread could not be started
    #[error("Worker spawn failed: {0}")]
    WorkerSpawnFailed(#[source] io::Error),
}

impl PlayError {
    /// Codec classification when the codec rejected the stream.
    pub fn codec_kind(&self) -> Option<CodecErrorKind> {
        match self {
            PlayError::DecoderRejected(err) => Some(err.kind),
            _ => None,
        }
    }
}

/// Errors raised while bringing the engine up.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Audio output failed to initialize: {0}")]
    Output(#[from] OutputError),
}

/// Errors raised while loading or saving settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("Failed to access settings file: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
}
