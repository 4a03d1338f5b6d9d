//! Error taxonomy for the recording pipeline.
//!
//! Every fatal condition funnels into a single `Stopped { error }` event;
//! there is no mid-session retry anywhere in the pipeline. A broken encoder
//! or writer cannot be usefully repaired, so the session always tears down.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecorderError {
    /// The codec rejected the requested format at prepare time
    /// (bad dimensions/bitrate/profile combination).
    #[error("codec rejected configuration: {0}")]
    Configuration(String),

    /// An operation was invoked out of allowed state order, e.g. write
    /// before start or add-track after start. A programming-contract
    /// violation, never retried.
    #[error("lifecycle violation: {0}")]
    Lifecycle(String),

    /// Asynchronous codec failure during steady-state operation.
    #[error("codec runtime error: {0}")]
    CodecRuntime(String),

    /// The audio capture device failed to initialize or read.
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A data-bearing buffer was drained before the container writer
    /// started. The encoder must announce its format first.
    #[error("container writer received samples before start")]
    MuxerNotStarted,

    /// Output file could not be created or written.
    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),
}

impl From<ac_ffmpeg::Error> for RecorderError {
    fn from(err: ac_ffmpeg::Error) -> Self {
        RecorderError::CodecRuntime(err.to_string())
    }
}
