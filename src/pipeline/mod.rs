//! Recording pipeline
//!
//! Capture, encode and mux are coordinated here: [`recorder::ScreenRecorder`]
//! drives the video path and the session lifecycle, [`mic::MicRecorder`]
//! owns the audio path, and both meet in the shared container writer.

pub mod clock;
pub mod mic;
pub mod recorder;
pub mod smoother;
pub mod state;
#[cfg(test)]
pub(crate) mod testkit;
pub mod types;

pub use clock::SessionClock;
pub use mic::MicRecorder;
pub use recorder::ScreenRecorder;
pub use smoother::FrameTimestampSmoother;
pub use state::RecorderState;
pub use types::{BufferInfo, MediaKind, RecorderEvent, SampleFlags};
