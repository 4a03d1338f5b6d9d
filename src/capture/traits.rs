use crate::encoder::FrameSurface;
use crate::error::RecorderError;

/// A producer of raw video frames.
///
/// `bind` hands the source the encoder's input surface and starts
/// production; the source owns its own pacing. The surface must be
/// dropped when the source stops, which is what signals end-of-stream to
/// the encoder.
pub trait ScreenSource: Send {
    fn bind(&mut self, surface: FrameSurface) -> Result<(), RecorderError>;

    /// Stop producing frames and drop the surface. Idempotent.
    fn stop(&mut self);
}

/// A producer of interleaved signed 16-bit PCM.
///
/// Unlike the screen source, audio is pulled: the capture pump calls
/// `read` on its own schedule and decides when the stream ends.
pub trait AudioSource: Send {
    /// Open the device and start capturing. `DeviceUnavailable` when no
    /// usable device exists.
    fn start(&mut self) -> Result<(), RecorderError>;

    /// Copy up to `buf.len()` bytes of captured PCM, returning how many
    /// were written. Zero means nothing buffered right now.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RecorderError>;

    /// Whether `stop` was requested; the pump drains and ends the stream
    /// once this turns true.
    fn is_stopped(&self) -> bool;

    /// Request capture to stop. Idempotent.
    fn stop(&mut self);

    /// Free device resources. Idempotent.
    fn release(&mut self);
}
