use ac_ffmpeg::codec::video::{PixelFormat, VideoFrame, VideoFrameMut};
use ac_ffmpeg::time::TimeBase;
use std::collections::VecDeque;

/// Upper bound on recycled frames held between encodes.
const MAX_POOLED: usize = 8;

/// Recycler for raw video frames.
///
/// The encoder keeps a reference to every pushed frame until its packet is
/// taken, so a recycled frame becomes writable again only once the codec
/// dropped its copy. `take` falls back to a fresh allocation whenever no
/// pooled frame is exclusively owned.
pub(crate) struct FramePool {
    pooled: VecDeque<VideoFrame>,
    width: usize,
    height: usize,
    time_base: TimeBase,
    pixel_format: PixelFormat,
}

impl FramePool {
    pub fn new(width: usize, height: usize, time_base: TimeBase, pixel_format: PixelFormat) -> Self {
        Self {
            pooled: VecDeque::new(),
            width,
            height,
            time_base,
            pixel_format,
        }
    }

    /// Recycle a frame the encoder has consumed.
    pub fn put(&mut self, frame: VideoFrame) {
        if self.pooled.len() < MAX_POOLED {
            self.pooled.push_back(frame);
        }
    }

    /// Take a writable frame, preferring a recycled one.
    pub fn take(&mut self) -> VideoFrameMut {
        // one pass over the pool; frames the codec still references go back
        // to the end
        for _ in 0..self.pooled.len() {
            let Some(frame) = self.pooled.pop_front() else {
                break;
            };
            match frame.try_into_mut() {
                Ok(frame) => return frame,
                Err(frame) => self.pooled.push_back(frame),
            }
        }

        VideoFrameMut::black(self.pixel_format, self.width, self.height)
            .with_time_base(self.time_base)
    }
}
