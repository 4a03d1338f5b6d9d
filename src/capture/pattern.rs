use crate::capture::{ScreenSource, YuvFrame};
use crate::config::VideoEncodeConfig;
use crate::encoder::FrameSurface;
use crate::error::RecorderError;
use crate::pipeline::clock::SessionClock;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Synthetic screen source producing a moving NV12 gradient.
///
/// Stands in for a platform capture backend: it paces itself at the
/// configured frame rate and stamps frames with session-clock time, so
/// the rest of the pipeline behaves exactly as it would with real
/// capture.
pub struct PatternSource {
    config: VideoEncodeConfig,
    clock: SessionClock,
    cancel: Option<CancellationToken>,
}

impl PatternSource {
    pub fn new(config: VideoEncodeConfig, clock: SessionClock) -> Self {
        Self {
            config,
            clock,
            cancel: None,
        }
    }

    fn pattern_frame(width: u32, height: u32, pts_us: i64, tick: u64) -> YuvFrame {
        let mut frame = YuvFrame::black(width, height);
        frame.pts_us = pts_us;
        let w = frame.width as usize;
        let h = frame.height as usize;
        let phase = (tick % 256) as usize;
        for y in 0..h {
            let row = &mut frame.luminance_bytes[y * w..(y + 1) * w];
            for (x, px) in row.iter_mut().enumerate() {
                *px = ((x + y + phase) % 256) as u8;
            }
        }
        frame
    }
}

impl ScreenSource for PatternSource {
    fn bind(&mut self, surface: FrameSurface) -> Result<(), RecorderError> {
        if self.cancel.is_some() {
            return Err(RecorderError::Lifecycle("capture already running".into()));
        }

        let cancel = CancellationToken::new();
        self.cancel = Some(cancel.clone());

        let width = self.config.width;
        let height = self.config.height;
        let frame_period = Duration::from_micros(self.config.frame_period_us() as u64);
        let clock = self.clock;

        tokio::spawn(async move {
            let mut tick = 0u64;
            loop {
                if cancel.is_cancelled() {
                    break;
                }
                let frame_start = Instant::now();

                let pts_us = clock.now_us();
                let frame = PatternSource::pattern_frame(width, height, pts_us, tick);
                if surface.submit(frame).await.is_err() {
                    // encoder is gone, nothing left to feed
                    break;
                }
                tick += 1;

                let remaining = frame_period.saturating_sub(frame_start.elapsed());
                if !remaining.is_zero() {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = tokio::time::sleep(remaining) => {}
                    }
                }
            }
            // dropping the surface here ends the video stream
        });

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
    }
}
