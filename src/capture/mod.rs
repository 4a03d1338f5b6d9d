//! Capture sources
//!
//! Raw media producers feeding the pipeline: a screen source pushing NV12
//! frames into the video encoder's surface, and an audio source handing
//! interleaved PCM to the capture pump.

pub mod audio;
mod pattern;
mod traits;

pub use audio::CpalAudioSource;
pub use pattern::PatternSource;
pub use traits::{AudioSource, ScreenSource};

/// One raw NV12 frame with the session-clock time it was captured at.
pub struct YuvFrame {
    pub pts_us: i64,
    pub width: i32,
    pub height: i32,
    pub luminance_bytes: Vec<u8>,
    pub luminance_stride: i32,
    pub chrominance_bytes: Vec<u8>,
    pub chrominance_stride: i32,
}

impl YuvFrame {
    /// A black frame of the given even-rounded dimensions.
    pub fn black(width: u32, height: u32) -> Self {
        let w = width + (width % 2);
        let h = height + (height % 2);
        Self {
            pts_us: 0,
            width: w as i32,
            height: h as i32,
            luminance_bytes: vec![0u8; (w * h) as usize],
            luminance_stride: w as i32,
            chrominance_bytes: vec![128u8; (w * h / 2) as usize],
            chrominance_stride: w as i32,
        }
    }
}
