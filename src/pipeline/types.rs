//! Core types shared across the recording pipeline.

use crate::error::RecorderError;
use std::fmt;

/// Per-sample flags carried alongside each encoded unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SampleFlags(u32);

impl SampleFlags {
    pub const KEY_FRAME: SampleFlags = SampleFlags(1);
    pub const CODEC_CONFIG: SampleFlags = SampleFlags(1 << 1);
    pub const END_OF_STREAM: SampleFlags = SampleFlags(1 << 2);

    pub const fn empty() -> Self {
        SampleFlags(0)
    }

    pub const fn contains(self, other: SampleFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: SampleFlags) {
        self.0 |= other.0;
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for SampleFlags {
    type Output = SampleFlags;

    fn bitor(self, rhs: SampleFlags) -> SampleFlags {
        SampleFlags(self.0 | rhs.0)
    }
}

impl fmt::Display for SampleFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(SampleFlags::KEY_FRAME) {
            names.push("KEY_FRAME");
        }
        if self.contains(SampleFlags::CODEC_CONFIG) {
            names.push("CODEC_CONFIG");
        }
        if self.contains(SampleFlags::END_OF_STREAM) {
            names.push("END_OF_STREAM");
        }
        if names.is_empty() {
            write!(f, "NONE")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Per-sample metadata produced by an encoder, consumed once by the
/// container writer and then discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferInfo {
    /// Byte offset of the payload inside the output buffer.
    pub offset: usize,
    /// Payload size in bytes.
    pub size: usize,
    /// Presentation timestamp in microseconds, monotonically
    /// non-decreasing per track.
    pub pts_us: i64,
    pub flags: SampleFlags,
}

impl BufferInfo {
    pub fn new(size: usize, pts_us: i64, flags: SampleFlags) -> Self {
        Self {
            offset: 0,
            size,
            pts_us,
            flags,
        }
    }

    /// Zero-size marker carrying only the end-of-stream flag.
    pub fn end_of_stream(pts_us: i64) -> Self {
        Self::new(0, pts_us, SampleFlags::END_OF_STREAM)
    }

    pub fn is_eos(&self) -> bool {
        self.flags.contains(SampleFlags::END_OF_STREAM)
    }
}

/// Kind of media data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
        }
    }
}

/// Asynchronous notifications delivered to the session owner.
///
/// Exactly one `Stopped` is delivered per started session, on every
/// termination path: caller-initiated, end-of-stream, or error.
#[derive(Debug)]
pub enum RecorderEvent {
    /// The pipeline reached `Running`.
    Started,
    /// Progress notification with the latest muxed sample's timestamp.
    /// Throttling is the caller's business, not the coordinator's.
    Recording { pts_us: i64 },
    /// Terminal. The error is present only on fatal failure.
    Stopped { error: Option<RecorderError> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_ops() {
        let mut flags = SampleFlags::KEY_FRAME;
        assert!(flags.contains(SampleFlags::KEY_FRAME));
        assert!(!flags.contains(SampleFlags::END_OF_STREAM));

        flags.insert(SampleFlags::END_OF_STREAM);
        assert!(flags.contains(SampleFlags::END_OF_STREAM));
        assert!(flags.contains(SampleFlags::KEY_FRAME));

        let both = SampleFlags::KEY_FRAME | SampleFlags::CODEC_CONFIG;
        assert!(both.contains(SampleFlags::CODEC_CONFIG));
        assert_eq!(format!("{}", both), "KEY_FRAME|CODEC_CONFIG");
    }

    #[test]
    fn test_eos_marker() {
        let info = BufferInfo::end_of_stream(42);
        assert_eq!(info.size, 0);
        assert_eq!(info.pts_us, 42);
        assert!(info.is_eos());
    }
}
