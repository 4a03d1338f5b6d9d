//! Encoder abstraction
//!
//! [`SampleCodec`] is the capability interface over one codec instance:
//! an asynchronous input/output buffer protocol plus a one-time format
//! announcement. The production implementations are FFmpeg-backed (with a
//! hardware-first fallback chain for video); tests drive the pipeline with
//! scripted stand-ins.

mod audio;
mod ffmpeg;
mod frame_pool;

pub use audio::FfmpegAudioEncoder;
pub use ffmpeg::{FfmpegVideoEncoder, FrameSurface};

use crate::error::RecorderError;
use crate::muxer::TrackFormat;
use crate::pipeline::types::{BufferInfo, SampleFlags};
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Duration;

/// Result of polling an encoder for output.
#[derive(Debug)]
pub enum CodecPoll {
    /// The negotiated output format became available. Fires exactly once,
    /// before any data-bearing buffer.
    Format(TrackFormat),
    /// An output buffer is ready; the index stays lent to the caller until
    /// `release_output`.
    Buffer { index: usize, info: BufferInfo },
    /// No output ready within the poll timeout.
    TryAgain,
}

/// Lifecycle of a codec instance.
///
/// `prepare` configures and starts the codec; `stop` halts production;
/// `release` frees everything and may be observed at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CodecState {
    Created,
    Running,
    Stopped,
    Released,
}

impl CodecState {
    pub(crate) fn expect_running(self, op: &str) -> Result<(), RecorderError> {
        match self {
            CodecState::Running => Ok(()),
            other => Err(RecorderError::Lifecycle(format!(
                "{} while codec {:?}",
                op, other
            ))),
        }
    }
}

/// Capability interface over one physical or software codec instance.
///
/// Video encoders take input implicitly through a capture surface, so
/// their input-buffer operations report a lifecycle error; audio encoders
/// implement the full explicit protocol.
pub trait SampleCodec: Send {
    /// Configure and start the underlying codec. Must run on the owning
    /// worker. Codec rejection surfaces as `Configuration`; calling twice
    /// is a `Lifecycle` error.
    fn prepare(&mut self) -> Result<(), RecorderError>;

    /// Poll for a free input buffer index; `None` means try again later.
    fn dequeue_input(&mut self) -> Result<Option<usize>, RecorderError>;

    /// Writable region of a dequeued input buffer.
    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], RecorderError>;

    /// Hand a filled input region to the codec.
    fn queue_input(
        &mut self,
        index: usize,
        size: usize,
        pts_us: i64,
        flags: SampleFlags,
    ) -> Result<(), RecorderError>;

    /// Bounded-timeout poll for encoder output.
    fn dequeue_output(&mut self, timeout: Duration) -> Result<CodecPoll, RecorderError>;

    /// Payload of a dequeued output buffer.
    fn output_data(&self, index: usize) -> Result<Bytes, RecorderError>;

    /// Return a dequeued output buffer to the codec. Must happen exactly
    /// once per dequeued index.
    fn release_output(&mut self, index: usize) -> Result<(), RecorderError>;

    /// Halt further production. Safe to call on an already-stopped codec.
    fn stop(&mut self);

    /// Free all codec resources. Double-release is a no-op.
    fn release(&mut self);
}

/// Ring of encoded output buffers lent out to the drain loop.
///
/// A slot is filled by the encoder, handed out once through `next_ready`,
/// and cleared when the drain loop releases it. Double release is a
/// contract violation.
pub(crate) struct OutputSlots {
    slots: Vec<Option<(Bytes, BufferInfo)>>,
    ready: VecDeque<usize>,
}

impl OutputSlots {
    pub(crate) fn new() -> Self {
        Self {
            slots: Vec::new(),
            ready: VecDeque::new(),
        }
    }

    /// Store an encoded payload, returning its slot index.
    pub(crate) fn push(&mut self, data: Bytes, info: BufferInfo) -> usize {
        let index = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some((data, info));
                free
            }
            None => {
                self.slots.push(Some((data, info)));
                self.slots.len() - 1
            }
        };
        self.ready.push_back(index);
        index
    }

    /// Next buffer not yet handed to the drain loop.
    pub(crate) fn next_ready(&mut self) -> Option<(usize, BufferInfo)> {
        let index = self.ready.pop_front()?;
        let info = self.slots[index].as_ref().map(|(_, info)| *info)?;
        Some((index, info))
    }

    pub(crate) fn data(&self, index: usize) -> Result<Bytes, RecorderError> {
        self.slots
            .get(index)
            .and_then(|slot| slot.as_ref())
            .map(|(data, _)| data.clone())
            .ok_or_else(|| {
                RecorderError::Lifecycle(format!("output buffer {} is not lent out", index))
            })
    }

    pub(crate) fn release(&mut self, index: usize) -> Result<(), RecorderError> {
        match self.slots.get_mut(index) {
            Some(slot @ Some(_)) => {
                *slot = None;
                Ok(())
            }
            _ => Err(RecorderError::Lifecycle(format!(
                "double release of output buffer {}",
                index
            ))),
        }
    }

    pub(crate) fn has_ready(&self) -> bool {
        !self.ready.is_empty()
    }
}

/// Check if H.264 Annex B data contains an IDR NAL unit (type 5)
pub(crate) fn contains_idr(data: &[u8]) -> bool {
    let start_code: &[u8] = &[0, 0, 0, 1];
    let mut i = 0;
    while i + 4 < data.len() {
        if &data[i..i + 4] == start_code {
            if i + 4 < data.len() && (data[i + 4] & 0x1F) == 5 {
                return true;
            }
            i += 4;
        } else {
            i += 1;
        }
    }
    false
}
