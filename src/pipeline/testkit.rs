//! In-memory doubles for pipeline tests: a recording sink, scripted
//! codecs, and canned capture sources.

use crate::capture::{AudioSource, ScreenSource};
use crate::encoder::{CodecPoll, OutputSlots, SampleCodec};
use crate::error::RecorderError;
use crate::muxer::{SampleSink, TrackFormat};
use crate::pipeline::types::{BufferInfo, MediaKind, SampleFlags};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug)]
pub(crate) struct WrittenSample {
    pub track: usize,
    pub len: usize,
    pub pts_us: i64,
    pub flags: SampleFlags,
}

/// Everything a [`MemorySink`] observed, shared with the test body.
#[derive(Debug, Default)]
pub(crate) struct SinkLog {
    pub begun: Option<Vec<(MediaKind, String)>>,
    pub samples: Vec<WrittenSample>,
    pub finished: bool,
    pub finish_calls: usize,
}

pub(crate) struct MemorySink {
    log: Arc<Mutex<SinkLog>>,
}

impl MemorySink {
    pub fn new() -> (Self, Arc<Mutex<SinkLog>>) {
        let log = Arc::new(Mutex::new(SinkLog::default()));
        (Self { log: Arc::clone(&log) }, log)
    }
}

impl SampleSink for MemorySink {
    fn begin(&mut self, tracks: &[TrackFormat]) -> Result<(), RecorderError> {
        let mut log = self.log.lock().unwrap();
        log.begun = Some(
            tracks
                .iter()
                .map(|t| (t.kind, t.mime.clone()))
                .collect(),
        );
        Ok(())
    }

    fn write(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), RecorderError> {
        self.log.lock().unwrap().samples.push(WrittenSample {
            track,
            len: data.len(),
            pts_us: info.pts_us,
            flags: info.flags,
        });
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RecorderError> {
        let mut log = self.log.lock().unwrap();
        log.finished = true;
        log.finish_calls += 1;
        Ok(())
    }
}

/// Screen source that produces nothing and drops the surface at once.
pub(crate) struct NullSource;

impl NullSource {
    pub fn new() -> Self {
        Self
    }
}

impl ScreenSource for NullSource {
    fn bind(&mut self, _surface: crate::encoder::FrameSurface) -> Result<(), RecorderError> {
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Audio source serving a fixed set of PCM batches.
pub(crate) struct StaticAudioSource {
    batches: VecDeque<Vec<u8>>,
    stopped: bool,
    stop_when_drained: bool,
    fail_start: bool,
}

impl StaticAudioSource {
    pub fn with_batches(batches: Vec<Vec<u8>>) -> Self {
        Self {
            batches: batches.into(),
            stopped: false,
            stop_when_drained: false,
            fail_start: false,
        }
    }

    /// Report `is_stopped` once every batch was read, simulating a device
    /// that runs dry.
    pub fn stop_after_drained(&mut self) {
        self.stop_when_drained = true;
    }

    pub fn unavailable() -> Self {
        let mut source = Self::with_batches(Vec::new());
        source.fail_start = true;
        source
    }
}

impl AudioSource for StaticAudioSource {
    fn start(&mut self) -> Result<(), RecorderError> {
        if self.fail_start {
            return Err(RecorderError::DeviceUnavailable(
                "no default input device found".into(),
            ));
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RecorderError> {
        let Some(mut batch) = self.batches.pop_front() else {
            return Ok(0);
        };
        let n = batch.len().min(buf.len());
        buf[..n].copy_from_slice(&batch[..n]);
        if n < batch.len() {
            batch.drain(..n);
            self.batches.push_front(batch);
        }
        Ok(n)
    }

    fn is_stopped(&self) -> bool {
        self.stopped || (self.stop_when_drained && self.batches.is_empty())
    }

    fn stop(&mut self) {
        self.stopped = true;
    }

    fn release(&mut self) {
        self.stopped = true;
        self.batches.clear();
    }
}

const ECHO_INPUTS: usize = 4;
const ECHO_INPUT_CAPACITY: usize = 4096;

/// Audio codec double that echoes queued batches straight to its output
/// queue, flags and timestamps preserved.
pub(crate) struct EchoCodec {
    running: bool,
    inputs: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    slots: OutputSlots,
    format_sent: bool,
}

impl EchoCodec {
    pub fn new() -> Self {
        Self {
            running: false,
            inputs: (0..ECHO_INPUTS)
                .map(|_| vec![0u8; ECHO_INPUT_CAPACITY])
                .collect(),
            free_inputs: (0..ECHO_INPUTS).collect(),
            slots: OutputSlots::new(),
            format_sent: false,
        }
    }
}

impl SampleCodec for EchoCodec {
    fn prepare(&mut self) -> Result<(), RecorderError> {
        self.running = true;
        Ok(())
    }

    fn dequeue_input(&mut self) -> Result<Option<usize>, RecorderError> {
        if !self.running {
            return Ok(None);
        }
        Ok(self.free_inputs.pop_front())
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], RecorderError> {
        self.inputs
            .get_mut(index)
            .map(|b| b.as_mut_slice())
            .ok_or_else(|| RecorderError::Lifecycle(format!("bad input index {}", index)))
    }

    fn queue_input(
        &mut self,
        index: usize,
        size: usize,
        pts_us: i64,
        flags: SampleFlags,
    ) -> Result<(), RecorderError> {
        if size > 0 {
            let data = Bytes::copy_from_slice(&self.inputs[index][..size]);
            self.slots
                .push(data, BufferInfo::new(size, pts_us, flags | SampleFlags::KEY_FRAME));
        }
        if flags.contains(SampleFlags::END_OF_STREAM) {
            self.slots
                .push(Bytes::new(), BufferInfo::end_of_stream(pts_us));
        }
        self.free_inputs.push_back(index);
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<CodecPoll, RecorderError> {
        if !self.format_sent {
            self.format_sent = true;
            return Ok(CodecPoll::Format(TrackFormat::new(
                MediaKind::Audio,
                "audio/mp4a-latm",
            )));
        }
        match self.slots.next_ready() {
            Some((index, info)) => Ok(CodecPoll::Buffer { index, info }),
            None => Ok(CodecPoll::TryAgain),
        }
    }

    fn output_data(&self, index: usize) -> Result<Bytes, RecorderError> {
        self.slots.data(index)
    }

    fn release_output(&mut self, index: usize) -> Result<(), RecorderError> {
        self.slots.release(index)
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn release(&mut self) {
        self.running = false;
    }
}

enum ScriptStep {
    Format,
    Buffer(Vec<u8>, BufferInfo),
}

/// Video codec double driven by a prepared script of outputs.
pub(crate) struct ScriptedCodec {
    steps: VecDeque<ScriptStep>,
    slots: OutputSlots,
    prepare_error: Option<String>,
    /// Endless data buffers once the script runs out, spaced by this period.
    streaming_period_us: Option<i64>,
    next_pts_us: i64,
}

impl ScriptedCodec {
    fn empty() -> Self {
        Self {
            steps: VecDeque::new(),
            slots: OutputSlots::new(),
            prepare_error: None,
            streaming_period_us: None,
            next_pts_us: 0,
        }
    }

    /// Format announcement followed by the given `(size, pts_us, flags)`
    /// buffers.
    pub fn video_script(buffers: Vec<(usize, i64, SampleFlags)>) -> Self {
        let mut codec = Self::empty();
        codec.steps.push_back(ScriptStep::Format);
        for (size, pts_us, flags) in buffers {
            codec.steps.push_back(ScriptStep::Buffer(
                vec![0xAB; size],
                BufferInfo::new(size, pts_us, flags),
            ));
        }
        codec
    }

    /// Append a terminal end-of-stream buffer.
    pub fn then_eos(mut self, pts_us: i64) -> Self {
        self.steps
            .push_back(ScriptStep::Buffer(Vec::new(), BufferInfo::end_of_stream(pts_us)));
        self
    }

    /// Format announcement, then data buffers forever.
    pub fn streaming(period_us: i64) -> Self {
        let mut codec = Self::empty();
        codec.steps.push_back(ScriptStep::Format);
        codec.streaming_period_us = Some(period_us);
        codec
    }

    pub fn failing_prepare(reason: &str) -> Self {
        let mut codec = Self::empty();
        codec.prepare_error = Some(reason.to_string());
        codec
    }

    /// Contract violation: a data buffer with no preceding format change.
    pub fn buffer_before_format() -> Self {
        let mut codec = Self::empty();
        codec.steps.push_back(ScriptStep::Buffer(
            vec![0xAB; 4],
            BufferInfo::new(4, 0, SampleFlags::KEY_FRAME),
        ));
        codec
    }
}

impl SampleCodec for ScriptedCodec {
    fn prepare(&mut self) -> Result<(), RecorderError> {
        match self.prepare_error.take() {
            Some(reason) => Err(RecorderError::Configuration(reason)),
            None => Ok(()),
        }
    }

    fn dequeue_input(&mut self) -> Result<Option<usize>, RecorderError> {
        Err(RecorderError::Lifecycle(
            "video codec double takes no direct input".into(),
        ))
    }

    fn input_buffer(&mut self, _index: usize) -> Result<&mut [u8], RecorderError> {
        Err(RecorderError::Lifecycle(
            "video codec double takes no direct input".into(),
        ))
    }

    fn queue_input(
        &mut self,
        _index: usize,
        _size: usize,
        _pts_us: i64,
        _flags: SampleFlags,
    ) -> Result<(), RecorderError> {
        Err(RecorderError::Lifecycle(
            "video codec double takes no direct input".into(),
        ))
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<CodecPoll, RecorderError> {
        match self.steps.pop_front() {
            Some(ScriptStep::Format) => Ok(CodecPoll::Format(TrackFormat::new(
                MediaKind::Video,
                "video/avc",
            ))),
            Some(ScriptStep::Buffer(data, info)) => {
                let index = self.slots.push(Bytes::from(data), info);
                Ok(CodecPoll::Buffer { index, info })
            }
            None => match self.streaming_period_us {
                Some(period) => {
                    let info = BufferInfo::new(4, self.next_pts_us, SampleFlags::empty());
                    self.next_pts_us += period;
                    let index = self.slots.push(Bytes::from_static(&[0xAB; 4]), info);
                    Ok(CodecPoll::Buffer { index, info })
                }
                None => Ok(CodecPoll::TryAgain),
            },
        }
    }

    fn output_data(&self, index: usize) -> Result<Bytes, RecorderError> {
        self.slots.data(index)
    }

    fn release_output(&mut self, index: usize) -> Result<(), RecorderError> {
        self.slots.release(index)
    }

    fn stop(&mut self) {}

    fn release(&mut self) {}
}
