use crate::config::AudioEncodeConfig;
use crate::encoder::{CodecPoll, CodecState, OutputSlots, SampleCodec};
use crate::error::RecorderError;
use crate::muxer::TrackFormat;
use crate::pipeline::types::{BufferInfo, MediaKind, SampleFlags};
use ac_ffmpeg::codec::Encoder;
use ac_ffmpeg::codec::audio::frame::get_sample_format;
use ac_ffmpeg::codec::audio::{AudioEncoder, AudioFrameMut, ChannelLayout};
use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Duration;

/// Input buffers kept in rotation between the pump and the codec.
const INPUT_BUFFERS: usize = 4;

/// AAC frame size when the codec does not report one.
const DEFAULT_SAMPLES_PER_FRAME: usize = 1024;

/// AAC audio encoder driven through the explicit input-buffer protocol.
///
/// Input is interleaved signed 16-bit PCM; the conversion to the codec's
/// planar float layout happens when a buffer is queued. Queuing a buffer
/// flagged end-of-stream flushes the codec and appends a final
/// end-of-stream output buffer.
pub struct FfmpegAudioEncoder {
    config: AudioEncodeConfig,
    encoder: Option<AudioEncoder>,
    state: CodecState,
    format_sent: bool,
    samples_per_frame: usize,
    inputs: Vec<Vec<u8>>,
    free_inputs: VecDeque<usize>,
    lent_inputs: Vec<bool>,
    slots: OutputSlots,
    /// Timestamps of queued batches not yet paired with an output packet.
    pending_pts: VecDeque<i64>,
    last_pts_us: i64,
    eos_queued: bool,
}

unsafe impl Send for FfmpegAudioEncoder {}

impl FfmpegAudioEncoder {
    pub fn new(config: AudioEncodeConfig) -> Self {
        Self {
            config,
            encoder: None,
            state: CodecState::Created,
            format_sent: false,
            samples_per_frame: DEFAULT_SAMPLES_PER_FRAME,
            inputs: Vec::new(),
            free_inputs: VecDeque::new(),
            lent_inputs: Vec::new(),
            slots: OutputSlots::new(),
            pending_pts: VecDeque::new(),
            last_pts_us: 0,
            eos_queued: false,
        }
    }

    /// Convert an interleaved s16le batch into one planar-float codec frame
    /// and push it. Short batches are padded with the silence the frame was
    /// initialized with.
    fn push_batch(&mut self, data: &[u8]) -> Result<(), RecorderError> {
        let encoder = self.encoder.as_mut().ok_or_else(|| {
            RecorderError::Lifecycle("queue_input before prepare".into())
        })?;

        let channels = self.config.channels as usize;
        let parameters = encoder.codec_parameters();
        let mut frame = AudioFrameMut::silence(
            parameters.channel_layout(),
            parameters.sample_format(),
            parameters.sample_rate(),
            self.samples_per_frame,
        );

        let frames_in_batch = (data.len() / (2 * channels)).min(self.samples_per_frame);
        {
            let mut planes = frame.planes_mut();
            for channel in 0..channels {
                let plane = planes[channel].data_mut();
                for i in 0..frames_in_batch {
                    let at = (i * channels + channel) * 2;
                    let sample = i16::from_le_bytes([data[at], data[at + 1]]);
                    let float = sample as f32 / 32_768.0;
                    plane[i * 4..i * 4 + 4].copy_from_slice(&float.to_le_bytes());
                }
            }
        }

        encoder.push(frame.freeze())?;
        self.collect_packets()
    }

    fn collect_packets(&mut self) -> Result<(), RecorderError> {
        let encoder = match self.encoder.as_mut() {
            Some(encoder) => encoder,
            None => return Ok(()),
        };
        while let Some(packet) = encoder.take()? {
            let data = Bytes::copy_from_slice(packet.data());
            let pts_us = self.pending_pts.pop_front().unwrap_or(self.last_pts_us);
            self.last_pts_us = pts_us.max(self.last_pts_us);
            // every AAC frame is independently decodable
            let info = BufferInfo::new(data.len(), pts_us, SampleFlags::KEY_FRAME);
            self.slots.push(data, info);
        }
        Ok(())
    }
}

impl SampleCodec for FfmpegAudioEncoder {
    fn prepare(&mut self) -> Result<(), RecorderError> {
        if self.state != CodecState::Created {
            return Err(RecorderError::Lifecycle(format!(
                "prepare while codec {:?}",
                self.state
            )));
        }

        let channel_layout =
            ChannelLayout::from_channels(self.config.channels as u32).ok_or_else(|| {
                RecorderError::Configuration(format!(
                    "unsupported channel count {}",
                    self.config.channels
                ))
            })?;

        let codec_name = self.config.codec_name.as_deref().unwrap_or("aac");
        let mut builder = AudioEncoder::builder(codec_name)
            .map_err(|e| RecorderError::Configuration(e.to_string()))?
            .sample_rate(self.config.sample_rate)
            .channel_layout(channel_layout)
            .sample_format(get_sample_format("fltp"))
            .set_option("b", &self.config.bitrate.to_string());
        if let Some(profile) = self.config.profile.as_deref() {
            builder = builder.set_option("profile", profile);
        }
        let encoder = builder
            .build()
            .map_err(|e| RecorderError::Configuration(e.to_string()))?;

        self.samples_per_frame = encoder
            .samples_per_frame()
            .unwrap_or(DEFAULT_SAMPLES_PER_FRAME);
        log::info!(
            "Using audio encoder {} ({}Hz, {}ch, {} samples/frame)",
            codec_name,
            self.config.sample_rate,
            self.config.channels,
            self.samples_per_frame
        );

        let capacity = self.samples_per_frame * self.config.channels as usize * 2;
        self.inputs = (0..INPUT_BUFFERS).map(|_| vec![0u8; capacity]).collect();
        self.lent_inputs = vec![false; INPUT_BUFFERS];
        self.free_inputs = (0..INPUT_BUFFERS).collect();
        self.encoder = Some(encoder);
        self.state = CodecState::Running;
        Ok(())
    }

    fn dequeue_input(&mut self) -> Result<Option<usize>, RecorderError> {
        self.state.expect_running("dequeue_input")?;
        if self.eos_queued {
            return Err(RecorderError::Lifecycle(
                "input queued after end-of-stream".into(),
            ));
        }
        match self.free_inputs.pop_front() {
            Some(index) => {
                self.lent_inputs[index] = true;
                Ok(Some(index))
            }
            None => Ok(None),
        }
    }

    fn input_buffer(&mut self, index: usize) -> Result<&mut [u8], RecorderError> {
        if !self.lent_inputs.get(index).copied().unwrap_or(false) {
            return Err(RecorderError::Lifecycle(format!(
                "input buffer {} is not dequeued",
                index
            )));
        }
        Ok(&mut self.inputs[index])
    }

    fn queue_input(
        &mut self,
        index: usize,
        size: usize,
        pts_us: i64,
        flags: SampleFlags,
    ) -> Result<(), RecorderError> {
        self.state.expect_running("queue_input")?;
        if !self.lent_inputs.get(index).copied().unwrap_or(false) {
            return Err(RecorderError::Lifecycle(format!(
                "queue of input buffer {} that was not dequeued",
                index
            )));
        }
        if size > self.inputs[index].len() {
            return Err(RecorderError::Lifecycle(format!(
                "input size {} exceeds buffer capacity {}",
                size,
                self.inputs[index].len()
            )));
        }

        if size > 0 {
            self.pending_pts.push_back(pts_us);
            let batch = std::mem::take(&mut self.inputs[index]);
            let result = self.push_batch(&batch[..size]);
            self.inputs[index] = batch;
            result?;
        }

        self.lent_inputs[index] = false;
        self.free_inputs.push_back(index);

        if flags.contains(SampleFlags::END_OF_STREAM) {
            self.eos_queued = true;
            if let Some(encoder) = self.encoder.as_mut() {
                encoder.flush()?;
            }
            self.collect_packets()?;
            let eos_pts = pts_us.max(self.last_pts_us);
            self.slots
                .push(Bytes::new(), BufferInfo::end_of_stream(eos_pts));
        }
        Ok(())
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<CodecPoll, RecorderError> {
        self.state.expect_running("dequeue_output")?;

        if !self.format_sent {
            let encoder = self.encoder.as_ref().ok_or_else(|| {
                RecorderError::Lifecycle("dequeue_output before prepare".into())
            })?;
            self.format_sent = true;
            return Ok(CodecPoll::Format(
                TrackFormat::new(MediaKind::Audio, "audio/mp4a-latm")
                    .with_parameters(encoder.codec_parameters().into()),
            ));
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
        if matches!(self.state, CodecState::Running) {
            self.state = CodecState::Stopped;
        }
    }

    fn release(&mut self) {
        if self.state == CodecState::Released {
            return;
        }
        self.encoder = None;
        self.inputs.clear();
        self.free_inputs.clear();
        self.lent_inputs.clear();
        self.state = CodecState::Released;
    }
}
