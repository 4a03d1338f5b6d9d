//! Audio capture pump
//!
//! One worker owning the audio codec end to end: it pulls PCM from the
//! device, feeds the encoder through the explicit input-buffer protocol,
//! and muxes encoded output into the shared [`ContainerWriter`]. Feeding
//! is gated on the encoder keeping up, so capture latency never grows
//! unbounded.

use crate::capture::AudioSource;
use crate::config::AudioEncodeConfig;
use crate::encoder::{CodecPoll, SampleCodec};
use crate::error::RecorderError;
use crate::muxer::ContainerWriter;
use crate::pipeline::clock::SessionClock;
use crate::pipeline::smoother::FrameTimestampSmoother;
use crate::pipeline::types::{BufferInfo, SampleFlags};
use log::{debug, info};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Poll pacing in captured samples: roughly two encoder frames' worth of
/// audio per wakeup.
const POLL_SAMPLES: u64 = 2048;

/// How many dequeued-but-unmuxed outputs may pile up before input feeding
/// pauses.
const MAX_OUTSTANDING_OUTPUTS: usize = 1;

pub struct MicRecorder {
    codec: Box<dyn SampleCodec>,
    device: Box<dyn AudioSource>,
    writer: Arc<ContainerWriter>,
    clock: SessionClock,
    errors: mpsc::UnboundedSender<RecorderError>,
    force_stop: Arc<AtomicBool>,
    smoother: FrameTimestampSmoother,
    poll_interval: Duration,
    track: Option<usize>,
    /// Outputs dequeued before the writer started, muxed as soon as it does.
    deferred: VecDeque<(usize, BufferInfo)>,
    eos_queued: bool,
}

impl MicRecorder {
    pub fn new(
        codec: Box<dyn SampleCodec>,
        device: Box<dyn AudioSource>,
        writer: Arc<ContainerWriter>,
        config: &AudioEncodeConfig,
        clock: SessionClock,
        errors: mpsc::UnboundedSender<RecorderError>,
    ) -> Self {
        let poll_ms = POLL_SAMPLES * 1_000 / config.sample_rate as u64;
        Self {
            codec,
            device,
            writer,
            clock,
            errors,
            force_stop: Arc::new(AtomicBool::new(false)),
            smoother: FrameTimestampSmoother::new(config.sample_rate, config.channels),
            poll_interval: Duration::from_millis(poll_ms.max(1)),
            track: None,
            deferred: VecDeque::new(),
            eos_queued: false,
        }
    }

    /// Shared flag that asks the pump to end its stream.
    pub fn force_stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.force_stop)
    }

    #[cfg(test)]
    pub(crate) fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn run(mut self) {
        if let Err(e) = self.codec.prepare() {
            let _ = self.errors.send(e);
            self.teardown();
            return;
        }
        if let Err(e) = self.device.start() {
            let _ = self.errors.send(e);
            self.teardown();
            return;
        }
        info!("Audio pump running");

        loop {
            match self.pump_once() {
                Ok(true) => break,
                Ok(false) => {}
                Err(e) => {
                    let _ = self.errors.send(e);
                    break;
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }

        self.teardown();
        info!("Audio pump finished");
    }

    /// One drain-then-feed cycle. Returns true once the end-of-stream
    /// buffer has been muxed.
    fn pump_once(&mut self) -> Result<bool, RecorderError> {
        let stopping = self.force_stop.load(Ordering::Acquire) || self.device.is_stopped();

        loop {
            if self.writer.is_started() {
                while let Some((index, info)) = self.deferred.pop_front() {
                    if self.mux(index, &info)? {
                        return Ok(true);
                    }
                }
            }

            match self.codec.dequeue_output(Duration::ZERO)? {
                CodecPoll::Format(format) => {
                    let track = self.writer.add_track(format)?;
                    debug!("Audio track added as index {}", track);
                    self.track = Some(track);
                    self.writer.start_if_ready()?;
                }
                CodecPoll::Buffer { index, info } => {
                    if self.track.is_none() {
                        return Err(RecorderError::MuxerNotStarted);
                    }
                    if !self.writer.is_started() {
                        // hold the buffer until the other track shows up
                        self.deferred.push_back((index, info));
                        break;
                    }
                    if self.mux(index, &info)? {
                        return Ok(true);
                    }
                }
                CodecPoll::TryAgain => break,
            }
        }

        if !self.eos_queued && self.deferred.len() <= MAX_OUTSTANDING_OUTPUTS {
            self.feed_once(stopping)?;
        }
        Ok(false)
    }

    /// Pull one batch from the device into the encoder, or queue the
    /// end-of-stream marker when stopping.
    fn feed_once(&mut self, stopping: bool) -> Result<(), RecorderError> {
        let Some(index) = self.codec.dequeue_input()? else {
            return Ok(());
        };

        if stopping {
            self.codec.queue_input(
                index,
                0,
                self.clock.now_us(),
                SampleFlags::END_OF_STREAM,
            )?;
            self.eos_queued = true;
            debug!("Audio end of stream queued");
            return Ok(());
        }

        let read = {
            let buf = self.codec.input_buffer(index)?;
            self.device.read(buf)?
        };
        if read > 0 {
            let pts_us = self.smoother.pts_for_batch(read / 2, self.clock.now_us());
            self.codec
                .queue_input(index, read, pts_us, SampleFlags::empty())?;
        } else {
            // return the buffer unused
            self.codec.queue_input(index, 0, 0, SampleFlags::empty())?;
        }
        Ok(())
    }

    fn mux(&mut self, index: usize, info: &BufferInfo) -> Result<bool, RecorderError> {
        let track = self.track.ok_or(RecorderError::MuxerNotStarted)?;
        if info.flags.contains(SampleFlags::CODEC_CONFIG) {
            // already consumed during format negotiation
            self.codec.release_output(index)?;
            return Ok(false);
        }
        let data = self.codec.output_data(index)?;
        self.writer.write_sample(track, &data, info)?;
        self.codec.release_output(index)?;
        Ok(info.is_eos())
    }

    fn teardown(&mut self) {
        self.device.stop();
        self.codec.stop();
        self.device.release();
        self.codec.release();
    }
}
