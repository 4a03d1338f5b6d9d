//! Recording session coordinator
//!
//! [`ScreenRecorder`] owns the whole session: it prepares the video
//! encoder, binds the screen source, spawns the audio pump, drains encoded
//! video into the shared writer, and runs the stop sequence. Every
//! terminal path funnels into exactly one `Stopped` event.

use crate::capture::{AudioSource, ScreenSource};
use crate::config::SessionConfig;
use crate::encoder::{
    CodecPoll, FfmpegAudioEncoder, FfmpegVideoEncoder, FrameSurface, SampleCodec,
};
use crate::error::RecorderError;
use crate::muxer::{ContainerWriter, Mp4Sink};
use crate::pipeline::clock::SessionClock;
use crate::pipeline::mic::MicRecorder;
use crate::pipeline::state::RecorderState;
use crate::pipeline::types::{RecorderEvent, SampleFlags};
use log::{debug, error, info, warn};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Video output poll timeout per drain iteration.
const VIDEO_POLL: Duration = Duration::from_millis(2);

/// Consecutive empty polls after a quit request before the worker gives up
/// waiting for the end-of-stream buffer.
const QUIET_POLL_LIMIT: u32 = 200;

pub(crate) struct AudioParts {
    pub codec: Box<dyn SampleCodec>,
    pub device: Box<dyn AudioSource>,
    pub config: crate::config::AudioEncodeConfig,
}

pub(crate) struct Parts {
    pub video: Box<dyn SampleCodec>,
    pub surface: Option<FrameSurface>,
    pub source: Box<dyn ScreenSource>,
    pub audio: Option<AudioParts>,
    pub writer: Arc<ContainerWriter>,
    pub clock: SessionClock,
}

pub struct ScreenRecorder {
    parts: Option<Parts>,
    force_quit: Arc<AtomicBool>,
    /// Shared with the video encoder; set asks for an IDR at the next frame.
    keyframe_request: Option<Arc<AtomicBool>>,
    state: Arc<Mutex<RecorderState>>,
    events: mpsc::UnboundedSender<RecorderEvent>,
    worker: Option<JoinHandle<()>>,
}

impl ScreenRecorder {
    /// Assemble a session writing to the configured MP4 file.
    pub fn new(
        session: SessionConfig,
        source: Box<dyn ScreenSource>,
        device: Option<Box<dyn AudioSource>>,
        clock: SessionClock,
    ) -> (Self, mpsc::UnboundedReceiver<RecorderEvent>) {
        let (video, surface) = FfmpegVideoEncoder::new(session.video.clone());
        let keyframe_request = video.force_idr_handle();

        let audio = match (&session.audio, device) {
            (Some(config), Some(device)) => Some(AudioParts {
                codec: Box::new(FfmpegAudioEncoder::new(config.clone())) as Box<dyn SampleCodec>,
                device,
                config: config.clone(),
            }),
            _ => None,
        };

        let expected_tracks = 1 + audio.is_some() as usize;
        let writer = Arc::new(ContainerWriter::new(
            Box::new(Mp4Sink::new(&session.output)),
            expected_tracks,
        ));
        info!(
            "Recording {} track(s) to {}",
            expected_tracks,
            session.output.display()
        );

        let (mut recorder, events_rx) = Self::with_parts(Parts {
            video: Box::new(video),
            surface: Some(surface),
            source,
            audio,
            writer,
            clock,
        });
        recorder.keyframe_request = Some(keyframe_request);
        (recorder, events_rx)
    }

    pub(crate) fn with_parts(parts: Parts) -> (Self, mpsc::UnboundedReceiver<RecorderEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        (
            Self {
                parts: Some(parts),
                force_quit: Arc::new(AtomicBool::new(false)),
                keyframe_request: None,
                state: Arc::new(Mutex::new(RecorderState::Idle)),
                events,
                worker: None,
            },
            events_rx,
        )
    }

    pub fn state(&self) -> RecorderState {
        *self.state.lock().unwrap()
    }

    /// Launch the session worker. Valid exactly once, from `Idle`.
    pub fn start(&mut self) -> Result<(), RecorderError> {
        {
            let mut state = self.state.lock().unwrap();
            if !state.can_transition_to(&RecorderState::Starting) {
                return Err(RecorderError::Lifecycle(format!(
                    "start while {}",
                    state
                )));
            }
            *state = RecorderState::Starting;
        }

        let parts = self.parts.take().ok_or_else(|| {
            RecorderError::Lifecycle("session was already consumed".into())
        })?;
        let force_quit = Arc::clone(&self.force_quit);
        let state = Arc::clone(&self.state);
        let events = self.events.clone();

        self.worker = Some(tokio::spawn(async move {
            run_session(parts, force_quit, state, events).await;
        }));
        Ok(())
    }

    /// Ask the video encoder to emit an IDR frame at the next opportunity.
    pub fn request_keyframe(&self) {
        if let Some(request) = &self.keyframe_request {
            request.store(true, Ordering::Release);
        }
    }

    /// Request a bounded shutdown. The end-of-stream flag is injected into
    /// the next drained video buffer, so the file still finalizes cleanly.
    pub fn quit(&mut self) {
        self.force_quit.store(true, Ordering::Release);

        // quit before start releases immediately
        if self.worker.is_none() {
            let mut state = self.state.lock().unwrap();
            if state.can_transition_to(&RecorderState::Released) {
                *state = RecorderState::Released;
            }
            if let Some(parts) = self.parts.take() {
                parts.writer.release();
            }
        }
    }

    /// Wait for the worker to finish its teardown.
    pub async fn join(&mut self) {
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
    }
}

fn set_state(state: &Mutex<RecorderState>, target: RecorderState) {
    let mut state = state.lock().unwrap();
    if state.can_transition_to(&target) {
        debug!("Recorder state: {} -> {}", state, target);
        *state = target;
    } else {
        warn!("Ignored state transition {} -> {}", state, target);
    }
}

async fn run_session(
    mut parts: Parts,
    force_quit: Arc<AtomicBool>,
    state: Arc<Mutex<RecorderState>>,
    events: mpsc::UnboundedSender<RecorderEvent>,
) {
    let mut fatal: Option<RecorderError> = None;
    let mut mic: Option<(Arc<AtomicBool>, JoinHandle<()>)> = None;
    let (audio_errors_tx, mut audio_errors) = mpsc::unbounded_channel();

    // setup
    let started = match setup(&mut parts, &audio_errors_tx) {
        Ok(spawned_mic) => {
            mic = spawned_mic;
            true
        }
        Err(e) => {
            error!("Session setup failed: {}", e);
            fatal = Some(e);
            false
        }
    };

    if started {
        set_state(&state, RecorderState::Running {
            started_at: Instant::now(),
        });
        let _ = events.send(RecorderEvent::Started);

        fatal = drain_video(
            &mut parts,
            &force_quit,
            &mut audio_errors,
            &events,
        )
        .await
        .err();
    }

    // stop sequence: video first, then the audio pump, then the container
    if started {
        set_state(&state, RecorderState::Stopping);
    }
    parts.source.stop();
    parts.video.stop();

    if let Some((mic_stop, mic_handle)) = mic {
        mic_stop.store(true, Ordering::Release);
        let _ = mic_handle.await;
        if fatal.is_none() {
            if let Ok(e) = audio_errors.try_recv() {
                fatal = Some(e);
            }
        }
    }

    if let Err(e) = parts.writer.stop() {
        error!("Finalizing the container failed: {}", e);
        if fatal.is_none() {
            fatal = Some(e);
        }
    }

    if let Some(ref e) = fatal {
        error!("Recording stopped with error: {}", e);
    } else {
        info!("Recording stopped");
    }
    let _ = events.send(RecorderEvent::Stopped { error: fatal });

    // teardown
    parts.video.release();
    parts.writer.release();
    set_state(&state, RecorderState::Released);
}

/// Prepare the video codec, bind the screen source, spawn the audio pump.
fn setup(
    parts: &mut Parts,
    audio_errors: &mpsc::UnboundedSender<RecorderError>,
) -> Result<Option<(Arc<AtomicBool>, JoinHandle<()>)>, RecorderError> {
    parts.video.prepare()?;
    if let Some(surface) = parts.surface.take() {
        parts.source.bind(surface)?;
    }

    let mic = match parts.audio.take() {
        Some(audio) => {
            let pump = MicRecorder::new(
                audio.codec,
                audio.device,
                Arc::clone(&parts.writer),
                &audio.config,
                parts.clock,
                audio_errors.clone(),
            );
            let stop = pump.force_stop_handle();
            Some((stop, tokio::spawn(pump.run())))
        }
        None => None,
    };
    Ok(mic)
}

/// Drain encoded video into the writer until end of stream.
async fn drain_video(
    parts: &mut Parts,
    force_quit: &AtomicBool,
    audio_errors: &mut mpsc::UnboundedReceiver<RecorderError>,
    events: &mpsc::UnboundedSender<RecorderEvent>,
) -> Result<(), RecorderError> {
    let mut track: Option<usize> = None;
    let mut deferred: VecDeque<(usize, crate::pipeline::types::BufferInfo)> = VecDeque::new();
    let mut quiet_polls = 0u32;

    loop {
        // keep the task cooperative even when output is always ready
        tokio::task::yield_now().await;

        if let Ok(e) = audio_errors.try_recv() {
            return Err(e);
        }
        let quit = force_quit.load(Ordering::Acquire);

        if parts.writer.is_started() {
            while let Some((index, info)) = deferred.pop_front() {
                if mux_video(parts, track, index, &info, events)? {
                    return Ok(());
                }
            }
        }

        match parts.video.dequeue_output(VIDEO_POLL)? {
            CodecPoll::Format(format) => {
                quiet_polls = 0;
                track = Some(parts.writer.add_track(format)?);
                parts.writer.start_if_ready()?;
            }
            CodecPoll::Buffer { index, mut info } => {
                quiet_polls = 0;
                if track.is_none() {
                    return Err(RecorderError::MuxerNotStarted);
                }
                if quit {
                    // bounded shutdown: the capture surface never signals
                    // end of stream on its own
                    info.flags.insert(SampleFlags::END_OF_STREAM);
                }
                if !parts.writer.is_started() && !info.is_eos() {
                    deferred.push_back((index, info));
                    continue;
                }
                if mux_video(parts, track, index, &info, events)? {
                    return Ok(());
                }
            }
            CodecPoll::TryAgain => {
                quiet_polls += 1;
                if quit && quiet_polls > QUIET_POLL_LIMIT {
                    warn!("No end-of-stream buffer after quit, giving up the drain");
                    return Ok(());
                }
                tokio::time::sleep(VIDEO_POLL).await;
            }
        }
    }
}

/// Write one drained buffer, releasing it afterwards. Returns true on the
/// end-of-stream buffer.
fn mux_video(
    parts: &mut Parts,
    track: Option<usize>,
    index: usize,
    info: &crate::pipeline::types::BufferInfo,
    events: &mpsc::UnboundedSender<RecorderEvent>,
) -> Result<bool, RecorderError> {
    let track = track.ok_or(RecorderError::MuxerNotStarted)?;
    let mut info = *info;

    if info.flags.contains(SampleFlags::CODEC_CONFIG) {
        // config payload was consumed during format negotiation
        info.size = 0;
    }

    if info.is_eos() && !parts.writer.is_started() {
        // stream ended before the container ever came up; nothing to write
        parts.video.release_output(index)?;
        return Ok(true);
    }

    let data = parts.video.output_data(index)?;
    parts.writer.write_sample(track, &data, &info)?;
    parts.video.release_output(index)?;

    if info.size > 0 && !info.is_eos() {
        let _ = events.send(RecorderEvent::Recording {
            pts_us: info.pts_us,
        });
    }
    Ok(info.is_eos())
}
