//! Container writing
//!
//! [`ContainerWriter`] owns the single-start / single-stop lifecycle of the
//! output container and funnels samples from both producer workers into one
//! [`SampleSink`] backend. The writer is the only resource shared between
//! the video coordinator and the audio pump, so it serializes everything
//! behind one mutex.

mod mp4;

pub use mp4::Mp4Sink;

use crate::error::RecorderError;
use crate::pipeline::types::{BufferInfo, MediaKind, SampleFlags};
use log::{debug, info};
use std::fmt;
use std::sync::Mutex;

/// Negotiated output format of one encoder, announced exactly once before
/// any data-bearing buffer.
pub struct TrackFormat {
    pub kind: MediaKind,
    /// Mime-style identity, e.g. "video/avc" or "audio/mp4a-latm".
    pub mime: String,
    /// Backend codec parameters needed to mux this track. Absent only in
    /// tests with in-memory sinks.
    pub parameters: Option<ac_ffmpeg::codec::CodecParameters>,
}

impl TrackFormat {
    pub fn new(kind: MediaKind, mime: impl Into<String>) -> Self {
        Self {
            kind,
            mime: mime.into(),
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: ac_ffmpeg::codec::CodecParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

impl fmt::Debug for TrackFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackFormat")
            .field("kind", &self.kind)
            .field("mime", &self.mime)
            .field("has_parameters", &self.parameters.is_some())
            .finish()
    }
}

/// Backend that actually serializes samples into a container.
///
/// Lifecycle is driven entirely by [`ContainerWriter`]: `begin` once with
/// the complete track list, any number of `write` calls, `finish` once.
pub trait SampleSink: Send {
    fn begin(&mut self, tracks: &[TrackFormat]) -> Result<(), RecorderError>;

    fn write(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), RecorderError>;

    fn finish(&mut self) -> Result<(), RecorderError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterPhase {
    /// Accepting add_track calls
    Collecting,
    /// Started, accepting samples
    Started,
    /// Stopped, no further samples
    Stopped,
    /// Terminal
    Released,
}

struct WriterInner {
    phase: WriterPhase,
    tracks: Vec<TrackFormat>,
    sink: Box<dyn SampleSink>,
}

/// Lifecycle-enforcing front over a [`SampleSink`].
///
/// Invariants: a track may be added only before start; start requires every
/// expected track; once started no further tracks; once stopped no further
/// samples. Both encoders funnel through the same instance from two worker
/// contexts, hence the internal lock.
pub struct ContainerWriter {
    expected_tracks: usize,
    inner: Mutex<WriterInner>,
}

impl ContainerWriter {
    pub fn new(sink: Box<dyn SampleSink>, expected_tracks: usize) -> Self {
        Self {
            expected_tracks,
            inner: Mutex::new(WriterInner {
                phase: WriterPhase::Collecting,
                tracks: Vec::with_capacity(expected_tracks),
                sink,
            }),
        }
    }

    pub fn expected_tracks(&self) -> usize {
        self.expected_tracks
    }

    /// Register one encoder's negotiated format. Fails once the writer has
    /// started.
    pub fn add_track(&self, format: TrackFormat) -> Result<usize, RecorderError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase != WriterPhase::Collecting {
            return Err(RecorderError::Lifecycle(format!(
                "add_track after writer {:?}",
                inner.phase
            )));
        }
        if inner.tracks.len() >= self.expected_tracks {
            return Err(RecorderError::Lifecycle(
                "more tracks than the writer expects".into(),
            ));
        }
        info!("Output format changed. New format: {:?}", format);
        inner.tracks.push(format);
        Ok(inner.tracks.len() - 1)
    }

    /// Start the writer if every expected track has been added. Returns
    /// whether this call performed the start. Safe to race from both
    /// producer workers; only one of them wins.
    pub fn start_if_ready(&self) -> Result<bool, RecorderError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase != WriterPhase::Collecting || inner.tracks.len() < self.expected_tracks {
            return Ok(false);
        }
        Self::start_locked(&mut inner)?;
        Ok(true)
    }

    /// Start unconditionally. Fails with a lifecycle error when tracks are
    /// missing or the writer already started.
    pub fn start(&self) -> Result<(), RecorderError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase != WriterPhase::Collecting {
            return Err(RecorderError::Lifecycle(format!(
                "start after writer {:?}",
                inner.phase
            )));
        }
        if inner.tracks.len() < self.expected_tracks {
            return Err(RecorderError::Lifecycle(format!(
                "start with {} of {} tracks added",
                inner.tracks.len(),
                self.expected_tracks
            )));
        }
        Self::start_locked(&mut inner)
    }

    fn start_locked(inner: &mut WriterInner) -> Result<(), RecorderError> {
        let tracks = std::mem::take(&mut inner.tracks);
        inner.sink.begin(&tracks)?;
        inner.tracks = tracks;
        inner.phase = WriterPhase::Started;
        info!("Started container writer with {} track(s)", inner.tracks.len());
        Ok(())
    }

    pub fn is_started(&self) -> bool {
        self.inner.lock().unwrap().phase == WriterPhase::Started
    }

    /// Append one encoded sample to a track.
    ///
    /// Zero-size samples without the end-of-stream flag are dropped
    /// silently: codec-config-only buffers were already consumed during
    /// format negotiation and must not be re-muxed.
    pub fn write_sample(
        &self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), RecorderError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase != WriterPhase::Started {
            return Err(RecorderError::Lifecycle(format!(
                "write_sample while writer {:?}",
                inner.phase
            )));
        }
        if track >= inner.tracks.len() {
            return Err(RecorderError::Lifecycle(format!(
                "unknown track index {}",
                track
            )));
        }
        if info.size == 0 {
            if info.flags.contains(SampleFlags::END_OF_STREAM) {
                debug!("track {}: end of stream marker", track);
            } else {
                debug!("track {}: info.size == 0, drop it", track);
            }
            return Ok(());
        }
        inner.sink.write(track, data, info)
    }

    /// Stop accepting samples and finalize the container. Safe to call
    /// after a partially-failed start and safe to call repeatedly.
    pub fn stop(&self) -> Result<(), RecorderError> {
        let mut inner = self.inner.lock().unwrap();
        match inner.phase {
            WriterPhase::Started => {
                inner.phase = WriterPhase::Stopped;
                inner.sink.finish()
            }
            WriterPhase::Collecting => {
                // nothing was started, nothing to finalize
                inner.phase = WriterPhase::Stopped;
                Ok(())
            }
            WriterPhase::Stopped | WriterPhase::Released => Ok(()),
        }
    }

    /// Free the writer. Idempotent; finalization errors on this path are
    /// swallowed because release may run after a failure already surfaced.
    pub fn release(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.phase == WriterPhase::Started {
            let _ = inner.sink.finish();
        }
        inner.phase = WriterPhase::Released;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::testkit::MemorySink;

    fn video_format() -> TrackFormat {
        TrackFormat::new(MediaKind::Video, "video/avc")
    }

    fn audio_format() -> TrackFormat {
        TrackFormat::new(MediaKind::Audio, "audio/mp4a-latm")
    }

    fn sample(size: usize, pts_us: i64) -> BufferInfo {
        BufferInfo::new(size, pts_us, SampleFlags::empty())
    }

    #[test]
    fn test_start_requires_all_tracks() {
        let (sink, log) = MemorySink::new();
        let writer = ContainerWriter::new(Box::new(sink), 2);

        writer.add_track(video_format()).unwrap();
        assert!(matches!(writer.start(), Err(RecorderError::Lifecycle(_))));
        assert!(!writer.start_if_ready().unwrap());
        assert!(!writer.is_started());

        writer.add_track(audio_format()).unwrap();
        assert!(writer.start_if_ready().unwrap());
        assert!(writer.is_started());
        // the race loser observes an already-started writer
        assert!(!writer.start_if_ready().unwrap());
        assert_eq!(log.lock().unwrap().begun.as_ref().unwrap().len(), 2);
    }

    #[test]
    fn test_add_track_after_start_fails() {
        let (sink, _log) = MemorySink::new();
        let writer = ContainerWriter::new(Box::new(sink), 1);
        writer.add_track(video_format()).unwrap();
        writer.start().unwrap();
        assert!(matches!(
            writer.add_track(audio_format()),
            Err(RecorderError::Lifecycle(_))
        ));
    }

    #[test]
    fn test_write_before_start_fails() {
        let (sink, log) = MemorySink::new();
        let writer = ContainerWriter::new(Box::new(sink), 1);
        writer.add_track(video_format()).unwrap();
        let err = writer.write_sample(0, b"data", &sample(4, 0));
        assert!(matches!(err, Err(RecorderError::Lifecycle(_))));
        assert!(log.lock().unwrap().samples.is_empty());
    }

    #[test]
    fn test_zero_size_non_eos_dropped_silently() {
        let (sink, log) = MemorySink::new();
        let writer = ContainerWriter::new(Box::new(sink), 1);
        writer.add_track(video_format()).unwrap();
        writer.start().unwrap();

        writer.write_sample(0, &[], &sample(0, 10)).unwrap();
        writer
            .write_sample(0, &[], &BufferInfo::end_of_stream(20))
            .unwrap();
        // neither reaches the sink as payload
        assert!(log.lock().unwrap().samples.is_empty());

        writer.write_sample(0, b"frame", &sample(5, 30)).unwrap();
        assert_eq!(log.lock().unwrap().samples.len(), 1);
    }

    #[test]
    fn test_write_after_stop_fails() {
        let (sink, _log) = MemorySink::new();
        let writer = ContainerWriter::new(Box::new(sink), 1);
        writer.add_track(video_format()).unwrap();
        writer.start().unwrap();
        writer.stop().unwrap();
        assert!(matches!(
            writer.write_sample(0, b"late", &sample(4, 0)),
            Err(RecorderError::Lifecycle(_))
        ));
    }

    #[test]
    fn test_stop_and_release_idempotent() {
        let (sink, log) = MemorySink::new();
        let writer = ContainerWriter::new(Box::new(sink), 1);

        // stop before anything started must not fail
        writer.stop().unwrap();
        writer.stop().unwrap();
        writer.release();
        writer.release();
        assert!(!log.lock().unwrap().finished);
    }

    #[test]
    fn test_stop_finalizes_once() {
        let (sink, log) = MemorySink::new();
        let writer = ContainerWriter::new(Box::new(sink), 1);
        writer.add_track(video_format()).unwrap();
        writer.start().unwrap();
        writer.stop().unwrap();
        writer.stop().unwrap();
        writer.release();
        assert_eq!(log.lock().unwrap().finish_calls, 1);
    }

    #[test]
    fn test_writes_from_two_workers_interleave() {
        use std::sync::Arc;

        let (sink, log) = MemorySink::new();
        let writer = Arc::new(ContainerWriter::new(Box::new(sink), 2));
        writer.add_track(video_format()).unwrap();
        writer.add_track(audio_format()).unwrap();
        writer.start().unwrap();

        let mut handles = Vec::new();
        for track in 0..2usize {
            let writer = Arc::clone(&writer);
            handles.push(std::thread::spawn(move || {
                for i in 0..50i64 {
                    writer
                        .write_sample(track, b"payload", &sample(7, i * 1_000))
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        let log = log.lock().unwrap();
        assert_eq!(log.samples.len(), 100);
        // per-track timestamps stay non-decreasing under interleaving
        for track in 0..2usize {
            let mut last = i64::MIN;
            for s in log.samples.iter().filter(|s| s.track == track) {
                assert!(s.pts_us >= last);
                last = s.pts_us;
            }
        }
    }
}
