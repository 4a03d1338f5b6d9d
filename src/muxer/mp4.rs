//! MP4 sink backed by the FFmpeg muxer.

use crate::error::RecorderError;
use crate::muxer::{SampleSink, TrackFormat};
use crate::pipeline::types::{BufferInfo, SampleFlags};
use ac_ffmpeg::format::io::IO;
use ac_ffmpeg::format::muxer::{Muxer, OutputFormat};
use ac_ffmpeg::packet::PacketMut;
use ac_ffmpeg::time::{TimeBase, Timestamp};
use log::{debug, info};
use std::fs::File;
use std::path::PathBuf;

/// Serializes encoded tracks into an ISO base media (MP4) file.
///
/// The file is created lazily in `begin`, once every track's codec
/// parameters are known; samples are interleaved in arrival order.
pub struct Mp4Sink {
    path: PathBuf,
    muxer: Option<Muxer<File>>,
}

unsafe impl Send for Mp4Sink {}

impl Mp4Sink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            muxer: None,
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl SampleSink for Mp4Sink {
    fn begin(&mut self, tracks: &[TrackFormat]) -> Result<(), RecorderError> {
        let output_format = self
            .path
            .to_str()
            .and_then(OutputFormat::guess_from_file_name)
            .or_else(|| OutputFormat::find_by_name("mp4"))
            .ok_or_else(|| {
                RecorderError::CodecRuntime("no mp4 muxer available".to_string())
            })?;

        let file = File::create(&self.path)?;
        let io = IO::from_seekable_write_stream(file);

        let mut builder = Muxer::builder();
        for track in tracks {
            let parameters = track.parameters.as_ref().ok_or_else(|| {
                RecorderError::Configuration(format!(
                    "track {} carries no codec parameters",
                    track.mime
                ))
            })?;
            builder
                .add_stream(parameters)
                .map_err(|e| RecorderError::CodecRuntime(e.to_string()))?;
        }

        let muxer = builder
            .build(io, output_format)
            .map_err(|e| RecorderError::CodecRuntime(e.to_string()))?;
        self.muxer = Some(muxer);
        info!("Created {} with {} track(s)", self.path.display(), tracks.len());
        Ok(())
    }

    fn write(
        &mut self,
        track: usize,
        data: &[u8],
        info: &BufferInfo,
    ) -> Result<(), RecorderError> {
        let muxer = self.muxer.as_mut().ok_or_else(|| {
            RecorderError::Lifecycle("mp4 sink received a sample before begin".into())
        })?;

        let payload = &data[info.offset..info.offset + info.size];
        let mut packet = PacketMut::new(payload.len());
        packet.data_mut().copy_from_slice(payload);

        let time_base = TimeBase::new(1, 1_000_000);
        let pts = Timestamp::new(info.pts_us, time_base);
        let packet = packet
            .with_time_base(time_base)
            .with_pts(pts)
            .with_dts(pts)
            .with_key_flag(info.flags.contains(SampleFlags::KEY_FRAME))
            .freeze()
            .with_stream_index(track);

        debug!(
            "Sent {} bytes to the muxer, track={}, pts={}us",
            info.size, track, info.pts_us
        );
        muxer
            .push(packet)
            .map_err(|e| RecorderError::CodecRuntime(e.to_string()))
    }

    fn finish(&mut self) -> Result<(), RecorderError> {
        if let Some(mut muxer) = self.muxer.take() {
            muxer
                .flush()
                .map_err(|e| RecorderError::CodecRuntime(e.to_string()))?;
            info!("Finalized {}", self.path.display());
        }
        Ok(())
    }
}
