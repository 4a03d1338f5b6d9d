use crate::capture::YuvFrame;
use crate::config::VideoEncodeConfig;
use crate::encoder::frame_pool::FramePool;
use crate::encoder::{CodecPoll, CodecState, OutputSlots, SampleCodec, contains_idr};
use crate::error::RecorderError;
use crate::muxer::TrackFormat;
use crate::pipeline::types::{BufferInfo, MediaKind, SampleFlags};
use ac_ffmpeg::codec::video::VideoEncoder;
use ac_ffmpeg::codec::{Encoder, video};
use ac_ffmpeg::time::{TimeBase, Timestamp};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;

/// Encoder fallback chain: hardware encoders first, then software.
/// Static options only; rate control and GOP come from the session config.
const ENCODER_CHAIN: &[(&str, &[(&str, &str)])] = &[
    (
        "h264_nvenc",
        &[
            ("preset", "p2"),
            ("tune", "ll"),
            ("zerolatency", "1"),
            ("rc", "vbr"),
            ("gpu", "0"),
            ("delay", "0"),
            ("forced-idr", "1"),
        ],
    ),
    (
        "h264_qsv",
        &[("preset", "fast"), ("low_power", "0"), ("async_depth", "4")],
    ),
    (
        "h264_amf",
        &[
            ("usage", "lowlatency"),
            ("quality", "balanced"),
            ("rc", "vbr_peak"),
            ("frame_skipping", "0"),
        ],
    ),
    // CPU fallback, always available
    (
        "libx264",
        &[
            ("tune", "zerolatency"),
            ("threads", "0"),
            ("sliced-threads", "1"),
            ("sync-lookahead", "0"),
            ("bframes", "0"),
        ],
    ),
];

/// How many frames the surface may buffer before the producer blocks.
const SURFACE_DEPTH: usize = 8;

/// Producer side of a video encoder's input surface.
///
/// The capture source pushes raw NV12 frames here; dropping the surface
/// (or every clone of it) signals the encoder to flush and emit
/// end-of-stream.
#[derive(Clone)]
pub struct FrameSurface {
    frames: mpsc::Sender<YuvFrame>,
}

impl FrameSurface {
    /// Submit one frame. Waits when the encoder is behind; fails once the
    /// encoder side is gone.
    pub async fn submit(&self, frame: YuvFrame) -> Result<(), RecorderError> {
        self.frames
            .send(frame)
            .await
            .map_err(|_| RecorderError::Lifecycle("frame surface is closed".into()))
    }

    /// Non-blocking submit for callers on a dedicated thread.
    pub fn try_submit(&self, frame: YuvFrame) -> Result<(), RecorderError> {
        self.frames
            .try_send(frame)
            .map_err(|_| RecorderError::Lifecycle("frame surface is closed or full".into()))
    }
}

/// H.264 video encoder fed through a [`FrameSurface`].
///
/// Input never carries end-of-stream: the stream ends when the surface
/// producer is dropped, at which point the codec is flushed and a final
/// buffer flagged end-of-stream comes out of `dequeue_output`.
pub struct FfmpegVideoEncoder {
    config: VideoEncodeConfig,
    encoder: Option<VideoEncoder>,
    frame_pool: Option<FramePool>,
    frames: mpsc::Receiver<YuvFrame>,
    slots: OutputSlots,
    state: CodecState,
    format_sent: bool,
    /// Input timestamps not yet paired with an output packet.
    pending_pts: VecDeque<i64>,
    last_pts_us: i64,
    surface_closed: bool,
    force_idr: Arc<AtomicBool>,
    width: usize,
    height: usize,
}

unsafe impl Send for FfmpegVideoEncoder {}

impl FfmpegVideoEncoder {
    /// Build the encoder shell and its input surface. The codec itself is
    /// opened in `prepare`, on the worker that will drain it.
    pub fn new(config: VideoEncodeConfig) -> (Self, FrameSurface) {
        let width = (config.width as usize).next_multiple_of(2);
        let height = (config.height as usize).next_multiple_of(2);
        let (tx, rx) = mpsc::channel(SURFACE_DEPTH);

        let encoder = Self {
            config,
            encoder: None,
            frame_pool: None,
            frames: rx,
            slots: OutputSlots::new(),
            state: CodecState::Created,
            format_sent: false,
            pending_pts: VecDeque::new(),
            last_pts_us: 0,
            surface_closed: false,
            force_idr: Arc::new(AtomicBool::new(false)),
            width,
            height,
        };

        (encoder, FrameSurface { frames: tx })
    }

    /// Shared flag that forces the next encoded frame to be an IDR picture.
    pub fn force_idr_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.force_idr)
    }

    fn try_create_encoder(
        &self,
        time_base: TimeBase,
        pixel_format: video::frame::PixelFormat,
    ) -> Result<(VideoEncoder, String), RecorderError> {
        let bitrate = self.config.bitrate.to_string();
        let maxrate = (self.config.bitrate + self.config.bitrate / 2).to_string();
        let bufsize = (self.config.bitrate * 2).to_string();
        let gop = self.config.gop_size().to_string();
        let forced = self.config.codec_name.as_deref();

        for (codec, options) in ENCODER_CHAIN {
            if forced.is_some_and(|name| name != *codec) {
                continue;
            }
            let mut builder = match VideoEncoder::builder(codec) {
                Ok(b) => b,
                Err(e) => {
                    log::debug!("Encoder {} not available, skipping: {}", codec, e);
                    continue;
                }
            };
            builder = builder
                .pixel_format(pixel_format)
                .width(self.width)
                .height(self.height)
                .time_base(time_base);
            for (k, v) in *options {
                builder = builder.set_option(k, v);
            }
            builder = builder
                .set_option("b", &bitrate)
                .set_option("maxrate", &maxrate)
                .set_option("bufsize", &bufsize)
                .set_option("g", &gop);
            if let Some(profile) = self.config.profile.as_deref() {
                builder = builder.set_option("profile", profile);
            }
            if let Some(level) = self.config.level.as_deref() {
                builder = builder.set_option("level", level);
            }
            match builder.build() {
                Ok(enc) => return Ok((enc, codec.to_string())),
                Err(e) => {
                    log::debug!("Encoder {} failed to initialize: {}", codec, e);
                    continue;
                }
            }
        }

        Err(RecorderError::Configuration(
            "no H.264 encoder available for the requested video format".into(),
        ))
    }

    /// Push one raw frame through the codec and collect any packets it
    /// produced into the output slots.
    fn encode_frame(&mut self, raw: YuvFrame) -> Result<(), RecorderError> {
        let picture_type = if self.force_idr.swap(false, Ordering::Relaxed) {
            video::frame::PictureType::I
        } else {
            video::frame::PictureType::None
        };

        let pool = self.frame_pool.as_mut().ok_or_else(|| {
            RecorderError::Lifecycle("encode before prepare".into())
        })?;
        let mut frame = pool.take();
        let time_base = frame.time_base();
        frame = frame
            .with_pts(Timestamp::new(raw.pts_us, time_base))
            .with_picture_type(picture_type);

        {
            let mut planes = frame.planes_mut();
            let y_plane = planes[0].data_mut();
            let y_line_size = y_plane.len() / self.height;
            copy_plane(
                &raw.luminance_bytes,
                raw.luminance_stride as usize,
                y_line_size,
                self.height,
                self.width,
                y_plane,
            );
        }
        {
            let mut planes = frame.planes_mut();
            let uv_plane = planes[1].data_mut();
            let uv_height = self.height / 2;
            let uv_line_size = uv_plane.len() / uv_height;
            copy_plane(
                &raw.chrominance_bytes,
                raw.chrominance_stride as usize,
                uv_line_size,
                uv_height,
                self.width,
                uv_plane,
            );
        }

        let frame = frame.freeze();
        let encoder = self.encoder.as_mut().ok_or_else(|| {
            RecorderError::Lifecycle("encode before prepare".into())
        })?;
        encoder.push(frame.clone())?;
        if let Some(pool) = self.frame_pool.as_mut() {
            pool.put(frame);
        }
        self.pending_pts.push_back(raw.pts_us);

        self.collect_packets()
    }

    /// Move ready packets out of the codec into the output slots.
    fn collect_packets(&mut self) -> Result<(), RecorderError> {
        let encoder = match self.encoder.as_mut() {
            Some(encoder) => encoder,
            None => return Ok(()),
        };
        while let Some(packet) = encoder.take()? {
            let data = Bytes::copy_from_slice(packet.data());
            let pts_us = self.pending_pts.pop_front().unwrap_or(self.last_pts_us);
            self.last_pts_us = pts_us.max(self.last_pts_us);
            let mut flags = SampleFlags::empty();
            if contains_idr(&data) {
                flags.insert(SampleFlags::KEY_FRAME);
            }
            let info = BufferInfo::new(data.len(), pts_us, flags);
            self.slots.push(data, info);
        }
        Ok(())
    }

    /// Flush the codec after the surface closed and append the final
    /// end-of-stream buffer.
    fn flush_and_finish(&mut self) -> Result<(), RecorderError> {
        if let Some(encoder) = self.encoder.as_mut() {
            encoder.flush()?;
        }
        self.collect_packets()?;
        self.slots.push(
            Bytes::new(),
            BufferInfo::end_of_stream(self.last_pts_us),
        );
        Ok(())
    }
}

impl SampleCodec for FfmpegVideoEncoder {
    fn prepare(&mut self) -> Result<(), RecorderError> {
        if self.state != CodecState::Created {
            return Err(RecorderError::Lifecycle(format!(
                "prepare while codec {:?}",
                self.state
            )));
        }

        let time_base = TimeBase::new(1, 1_000_000);
        let pixel_format = video::frame::get_pixel_format("nv12");
        let (encoder, codec_name) = self.try_create_encoder(time_base, pixel_format)?;
        log::info!(
            "Using video encoder {} ({}x{} @ {}bps)",
            codec_name,
            self.width,
            self.height,
            self.config.bitrate
        );

        self.frame_pool = Some(FramePool::new(
            self.width,
            self.height,
            time_base,
            pixel_format,
        ));
        self.encoder = Some(encoder);
        self.state = CodecState::Running;
        Ok(())
    }

    fn dequeue_input(&mut self) -> Result<Option<usize>, RecorderError> {
        Err(RecorderError::Lifecycle(
            "video encoder takes input through its frame surface".into(),
        ))
    }

    fn input_buffer(&mut self, _index: usize) -> Result<&mut [u8], RecorderError> {
        Err(RecorderError::Lifecycle(
            "video encoder takes input through its frame surface".into(),
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
            "video encoder takes input through its frame surface".into(),
        ))
    }

    fn dequeue_output(&mut self, _timeout: Duration) -> Result<CodecPoll, RecorderError> {
        self.state.expect_running("dequeue_output")?;

        if !self.format_sent {
            let encoder = self.encoder.as_ref().ok_or_else(|| {
                RecorderError::Lifecycle("dequeue_output before prepare".into())
            })?;
            self.format_sent = true;
            return Ok(CodecPoll::Format(
                TrackFormat::new(MediaKind::Video, "video/avc")
                    .with_parameters(encoder.codec_parameters().into()),
            ));
        }

        if let Some((index, info)) = self.slots.next_ready() {
            return Ok(CodecPoll::Buffer { index, info });
        }
        if self.surface_closed {
            return Ok(CodecPoll::TryAgain);
        }

        // Pull every queued frame through the codec without blocking; the
        // caller owns the poll pacing.
        loop {
            match self.frames.try_recv() {
                Ok(frame) => {
                    self.encode_frame(frame)?;
                    if let Some((index, info)) = self.slots.next_ready() {
                        return Ok(CodecPoll::Buffer { index, info });
                    }
                }
                Err(TryRecvError::Disconnected) => {
                    self.surface_closed = true;
                    self.flush_and_finish()?;
                    return match self.slots.next_ready() {
                        Some((index, info)) => Ok(CodecPoll::Buffer { index, info }),
                        None => Ok(CodecPoll::TryAgain),
                    };
                }
                Err(TryRecvError::Empty) => return Ok(CodecPoll::TryAgain),
            }
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
        self.frame_pool = None;
        self.frames.close();
        self.state = CodecState::Released;
    }
}

/// Copy one NV12 plane row by row, honoring source stride and encoder
/// line size.
fn copy_plane(
    source: &[u8],
    stride: usize,
    encoder_line_size: usize,
    rows: usize,
    width: usize,
    destination: &mut [u8],
) {
    let copy_width = width.min(stride).min(encoder_line_size);
    let total = rows * encoder_line_size;

    if stride == encoder_line_size && source.len() >= total && destination.len() >= total {
        destination[..total].copy_from_slice(&source[..total]);
        return;
    }

    let src_end = source.len().saturating_sub(copy_width);
    let dst_end = destination.len().saturating_sub(copy_width);
    for r in 0..rows {
        let src_start = r * stride;
        let dst_start = r * encoder_line_size;
        if src_start > src_end || dst_start > dst_end {
            break;
        }
        destination[dst_start..dst_start + copy_width]
            .copy_from_slice(&source[src_start..src_start + copy_width]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_force_idr_handle_is_shared() {
        let (encoder, _surface) = FfmpegVideoEncoder::new(VideoEncodeConfig::default());
        let handle = encoder.force_idr_handle();
        handle.store(true, Ordering::Release);
        assert!(encoder.force_idr.load(Ordering::Acquire));
    }

    #[test]
    fn test_copy_plane_respects_stride() {
        // 4x2 plane, source stride 6, encoder line size 4
        let source = [1, 2, 3, 4, 0, 0, 5, 6, 7, 8, 0, 0];
        let mut dest = [0u8; 8];
        copy_plane(&source, 6, 4, 2, 4, &mut dest);
        assert_eq!(dest, [1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_copy_plane_matching_stride_fast_path() {
        let source = [9u8; 8];
        let mut dest = [0u8; 8];
        copy_plane(&source, 4, 4, 2, 4, &mut dest);
        assert_eq!(dest, [9u8; 8]);
    }
}
