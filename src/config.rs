//! Encode configuration values.
//!
//! Immutable descriptions of the codecs a session should run. They are
//! created by the caller before the pipeline starts, validated upstream
//! against device capabilities, and owned by the encoder they configure.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Configuration for the H.264 video encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoEncodeConfig {
    pub width: u32,
    pub height: u32,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    pub frame_rate: u32,
    /// Keyframe interval in seconds.
    pub iframe_interval: u32,
    /// Force a specific encoder (e.g. "libx264"). When absent the
    /// hardware-first fallback chain picks one.
    #[serde(default)]
    pub codec_name: Option<String>,
    /// Optional H.264 profile, e.g. "main" or "high".
    #[serde(default)]
    pub profile: Option<String>,
    /// Optional H.264 level, e.g. "4.1".
    #[serde(default)]
    pub level: Option<String>,
}

impl VideoEncodeConfig {
    pub fn new(width: u32, height: u32, bitrate: u32, frame_rate: u32) -> Self {
        Self {
            width,
            height,
            bitrate,
            frame_rate,
            iframe_interval: 2,
            codec_name: None,
            profile: None,
            level: None,
        }
    }

    /// GOP size in frames, derived from the keyframe interval.
    pub fn gop_size(&self) -> u32 {
        (self.frame_rate * self.iframe_interval).max(1)
    }

    /// Frame period in microseconds.
    pub fn frame_period_us(&self) -> i64 {
        1_000_000 / self.frame_rate.max(1) as i64
    }
}

impl Default for VideoEncodeConfig {
    fn default() -> Self {
        Self::new(1280, 720, 4_000_000, 30)
    }
}

impl fmt::Display for VideoEncodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "VideoEncodeConfig{{{}x{}, bitrate={}, framerate={}, iframeInterval={}, codec={}}}",
            self.width,
            self.height,
            self.bitrate,
            self.frame_rate,
            self.iframe_interval,
            self.codec_name.as_deref().unwrap_or("auto"),
        )
    }
}

/// Configuration for the AAC audio encoder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioEncodeConfig {
    /// Force a specific encoder. Defaults to the native AAC encoder when
    /// absent.
    #[serde(default)]
    pub codec_name: Option<String>,
    /// Target bitrate in bits per second.
    pub bitrate: u32,
    pub sample_rate: u32,
    pub channels: u16,
    /// Optional AAC profile, e.g. "aac_low".
    #[serde(default)]
    pub profile: Option<String>,
}

impl Default for AudioEncodeConfig {
    fn default() -> Self {
        Self {
            codec_name: None,
            bitrate: 80_000,
            sample_rate: 44_100,
            channels: 1,
            profile: None,
        }
    }
}

impl fmt::Display for AudioEncodeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AudioEncodeConfig{{codec={}, bitrate={}, sampleRate={}, channels={}}}",
            self.codec_name.as_deref().unwrap_or("aac"),
            self.bitrate,
            self.sample_rate,
            self.channels,
        )
    }
}

/// Everything a recording session needs up front: the finished encoder
/// configurations and the destination path.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub video: VideoEncodeConfig,
    #[serde(default)]
    pub audio: Option<AudioEncodeConfig>,
    #[serde(default = "default_output_path")]
    pub output: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            video: VideoEncodeConfig::default(),
            audio: None,
            output: default_output_path(),
        }
    }
}

/// Timestamped destination in the current directory, e.g.
/// `recording-20260825-153012.mp4`.
pub fn default_output_path() -> PathBuf {
    PathBuf::from(format!(
        "recording-{}.mp4",
        chrono::Local::now().format("%Y%m%d-%H%M%S")
    ))
}

/// Returns a version as specified in Cargo.toml
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gop_size_from_interval() {
        let config = VideoEncodeConfig::new(1280, 720, 4_000_000, 30);
        assert_eq!(config.gop_size(), 60);
        assert_eq!(config.frame_period_us(), 33_333);
    }

    #[test]
    fn test_session_config_from_json() {
        let json = r#"{
            "video": {"width": 1920, "height": 1080, "bitrate": 8000000,
                      "frame_rate": 60, "iframe_interval": 1},
            "audio": {"bitrate": 128000, "sample_rate": 48000, "channels": 2},
            "output": "out.mp4"
        }"#;
        let session: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(session.video.width, 1920);
        assert_eq!(session.video.codec_name, None);
        let audio = session.audio.unwrap();
        assert_eq!(audio.sample_rate, 48_000);
        assert_eq!(audio.channels, 2);
    }
}
