use crate::capture::{AudioSource, CpalAudioSource, PatternSource};
use crate::config::{AudioEncodeConfig, SessionConfig, VideoEncodeConfig, app_name, version};
use crate::pipeline::{RecorderEvent, ScreenRecorder, SessionClock};
use anyhow::{Context, anyhow};
use clap::{Arg, ArgAction, Command};
use log::{error, info};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod capture;
pub mod config;
pub mod encoder;
pub mod error;
pub mod muxer;
pub mod pipeline;

fn session_from_args(matches: &clap::ArgMatches) -> anyhow::Result<SessionConfig> {
    if let Some(path) = matches.get_one::<String>("config") {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading session config {}", path))?;
        let session = serde_json::from_str(&raw)
            .with_context(|| format!("parsing session config {}", path))?;
        return Ok(session);
    }

    let mut video = VideoEncodeConfig::new(
        *matches.get_one::<u32>("width").unwrap(),
        *matches.get_one::<u32>("height").unwrap(),
        *matches.get_one::<u32>("bitrate").unwrap(),
        *matches.get_one::<u32>("fps").unwrap(),
    );
    video.iframe_interval = *matches.get_one::<u32>("keyframe-interval").unwrap();
    video.codec_name = matches.get_one::<String>("codec").cloned();

    let audio = matches
        .get_flag("audio")
        .then(AudioEncodeConfig::default);

    let output = matches
        .get_one::<String>("output")
        .map(Into::into)
        .unwrap_or_else(config::default_output_path);

    Ok(SessionConfig {
        video,
        audio,
        output,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let matches = Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("FILE")
                .help("Destination MP4 file. Defaults to a timestamped name."),
        )
        .arg(
            Arg::new("width")
                .long("width")
                .value_parser(clap::value_parser!(u32))
                .default_value("1280")
                .help("Video width in pixels."),
        )
        .arg(
            Arg::new("height")
                .long("height")
                .value_parser(clap::value_parser!(u32))
                .default_value("720")
                .help("Video height in pixels."),
        )
        .arg(
            Arg::new("bitrate")
                .short('b')
                .long("bitrate")
                .value_parser(clap::value_parser!(u32))
                .default_value("4000000")
                .help("Video bitrate in bits per second."),
        )
        .arg(
            Arg::new("fps")
                .long("fps")
                .value_parser(clap::value_parser!(u32))
                .default_value("30")
                .help("Capture frame rate."),
        )
        .arg(
            Arg::new("keyframe-interval")
                .long("keyframe-interval")
                .value_parser(clap::value_parser!(u32))
                .default_value("2")
                .help("Seconds between forced keyframes."),
        )
        .arg(
            Arg::new("codec")
                .long("codec")
                .value_name("NAME")
                .help("Force a specific video encoder, e.g. libx264."),
        )
        .arg(
            Arg::new("audio")
                .short('a')
                .long("audio")
                .action(ArgAction::SetTrue)
                .help("Also record the default microphone."),
        )
        .arg(
            Arg::new("duration")
                .short('d')
                .long("duration")
                .value_parser(clap::value_parser!(u64))
                .value_name("SECONDS")
                .help("Stop automatically after this many seconds."),
        )
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Load the whole session from a JSON file instead of flags."),
        )
        .get_matches();

    let session = session_from_args(&matches)?;
    info!("{}", session.video);
    if let Some(audio) = &session.audio {
        info!("{}", audio);
    }

    // gracefully stop the session on SIGINT, SIGTERM, or SIGHUP
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || cancel.cancel())
            .expect("Error setting Ctrl-C handler");
    }

    let clock = SessionClock::new();
    let source = PatternSource::new(session.video.clone(), clock);
    let device = session
        .audio
        .as_ref()
        .map(|config| Box::new(CpalAudioSource::new(config.clone())) as Box<dyn AudioSource>);
    let output = session.output.clone();

    let (mut recorder, mut events) =
        ScreenRecorder::new(session, Box::new(source), device, clock);
    recorder.start().map_err(|e| anyhow!(e))?;

    let deadline = matches
        .get_one::<u64>("duration")
        .map(|secs| tokio::time::Instant::now() + Duration::from_secs(*secs));

    let mut quit_sent = false;
    let mut last_report_us = 0i64;
    let result = loop {
        tokio::select! {
            _ = cancel.cancelled(), if !quit_sent => {
                info!("Stop requested");
                recorder.quit();
                quit_sent = true;
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(tokio::time::Instant::now)),
                if deadline.is_some() && !quit_sent =>
            {
                info!("Duration limit reached");
                recorder.quit();
                quit_sent = true;
            }
            event = events.recv() => match event {
                Some(RecorderEvent::Started) => {
                    info!("Recording to {}", output.display());
                }
                Some(RecorderEvent::Recording { pts_us }) => {
                    if pts_us - last_report_us >= 1_000_000 {
                        info!("Recording... {:.1}s", pts_us as f64 / 1_000_000.0);
                        last_report_us = pts_us;
                    }
                }
                Some(RecorderEvent::Stopped { error: Some(e) }) => {
                    error!("Recording failed: {}", e);
                    break Err(anyhow!(e));
                }
                Some(RecorderEvent::Stopped { error: None }) => break Ok(()),
                None => break Ok(()),
            }
        }
    };

    recorder.join().await;
    result
}
