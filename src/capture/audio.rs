//! Microphone capture
//!
//! cpal needs a dedicated thread; captured samples cross to the pump
//! through a bounded synchronous channel as interleaved s16le bytes.

use crate::capture::AudioSource;
use crate::config::AudioEncodeConfig;
use crate::error::RecorderError;
use cpal::SampleFormat;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use log::{error, info, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, SyncSender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Batches buffered between the cpal callback and the pump.
const BRIDGE_DEPTH: usize = 256;

fn convert_i16(samples: &[i16], out: &mut Vec<u8>) {
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
}

fn convert_f32(samples: &[f32], out: &mut Vec<u8>) {
    for s in samples {
        let clamped = (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
        out.extend_from_slice(&clamped.to_le_bytes());
    }
}

/// Default input device exposed through the pull-style [`AudioSource`]
/// interface.
pub struct CpalAudioSource {
    config: AudioEncodeConfig,
    samples: Option<Receiver<Vec<u8>>>,
    /// Bytes left over from a batch larger than the caller's buffer.
    leftover: Vec<u8>,
    stop_flag: Arc<AtomicBool>,
    stopped: bool,
    thread: Option<JoinHandle<()>>,
}

impl CpalAudioSource {
    pub fn new(config: AudioEncodeConfig) -> Self {
        Self {
            config,
            samples: None,
            leftover: Vec::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            stopped: false,
            thread: None,
        }
    }

    fn run_capture(
        sender: SyncSender<Vec<u8>>,
        ready: SyncSender<Result<(), String>>,
        stop_flag: Arc<AtomicBool>,
    ) {
        let host = cpal::default_host();
        let Some(device) = host.default_input_device() else {
            let _ = ready.send(Err("no default input device found".into()));
            return;
        };
        let config = match device.default_input_config() {
            Ok(config) => config,
            Err(e) => {
                let _ = ready.send(Err(format!("failed to get input config: {}", e)));
                return;
            }
        };
        info!("Audio capture config: {:?}", config);

        let err_fn = |err| error!("Audio stream error: {}", err);
        let tx_i16 = sender.clone();
        let tx_f32 = sender;

        let stream = match config.sample_format() {
            SampleFormat::I16 => device.build_input_stream(
                &config.into(),
                move |data: &[i16], _: &_| {
                    let mut out = Vec::with_capacity(data.len() * 2);
                    convert_i16(data, &mut out);
                    if tx_i16.try_send(out).is_err() {
                        warn!("Audio bridge full, dropping a batch");
                    }
                },
                err_fn,
                None,
            ),
            SampleFormat::F32 => device.build_input_stream(
                &config.into(),
                move |data: &[f32], _: &_| {
                    let mut out = Vec::with_capacity(data.len() * 2);
                    convert_f32(data, &mut out);
                    if tx_f32.try_send(out).is_err() {
                        warn!("Audio bridge full, dropping a batch");
                    }
                },
                err_fn,
                None,
            ),
            other => {
                let _ = ready.send(Err(format!("unsupported sample format {:?}", other)));
                return;
            }
        };

        let stream = match stream {
            Ok(stream) => stream,
            Err(e) => {
                let _ = ready.send(Err(format!("failed to open input stream: {}", e)));
                return;
            }
        };
        if let Err(e) = stream.play() {
            let _ = ready.send(Err(format!("failed to start input stream: {}", e)));
            return;
        }

        let _ = ready.send(Ok(()));
        info!("Audio capture started");

        while !stop_flag.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(10));
        }

        drop(stream);
        info!("Audio capture stopped");
    }
}

impl AudioSource for CpalAudioSource {
    fn start(&mut self) -> Result<(), RecorderError> {
        if self.thread.is_some() {
            return Err(RecorderError::Lifecycle("audio capture already started".into()));
        }

        let (sync_tx, sync_rx) = std::sync::mpsc::sync_channel::<Vec<u8>>(BRIDGE_DEPTH);
        let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel::<Result<(), String>>(1);
        let stop_flag = self.stop_flag.clone();

        // cpal requires a dedicated thread
        let handle = thread::spawn(move || {
            CpalAudioSource::run_capture(sync_tx, ready_tx, stop_flag);
        });

        match ready_rx.recv_timeout(Duration::from_secs(5)) {
            Ok(Ok(())) => {
                self.samples = Some(sync_rx);
                self.thread = Some(handle);
                Ok(())
            }
            Ok(Err(reason)) => {
                let _ = handle.join();
                Err(RecorderError::DeviceUnavailable(reason))
            }
            Err(_) => {
                self.stop_flag.store(true, Ordering::Release);
                Err(RecorderError::DeviceUnavailable(
                    "audio device did not come up in time".into(),
                ))
            }
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, RecorderError> {
        let mut written = 0;

        if !self.leftover.is_empty() {
            let n = self.leftover.len().min(buf.len());
            buf[..n].copy_from_slice(&self.leftover[..n]);
            self.leftover.drain(..n);
            written = n;
        }

        let Some(samples) = self.samples.as_ref() else {
            return Ok(written);
        };
        while written < buf.len() {
            match samples.try_recv() {
                Ok(batch) => {
                    let n = batch.len().min(buf.len() - written);
                    buf[written..written + n].copy_from_slice(&batch[..n]);
                    self.leftover.extend_from_slice(&batch[n..]);
                    written += n;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    if written == 0 && !self.stopped {
                        return Err(RecorderError::DeviceUnavailable(
                            "audio capture thread exited".into(),
                        ));
                    }
                    break;
                }
            }
        }
        Ok(written)
    }

    fn is_stopped(&self) -> bool {
        self.stopped
    }

    fn stop(&mut self) {
        self.stopped = true;
        self.stop_flag.store(true, Ordering::Release);
    }

    fn release(&mut self) {
        self.stop();
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        self.samples = None;
        self.leftover.clear();
    }
}

impl std::fmt::Debug for CpalAudioSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalAudioSource")
            .field("sample_rate", &self.config.sample_rate)
            .field("channels", &self.config.channels)
            .field("stopped", &self.stopped)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_f32_conversion_clamps() {
        let mut out = Vec::new();
        convert_f32(&[0.0, 1.0, -1.0, 2.0], &mut out);
        assert_eq!(out.len(), 8);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), 0);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), i16::MAX);
        // 2.0 clamps to full scale
        assert_eq!(out[6..8], out[2..4]);
    }

    #[test]
    fn test_i16_passthrough() {
        let mut out = Vec::new();
        convert_i16(&[-2, 513], &mut out);
        assert_eq!(i16::from_le_bytes([out[0], out[1]]), -2);
        assert_eq!(i16::from_le_bytes([out[2], out[3]]), 513);
    }
}
