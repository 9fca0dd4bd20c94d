//! Live microphone capture using CPAL.
//!
//! A capture session pushes fixed-size chunks into a [`MicFeed`]. Releasing the
//! session drops the feed, which ends the live announcement.

use crate::error::{VoiceError, VoiceResult};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::StreamConfig;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use tannoy_core::{AudioClip, MicFeed};
use tracing::{debug, info, warn};

/// Capture configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    /// Input device name; the host default when unset
    pub device: Option<String>,

    /// Sample rate in Hz (default: 44100)
    pub sample_rate: u32,

    /// Number of channels (default: 1 for mono)
    pub channels: u16,

    /// Frames per chunk handed to the engine (default: 1024)
    pub chunk_frames: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: 44100,
            channels: 1,
            chunk_frames: 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MicCapture {
    config: CaptureConfig,
}

impl MicCapture {
    pub fn new(config: CaptureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    /// Start capturing from the configured input device into `feed`.
    ///
    /// The CPAL stream is `!Send` on some platforms, so it is built and held on
    /// a dedicated thread.
    pub fn start(&self, feed: MicFeed) -> VoiceResult<MicSession> {
        let config = self.config.clone();
        let (sample_rate, channels) = (config.sample_rate, config.channels);
        let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<()>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("tannoy-mic".to_string())
            .spawn(move || {
                let stream = match build_stream(config, feed) {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if ready_tx.send(Ok(())).is_err() {
                    return;
                }
                // Held until the session is released
                let _ = stop_rx.recv();
                drop(stream);
                debug!("mic capture thread exiting");
            })?;

        ready_rx
            .recv()
            .map_err(|_| VoiceError::AudioStream("mic thread exited during startup".to_string()))??;
        info!(sample_rate, channels, "mic capture started");

        Ok(MicSession {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// List available input devices
    pub fn list_input_devices() -> VoiceResult<Vec<String>> {
        let devices = cpal::default_host().input_devices()?;
        Ok(devices.filter_map(|d| d.name().ok()).collect())
    }
}

/// Device names compare case-insensitively, ignoring surrounding whitespace.
fn is_named(device_name: &str, wanted: &str) -> bool {
    device_name.trim().eq_ignore_ascii_case(wanted.trim())
}

fn input_device(wanted: Option<&str>) -> VoiceResult<cpal::Device> {
    let host = cpal::default_host();
    match wanted {
        None => host
            .default_input_device()
            .ok_or_else(|| VoiceError::AudioDevice("No input device available".to_string())),
        Some(wanted) => host
            .input_devices()?
            .find(|d| d.name().is_ok_and(|name| is_named(&name, wanted)))
            .ok_or_else(|| VoiceError::AudioDevice(format!("Input device {:?} not found", wanted))),
    }
}

fn build_stream(config: CaptureConfig, feed: MicFeed) -> VoiceResult<cpal::Stream> {
    let device = input_device(config.device.as_deref())?;
    let native = device.default_input_config()?;
    info!(
        device = %device.name().unwrap_or_else(|_| "Unknown".to_string()),
        native_rate = native.sample_rate().0,
        native_channels = native.channels(),
        "using input device"
    );

    let stream_config = StreamConfig {
        channels: config.channels,
        sample_rate: cpal::SampleRate(config.sample_rate),
        buffer_size: cpal::BufferSize::Default,
    };
    let (rate, channels) = (config.sample_rate, config.channels);
    let chunk_len = config.chunk_frames.max(1) * channels as usize;
    let mut pending = Vec::with_capacity(chunk_len);
    let error_feed = feed.clone();

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if feed.is_closed() {
                return;
            }
            for &sample in data {
                pending.push(sample);
                if pending.len() >= chunk_len {
                    let chunk = AudioClip::new(std::mem::take(&mut pending), rate, channels);
                    pending.reserve(chunk_len);
                    if !feed.push(chunk) {
                        // Engine no longer listening; the session will be released
                        return;
                    }
                }
            }
        },
        move |err| {
            warn!(error = %err, "mic stream error");
            error_feed.fail(err.to_string());
        },
        None,
    )?;
    stream.play()?;
    Ok(stream)
}

/// A running capture. Dropping or releasing it ends the live announcement.
#[derive(Debug)]
pub struct MicSession {
    stop: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicSession {
    /// Stop capturing and wait for the device to close.
    pub fn release(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("mic capture thread panicked");
            }
        }
    }
}

impl Drop for MicSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}
