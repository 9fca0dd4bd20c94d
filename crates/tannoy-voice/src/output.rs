//! **RodioSink**: the physical speaker behind the engine's [`AudioSink`].
//!
//! `rodio::OutputStream` is `!Send`, so it lives on a dedicated thread for as
//! long as the sink exists. Clips are appended to a `rodio::Sink`; `stop()`
//! throws the sink away and opens a fresh one so playback can continue later.

use crate::error::{VoiceError, VoiceResult};
use rodio::buffer::SamplesBuffer;
use rodio::{OutputStream, OutputStreamHandle, Sink};
use std::sync::mpsc;
use std::sync::Mutex;
use std::thread;
use tannoy_core::{AudioClip, AudioSink, EngineResult};
use tracing::{info, warn};

pub struct RodioSink {
    handle: OutputStreamHandle,
    sink: Mutex<Sink>,
    /// Dropping this ends the thread holding the output stream.
    _keepalive: mpsc::Sender<()>,
}

impl RodioSink {
    /// Open the default output device.
    pub fn open_default() -> VoiceResult<Self> {
        let (ready_tx, ready_rx) = mpsc::channel::<VoiceResult<OutputStreamHandle>>();
        let (keepalive_tx, keepalive_rx) = mpsc::channel::<()>();

        thread::Builder::new()
            .name("tannoy-output".to_string())
            .spawn(move || match OutputStream::try_default() {
                Ok((stream, handle)) => {
                    if ready_tx.send(Ok(handle)).is_err() {
                        return;
                    }
                    // Blocks until the RodioSink is dropped
                    let _ = keepalive_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e.into()));
                }
            })?;

        let handle = ready_rx
            .recv()
            .map_err(|_| VoiceError::Playback("output thread exited during startup".to_string()))??;
        let sink = Sink::try_new(&handle)?;
        info!("RodioSink: default output device ready");

        Ok(Self {
            handle,
            sink: Mutex::new(sink),
            _keepalive: keepalive_tx,
        })
    }
}

impl AudioSink for RodioSink {
    fn play(&self, clip: &AudioClip) -> EngineResult<()> {
        if clip.is_empty() {
            return Ok(());
        }
        let source = SamplesBuffer::new(clip.channels(), clip.sample_rate(), clip.samples().to_vec());
        let sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        sink.append(source);
        sink.play();
        Ok(())
    }

    fn stop(&self) {
        let mut sink = self.sink.lock().unwrap_or_else(|e| e.into_inner());
        sink.stop();
        match Sink::try_new(&self.handle) {
            Ok(fresh) => *sink = fresh,
            Err(e) => warn!(error = %e, "RodioSink: could not reopen sink after stop"),
        }
    }

    fn is_playing(&self) -> bool {
        !self.sink.lock().unwrap_or_else(|e| e.into_inner()).empty()
    }
}

impl std::fmt::Debug for RodioSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RodioSink")
            .field("playing", &self.is_playing())
            .finish()
    }
}

/// Output device names, for diagnostics.
pub fn list_output_devices() -> VoiceResult<Vec<String>> {
    use cpal::traits::{DeviceTrait, HostTrait};
    let devices = cpal::default_host().output_devices()?;
    Ok(devices.filter_map(|d| d.name().ok()).collect())
}
