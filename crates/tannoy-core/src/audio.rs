//! Playable audio and the output-side collaborator traits.
//!
//! The engine only ever sees decoded PCM (`f32`, interleaved, -1.0..=1.0).
//! Devices, files and codecs live behind [`AudioSink`], [`ChimeProvider`] and
//! [`BackgroundSource`].

use crate::error::EngineResult;
use std::sync::Arc;
use std::time::Duration;

/// Decoded, interleaved PCM audio.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    samples: Arc<[f32]>,
    sample_rate: u32,
    channels: u16,
}

impl AudioClip {
    pub fn new(samples: impl Into<Arc<[f32]>>, sample_rate: u32, channels: u16) -> Self {
        Self {
            samples: samples.into(),
            sample_rate: sample_rate.max(1),
            channels: channels.max(1),
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate))
    }

    /// Scale every sample by `volume`, clipping to the valid range.
    pub fn with_volume(&self, volume: f32) -> AudioClip {
        if (volume - 1.0).abs() < f32::EPSILON {
            return self.clone();
        }
        let scaled: Vec<f32> = self
            .samples
            .iter()
            .map(|s| (s * volume).clamp(-1.0, 1.0))
            .collect();
        AudioClip::new(scaled, self.sample_rate, self.channels)
    }

    /// Number of whole frames that fit in `duration` (at least one).
    pub fn frames_for(&self, duration: Duration) -> usize {
        ((duration.as_secs_f64() * f64::from(self.sample_rate)) as usize).max(1)
    }

    /// Frame range `[start, start + len)`, truncated to the clip.
    pub fn slice_frames(&self, start: usize, len: usize) -> AudioClip {
        let ch = self.channels as usize;
        let begin = (start * ch).min(self.samples.len());
        let end = ((start + len) * ch).min(self.samples.len());
        AudioClip::new(&self.samples[begin..end], self.sample_rate, self.channels)
    }
}

/// The single physical output device. Only the orchestrator drives it.
pub trait AudioSink: Send + Sync {
    /// Queue `clip` for playback and return immediately.
    fn play(&self, clip: &AudioClip) -> EngineResult<()>;

    /// Halt playback now and drop anything queued.
    fn stop(&self);

    /// Whether queued audio is still playing.
    fn is_playing(&self) -> bool;
}

/// Supplies the cue played before announcement content.
pub trait ChimeProvider: Send + Sync {
    fn get_chime(&self) -> Option<AudioClip>;
}

/// No chime configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoChime;

impl ChimeProvider for NoChime {
    fn get_chime(&self) -> Option<AudioClip> {
        None
    }
}

/// A chime held in memory.
#[derive(Debug, Clone)]
pub struct StaticChime(pub AudioClip);

impl ChimeProvider for StaticChime {
    fn get_chime(&self) -> Option<AudioClip> {
        Some(self.0.clone())
    }
}

/// Low-priority audio played while the queue is idle.
pub trait BackgroundSource: Send {
    /// The next track to play, or `None` when nothing is available.
    fn next_track(&mut self) -> Option<AudioClip>;
}

/// Tracks played in order, looping forever.
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    tracks: Vec<AudioClip>,
    cursor: usize,
}

impl Playlist {
    pub fn new(tracks: Vec<AudioClip>) -> Self {
        let tracks = tracks.into_iter().filter(|t| !t.is_empty()).collect();
        Self { tracks, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}

impl BackgroundSource for Playlist {
    fn next_track(&mut self) -> Option<AudioClip> {
        if self.tracks.is_empty() {
            return None;
        }
        let track = self.tracks[self.cursor % self.tracks.len()].clone();
        self.cursor = (self.cursor + 1) % self.tracks.len();
        Some(track)
    }
}
