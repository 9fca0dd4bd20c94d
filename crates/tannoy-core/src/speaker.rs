//! Turns request payloads into playable audio.
//!
//! Text goes through a [`TtsEngine`] on the blocking pool so slow engines never
//! stall the async runtime. Mic audio is passed through frame by frame by the
//! orchestrator; the speaker only scales it.

use crate::audio::AudioClip;
use crate::error::{EngineError, EngineResult};
use std::sync::Arc;

/// Backend that turns text into decoded audio.
pub trait TtsEngine: Send + Sync {
    fn synthesize(&self, text: &str) -> EngineResult<AudioClip>;
}

/// TTS engine that is never available. Every render fails.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableTts;

impl TtsEngine for UnavailableTts {
    fn synthesize(&self, _text: &str) -> EngineResult<AudioClip> {
        Err(EngineError::Render("no TTS engine configured".to_string()))
    }
}

#[derive(Clone)]
pub struct Speaker {
    tts: Arc<dyn TtsEngine>,
}

impl Speaker {
    pub fn new(tts: Arc<dyn TtsEngine>) -> Self {
        Self { tts }
    }

    /// Render `text`, mapping every engine failure to [`EngineError::Render`].
    pub async fn render(&self, text: &str) -> EngineResult<AudioClip> {
        let tts = Arc::clone(&self.tts);
        let text = text.to_string();
        let clip = tokio::task::spawn_blocking(move || tts.synthesize(&text))
            .await
            .map_err(|e| EngineError::Render(format!("TTS task aborted: {}", e)))?
            .map_err(|e| match e {
                EngineError::Render(msg) => EngineError::Render(msg),
                other => EngineError::Render(other.to_string()),
            })?;
        if clip.is_empty() {
            return Err(EngineError::Render("TTS produced no audio".to_string()));
        }
        Ok(clip)
    }

    /// Apply the cycle volume to a captured mic frame.
    pub fn pass_through(&self, frame: &AudioClip, volume: f32) -> AudioClip {
        frame.with_volume(volume)
    }
}

impl std::fmt::Debug for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Speaker").finish_non_exhaustive()
    }
}
