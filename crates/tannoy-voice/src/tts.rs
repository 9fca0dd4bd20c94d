//! OpenAI-compatible text-to-speech (`POST {base_url}/audio/speech`).

use crate::decode::decode_bytes;
use crate::error::{VoiceError, VoiceResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tannoy_core::{AudioClip, EngineResult, TtsEngine};
use tracing::debug;

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "tts-1".to_string()
}

fn default_voice() -> String {
    "alloy".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_timeout_secs() -> u64 {
    60
}

/// `[tts]` section of the daemon config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TtsConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Bearer API key. Without one no HTTP engine is built.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_voice")]
    pub voice: String,
    /// Speaking rate multiplier (0.25..=4.0).
    #[serde(default = "default_speed")]
    pub speed: f32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            voice: default_voice(),
            speed: default_speed(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Production TTS backend. Requests WAV so the response decodes without an
/// MP3 round trip.
#[derive(Debug, Clone)]
pub struct HttpTts {
    base_url: String,
    api_key: String,
    model: String,
    voice: String,
    speed: f32,
    /// HTTP client (blocking); the engine calls `synthesize` on the blocking pool.
    client: reqwest::blocking::Client,
}

impl HttpTts {
    /// Builds a blocking HTTP client, so call it off the async runtime
    /// (e.g. inside `spawn_blocking`).
    pub fn new(config: &TtsConfig) -> VoiceResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| VoiceError::Config("TTS requires tts.api_key (TANNOY_TTS__API_KEY)".to_string()))?;
        if !(0.25..=4.0).contains(&config.speed) {
            return Err(VoiceError::Config(format!(
                "tts.speed {} must be within 0.25..=4.0",
                config.speed
            )));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: config.model.clone(),
            voice: config.voice.clone(),
            speed: config.speed,
            client,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/audio/speech", self.base_url)
    }

    fn fetch(&self, text: &str) -> VoiceResult<Vec<u8>> {
        let text = text.trim();
        if text.is_empty() {
            return Err(VoiceError::Tts("nothing to say".to_string()));
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
            "voice": self.voice,
            "speed": self.speed,
            "response_format": "wav",
        });
        let res = self
            .client
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .map_err(|e| VoiceError::Tts(e.to_string()))?;
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().unwrap_or_default();
            return Err(VoiceError::Tts(format!("TTS API error {}: {}", status, body)));
        }
        let bytes = res.bytes().map_err(|e| VoiceError::Tts(e.to_string()))?;
        debug!(bytes = bytes.len(), "TTS audio received");
        Ok(bytes.to_vec())
    }
}

impl TtsEngine for HttpTts {
    fn synthesize(&self, text: &str) -> EngineResult<AudioClip> {
        let bytes = self.fetch(text)?;
        Ok(decode_bytes(bytes)?)
    }
}
