//! Daemon-only configuration sections (`[paths]`, `[tts]`, `[mic]`), read from
//! the same layered source as the engine settings.

use serde::Deserialize;
use std::path::PathBuf;
use tannoy_voice::{CaptureConfig, TtsConfig};

fn default_chime() -> PathBuf {
    PathBuf::from("chime.wav")
}

fn default_schedule() -> PathBuf {
    PathBuf::from("data/schedules.json")
}

fn default_log() -> PathBuf {
    PathBuf::from("data/announcements.jsonl")
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_chime")]
    pub chime: PathBuf,
    #[serde(default = "default_schedule")]
    pub schedule: PathBuf,
    #[serde(default = "default_log")]
    pub log: PathBuf,
    /// Background tracks, played in order and looped.
    #[serde(default)]
    pub background: Vec<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            chime: default_chime(),
            schedule: default_schedule(),
            log: default_log(),
            background: Vec::new(),
        }
    }
}

fn default_sample_rate() -> u32 {
    44100
}

fn default_chunk_frames() -> usize {
    1024
}

#[derive(Debug, Clone, Deserialize)]
pub struct MicConfig {
    /// Input device name as listed by the `devices` console command.
    #[serde(default)]
    pub device: Option<String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_chunk_frames")]
    pub chunk_frames: usize,
}

impl Default for MicConfig {
    fn default() -> Self {
        Self {
            device: None,
            sample_rate: default_sample_rate(),
            chunk_frames: default_chunk_frames(),
        }
    }
}

impl From<MicConfig> for CaptureConfig {
    fn from(mic: MicConfig) -> Self {
        CaptureConfig {
            device: mic.device,
            sample_rate: mic.sample_rate,
            channels: 1,
            chunk_frames: mic.chunk_frames,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub tts: TtsConfig,
    #[serde(default)]
    pub mic: MicConfig,
}

impl DaemonConfig {
    pub fn from_source(source: &config::Config) -> anyhow::Result<Self> {
        Ok(source.clone().try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tannoy_core::config::layered_source;
    use tannoy_core::EngineConfig;

    #[test]
    fn shared_file_feeds_engine_and_daemon_sections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tannoy.toml");
        std::fs::write(
            &path,
            r#"
volume = 0.7
chime_enabled = false

[paths]
chime = "sounds/ding.wav"
background = ["music/a.mp3", "music/b.mp3"]

[tts]
api_key = "secret"
voice = "nova"

[mic]
device = "USB Audio Device"
"#,
        )
        .unwrap();

        let source = layered_source(Some(&path)).unwrap();
        let engine = EngineConfig::from_source(&source).unwrap();
        let daemon = DaemonConfig::from_source(&source).unwrap();

        assert_eq!(engine.volume, 0.7);
        assert!(!engine.chime_enabled);
        assert_eq!(daemon.paths.chime, PathBuf::from("sounds/ding.wav"));
        assert_eq!(daemon.paths.background.len(), 2);
        assert_eq!(daemon.paths.schedule, default_schedule());
        assert_eq!(daemon.tts.api_key.as_deref(), Some("secret"));
        assert_eq!(daemon.tts.voice, "nova");
        assert_eq!(daemon.mic.chunk_frames, 1024);
        let capture = CaptureConfig::from(daemon.mic);
        assert_eq!(capture.device.as_deref(), Some("USB Audio Device"));
        assert_eq!(capture.sample_rate, 44100);
    }
}
