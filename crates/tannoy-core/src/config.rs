//! Engine configuration.
//!
//! Loaded from built-in defaults, then an optional file, then `TANNOY_*`
//! environment variables.
//!
//! | Key | Env | Default | Description |
//! |-----|-----|---------|-------------|
//! | volume | TANNOY_VOLUME | 1.0 | Output gain for TTS, mic and background audio (0.0–1.0). |
//! | chime_enabled | TANNOY_CHIME_ENABLED | true | Play the chime before each announcement. |
//! | background_audio_enabled | TANNOY_BACKGROUND_AUDIO_ENABLED | false | Fill idle time with background audio. |
//! | grace_window_seconds | TANNOY_GRACE_WINDOW_SECONDS | 60 | How late a scheduled entry may still be queued. |
//! | queue_capacity | TANNOY_QUEUE_CAPACITY | 32 | Maximum pending requests. |
//! | tick_interval_ms | TANNOY_TICK_INTERVAL_MS | 1000 | Scheduler tick period. |
//! | poll_interval_ms | TANNOY_POLL_INTERVAL_MS | 20 | How often playback completion is checked. |
//! | background_chunk_ms | TANNOY_BACKGROUND_CHUNK_MS | 500 | Background preemption boundary. |

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Env var naming the config file (extension optional).
pub const CONFIG_PATH_ENV: &str = "TANNOY_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/tannoy";
pub const ENV_PREFIX: &str = "TANNOY";

fn default_volume() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

/// Upper bound on `grace_window_seconds`.
pub const MAX_GRACE_WINDOW_SECONDS: u64 = 365 * 24 * 60 * 60;

fn default_grace_window_seconds() -> u64 {
    60
}

fn default_queue_capacity() -> usize {
    32
}

fn default_tick_interval_ms() -> u64 {
    1000
}

fn default_poll_interval_ms() -> u64 {
    20
}

fn default_background_chunk_ms() -> u64 {
    500
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_volume")]
    pub volume: f32,
    #[serde(default = "default_true")]
    pub chime_enabled: bool,
    #[serde(default)]
    pub background_audio_enabled: bool,
    #[serde(default = "default_grace_window_seconds")]
    pub grace_window_seconds: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_background_chunk_ms")]
    pub background_chunk_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            volume: default_volume(),
            chime_enabled: true,
            background_audio_enabled: false,
            grace_window_seconds: default_grace_window_seconds(),
            queue_capacity: default_queue_capacity(),
            tick_interval_ms: default_tick_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            background_chunk_ms: default_background_chunk_ms(),
        }
    }
}

/// Build the layered source shared by every config section: the file named by
/// `TANNOY_CONFIG` (if it exists) overlaid with `TANNOY_*` env vars.
pub fn layered_source(path: Option<&Path>) -> EngineResult<config::Config> {
    let default_path =
        std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
    let path = path.unwrap_or_else(|| Path::new(&default_path));

    let built = config::Config::builder()
        .add_source(config::File::from(path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    Ok(built)
}

impl EngineConfig {
    /// Load from `TANNOY_CONFIG` (default `config/tannoy`) and the environment.
    pub fn load() -> EngineResult<Self> {
        Self::from_source(&layered_source(None)?)
    }

    /// Load from an explicit file plus the environment.
    pub fn load_from(path: &Path) -> EngineResult<Self> {
        Self::from_source(&layered_source(Some(path))?)
    }

    pub fn from_source(source: &config::Config) -> EngineResult<Self> {
        let config: EngineConfig = source.clone().try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        validate_volume(self.volume)?;
        if self.queue_capacity == 0 {
            return Err(EngineError::Config("queue_capacity must be at least 1".to_string()));
        }
        if self.grace_window_seconds > MAX_GRACE_WINDOW_SECONDS {
            return Err(EngineError::Config(format!(
                "grace_window_seconds must be at most {} (one year), got {}",
                MAX_GRACE_WINDOW_SECONDS, self.grace_window_seconds
            )));
        }
        if self.tick_interval_ms == 0 || self.poll_interval_ms == 0 || self.background_chunk_ms == 0 {
            return Err(EngineError::Config(
                "tick_interval_ms, poll_interval_ms and background_chunk_ms must be positive"
                    .to_string(),
            ));
        }
        Ok(())
    }

    pub fn grace_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.grace_window_seconds.min(MAX_GRACE_WINDOW_SECONDS) as i64)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn background_chunk(&self) -> Duration {
        Duration::from_millis(self.background_chunk_ms)
    }
}

pub fn validate_volume(volume: f32) -> EngineResult<f32> {
    if volume.is_nan() || !(0.0..=1.0).contains(&volume) {
        return Err(EngineError::InvalidVolume(volume));
    }
    Ok(volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.grace_window(), chrono::Duration::seconds(60));
        assert_eq!(config.queue_capacity, 32);
    }

    #[test]
    fn test_volume_out_of_range() {
        for bad in [-0.1_f32, 1.01, f32::NAN] {
            let config = EngineConfig {
                volume: bad,
                ..Default::default()
            };
            assert!(matches!(config.validate(), Err(EngineError::InvalidVolume(_))));
        }
        assert!(validate_volume(0.0).is_ok());
        assert!(validate_volume(1.0).is_ok());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = EngineConfig {
            queue_capacity: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
    }

    #[test]
    fn test_oversized_grace_window_rejected() {
        let config = EngineConfig {
            grace_window_seconds: 10_000_000_000_000_000,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
        assert_eq!(
            config.grace_window(),
            chrono::Duration::seconds(MAX_GRACE_WINDOW_SECONDS as i64)
        );

        let at_limit = EngineConfig {
            grace_window_seconds: MAX_GRACE_WINDOW_SECONDS,
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tannoy.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(file, "volume = 0.4").unwrap();
        writeln!(file, "chime_enabled = false").unwrap();
        writeln!(file, "grace_window_seconds = 120").unwrap();
        writeln!(file, "queue_capacity = 5").unwrap();
        writeln!(file, "[paths]\nlog = \"ignored-by-engine.jsonl\"").unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert!((config.volume - 0.4).abs() < f32::EPSILON);
        assert!(!config.chime_enabled);
        assert_eq!(config.grace_window_seconds, 120);
        assert_eq!(config.queue_capacity, 5);
        assert_eq!(config.poll_interval_ms, 20);
    }

    #[test]
    fn test_invalid_volume_in_file_fails_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tannoy.toml");
        std::fs::write(&path, "volume = 1.5\n").unwrap();
        assert!(matches!(
            EngineConfig::load_from(&path),
            Err(EngineError::InvalidVolume(_))
        ));
    }
}
