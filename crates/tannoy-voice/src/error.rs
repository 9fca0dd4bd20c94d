//! Error types for the tannoy hardware and TTS backends

use tannoy_core::EngineError;
use thiserror::Error;

/// Result type alias for voice operations
pub type VoiceResult<T> = Result<T, VoiceError>;

#[derive(Error, Debug)]
pub enum VoiceError {
    #[error("Audio device error: {0}")]
    AudioDevice(String),

    #[error("Audio stream error: {0}")]
    AudioStream(String),

    #[error("Audio playback error: {0}")]
    Playback(String),

    #[error("Audio decode error: {0}")]
    Decode(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("TTS error: {0}")]
    Tts(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<cpal::DevicesError> for VoiceError {
    fn from(err: cpal::DevicesError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::DefaultStreamConfigError> for VoiceError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        VoiceError::AudioDevice(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for VoiceError {
    fn from(err: cpal::BuildStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for VoiceError {
    fn from(err: cpal::PlayStreamError) -> Self {
        VoiceError::AudioStream(err.to_string())
    }
}

impl From<rodio::StreamError> for VoiceError {
    fn from(err: rodio::StreamError) -> Self {
        VoiceError::Playback(err.to_string())
    }
}

impl From<rodio::PlayError> for VoiceError {
    fn from(err: rodio::PlayError) -> Self {
        VoiceError::Playback(err.to_string())
    }
}

impl From<rodio::decoder::DecoderError> for VoiceError {
    fn from(err: rodio::decoder::DecoderError) -> Self {
        VoiceError::Decode(err.to_string())
    }
}

/// Engine-facing view: anything that stops text becoming audio is a render
/// failure, anything wrong with the output device makes the sink unavailable.
impl From<VoiceError> for EngineError {
    fn from(err: VoiceError) -> Self {
        match err {
            VoiceError::Tts(_) | VoiceError::Decode(_) => EngineError::Render(err.to_string()),
            VoiceError::AudioDevice(_) | VoiceError::AudioStream(_) | VoiceError::Playback(_) => {
                EngineError::SinkUnavailable(err.to_string())
            }
            VoiceError::Config(msg) => EngineError::Config(msg),
            VoiceError::Io(e) => EngineError::Io(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_mapping() {
        let render: EngineError = VoiceError::Tts("timeout".into()).into();
        assert!(matches!(render, EngineError::Render(_)));

        let sink: EngineError = VoiceError::Playback("no device".into()).into();
        assert!(matches!(sink, EngineError::SinkUnavailable(_)));
    }
}
