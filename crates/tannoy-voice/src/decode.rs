//! Decoding encoded audio (WAV, MP3, ...) into engine clips.

use crate::error::{VoiceError, VoiceResult};
use rodio::{Decoder, Source};
use std::io::Cursor;
use std::path::Path;
use tannoy_core::AudioClip;

/// Decode an in-memory file into interleaved f32 samples.
pub fn decode_bytes(bytes: Vec<u8>) -> VoiceResult<AudioClip> {
    if bytes.is_empty() {
        return Err(VoiceError::Decode("no audio data".to_string()));
    }
    let decoder = Decoder::new(Cursor::new(bytes))?;
    let channels = decoder.channels();
    let sample_rate = decoder.sample_rate();
    let samples: Vec<f32> = decoder.convert_samples::<f32>().collect();
    Ok(AudioClip::new(samples, sample_rate, channels))
}

pub fn decode_file(path: &Path) -> VoiceResult<AudioClip> {
    let bytes = std::fs::read(path)?;
    decode_bytes(bytes).map_err(|e| VoiceError::Decode(format!("{}: {}", path.display(), e)))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// 16-bit PCM WAV bytes for `samples`.
    pub(crate) fn wav_bytes(samples: &[f32], sample_rate: u32, channels: u16) -> Vec<u8> {
        let data_len = (samples.len() * 2) as u32;
        let block_align = channels * 2;
        let mut buf = Vec::with_capacity(44 + data_len as usize);
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&(36 + data_len).to_le_bytes());
        buf.extend_from_slice(b"WAVE");
        buf.extend_from_slice(b"fmt ");
        buf.extend_from_slice(&16u32.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&sample_rate.to_le_bytes());
        buf.extend_from_slice(&(sample_rate * block_align as u32).to_le_bytes());
        buf.extend_from_slice(&block_align.to_le_bytes());
        buf.extend_from_slice(&16u16.to_le_bytes());
        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&data_len.to_le_bytes());
        for &s in samples {
            let pcm = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
            buf.extend_from_slice(&pcm.to_le_bytes());
        }
        buf
    }

    #[test]
    fn test_decode_wav() {
        let bytes = wav_bytes(&[0.0, 0.5, -0.5, 0.25], 22050, 2);
        let clip = decode_bytes(bytes).unwrap();
        assert_eq!(clip.sample_rate(), 22050);
        assert_eq!(clip.channels(), 2);
        assert_eq!(clip.frames(), 2);
        assert!((clip.samples()[1] - 0.5).abs() < 1e-3);
    }

    #[test]
    fn test_decode_rejects_empty_input() {
        assert!(matches!(decode_bytes(Vec::new()), Err(VoiceError::Decode(_))));
    }

    #[test]
    fn test_decode_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.wav");
        std::fs::write(&path, b"RIFF????").unwrap();
        let err = decode_file(&path).unwrap_err().to_string();
        assert!(err.contains("broken.wav"));
    }
}
