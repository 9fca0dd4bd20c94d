//! Chime loaded from an audio file.

use crate::decode::decode_file;
use std::path::{Path, PathBuf};
use tannoy_core::{AudioClip, ChimeProvider};
use tracing::{info, warn};

/// Decoded once at startup. A missing or unreadable file means no chime.
#[derive(Debug, Clone)]
pub struct FileChime {
    path: PathBuf,
    clip: Option<AudioClip>,
}

impl FileChime {
    pub fn load<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        let clip = if !path.exists() {
            warn!(path = %path.display(), "chime file not found; announcements will play without a chime");
            None
        } else {
            match decode_file(&path) {
                Ok(clip) if clip.is_empty() => {
                    warn!(path = %path.display(), "chime file is empty");
                    None
                }
                Ok(clip) => {
                    info!(path = %path.display(), secs = clip.duration().as_secs_f32(), "chime loaded");
                    Some(clip)
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "could not decode chime file");
                    None
                }
            }
        };
        Self { path, clip }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_loaded(&self) -> bool {
        self.clip.is_some()
    }
}

impl ChimeProvider for FileChime {
    fn get_chime(&self) -> Option<AudioClip> {
        self.clip.clone()
    }
}
