//! Background playlist built from audio files on disk.

use crate::decode::decode_file;
use std::path::PathBuf;
use tannoy_core::Playlist;
use tracing::{info, warn};

/// Decode every readable file into a looping playlist. Files that fail to
/// decode are left out.
pub fn playlist_from_files(paths: &[PathBuf]) -> Playlist {
    let tracks: Vec<_> = paths
        .iter()
        .filter_map(|path| match decode_file(path) {
            Ok(clip) => Some(clip),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "skipping background track");
                None
            }
        })
        .collect();
    let playlist = Playlist::new(tracks);
    info!(tracks = playlist.len(), "background playlist loaded");
    playlist
}
