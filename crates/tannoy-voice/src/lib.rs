//! # tannoy-voice - hardware and network backends
//!
//! Plugs real devices into the `tannoy-core` engine:
//!
//! ```text
//! ┌─────────────┐  MicFeed   ┌──────────────┐   AudioSink   ┌─────────────┐
//! │ MicCapture  │──────────▶ │              │ ────────────▶ │  RodioSink  │
//! │   (cpal)    │            │ Orchestrator │               │  (rodio)    │
//! └─────────────┘            │ (tannoy-core)│               └─────────────┘
//! ┌─────────────┐ TtsEngine  │              │ ChimeProvider ┌─────────────┐
//! │   HttpTts   │──────────▶ │              │ ◀──────────── │  FileChime  │
//! │  (reqwest)  │            └──────────────┘               └─────────────┘
//! └─────────────┘
//! ```

pub mod background;
pub mod capture;
pub mod chime;
pub mod decode;
pub mod error;
pub mod output;
pub mod tts;

pub use background::playlist_from_files;
pub use capture::{CaptureConfig, MicCapture, MicSession};
pub use chime::FileChime;
pub use decode::{decode_bytes, decode_file};
pub use error::{VoiceError, VoiceResult};
pub use output::{list_output_devices, RodioSink};
pub use tts::{HttpTts, TtsConfig};
