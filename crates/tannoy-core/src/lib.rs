//! tannoy-core: announcement engine for a single shared speaker.
//!
//! Producers (operator console, live mic, scheduler) put requests in one
//! bounded priority queue; a single orchestrator task drains it, plays a chime
//! and the content, and records how each request ended.
//!
//! Hardware and network backends (sound card, TTS service) live in
//! `tannoy-voice` and plug in through the traits in [`audio`] and [`speaker`].

pub mod audio;
pub mod clock;
pub mod config;
pub mod error;
mod handle;
pub mod log;
pub mod model;
pub mod orchestrator;
pub mod queue;
pub mod schedule;
pub mod speaker;

pub use audio::{AudioClip, AudioSink, BackgroundSource, ChimeProvider, NoChime, Playlist, StaticChime};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::EngineConfig;
pub use error::{EngineError, EngineResult};
pub use handle::{EngineEvent, EngineHandle, RuntimeSettings, EVENT_CHANNEL_CAPACITY};
pub use log::{JsonlLogSink, LogSink, MemoryLogSink};
pub use model::{
    Announcement, AnnouncementRequest, LogRecord, MicFeed, MicFrame, MicStream, Priority, RequestId,
    RequestKind, RequestStatus,
};
pub use orchestrator::{Collaborators, Orchestrator, OrchestratorState};
pub use queue::{QueueHandle, RequestQueue};
pub use schedule::{
    EntryStatus, JsonScheduleStore, MemoryScheduleStore, Repeat, ScheduleStore, ScheduledEntry, Scheduler,
    TickReport,
};
pub use speaker::{Speaker, TtsEngine, UnavailableTts};
