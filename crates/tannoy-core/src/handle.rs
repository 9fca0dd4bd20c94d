//! Producer-facing handle to a running engine, plus the event stream it
//! publishes.

use crate::clock::Clock;
use crate::config::validate_volume;
use crate::error::EngineResult;
use crate::log::LogSink;
use crate::model::{AnnouncementRequest, LogRecord, MicStream, RequestId, RequestKind, RequestStatus};
use crate::orchestrator::OrchestratorState;
use crate::queue::QueueHandle;
use std::sync::{Arc, RwLock};
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{info, warn};

/// Capacity of the broadcast event channel. Slow subscribers see `Lagged`.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Things the engine reports while it runs.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    StateChanged(OrchestratorState),
    RequestFinished {
        request_id: RequestId,
        kind: RequestKind,
        status: RequestStatus,
        detail: Option<String>,
    },
    /// The log sink rejected a record; the engine carried on.
    LogAppendFailed {
        request_id: RequestId,
        reason: String,
    },
    /// A due scheduled entry could not be queued yet and stays pending.
    ScheduleDeferred { entry_id: u64, reason: String },
}

/// Settings read at the start of every play cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeSettings {
    pub volume: f32,
    pub chime_enabled: bool,
    pub background_enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Stop,
    ResumeBackground,
    /// Wake an idle orchestrator so it re-reads settings.
    Refresh,
    Shutdown,
}

/// Writes terminal outcomes to the log sink and the event stream.
#[derive(Clone)]
pub(crate) struct Reporter {
    log: Arc<dyn LogSink>,
    events: broadcast::Sender<EngineEvent>,
}

impl Reporter {
    pub(crate) fn new(log: Arc<dyn LogSink>, events: broadcast::Sender<EngineEvent>) -> Self {
        Self { log, events }
    }

    pub(crate) fn emit(&self, event: EngineEvent) {
        // No subscribers is not an error
        let _ = self.events.send(event);
    }

    pub(crate) fn finish(&self, record: LogRecord) {
        info!(
            request_id = %record.request_id,
            kind = ?record.kind,
            status = ?record.final_status,
            "announcement finished"
        );
        if let Err(e) = self.log.append(&record) {
            warn!(request_id = %record.request_id, error = %e, "failed to append log record");
            self.emit(EngineEvent::LogAppendFailed {
                request_id: record.request_id,
                reason: e.to_string(),
            });
        }
        self.emit(EngineEvent::RequestFinished {
            request_id: record.request_id,
            kind: record.kind,
            status: record.final_status,
            detail: record.detail,
        });
    }
}

/// Cloneable handle given to every producer. Dropping the last handle shuts
/// the orchestrator down.
#[derive(Clone)]
pub struct EngineHandle {
    queue: QueueHandle,
    commands: mpsc::UnboundedSender<Command>,
    settings: Arc<RwLock<RuntimeSettings>>,
    reporter: Reporter,
    state: watch::Receiver<OrchestratorState>,
    clock: Arc<dyn Clock>,
}

impl EngineHandle {
    pub(crate) fn new(
        queue: QueueHandle,
        commands: mpsc::UnboundedSender<Command>,
        settings: Arc<RwLock<RuntimeSettings>>,
        reporter: Reporter,
        state: watch::Receiver<OrchestratorState>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            commands,
            settings,
            reporter,
            state,
            clock,
        }
    }

    pub fn queue(&self) -> &QueueHandle {
        &self.queue
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    pub(crate) fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    /// Queue a text-to-speech announcement.
    pub fn announce_text(&self, text: impl Into<String>) -> EngineResult<RequestId> {
        let id = self.queue.next_id();
        let request = AnnouncementRequest::text(id, text, self.clock.now())?;
        self.submit(request)
    }

    /// Queue a live microphone announcement. It plays until the matching
    /// [`MicFeed`](crate::model::MicFeed) is dropped.
    pub fn announce_mic(&self, stream: MicStream) -> EngineResult<RequestId> {
        let id = self.queue.next_id();
        self.submit(AnnouncementRequest::mic(id, stream, self.clock.now()))
    }

    /// Queue a request built by the caller.
    pub fn submit(&self, request: AnnouncementRequest) -> EngineResult<RequestId> {
        let id = request.id();
        let kind = request.kind();
        self.queue.enqueue(request).inspect_err(|e| {
            warn!(request_id = %id, kind = ?kind, error = %e, "announcement rejected");
        })?;
        Ok(id)
    }

    /// Withdraw a request that has not started playing.
    pub fn cancel(&self, id: RequestId) -> EngineResult<()> {
        let mut request = self.queue.remove(id)?;
        request.transition(RequestStatus::Skipped)?;
        self.reporter
            .finish(request.log_record(self.clock.now(), Some("cancelled by operator".to_string())));
        Ok(())
    }

    /// Halt whatever is playing. An in-flight announcement ends as Skipped;
    /// background audio stays silent until [`resume_background`](Self::resume_background)
    /// or the next announcement.
    pub fn stop(&self) {
        self.send(Command::Stop);
    }

    pub fn resume_background(&self) {
        self.send(Command::ResumeBackground);
    }

    /// Stop playback and end the orchestrator loop.
    pub fn shutdown(&self) {
        self.send(Command::Shutdown);
    }

    fn send(&self, command: Command) {
        if self.commands.send(command).is_err() {
            warn!(command = ?command, "orchestrator is not running");
        }
    }

    pub fn settings(&self) -> RuntimeSettings {
        *self.settings.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Change the output volume. Out-of-range values are rejected and the
    /// previous volume is kept.
    pub fn set_volume(&self, volume: f32) -> EngineResult<()> {
        let volume = validate_volume(volume).inspect_err(|e| {
            warn!(error = %e, "volume update rejected");
        })?;
        self.update(|s| s.volume = volume);
        Ok(())
    }

    pub fn set_chime_enabled(&self, enabled: bool) {
        self.update(|s| s.chime_enabled = enabled);
    }

    pub fn set_background_enabled(&self, enabled: bool) {
        self.update(|s| s.background_enabled = enabled);
        // Enabling also lifts a pause left by an earlier stop
        self.send(if enabled {
            Command::ResumeBackground
        } else {
            Command::Refresh
        });
    }

    fn update(&self, apply: impl FnOnce(&mut RuntimeSettings)) {
        let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
        apply(&mut settings);
        info!(
            volume = settings.volume,
            chime = settings.chime_enabled,
            background = settings.background_enabled,
            "settings updated"
        );
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.reporter.events.subscribe()
    }

    pub fn state(&self) -> OrchestratorState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change; closes when the
    /// orchestrator exits.
    pub fn watch_state(&self) -> watch::Receiver<OrchestratorState> {
        self.state.clone()
    }
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle")
            .field("queue_len", &self.queue.len())
            .field("state", &self.state())
            .field("settings", &self.settings())
            .finish()
    }
}
