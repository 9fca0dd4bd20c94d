//! The announcement state machine.
//!
//! One orchestrator owns the [`AudioSink`] and drains the shared queue:
//!
//! ```text
//!            claim                 chime done              content done/failed
//!   Idle ─────────────▶ PlayingChime ─────────▶ PlayingContent ─────────────────▶ Idle
//!    │  ▲                                                                        (log)
//!    │  │ queue non-empty at chunk boundary
//!    ▼  │
//!   PlayingBackground
//! ```
//!
//! An announcement that has started is never interrupted by a newer request;
//! only an operator stop cuts it short. Background audio is played in chunks
//! and yields to queued work at the next chunk boundary.

use crate::audio::{AudioClip, AudioSink, BackgroundSource, ChimeProvider, NoChime};
use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::handle::{
    Command, EngineEvent, EngineHandle, Reporter, RuntimeSettings, EVENT_CHANNEL_CAPACITY,
};
use crate::log::LogSink;
use crate::model::{Announcement, AnnouncementRequest, MicFrame, MicStream, RequestId, RequestStatus};
use crate::queue::QueueHandle;
use crate::speaker::{Speaker, TtsEngine};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info, warn};

/// Upper bound on how long an idle orchestrator sleeps before re-checking the
/// queue for requests whose `not_before` has passed.
const IDLE_RECHECK: Duration = Duration::from_secs(1);

/// Tracks that return nothing playable in a row before background gives up
/// for this round.
const MAX_EMPTY_TRACKS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Idle,
    PlayingChime(RequestId),
    PlayingContent(RequestId),
    PlayingBackground,
}

impl OrchestratorState {
    pub fn is_playing(self) -> bool {
        !matches!(self, OrchestratorState::Idle)
    }
}

/// External collaborators injected into the orchestrator.
pub struct Collaborators {
    pub sink: Arc<dyn AudioSink>,
    pub tts: Arc<dyn TtsEngine>,
    pub log: Arc<dyn LogSink>,
    pub chime: Arc<dyn ChimeProvider>,
    pub background: Option<Box<dyn BackgroundSource>>,
    pub clock: Arc<dyn Clock>,
}

impl Collaborators {
    pub fn new(sink: Arc<dyn AudioSink>, tts: Arc<dyn TtsEngine>, log: Arc<dyn LogSink>) -> Self {
        Self {
            sink,
            tts,
            log,
            chime: Arc::new(NoChime),
            background: None,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_chime(mut self, chime: Arc<dyn ChimeProvider>) -> Self {
        self.chime = chime;
        self
    }

    pub fn with_background(mut self, background: Box<dyn BackgroundSource>) -> Self {
        self.background = Some(background);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

/// How one cycle (or one background chunk) ended.
#[derive(Debug)]
enum PlayOutcome {
    Completed,
    Failed(EngineError),
    Stopped,
}

/// Background playback position that survives preemption.
struct BackgroundCursor {
    source: Box<dyn BackgroundSource>,
    current: Option<AudioClip>,
    position: usize,
}

impl BackgroundCursor {
    fn new(source: Box<dyn BackgroundSource>) -> Self {
        Self {
            source,
            current: None,
            position: 0,
        }
    }

    fn next_chunk(&mut self, chunk: Duration) -> Option<AudioClip> {
        for _ in 0..MAX_EMPTY_TRACKS {
            if self.current.is_none() {
                self.current = Some(self.source.next_track()?);
                self.position = 0;
            }
            let track = self.current.as_ref()?;
            let frames = track.frames_for(chunk);
            let part = track.slice_frames(self.position, frames);
            self.position += frames;
            if self.position >= track.frames() {
                self.current = None;
            }
            if !part.is_empty() {
                return Some(part);
            }
        }
        None
    }
}

pub struct Orchestrator {
    queue: QueueHandle,
    sink: Arc<dyn AudioSink>,
    chime: Arc<dyn ChimeProvider>,
    speaker: Speaker,
    background: Option<BackgroundCursor>,
    clock: Arc<dyn Clock>,
    reporter: Reporter,
    settings: Arc<RwLock<RuntimeSettings>>,
    commands: mpsc::UnboundedReceiver<Command>,
    state: OrchestratorState,
    state_tx: watch::Sender<OrchestratorState>,
    poll_interval: Duration,
    background_chunk: Duration,
    background_paused: bool,
    shutting_down: bool,
}

impl Orchestrator {
    /// Build an orchestrator and the handle producers use to reach it.
    pub fn new(config: &EngineConfig, parts: Collaborators) -> EngineResult<(Self, EngineHandle)> {
        config.validate()?;

        let queue = QueueHandle::new(config.queue_capacity);
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (state_tx, state_rx) = watch::channel(OrchestratorState::Idle);
        let settings = Arc::new(RwLock::new(RuntimeSettings {
            volume: config.volume,
            chime_enabled: config.chime_enabled,
            background_enabled: config.background_audio_enabled,
        }));
        let reporter = Reporter::new(parts.log, events);

        let handle = EngineHandle::new(
            queue.clone(),
            command_tx,
            Arc::clone(&settings),
            reporter.clone(),
            state_rx,
            Arc::clone(&parts.clock),
        );

        let orchestrator = Self {
            queue,
            sink: parts.sink,
            chime: parts.chime,
            speaker: Speaker::new(parts.tts),
            background: parts.background.map(BackgroundCursor::new),
            clock: parts.clock,
            reporter,
            settings,
            commands: command_rx,
            state: OrchestratorState::Idle,
            state_tx,
            poll_interval: config.poll_interval(),
            background_chunk: config.background_chunk(),
            background_paused: false,
            shutting_down: false,
        };

        Ok((orchestrator, handle))
    }

    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Run the decision loop until [`EngineHandle::shutdown`] is called or
    /// every handle is dropped.
    pub async fn run(mut self) {
        info!("orchestrator started");
        while !self.shutting_down {
            self.step().await;
        }
        self.sink.stop();
        self.set_state(OrchestratorState::Idle);
        info!("orchestrator stopped");
    }

    async fn step(&mut self) {
        self.drain_commands();
        if self.shutting_down {
            return;
        }

        let now = self.clock.now();
        if let Some(request) = self.queue.claim_next(now) {
            self.set_state(OrchestratorState::Idle);
            self.run_cycle(request).await;
            return;
        }

        if self.background_ready() {
            self.play_background_chunk().await;
            return;
        }

        self.set_state(OrchestratorState::Idle);
        self.wait_for_work().await;
    }

    fn settings(&self) -> RuntimeSettings {
        *self.settings.read().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&mut self, state: OrchestratorState) {
        if self.state == state {
            return;
        }
        debug!(from = ?self.state, to = ?state, "state transition");
        self.state = state;
        self.state_tx.send_replace(state);
        self.reporter.emit(EngineEvent::StateChanged(state));
    }

    fn drain_commands(&mut self) {
        loop {
            match self.commands.try_recv() {
                Ok(command) => {
                    self.handle_command(Some(command));
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    self.handle_command(None);
                    break;
                }
            }
        }
    }

    /// Apply a command. Returns the outcome it forces on a cycle in progress.
    fn handle_command(&mut self, command: Option<Command>) -> Option<PlayOutcome> {
        match command {
            Some(Command::Stop) => {
                self.sink.stop();
                if self.state == OrchestratorState::PlayingBackground {
                    self.background_paused = true;
                }
                info!(state = ?self.state, "stop requested");
                Some(PlayOutcome::Stopped)
            }
            Some(Command::ResumeBackground) => {
                self.background_paused = false;
                None
            }
            Some(Command::Refresh) => None,
            Some(Command::Shutdown) | None => {
                self.sink.stop();
                self.shutting_down = true;
                Some(PlayOutcome::Stopped)
            }
        }
    }

    async fn wait_for_work(&mut self) {
        tokio::select! {
            _ = self.queue.notified() => {}
            command = self.commands.recv() => {
                self.handle_command(command);
            }
            _ = tokio::time::sleep(IDLE_RECHECK) => {}
        }
    }

    async fn run_cycle(&mut self, mut request: AnnouncementRequest) {
        let id = request.id();
        if let Err(e) = request.transition(RequestStatus::InProgress) {
            warn!(request_id = %id, error = %e, "claimed request was not pending; dropping it");
            return;
        }
        let settings = self.settings();
        info!(request_id = %id, kind = ?request.kind(), "announcement started");

        let (status, detail) = match self.play_request(&mut request, settings).await {
            PlayOutcome::Completed => (RequestStatus::Completed, None),
            PlayOutcome::Failed(e) => {
                warn!(request_id = %id, error = %e, "announcement failed");
                (RequestStatus::Failed, Some(e.to_string()))
            }
            PlayOutcome::Stopped => (RequestStatus::Skipped, Some("stopped by operator".to_string())),
        };

        if let Err(e) = request.transition(status) {
            warn!(request_id = %id, error = %e, "could not record final status");
        }
        self.reporter.finish(request.log_record(self.clock.now(), detail));
        self.background_paused = false;
        self.set_state(OrchestratorState::Idle);
    }

    async fn play_request(
        &mut self,
        request: &mut AnnouncementRequest,
        settings: RuntimeSettings,
    ) -> PlayOutcome {
        let id = request.id();

        if settings.chime_enabled {
            if let Some(chime) = self.chime.get_chime() {
                self.set_state(OrchestratorState::PlayingChime(id));
                match self.play_and_wait(&chime).await {
                    PlayOutcome::Completed => {}
                    other => return other,
                }
            }
        }

        self.set_state(OrchestratorState::PlayingContent(id));
        match request.payload_mut() {
            Announcement::Text { message } | Announcement::Scheduled { message, .. } => {
                let message = message.clone();
                let clip = match self.render(&message).await {
                    Ok(clip) => clip,
                    Err(outcome) => return outcome,
                };
                self.play_and_wait(&clip.with_volume(settings.volume)).await
            }
            Announcement::Mic(stream) => self.stream_mic(stream, settings.volume).await,
        }
    }

    /// Render text while still honouring stop commands.
    async fn render(&mut self, message: &str) -> Result<AudioClip, PlayOutcome> {
        let speaker = self.speaker.clone();
        let render = speaker.render(message);
        tokio::pin!(render);
        loop {
            tokio::select! {
                result = &mut render => return result.map_err(PlayOutcome::Failed),
                command = self.commands.recv() => {
                    if let Some(outcome) = self.handle_command(command) {
                        return Err(outcome);
                    }
                }
            }
        }
    }

    /// Pass live mic frames to the sink until the operator releases the mic.
    /// A stop sent before the release wins over the end of the stream.
    async fn stream_mic(&mut self, stream: &mut MicStream, volume: f32) -> PlayOutcome {
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => {
                    if let Some(outcome) = self.handle_command(command) {
                        return outcome;
                    }
                }
                frame = stream.recv() => match frame {
                    Some(MicFrame::Samples(clip)) => {
                        let out = self.speaker.pass_through(&clip, volume);
                        if let Err(e) = self.sink.play(&out) {
                            self.sink.stop();
                            return PlayOutcome::Failed(e);
                        }
                    }
                    Some(MicFrame::Dropped(reason)) => {
                        self.sink.stop();
                        return PlayOutcome::Failed(EngineError::Render(format!(
                            "mic stream dropped: {}",
                            reason
                        )));
                    }
                    None => break,
                },
            }
        }
        self.wait_until_drained().await
    }

    async fn play_and_wait(&mut self, clip: &AudioClip) -> PlayOutcome {
        if let Err(e) = self.sink.play(clip) {
            return PlayOutcome::Failed(e);
        }
        self.wait_until_drained().await
    }

    async fn wait_until_drained(&mut self) -> PlayOutcome {
        loop {
            if !self.sink.is_playing() {
                return PlayOutcome::Completed;
            }
            tokio::select! {
                command = self.commands.recv() => {
                    if let Some(outcome) = self.handle_command(command) {
                        return outcome;
                    }
                }
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    fn background_ready(&self) -> bool {
        self.background.is_some() && !self.background_paused && self.settings().background_enabled
    }

    /// Play one background chunk. Queued work is picked up by the next step.
    async fn play_background_chunk(&mut self) {
        let chunk_len = self.background_chunk;
        let Some(chunk) = self
            .background
            .as_mut()
            .and_then(|cursor| cursor.next_chunk(chunk_len))
        else {
            debug!("background source has nothing to play");
            self.background_paused = true;
            self.set_state(OrchestratorState::Idle);
            return;
        };

        let volume = self.settings().volume;
        self.set_state(OrchestratorState::PlayingBackground);
        match self.play_and_wait(&chunk.with_volume(volume)).await {
            PlayOutcome::Completed => {}
            PlayOutcome::Stopped => {
                self.background_paused = true;
                self.set_state(OrchestratorState::Idle);
            }
            PlayOutcome::Failed(e) => {
                warn!(error = %e, "background playback failed; pausing background audio");
                self.background_paused = true;
                self.set_state(OrchestratorState::Idle);
            }
        }
    }
}
