//! Time-driven promotion of scheduled entries into the request queue.
//!
//! Entries live in a [`ScheduleStore`] (a JSON file in production) shaped like
//!
//! ```json
//! [{ "id": 1, "message": "Train {train_no} arriving at platform {platform}",
//!    "date": "2024-05-01", "time": "10:30:00", "status": "pending",
//!    "variables": { "train_no": "12951", "platform": "3" }, "repeat": "daily" }]
//! ```
//!
//! Every tick the store is re-read, due entries are queued, and the store is
//! written back if anything changed.

use crate::clock::Clock;
use crate::error::{EngineError, EngineResult};
use crate::handle::{EngineEvent, EngineHandle, Reporter};
use crate::model::{AnnouncementRequest, RequestId, RequestStatus};
use crate::orchestrator::OrchestratorState;
use crate::queue::QueueHandle;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    #[default]
    Pending,
    /// Handed to the queue; never queued again.
    Promoted,
    /// Missed its grace window.
    Skipped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Repeat {
    Daily,
    Weekly,
}

impl Repeat {
    fn step(self, from: NaiveDateTime) -> NaiveDateTime {
        match self {
            Repeat::Daily => from + chrono::Duration::days(1),
            Repeat::Weekly => from + chrono::Duration::weeks(1),
        }
    }
}

mod time_format {
    use chrono::NaiveTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(time: &NaiveTime, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&time.format("%H:%M:%S").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveTime, D::Error> {
        let raw = String::deserialize(d)?;
        let raw = raw.trim();
        NaiveTime::parse_from_str(raw, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M"))
            .map_err(serde::de::Error::custom)
    }
}

/// A persisted future announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledEntry {
    pub id: u64,
    pub message: String,
    pub date: NaiveDate,
    #[serde(with = "time_format")]
    pub time: NaiveTime,
    #[serde(default)]
    pub status: EntryStatus,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat: Option<Repeat>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_end: Option<NaiveDateTime>,
}

impl ScheduledEntry {
    pub fn new(id: u64, message: impl Into<String>, due: NaiveDateTime) -> Self {
        Self {
            id,
            message: message.into(),
            date: due.date(),
            time: due.time(),
            status: EntryStatus::Pending,
            variables: BTreeMap::new(),
            repeat: None,
            repeat_end: None,
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(key.into(), value.into());
        self
    }

    pub fn with_repeat(mut self, repeat: Repeat, until: Option<NaiveDateTime>) -> Self {
        self.repeat = Some(repeat);
        self.repeat_end = until;
        self
    }

    pub fn due_at(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    /// Fill `{name}` placeholders from `variables`. If any placeholder has no
    /// value the template is returned unchanged.
    pub fn render_message(&self) -> String {
        let mut out = String::with_capacity(self.message.len());
        let mut rest = self.message.as_str();
        while let Some(open) = rest.find('{') {
            let Some(len) = rest[open + 1..].find('}') else {
                break;
            };
            let key = rest[open + 1..open + 1 + len].trim();
            match self.variables.get(key) {
                Some(value) => {
                    out.push_str(&rest[..open]);
                    out.push_str(value);
                    rest = &rest[open + len + 2..];
                }
                None => return self.message.clone(),
            }
        }
        out.push_str(rest);
        out
    }

    /// Close out the current occurrence. Recurring entries move to their
    /// first occurrence after `after` and stay pending until `repeat_end`.
    fn finish_occurrence(&mut self, terminal: EntryStatus, after: NaiveDateTime) {
        if let Some(repeat) = self.repeat {
            let mut next = repeat.step(self.due_at());
            while next <= after {
                next = repeat.step(next);
            }
            if self.repeat_end.map_or(true, |end| next <= end) {
                self.date = next.date();
                self.time = next.time();
                self.status = EntryStatus::Pending;
                return;
            }
        }
        self.status = terminal;
    }
}

/// Persisted scheduled-entry store.
pub trait ScheduleStore: Send {
    fn load(&self) -> EngineResult<Vec<ScheduledEntry>>;
    fn save(&self, entries: &[ScheduledEntry]) -> EngineResult<()>;
}

/// Entries kept as a pretty-printed JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonScheduleStore {
    path: PathBuf,
}

impl JsonScheduleStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn store_err(&self, e: impl std::fmt::Display) -> EngineError {
        EngineError::Store(format!("{}: {}", self.path.display(), e))
    }
}

impl ScheduleStore for JsonScheduleStore {
    fn load(&self) -> EngineResult<Vec<ScheduledEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path).map_err(|e| self.store_err(e))?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(|e| self.store_err(e))
    }

    fn save(&self, entries: &[ScheduledEntry]) -> EngineResult<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| self.store_err(e))?;
        }
        let json = serde_json::to_string_pretty(entries)?;
        // Write-then-rename so a crash never leaves a half-written file
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.store_err(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.store_err(e))
    }
}

/// In-memory store. Cloned handles share the same entries.
#[derive(Debug, Clone, Default)]
pub struct MemoryScheduleStore {
    entries: Arc<Mutex<Vec<ScheduledEntry>>>,
}

impl MemoryScheduleStore {
    pub fn new(entries: Vec<ScheduledEntry>) -> Self {
        Self {
            entries: Arc::new(Mutex::new(entries)),
        }
    }

    pub fn entries(&self) -> Vec<ScheduledEntry> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn get(&self, id: u64) -> Option<ScheduledEntry> {
        self.entries().into_iter().find(|e| e.id == id)
    }
}

impl ScheduleStore for MemoryScheduleStore {
    fn load(&self) -> EngineResult<Vec<ScheduledEntry>> {
        Ok(self.entries())
    }

    fn save(&self, entries: &[ScheduledEntry]) -> EngineResult<()> {
        *self.entries.lock().unwrap_or_else(|e| e.into_inner()) = entries.to_vec();
        Ok(())
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub promoted: Vec<RequestId>,
    /// Entry ids left pending because the queue was full.
    pub deferred: Vec<u64>,
    /// Entry ids abandoned after their grace window.
    pub skipped: Vec<u64>,
}

pub struct Scheduler {
    store: Box<dyn ScheduleStore>,
    queue: QueueHandle,
    reporter: Reporter,
    clock: Arc<dyn Clock>,
    engine_state: watch::Receiver<OrchestratorState>,
    grace: chrono::Duration,
    /// Occurrences already promoted or skipped but not yet written back.
    handled: HashMap<(u64, NaiveDateTime), EntryStatus>,
}

impl Scheduler {
    pub fn new(store: Box<dyn ScheduleStore>, engine: &EngineHandle, grace: chrono::Duration) -> Self {
        Self {
            store,
            queue: engine.queue().clone(),
            reporter: engine.reporter().clone(),
            clock: engine.clock(),
            engine_state: engine.watch_state(),
            grace,
            handled: HashMap::new(),
        }
    }

    /// Tick every `period` until the orchestrator stops. Each tick runs on
    /// the blocking pool since it reads and writes the store.
    pub async fn run(self, period: Duration) {
        info!(period_ms = period.as_millis() as u64, "scheduler started");
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut scheduler = self;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                changed = scheduler.engine_state.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
            let now = scheduler.clock.now();
            let ticked = tokio::task::spawn_blocking(move || {
                let result = scheduler.tick(now);
                (scheduler, result)
            })
            .await;
            match ticked {
                Ok((back, result)) => {
                    scheduler = back;
                    if let Err(e) = result {
                        warn!(error = %e, "scheduler tick failed");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "scheduler tick panicked");
                    return;
                }
            }
        }
        info!("scheduler stopped");
    }

    /// Promote every due pending entry at `now`.
    pub fn tick(&mut self, now: NaiveDateTime) -> EngineResult<TickReport> {
        let mut entries = self.store.load()?;
        let mut report = TickReport::default();
        let mut dirty = false;

        for entry in entries.iter_mut() {
            if entry.status != EntryStatus::Pending {
                continue;
            }
            let due = entry.due_at();
            if due > now {
                continue;
            }

            match self.handled.get(&(entry.id, due)) {
                Some(EntryStatus::Skipped) => {
                    entry.finish_occurrence(EntryStatus::Skipped, now - self.grace);
                    dirty = true;
                    continue;
                }
                Some(_) => {
                    entry.finish_occurrence(EntryStatus::Promoted, due);
                    dirty = true;
                    continue;
                }
                None => {}
            }

            if now - due > self.grace {
                self.skip(entry, due, now);
                self.handled.insert((entry.id, due), EntryStatus::Skipped);
                entry.finish_occurrence(EntryStatus::Skipped, now - self.grace);
                report.skipped.push(entry.id);
                dirty = true;
                continue;
            }

            let id = self.queue.next_id();
            let request = AnnouncementRequest::scheduled(id, entry.id, entry.render_message(), due);
            match self.queue.enqueue(request) {
                Ok(()) => {
                    info!(entry_id = entry.id, request_id = %id, due = %due, "scheduled entry promoted");
                    self.handled.insert((entry.id, due), EntryStatus::Promoted);
                    entry.finish_occurrence(EntryStatus::Promoted, due);
                    report.promoted.push(id);
                    dirty = true;
                }
                Err(e @ EngineError::QueueFull { .. }) => {
                    warn!(entry_id = entry.id, error = %e, "queue full; scheduled entry stays pending");
                    self.reporter.emit(EngineEvent::ScheduleDeferred {
                        entry_id: entry.id,
                        reason: e.to_string(),
                    });
                    report.deferred.push(entry.id);
                }
                Err(e) => {
                    warn!(entry_id = entry.id, error = %e, "scheduled request dropped");
                }
            }
        }

        if dirty {
            self.store.save(&entries)?;
        } else {
            debug!(entries = entries.len(), "scheduler tick: nothing changed");
        }
        // The store now records every occurrence due by `now`.
        self.handled.retain(|&(_, due), _| due > now);
        Ok(report)
    }

    fn skip(&self, entry: &ScheduledEntry, due: NaiveDateTime, now: NaiveDateTime) {
        let lateness = now - due;
        warn!(
            entry_id = entry.id,
            due = %due,
            late_secs = lateness.num_seconds(),
            "scheduled entry missed its grace window"
        );
        let mut request = AnnouncementRequest::scheduled(
            self.queue.next_id(),
            entry.id,
            entry.render_message(),
            due,
        );
        if let Err(e) = request.transition(RequestStatus::Skipped) {
            warn!(entry_id = entry.id, error = %e, "could not mark skipped entry");
            return;
        }
        self.reporter.finish(request.log_record(
            now,
            Some(format!("not queued within {}s of {}", self.grace.num_seconds(), due)),
        ));
    }
}
