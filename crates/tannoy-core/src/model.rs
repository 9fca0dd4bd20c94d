//! Announcement data model: requests, their lifecycle and the log records
//! emitted once they reach a terminal state.

use crate::audio::AudioClip;
use crate::error::{EngineError, EngineResult};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;

/// Placeholder written to the log when an announcement carries no text.
pub const NO_MESSAGE: &str = "N/A";

/// Unique, monotonically assigned request identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Source of an announcement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestKind {
    Mic,
    Text,
    Scheduled,
}

/// Playback priority. Ordering is `Scheduled < Text < Mic`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Scheduled,
    Text,
    Mic,
}

impl RequestKind {
    pub fn priority(self) -> Priority {
        match self {
            RequestKind::Mic => Priority::Mic,
            RequestKind::Text => Priority::Text,
            RequestKind::Scheduled => Priority::Scheduled,
        }
    }
}

/// Lifecycle of a request.
///
/// Allowed moves: `Pending -> InProgress -> {Completed, Failed}`,
/// `Pending -> Skipped`, and `InProgress -> Skipped` when an operator stop
/// halts the cycle. Terminal states never change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Skipped,
}

impl RequestStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RequestStatus::Completed | RequestStatus::Failed | RequestStatus::Skipped
        )
    }

    pub fn can_transition_to(self, to: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, to),
            (Pending, InProgress)
                | (Pending, Skipped)
                | (InProgress, Completed)
                | (InProgress, Failed)
                | (InProgress, Skipped)
        )
    }
}

/// A single frame delivered by a live microphone stream.
#[derive(Debug)]
pub enum MicFrame {
    Samples(AudioClip),
    /// The capture device failed; the announcement ends as Failed.
    Dropped(String),
}

/// Producer side of a live microphone stream. Dropping it ends the stream,
/// which is how the operator "releases" the mic control.
#[derive(Debug, Clone)]
pub struct MicFeed {
    tx: mpsc::UnboundedSender<MicFrame>,
}

impl MicFeed {
    /// Push captured audio. Returns false once the engine stopped listening.
    pub fn push(&self, clip: AudioClip) -> bool {
        self.tx.send(MicFrame::Samples(clip)).is_ok()
    }

    /// Report that the capture device dropped out.
    pub fn fail(&self, reason: impl Into<String>) {
        let _ = self.tx.send(MicFrame::Dropped(reason.into()));
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side of a live microphone stream, owned by the request.
#[derive(Debug)]
pub struct MicStream {
    rx: mpsc::UnboundedReceiver<MicFrame>,
}

impl MicStream {
    pub fn channel() -> (MicFeed, MicStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        (MicFeed { tx }, MicStream { rx })
    }

    /// Next frame, or `None` when the operator released the control.
    pub async fn recv(&mut self) -> Option<MicFrame> {
        self.rx.recv().await
    }
}

/// Kind-specific payload of a request.
#[derive(Debug)]
pub enum Announcement {
    Mic(MicStream),
    Text { message: String },
    Scheduled { entry_id: u64, message: String },
}

impl Announcement {
    pub fn kind(&self) -> RequestKind {
        match self {
            Announcement::Mic(_) => RequestKind::Mic,
            Announcement::Text { .. } => RequestKind::Text,
            Announcement::Scheduled { .. } => RequestKind::Scheduled,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Announcement::Mic(_) => None,
            Announcement::Text { message } | Announcement::Scheduled { message, .. } => {
                Some(message)
            }
        }
    }

    pub fn entry_id(&self) -> Option<u64> {
        match self {
            Announcement::Scheduled { entry_id, .. } => Some(*entry_id),
            _ => None,
        }
    }
}

/// A pending or in-flight announcement.
#[derive(Debug)]
pub struct AnnouncementRequest {
    id: RequestId,
    not_before: NaiveDateTime,
    status: RequestStatus,
    payload: Announcement,
}

impl AnnouncementRequest {
    pub fn new(id: RequestId, payload: Announcement, not_before: NaiveDateTime) -> Self {
        Self {
            id,
            not_before,
            status: RequestStatus::Pending,
            payload,
        }
    }

    /// Operator text announcement, eligible immediately.
    pub fn text(id: RequestId, message: impl Into<String>, now: NaiveDateTime) -> EngineResult<Self> {
        let message = message.into();
        if message.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "announcement text is empty".to_string(),
            ));
        }
        Ok(Self::new(id, Announcement::Text { message }, now))
    }

    /// Live microphone announcement, eligible immediately.
    pub fn mic(id: RequestId, stream: MicStream, now: NaiveDateTime) -> Self {
        Self::new(id, Announcement::Mic(stream), now)
    }

    /// Scheduled announcement, eligible from its due time.
    pub fn scheduled(
        id: RequestId,
        entry_id: u64,
        message: impl Into<String>,
        due: NaiveDateTime,
    ) -> Self {
        Self::new(
            id,
            Announcement::Scheduled {
                entry_id,
                message: message.into(),
            },
            due,
        )
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn kind(&self) -> RequestKind {
        self.payload.kind()
    }

    pub fn priority(&self) -> Priority {
        self.kind().priority()
    }

    pub fn not_before(&self) -> NaiveDateTime {
        self.not_before
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn payload(&self) -> &Announcement {
        &self.payload
    }

    pub fn payload_mut(&mut self) -> &mut Announcement {
        &mut self.payload
    }

    pub fn is_eligible(&self, now: NaiveDateTime) -> bool {
        self.not_before <= now
    }

    pub fn transition(&mut self, to: RequestStatus) -> EngineResult<()> {
        if !self.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// Build the log record for a request that just reached a terminal state.
    pub fn log_record(&self, timestamp: NaiveDateTime, detail: Option<String>) -> LogRecord {
        LogRecord {
            request_id: self.id,
            kind: self.kind(),
            message: self
                .payload
                .message()
                .unwrap_or(NO_MESSAGE)
                .to_string(),
            timestamp,
            final_status: self.status,
            entry_id: self.payload.entry_id(),
            detail,
        }
    }
}

/// Durable record of a finished announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub request_id: RequestId,
    pub kind: RequestKind,
    pub message: String,
    pub timestamp: NaiveDateTime,
    pub final_status: RequestStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_id: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}
