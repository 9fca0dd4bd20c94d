//! Admission-controlled holding area for pending announcements.
//!
//! [`RequestQueue`] is the plain data structure; [`QueueHandle`] wraps it in a
//! single lock so every producer (mic trigger, text submit, scheduler tick) and
//! the orchestrator mutate it through one point.

use crate::error::{EngineError, EngineResult};
use crate::model::{AnnouncementRequest, RequestId};
use chrono::NaiveDateTime;
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::Notify;
use tracing::{debug, warn};

#[derive(Debug)]
struct Slot {
    seq: u64,
    request: AnnouncementRequest,
}

/// Bounded set of pending requests, ordered on read by
/// priority, then `not_before`, then insertion order.
#[derive(Debug)]
pub struct RequestQueue {
    capacity: usize,
    slots: Vec<Slot>,
    next_seq: u64,
}

impl RequestQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Vec::new(),
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.slots.iter().any(|s| s.request.id() == id)
    }

    pub fn enqueue(&mut self, request: AnnouncementRequest) -> EngineResult<()> {
        if self.contains(request.id()) {
            return Err(EngineError::DuplicateId(request.id()));
        }
        if self.slots.len() >= self.capacity {
            return Err(EngineError::QueueFull {
                capacity: self.capacity,
            });
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.slots.push(Slot { seq, request });
        Ok(())
    }

    /// The request that should play next at `now`, if any is eligible.
    pub fn peek_next(&self, now: NaiveDateTime) -> Option<&AnnouncementRequest> {
        self.slots
            .iter()
            .filter(|s| s.request.is_eligible(now))
            .min_by_key(|s| (Reverse(s.request.priority()), s.request.not_before(), s.seq))
            .map(|s| &s.request)
    }

    pub fn remove(&mut self, id: RequestId) -> EngineResult<AnnouncementRequest> {
        let index = self
            .slots
            .iter()
            .position(|s| s.request.id() == id)
            .ok_or(EngineError::NotFound(id))?;
        Ok(self.slots.remove(index).request)
    }

    pub fn ids(&self) -> Vec<RequestId> {
        self.slots.iter().map(|s| s.request.id()).collect()
    }
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<RequestQueue>,
    wake: Notify,
    next_id: AtomicU64,
}

/// Cloneable, thread-safe handle to the shared queue.
#[derive(Debug, Clone)]
pub struct QueueHandle {
    shared: Arc<Shared>,
}

impl QueueHandle {
    pub fn new(capacity: usize) -> Self {
        Self {
            shared: Arc::new(Shared {
                queue: Mutex::new(RequestQueue::new(capacity)),
                wake: Notify::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RequestQueue> {
        self.shared.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocate the next request id.
    pub fn next_id(&self) -> RequestId {
        RequestId(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn enqueue(&self, request: AnnouncementRequest) -> EngineResult<()> {
        let id = request.id();
        let kind = request.kind();
        self.lock().enqueue(request)?;
        debug!(request_id = %id, kind = ?kind, "request enqueued");
        self.shared.wake.notify_one();
        Ok(())
    }

    /// Peek and remove the next eligible request under one lock.
    pub fn claim_next(&self, now: NaiveDateTime) -> Option<AnnouncementRequest> {
        let mut queue = self.lock();
        let id = queue.peek_next(now)?.id();
        match queue.remove(id) {
            Ok(request) => Some(request),
            Err(e) => {
                warn!(request_id = %id, error = %e, "peeked request vanished before claim");
                None
            }
        }
    }

    pub fn has_eligible(&self, now: NaiveDateTime) -> bool {
        self.lock().peek_next(now).is_some()
    }

    pub fn remove(&self, id: RequestId) -> EngineResult<AnnouncementRequest> {
        self.lock().remove(id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.lock().capacity()
    }

    pub fn pending_ids(&self) -> Vec<RequestId> {
        self.lock().ids()
    }

    /// Resolves after the next successful enqueue (or immediately if one
    /// happened since the last wait).
    pub async fn notified(&self) {
        self.shared.wake.notified().await;
    }
}
