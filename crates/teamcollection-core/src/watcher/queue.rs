//! Pending remote-change queue with per-book debounce.
//!
//! Watcher threads only ever call [`PendingChangeQueue::enqueue`]; the idle
//! handler pops one ready item at a time.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    NewBook,
    BookChanged,
    BookDeleted,
    /// Something in the repo's `Other/` folder changed.
    CollectionFilesChanged,
    /// A collection-level file in the local folder changed.
    LocalCollectionFilesChanged,
}

/// One queued change. `book` is empty for collection-level changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChange {
    pub kind: ChangeKind,
    pub book: String,
    pub ready_at: DateTime<Utc>,
    /// Times this change has been put back for a retry.
    pub attempts: u32,
}

/// Shared queue between watcher callbacks and the idle drain.
#[derive(Debug, Default)]
pub struct PendingChangeQueue {
    pending: Mutex<VecDeque<PendingChange>>,
}

impl PendingChangeQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> MutexGuard<'_, VecDeque<PendingChange>> {
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue a change that becomes ready after `delay`. A change of the same
    /// kind for the same book already waiting is pushed back instead of duplicated.
    pub fn enqueue(&self, kind: ChangeKind, book: &str, delay: Duration) {
        let ready_at = Utc::now() + delay;
        let mut pending = self.guard();
        if let Some(existing) = pending
            .iter_mut()
            .find(|p| p.kind == kind && p.book == book)
        {
            existing.ready_at = existing.ready_at.max(ready_at);
            return;
        }
        pending.push_back(PendingChange {
            kind,
            book: book.to_string(),
            ready_at,
            attempts: 0,
        });
    }

    /// Put a change back to be retried after `delay`.
    pub fn requeue(&self, mut change: PendingChange, delay: Duration) {
        let mut pending = self.guard();
        if pending
            .iter()
            .any(|p| p.kind == change.kind && p.book == change.book)
        {
            return;
        }
        change.ready_at = Utc::now() + delay;
        change.attempts += 1;
        pending.push_back(change);
    }

    /// Remove and return the oldest change whose debounce has expired.
    pub fn pop_ready(&self) -> Option<PendingChange> {
        let now = Utc::now();
        let mut pending = self.guard();
        let index = pending.iter().position(|p| p.ready_at <= now)?;
        pending.remove(index)
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_empty()
    }

    /// How long until the earliest change becomes ready; zero if one already is.
    pub fn time_until_next(&self) -> Option<Duration> {
        let now = Utc::now();
        self.guard()
            .iter()
            .map(|p| p.ready_at)
            .min()
            .map(|t| if t > now { t - now } else { Duration::zero() })
    }

    pub fn clear(&self) {
        self.guard().clear();
    }
}
