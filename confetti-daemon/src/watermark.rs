//! How far artifact reconciliation has progressed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

/// Shared between the watcher (marks dirty) and the reconciler (drains and
/// advances).
#[derive(Debug, Default)]
pub struct ResourceWatermark {
    dirty: AtomicBool,
    since: Mutex<Option<DateTime<Utc>>>,
}

impl ResourceWatermark {
    /// `None` means nothing has been reconciled yet: the next poll fetches
    /// every artifact.
    pub fn new(since: Option<DateTime<Utc>>) -> Self {
        Self {
            dirty: AtomicBool::new(false),
            since: Mutex::new(since),
        }
    }

    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    /// Clear the flag, returning whether it was set.
    pub fn take_dirty(&self) -> bool {
        self.dirty.swap(false, Ordering::SeqCst)
    }

    pub fn since(&self) -> Option<DateTime<Utc>> {
        *self.since.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn advance(&self, to: DateTime<Utc>) {
        *self.since.lock().unwrap_or_else(PoisonError::into_inner) = Some(to);
    }

    /// Forget all progress and force a poll.
    pub fn reset(&self) {
        *self.since.lock().unwrap_or_else(PoisonError::into_inner) = None;
        self.mark_dirty();
    }
}
