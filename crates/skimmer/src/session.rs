//! Per-retrieval session state.
//!
//! Every retrieval owns its own [`SessionTracker`]; nothing is shared across
//! retrievals, so overlapping ingestions can never alias each other's
//! counters. The tracker is a cheap cloneable handle: hold one clone inside
//! the running session, hand others to polling consumers that cannot await
//! completion directly.
//!
//! The tracker by itself does not distinguish "still running" from "failed".
//! `is_complete()` stays false in both cases; failure is carried separately
//! through the dispatch context's `fail` capability.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

#[derive(Debug, Default)]
struct SessionState {
    records: AtomicU64,
    completed: AtomicBool,
    cancelled: AtomicBool,
}

/// Cloneable progress handle for one retrieval.
#[derive(Debug, Clone, Default)]
pub struct SessionTracker {
    state: Arc<SessionState>,
}

impl SessionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records dispatched so far. Monotonically non-decreasing,
    /// safe to read mid-stream.
    pub fn record_count(&self) -> u64 {
        self.state.records.load(Ordering::Relaxed)
    }

    /// True only after the stream was fully read and every record seen was
    /// dispatched. Stays false forever if the stream errors out or the
    /// session is cancelled.
    pub fn is_complete(&self) -> bool {
        self.state.completed.load(Ordering::Acquire)
    }

    /// Ask the running session to stop. The underlying stream is dropped
    /// and no further records are dispatched; the session ends neither
    /// complete nor failed.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn add_records(&self, n: u64) {
        self.state.records.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn mark_complete(&self) {
        self.state.completed.store(true, Ordering::Release);
    }
}
