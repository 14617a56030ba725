//! Coarse-grained progress reporting.
//!
//! The engine only maintains a message plus a count/total pair; how that
//! triple is presented (terminal progress bar, log line, GUI status) is up to
//! the caller. Updates are batched, once per chunk for threaded runs and once
//! per inner sweep for sequential runs, so the counters are never touched in
//! the innermost loop.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared progress state for one loop execution.
///
/// Obtain a handle via [`Loop::progress`](crate::Loop::progress) or
/// [`ThreadedLoop::progress`](crate::ThreadedLoop::progress) before invoking
/// the blocking `run`, and poll it from a display thread.
pub struct Progress {
    message: String,
    total: AtomicU64,
    count: AtomicU64,
    complete: AtomicBool,
}

impl Progress {
    pub(crate) fn new(message: String) -> Progress {
        Progress {
            message,
            total: AtomicU64::new(0),
            count: AtomicU64::new(0),
            complete: AtomicBool::new(false),
        }
    }

    pub(crate) fn start(&self, total: u64) {
        self.total.store(total, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        self.complete.store(false, Ordering::Relaxed);
    }

    pub(crate) fn tick(&self) {
        self.count.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark the execution finished, whether it completed or was abandoned
    /// early.
    pub(crate) fn finish(&self) {
        self.complete.store(true, Ordering::Relaxed);
    }

    /// Human-readable description of the operation.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Number of work units completed so far.
    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    /// Total number of work units, known once `run` begins.
    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    /// True once the run has ended.
    pub fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Relaxed)
    }
}
