use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Events emitted by the worker pool while schema chunks move through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    ChunkSubmitted {
        task_id: String,
        chunk_index: usize,
        fields: usize,
    },
    ThrottleWaited {
        task_id: String,
        duration: Duration,
    },
    ChunkStarted {
        task_id: String,
    },
    ChunkFinished {
        task_id: String,
    },
    ChunkFailed {
        task_id: String,
        message: String,
    },
}

/// Observer hook for dispatch events.
pub trait DispatchObserver: Send + Sync {
    fn on_event(&self, event: &DispatchEvent);
}

/// Forwards dispatch events to `tracing` at debug level.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDispatchObserver;

impl DispatchObserver for TracingDispatchObserver {
    fn on_event(&self, event: &DispatchEvent) {
        match event {
            DispatchEvent::ChunkFailed { task_id, message } => {
                tracing::warn!(%task_id, %message, "schema chunk failed");
            }
            other => tracing::debug!(event = ?other, "dispatch event"),
        }
    }
}

/// Live counters for a worker pool. Snapshot them at any time.
#[derive(Debug, Default)]
pub struct DispatchMetrics {
    chunks_submitted: AtomicU64,
    chunks_started: AtomicU64,
    chunks_finished: AtomicU64,
    chunks_failed: AtomicU64,
    throttle_wait_ns: AtomicU64,

    active_chunks: AtomicUsize,
    max_active_chunks: AtomicUsize,
}

impl DispatchMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn on_submitted(&self) {
        self.chunks_submitted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn on_chunk_start(&self) {
        self.chunks_started.fetch_add(1, Ordering::SeqCst);
        let now = self.active_chunks.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_chunks.fetch_max(now, Ordering::SeqCst);
    }

    /// Every started chunk ends exactly once, successful or not.
    pub(crate) fn on_chunk_end(&self, ok: bool) {
        if ok {
            self.chunks_finished.fetch_add(1, Ordering::SeqCst);
        } else {
            self.chunks_failed.fetch_add(1, Ordering::SeqCst);
        }
        self.active_chunks.fetch_sub(1, Ordering::SeqCst);
    }

    pub(crate) fn on_throttle_wait(&self, d: Duration) {
        let add = d.as_nanos().min(u64::MAX as u128) as u64;
        self.throttle_wait_ns.fetch_add(add, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> DispatchMetricsSnapshot {
        DispatchMetricsSnapshot {
            chunks_submitted: self.chunks_submitted.load(Ordering::SeqCst),
            chunks_started: self.chunks_started.load(Ordering::SeqCst),
            chunks_finished: self.chunks_finished.load(Ordering::SeqCst),
            chunks_failed: self.chunks_failed.load(Ordering::SeqCst),
            active_chunks: self.active_chunks.load(Ordering::SeqCst),
            max_active_chunks: self.max_active_chunks.load(Ordering::SeqCst),
            throttle_wait: Duration::from_nanos(self.throttle_wait_ns.load(Ordering::SeqCst)),
        }
    }
}

/// Immutable snapshot of [`DispatchMetrics`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchMetricsSnapshot {
    pub chunks_submitted: u64,
    pub chunks_started: u64,
    pub chunks_finished: u64,
    pub chunks_failed: u64,
    pub active_chunks: usize,
    pub max_active_chunks: usize,
    pub throttle_wait: Duration,
}

impl fmt::Display for DispatchMetricsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "chunks={}/{} submitted={} failed={} active={} max_active={} throttle_wait={:?}",
            self.chunks_finished,
            self.chunks_started,
            self.chunks_submitted,
            self.chunks_failed,
            self.active_chunks,
            self.max_active_chunks,
            self.throttle_wait
        )
    }
}
