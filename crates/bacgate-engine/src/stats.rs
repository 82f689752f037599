use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-level counters, shared across all subscription workers.
#[derive(Debug, Default)]
pub struct EngineStats {
    pub messages_processed: AtomicU64,
    pub messages_failed: AtomicU64,
    pub events_retried: AtomicU64,
    pub cursor_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub messages_processed: u64,
    pub messages_failed: u64,
    pub events_retried: u64,
    pub cursor_failures: u64,
}

impl EngineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            messages_failed: self.messages_failed.load(Ordering::Relaxed),
            events_retried: self.events_retried.load(Ordering::Relaxed),
            cursor_failures: self.cursor_failures.load(Ordering::Relaxed),
        }
    }
}
