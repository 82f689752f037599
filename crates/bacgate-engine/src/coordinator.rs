//! Engine startup and worker lifecycle.

use crate::eventlog::{EventLog, SubscriptionSettings};
use crate::stats::EngineStats;
use crate::worker::{self, WorkerContext};
use bacgate_device::{CovEngine, ObjectRegistry};
use bacgate_store::{SnapshotStore, StoreError};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Default idle poll interval for persistent subscriptions.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Owns the engine's context objects and its worker threads.
pub struct Coordinator {
    ctx: Arc<WorkerContext>,
    stats: Arc<EngineStats>,
    handles: Vec<JoinHandle<()>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<dyn SnapshotStore>,
        registry: Arc<ObjectRegistry>,
        cov: Arc<CovEngine>,
        event_log: Arc<dyn EventLog>,
        shutdown: Arc<AtomicBool>,
        poll_interval: Duration,
    ) -> Self {
        let stats = Arc::new(EngineStats::default());
        Self {
            ctx: Arc::new(WorkerContext {
                store,
                registry,
                cov,
                event_log,
                stats: Arc::clone(&stats),
                shutdown,
                poll_interval,
            }),
            stats,
            handles: Vec::new(),
        }
    }

    pub fn stats(&self) -> Arc<EngineStats> {
        Arc::clone(&self.stats)
    }

    /// Rebuilds the live registry from the snapshot store's object
    /// index. Returns the number of objects restored.
    pub fn recover(&self) -> Result<usize, StoreError> {
        let mut restored = 0;
        for record in self.ctx.store.iterate(None)? {
            let record = record?;
            self.ctx.registry.create_or_replace(record);
            restored += 1;
        }
        log::info!("restored {restored} object(s) from the snapshot store");
        Ok(restored)
    }

    /// Spawns one worker thread per subscription.
    pub fn start(
        &mut self,
        subscriptions: Vec<SubscriptionSettings>,
    ) -> std::io::Result<()> {
        for settings in subscriptions {
            let ctx = Arc::clone(&self.ctx);
            let thread_name = format!("sub-{}", settings.subscription_id);
            let handle = std::thread::Builder::new()
                .name(thread_name)
                .spawn(move || worker::run_worker(&ctx, &settings))?;
            self.handles.push(handle);
        }
        Ok(())
    }

    /// Waits for all workers to finish. Catch-up workers return when
    /// drained; persistent workers return on shutdown.
    pub fn join(&mut self) {
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("subscription worker panicked");
            }
        }
    }
}
