//! Per-subscription worker loop.
//!
//! Each worker owns one event-log subscription: it resolves the stored
//! cursor, pulls batches in arrival order, decodes, applies with the
//! configured instance offset, ACKs or NAKs, and commits the cursor.
//! Cursor-store failures are logged but never NAK an already-applied
//! event; redelivery is tolerated because every sink operation is
//! idempotent.

use crate::error::ApplyError;
use crate::eventlog::{
    EventLog, EventLogError, EventStream, RecordedEvent, StartFrom, SubscriptionSettings,
};
use crate::stats::EngineStats;
use bacgate_core::{
    decode_event, EventEnvelope, EventPayload, ObjectDefinition, ObjectRecord, PresentValue,
    StatusFlags,
};
use bacgate_device::{CovEngine, ObjectRegistry};
use bacgate_store::SnapshotStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const BATCH_PERSISTENT: usize = 10;
const BATCH_CATCHUP: usize = 100;
const BACKOFF_START: Duration = Duration::from_secs(5);
const BACKOFF_CAP: Duration = Duration::from_secs(60);
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Everything a worker needs, owned by the coordinator.
pub(crate) struct WorkerContext {
    pub store: Arc<dyn SnapshotStore>,
    pub registry: Arc<ObjectRegistry>,
    pub cov: Arc<CovEngine>,
    pub event_log: Arc<dyn EventLog>,
    pub stats: Arc<EngineStats>,
    pub shutdown: Arc<AtomicBool>,
    pub poll_interval: Duration,
}

impl WorkerContext {
    fn shutting_down(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

enum PumpExit {
    CaughtUp,
    Shutdown,
    Failed(EventLogError),
}

pub(crate) fn run_worker(ctx: &WorkerContext, settings: &SubscriptionSettings) {
    let mut backoff = Backoff::new();
    let mut last_cursor = None;

    while !ctx.shutting_down() {
        let start_from = resolve_start(ctx, settings);
        let mut stream = match ctx.event_log.subscribe(settings, start_from) {
            Ok(stream) => {
                backoff.reset();
                stream
            }
            Err(err) => {
                let delay = backoff.next();
                log::warn!(
                    "subscription {}: subscribe failed: {err}; retrying in {delay:?}",
                    settings.subscription_id
                );
                if !sleep_with_shutdown(ctx, delay) {
                    return;
                }
                continue;
            }
        };
        log::info!(
            "subscription {} attached to {} (offset {}, {:?})",
            settings.subscription_id,
            settings.stream_name,
            settings.instance_offset,
            start_from,
        );

        match pump(ctx, settings, stream.as_mut(), &mut last_cursor) {
            PumpExit::CaughtUp => {
                log::info!("subscription {} caught up", settings.subscription_id);
                return;
            }
            PumpExit::Shutdown => return,
            PumpExit::Failed(err) => {
                let delay = backoff.next();
                log::warn!(
                    "subscription {}: stream failed: {err}; reconnecting in {delay:?}",
                    settings.subscription_id
                );
                if !sleep_with_shutdown(ctx, delay) {
                    return;
                }
            }
        }
    }
}

/// The stored cursor overrides the configured start: resume one past the
/// last applied event. A missing cursor is a fresh start.
fn resolve_start(ctx: &WorkerContext, settings: &SubscriptionSettings) -> StartFrom {
    match ctx.store.load_cursor(&settings.subscription_id) {
        Ok(position) => StartFrom::Position(position + 1),
        Err(err) if err.is_not_found() => settings.start_from,
        Err(err) => {
            log::warn!(
                "subscription {}: cursor load failed ({err}); using configured start",
                settings.subscription_id
            );
            settings.start_from
        }
    }
}

fn pump(
    ctx: &WorkerContext,
    settings: &SubscriptionSettings,
    stream: &mut dyn EventStream,
    last_cursor: &mut Option<u64>,
) -> PumpExit {
    let persistent = settings.group_name.is_some();
    let batch_size = if persistent {
        BATCH_PERSISTENT
    } else {
        BATCH_CATCHUP
    };

    loop {
        if ctx.shutting_down() {
            return PumpExit::Shutdown;
        }
        let batch = match stream.next_batch(batch_size, ctx.poll_interval) {
            Ok(batch) => batch,
            Err(EventLogError::Timeout) => Vec::new(),
            Err(err) => return PumpExit::Failed(err),
        };
        if batch.is_empty() {
            if persistent {
                continue;
            }
            return PumpExit::CaughtUp;
        }
        for event in &batch {
            if ctx.shutting_down() {
                return PumpExit::Shutdown;
            }
            handle_event(ctx, settings, stream, event, last_cursor);
        }
    }
}

fn handle_event(
    ctx: &WorkerContext,
    settings: &SubscriptionSettings,
    stream: &mut dyn EventStream,
    event: &RecordedEvent,
    last_cursor: &mut Option<u64>,
) {
    let envelope = match decode_event(&event.data) {
        Ok(envelope) => envelope,
        Err(err) => {
            // Poison event: acknowledge so it cannot block the stream.
            log::warn!(
                "subscription {}: dropping undecodable event {}: {err}",
                settings.subscription_id,
                event.event_id
            );
            ctx.stats.messages_failed.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = stream.ack(event) {
                log::warn!(
                    "subscription {}: ack of poison event failed: {err}",
                    settings.subscription_id
                );
            }
            return;
        }
    };

    match apply(ctx, settings, &envelope, event) {
        Ok(()) => {
            ctx.stats.messages_processed.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = stream.ack(event) {
                log::warn!(
                    "subscription {}: ack failed: {err}",
                    settings.subscription_id
                );
            }
            commit_cursor(ctx, settings, event.revision, last_cursor);
        }
        Err(err) => {
            log::warn!(
                "subscription {}: apply failed at revision {}: {err}",
                settings.subscription_id,
                event.revision
            );
            ctx.stats.events_retried.fetch_add(1, Ordering::Relaxed);
            if let Err(err) = stream.nak(event, &err.to_string()) {
                log::warn!(
                    "subscription {}: nak failed: {err}",
                    settings.subscription_id
                );
            }
        }
    }
}

/// Commits the cursor, keeping it monotonic even when NAK redelivery
/// reorders events.
fn commit_cursor(
    ctx: &WorkerContext,
    settings: &SubscriptionSettings,
    revision: u64,
    last_cursor: &mut Option<u64>,
) {
    if last_cursor.map_or(false, |last| revision <= last) {
        return;
    }
    match ctx.store.store_cursor(&settings.subscription_id, revision) {
        Ok(()) => *last_cursor = Some(revision),
        Err(err) => {
            // The event is already applied and acknowledged; redelivery
            // after a restart replays into an idempotent sink.
            log::warn!(
                "subscription {}: cursor store failed at {revision}: {err}",
                settings.subscription_id
            );
            ctx.stats.cursor_failures.fetch_add(1, Ordering::Relaxed);
        }
    }
}

fn apply(
    ctx: &WorkerContext,
    settings: &SubscriptionSettings,
    envelope: &EventEnvelope,
    event: &RecordedEvent,
) -> Result<(), ApplyError> {
    let offset = settings.instance_offset;

    match &envelope.payload {
        EventPayload::ObjectDefinition(definition) => {
            let record = build_record(definition, offset, envelope, event);
            ctx.store.store_object(&record)?;
            log::info!(
                "defined object {}:{} ({})",
                record.object_type,
                record.instance,
                record.name
            );
            ctx.registry.create_or_replace(record);
        }
        EventPayload::ValueUpdate(update) => {
            let instance = update.instance.wrapping_add(offset);
            let timestamp = update
                .source_timestamp_ms
                .or(envelope.timestamp_ms)
                .unwrap_or_else(now_ms);
            // Validate against the registry first so a type mismatch
            // mutates neither sink.
            ctx.registry
                .validate_value(update.object_type, instance, &update.value)?;
            ctx.store.update_value(
                update.object_type,
                instance,
                update.value,
                update.status_flags,
                timestamp,
            )?;
            let change = ctx.registry.update_value(
                update.object_type,
                instance,
                update.value,
                update.status_flags,
            )?;
            if change.cov_triggered {
                ctx.cov.fanout(&ctx.registry, update.object_type, instance);
                ctx.store.publish_change(update.object_type, instance);
            }
        }
        EventPayload::ObjectDelete(delete) => {
            let instance = delete.instance.wrapping_add(offset);
            ctx.store.delete_object(delete.object_type, instance)?;
            let removed = ctx.registry.delete(delete.object_type, instance);
            ctx.cov.drop_object(delete.object_type, instance);
            if removed {
                log::info!(
                    "deleted object {}:{instance} ({})",
                    delete.object_type,
                    if delete.reason.is_empty() {
                        "no reason given"
                    } else {
                        &delete.reason
                    }
                );
            }
        }
        EventPayload::DeviceConfig(update) => {
            let info = ctx.registry.apply_device_update(update);
            ctx.store.store_device_meta(&info)?;
        }
    }
    Ok(())
}

fn build_record(
    definition: &ObjectDefinition,
    offset: u32,
    envelope: &EventEnvelope,
    event: &RecordedEvent,
) -> ObjectRecord {
    let present_value = definition
        .initial_value
        .unwrap_or_else(|| PresentValue::zero_of(definition.value_kind));
    ObjectRecord {
        object_type: definition.object_type,
        instance: definition.instance.wrapping_add(offset),
        name: definition.name.clone(),
        description: definition.description.clone(),
        value_kind: definition.value_kind,
        units: definition.units,
        units_text: definition.units_text.clone(),
        cov_increment: definition.cov_increment,
        min_value: definition.min_value,
        max_value: definition.max_value,
        state_texts: definition.state_texts.clone(),
        inactive_text: definition.inactive_text.clone(),
        active_text: definition.active_text.clone(),
        supports_priority_array: definition.supports_priority_array,
        present_value,
        status_flags: StatusFlags::default(),
        reliability: 0,
        event_state: 0,
        last_cov_value: present_value,
        last_update_ms: envelope.timestamp_ms.unwrap_or_else(now_ms),
        source_id: envelope.source_id.clone(),
        stream_position: event.revision,
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Sleeps in shutdown-aware slices; returns `false` when shutting down.
fn sleep_with_shutdown(ctx: &WorkerContext, duration: Duration) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if ctx.shutting_down() {
            return false;
        }
        let slice = remaining.min(SHUTDOWN_POLL);
        std::thread::sleep(slice);
        remaining -= slice;
    }
    !ctx.shutting_down()
}

struct Backoff {
    delay: Duration,
}

impl Backoff {
    fn new() -> Self {
        Self {
            delay: BACKOFF_START,
        }
    }

    fn reset(&mut self) {
        self.delay = BACKOFF_START;
    }

    fn next(&mut self) -> Duration {
        let delay = self.delay;
        self.delay = (delay * 2).min(BACKOFF_CAP);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::Backoff;
    use std::time::Duration;

    #[test]
    fn backoff_doubles_to_the_cap() {
        let mut backoff = Backoff::new();
        let delays: Vec<u64> = (0..6).map(|_| backoff.next().as_secs()).collect();
        assert_eq!(delays, vec![5, 10, 20, 40, 60, 60]);

        backoff.reset();
        assert_eq!(backoff.next(), Duration::from_secs(5));
    }
}
