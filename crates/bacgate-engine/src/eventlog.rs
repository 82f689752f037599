//! The event-log subscription contract.
//!
//! The gateway never writes to the event log; it only pulls batches,
//! acknowledges what it applied, and NAKs what must be redelivered.

use std::time::Duration;
use thiserror::Error;

/// Where a subscription starts when no stored cursor overrides it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFrom {
    Begin,
    End,
    Position(u64),
}

/// Static configuration of one event-log subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSettings {
    /// Also the cursor key in the snapshot store.
    pub subscription_id: String,
    pub stream_name: String,
    /// Consumer-group name. Presence selects persistent semantics:
    /// server-maintained delivery with per-event ACK/NAK and competing
    /// consumers; absence selects a catch-up read that ends when the
    /// stream is drained.
    pub group_name: Option<String>,
    pub start_from: StartFrom,
    /// Added to every object instance arriving on this subscription,
    /// exactly once, before any lookup.
    pub instance_offset: u32,
}

/// One event as pulled from the log.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEvent {
    pub event_id: String,
    pub stream_name: String,
    /// Monotonic position of the event within its stream.
    pub revision: u64,
    pub created_ms: i64,
    pub data: Vec<u8>,
    /// Backend acknowledgement token, carried as first-class data on the
    /// event record.
    pub ack_token: Option<String>,
}

#[derive(Debug, Error)]
pub enum EventLogError {
    #[error("event log connect failed: {0}")]
    Connect(String),
    #[error("event log authentication failed: {0}")]
    Auth(String),
    #[error("event log read timed out")]
    Timeout,
    #[error("subscription closed")]
    Closed,
    #[error("event log transport error: {0}")]
    Transport(String),
}

/// A source of event streams.
pub trait EventLog: Send + Sync {
    /// Opens a subscription. `start_from` reflects any stored-cursor
    /// override computed by the caller and takes precedence over
    /// `settings.start_from`.
    fn subscribe(
        &self,
        settings: &SubscriptionSettings,
        start_from: StartFrom,
    ) -> Result<Box<dyn EventStream>, EventLogError>;
}

/// An open subscription.
pub trait EventStream: Send {
    /// Pulls up to `max_count` events, waiting at most `timeout`.
    ///
    /// An empty batch means the stream is drained (catch-up) or simply
    /// idle (persistent).
    fn next_batch(
        &mut self,
        max_count: usize,
        timeout: Duration,
    ) -> Result<Vec<RecordedEvent>, EventLogError>;

    /// Acknowledges a processed event. A no-op for catch-up streams.
    fn ack(&mut self, event: &RecordedEvent) -> Result<(), EventLogError>;

    /// Rejects an event for redelivery. A no-op for catch-up streams.
    fn nak(&mut self, event: &RecordedEvent, reason: &str) -> Result<(), EventLogError>;
}
