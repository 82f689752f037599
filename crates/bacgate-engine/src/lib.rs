//! The materialisation engine: event-log subscriptions driving the live
//! BACnet device and its persistent snapshot.
//!
//! [`Coordinator`] owns the context objects (store, registry, COV
//! engine, event log), rebuilds the device from the snapshot at startup,
//! and runs one worker thread per configured subscription. Workers pull
//! event batches, decode them, apply them with an instance offset, and
//! commit stream cursors; poison events are acknowledged and counted,
//! apply failures are NAKed for redelivery.

pub mod coordinator;
pub mod error;
pub mod eventlog;
pub mod memory;
pub mod redis;
pub mod stats;
mod worker;

pub use coordinator::Coordinator;
pub use error::ApplyError;
pub use eventlog::{
    EventLog, EventLogError, EventStream, RecordedEvent, StartFrom, SubscriptionSettings,
};
pub use memory::InMemoryEventLog;
pub use self::redis::RedisEventLog;
pub use stats::{EngineStats, StatsSnapshot};
