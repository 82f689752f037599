//! Persistent snapshot store for the materialised object graph.
//!
//! The store keeps durable copies of every object record, a set-valued
//! object index, per-subscription stream cursors, and the device
//! metadata. [`RedisStore`] is the production backend; [`MemoryStore`]
//! backs tests and recovery checks.

pub mod error;
pub mod keys;
pub mod memory;
pub mod redis;

pub use error::StoreError;
pub use keys::KeySchema;
pub use memory::MemoryStore;
pub use self::redis::{RedisOptions, RedisStore};

use bacgate_core::{DeviceInfo, ObjectRecord, ObjectType, PresentValue, StatusFlags};

pub type StoreResult<T> = Result<T, StoreError>;

/// Key-value snapshot of the derived BACnet object graph.
///
/// Operations are individually atomic; there is no multi-key
/// transaction. A value update may land while the following cursor
/// commit fails, so every operation must tolerate being replayed.
pub trait SnapshotStore: Send + Sync {
    /// Persists a complete record and adds its identity to the index set.
    fn store_object(&self, record: &ObjectRecord) -> StoreResult<()>;

    /// Loads one record, or [`StoreError::NotFound`].
    fn load_object(&self, object_type: ObjectType, instance: u32) -> StoreResult<ObjectRecord>;

    /// Updates present value, status flags, and update timestamp of a
    /// stored record, atomically relative to other writers of the key.
    fn update_value(
        &self,
        object_type: ObjectType,
        instance: u32,
        value: PresentValue,
        flags: Option<StatusFlags>,
        timestamp_ms: i64,
    ) -> StoreResult<()>;

    /// Removes a record and its index entry. Deleting a record that does
    /// not exist succeeds.
    fn delete_object(&self, object_type: ObjectType, instance: u32) -> StoreResult<()>;

    /// Iterates stored records, optionally filtered by object type.
    ///
    /// The sequence is lazy; losing the connection mid-iteration yields
    /// an `Err` item after the records read so far.
    fn iterate(
        &self,
        filter: Option<ObjectType>,
    ) -> StoreResult<Box<dyn Iterator<Item = StoreResult<ObjectRecord>> + '_>>;

    /// Overwrites the stored stream cursor for a subscription.
    fn store_cursor(&self, subscription_id: &str, position: u64) -> StoreResult<()>;

    /// Loads the stream cursor for a subscription, or
    /// [`StoreError::NotFound`].
    fn load_cursor(&self, subscription_id: &str) -> StoreResult<u64>;

    /// Persists the device metadata record.
    fn store_device_meta(&self, info: &DeviceInfo) -> StoreResult<()>;

    /// Best-effort advisory publication of a value change; never fails.
    fn publish_change(&self, object_type: ObjectType, instance: u32);
}
