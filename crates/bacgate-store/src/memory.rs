//! In-memory snapshot store.
//!
//! Backs the test suites and recovery-equivalence checks with the same
//! contract as the Redis store, plus write-failure injection for
//! exercising the coordinator's NAK path.

use crate::{SnapshotStore, StoreError, StoreResult};
use bacgate_core::{DeviceInfo, ObjectRecord, ObjectType, PresentValue, StatusFlags};
use parking_lot::Mutex;
use std::collections::HashMap;

#[derive(Default)]
struct Inner {
    objects: HashMap<(ObjectType, u32), ObjectRecord>,
    cursors: HashMap<String, u64>,
    device: Option<DeviceInfo>,
    published: Vec<(ObjectType, u32)>,
    fail_writes: bool,
    fail_cursor: bool,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent write fail with a connection error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.inner.lock().fail_writes = fail;
    }

    /// Makes only cursor stores fail, leaving object writes working.
    pub fn set_fail_cursor(&self, fail: bool) {
        self.inner.lock().fail_cursor = fail;
    }

    /// Identities published to the advisory change channel so far.
    pub fn published(&self) -> Vec<(ObjectType, u32)> {
        self.inner.lock().published.clone()
    }

    /// The stored device metadata, if any was written.
    pub fn device_meta(&self) -> Option<DeviceInfo> {
        self.inner.lock().device.clone()
    }

    pub fn object_count(&self) -> usize {
        self.inner.lock().objects.len()
    }

    fn check_writable(inner: &Inner) -> StoreResult<()> {
        if inner.fail_writes {
            Err(StoreError::Connection("write failure injected".to_owned()))
        } else {
            Ok(())
        }
    }
}

impl SnapshotStore for MemoryStore {
    fn store_object(&self, record: &ObjectRecord) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        inner.objects.insert(record.key(), record.clone());
        Ok(())
    }

    fn load_object(&self, object_type: ObjectType, instance: u32) -> StoreResult<ObjectRecord> {
        self.inner
            .lock()
            .objects
            .get(&(object_type, instance))
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    fn update_value(
        &self,
        object_type: ObjectType,
        instance: u32,
        value: PresentValue,
        flags: Option<StatusFlags>,
        timestamp_ms: i64,
    ) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        let record = inner
            .objects
            .get_mut(&(object_type, instance))
            .ok_or(StoreError::NotFound)?;
        record.present_value = value;
        if let Some(flags) = flags {
            record.status_flags = flags;
        }
        record.last_update_ms = timestamp_ms;
        Ok(())
    }

    fn delete_object(&self, object_type: ObjectType, instance: u32) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        inner.objects.remove(&(object_type, instance));
        Ok(())
    }

    fn iterate(
        &self,
        filter: Option<ObjectType>,
    ) -> StoreResult<Box<dyn Iterator<Item = StoreResult<ObjectRecord>> + '_>> {
        let records: Vec<ObjectRecord> = self
            .inner
            .lock()
            .objects
            .values()
            .filter(|record| filter.map_or(true, |wanted| record.object_type == wanted))
            .cloned()
            .collect();
        Ok(Box::new(records.into_iter().map(Ok)))
    }

    fn store_cursor(&self, subscription_id: &str, position: u64) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        if inner.fail_cursor {
            return Err(StoreError::Connection("cursor failure injected".to_owned()));
        }
        inner.cursors.insert(subscription_id.to_owned(), position);
        Ok(())
    }

    fn load_cursor(&self, subscription_id: &str) -> StoreResult<u64> {
        self.inner
            .lock()
            .cursors
            .get(subscription_id)
            .copied()
            .ok_or(StoreError::NotFound)
    }

    fn store_device_meta(&self, info: &DeviceInfo) -> StoreResult<()> {
        let mut inner = self.inner.lock();
        Self::check_writable(&inner)?;
        inner.device = Some(info.clone());
        Ok(())
    }

    fn publish_change(&self, object_type: ObjectType, instance: u32) {
        self.inner.lock().published.push((object_type, instance));
    }
}

#[cfg(test)]
mod tests {
    use super::MemoryStore;
    use crate::{SnapshotStore, StoreError};
    use bacgate_core::{ObjectRecord, ObjectType, PresentValue, StatusFlags, ValueKind};

    fn record(instance: u32) -> ObjectRecord {
        ObjectRecord {
            object_type: ObjectType::AnalogInput,
            instance,
            name: format!("AI-{instance}"),
            description: String::new(),
            value_kind: ValueKind::Real,
            units: 95,
            units_text: String::new(),
            cov_increment: 0.0,
            min_value: 0.0,
            max_value: 0.0,
            state_texts: Vec::new(),
            inactive_text: String::new(),
            active_text: String::new(),
            supports_priority_array: false,
            present_value: PresentValue::Real(0.0),
            status_flags: StatusFlags::default(),
            reliability: 0,
            event_state: 0,
            last_cov_value: PresentValue::Real(0.0),
            last_update_ms: 0,
            source_id: "test".to_owned(),
            stream_position: 0,
        }
    }

    #[test]
    fn store_load_delete_roundtrip() {
        let store = MemoryStore::new();
        store.store_object(&record(1)).unwrap();
        let loaded = store.load_object(ObjectType::AnalogInput, 1).unwrap();
        assert_eq!(loaded.name, "AI-1");

        store.delete_object(ObjectType::AnalogInput, 1).unwrap();
        assert!(matches!(
            store.load_object(ObjectType::AnalogInput, 1),
            Err(StoreError::NotFound)
        ));
        // Idempotent delete.
        store.delete_object(ObjectType::AnalogInput, 1).unwrap();
    }

    #[test]
    fn update_value_requires_existing_record() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.update_value(ObjectType::AnalogInput, 7, PresentValue::Real(1.0), None, 0),
            Err(StoreError::NotFound)
        ));

        store.store_object(&record(7)).unwrap();
        store
            .update_value(
                ObjectType::AnalogInput,
                7,
                PresentValue::Real(21.5),
                Some(StatusFlags {
                    fault: true,
                    ..StatusFlags::default()
                }),
                1_000,
            )
            .unwrap();
        let loaded = store.load_object(ObjectType::AnalogInput, 7).unwrap();
        assert_eq!(loaded.present_value, PresentValue::Real(21.5));
        assert!(loaded.status_flags.fault);
        assert_eq!(loaded.last_update_ms, 1_000);
    }

    #[test]
    fn iterate_honours_type_filter() {
        let store = MemoryStore::new();
        store.store_object(&record(1)).unwrap();
        let mut other = record(2);
        other.object_type = ObjectType::BinaryInput;
        store.store_object(&other).unwrap();

        let all: Vec<_> = store.iterate(None).unwrap().collect();
        assert_eq!(all.len(), 2);

        let binary: Vec<_> = store
            .iterate(Some(ObjectType::BinaryInput))
            .unwrap()
            .map(Result::unwrap)
            .collect();
        assert_eq!(binary.len(), 1);
        assert_eq!(binary[0].instance, 2);
    }

    #[test]
    fn injected_write_failures_surface_as_connection_errors() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        assert!(matches!(
            store.store_object(&record(1)),
            Err(StoreError::Connection(_))
        ));
        assert!(matches!(
            store.store_cursor("sub", 4),
            Err(StoreError::Connection(_))
        ));
    }
}
