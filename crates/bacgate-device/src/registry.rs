//! The in-memory registry of live BACnet objects.
//!
//! One exclusive lock guards the whole object map; every operation
//! acquires it and copies data out rather than holding the lock across
//! calls into other components. When both the registry and the COV
//! engine are involved, the registry lock is always taken first.

use crate::error::RegistryError;
use bacgate_core::{DeviceInfo, DeviceUpdate, ObjectRecord, ObjectType, PresentValue, StatusFlags};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// A write arriving from the BACnet side, offered to the write hook.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteRequest {
    pub object_type: ObjectType,
    pub instance: u32,
    pub property: u32,
    pub value: PresentValue,
}

/// The hook consulted for wire-side writes. Returning `false` rejects
/// the write without touching the registry.
pub type WriteHook = Arc<dyn Fn(&WriteRequest) -> bool + Send + Sync>;

/// Result of applying a value update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueChange {
    pub old: PresentValue,
    pub new: PresentValue,
    /// Whether the change crossed the COV threshold (or flipped a status
    /// flag) and should be fanned out to subscribers.
    pub cov_triggered: bool,
}

pub struct ObjectRegistry {
    objects: Mutex<HashMap<(ObjectType, u32), ObjectRecord>>,
    device: Mutex<DeviceInfo>,
    write_hook: Mutex<Option<WriteHook>>,
}

impl ObjectRegistry {
    pub fn new(device: DeviceInfo) -> Self {
        Self {
            objects: Mutex::new(HashMap::new()),
            device: Mutex::new(device),
            write_hook: Mutex::new(None),
        }
    }

    /// The current device metadata.
    pub fn device(&self) -> DeviceInfo {
        self.device.lock().clone()
    }

    /// Applies a partial device-metadata update and returns the result.
    pub fn apply_device_update(&self, update: &DeviceUpdate) -> DeviceInfo {
        let mut device = self.device.lock();
        device.apply(update);
        device.clone()
    }

    /// Registers the hook consulted for wire-side writes.
    pub fn set_write_hook(&self, hook: WriteHook) {
        *self.write_hook.lock() = Some(hook);
    }

    /// Installs or overwrites an object.
    ///
    /// Overwriting resets `last_cov_value` to the new present value so a
    /// redefinition never produces a spurious notification.
    pub fn create_or_replace(&self, mut record: ObjectRecord) {
        record.last_cov_value = record.present_value;
        self.objects.lock().insert(record.key(), record);
    }

    pub fn contains(&self, object_type: ObjectType, instance: u32) -> bool {
        self.objects.lock().contains_key(&(object_type, instance))
    }

    pub fn read(&self, object_type: ObjectType, instance: u32) -> Option<ObjectRecord> {
        self.objects.lock().get(&(object_type, instance)).cloned()
    }

    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.lock().is_empty()
    }

    /// A snapshot of all records at call time; concurrent mutations are
    /// not observed by the returned vector.
    pub fn iterate(&self) -> Vec<ObjectRecord> {
        self.objects.lock().values().cloned().collect()
    }

    /// Checks a candidate value against the declared kind without
    /// mutating anything.
    pub fn validate_value(
        &self,
        object_type: ObjectType,
        instance: u32,
        value: &PresentValue,
    ) -> Result<(), RegistryError> {
        let objects = self.objects.lock();
        let record = objects
            .get(&(object_type, instance))
            .ok_or(RegistryError::NotFound {
                object_type,
                instance,
            })?;
        if value.matches(record.value_kind) {
            Ok(())
        } else {
            Err(RegistryError::TypeMismatch {
                object_type,
                instance,
                declared: record.value_kind,
                offered: value.kind(),
            })
        }
    }

    /// Applies a value update, returning the old and new values and the
    /// COV trigger decision.
    pub fn update_value(
        &self,
        object_type: ObjectType,
        instance: u32,
        value: PresentValue,
        flags: Option<StatusFlags>,
    ) -> Result<ValueChange, RegistryError> {
        let mut objects = self.objects.lock();
        let record = objects
            .get_mut(&(object_type, instance))
            .ok_or(RegistryError::NotFound {
                object_type,
                instance,
            })?;
        if !value.matches(record.value_kind) {
            return Err(RegistryError::TypeMismatch {
                object_type,
                instance,
                declared: record.value_kind,
                offered: value.kind(),
            });
        }

        let flags_changed = flags.map_or(false, |flags| flags != record.status_flags);
        let cov_triggered = flags_changed
            || exceeds_increment(record.cov_increment, record.last_cov_value, value);

        let old = record.present_value;
        record.present_value = value;
        if let Some(flags) = flags {
            record.status_flags = flags;
        }

        Ok(ValueChange {
            old,
            new: value,
            cov_triggered,
        })
    }

    /// Advances `last_cov_value` after a fanout attempt for the object.
    pub fn commit_cov_value(&self, object_type: ObjectType, instance: u32, value: PresentValue) {
        if let Some(record) = self.objects.lock().get_mut(&(object_type, instance)) {
            record.last_cov_value = value;
        }
    }

    /// Removes an object; returns whether one was there.
    pub fn delete(&self, object_type: ObjectType, instance: u32) -> bool {
        self.objects.lock().remove(&(object_type, instance)).is_some()
    }

    /// Applies a present-value write arriving from a BACnet client.
    ///
    /// The registered write hook is consulted first; with no hook the
    /// write applies locally with the same COV evaluation as an upstream
    /// update.
    pub fn write_from_wire(
        &self,
        object_type: ObjectType,
        instance: u32,
        property: u32,
        value: PresentValue,
    ) -> Result<ValueChange, RegistryError> {
        self.validate_value(object_type, instance, &value)?;

        let hook = self.write_hook.lock().clone();
        let accepted = match hook {
            Some(hook) => hook(&WriteRequest {
                object_type,
                instance,
                property,
                value,
            }),
            None => true,
        };
        if !accepted {
            return Err(RegistryError::WriteDenied {
                object_type,
                instance,
            });
        }

        self.update_value(object_type, instance, value, None)
    }
}

/// The COV trigger law: with a non-positive increment any coerced
/// inequality triggers; otherwise the absolute delta against the last
/// reported value must reach the increment.
fn exceeds_increment(increment: f32, last_reported: PresentValue, candidate: PresentValue) -> bool {
    let last = last_reported.as_f64();
    let next = candidate.as_f64();
    if increment <= 0.0 {
        last != next
    } else {
        (next - last).abs() >= f64::from(increment)
    }
}
