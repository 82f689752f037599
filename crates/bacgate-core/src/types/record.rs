use crate::types::{ObjectType, PresentValue, StatusFlags, ValueKind};
use serde::{Deserialize, Serialize};

/// BACnet engineering-units code for "no units".
pub const UNITS_NO_UNITS: u16 = 95;

/// A materialised BACnet object: descriptor, present value, and COV
/// bookkeeping.
///
/// This is the unit of state held live by the object registry and
/// persisted by the snapshot store. The `(object_type, instance)` pair is
/// unique within both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub object_type: ObjectType,
    pub instance: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub value_kind: ValueKind,
    #[serde(default = "default_units")]
    pub units: u16,
    #[serde(default)]
    pub units_text: String,
    #[serde(default)]
    pub cov_increment: f32,
    #[serde(default)]
    pub min_value: f32,
    #[serde(default)]
    pub max_value: f32,
    #[serde(default)]
    pub state_texts: Vec<String>,
    #[serde(default)]
    pub inactive_text: String,
    #[serde(default)]
    pub active_text: String,
    #[serde(default)]
    pub supports_priority_array: bool,
    #[serde(default)]
    pub present_value: PresentValue,
    #[serde(default)]
    pub status_flags: StatusFlags,
    #[serde(default)]
    pub reliability: u8,
    #[serde(default)]
    pub event_state: u8,
    /// The value last reported to COV subscribers. Advanced only after a
    /// notification fanout for this object.
    #[serde(default)]
    pub last_cov_value: PresentValue,
    #[serde(default)]
    pub last_update_ms: i64,
    #[serde(default)]
    pub source_id: String,
    /// Stream position of the event that produced the current state;
    /// non-decreasing for a given object within one subscription.
    #[serde(default)]
    pub stream_position: u64,
}

fn default_units() -> u16 {
    UNITS_NO_UNITS
}

impl ObjectRecord {
    /// The registry/store identity of this record.
    pub fn key(&self) -> (ObjectType, u32) {
        (self.object_type, self.instance)
    }
}
