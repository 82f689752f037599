//! Event envelope decoding.
//!
//! Events arrive as JSON documents with a common envelope
//! (`messageType`, `sourceId`, `timestamp`, `streamPosition`,
//! `correlationId`, `payload`) and a variant-specific payload. Required
//! fields fail the decode; optional fields fall back to defaults, even
//! when present with the wrong type.

use crate::error::DecodeError;
use crate::timestamp::parse_iso8601_ms;
use crate::types::{
    DeviceUpdate, ObjectClass, ObjectType, PresentValue, StatusFlags, ValueKind, UNITS_NO_UNITS,
};
use serde_json::Value;

/// Maximum number of state texts a multi-state object may carry.
pub const MAX_STATE_TEXTS: usize = 16;

const MAX_NAME_LEN: usize = 255;
const MAX_DESCRIPTION_LEN: usize = 511;
const MAX_TEXT_LEN: usize = 63;

/// Payload of an `ObjectDefinition` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDefinition {
    pub object_type: ObjectType,
    pub instance: u32,
    pub name: String,
    pub value_kind: ValueKind,
    pub description: String,
    pub units: u16,
    pub units_text: String,
    pub cov_increment: f32,
    pub min_value: f32,
    pub max_value: f32,
    pub state_texts: Vec<String>,
    pub inactive_text: String,
    pub active_text: String,
    pub supports_priority_array: bool,
    pub initial_value: Option<PresentValue>,
}

/// Payload of a `ValueUpdate` event. The value kind is derived from the
/// object type: binary objects carry booleans, multi-state objects carry
/// unsigned state numbers, analog objects carry reals.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueUpdate {
    pub object_type: ObjectType,
    pub instance: u32,
    pub value: PresentValue,
    pub quality: String,
    pub status_flags: Option<StatusFlags>,
    pub priority: Option<u8>,
    pub source_timestamp_ms: Option<i64>,
}

/// Payload of an `ObjectDelete` event.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectDelete {
    pub object_type: ObjectType,
    pub instance: u32,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum EventPayload {
    ObjectDefinition(ObjectDefinition),
    ValueUpdate(ValueUpdate),
    ObjectDelete(ObjectDelete),
    DeviceConfig(DeviceUpdate),
}

/// A decoded event envelope.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    pub source_id: String,
    pub timestamp_ms: Option<i64>,
    pub stream_position: Option<u64>,
    pub correlation_id: Option<String>,
    pub payload: EventPayload,
}

type Fields = serde_json::Map<String, Value>;

/// Decodes one event document.
pub fn decode_event(data: &[u8]) -> Result<EventEnvelope, DecodeError> {
    let root: Value = serde_json::from_slice(data).map_err(|_| DecodeError::InvalidEncoding)?;
    let root = root.as_object().ok_or(DecodeError::InvalidEncoding)?;

    let message_type = require_str(root, "messageType")?;
    let source_id = require_str(root, "sourceId")?.to_owned();

    let timestamp_ms = opt_str(root, "timestamp").and_then(parse_iso8601_ms);
    let stream_position = root.get("streamPosition").and_then(Value::as_u64);
    let correlation_id = opt_str(root, "correlationId").map(str::to_owned);

    let payload = match root.get("payload") {
        Some(Value::Object(fields)) => fields,
        Some(_) => return Err(DecodeError::InvalidType("payload")),
        None => return Err(DecodeError::MissingField("payload")),
    };

    let payload = match message_type {
        "ObjectDefinition" => EventPayload::ObjectDefinition(decode_object_definition(payload)?),
        "ValueUpdate" => EventPayload::ValueUpdate(decode_value_update(payload)?),
        "ObjectDelete" => EventPayload::ObjectDelete(decode_object_delete(payload)?),
        "DeviceConfig" => EventPayload::DeviceConfig(decode_device_config(payload)),
        other => return Err(DecodeError::UnknownMessageType(other.to_owned())),
    };

    Ok(EventEnvelope {
        source_id,
        timestamp_ms,
        stream_position,
        correlation_id,
        payload,
    })
}

fn decode_object_definition(payload: &Fields) -> Result<ObjectDefinition, DecodeError> {
    let object_type = require_object_type(payload)?;
    let instance = require_u32(payload, "objectInstance")?;
    let name = truncated(require_str(payload, "objectName")?, MAX_NAME_LEN);
    let value_kind = ValueKind::from_name(require_str(payload, "presentValueType")?)
        .ok_or(DecodeError::InvalidValue("presentValueType"))?;

    let state_texts = match payload.get("stateTexts") {
        Some(Value::Array(items)) => items
            .iter()
            .take(MAX_STATE_TEXTS)
            .map(|item| truncated(item.as_str().unwrap_or_default(), MAX_TEXT_LEN))
            .collect(),
        _ => Vec::new(),
    };

    let initial_value = payload
        .get("initialValue")
        .and_then(|value| decode_typed_value(value, value_kind));

    Ok(ObjectDefinition {
        object_type,
        instance,
        name,
        value_kind,
        description: truncated(str_or(payload, "description", ""), MAX_DESCRIPTION_LEN),
        units: num_or(payload, "units", f64::from(UNITS_NO_UNITS)).clamp(0.0, 65_535.0) as u16,
        units_text: truncated(str_or(payload, "unitsText", ""), MAX_TEXT_LEN),
        cov_increment: num_or(payload, "covIncrement", 0.0) as f32,
        min_value: num_or(payload, "minPresentValue", 0.0) as f32,
        max_value: num_or(payload, "maxPresentValue", 0.0) as f32,
        state_texts,
        inactive_text: truncated(str_or(payload, "inactiveText", "Inactive"), MAX_TEXT_LEN),
        active_text: truncated(str_or(payload, "activeText", "Active"), MAX_TEXT_LEN),
        supports_priority_array: bool_or(payload, "priorityArray", false),
        initial_value,
    })
}

fn decode_value_update(payload: &Fields) -> Result<ValueUpdate, DecodeError> {
    let object_type = require_object_type(payload)?;
    let instance = require_u32(payload, "objectInstance")?;

    let raw = payload
        .get("presentValue")
        .ok_or(DecodeError::MissingField("presentValue"))?;
    let value = match object_type.class() {
        ObjectClass::Binary => PresentValue::Boolean(truthy(raw)?),
        ObjectClass::MultiState => PresentValue::Unsigned(
            raw.as_f64()
                .ok_or(DecodeError::InvalidType("presentValue"))?
                .clamp(0.0, f64::from(u32::MAX)) as u32,
        ),
        ObjectClass::Analog => PresentValue::Real(
            raw.as_f64()
                .ok_or(DecodeError::InvalidType("presentValue"))? as f32,
        ),
    };

    let status_flags = match payload.get("statusFlags") {
        Some(Value::Object(flags)) => Some(StatusFlags {
            in_alarm: bool_or(flags, "inAlarm", false),
            fault: bool_or(flags, "fault", false),
            overridden: bool_or(flags, "overridden", false),
            out_of_service: bool_or(flags, "outOfService", false),
        }),
        _ => None,
    };

    let priority = payload
        .get("priority")
        .and_then(Value::as_u64)
        .and_then(|p| u8::try_from(p).ok());

    let source_timestamp_ms = opt_str(payload, "sourceTimestamp").and_then(|raw| {
        let parsed = parse_iso8601_ms(raw);
        if parsed.is_none() {
            log::warn!("failed to parse sourceTimestamp {raw:?}");
        }
        parsed
    });

    Ok(ValueUpdate {
        object_type,
        instance,
        value,
        quality: str_or(payload, "quality", "good").to_owned(),
        status_flags,
        priority,
        source_timestamp_ms,
    })
}

fn decode_object_delete(payload: &Fields) -> Result<ObjectDelete, DecodeError> {
    Ok(ObjectDelete {
        object_type: require_object_type(payload)?,
        instance: require_u32(payload, "objectInstance")?,
        reason: truncated(str_or(payload, "reason", ""), MAX_NAME_LEN),
    })
}

fn decode_device_config(payload: &Fields) -> DeviceUpdate {
    let field = |key: &str, max: usize| {
        opt_str(payload, key).map(|value| truncated(value, max))
    };
    DeviceUpdate {
        name: field("deviceName", MAX_NAME_LEN),
        description: field("deviceDescription", MAX_DESCRIPTION_LEN),
        location: field("location", MAX_NAME_LEN),
        model_name: field("modelName", MAX_NAME_LEN),
        vendor_name: field("vendorName", MAX_NAME_LEN),
        application_version: field("applicationSoftwareVersion", MAX_TEXT_LEN),
    }
}

/// Decodes an explicitly-typed value (an `initialValue`) against the
/// declared kind. Undecodable input is treated as absent.
fn decode_typed_value(raw: &Value, kind: ValueKind) -> Option<PresentValue> {
    match kind {
        ValueKind::Real => raw.as_f64().map(|v| PresentValue::Real(v as f32)),
        ValueKind::Signed => raw
            .as_f64()
            .map(|v| PresentValue::Signed(v.clamp(f64::from(i32::MIN), f64::from(i32::MAX)) as i32)),
        ValueKind::Unsigned => raw
            .as_f64()
            .map(|v| PresentValue::Unsigned(v.clamp(0.0, f64::from(u32::MAX)) as u32)),
        ValueKind::Enumerated => raw
            .as_f64()
            .map(|v| PresentValue::Enumerated(v.clamp(0.0, f64::from(u32::MAX)) as u32)),
        ValueKind::Boolean => truthy(raw).ok().map(PresentValue::Boolean),
    }
}

fn truthy(raw: &Value) -> Result<bool, DecodeError> {
    match raw {
        Value::Bool(b) => Ok(*b),
        Value::Number(n) => Ok(n.as_f64().unwrap_or(0.0) != 0.0),
        _ => Err(DecodeError::InvalidType("presentValue")),
    }
}

fn require_object_type(payload: &Fields) -> Result<ObjectType, DecodeError> {
    ObjectType::from_name(require_str(payload, "objectType")?)
        .ok_or(DecodeError::InvalidValue("objectType"))
}

fn require_str<'a>(fields: &'a Fields, key: &'static str) -> Result<&'a str, DecodeError> {
    match fields.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(DecodeError::InvalidType(key)),
        None => Err(DecodeError::MissingField(key)),
    }
}

fn require_u32(fields: &Fields, key: &'static str) -> Result<u32, DecodeError> {
    match fields.get(key) {
        Some(Value::Number(n)) => {
            let value = n.as_f64().unwrap_or(-1.0);
            if (0.0..=f64::from(u32::MAX)).contains(&value) {
                Ok(value as u32)
            } else {
                Err(DecodeError::InvalidValue(key))
            }
        }
        Some(_) => Err(DecodeError::InvalidType(key)),
        None => Err(DecodeError::MissingField(key)),
    }
}

fn opt_str<'a>(fields: &'a Fields, key: &str) -> Option<&'a str> {
    fields.get(key).and_then(Value::as_str)
}

fn str_or<'a>(fields: &'a Fields, key: &str, default: &'a str) -> &'a str {
    opt_str(fields, key).unwrap_or(default)
}

fn num_or(fields: &Fields, key: &str, default: f64) -> f64 {
    fields.get(key).and_then(Value::as_f64).unwrap_or(default)
}

fn bool_or(fields: &Fields, key: &str, default: bool) -> bool {
    fields.get(key).and_then(Value::as_bool).unwrap_or(default)
}

fn truncated(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
