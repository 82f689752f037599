//! Shared object model and event decoding for the bacgate gateway.
//!
//! The gateway materialises an event-sourced stream of building-automation
//! data into a live BACnet device. This crate holds what every other part
//! needs: the BACnet object model ([`types`]), the event envelope decoder
//! ([`event`]), and the ISO 8601 timestamp parser ([`timestamp`]).

pub mod error;
pub mod event;
pub mod timestamp;
pub mod types;

pub use error::DecodeError;
pub use event::{
    decode_event, EventEnvelope, EventPayload, ObjectDefinition, ObjectDelete, ValueUpdate,
};
pub use types::{
    DeviceInfo, DeviceUpdate, ObjectClass, ObjectRecord, ObjectType, PresentValue, StatusFlags,
    ValueKind,
};
