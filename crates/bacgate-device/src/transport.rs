//! Decoded BACnet service model and the wire transport traits.
//!
//! The raw codec lives in [`crate::wire`]; everything above it works in
//! terms of the decoded [`ServiceRequest`]/[`ServiceReply`] types defined
//! here, so the wire can be swapped for the in-process channel transport
//! in tests.

use bacgate_core::{ObjectType, PresentValue, StatusFlags};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Maximum length of an opaque peer address.
pub const MAX_ADDRESS_LEN: usize = 32;

/// BACnet service choice numbers for the services the gateway handles.
pub mod service {
    pub const I_AM: u8 = 0x00;
    pub const WHO_IS: u8 = 0x08;
    pub const CONFIRMED_COV_NOTIFICATION: u8 = 0x01;
    pub const UNCONFIRMED_COV_NOTIFICATION: u8 = 0x02;
    pub const SUBSCRIBE_COV: u8 = 0x05;
    pub const READ_PROPERTY: u8 = 0x0C;
    pub const READ_PROPERTY_MULTIPLE: u8 = 0x0E;
    pub const WRITE_PROPERTY: u8 = 0x0F;
    pub const SUBSCRIBE_COV_PROPERTY: u8 = 0x1C;
}

/// BACnet property identifiers the gateway serves.
pub mod property {
    pub const ACTIVE_TEXT: u32 = 4;
    pub const APPLICATION_SOFTWARE_VERSION: u32 = 12;
    pub const COV_INCREMENT: u32 = 22;
    pub const DESCRIPTION: u32 = 28;
    pub const EVENT_STATE: u32 = 36;
    pub const INACTIVE_TEXT: u32 = 46;
    pub const LOCATION: u32 = 58;
    pub const MAX_PRES_VALUE: u32 = 65;
    pub const MIN_PRES_VALUE: u32 = 69;
    pub const MODEL_NAME: u32 = 70;
    pub const NUMBER_OF_STATES: u32 = 74;
    pub const OBJECT_IDENTIFIER: u32 = 75;
    pub const OBJECT_LIST: u32 = 76;
    pub const OBJECT_NAME: u32 = 77;
    pub const OBJECT_TYPE: u32 = 79;
    pub const OUT_OF_SERVICE: u32 = 81;
    pub const PRESENT_VALUE: u32 = 85;
    pub const RELIABILITY: u32 = 103;
    pub const STATE_TEXT: u32 = 110;
    pub const STATUS_FLAGS: u32 = 111;
    pub const SYSTEM_STATUS: u32 = 112;
    pub const UNITS: u32 = 117;
    pub const VENDOR_IDENTIFIER: u32 = 120;
    pub const VENDOR_NAME: u32 = 121;
}

/// The BACnet object-type code of the Device object.
pub const DEVICE_TYPE_CODE: u16 = 8;

/// Opaque network address of a BACnet peer.
///
/// The gateway treats addresses as byte strings; the UDP transport packs
/// IP and port into them, the channel transport uses arbitrary labels.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PeerAddress(Vec<u8>);

impl PeerAddress {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, TransportError> {
        let bytes = bytes.into();
        if bytes.len() > MAX_ADDRESS_LEN {
            return Err(TransportError::AddressTooLong(bytes.len()));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Internal constructor for addresses the transport packed itself,
    /// which are within the bound by construction.
    pub(crate) fn from_raw(bytes: Vec<u8>) -> Self {
        debug_assert!(bytes.len() <= MAX_ADDRESS_LEN);
        Self(bytes)
    }
}

impl fmt::Debug for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerAddress(")?;
        for byte in &self.0 {
            write!(f, "{byte:02x}")?;
        }
        write!(f, ")")
    }
}

/// An object identity as it appears on the wire, including the Device
/// object and types the gateway does not materialise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireObject {
    Device { instance: u32 },
    Standard { object_type: ObjectType, instance: u32 },
    Unknown { type_code: u16, instance: u32 },
}

impl WireObject {
    pub fn from_code(type_code: u16, instance: u32) -> Self {
        if type_code == DEVICE_TYPE_CODE {
            Self::Device { instance }
        } else {
            match ObjectType::from_u16(type_code) {
                Some(object_type) => Self::Standard {
                    object_type,
                    instance,
                },
                None => Self::Unknown {
                    type_code,
                    instance,
                },
            }
        }
    }

    pub fn type_code(self) -> u16 {
        match self {
            Self::Device { .. } => DEVICE_TYPE_CODE,
            Self::Standard { object_type, .. } => object_type.to_u16(),
            Self::Unknown { type_code, .. } => type_code,
        }
    }

    pub fn instance(self) -> u32 {
        match self {
            Self::Device { instance }
            | Self::Standard { instance, .. }
            | Self::Unknown { instance, .. } => instance,
        }
    }
}

/// An owned BACnet application data value served over the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Null,
    Boolean(bool),
    Unsigned(u32),
    Signed(i32),
    Real(f32),
    Enumerated(u32),
    CharacterString(String),
    BitString { unused_bits: u8, data: Vec<u8> },
    ObjectId { type_code: u16, instance: u32 },
    List(Vec<PropertyValue>),
}

impl From<PresentValue> for PropertyValue {
    fn from(value: PresentValue) -> Self {
        match value {
            PresentValue::Null => Self::Null,
            PresentValue::Real(v) => Self::Real(v),
            PresentValue::Unsigned(v) => Self::Unsigned(v),
            PresentValue::Signed(v) => Self::Signed(v),
            PresentValue::Boolean(v) => Self::Boolean(v),
            PresentValue::Enumerated(v) => Self::Enumerated(v),
        }
    }
}

impl PropertyValue {
    /// Converts a written value back into a registry present value, if it
    /// is of a kind the registry can hold.
    pub fn to_present_value(&self) -> Option<PresentValue> {
        match self {
            Self::Null => Some(PresentValue::Null),
            Self::Boolean(v) => Some(PresentValue::Boolean(*v)),
            Self::Unsigned(v) => Some(PresentValue::Unsigned(*v)),
            Self::Signed(v) => Some(PresentValue::Signed(*v)),
            Self::Real(v) => Some(PresentValue::Real(*v)),
            Self::Enumerated(v) => Some(PresentValue::Enumerated(*v)),
            _ => None,
        }
    }

    /// The status-flags bit string representation of `flags`.
    pub fn status_flags(flags: StatusFlags) -> Self {
        Self::BitString {
            unused_bits: 4,
            data: vec![flags.bits() << 4],
        }
    }
}

/// One object's worth of a ReadPropertyMultiple request.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAccessSpec {
    pub object: WireObject,
    pub properties: Vec<u32>,
}

/// One object's worth of a ReadPropertyMultiple reply.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadAccessResult {
    pub object: WireObject,
    pub results: Vec<(u32, Result<PropertyValue, ServiceError>)>,
}

/// A decoded service request from a BACnet client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceRequest {
    WhoIs {
        low: Option<u32>,
        high: Option<u32>,
    },
    ReadProperty {
        object: WireObject,
        property: u32,
        array_index: Option<u32>,
        invoke_id: u8,
    },
    ReadPropertyMultiple {
        items: Vec<ReadAccessSpec>,
        invoke_id: u8,
    },
    WriteProperty {
        object: WireObject,
        property: u32,
        value: PropertyValue,
        priority: Option<u8>,
        invoke_id: u8,
    },
    SubscribeCov {
        process_id: u32,
        object: WireObject,
        confirmed: Option<bool>,
        lifetime: Option<u32>,
        invoke_id: u8,
    },
    SubscribeCovProperty {
        process_id: u32,
        object: WireObject,
        property: u32,
        invoke_id: u8,
    },
}

/// A BACnet error-class/error-code pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceError {
    pub class: u32,
    pub code: u32,
}

impl ServiceError {
    pub const UNKNOWN_OBJECT: Self = Self { class: 1, code: 31 };
    pub const UNKNOWN_PROPERTY: Self = Self { class: 2, code: 32 };
    pub const INVALID_DATA_TYPE: Self = Self { class: 2, code: 9 };
    pub const VALUE_OUT_OF_RANGE: Self = Self { class: 2, code: 37 };
    pub const WRITE_ACCESS_DENIED: Self = Self { class: 2, code: 40 };
    pub const INVALID_ARRAY_INDEX: Self = Self { class: 2, code: 42 };
    pub const COV_SUBSCRIPTION_FAILED: Self = Self { class: 5, code: 43 };
    pub const OPTIONAL_FUNCTIONALITY_NOT_SUPPORTED: Self = Self { class: 5, code: 45 };
}

/// The I-Am announcement sent in response to Who-Is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IAm {
    pub device_instance: u32,
    pub vendor_id: u16,
    pub max_apdu: u16,
    pub segmentation: u8,
}

/// A reply to a decoded service request.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceReply {
    IAm(IAm),
    SimpleAck {
        invoke_id: u8,
        service: u8,
    },
    ReadPropertyAck {
        object: WireObject,
        property: u32,
        array_index: Option<u32>,
        value: PropertyValue,
        invoke_id: u8,
    },
    ReadPropertyMultipleAck {
        results: Vec<ReadAccessResult>,
        invoke_id: u8,
    },
    Error {
        invoke_id: u8,
        service: u8,
        error: ServiceError,
    },
}

/// A change-of-value notification as handed to the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct CovNotification {
    pub process_id: u32,
    pub device_instance: u32,
    pub object_type: ObjectType,
    pub instance: u32,
    pub time_remaining: u32,
    pub present_value: PresentValue,
    pub status_flags: StatusFlags,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("peer address exceeds {MAX_ADDRESS_LEN} bytes: {0}")]
    AddressTooLong(usize),
    #[error("encode error: {0}")]
    Encode(#[from] crate::wire::EncodeError),
    #[error("unroutable peer address")]
    UnroutableAddress,
    #[error("confirmed notification not acknowledged in time")]
    NotificationTimeout,
    #[error("transport closed")]
    Closed,
}

/// Server side of the BACnet wire.
pub trait BacnetTransport: Send + Sync {
    /// Waits up to `timeout` for one decoded service request.
    fn poll(
        &self,
        timeout: Duration,
    ) -> Result<Option<(PeerAddress, ServiceRequest)>, TransportError>;

    /// Sends a reply to a previously polled request.
    fn reply(&self, peer: &PeerAddress, reply: ServiceReply) -> Result<(), TransportError>;
}

/// Sends COV notifications to subscribers.
pub trait CovNotifier: Send + Sync {
    /// Delivers one notification. Confirmed notifications block until the
    /// subscriber acknowledges or a bounded timeout elapses.
    fn notify(
        &self,
        address: &PeerAddress,
        confirmed: bool,
        notification: &CovNotification,
    ) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::{PeerAddress, PropertyValue, WireObject, MAX_ADDRESS_LEN};
    use bacgate_core::{ObjectType, StatusFlags};

    #[test]
    fn address_length_is_bounded() {
        assert!(PeerAddress::new(vec![0u8; MAX_ADDRESS_LEN]).is_ok());
        assert!(PeerAddress::new(vec![0u8; MAX_ADDRESS_LEN + 1]).is_err());
    }

    #[test]
    fn wire_object_classifies_type_codes() {
        assert_eq!(
            WireObject::from_code(0, 5),
            WireObject::Standard {
                object_type: ObjectType::AnalogInput,
                instance: 5
            }
        );
        assert_eq!(WireObject::from_code(8, 1200), WireObject::Device {
            instance: 1200
        });
        assert_eq!(WireObject::from_code(17, 3), WireObject::Unknown {
            type_code: 17,
            instance: 3
        });
    }

    #[test]
    fn status_flags_pack_into_high_bits() {
        let flags = StatusFlags {
            fault: true,
            ..StatusFlags::default()
        };
        let PropertyValue::BitString { unused_bits, data } = PropertyValue::status_flags(flags)
        else {
            panic!("expected a bit string");
        };
        assert_eq!(unused_bits, 4);
        assert_eq!(data, vec![0b0100_0000]);
    }
}
