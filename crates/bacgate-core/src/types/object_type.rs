use serde::{Deserialize, Serialize};
use std::fmt;

/// BACnet object types the gateway materialises.
///
/// This is the subset of standard object types the upstream event schema
/// can define; numeric codes are the BACnet identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ObjectType {
    AnalogInput,
    AnalogOutput,
    AnalogValue,
    BinaryInput,
    BinaryOutput,
    BinaryValue,
    MultiStateInput,
    MultiStateOutput,
    MultiStateValue,
}

/// Broad classification of an object type, deciding which value kind its
/// present value carries on updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectClass {
    Analog,
    Binary,
    MultiState,
}

impl ObjectType {
    /// All materialisable object types, in numeric order.
    pub const ALL: [ObjectType; 9] = [
        Self::AnalogInput,
        Self::AnalogOutput,
        Self::AnalogValue,
        Self::BinaryInput,
        Self::BinaryOutput,
        Self::BinaryValue,
        Self::MultiStateInput,
        Self::MultiStateOutput,
        Self::MultiStateValue,
    ];

    /// Converts this object type to its numeric BACnet identifier.
    pub const fn to_u16(self) -> u16 {
        match self {
            Self::AnalogInput => 0,
            Self::AnalogOutput => 1,
            Self::AnalogValue => 2,
            Self::BinaryInput => 3,
            Self::BinaryOutput => 4,
            Self::BinaryValue => 5,
            Self::MultiStateInput => 13,
            Self::MultiStateOutput => 14,
            Self::MultiStateValue => 19,
        }
    }

    /// Creates an `ObjectType` from its numeric BACnet identifier.
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::AnalogInput),
            1 => Some(Self::AnalogOutput),
            2 => Some(Self::AnalogValue),
            3 => Some(Self::BinaryInput),
            4 => Some(Self::BinaryOutput),
            5 => Some(Self::BinaryValue),
            13 => Some(Self::MultiStateInput),
            14 => Some(Self::MultiStateOutput),
            19 => Some(Self::MultiStateValue),
            _ => None,
        }
    }

    /// Parses the kebab-case name used by the event schema.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "analog-input" => Some(Self::AnalogInput),
            "analog-output" => Some(Self::AnalogOutput),
            "analog-value" => Some(Self::AnalogValue),
            "binary-input" => Some(Self::BinaryInput),
            "binary-output" => Some(Self::BinaryOutput),
            "binary-value" => Some(Self::BinaryValue),
            "multi-state-input" => Some(Self::MultiStateInput),
            "multi-state-output" => Some(Self::MultiStateOutput),
            "multi-state-value" => Some(Self::MultiStateValue),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::AnalogInput => "analog-input",
            Self::AnalogOutput => "analog-output",
            Self::AnalogValue => "analog-value",
            Self::BinaryInput => "binary-input",
            Self::BinaryOutput => "binary-output",
            Self::BinaryValue => "binary-value",
            Self::MultiStateInput => "multi-state-input",
            Self::MultiStateOutput => "multi-state-output",
            Self::MultiStateValue => "multi-state-value",
        }
    }

    pub const fn class(self) -> ObjectClass {
        match self {
            Self::AnalogInput | Self::AnalogOutput | Self::AnalogValue => ObjectClass::Analog,
            Self::BinaryInput | Self::BinaryOutput | Self::BinaryValue => ObjectClass::Binary,
            Self::MultiStateInput | Self::MultiStateOutput | Self::MultiStateValue => {
                ObjectClass::MultiState
            }
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::ObjectType;

    #[test]
    fn numeric_codes_roundtrip() {
        for ot in ObjectType::ALL {
            assert_eq!(ObjectType::from_u16(ot.to_u16()), Some(ot));
        }
    }

    #[test]
    fn names_roundtrip() {
        for ot in ObjectType::ALL {
            assert_eq!(ObjectType::from_name(ot.name()), Some(ot));
        }
        assert_eq!(ObjectType::from_name("device"), None);
    }
}
