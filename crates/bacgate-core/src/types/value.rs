use serde::{Deserialize, Serialize};

/// The kind of present value an object is declared to carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Real,
    Unsigned,
    Signed,
    Boolean,
    Enumerated,
}

impl ValueKind {
    /// Parses the name used by the event schema's `presentValueType` field.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "real" => Some(Self::Real),
            "unsigned" => Some(Self::Unsigned),
            "signed" => Some(Self::Signed),
            "boolean" => Some(Self::Boolean),
            "enumerated" => Some(Self::Enumerated),
            _ => None,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::Real => "real",
            Self::Unsigned => "unsigned",
            Self::Signed => "signed",
            Self::Boolean => "boolean",
            Self::Enumerated => "enumerated",
        }
    }
}

/// A tagged BACnet present value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum PresentValue {
    #[default]
    Null,
    Real(f32),
    Unsigned(u32),
    Signed(i32),
    Boolean(bool),
    Enumerated(u32),
}

impl PresentValue {
    /// The kind this value carries; `None` for `Null`.
    pub const fn kind(self) -> Option<ValueKind> {
        match self {
            Self::Null => None,
            Self::Real(_) => Some(ValueKind::Real),
            Self::Unsigned(_) => Some(ValueKind::Unsigned),
            Self::Signed(_) => Some(ValueKind::Signed),
            Self::Boolean(_) => Some(ValueKind::Boolean),
            Self::Enumerated(_) => Some(ValueKind::Enumerated),
        }
    }

    /// Coerces the value to `f64` for COV increment comparison.
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Null => 0.0,
            Self::Real(v) => f64::from(v),
            Self::Unsigned(v) => f64::from(v),
            Self::Signed(v) => f64::from(v),
            Self::Boolean(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Enumerated(v) => f64::from(v),
        }
    }

    /// Whether this value may be stored in an object declared with `kind`.
    ///
    /// Unsigned and enumerated values are mutually assignable; everything
    /// else requires an exact tag match.
    pub const fn matches(self, kind: ValueKind) -> bool {
        match (self, kind) {
            (Self::Real(_), ValueKind::Real)
            | (Self::Signed(_), ValueKind::Signed)
            | (Self::Boolean(_), ValueKind::Boolean) => true,
            (Self::Unsigned(_) | Self::Enumerated(_), ValueKind::Unsigned | ValueKind::Enumerated) => {
                true
            }
            _ => false,
        }
    }

    /// The zero value for a declared kind, used before any update arrives.
    pub const fn zero_of(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Real => Self::Real(0.0),
            ValueKind::Unsigned => Self::Unsigned(0),
            ValueKind::Signed => Self::Signed(0),
            ValueKind::Boolean => Self::Boolean(false),
            ValueKind::Enumerated => Self::Enumerated(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{PresentValue, ValueKind};

    #[test]
    fn coercion_covers_every_variant() {
        assert_eq!(PresentValue::Null.as_f64(), 0.0);
        assert_eq!(PresentValue::Real(21.5).as_f64(), 21.5);
        assert_eq!(PresentValue::Unsigned(3).as_f64(), 3.0);
        assert_eq!(PresentValue::Signed(-4).as_f64(), -4.0);
        assert_eq!(PresentValue::Boolean(true).as_f64(), 1.0);
        assert_eq!(PresentValue::Boolean(false).as_f64(), 0.0);
        assert_eq!(PresentValue::Enumerated(2).as_f64(), 2.0);
    }

    #[test]
    fn unsigned_and_enumerated_interchange() {
        assert!(PresentValue::Unsigned(1).matches(ValueKind::Enumerated));
        assert!(PresentValue::Enumerated(1).matches(ValueKind::Unsigned));
        assert!(!PresentValue::Real(1.0).matches(ValueKind::Unsigned));
        assert!(!PresentValue::Null.matches(ValueKind::Real));
    }
}
