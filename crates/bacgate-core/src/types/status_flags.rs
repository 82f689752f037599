use serde::{Deserialize, Serialize};

/// The BACnet status-flags bit set carried by every object.
///
/// Any bit flip triggers a COV notification regardless of the object's
/// COV increment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusFlags {
    #[serde(default)]
    pub in_alarm: bool,
    #[serde(default)]
    pub fault: bool,
    #[serde(default)]
    pub overridden: bool,
    #[serde(default)]
    pub out_of_service: bool,
}

impl StatusFlags {
    /// Packs the flags into the wire bit order (in-alarm first).
    pub const fn bits(self) -> u8 {
        (self.in_alarm as u8) << 3
            | (self.fault as u8) << 2
            | (self.overridden as u8) << 1
            | self.out_of_service as u8
    }
}

#[cfg(test)]
mod tests {
    use super::StatusFlags;

    #[test]
    fn bit_order_matches_wire_layout() {
        let flags = StatusFlags {
            in_alarm: true,
            out_of_service: true,
            ..StatusFlags::default()
        };
        assert_eq!(flags.bits(), 0b1001);
        assert_eq!(StatusFlags::default().bits(), 0);
    }
}
