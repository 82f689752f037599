//! APDU header encoding and decoding for the PDU types the gateway uses.

use crate::wire::codec::{DecodeError, Reader, Writer};

pub const APDU_CONFIRMED_REQUEST: u8 = 0;
pub const APDU_UNCONFIRMED_REQUEST: u8 = 1;
pub const APDU_SIMPLE_ACK: u8 = 2;
pub const APDU_COMPLEX_ACK: u8 = 3;
pub const APDU_ERROR: u8 = 5;

/// Header of an incoming Confirmed-Request APDU. Segmented requests are
/// rejected; the gateway's replies all fit one APDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmedRequestHeader {
    pub invoke_id: u8,
    pub service_choice: u8,
}

impl ConfirmedRequestHeader {
    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let b0 = r.read_u8()?;
        if (b0 >> 4) != APDU_CONFIRMED_REQUEST {
            return Err(DecodeError::InvalidValue);
        }
        if (b0 & 0b0000_1000) != 0 {
            // Segmented request.
            return Err(DecodeError::Unsupported);
        }
        let _max_segments_apdu = r.read_u8()?;
        let invoke_id = r.read_u8()?;
        let service_choice = r.read_u8()?;
        Ok(Self {
            invoke_id,
            service_choice,
        })
    }

    /// Encodes an outgoing confirmed request (used for confirmed COV
    /// notifications).
    pub fn encode(self, w: &mut Writer) {
        w.push(APDU_CONFIRMED_REQUEST << 4);
        // Max segments 0, max APDU code 5 (1476 octets).
        w.push(0x05);
        w.push(self.invoke_id);
        w.push(self.service_choice);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnconfirmedRequestHeader {
    pub service_choice: u8,
}

impl UnconfirmedRequestHeader {
    pub fn encode(self, w: &mut Writer) {
        w.push(APDU_UNCONFIRMED_REQUEST << 4);
        w.push(self.service_choice);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let b0 = r.read_u8()?;
        if (b0 >> 4) != APDU_UNCONFIRMED_REQUEST {
            return Err(DecodeError::InvalidValue);
        }
        Ok(Self {
            service_choice: r.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleAck {
    pub invoke_id: u8,
    pub service_choice: u8,
}

impl SimpleAck {
    pub fn encode(self, w: &mut Writer) {
        w.push(APDU_SIMPLE_ACK << 4);
        w.push(self.invoke_id);
        w.push(self.service_choice);
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Self, DecodeError> {
        let b0 = r.read_u8()?;
        if (b0 >> 4) != APDU_SIMPLE_ACK {
            return Err(DecodeError::InvalidValue);
        }
        Ok(Self {
            invoke_id: r.read_u8()?,
            service_choice: r.read_u8()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComplexAckHeader {
    pub invoke_id: u8,
    pub service_choice: u8,
}

impl ComplexAckHeader {
    pub fn encode(self, w: &mut Writer) {
        w.push(APDU_COMPLEX_ACK << 4);
        w.push(self.invoke_id);
        w.push(self.service_choice);
    }
}

/// An Error PDU carrying a class/code pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorPdu {
    pub invoke_id: u8,
    pub service_choice: u8,
    pub class: u32,
    pub code: u32,
}

impl ErrorPdu {
    pub fn encode(self, w: &mut Writer) {
        use crate::wire::codec::encode_app_enumerated;
        w.push(APDU_ERROR << 4);
        w.push(self.invoke_id);
        w.push(self.service_choice);
        encode_app_enumerated(w, self.class);
        encode_app_enumerated(w, self.code);
    }
}

#[cfg(test)]
mod tests {
    use super::{ConfirmedRequestHeader, SimpleAck};
    use crate::wire::codec::{Reader, Writer};

    #[test]
    fn confirmed_request_roundtrip() {
        let header = ConfirmedRequestHeader {
            invoke_id: 9,
            service_choice: 0x0C,
        };
        let mut w = Writer::new();
        header.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(ConfirmedRequestHeader::decode(&mut r).unwrap(), header);
    }

    #[test]
    fn segmented_requests_are_rejected() {
        let frame = [0x08, 0x05, 0x01, 0x00, 0x01, 0x0C];
        let mut r = Reader::new(&frame);
        assert!(ConfirmedRequestHeader::decode(&mut r).is_err());
    }

    #[test]
    fn simple_ack_roundtrip() {
        let ack = SimpleAck {
            invoke_id: 3,
            service_choice: 0x05,
        };
        let mut w = Writer::new();
        ack.encode(&mut w);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        assert_eq!(SimpleAck::decode(&mut r).unwrap(), ack);
    }
}
