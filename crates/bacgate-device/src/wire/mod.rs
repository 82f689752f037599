//! Minimal BACnet/IP wire codec.
//!
//! Covers exactly the framing and services the gateway serves: BVLC,
//! NPDU, the APDU headers, Who-Is/I-Am, ReadProperty,
//! ReadPropertyMultiple, WriteProperty, SubscribeCOV(-Property), and COV
//! notifications. Everything else on the wire is ignored.

pub mod apdu;
pub mod codec;
pub mod npdu;
pub mod services;

pub use codec::{AppTag, DecodeError, EncodeError, Reader, Tag, Writer};
pub use services::Incoming;

/// BVLL type octet for BACnet/IP.
pub const BVLC_TYPE_BIP: u8 = 0x81;

/// BVLC function: original unicast NPDU.
pub const BVLC_ORIGINAL_UNICAST: u8 = 0x0A;
/// BVLC function: original broadcast NPDU.
pub const BVLC_ORIGINAL_BROADCAST: u8 = 0x0B;
/// BVLC function: forwarded NPDU (carries a 6-byte origin address).
pub const BVLC_FORWARDED_NPDU: u8 = 0x04;

/// Frames an encoded NPDU+APDU into a BVLC envelope.
pub fn bvlc_frame(function: u8, body: &[u8]) -> Vec<u8> {
    let length = (body.len() + 4) as u16;
    let mut frame = Vec::with_capacity(body.len() + 4);
    frame.push(BVLC_TYPE_BIP);
    frame.push(function);
    frame.extend_from_slice(&length.to_be_bytes());
    frame.extend_from_slice(body);
    frame
}

/// Strips a BVLC envelope, returning the function and the payload.
///
/// For forwarded NPDUs the payload still starts with the 6-byte origin
/// address; the transport consumes it.
pub fn bvlc_unframe(frame: &[u8]) -> Result<(u8, &[u8]), DecodeError> {
    if frame.len() < 4 || frame[0] != BVLC_TYPE_BIP {
        return Err(DecodeError::InvalidValue);
    }
    let length = u16::from_be_bytes([frame[2], frame[3]]) as usize;
    if length < 4 || length > frame.len() {
        return Err(DecodeError::InvalidLength);
    }
    Ok((frame[1], &frame[4..length]))
}

#[cfg(test)]
mod tests {
    use super::{bvlc_frame, bvlc_unframe, BVLC_ORIGINAL_UNICAST};

    #[test]
    fn bvlc_roundtrip() {
        let frame = bvlc_frame(BVLC_ORIGINAL_UNICAST, &[1, 2, 3]);
        assert_eq!(frame[..4], [0x81, 0x0A, 0x00, 0x07]);
        let (function, body) = bvlc_unframe(&frame).unwrap();
        assert_eq!(function, BVLC_ORIGINAL_UNICAST);
        assert_eq!(body, &[1, 2, 3]);
    }

    #[test]
    fn bvlc_rejects_short_and_foreign_frames() {
        assert!(bvlc_unframe(&[0x81, 0x0A, 0x00]).is_err());
        assert!(bvlc_unframe(&[0x82, 0x0A, 0x00, 0x04]).is_err());
        assert!(bvlc_unframe(&[0x81, 0x0A, 0x00, 0x09, 0x00]).is_err());
    }
}
