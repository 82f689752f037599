//! Network-layer header handling.
//!
//! The gateway is a single-network device: it strips incoming NPDU
//! headers (skipping any routing information) and emits the plain
//! version-2.0 header with no destination on everything it sends.

use crate::wire::codec::{DecodeError, Reader, Writer};

const NPDU_VERSION: u8 = 0x01;

/// Consumes the NPDU header. Network-layer messages (router traffic) are
/// rejected so the caller can drop the frame.
pub fn decode_npdu(r: &mut Reader<'_>) -> Result<(), DecodeError> {
    if r.read_u8()? != NPDU_VERSION {
        return Err(DecodeError::InvalidValue);
    }
    let control = r.read_u8()?;
    if (control & 0x80) != 0 {
        // Network-layer message; not application traffic.
        return Err(DecodeError::Unsupported);
    }
    let has_destination = (control & 0x20) != 0;
    let has_source = (control & 0x08) != 0;

    if has_destination {
        skip_address(r)?;
    }
    if has_source {
        skip_address(r)?;
    }
    if has_destination {
        let _hop_count = r.read_u8()?;
    }
    Ok(())
}

/// Writes the plain application NPDU header.
pub fn encode_npdu(w: &mut Writer, expects_reply: bool) {
    w.push(NPDU_VERSION);
    w.push(if expects_reply { 0x04 } else { 0x00 });
}

fn skip_address(r: &mut Reader<'_>) -> Result<(), DecodeError> {
    let _network = r.read_be_u16()?;
    let mac_len = r.read_u8()?;
    if mac_len > 6 {
        return Err(DecodeError::InvalidLength);
    }
    r.read_exact(usize::from(mac_len))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{decode_npdu, encode_npdu};
    use crate::wire::codec::{Reader, Writer};

    #[test]
    fn plain_header_roundtrip() {
        let mut w = Writer::new();
        encode_npdu(&mut w, false);
        let bytes = w.into_bytes();
        let mut r = Reader::new(&bytes);
        decode_npdu(&mut r).unwrap();
        assert!(r.is_empty());
    }

    #[test]
    fn routed_header_is_skipped() {
        // version, control (dest present), DNET, DLEN=2, mac, hop count.
        let frame = [0x01, 0x20, 0x00, 0x05, 0x02, 0xAA, 0xBB, 0xFF, 0x42];
        let mut r = Reader::new(&frame);
        decode_npdu(&mut r).unwrap();
        assert_eq!(r.read_u8().unwrap(), 0x42);
    }

    #[test]
    fn network_messages_are_rejected() {
        let frame = [0x01, 0x80, 0x00];
        let mut r = Reader::new(&frame);
        assert!(decode_npdu(&mut r).is_err());
    }
}
