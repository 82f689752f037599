//! ISO 8601 timestamp parsing.
//!
//! The grammar is deliberately strict:
//! `YYYY-MM-DD('T'|' ')HH:MM:SS[.f+][Z|+HH:MM|-HH:MM]`. After the seconds
//! field and optional fraction, the only legal continuations are an offset
//! designator or end of input. Input without an offset is taken as UTC.

use chrono::NaiveDate;

/// Parses an ISO 8601 timestamp into milliseconds since the Unix epoch.
///
/// Returns `None` for anything the grammar rejects; callers treat that as
/// "no source timestamp" rather than a decode failure. Fractional digits
/// beyond millisecond precision are consumed and discarded.
pub fn parse_iso8601_ms(input: &str) -> Option<i64> {
    let bytes = input.as_bytes();
    let mut pos = 0;

    let year = take_digits(bytes, &mut pos, 4)?;
    expect(bytes, &mut pos, b'-')?;
    let month = take_digits(bytes, &mut pos, 2)?;
    expect(bytes, &mut pos, b'-')?;
    let day = take_digits(bytes, &mut pos, 2)?;

    match bytes.get(pos).copied() {
        Some(b'T') | Some(b' ') => pos += 1,
        _ => return None,
    }

    let hour = take_digits(bytes, &mut pos, 2)?;
    expect(bytes, &mut pos, b':')?;
    let minute = take_digits(bytes, &mut pos, 2)?;
    expect(bytes, &mut pos, b':')?;
    let second = take_digits(bytes, &mut pos, 2)?;

    let mut millis = 0u32;
    if bytes.get(pos) == Some(&b'.') {
        pos += 1;
        let start = pos;
        while pos < bytes.len() && bytes[pos].is_ascii_digit() {
            pos += 1;
        }
        if pos == start {
            return None;
        }
        let mut scale = 100;
        for b in &bytes[start..(start + 3).min(pos)] {
            millis += u32::from(b - b'0') * scale;
            scale /= 10;
        }
    }

    let offset_minutes: i64 = match bytes.get(pos).copied() {
        None => 0,
        Some(b'Z') => {
            if pos + 1 != bytes.len() {
                return None;
            }
            0
        }
        Some(sign @ (b'+' | b'-')) => {
            pos += 1;
            let hours = take_digits(bytes, &mut pos, 2)?;
            expect(bytes, &mut pos, b':')?;
            let minutes = take_digits(bytes, &mut pos, 2)?;
            if pos != bytes.len() || minutes >= 60 {
                return None;
            }
            let total = i64::from(hours) * 60 + i64::from(minutes);
            if sign == b'-' {
                -total
            } else {
                total
            }
        }
        Some(_) => return None,
    };

    let date = NaiveDate::from_ymd_opt(year as i32, month, day)?;
    let naive = date.and_hms_milli_opt(hour, minute, second, millis)?;
    Some(naive.and_utc().timestamp_millis() - offset_minutes * 60_000)
}

fn take_digits(bytes: &[u8], pos: &mut usize, count: usize) -> Option<u32> {
    let end = pos.checked_add(count)?;
    if end > bytes.len() {
        return None;
    }
    let mut value = 0u32;
    for &b in &bytes[*pos..end] {
        if !b.is_ascii_digit() {
            return None;
        }
        value = value * 10 + u32::from(b - b'0');
    }
    *pos = end;
    Some(value)
}

fn expect(bytes: &[u8], pos: &mut usize, wanted: u8) -> Option<()> {
    if bytes.get(*pos) == Some(&wanted) {
        *pos += 1;
        Some(())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::parse_iso8601_ms;
    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    #[test]
    fn parses_utc_forms() {
        assert_eq!(
            parse_iso8601_ms("2024-12-14T10:30:00Z"),
            Some(1_734_172_200_000)
        );
        assert_eq!(
            parse_iso8601_ms("2024-12-14T10:30:00.123Z"),
            Some(1_734_172_200_123)
        );
        // No designator means UTC; space separator is accepted.
        assert_eq!(
            parse_iso8601_ms("2024-12-14 10:30:00"),
            Some(1_734_172_200_000)
        );
    }

    #[test]
    fn applies_numeric_offsets() {
        assert_eq!(
            parse_iso8601_ms("2024-12-14T10:30:00+01:00"),
            Some(1_734_172_200_000 - 3_600_000)
        );
        assert_eq!(
            parse_iso8601_ms("2024-12-14T10:30:00.500-02:30"),
            Some(1_734_172_200_500 + 9_000_000)
        );
    }

    #[test]
    fn fraction_beyond_millis_is_discarded() {
        assert_eq!(
            parse_iso8601_ms("2024-12-14T10:30:00.123456Z"),
            Some(1_734_172_200_123)
        );
        assert_eq!(
            parse_iso8601_ms("2024-12-14T10:30:00.5Z"),
            Some(1_734_172_200_500)
        );
    }

    proptest! {
        // Anything chrono can format in the canonical shape must parse
        // back to the same instant.
        #[test]
        fn formatted_timestamps_roundtrip(ms in 0i64..32_503_680_000_000) {
            let formatted = Utc
                .timestamp_millis_opt(ms)
                .unwrap()
                .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                .to_string();
            prop_assert_eq!(parse_iso8601_ms(&formatted), Some(ms));
        }
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in [
            "",
            "2024-12-14",
            "2024-12-14X10:30:00",
            "2024-12-14T10:30",
            "2024-12-14T10:30:00.",
            "2024-12-14T10:30:00Q",
            "2024-12-14T10:30:00Zx",
            "2024-12-14T10:30:00+1:00",
            "2024-12-14T10:30:00+01",
            "2024-12-14T10:30:00+01:99",
            "2024-13-14T10:30:00Z",
            "2024-12-14T25:30:00Z",
        ] {
            assert_eq!(parse_iso8601_ms(bad), None, "accepted {bad:?}");
        }
    }
}
