//! Common utility functions: timestamps in the two on-disk encodings

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike, Utc};

/// Textual date format used by KDBX 3.x documents
pub const XML_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Size of a packed KDB date
pub const KDB_DATE_SIZE: usize = 5;

/// Seconds between 0001-01-01T00:00:00Z and the Unix epoch
const KDBX_EPOCH_OFFSET: i64 = 62_135_596_800;

/// Get current UTC datetime, truncated to whole seconds
///
/// Both file formats store second precision, so timestamps created in memory
/// compare equal after a save/load round trip.
pub fn now() -> DateTime<Utc> {
    let t = Utc::now();
    t.with_nanosecond(0).unwrap_or(t)
}

/// The "never expires" marker used by KeePass 1.x (2999-12-28 23:59:59)
pub fn never_expires() -> DateTime<Utc> {
    NaiveDate::from_ymd_opt(2999, 12, 28)
        .and_then(|d| d.and_hms_opt(23, 59, 59))
        .map(|ndt| ndt.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Convert DateTime to the KDBX 3.x text form
pub fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format(XML_DATE_FORMAT).to_string()
}

/// Parse a KDBX 3.x text datetime
pub fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s.trim(), XML_DATE_FORMAT)
        .ok()
        .map(|ndt| ndt.and_utc())
}

/// Pack a datetime into the 5-byte KDB layout
///
/// Bits: 14 year, 4 month, 5 day, 5 hour, 6 minute, 6 second.
pub fn pack_kdb_date(dt: &DateTime<Utc>) -> [u8; KDB_DATE_SIZE] {
    let year = dt.year().clamp(0, 0x3FFF) as u32;
    let month = dt.month();
    let day = dt.day();
    let hour = dt.hour();
    let minute = dt.minute();
    let second = dt.second();

    [
        ((year >> 6) & 0xFF) as u8,
        (((year & 0x3F) << 2) | ((month >> 2) & 0x03)) as u8,
        (((month & 0x03) << 6) | ((day & 0x1F) << 1) | ((hour >> 4) & 0x01)) as u8,
        (((hour & 0x0F) << 4) | ((minute >> 2) & 0x0F)) as u8,
        (((minute & 0x03) << 6) | (second & 0x3F)) as u8,
    ]
}

/// Unpack a 5-byte KDB date; `None` if the fields do not form a valid date
pub fn unpack_kdb_date(bytes: &[u8]) -> Option<DateTime<Utc>> {
    if bytes.len() < KDB_DATE_SIZE {
        return None;
    }
    let b: Vec<u32> = bytes[..KDB_DATE_SIZE].iter().map(|&x| x as u32).collect();

    let year = (b[0] << 6) | (b[1] >> 2);
    let month = ((b[1] & 0x03) << 2) | (b[2] >> 6);
    let day = (b[2] >> 1) & 0x1F;
    let hour = ((b[2] & 0x01) << 4) | (b[3] >> 4);
    let minute = ((b[3] & 0x0F) << 2) | (b[4] >> 6);
    let second = b[4] & 0x3F;

    NaiveDate::from_ymd_opt(year as i32, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, second))
        .map(|ndt| ndt.and_utc())
}

/// Encode a datetime as KDBX 4 base64 seconds since 0001-01-01
pub fn to_kdbx_timestamp(dt: &DateTime<Utc>) -> String {
    let seconds = dt.timestamp() + KDBX_EPOCH_OFFSET;
    STANDARD.encode(seconds.to_le_bytes())
}

/// Decode a KDBX timestamp, accepting both the KDBX 4 binary form and the
/// KDBX 3.x text form
pub fn from_kdbx_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.contains('-') {
        return parse_datetime(s).or_else(|| {
            DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
        });
    }
    let raw = STANDARD.decode(s).ok()?;
    let bytes: [u8; 8] = raw.get(..8)?.try_into().ok()?;
    let seconds = i64::from_le_bytes(bytes);
    DateTime::from_timestamp(seconds - KDBX_EPOCH_OFFSET, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_has_no_fraction() {
        assert_eq!(now().nanosecond(), 0);
    }

    #[test]
    fn test_never_expires() {
        let dt = never_expires();
        assert_eq!(dt.year(), 2999);
        assert_eq!(dt.month(), 12);
        assert_eq!(dt.day(), 28);
    }

    #[test]
    fn test_date_to_text_conversion() {
        let dt = Utc.with_ymd_and_hms(2016, 12, 15, 17, 23, 54).unwrap();
        assert_eq!(format_datetime(&dt), "2016-12-15T17:23:54Z");
        assert_eq!(parse_datetime("2016-12-15T17:23:54Z").unwrap(), dt);
    }

    #[test]
    fn test_parse_datetime_invalid() {
        assert!(parse_datetime("invalid").is_none());
        assert!(parse_datetime("2023-13-01T00:00:00Z").is_none());
    }

    #[test]
    fn test_pack_kdb_date_known_layout() {
        // 2019-05-17 13:42:09
        let dt = Utc.with_ymd_and_hms(2019, 5, 17, 13, 42, 9).unwrap();
        let packed = pack_kdb_date(&dt);
        assert_eq!(packed[0], (2019u32 >> 6) as u8);
        assert_eq!(unpack_kdb_date(&packed).unwrap(), dt);
    }

    #[test]
    fn test_pack_never_expires() {
        let packed = pack_kdb_date(&never_expires());
        assert_eq!(packed, [0x2E, 0xDF, 0x39, 0x7E, 0xFB]);
        assert_eq!(unpack_kdb_date(&packed).unwrap(), never_expires());
    }

    #[test]
    fn test_unpack_kdb_date_invalid() {
        assert!(unpack_kdb_date(&[0, 0, 0, 0, 0]).is_none());
        assert!(unpack_kdb_date(&[1, 2]).is_none());
    }

    #[test]
    fn test_kdbx_timestamp() {
        let dt = Utc.with_ymd_and_hms(2020, 2, 29, 8, 0, 1).unwrap();
        let encoded = to_kdbx_timestamp(&dt);
        assert_eq!(from_kdbx_timestamp(&encoded).unwrap(), dt);

        // Unix epoch is 62135596800 seconds after 0001-01-01
        let epoch = DateTime::from_timestamp(0, 0).unwrap();
        let raw = STANDARD.decode(to_kdbx_timestamp(&epoch)).unwrap();
        assert_eq!(i64::from_le_bytes(raw.try_into().unwrap()), 62_135_596_800);
    }

    #[test]
    fn test_kdbx_timestamp_text_form() {
        let dt = Utc.with_ymd_and_hms(2012, 1, 2, 3, 4, 5).unwrap();
        assert_eq!(from_kdbx_timestamp("2012-01-02T03:04:05Z").unwrap(), dt);
        assert!(from_kdbx_timestamp("AAAA").is_none());
    }
}
