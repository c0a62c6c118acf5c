//! Timestamp handling for the compact XMLTV datetime format

use chrono::{DateTime, NaiveDate, Utc};

/// Parse an XMLTV timestamp of the form `YYYYMMDDHHMMSS [±HHMM]`.
///
/// The timezone suffix is ignored; guide times are interpreted as UTC.
/// Returns `None` for anything that does not carry a full 14-digit datetime.
pub fn parse_xmltv_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let compact = value.split_whitespace().next().unwrap_or(value);
    if compact.len() < 14 || !compact.is_char_boundary(14) {
        return None;
    }

    let year: i32 = compact[0..4].parse().ok()?;
    let month: u32 = compact[4..6].parse().ok()?;
    let day: u32 = compact[6..8].parse().ok()?;
    let hour: u32 = compact[8..10].parse().ok()?;
    let minute: u32 = compact[10..12].parse().ok()?;
    let second: u32 = compact[12..14].parse().ok()?;

    let naive = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, second)?;
    Some(naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_plain_timestamp() {
        let dt = parse_xmltv_timestamp("20260115203000").unwrap();
        assert_eq!(dt.year(), 2026);
        assert_eq!(dt.month(), 1);
        assert_eq!(dt.day(), 15);
        assert_eq!(dt.hour(), 20);
        assert_eq!(dt.minute(), 30);
        assert_eq!(dt.second(), 0);
    }

    #[test]
    fn test_timezone_suffix_is_ignored() {
        let plain = parse_xmltv_timestamp("20260115203000").unwrap();
        let offset = parse_xmltv_timestamp("20260115203000 +0300").unwrap();
        assert_eq!(plain, offset);
    }

    #[test]
    fn test_invalid_timestamps() {
        assert!(parse_xmltv_timestamp("").is_none());
        assert!(parse_xmltv_timestamp("2026011520").is_none());
        assert!(parse_xmltv_timestamp("2026011abc3000").is_none());
        assert!(parse_xmltv_timestamp("20261315203000").is_none()); // month 13
    }
}
