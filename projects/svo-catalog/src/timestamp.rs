// Conversions between nanosecond timestamps, durations and text
//
// All functions are pure. Timestamps are nanoseconds since the Unix epoch.

use crate::error::TimeError;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Local, LocalResult, NaiveDateTime, TimeZone, Utc};
use std::fmt::Display;

pub const NANOS_PER_MILLI: u64 = 1_000_000;
pub const NANOS_PER_SECOND: u64 = 1_000_000_000;

/// Default format for recording timestamps. The trailing `%.` asks for centiseconds.
pub const DEFAULT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S-%.";
/// Format used by range queries, e.g. "21/06/2019 14:24:00".
pub const RANGE_FORMAT: &str = "%d/%m/%Y %H:%M:%S";
/// Day label used when grouping entries, e.g. "Wednesday 14 Aug".
pub const DAY_FORMAT: &str = "%A %d %b";

const CENTIS_SENTINEL: &str = "%.";

/// Milliseconds between two timestamps, truncated toward zero.
pub fn duration_millis(start: u64, end: u64) -> i64 {
    ((end as i128 - start as i128) / NANOS_PER_MILLI as i128) as i64
}

/// Shifts a timestamp by a (possibly negative) number of seconds.
pub fn increment_seconds(timestamp: u64, seconds: f64) -> u64 {
    let delta = (seconds * NANOS_PER_SECOND as f64).round() as i64;
    timestamp.saturating_add_signed(delta)
}

/// Linear remap of `value` from one range onto another.
pub fn map_range(
    value: f64,
    in_low: f64,
    in_high: f64,
    out_low: f64,
    out_high: f64,
    clamp: bool,
) -> f64 {
    if (in_high - in_low).abs() < f64::EPSILON {
        return out_low;
    }
    let out = (value - in_low) / (in_high - in_low) * (out_high - out_low) + out_low;
    if !clamp {
        return out;
    }
    if out_high < out_low {
        out.clamp(out_high, out_low)
    } else {
        out.clamp(out_low, out_high)
    }
}

/// Position of `timestamp` between `start` and `end`, mapped onto `[out_low, out_high]`.
pub fn map_time_to_value(
    timestamp: u64,
    start: u64,
    end: u64,
    out_low: f64,
    out_high: f64,
    clamp: bool,
) -> f64 {
    let value = duration_millis(start, timestamp) as f64;
    let range = duration_millis(start, end) as f64;
    map_range(value, 0.0, range, out_low, out_high, clamp)
}

/// Inverse of [`map_time_to_value`]. The offset is computed in milliseconds and
/// added back to `start`, so the nanosecond base of `start` is kept intact.
pub fn map_value_to_time(
    value: f64,
    in_low: f64,
    in_high: f64,
    start: u64,
    end: u64,
    clamp: bool,
) -> u64 {
    let range = duration_millis(start, end) as f64;
    let millis = map_range(value, in_low, in_high, 0.0, range, clamp).round() as i64;
    let nanos = start as i128 + millis as i128 * NANOS_PER_MILLI as i128;
    nanos.clamp(0, u64::MAX as i128) as u64
}

/// Duration between two timestamps as `HH:MM:SS.cc`.
pub fn human_duration(start: u64, end: u64) -> String {
    let millis = duration_millis(start, end).max(0);
    let hours = millis / 3_600_000;
    let minutes = (millis % 3_600_000) / 60_000;
    let seconds = (millis % 60_000) / 1000;
    let centis = (millis % 1000) / 10;
    format!("{:02}:{:02}:{:02}.{:02}", hours, minutes, seconds, centis)
}

fn to_datetime<Tz: TimeZone>(timestamp: u64, tz: &Tz) -> DateTime<Tz> {
    let nanos = i64::try_from(timestamp).unwrap_or(i64::MAX);
    DateTime::<Utc>::from_timestamp_nanos(nanos).with_timezone(tz)
}

/// Formats a timestamp in the given timezone.
///
/// A format ending in `%.` has those two characters stripped and the
/// centiseconds of the timestamp appended instead.
pub fn format_in<Tz>(timestamp: u64, format: &str, tz: &Tz) -> Result<String, TimeError>
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let (pattern, centis) = match format.strip_suffix(CENTIS_SENTINEL) {
        Some(prefix) => (prefix, true),
        None => (format, false),
    };

    let items: Vec<Item> = StrftimeItems::new(pattern).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(TimeError::InvalidFormat(format.to_string()));
    }

    let mut out = to_datetime(timestamp, tz)
        .format_with_items(items.iter())
        .to_string();
    if centis {
        let millis = (timestamp / NANOS_PER_MILLI) % 1000;
        out.push_str(&format!("{:02}", millis / 10));
    }
    Ok(out)
}

/// Formats a timestamp as local wall-clock text.
pub fn human_timestamp(timestamp: u64, format: &str) -> Result<String, TimeError> {
    format_in(timestamp, format, &Local)
}

/// Parses wall-clock text in the given timezone.
///
/// Daylight saving is never assumed: a time that occurs twice resolves to the
/// earlier instant, and a time skipped by a forward transition resolves to
/// the same wall-clock reading one hour later.
pub fn parse_in<Tz: TimeZone>(date: &str, format: &str, tz: &Tz) -> Result<u64, TimeError> {
    let naive =
        NaiveDateTime::parse_from_str(date, format).map_err(|source| TimeError::Parse {
            input: date.to_string(),
            format: format.to_string(),
            source,
        })?;

    let resolved = match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt,
        LocalResult::Ambiguous(earliest, _) => {
            tracing::debug!("{} is ambiguous in local time, using earliest", date);
            earliest
        }
        LocalResult::None => {
            tracing::debug!("{} falls in a DST gap, shifting forward", date);
            tz.from_local_datetime(&(naive + chrono::Duration::hours(1)))
                .earliest()
                .ok_or_else(|| TimeError::NonExistentLocalTime(date.to_string()))?
        }
    };

    resolved
        .timestamp_nanos_opt()
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| TimeError::OutOfRange(date.to_string()))
}

/// Parses local wall-clock text into a timestamp.
pub fn parse_timestamp(date: &str, format: &str) -> Result<u64, TimeError> {
    parse_in(date, format, &Local)
}

#[cfg(test)]
mod tests {
    use super::*;

    const AUG_14_1124: u64 = 1_565_781_840 * NANOS_PER_SECOND;

    #[test]
    fn test_duration_millis_truncates() {
        assert_eq!(duration_millis(0, 1_999_999), 1);
        assert_eq!(duration_millis(5, 5), 0);
        assert_eq!(duration_millis(0, 10 * NANOS_PER_SECOND), 10_000);
    }

    #[test]
    fn test_map_time_to_value_clamps() {
        let start = AUG_14_1124;
        let end = start + 10 * NANOS_PER_SECOND;
        let mid = start + 5 * NANOS_PER_SECOND;
        assert!((map_time_to_value(mid, start, end, 0.0, 100.0, true) - 50.0).abs() < 1e-9);

        let after = end + 5 * NANOS_PER_SECOND;
        assert_eq!(map_time_to_value(after, start, end, 0.0, 100.0, true), 100.0);
        assert!((map_time_to_value(after, start, end, 0.0, 100.0, false) - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_map_value_to_time_keeps_nanosecond_base() {
        let start = AUG_14_1124 + 123_456;
        let end = start + 2 * NANOS_PER_SECOND;
        let t = map_value_to_time(0.5, 0.0, 1.0, start, end, true);
        assert_eq!(t, start + NANOS_PER_SECOND);
        assert_eq!(map_value_to_time(2.0, 0.0, 1.0, start, end, true), end);
    }

    #[test]
    fn test_mapping_inverse_law() {
        let start = AUG_14_1124 + 987_654;
        let end = start + 15 * NANOS_PER_SECOND + 333_333_333;
        for step in 0..=97u64 {
            let t = start + (end - start) / 97 * step;
            let value = map_time_to_value(t, start, end, 0.0, 1.0, true);
            let back = map_value_to_time(value, 0.0, 1.0, start, end, true);
            let error = (back as i128 - t as i128).abs();
            assert!(error < NANOS_PER_MILLI as i128, "step {} off by {}ns", step, error);
        }
    }

    #[test]
    fn test_format_in_appends_centiseconds() {
        let ts = AUG_14_1124 + 1_234 * NANOS_PER_MILLI;
        let text = format_in(ts, DEFAULT_TIMESTAMP_FORMAT, &Utc).unwrap();
        assert_eq!(text, "2019-08-14_11-24-01-23");

        let plain = format_in(ts, "%H:%M:%S", &Utc).unwrap();
        assert_eq!(plain, "11:24:01");
    }

    #[test]
    fn test_format_in_rejects_bad_format() {
        assert!(matches!(
            format_in(AUG_14_1124, "%Q %", &Utc),
            Err(TimeError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_day_label() {
        assert_eq!(
            format_in(AUG_14_1124, DAY_FORMAT, &Utc).unwrap(),
            "Wednesday 14 Aug"
        );
    }

    #[test]
    fn test_parse_in_round_trip() {
        let ts = parse_in("14/08/2019 11:24:00", RANGE_FORMAT, &Utc).unwrap();
        assert_eq!(ts, AUG_14_1124);
        assert_eq!(format_in(ts, RANGE_FORMAT, &Utc).unwrap(), "14/08/2019 11:24:00");
    }

    #[test]
    fn test_parse_in_reports_bad_input() {
        assert!(matches!(
            parse_in("not a date", RANGE_FORMAT, &Utc),
            Err(TimeError::Parse { .. })
        ));
    }

    #[test]
    fn test_human_duration() {
        let start = AUG_14_1124;
        let end = start + 3_723_450 * NANOS_PER_MILLI;
        assert_eq!(human_duration(start, end), "01:02:03.45");
        assert_eq!(human_duration(end, start), "00:00:00.00");
    }

    #[test]
    fn test_increment_seconds() {
        assert_eq!(increment_seconds(AUG_14_1124, 1.5), AUG_14_1124 + 1_500_000_000);
        assert_eq!(increment_seconds(AUG_14_1124, -60.0), AUG_14_1124 - 60 * NANOS_PER_SECOND);
        assert_eq!(increment_seconds(10, -1.0), 0);
    }

    #[test]
    fn test_parse_ambiguous_local_time_uses_earliest() {
        // 01:30 happens twice in London when BST ends.
        let t = parse_in("27/10/2019 01:30:00", "%d/%m/%Y %H:%M:%S", &chrono_tz::Europe::London)
            .unwrap();
        assert_eq!(t, 1_572_136_200 * NANOS_PER_SECOND);
    }

    #[test]
    fn test_parse_skipped_local_time_shifts_forward() {
        // 01:30 never happens in London when BST starts; it reads as 02:30 BST.
        let t = parse_in("31/03/2019 01:30:00", "%d/%m/%Y %H:%M:%S", &chrono_tz::Europe::London)
            .unwrap();
        assert_eq!(t, 1_553_995_800 * NANOS_PER_SECOND);
    }
}
