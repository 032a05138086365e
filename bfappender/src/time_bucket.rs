use std::time::Duration;

use chrono::{DateTime, Local, TimeZone};

/// Truncates `instant` to a multiple of `period` and formats it at the
/// granularity implied by `period`'s length, per the table in
/// `SPEC_FULL.md` §4.7.1. Returns the empty string once `period` is longer
/// than about a century — at that point the bucket carries no information
/// and archive names fall back to a plain index.
///
/// Ported from `timeFixString` in `original_source/bfappender/utils.go`,
/// which truncates via `time.Time.Truncate` against the Unix epoch and then
/// formats with a `strftime`-like layout truncated to a fixed character
/// count. `chrono`'s duration-aligned truncation gives the same floor
/// behavior without reimplementing modular arithmetic on wall-clock structs.
pub(crate) fn bucket_string(instant: DateTime<Local>, period: Duration) -> String {
    const DAY: u64 = 86_400;
    let s = period.as_secs();

    let (format, take) = if s <= 30 * DAY {
        if s % 10 != 0 {
            ("%Y%m%d%H%M%S", 14)
        } else if s % 60 != 0 {
            ("%Y%m%d%H%M%S", 13)
        } else if s % 600 != 0 {
            ("%Y%m%d%H%M", 12)
        } else if s % 3600 != 0 {
            ("%Y%m%d%H%M", 11)
        } else if s % DAY != 0 {
            ("%Y%m%d%H", 10)
        } else {
            ("%Y%m%d", 8)
        }
    } else if s <= 300 * DAY {
        ("%Y%m", 6)
    } else if s <= 366 * DAY {
        ("%Y", 4)
    } else if s <= 36_600 * DAY {
        ("%Y", 2)
    } else {
        return String::new();
    };

    let truncated = truncate_to(instant, period);
    let formatted = truncated.format(format).to_string();
    formatted.chars().take(take).collect()
}

/// Floors `instant` to the nearest multiple of `period` measured from the
/// Unix epoch, in local time.
fn truncate_to(instant: DateTime<Local>, period: Duration) -> DateTime<Local> {
    if period.is_zero() {
        return instant;
    }
    let period_secs = period.as_secs() as i64;
    let epoch_secs = instant.timestamp();
    let floored = epoch_secs.div_euclid(period_secs) * period_secs;
    Local
        .timestamp_opt(floored, 0)
        .single()
        .unwrap_or(instant)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn second_granularity_keeps_all_fourteen_digits() {
        let t = at(2024, 3, 15, 13, 37, 42);
        let bucket = bucket_string(t, Duration::from_secs(7));
        assert_eq!(bucket.len(), 14);
        assert!(bucket.starts_with("20240315"));
    }

    #[test]
    fn day_granularity_yields_eight_digits() {
        let t = at(2024, 3, 15, 13, 37, 42);
        let bucket = bucket_string(t, Duration::from_secs(86_400));
        assert_eq!(bucket, "20240315");
    }

    #[test]
    fn hour_granularity_truncates_minutes() {
        let t = at(2024, 3, 15, 13, 37, 42);
        let bucket = bucket_string(t, Duration::from_secs(3600));
        assert_eq!(bucket, "2024031513");
    }

    #[test]
    fn century_scale_returns_empty() {
        let t = at(2024, 3, 15, 0, 0, 0);
        let bucket = bucket_string(t, Duration::from_secs(40_000 * 86_400));
        assert_eq!(bucket, "");
    }

    #[test]
    fn same_bucket_for_two_instants_within_the_period() {
        let a = at(2024, 3, 15, 13, 0, 1);
        let b = at(2024, 3, 15, 13, 0, 58);
        let period = Duration::from_secs(60);
        assert_eq!(bucket_string(a, period), bucket_string(b, period));
    }
}
