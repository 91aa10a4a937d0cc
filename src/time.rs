use chrono::{DateTime, Datelike, SecondsFormat, Utc};
use std::time::Duration;

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Current instant as RFC 3339 UTC with millisecond precision.
///
/// Every timestamp the store writes uses this shape, so string order matches
/// chronological order.
pub fn now_iso() -> String {
    to_iso(Utc::now())
}

pub fn to_iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `now + delay` in the store's timestamp format.
pub fn iso_after(delay: Duration) -> String {
    let delay = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
    let at = Utc::now()
        .checked_add_signed(delay)
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    to_iso(at)
}

/// The later of two store timestamps. Keeps `updatedAt` non-decreasing when
/// the wall clock steps backwards.
pub fn monotonic_after(now: String, previous: &str) -> String {
    if previous > now.as_str() {
        previous.to_string()
    } else {
        now
    }
}

/// Calendar year of a store timestamp, falling back to the current year.
pub fn year_of(iso: &str) -> i32 {
    DateTime::parse_from_rfc3339(iso)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
        .year()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_ms_is_reasonable() {
        let a = now_ms();
        assert!(a > 1_500_000_000_000); // after 2017
        assert!(a < 4_100_000_000_000); // before year ~2100
    }

    #[test]
    fn iso_has_millis_and_z_suffix() {
        let at = DateTime::<Utc>::from_timestamp_millis(1_700_000_000_123).unwrap();
        assert_eq!(to_iso(at), "2023-11-14T22:13:20.123Z");
    }

    #[test]
    fn monotonic_after_never_goes_backwards() {
        let later = "2030-01-01T00:00:00.000Z";
        let earlier = "2020-01-01T00:00:00.000Z".to_string();
        assert_eq!(monotonic_after(earlier.clone(), later), later);
        assert_eq!(monotonic_after(later.to_string(), &earlier), later);
    }

    #[test]
    fn year_of_reads_timestamp_year() {
        assert_eq!(year_of("2024-03-05T01:02:03.000Z"), 2024);
    }
}
