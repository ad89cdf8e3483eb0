use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::{PipelineError, Result};

pub fn parse_tz(name: &str) -> Result<Tz> {
    name.parse::<Tz>()
        .map_err(|_| PipelineError::Timezone(name.to_string()))
}

/// Injected time source so job staleness and scheduling decisions are
/// testable; production wires in [`SystemClock`].
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[cfg(test)]
pub struct FixedClock(pub DateTime<Utc>);

#[cfg(test)]
impl Clock for FixedClock {
    fn now_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Park-local day policy: the UTC extent of `[date 00:00:00, date 23:59:59]`
/// in the park's own timezone.
///
/// This is the boundary used for operating-session detection and daily
/// rollups. Each park gets its own midnight; a single global clock would
/// split late-evening activity across the wrong days.
pub fn park_local_day_utc(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    local_day_utc(date, tz)
}

/// Reporting day policy: the same conversion, but in the site-wide
/// reporting timezone from config.
///
/// Used for "today/yesterday" windows that must agree across parks. Kept
/// as a separately named policy from [`park_local_day_utc`] on purpose;
/// the two serve different consumers and must never be unified.
pub fn reporting_day_utc(date: NaiveDate, reporting_tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    local_day_utc(date, reporting_tz)
}

fn local_day_utc(date: NaiveDate, tz: Tz) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = resolve_local(tz, date.and_hms_opt(0, 0, 0).expect("valid midnight"));
    let end = resolve_local(tz, date.and_hms_opt(23, 59, 59).expect("valid end of day"));
    (start, end)
}

/// Resolve a naive local datetime to UTC, tolerating DST transitions:
/// ambiguous times take the earlier instant, nonexistent times advance to
/// the next valid minute.
fn resolve_local(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        chrono::LocalResult::Single(dt) => dt.with_timezone(&Utc),
        chrono::LocalResult::Ambiguous(a, b) => {
            let (a, b) = (a.with_timezone(&Utc), b.with_timezone(&Utc));
            a.min(b)
        }
        chrono::LocalResult::None => {
            // Spring-forward gap: scan forward, transitions are at most an
            // hour or two wide.
            for minutes in 1..=180 {
                let candidate = naive + Duration::minutes(minutes);
                if let chrono::LocalResult::Single(dt) = tz.from_local_datetime(&candidate) {
                    return dt.with_timezone(&Utc);
                }
            }
            // Unreachable for real tzdata; pin to the naive instant read as UTC.
            Utc.from_utc_datetime(&naive)
        }
    }
}

/// Inclusive date bounds of the ISO week containing `date`.
pub fn week_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let weekday = date.weekday().num_days_from_monday() as i64;
    let start = date - Duration::days(weekday);
    (start, start + Duration::days(6))
}

/// Inclusive date bounds of the calendar month containing `date`.
pub fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = NaiveDate::from_ymd_opt(date.year(), date.month(), 1).expect("first of month");
    let next = if date.month() == 12 {
        NaiveDate::from_ymd_opt(date.year() + 1, 1, 1)
    } else {
        NaiveDate::from_ymd_opt(date.year(), date.month() + 1, 1)
    }
    .expect("first of next month");
    (start, next - Duration::days(1))
}

/// Inclusive date bounds of the calendar year containing `date`.
pub fn year_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    (
        NaiveDate::from_ymd_opt(date.year(), 1, 1).expect("jan 1"),
        NaiveDate::from_ymd_opt(date.year(), 12, 31).expect("dec 31"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_york_summer_day_maps_to_utc_offset_4() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let (start, end) = park_local_day_utc(date, chrono_tz::America::New_York);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 6, 1, 4, 0, 0).unwrap());
        assert_eq!(end, Utc.with_ymd_and_hms(2025, 6, 2, 3, 59, 59).unwrap());
    }

    #[test]
    fn tokyo_day_starts_previous_utc_evening() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let (start, _) = park_local_day_utc(date, chrono_tz::Asia::Tokyo);
        assert_eq!(start, Utc.with_ymd_and_hms(2025, 5, 31, 15, 0, 0).unwrap());
    }

    #[test]
    fn fall_back_day_is_25_hours() {
        // 2025-11-02 has a repeated 01:xx hour in US Eastern.
        let date = NaiveDate::from_ymd_opt(2025, 11, 2).unwrap();
        let (start, end) = park_local_day_utc(date, chrono_tz::America::New_York);
        let span = end - start;
        assert_eq!(span.num_seconds(), 25 * 3600 - 1);
    }

    #[test]
    fn spring_forward_day_is_23_hours() {
        let date = NaiveDate::from_ymd_opt(2025, 3, 9).unwrap();
        let (start, end) = park_local_day_utc(date, chrono_tz::America::New_York);
        let span = end - start;
        assert_eq!(span.num_seconds(), 23 * 3600 - 1);
    }

    #[test]
    fn reporting_policy_is_independent_of_park_policy() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let (park_start, _) = park_local_day_utc(date, chrono_tz::America::Los_Angeles);
        let (report_start, _) = reporting_day_utc(date, chrono_tz::UTC);
        assert_ne!(park_start, report_start);
        assert_eq!(report_start, Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn week_month_year_bounds() {
        let date = NaiveDate::from_ymd_opt(2025, 6, 4).unwrap(); // a Wednesday
        let (ws, we) = week_bounds(date);
        assert_eq!(ws, NaiveDate::from_ymd_opt(2025, 6, 2).unwrap());
        assert_eq!(we, NaiveDate::from_ymd_opt(2025, 6, 8).unwrap());

        let (ms, me) = month_bounds(date);
        assert_eq!(ms, NaiveDate::from_ymd_opt(2025, 6, 1).unwrap());
        assert_eq!(me, NaiveDate::from_ymd_opt(2025, 6, 30).unwrap());

        let dec = NaiveDate::from_ymd_opt(2025, 12, 15).unwrap();
        let (_, de) = month_bounds(dec);
        assert_eq!(de, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());

        let (ys, ye) = year_bounds(date);
        assert_eq!(ys, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert_eq!(ye, NaiveDate::from_ymd_opt(2025, 12, 31).unwrap());
    }
}
