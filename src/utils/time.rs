use crate::error::FieldError;
use chrono::{DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

/// Accepted layouts for timestamps without an offset (e.g. from a `datetime-local` input)
const NAIVE_FORMATS: [&str; 3] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S"];

/// Years a parsed date may fall in. Views page and pad around the date, which
/// needs headroom inside chrono's representable range.
const YEARS: std::ops::RangeInclusive<i32> = 1..=9999;

/// Resolve a wall-clock time in `tz` to a single instant.
///
/// Ambiguous times (clocks going back) pick the earlier instant. Times that
/// fall into a gap (clocks going forward) move to the first valid instant
/// after the gap.
pub fn localize(tz: Tz, naive: NaiveDateTime) -> DateTime<Utc> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        LocalResult::None => {
            // Gaps are at most a couple of hours; probe forward minute by minute
            let mut probe = naive;
            for _ in 0..(3 * 60) {
                probe += Duration::minutes(1);
                if let Some(dt) = tz.from_local_datetime(&probe).earliest() {
                    return dt.with_timezone(&Utc);
                }
            }
            tz.from_utc_datetime(&naive).with_timezone(&Utc)
        }
    }
}

/// First instant of `date` in `tz`
pub fn start_of_day(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    localize(tz, date.and_time(NaiveTime::MIN))
}

/// Last millisecond of `date` in `tz`
pub fn end_of_day(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    match date.succ_opt() {
        Some(next) => start_of_day(tz, next) - Duration::milliseconds(1),
        None => start_of_day(tz, date) + Duration::days(1) - Duration::milliseconds(1),
    }
}

/// Today's date on the wall clock of `tz`
pub fn today(tz: Tz) -> NaiveDate {
    Utc::now().with_timezone(&tz).date_naive()
}

/// Calendar date of an instant on the wall clock of `tz`
pub fn local_date(tz: Tz, instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&tz).date_naive()
}

/// Parse a date in YYYY-MM-DD format
pub fn parse_date(field: &str, value: &str) -> Result<NaiveDate, FieldError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
        .ok()
        .filter(|date| YEARS.contains(&date.year()))
        .ok_or_else(|| {
            FieldError::new(
                field,
                format!("Invalid date '{}'. Expected YYYY-MM-DD", value),
            )
        })
}

/// Parse an ISO-8601 timestamp.
///
/// Values carrying an offset are taken as-is; values without one are read as
/// wall-clock time in `tz`.
pub fn parse_timestamp(field: &str, value: &str, tz: Tz) -> Result<DateTime<Utc>, FieldError> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NAIVE_FORMATS
                .iter()
                .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
                .map(|naive| localize(tz, naive))
        })
        .filter(|instant| YEARS.contains(&instant.year()))
        .ok_or_else(|| {
            FieldError::new(
                field,
                format!("Invalid timestamp '{}'. Expected ISO-8601", value),
            )
        })
}
