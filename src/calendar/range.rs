use crate::error::{validation_error, Error, FieldError};
use crate::utils::time::{end_of_day, local_date, start_of_day};
use chrono::{DateTime, Datelike, Days, Months, NaiveDate, Utc, Weekday};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Granularity of a calendar view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Daily,
    Weekly,
    Monthly,
}

impl ViewMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Daily => "daily",
            ViewMode::Weekly => "weekly",
            ViewMode::Monthly => "monthly",
        }
    }

    /// Move `date` one view page back or forward
    pub fn step(&self, date: NaiveDate, forward: bool) -> NaiveDate {
        match (self, forward) {
            (ViewMode::Daily, true) => date + Days::new(1),
            (ViewMode::Daily, false) => date - Days::new(1),
            (ViewMode::Weekly, true) => date + Days::new(7),
            (ViewMode::Weekly, false) => date - Days::new(7),
            // Month steps clamp to the last day of shorter months
            (ViewMode::Monthly, true) => date + Months::new(1),
            (ViewMode::Monthly, false) => date - Months::new(1),
        }
    }
}

impl fmt::Display for ViewMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(ViewMode::Daily),
            "weekly" | "week" => Ok(ViewMode::Weekly),
            "monthly" | "month" => Ok(ViewMode::Monthly),
            other => Err(validation_error(
                "Invalid view mode",
                vec![FieldError::new(
                    "mode",
                    format!("Unknown view mode '{}'. Expected daily, weekly or monthly", other),
                )],
            )),
        }
    }
}

/// The span of time a view needs events for.
///
/// `start` is the first instant of `first_day` and `end` the last millisecond
/// of `last_day`, both on the wall clock of `tz`. The window is inclusive on
/// both ends.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub mode: ViewMode,
    /// The date the window was resolved from
    pub reference: NaiveDate,
    pub first_day: NaiveDate,
    pub last_day: NaiveDate,
    #[serde(skip)]
    pub tz: Tz,
}

impl ViewWindow {
    /// Whether an instant falls inside the window
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }

    /// Local calendar date of an instant
    pub fn local_date(&self, instant: DateTime<Utc>) -> NaiveDate {
        local_date(self.tz, instant)
    }

    /// Every calendar date in the window, in order
    pub fn days(&self) -> Vec<NaiveDate> {
        self.first_day
            .iter_days()
            .take_while(|day| *day <= self.last_day)
            .collect()
    }

    /// Whether `date` lies in the same month as the reference date
    pub fn in_reference_month(&self, date: NaiveDate) -> bool {
        date.year() == self.reference.year() && date.month() == self.reference.month()
    }
}

/// Derives view windows for a local timezone and week-start convention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeResolver {
    tz: Tz,
    week_start: Weekday,
}

impl Default for RangeResolver {
    fn default() -> Self {
        Self::new(Tz::UTC, Weekday::Sun)
    }
}

impl RangeResolver {
    pub fn new(tz: Tz, week_start: Weekday) -> Self {
        Self { tz, week_start }
    }

    pub fn timezone(&self) -> Tz {
        self.tz
    }

    pub fn week_start(&self) -> Weekday {
        self.week_start
    }

    /// First day of the week containing `date`
    pub fn start_of_week(&self, date: NaiveDate) -> NaiveDate {
        let offset = (date.weekday().num_days_from_sunday() + 7
            - self.week_start.num_days_from_sunday())
            % 7;
        date - Days::new(u64::from(offset))
    }

    /// Last day of the week containing `date`
    pub fn end_of_week(&self, date: NaiveDate) -> NaiveDate {
        self.start_of_week(date) + Days::new(6)
    }

    /// Compute the window a view of `mode` around `reference` displays
    pub fn resolve(&self, reference: NaiveDate, mode: ViewMode) -> ViewWindow {
        let (first_day, last_day) = match mode {
            ViewMode::Daily => (reference, reference),
            ViewMode::Weekly => (self.start_of_week(reference), self.end_of_week(reference)),
            ViewMode::Monthly => {
                let (month_start, month_end) = month_bounds(reference);
                (self.start_of_week(month_start), self.end_of_week(month_end))
            }
        };

        ViewWindow {
            start: start_of_day(self.tz, first_day),
            end: end_of_day(self.tz, last_day),
            mode,
            reference,
            first_day,
            last_day,
            tz: self.tz,
        }
    }

    /// Header text for a view, e.g. "March 2024"
    pub fn title(&self, reference: NaiveDate, mode: ViewMode) -> String {
        match mode {
            ViewMode::Daily => reference.format("%A, %B %-d, %Y").to_string(),
            ViewMode::Weekly => format!(
                "{} - {}",
                self.start_of_week(reference).format("%b %-d"),
                self.end_of_week(reference).format("%b %-d, %Y")
            ),
            ViewMode::Monthly => reference.format("%B %Y").to_string(),
        }
    }
}

/// First and last day of the month containing `date`
pub fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let first = date - Days::new(u64::from(date.day0()));
    let last = first + Months::new(1) - Days::new(1);
    (first, last)
}
