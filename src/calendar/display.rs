//! Presentation tokens and labels handed to the view layer.

use super::models::{Event, EventKind};
use chrono::{NaiveTime, Timelike};
use chrono_tz::Tz;
use serde::Serialize;

impl EventKind {
    /// Colour token the renderer styles this category with
    pub fn style_token(&self) -> &'static str {
        match self {
            EventKind::Meeting => "blue",
            EventKind::Personal => "purple",
            EventKind::Work => "amber",
            EventKind::Health => "green",
            EventKind::Other => "red",
        }
    }

    /// Localized display name
    pub fn label(&self) -> String {
        match self {
            EventKind::Meeting => t!("event_kind.meeting").to_string(),
            EventKind::Personal => t!("event_kind.personal").to_string(),
            EventKind::Work => t!("event_kind.work").to_string(),
            EventKind::Health => t!("event_kind.health").to_string(),
            EventKind::Other => t!("event_kind.other").to_string(),
        }
    }
}

/// One row of the category legend
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KindStyle {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub label: String,
    pub style: &'static str,
}

/// Style table for every known category; `other` doubles as the fallback
pub fn legend() -> Vec<KindStyle> {
    EventKind::ALL
        .iter()
        .map(|kind| KindStyle {
            kind: *kind,
            label: kind.label(),
            style: kind.style_token(),
        })
        .collect()
}

/// 12-hour label for an hour of the day, e.g. "9 AM"
pub fn hour_label(hour: u32) -> String {
    NaiveTime::from_hms_opt(hour % 24, 0, 0)
        .map(|time| time.format("%-I %p").to_string())
        .unwrap_or_default()
}

/// Label shown for events that did not fit into a month cell
pub fn overflow_label(hidden: usize) -> String {
    t!("calendar.overflow", count = hidden).to_string()
}

/// Start and end of an event as local clock times, e.g. "9:00 AM - 10:30 AM"
pub fn time_span(event: &Event, tz: Tz) -> String {
    let start = event.start_time.with_timezone(&tz);
    let end = event.end_time.with_timezone(&tz);
    format!(
        "{} - {}",
        clock(start.hour(), start.minute()),
        clock(end.hour(), end.minute())
    )
}

fn clock(hour: u32, minute: u32) -> String {
    NaiveTime::from_hms_opt(hour, minute, 0)
        .map(|time| time.format("%-I:%M %p").to_string())
        .unwrap_or_default()
}
