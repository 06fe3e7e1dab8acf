//! Bucketing of events into the grids the daily, weekly and monthly views draw.

use super::display::{hour_label, overflow_label, time_span};
use super::models::Event;
use super::range::{ViewMode, ViewWindow};
use chrono::{NaiveDate, Timelike};
use serde::Serialize;
use std::collections::BTreeMap;

/// Most events a month cell displays before collapsing the rest into a count
pub const MONTH_CELL_LIMIT: usize = 2;

/// An event together with its presentation fields
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCard {
    #[serde(flatten)]
    pub event: Event,
    /// Colour token for the event's category
    pub style: &'static str,
    /// Local start and end clock times
    pub time_span: String,
}

impl EventCard {
    fn new(event: Event, window: &ViewWindow) -> Self {
        Self {
            style: event.kind.style_token(),
            time_span: time_span(&event, window.tz),
            event,
        }
    }
}

/// Events starting within one hour of the day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HourBucket {
    pub hour: u32,
    pub label: String,
    pub events: Vec<EventCard>,
}

/// Events starting on one calendar day
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub events: Vec<EventCard>,
}

/// One day of the month grid
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthCell {
    pub date: NaiveDate,
    /// False for lead/trail days borrowed from adjacent months
    pub in_month: bool,
    /// The displayed subset, at most `MONTH_CELL_LIMIT` events
    pub events: Vec<EventCard>,
    /// Number of events starting that day
    pub total: usize,
    /// Events left out of `events`
    pub overflow: usize,
    pub overflow_label: Option<String>,
}

/// Grouped, sorted and capped events ready for rendering
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum Projection {
    Daily { hours: Vec<HourBucket> },
    Weekly { days: Vec<DayBucket> },
    Monthly { cells: Vec<MonthCell> },
}

impl Projection {
    pub fn mode(&self) -> ViewMode {
        match self {
            Projection::Daily { .. } => ViewMode::Daily,
            Projection::Weekly { .. } => ViewMode::Weekly,
            Projection::Monthly { .. } => ViewMode::Monthly,
        }
    }

    /// Number of events that fell into the window, displayed or not
    pub fn event_count(&self) -> usize {
        match self {
            Projection::Daily { hours } => hours.iter().map(|h| h.events.len()).sum(),
            Projection::Weekly { days } => days.iter().map(|d| d.events.len()).sum(),
            Projection::Monthly { cells } => cells.iter().map(|c| c.total).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.event_count() == 0
    }
}

/// Project `events` onto `window`.
///
/// Only events whose start lies inside the window take part. Buckets hold
/// events in ascending start order; equal starts keep their input order.
/// The caller's slice is left untouched.
pub fn project(events: &[Event], window: &ViewWindow) -> Projection {
    let mut visible: Vec<Event> = events
        .iter()
        .filter(|event| window.contains(event.start_time))
        .cloned()
        .collect();
    visible.sort_by_key(|event| event.start_time);

    match window.mode {
        ViewMode::Daily => Projection::Daily {
            hours: by_hour(visible, window),
        },
        ViewMode::Weekly => Projection::Weekly {
            days: by_day(visible, window)
                .into_iter()
                .map(|(date, events)| DayBucket { date, events })
                .collect(),
        },
        ViewMode::Monthly => Projection::Monthly {
            cells: by_day(visible, window)
                .into_iter()
                .map(|(date, events)| month_cell(date, events, window))
                .collect(),
        },
    }
}

fn by_hour(sorted: Vec<Event>, window: &ViewWindow) -> Vec<HourBucket> {
    let mut hours: BTreeMap<u32, Vec<EventCard>> = BTreeMap::new();
    for event in sorted {
        let hour = event.start_time.with_timezone(&window.tz).hour();
        hours
            .entry(hour)
            .or_default()
            .push(EventCard::new(event, window));
    }

    hours
        .into_iter()
        .map(|(hour, events)| HourBucket {
            hour,
            label: hour_label(hour),
            events,
        })
        .collect()
}

/// Group by local start date, with an entry for every day of the window
fn by_day(sorted: Vec<Event>, window: &ViewWindow) -> Vec<(NaiveDate, Vec<EventCard>)> {
    let mut days: BTreeMap<NaiveDate, Vec<EventCard>> = window
        .days()
        .into_iter()
        .map(|day| (day, Vec::new()))
        .collect();

    for event in sorted {
        let date = window.local_date(event.start_time);
        if let Some(bucket) = days.get_mut(&date) {
            bucket.push(EventCard::new(event, window));
        }
    }

    days.into_iter().collect()
}

fn month_cell(date: NaiveDate, mut events: Vec<EventCard>, window: &ViewWindow) -> MonthCell {
    let total = events.len();
    let overflow = total.saturating_sub(MONTH_CELL_LIMIT);
    events.truncate(MONTH_CELL_LIMIT);

    MonthCell {
        date,
        in_month: window.in_reference_month(date),
        events,
        total,
        overflow,
        overflow_label: (overflow > 0).then(|| overflow_label(overflow)),
    }
}
