use crate::error::{validation_error, AppResult, FieldError};
use crate::utils::time::parse_timestamp;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

pub type UserId = u64;
pub type EventId = u64;

/// Longest accepted event title, in characters
pub const MAX_TITLE_LEN: usize = 255;
/// Longest accepted email address, in characters
pub const MAX_EMAIL_LEN: usize = 255;

const INVALID_EVENT: &str = "Invalid event data";
const INVALID_USER: &str = "Invalid user data";

/// Category of an event. Unknown categories collapse to `Other` when parsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Meeting,
    Personal,
    Work,
    Health,
    #[default]
    Other,
}

impl EventKind {
    pub const ALL: [EventKind; 5] = [
        EventKind::Meeting,
        EventKind::Personal,
        EventKind::Work,
        EventKind::Health,
        EventKind::Other,
    ];

    /// Parse a category name, falling back to `Other`
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "meeting" => EventKind::Meeting,
            "personal" => EventKind::Personal,
            "work" => EventKind::Work,
            "health" => EventKind::Health,
            _ => EventKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Meeting => "meeting",
            EventKind::Personal => "personal",
            EventKind::Work => "work",
            EventKind::Health => "health",
            EventKind::Other => "other",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Ok(EventKind::parse(&value))
    }
}

/// A stored calendar event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: EventId,
    pub user_id: UserId,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    #[serde(rename = "type", default)]
    pub kind: EventKind,
}

impl Event {
    /// Build a stored event from a validated draft
    pub fn from_draft(id: EventId, user_id: UserId, draft: EventDraft) -> Self {
        Self {
            id,
            user_id,
            title: draft.title,
            start_time: draft.start_time,
            end_time: draft.end_time,
            location: draft.location,
            kind: draft.kind,
        }
    }
}

/// Validated fields for a new event
#[derive(Debug, Clone, PartialEq)]
pub struct EventDraft {
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub location: Option<String>,
    pub kind: EventKind,
}

/// Validated partial update. `location: Some(None)` clears the location.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventPatch {
    pub title: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub location: Option<Option<String>>,
    pub kind: Option<EventKind>,
}

impl EventPatch {
    /// Merge the patch onto `event`, rejecting results that end before they start
    pub fn apply_to(&self, event: &Event) -> AppResult<Event> {
        let mut updated = event.clone();
        if let Some(title) = &self.title {
            updated.title = title.clone();
        }
        if let Some(start_time) = self.start_time {
            updated.start_time = start_time;
        }
        if let Some(end_time) = self.end_time {
            updated.end_time = end_time;
        }
        if let Some(location) = &self.location {
            updated.location = location.clone();
        }
        if let Some(kind) = self.kind {
            updated.kind = kind;
        }

        if updated.end_time < updated.start_time {
            return Err(validation_error(
                INVALID_EVENT,
                vec![end_before_start()],
            ));
        }

        Ok(updated)
    }
}

/// Event fields as they arrive over the wire, before validation
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    pub title: Option<String>,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub location: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
}

impl EventInput {
    /// Validate a complete event for creation
    pub fn into_draft(self, tz: Tz) -> AppResult<EventDraft> {
        let mut errors = Vec::new();

        let title = match self.title.as_deref() {
            Some(title) => check_title(title, &mut errors),
            None => {
                errors.push(FieldError::new("title", "Required"));
                None
            }
        };
        let start_time = required_timestamp("startTime", self.start_time.as_deref(), tz, &mut errors);
        let end_time = required_timestamp("endTime", self.end_time.as_deref(), tz, &mut errors);

        if let (Some(start), Some(end)) = (start_time, end_time) {
            if end < start {
                errors.push(end_before_start());
            }
        }

        match (title, start_time, end_time) {
            (Some(title), Some(start_time), Some(end_time)) if errors.is_empty() => Ok(EventDraft {
                title,
                start_time,
                end_time,
                location: normalize_location(self.location),
                kind: self.kind.as_deref().map(EventKind::parse).unwrap_or_default(),
            }),
            _ => Err(validation_error(INVALID_EVENT, errors)),
        }
    }

    /// Validate the provided subset of fields for an update
    pub fn into_patch(self, tz: Tz) -> AppResult<EventPatch> {
        let mut errors = Vec::new();

        let title = self
            .title
            .as_deref()
            .and_then(|title| check_title(title, &mut errors));
        let start_time = self
            .start_time
            .as_deref()
            .and_then(|value| collect(parse_timestamp("startTime", value, tz), &mut errors));
        let end_time = self
            .end_time
            .as_deref()
            .and_then(|value| collect(parse_timestamp("endTime", value, tz), &mut errors));

        if let (Some(start), Some(end)) = (start_time, end_time) {
            if end < start {
                errors.push(end_before_start());
            }
        }

        if !errors.is_empty() {
            return Err(validation_error(INVALID_EVENT, errors));
        }

        Ok(EventPatch {
            title,
            start_time,
            end_time,
            location: self.location.map(|location| normalize_location(Some(location))),
            kind: self.kind.as_deref().map(EventKind::parse),
        })
    }
}

/// A registered user as stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

impl User {
    /// The fields that are safe to hand back to clients
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id,
            username: self.username.clone(),
            email: self.email.clone(),
        }
    }
}

/// Public view of a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub id: UserId,
    pub username: String,
    pub email: String,
}

/// A user about to be stored; the password is already hashed
#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
}

/// Registration form
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RegisterInput {
    pub username: Option<String>,
    pub email: Option<String>,
    pub password: Option<String>,
}

/// Login form
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Registration fields after validation, password still in clear text
#[derive(Debug, Clone)]
pub struct Registration {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl RegisterInput {
    pub fn validate(self) -> AppResult<Registration> {
        let mut errors = Vec::new();

        let username = self.username.unwrap_or_default().trim().to_string();
        if username.is_empty() {
            errors.push(FieldError::new("username", "Required"));
        }

        let email = self.email.unwrap_or_default().trim().to_string();
        if email.is_empty() {
            errors.push(FieldError::new("email", "Required"));
        } else if email.chars().count() > MAX_EMAIL_LEN {
            errors.push(FieldError::new(
                "email",
                format!("Must be at most {} characters", MAX_EMAIL_LEN),
            ));
        } else if !looks_like_email(&email) {
            errors.push(FieldError::new("email", "Invalid email"));
        }

        let password = self.password.unwrap_or_default();
        if password.is_empty() {
            errors.push(FieldError::new("password", "Required"));
        }

        if !errors.is_empty() {
            return Err(validation_error(INVALID_USER, errors));
        }

        Ok(Registration {
            username,
            email,
            password,
        })
    }
}

fn looks_like_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
        }
        None => false,
    }
}

fn check_title(title: &str, errors: &mut Vec<FieldError>) -> Option<String> {
    let title = title.trim();
    if title.is_empty() {
        errors.push(FieldError::new("title", "Required"));
        None
    } else if title.chars().count() > MAX_TITLE_LEN {
        errors.push(FieldError::new(
            "title",
            format!("Must be at most {} characters", MAX_TITLE_LEN),
        ));
        None
    } else {
        Some(title.to_string())
    }
}

fn required_timestamp(
    field: &str,
    value: Option<&str>,
    tz: Tz,
    errors: &mut Vec<FieldError>,
) -> Option<DateTime<Utc>> {
    match value {
        Some(value) => collect(parse_timestamp(field, value, tz), errors),
        None => {
            errors.push(FieldError::new(field, "Required"));
            None
        }
    }
}

fn collect<T>(result: Result<T, FieldError>, errors: &mut Vec<FieldError>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            errors.push(e);
            None
        }
    }
}

fn normalize_location(location: Option<String>) -> Option<String> {
    location
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
}

fn end_before_start() -> FieldError {
    FieldError::new("endTime", "End time must not be before start time")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn input(title: &str, start: &str, end: &str) -> EventInput {
        EventInput {
            title: Some(title.to_string()),
            start_time: Some(start.to_string()),
            end_time: Some(end.to_string()),
            ..Default::default()
        }
    }

    fn field_names(err: Error) -> Vec<String> {
        match err {
            Error::Validation { errors, .. } => errors.into_iter().map(|e| e.field).collect(),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn test_kind_falls_back_to_other() {
        assert_eq!(EventKind::parse("meeting"), EventKind::Meeting);
        assert_eq!(EventKind::parse(" Health "), EventKind::Health);
        assert_eq!(EventKind::parse("birthday"), EventKind::Other);
        assert_eq!(EventKind::parse(""), EventKind::Other);

        let kind: EventKind = serde_json::from_str("\"party\"").unwrap();
        assert_eq!(kind, EventKind::Other);
    }

    #[test]
    fn test_event_wire_format() {
        let json = r#"{
            "id": 7,
            "userId": 3,
            "title": "Dentist",
            "startTime": "2024-03-04T09:00:00Z",
            "endTime": "2024-03-04T10:00:00Z",
            "location": null,
            "type": "unknown"
        }"#;
        let event: Event = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind, EventKind::Other);
        assert_eq!(event.user_id, 3);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "other");
        assert_eq!(value["startTime"], "2024-03-04T09:00:00Z");
    }

    #[test]
    fn test_draft_defaults() {
        let mut raw = input("  Standup ", "2024-03-04T09:00:00Z", "2024-03-04T09:15:00Z");
        raw.location = Some("   ".to_string());
        let draft = raw.into_draft(Tz::UTC).unwrap();

        assert_eq!(draft.title, "Standup");
        assert_eq!(draft.kind, EventKind::Other);
        assert_eq!(draft.location, None);
    }

    #[test]
    fn test_draft_reports_every_field() {
        let err = EventInput::default().into_draft(Tz::UTC).unwrap_err();
        assert_eq!(field_names(err), vec!["title", "startTime", "endTime"]);
    }

    #[test]
    fn test_draft_rejects_end_before_start() {
        let err = input("Flight", "2024-03-04T12:00:00Z", "2024-03-04T11:00:00Z")
            .into_draft(Tz::UTC)
            .unwrap_err();
        assert_eq!(field_names(err), vec!["endTime"]);
    }

    #[test]
    fn test_draft_rejects_long_title() {
        let long = "x".repeat(MAX_TITLE_LEN + 1);
        let err = input(&long, "2024-03-04T12:00:00Z", "2024-03-04T13:00:00Z")
            .into_draft(Tz::UTC)
            .unwrap_err();
        assert_eq!(field_names(err), vec!["title"]);
    }

    #[test]
    fn test_patch_merges_and_checks_order() {
        let event = Event::from_draft(
            1,
            1,
            input("Gym", "2024-03-04T17:00:00Z", "2024-03-04T18:00:00Z")
                .into_draft(Tz::UTC)
                .unwrap(),
        );

        let patch = EventInput {
            kind: Some("health".to_string()),
            location: Some("Downtown".to_string()),
            ..Default::default()
        }
        .into_patch(Tz::UTC)
        .unwrap();
        let updated = patch.apply_to(&event).unwrap();
        assert_eq!(updated.kind, EventKind::Health);
        assert_eq!(updated.location.as_deref(), Some("Downtown"));
        assert_eq!(updated.title, "Gym");

        // Moving only the end before the stored start is rejected
        let patch = EventInput {
            end_time: Some("2024-03-04T16:00:00Z".to_string()),
            ..Default::default()
        }
        .into_patch(Tz::UTC)
        .unwrap();
        assert!(patch.apply_to(&event).is_err());
    }

    #[test]
    fn test_patch_clears_location() {
        let patch = EventInput {
            location: Some(String::new()),
            ..Default::default()
        }
        .into_patch(Tz::UTC)
        .unwrap();
        assert_eq!(patch.location, Some(None));
    }

    #[test]
    fn test_registration_validation() {
        let err = RegisterInput {
            username: Some(" ".to_string()),
            email: Some("not-an-email".to_string()),
            password: None,
        }
        .validate()
        .unwrap_err();
        assert_eq!(field_names(err), vec!["username", "email", "password"]);

        let ok = RegisterInput {
            username: Some("maija".to_string()),
            email: Some("maija@example.com".to_string()),
            password: Some("hunter22".to_string()),
        }
        .validate()
        .unwrap();
        assert_eq!(ok.username, "maija");
    }
}
