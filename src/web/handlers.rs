use super::auth::{extract_token, removal_cookie, Session};
use super::AppState;
use crate::calendar::display::{legend, KindStyle};
use crate::calendar::models::{Credentials, RegisterInput};
use crate::calendar::{project, Event, EventInput, Projection, UserProfile, ViewMode, ViewWindow};
use crate::error::{event_not_found, validation_error, AppResult, Error, FieldError};
use crate::store::TimeRange;
use crate::utils::time::{parse_date, parse_timestamp, today};
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use axum_extra::extract::cookie::CookieJar;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info};

/// Query parameters of `GET /api/events`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

/// Query parameters of `GET /api/calendar/{mode}`
#[derive(Debug, Default, Deserialize)]
pub struct ViewQuery {
    pub date: Option<String>,
}

/// A rendered calendar page
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarView {
    pub title: String,
    pub window: ViewWindow,
    pub projection: Projection,
    pub legend: Vec<KindStyle>,
    /// Reference date of the previous page
    pub previous: NaiveDate,
    /// Reference date of the next page
    pub next: NaiveDate,
}

/// Unwrap a JSON body, turning malformed input into a validation error
fn json_body<T>(payload: Result<Json<T>, JsonRejection>, message: &str) -> AppResult<T> {
    payload.map(|Json(value)| value).map_err(|rejection| {
        debug!("Rejected request body: {}", rejection.body_text());
        validation_error(message, vec![FieldError::new("body", rejection.body_text())])
    })
}

/// Path ids that are not numbers cannot name an event
fn event_id(raw: &str) -> AppResult<u64> {
    raw.parse().map_err(|_| event_not_found())
}

/// Handler for health checks
pub async fn health() -> &'static str {
    "OK"
}

pub async fn register(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<RegisterInput>, JsonRejection>,
) -> AppResult<(StatusCode, CookieJar, Json<UserProfile>)> {
    let input = json_body(payload, "Invalid user data")?;
    let (user, token) = state.auth.register(input).await?;

    let jar = jar.add(state.auth.session_cookie(token));
    Ok((StatusCode::CREATED, jar, Json(user.profile())))
}

pub async fn login(
    State(state): State<AppState>,
    jar: CookieJar,
    payload: Result<Json<Credentials>, JsonRejection>,
) -> AppResult<(CookieJar, Json<UserProfile>)> {
    let credentials = json_body(payload, "Invalid login data")?;
    let (user, token) = state.auth.login(credentials).await?;

    let jar = jar.add(state.auth.session_cookie(token));
    Ok((jar, Json(user.profile())))
}

pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
    jar: CookieJar,
) -> AppResult<(CookieJar, Json<Value>)> {
    if let Some(token) = extract_token(&headers) {
        state.auth.logout(&token).await?;
    }

    Ok((
        jar.remove(removal_cookie()),
        Json(json!({ "message": "Logged out" })),
    ))
}

pub async fn current_user(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
) -> AppResult<Json<UserProfile>> {
    let user = state
        .db
        .get_user(session.user_id)
        .await?
        .ok_or(Error::Unauthorized)?;
    Ok(Json(user.profile()))
}

pub async fn list_events(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Query(query): Query<EventsQuery>,
) -> AppResult<Json<Vec<Event>>> {
    let tz = state.config.timezone;

    // Both bounds or no filtering at all
    let range = match (query.start_date.as_deref(), query.end_date.as_deref()) {
        (Some(start), Some(end)) => {
            let start = parse_timestamp("startDate", start, tz);
            let end = parse_timestamp("endDate", end, tz);
            match (start, end) {
                (Ok(start), Ok(end)) => Some(TimeRange::new(start, end)),
                (start, end) => {
                    let errors = [start.err(), end.err()].into_iter().flatten().collect();
                    return Err(validation_error("Invalid date range", errors));
                }
            }
        }
        _ => None,
    };

    let mut events = state.db.list_events(session.user_id, range).await?;
    events.sort_by_key(|event| (event.start_time, event.id));
    Ok(Json(events))
}

pub async fn create_event(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    payload: Result<Json<EventInput>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Event>)> {
    let draft = json_body(payload, "Invalid event data")?.into_draft(state.config.timezone)?;
    let event = state.db.create_event(session.user_id, draft).await?;

    info!("User {} created event {}", session.user_id, event.id);
    Ok((StatusCode::CREATED, Json(event)))
}

pub async fn update_event(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
    payload: Result<Json<EventInput>, JsonRejection>,
) -> AppResult<Json<Event>> {
    let id = event_id(&id)?;
    let patch = json_body(payload, "Invalid event data")?.into_patch(state.config.timezone)?;

    let event = state
        .db
        .update_event(id, session.user_id, patch)
        .await?
        .ok_or_else(event_not_found)?;
    Ok(Json(event))
}

pub async fn delete_event(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = event_id(&id)?;

    if state.db.delete_event(id, session.user_id).await? {
        info!("User {} deleted event {}", session.user_id, id);
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(event_not_found())
    }
}

/// Resolve the window for a view, fetch its events and project them
pub async fn calendar_view(
    State(state): State<AppState>,
    Extension(session): Extension<Session>,
    Path(mode): Path<String>,
    Query(query): Query<ViewQuery>,
) -> AppResult<Json<CalendarView>> {
    let mode: ViewMode = mode.parse()?;
    let reference = match query.date.as_deref() {
        Some(date) => parse_date("date", date)
            .map_err(|e| validation_error("Invalid date", vec![e]))?,
        None => today(state.config.timezone),
    };

    let window = state.resolver.resolve(reference, mode);
    let events = state
        .db
        .list_events(session.user_id, Some(TimeRange::from(&window)))
        .await?;
    let projection = project(&events, &window);

    debug!(
        "{} view of {} for user {}: {} events",
        mode,
        reference,
        session.user_id,
        projection.event_count()
    );

    Ok(Json(CalendarView {
        title: state.resolver.title(reference, mode),
        previous: mode.step(reference, false),
        next: mode.step(reference, true),
        window,
        projection,
        legend: legend(),
    }))
}
