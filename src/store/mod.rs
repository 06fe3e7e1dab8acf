//! Persistence for users, events and login sessions.

pub mod cache;
pub mod memory;
pub mod redis;

pub use cache::CachedDb;
pub use memory::InMemoryDb;
pub use redis::RedisDb;

use crate::calendar::{Event, EventDraft, EventId, EventPatch, User, UserId, ViewWindow};
use crate::calendar::models::NewUser;
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Closed interval on event start times
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.start && instant <= self.end
    }
}

impl From<&ViewWindow> for TimeRange {
    fn from(window: &ViewWindow) -> Self {
        Self::new(window.start, window.end)
    }
}

/// Storage backend for the calendar.
///
/// Every event operation is scoped to the owning user; an event belonging to
/// someone else behaves exactly like one that does not exist.
#[async_trait]
pub trait CalendarDb: Send + Sync + 'static {
    /// Store a new user. Fails with `Conflict` when the username or email is taken.
    async fn create_user(&self, user: NewUser) -> AppResult<User>;

    async fn get_user(&self, id: UserId) -> AppResult<Option<User>>;

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>>;

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>>;

    async fn create_event(&self, user_id: UserId, draft: EventDraft) -> AppResult<Event>;

    /// List a user's events, optionally only those starting inside `range`
    async fn list_events(&self, user_id: UserId, range: Option<TimeRange>) -> AppResult<Vec<Event>>;

    async fn get_event(&self, id: EventId, user_id: UserId) -> AppResult<Option<Event>>;

    /// Apply a patch; `None` when the event does not exist for this user
    async fn update_event(
        &self,
        id: EventId,
        user_id: UserId,
        patch: EventPatch,
    ) -> AppResult<Option<Event>>;

    /// Delete an event; `false` when there was nothing to delete
    async fn delete_event(&self, id: EventId, user_id: UserId) -> AppResult<bool>;

    async fn create_session(&self, session_id: &str, user_id: UserId, ttl: Duration) -> AppResult<()>;

    /// The user a live session belongs to
    async fn session_user(&self, session_id: &str) -> AppResult<Option<UserId>>;

    async fn delete_session(&self, session_id: &str) -> AppResult<bool>;
}
