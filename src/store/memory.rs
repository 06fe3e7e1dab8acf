use super::{CalendarDb, TimeRange};
use crate::calendar::models::NewUser;
use crate::calendar::{Event, EventDraft, EventId, EventPatch, User, UserId};
use crate::error::{AppResult, Error};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::RwLock;

/// In-memory implementation of the database (for testing and as a fallback)
#[derive(Debug, Default)]
pub struct InMemoryDb {
    users: RwLock<BTreeMap<UserId, User>>,
    events: RwLock<BTreeMap<EventId, Event>>,
    sessions: RwLock<HashMap<String, (UserId, DateTime<Utc>)>>,
    last_user_id: AtomicU64,
    last_event_id: AtomicU64,
}

impl InMemoryDb {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CalendarDb for InMemoryDb {
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut users = self.users.write().await;

        if users.values().any(|u| u.username == user.username) {
            return Err(Error::Conflict("Username already exists".to_string()));
        }
        if users.values().any(|u| u.email.eq_ignore_ascii_case(&user.email)) {
            return Err(Error::Conflict("Email already exists".to_string()));
        }

        let id = self.last_user_id.fetch_add(1, Ordering::SeqCst) + 1;
        let user = User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
        };
        users.insert(id, user.clone());
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> AppResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.get(&id).cloned())
    }

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users.values().find(|u| u.username == username).cloned())
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        let users = self.users.read().await;
        Ok(users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn create_event(&self, user_id: UserId, draft: EventDraft) -> AppResult<Event> {
        let id = self.last_event_id.fetch_add(1, Ordering::SeqCst) + 1;
        let event = Event::from_draft(id, user_id, draft);

        let mut events = self.events.write().await;
        events.insert(id, event.clone());
        Ok(event)
    }

    async fn list_events(&self, user_id: UserId, range: Option<TimeRange>) -> AppResult<Vec<Event>> {
        let events = self.events.read().await;
        Ok(events
            .values()
            .filter(|e| e.user_id == user_id)
            .filter(|e| range.map_or(true, |r| r.contains(e.start_time)))
            .cloned()
            .collect())
    }

    async fn get_event(&self, id: EventId, user_id: UserId) -> AppResult<Option<Event>> {
        let events = self.events.read().await;
        Ok(events.get(&id).filter(|e| e.user_id == user_id).cloned())
    }

    async fn update_event(
        &self,
        id: EventId,
        user_id: UserId,
        patch: EventPatch,
    ) -> AppResult<Option<Event>> {
        let mut events = self.events.write().await;
        let Some(existing) = events.get_mut(&id).filter(|e| e.user_id == user_id) else {
            return Ok(None);
        };

        let updated = patch.apply_to(existing)?;
        *existing = updated.clone();
        Ok(Some(updated))
    }

    async fn delete_event(&self, id: EventId, user_id: UserId) -> AppResult<bool> {
        let mut events = self.events.write().await;
        match events.get(&id) {
            Some(event) if event.user_id == user_id => {
                events.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn create_session(&self, session_id: &str, user_id: UserId, ttl: Duration) -> AppResult<()> {
        let mut sessions = self.sessions.write().await;
        let now = Utc::now();
        sessions.retain(|_, (_, expires)| *expires > now);
        sessions.insert(session_id.to_string(), (user_id, now + ttl));
        Ok(())
    }

    async fn session_user(&self, session_id: &str) -> AppResult<Option<UserId>> {
        let sessions = self.sessions.read().await;
        Ok(sessions
            .get(session_id)
            .filter(|(_, expires)| *expires > Utc::now())
            .map(|(user_id, _)| *user_id))
    }

    async fn delete_session(&self, session_id: &str) -> AppResult<bool> {
        let mut sessions = self.sessions.write().await;
        Ok(sessions.remove(session_id).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::EventKind;
    use chrono::TimeZone;

    fn new_user(name: &str) -> NewUser {
        NewUser {
            username: name.to_string(),
            email: format!("{}@example.com", name),
            password_hash: "hash".to_string(),
        }
    }

    fn draft(title: &str, hour: u32) -> EventDraft {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, hour, 0, 0).unwrap();
        EventDraft {
            title: title.to_string(),
            start_time: start,
            end_time: start + Duration::hours(1),
            location: None,
            kind: EventKind::Work,
        }
    }

    #[tokio::test]
    async fn test_user_uniqueness() {
        let db = InMemoryDb::new();
        let first = db.create_user(new_user("maija")).await.unwrap();
        assert_eq!(first.id, 1);

        let err = db.create_user(new_user("maija")).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(msg) if msg == "Username already exists"));

        let mut same_email = new_user("matti");
        same_email.email = "maija@example.com".to_string();
        let err = db.create_user(same_email).await.unwrap_err();
        assert!(matches!(err, Error::Conflict(msg) if msg == "Email already exists"));

        let found = db.get_user_by_email("maija@example.com").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(first.id));
    }

    #[tokio::test]
    async fn test_events_are_scoped_to_owner() {
        let db = InMemoryDb::new();
        let event = db.create_event(1, draft("Review", 9)).await.unwrap();

        assert!(db.get_event(event.id, 2).await.unwrap().is_none());
        assert!(db
            .update_event(event.id, 2, EventPatch::default())
            .await
            .unwrap()
            .is_none());
        assert!(!db.delete_event(event.id, 2).await.unwrap());
        assert!(db.list_events(2, None).await.unwrap().is_empty());

        assert!(db.delete_event(event.id, 1).await.unwrap());
        // Deleting twice reports nothing deleted
        assert!(!db.delete_event(event.id, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_range_filters_on_start_only() {
        let db = InMemoryDb::new();
        db.create_event(1, draft("Early", 6)).await.unwrap();
        db.create_event(1, draft("Noon", 12)).await.unwrap();

        let range = TimeRange::new(
            Utc.with_ymd_and_hms(2024, 3, 4, 6, 30, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 4, 12, 0, 0).unwrap(),
        );
        // "Early" runs until 07:00 but started before the range
        let events = db.list_events(1, Some(range)).await.unwrap();
        let titles: Vec<&str> = events.iter().map(|e| e.title.as_str()).collect();
        assert_eq!(titles, vec!["Noon"]);
    }

    #[tokio::test]
    async fn test_sessions_expire() {
        let db = InMemoryDb::new();
        db.create_session("live", 1, Duration::minutes(5)).await.unwrap();
        db.create_session("stale", 1, Duration::seconds(-1)).await.unwrap();

        assert_eq!(db.session_user("live").await.unwrap(), Some(1));
        assert_eq!(db.session_user("stale").await.unwrap(), None);

        assert!(db.delete_session("live").await.unwrap());
        assert_eq!(db.session_user("live").await.unwrap(), None);
    }
}
