use super::{CalendarDb, TimeRange};
use crate::calendar::models::NewUser;
use crate::calendar::{Event, EventDraft, EventId, EventPatch, User, UserId};
use crate::error::AppResult;
use async_trait::async_trait;
use chrono::Duration;
use moka::future::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Listings kept at most, across all users
pub const DEFAULT_MAX_LISTINGS: u64 = 10_000;
/// How long a listing may be served before it is read again
pub const DEFAULT_LISTING_TTL: std::time::Duration = std::time::Duration::from_secs(300);

type ListingKey = (UserId, u64, Option<TimeRange>);

/// Caches event listings per user and window on top of another store.
///
/// Listings are keyed by the owner's current generation. A successful write
/// moves the owner to a fresh generation, so listings read before the write
/// (including reads still in flight) are never served afterwards. A user whose
/// generation was evicted gets a fresh one too.
pub struct CachedDb<D> {
    inner: D,
    listings: Cache<ListingKey, Arc<Vec<Event>>>,
    generations: Cache<UserId, u64>,
    next_generation: AtomicU64,
}

impl<D: CalendarDb> CachedDb<D> {
    pub fn new(inner: D) -> Self {
        Self::with_limits(inner, DEFAULT_MAX_LISTINGS, DEFAULT_LISTING_TTL)
    }

    pub fn with_limits(inner: D, max_listings: u64, ttl: std::time::Duration) -> Self {
        let listings = Cache::builder()
            .max_capacity(max_listings)
            .time_to_live(ttl)
            .build();
        let generations = Cache::builder().max_capacity(max_listings).build();

        Self {
            inner,
            listings,
            generations,
            next_generation: AtomicU64::new(0),
        }
    }

    fn fresh_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::SeqCst)
    }

    async fn generation(&self, user_id: UserId) -> u64 {
        self.generations
            .get_with(user_id, async { self.fresh_generation() })
            .await
    }

    /// Retire every listing cached for `user_id`
    async fn invalidate(&self, user_id: UserId) {
        let generation = self.fresh_generation();
        self.generations.insert(user_id, generation).await;
        debug!("User {} moved to listing generation {}", user_id, generation);
    }
}

#[async_trait]
impl<D: CalendarDb> CalendarDb for CachedDb<D> {
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        self.inner.create_user(user).await
    }

    async fn get_user(&self, id: UserId) -> AppResult<Option<User>> {
        self.inner.get_user(id).await
    }

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        self.inner.get_user_by_username(username).await
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.inner.get_user_by_email(email).await
    }

    async fn create_event(&self, user_id: UserId, draft: EventDraft) -> AppResult<Event> {
        let event = self.inner.create_event(user_id, draft).await?;
        self.invalidate(user_id).await;
        Ok(event)
    }

    async fn list_events(&self, user_id: UserId, range: Option<TimeRange>) -> AppResult<Vec<Event>> {
        // The generation is read before the store so a write landing in
        // between leaves this result under a retired key
        let key = (user_id, self.generation(user_id).await, range);
        if let Some(events) = self.listings.get(&key).await {
            return Ok(events.as_ref().clone());
        }

        let events = self.inner.list_events(user_id, range).await?;
        self.listings.insert(key, Arc::new(events.clone())).await;
        Ok(events)
    }

    async fn get_event(&self, id: EventId, user_id: UserId) -> AppResult<Option<Event>> {
        self.inner.get_event(id, user_id).await
    }

    async fn update_event(
        &self,
        id: EventId,
        user_id: UserId,
        patch: EventPatch,
    ) -> AppResult<Option<Event>> {
        let updated = self.inner.update_event(id, user_id, patch).await?;
        if updated.is_some() {
            self.invalidate(user_id).await;
        }
        Ok(updated)
    }

    async fn delete_event(&self, id: EventId, user_id: UserId) -> AppResult<bool> {
        let deleted = self.inner.delete_event(id, user_id).await?;
        if deleted {
            self.invalidate(user_id).await;
        }
        Ok(deleted)
    }

    async fn create_session(&self, session_id: &str, user_id: UserId, ttl: Duration) -> AppResult<()> {
        self.inner.create_session(session_id, user_id, ttl).await
    }

    async fn session_user(&self, session_id: &str) -> AppResult<Option<UserId>> {
        self.inner.session_user(session_id).await
    }

    async fn delete_session(&self, session_id: &str) -> AppResult<bool> {
        self.inner.delete_session(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::EventKind;
    use crate::store::InMemoryDb;
    use chrono::{TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use tokio::sync::Notify;

    /// Counts how often listings reach the backing store
    ///
    /// With `hold` set, the next listing parks after reading the store until
    /// `release` is notified.
    #[derive(Default)]
    struct CountingDb {
        db: InMemoryDb,
        lists: AtomicUsize,
        hold: AtomicBool,
        read_done: Notify,
        release: Notify,
    }

    #[async_trait]
    impl CalendarDb for CountingDb {
        async fn create_user(&self, user: NewUser) -> AppResult<User> {
            self.db.create_user(user).await
        }

        async fn get_user(&self, id: UserId) -> AppResult<Option<User>> {
            self.db.get_user(id).await
        }

        async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
            self.db.get_user_by_username(username).await
        }

        async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
            self.db.get_user_by_email(email).await
        }

        async fn create_event(&self, user_id: UserId, draft: EventDraft) -> AppResult<Event> {
            self.db.create_event(user_id, draft).await
        }

        async fn list_events(&self, user_id: UserId, range: Option<TimeRange>) -> AppResult<Vec<Event>> {
            self.lists.fetch_add(1, Ordering::SeqCst);
            let events = self.db.list_events(user_id, range).await?;
            if self.hold.swap(false, Ordering::SeqCst) {
                self.read_done.notify_one();
                self.release.notified().await;
            }
            Ok(events)
        }

        async fn get_event(&self, id: EventId, user_id: UserId) -> AppResult<Option<Event>> {
            self.db.get_event(id, user_id).await
        }

        async fn update_event(
            &self,
            id: EventId,
            user_id: UserId,
            patch: EventPatch,
        ) -> AppResult<Option<Event>> {
            self.db.update_event(id, user_id, patch).await
        }

        async fn delete_event(&self, id: EventId, user_id: UserId) -> AppResult<bool> {
            self.db.delete_event(id, user_id).await
        }

        async fn create_session(&self, session_id: &str, user_id: UserId, ttl: Duration) -> AppResult<()> {
            self.db.create_session(session_id, user_id, ttl).await
        }

        async fn session_user(&self, session_id: &str) -> AppResult<Option<UserId>> {
            self.db.session_user(session_id).await
        }

        async fn delete_session(&self, session_id: &str) -> AppResult<bool> {
            self.db.delete_session(session_id).await
        }
    }

    fn draft(title: &str) -> EventDraft {
        let start = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();
        EventDraft {
            title: title.to_string(),
            start_time: start,
            end_time: start + Duration::hours(1),
            location: None,
            kind: EventKind::Meeting,
        }
    }

    fn march() -> TimeRange {
        TimeRange::new(
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 31, 23, 59, 59).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_repeated_listing_is_served_from_cache() {
        let cached = CachedDb::new(CountingDb::default());
        cached.create_event(1, draft("Planning")).await.unwrap();

        let first = cached.list_events(1, Some(march())).await.unwrap();
        let second = cached.list_events(1, Some(march())).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(cached.inner.lists.load(Ordering::SeqCst), 1);

        // A different window is a different entry
        cached.list_events(1, None).await.unwrap();
        assert_eq!(cached.inner.lists.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_writes_invalidate_owner_listings() {
        let cached = CachedDb::new(CountingDb::default());
        let event = cached.create_event(1, draft("Planning")).await.unwrap();
        cached.list_events(1, Some(march())).await.unwrap();
        cached.list_events(2, Some(march())).await.unwrap();

        let patch = EventPatch {
            title: Some("Replanning".to_string()),
            ..Default::default()
        };
        cached.update_event(event.id, 1, patch).await.unwrap();

        let events = cached.list_events(1, Some(march())).await.unwrap();
        assert_eq!(events[0].title, "Replanning");
        assert_eq!(cached.inner.lists.load(Ordering::SeqCst), 3);

        // Other users' entries survive
        cached.list_events(2, Some(march())).await.unwrap();
        assert_eq!(cached.inner.lists.load(Ordering::SeqCst), 3);

        assert!(cached.delete_event(event.id, 1).await.unwrap());
        assert!(cached.list_events(1, Some(march())).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_cache() {
        let cached = CachedDb::new(CountingDb::default());
        cached.list_events(1, None).await.unwrap();

        // Nothing to delete for this user
        assert!(!cached.delete_event(99, 1).await.unwrap());
        cached.list_events(1, None).await.unwrap();
        assert_eq!(cached.inner.lists.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_listing_read_during_write_is_not_served_after_it() {
        let cached = Arc::new(CachedDb::new(CountingDb::default()));
        cached.inner.hold.store(true, Ordering::SeqCst);

        let reader = {
            let cached = cached.clone();
            tokio::spawn(async move { cached.list_events(1, None).await.unwrap() })
        };

        // The write completes while the read is parked with its old result
        cached.inner.read_done.notified().await;
        cached.create_event(1, draft("Planning")).await.unwrap();
        cached.inner.release.notify_one();
        assert!(reader.await.unwrap().is_empty());

        let events = cached.list_events(1, None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].title, "Planning");
    }

    #[tokio::test]
    async fn test_listings_are_bounded() {
        let cached = CachedDb::with_limits(CountingDb::default(), 16, DEFAULT_LISTING_TTL);
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();

        for i in 0..500 {
            let start = base + Duration::minutes(i);
            let range = TimeRange::new(start, start + Duration::days(1));
            cached.list_events(1, Some(range)).await.unwrap();
        }

        cached.listings.run_pending_tasks().await;
        assert!(cached.listings.entry_count() <= 16);
    }

    #[tokio::test]
    async fn test_listings_expire() {
        let ttl = std::time::Duration::from_millis(50);
        let cached = CachedDb::with_limits(CountingDb::default(), 100, ttl);

        cached.list_events(1, None).await.unwrap();
        cached.list_events(1, None).await.unwrap();
        assert_eq!(cached.inner.lists.load(Ordering::SeqCst), 1);

        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        cached.list_events(1, None).await.unwrap();
        assert_eq!(cached.inner.lists.load(Ordering::SeqCst), 2);
    }
}
