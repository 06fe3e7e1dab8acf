use super::{CalendarDb, TimeRange};
use crate::calendar::models::NewUser;
use crate::calendar::{Event, EventDraft, EventId, EventPatch, User, UserId};
use crate::error::{store_error, AppResult, Error};
use async_trait::async_trait;
use chrono::Duration;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client as RedisClient, RedisError};
use tracing::{debug, info};

/// Redis keys
mod keys {
    pub const USER_SEQ: &str = "kalenteri:user:seq";
    pub const USER_PREFIX: &str = "kalenteri:user:";
    pub const USERNAME_PREFIX: &str = "kalenteri:username:";
    pub const EMAIL_PREFIX: &str = "kalenteri:email:";
    pub const EVENT_SEQ: &str = "kalenteri:event:seq";
    pub const EVENT_PREFIX: &str = "kalenteri:event:";
    /// Sorted set of a user's event ids, scored by start time in milliseconds
    pub const USER_EVENTS_PREFIX: &str = "kalenteri:events:";
    pub const SESSION_PREFIX: &str = "kalenteri:session:";

    pub fn user(id: u64) -> String {
        format!("{}{}", USER_PREFIX, id)
    }

    pub fn username(name: &str) -> String {
        format!("{}{}", USERNAME_PREFIX, name)
    }

    pub fn email(email: &str) -> String {
        format!("{}{}", EMAIL_PREFIX, email.to_lowercase())
    }

    pub fn event(id: u64) -> String {
        format!("{}{}", EVENT_PREFIX, id)
    }

    pub fn user_events(user_id: u64) -> String {
        format!("{}{}", USER_EVENTS_PREFIX, user_id)
    }

    pub fn session(id: &str) -> String {
        format!("{}{}", SESSION_PREFIX, id)
    }
}

fn redis_error(op: &'static str) -> impl Fn(RedisError) -> Error {
    move |e| store_error(&format!("Redis {} error: {}", op, e))
}

/// Decode an `MGET` reply, skipping ids whose record is gone
fn decode_events(records: Vec<Option<String>>) -> AppResult<Vec<Event>> {
    records
        .into_iter()
        .flatten()
        .map(|json| serde_json::from_str(&json).map_err(Error::from))
        .collect()
}

/// Redis database implementation
#[derive(Clone)]
pub struct RedisDb {
    conn: ConnectionManager,
}

impl RedisDb {
    /// Connect to Redis at `redis_url`
    pub async fn connect(redis_url: &str) -> AppResult<Self> {
        info!("Connecting to Redis at {}", redis_url);

        let client = RedisClient::open(redis_url)
            .map_err(|e| store_error(&format!("Failed to create Redis client: {}", e)))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| store_error(&format!("Failed to connect to Redis: {}", e)))?;

        Ok(Self { conn })
    }

    fn connection(&self) -> ConnectionManager {
        self.conn.clone()
    }

    async fn load_user(&self, id: UserId) -> AppResult<Option<User>> {
        let mut conn = self.connection();
        let data: Option<String> = conn.get(keys::user(id)).await.map_err(redis_error("GET"))?;
        data.map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    async fn load_event(&self, id: EventId) -> AppResult<Option<Event>> {
        let mut conn = self.connection();
        let data: Option<String> = conn.get(keys::event(id)).await.map_err(redis_error("GET"))?;
        data.map(|json| serde_json::from_str(&json).map_err(Error::from))
            .transpose()
    }

    async fn store_event(&self, event: &Event) -> AppResult<()> {
        let mut conn = self.connection();
        let json = serde_json::to_string(event)?;

        conn.set::<_, _, ()>(keys::event(event.id), &json)
            .await
            .map_err(redis_error("SET"))?;
        conn.zadd::<_, _, _, ()>(
            keys::user_events(event.user_id),
            event.id,
            event.start_time.timestamp_millis(),
        )
        .await
        .map_err(redis_error("ZADD"))?;

        Ok(())
    }

    /// Look up a user id stored under an index key
    async fn indexed_user(&self, key: String) -> AppResult<Option<User>> {
        let mut conn = self.connection();
        let id: Option<UserId> = conn.get(key).await.map_err(redis_error("GET"))?;
        match id {
            Some(id) => self.load_user(id).await,
            None => Ok(None),
        }
    }
}

#[async_trait]
impl CalendarDb for RedisDb {
    async fn create_user(&self, user: NewUser) -> AppResult<User> {
        let mut conn = self.connection();
        let id: UserId = conn.incr(keys::USER_SEQ, 1).await.map_err(redis_error("INCR"))?;

        // Claim the username and email before writing the record
        let username_key = keys::username(&user.username);
        let claimed: bool = conn
            .set_nx(&username_key, id)
            .await
            .map_err(redis_error("SETNX"))?;
        if !claimed {
            return Err(Error::Conflict("Username already exists".to_string()));
        }

        let claimed: bool = conn
            .set_nx(keys::email(&user.email), id)
            .await
            .map_err(redis_error("SETNX"))?;
        if !claimed {
            conn.del::<_, ()>(&username_key)
                .await
                .map_err(redis_error("DEL"))?;
            return Err(Error::Conflict("Email already exists".to_string()));
        }

        let user = User {
            id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
        };
        let json = serde_json::to_string(&user)?;
        conn.set::<_, _, ()>(keys::user(id), &json)
            .await
            .map_err(redis_error("SET"))?;

        info!("Registered user {} ({})", user.username, id);
        Ok(user)
    }

    async fn get_user(&self, id: UserId) -> AppResult<Option<User>> {
        self.load_user(id).await
    }

    async fn get_user_by_username(&self, username: &str) -> AppResult<Option<User>> {
        self.indexed_user(keys::username(username)).await
    }

    async fn get_user_by_email(&self, email: &str) -> AppResult<Option<User>> {
        self.indexed_user(keys::email(email)).await
    }

    async fn create_event(&self, user_id: UserId, draft: EventDraft) -> AppResult<Event> {
        let mut conn = self.connection();
        let id: EventId = conn.incr(keys::EVENT_SEQ, 1).await.map_err(redis_error("INCR"))?;

        let event = Event::from_draft(id, user_id, draft);
        self.store_event(&event).await?;

        debug!("Stored event {} for user {}", id, user_id);
        Ok(event)
    }

    async fn list_events(&self, user_id: UserId, range: Option<TimeRange>) -> AppResult<Vec<Event>> {
        let mut conn = self.connection();
        let key = keys::user_events(user_id);

        let ids: Vec<EventId> = match range {
            Some(range) => conn
                .zrangebyscore(
                    &key,
                    range.start.timestamp_millis(),
                    range.end.timestamp_millis(),
                )
                .await
                .map_err(redis_error("ZRANGEBYSCORE"))?,
            None => conn
                .zrangebyscore(&key, "-inf", "+inf")
                .await
                .map_err(redis_error("ZRANGEBYSCORE"))?,
        };

        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let event_keys: Vec<String> = ids.into_iter().map(keys::event).collect();
        let records: Vec<Option<String>> = conn
            .mget(&event_keys)
            .await
            .map_err(redis_error("MGET"))?;

        decode_events(records)
    }

    async fn get_event(&self, id: EventId, user_id: UserId) -> AppResult<Option<Event>> {
        Ok(self
            .load_event(id)
            .await?
            .filter(|event| event.user_id == user_id))
    }

    async fn update_event(
        &self,
        id: EventId,
        user_id: UserId,
        patch: EventPatch,
    ) -> AppResult<Option<Event>> {
        let Some(existing) = self.get_event(id, user_id).await? else {
            return Ok(None);
        };

        let updated = patch.apply_to(&existing)?;
        self.store_event(&updated).await?;
        Ok(Some(updated))
    }

    async fn delete_event(&self, id: EventId, user_id: UserId) -> AppResult<bool> {
        if self.get_event(id, user_id).await?.is_none() {
            return Ok(false);
        }

        let mut conn = self.connection();
        conn.zrem::<_, _, ()>(keys::user_events(user_id), id)
            .await
            .map_err(redis_error("ZREM"))?;
        let removed: usize = conn.del(keys::event(id)).await.map_err(redis_error("DEL"))?;

        Ok(removed > 0)
    }

    async fn create_session(&self, session_id: &str, user_id: UserId, ttl: Duration) -> AppResult<()> {
        let mut conn = self.connection();
        let key = keys::session(session_id);

        conn.set::<_, _, ()>(&key, user_id)
            .await
            .map_err(redis_error("SET"))?;
        conn.expire::<_, ()>(&key, ttl.num_seconds())
            .await
            .map_err(redis_error("EXPIRE"))?;

        Ok(())
    }

    async fn session_user(&self, session_id: &str) -> AppResult<Option<UserId>> {
        let mut conn = self.connection();
        conn.get(keys::session(session_id))
            .await
            .map_err(redis_error("GET"))
    }

    async fn delete_session(&self, session_id: &str) -> AppResult<bool> {
        let mut conn = self.connection();
        let removed: usize = conn
            .del(keys::session(session_id))
            .await
            .map_err(redis_error("DEL"))?;
        Ok(removed > 0)
    }
}
