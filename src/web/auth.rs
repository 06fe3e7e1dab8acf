use super::AppState;
use crate::calendar::models::{Credentials, NewUser, RegisterInput};
use crate::calendar::{User, UserId};
use crate::config::Config;
use crate::error::{AppResult, Error};
use crate::store::CalendarDb;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Name of the cookie carrying the session token
pub const SESSION_COOKIE: &str = "session";

const HASH_SCHEME: &str = "sha256";
const SALT_LEN: usize = 16;

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID)
    pub sub: String,
    /// Server-side session the token belongs to
    pub sid: String,
    /// Name (username)
    pub name: Option<String>,
    /// Expiration time (as UTC timestamp)
    pub exp: usize,
    /// Issued at (as UTC timestamp)
    pub iat: usize,
}

/// Authentication configuration
#[derive(Clone)]
pub struct AuthConfig {
    /// JWT secret for signing/verifying tokens
    pub jwt_secret: String,
    /// Session and token lifetime in minutes
    pub session_ttl_minutes: i64,
}

impl AuthConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            jwt_secret: config.jwt_secret.clone(),
            session_ttl_minutes: config.session_ttl_minutes,
        }
    }

    fn ttl(&self) -> Duration {
        Duration::minutes(self.session_ttl_minutes)
    }
}

/// An authenticated request's identity, placed in request extensions by
/// [`require_session`]
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: UserId,
    pub username: Option<String>,
}

/// Auth service for accounts, sessions and tokens
pub struct AuthService {
    config: Arc<AuthConfig>,
    db: Arc<dyn CalendarDb>,
}

impl AuthService {
    /// Create a new auth service
    pub fn new(config: AuthConfig, db: Arc<dyn CalendarDb>) -> Self {
        Self {
            config: Arc::new(config),
            db,
        }
    }

    /// Create an account and log it in. Returns the user and a session token.
    pub async fn register(&self, input: RegisterInput) -> AppResult<(User, String)> {
        let registration = input.validate()?;

        if self
            .db
            .get_user_by_username(&registration.username)
            .await?
            .is_some()
        {
            return Err(Error::Conflict("Username already exists".to_string()));
        }
        if self
            .db
            .get_user_by_email(&registration.email)
            .await?
            .is_some()
        {
            return Err(Error::Conflict("Email already exists".to_string()));
        }

        let user = self
            .db
            .create_user(NewUser {
                username: registration.username,
                email: registration.email,
                password_hash: hash_password(&registration.password),
            })
            .await?;

        let token = self.start_session(&user).await?;
        Ok((user, token))
    }

    /// Check credentials and open a new session
    pub async fn login(&self, credentials: Credentials) -> AppResult<(User, String)> {
        let user = self
            .db
            .get_user_by_username(credentials.username.trim())
            .await?
            .filter(|user| verify_password(&credentials.password, &user.password_hash))
            .ok_or_else(|| {
                debug!("Rejected login for {}", credentials.username);
                Error::InvalidCredentials
            })?;

        let token = self.start_session(&user).await?;
        info!("User {} logged in", user.username);
        Ok((user, token))
    }

    /// Drop the session behind `token`. Unknown or invalid tokens are ignored.
    pub async fn logout(&self, token: &str) -> AppResult<()> {
        if let Ok(claims) = self.validate_token(token) {
            if self.db.delete_session(&claims.sid).await? {
                debug!("Closed session {}", claims.sid);
            }
        }
        Ok(())
    }

    /// Record a new session for `user` and sign a token for it
    pub async fn start_session(&self, user: &User) -> AppResult<String> {
        let session_id = Uuid::new_v4().to_string();
        self.db
            .create_session(&session_id, user.id, self.config.ttl())
            .await?;
        self.generate_token(user, &session_id)
    }

    /// Generate a new JWT token
    pub fn generate_token(&self, user: &User, session_id: &str) -> AppResult<String> {
        let now = Utc::now();
        let exp = now + self.config.ttl();

        let claims = Claims {
            sub: user.id.to_string(),
            sid: session_id.to_string(),
            name: Some(user.username.clone()),
            exp: exp.timestamp() as usize,
            iat: now.timestamp() as usize,
        };

        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| Error::Other(format!("Failed to generate token: {}", e)))
    }

    /// Validate a JWT token
    pub fn validate_token(&self, token: &str) -> AppResult<Claims> {
        decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::default(),
        )
        .map(|token_data| token_data.claims)
        .map_err(|e| {
            debug!("JWT validation error: {:?}", e);
            Error::Unauthorized
        })
    }

    /// Resolve a token to a live session
    pub async fn authorize(&self, token: &str) -> AppResult<Session> {
        let claims = self.validate_token(token)?;
        let user_id: UserId = claims.sub.parse().map_err(|_| Error::Unauthorized)?;

        match self.db.session_user(&claims.sid).await? {
            Some(owner) if owner == user_id => Ok(Session {
                user_id,
                username: claims.name,
            }),
            Some(_) => {
                warn!("Session {} presented for the wrong user", claims.sid);
                Err(Error::Unauthorized)
            }
            None => Err(Error::Unauthorized),
        }
    }

    /// Cookie carrying a freshly issued token
    pub fn session_cookie(&self, token: String) -> Cookie<'static> {
        Cookie::build((SESSION_COOKIE, token))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Lax)
            .max_age(time::Duration::minutes(self.config.session_ttl_minutes))
            .build()
    }
}

/// Cookie that clears the session cookie in the browser
pub fn removal_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}

/// Extract the session token from the cookie or an `Authorization: Bearer` header
pub fn extract_token(headers: &HeaderMap) -> Option<String> {
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get(SESSION_COOKIE) {
        return Some(cookie.value().to_string());
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty())
}

/// Middleware rejecting requests without a live session
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, Error> {
    let token = extract_token(req.headers()).ok_or(Error::Unauthorized)?;
    let session = state.auth.authorize(&token).await?;

    req.extensions_mut().insert(session);
    Ok(next.run(req).await)
}

/// Salted SHA-256 hash in the form `sha256$<salt>$<hex digest>`
pub fn hash_password(password: &str) -> String {
    let salt: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(SALT_LEN)
        .map(char::from)
        .collect();
    format!("{}${}${}", HASH_SCHEME, salt, digest(&salt, password))
}

/// Check a password against a hash produced by [`hash_password`]
pub fn verify_password(password: &str, stored: &str) -> bool {
    let mut parts = stored.splitn(3, '$');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(HASH_SCHEME), Some(salt), Some(expected)) => digest(salt, password) == expected,
        _ => false,
    }
}

fn digest(salt: &str, password: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDb;
    use axum::http::HeaderValue;

    fn service() -> AuthService {
        let config = AuthConfig {
            jwt_secret: "test-secret".to_string(),
            session_ttl_minutes: 30,
        };
        AuthService::new(config, Arc::new(InMemoryDb::new()))
    }

    fn registration(username: &str, email: &str) -> RegisterInput {
        RegisterInput {
            username: Some(username.to_string()),
            email: Some(email.to_string()),
            password: Some("correct horse".to_string()),
        }
    }

    #[test]
    fn test_password_hashing() {
        let hash = hash_password("hunter22");
        assert!(hash.starts_with("sha256$"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        // Same password, different salt
        assert_ne!(hash, hash_password("hunter22"));
        assert!(!verify_password("hunter22", "plaintext"));
    }

    #[test]
    fn test_extract_token_sources() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc"));
        assert_eq!(extract_token(&headers).as_deref(), Some("abc"));

        // The cookie wins over the header
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; session=xyz"));
        assert_eq!(extract_token(&headers).as_deref(), Some("xyz"));
    }

    #[tokio::test]
    async fn test_register_login_logout() {
        let auth = service();
        let (user, token) = auth
            .register(registration("maija", "maija@example.com"))
            .await
            .unwrap();
        assert_ne!(user.password_hash, "correct horse");

        let session = auth.authorize(&token).await.unwrap();
        assert_eq!(session.user_id, user.id);
        assert_eq!(session.username.as_deref(), Some("maija"));

        let (_, second) = auth
            .login(Credentials {
                username: "maija".to_string(),
                password: "correct horse".to_string(),
            })
            .await
            .unwrap();

        auth.logout(&token).await.unwrap();
        assert!(matches!(auth.authorize(&token).await, Err(Error::Unauthorized)));
        // Other sessions of the same user stay open
        assert!(auth.authorize(&second).await.is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_registration() {
        let auth = service();
        auth.register(registration("maija", "maija@example.com"))
            .await
            .unwrap();

        let err = auth
            .register(registration("maija", "other@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Username already exists");

        let err = auth
            .register(registration("matti", "maija@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Email already exists");
    }

    #[tokio::test]
    async fn test_bad_credentials() {
        let auth = service();
        auth.register(registration("maija", "maija@example.com"))
            .await
            .unwrap();

        for (username, password) in [("maija", "wrong"), ("nobody", "correct horse")] {
            let result = auth
                .login(Credentials {
                    username: username.to_string(),
                    password: password.to_string(),
                })
                .await;
            assert!(matches!(result, Err(Error::InvalidCredentials)));
        }
    }

    #[tokio::test]
    async fn test_foreign_and_forged_tokens() {
        let auth = service();
        assert!(auth.authorize("not-a-jwt").await.is_err());

        let (user, _) = auth
            .register(registration("maija", "maija@example.com"))
            .await
            .unwrap();
        // Signed correctly but no session record behind it
        let orphan = auth.generate_token(&user, "missing").unwrap();
        assert!(matches!(auth.authorize(&orphan).await, Err(Error::Unauthorized)));

        let other = AuthService::new(
            AuthConfig {
                jwt_secret: "another-secret".to_string(),
                session_ttl_minutes: 30,
            },
            Arc::new(InMemoryDb::new()),
        );
        let token = other.generate_token(&user, "sid").unwrap();
        assert!(auth.validate_token(&token).is_err());
    }
}
