use crate::error::{config_error, env_error, AppResult};
use chrono::Weekday;
use chrono_tz::Tz;
use dotenvy::dotenv;
use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Deserialize;
use std::env;
use std::fs;
use std::net::SocketAddr;
use tracing::warn;

/// Optional overrides file, read before the environment
pub const CONFIG_FILE: &str = "config/calendar.toml";

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 5001;
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 60 * 24;
pub const DEFAULT_ALLOWED_ORIGIN: &str = "http://localhost:5173";

/// Main configuration structure for the server
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to bind
    pub host: String,
    pub port: u16,
    /// Timezone all calendar dates are interpreted in
    pub timezone: Tz,
    /// First day of a weekly view
    pub week_start: Weekday,
    /// Secret for signing session tokens
    pub jwt_secret: String,
    /// Lifetime of a login session
    pub session_ttl_minutes: i64,
    /// Redis connection string; the in-memory store is used when absent
    pub redis_url: Option<String>,
    /// Origins allowed to make credentialed cross-origin requests
    pub allowed_origins: Vec<String>,
}

/// Shape of `config/calendar.toml`. Every key is optional.
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    timezone: Option<String>,
    week_start: Option<String>,
    jwt_secret: Option<String>,
    session_ttl_minutes: Option<i64>,
    redis_url: Option<String>,
    allowed_origins: Option<Vec<String>>,
}

impl Config {
    /// Load configuration from `.env`, the config file and the environment
    pub fn load() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let file = fs::read_to_string(CONFIG_FILE).ok();
        Self::from_sources(|key| env::var(key).ok(), file.as_deref())
    }

    /// Build a config from an environment lookup and optional TOML text.
    /// Environment values win over the file, the file wins over defaults.
    pub fn from_sources<F>(lookup: F, file: Option<&str>) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: FileConfig = match file {
            Some(content) => toml::from_str(content)?,
            None => FileConfig::default(),
        };
        let env = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let host = env("HOST")
            .or(file.host)
            .unwrap_or_else(|| DEFAULT_HOST.to_string());

        let port = match env("PORT") {
            Some(port) => port
                .trim()
                .parse::<u16>()
                .map_err(|_| config_error("Invalid PORT format"))?,
            None => file.port.unwrap_or(DEFAULT_PORT),
        };

        let timezone_name = env("TIMEZONE")
            .or(file.timezone)
            .unwrap_or_else(|| "UTC".to_string());
        let timezone = timezone_name
            .trim()
            .parse::<Tz>()
            .map_err(|_| config_error(&format!("Unknown timezone: {}", timezone_name)))?;

        let week_start_name = env("WEEK_START")
            .or(file.week_start)
            .unwrap_or_else(|| "sunday".to_string());
        let week_start = week_start_name
            .trim()
            .parse::<Weekday>()
            .map_err(|_| config_error(&format!("Invalid WEEK_START: {}", week_start_name)))?;

        let jwt_secret = match env("JWT_SECRET").or(file.jwt_secret) {
            Some(secret) => secret,
            None if cfg!(debug_assertions) => {
                warn!("JWT_SECRET not set, using a random secret for this run");
                random_secret()
            }
            None => return Err(env_error("JWT_SECRET")),
        };

        let session_ttl_minutes = match env("SESSION_TTL_MINUTES") {
            Some(ttl) => ttl
                .trim()
                .parse::<i64>()
                .map_err(|_| config_error("Invalid SESSION_TTL_MINUTES format"))?,
            None => file.session_ttl_minutes.unwrap_or(DEFAULT_SESSION_TTL_MINUTES),
        };
        if session_ttl_minutes <= 0 {
            return Err(config_error("SESSION_TTL_MINUTES must be positive"));
        }

        let redis_url = env("REDIS_URL").or(file.redis_url);

        let allowed_origins = match env("ALLOWED_ORIGINS") {
            Some(origins) => origins
                .split(',')
                .map(|origin| origin.trim().to_string())
                .filter(|origin| !origin.is_empty())
                .collect(),
            None => file
                .allowed_origins
                .unwrap_or_else(|| vec![DEFAULT_ALLOWED_ORIGIN.to_string()]),
        };

        Ok(Config {
            host,
            port,
            timezone,
            week_start,
            jwt_secret,
            session_ttl_minutes,
            redis_url,
            allowed_origins,
        })
    }

    /// Socket address the server binds to
    pub fn socket_addr(&self) -> AppResult<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .map_err(|_| config_error(&format!("Invalid HOST: {}", self.host)))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timezone: Tz::UTC,
            week_start: Weekday::Sun,
            jwt_secret: random_secret(),
            session_ttl_minutes: DEFAULT_SESSION_TTL_MINUTES,
            redis_url: None,
            allowed_origins: vec![DEFAULT_ALLOWED_ORIGIN.to_string()],
        }
    }
}

fn random_secret() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(48)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_sources(env_of(&[("JWT_SECRET", "s3cret")]), None).unwrap();

        assert_eq!(config.port, 5001);
        assert_eq!(config.timezone, Tz::UTC);
        assert_eq!(config.week_start, Weekday::Sun);
        assert_eq!(config.session_ttl_minutes, 1440);
        assert_eq!(config.redis_url, None);
        assert_eq!(config.allowed_origins, vec!["http://localhost:5173"]);
        assert_eq!(config.socket_addr().unwrap().port(), 5001);
    }

    #[test]
    fn test_env_overrides_file() {
        let file = r#"
            port = 8080
            timezone = "Europe/Helsinki"
            week_start = "monday"
            allowed_origins = ["https://calendar.example.com"]
        "#;
        let env = env_of(&[
            ("JWT_SECRET", "s3cret"),
            ("PORT", "9000"),
            ("ALLOWED_ORIGINS", "http://a.test, http://b.test"),
        ]);
        let config = Config::from_sources(env, Some(file)).unwrap();

        assert_eq!(config.port, 9000);
        assert_eq!(config.timezone, chrono_tz::Europe::Helsinki);
        assert_eq!(config.week_start, Weekday::Mon);
        assert_eq!(config.allowed_origins, vec!["http://a.test", "http://b.test"]);
    }

    #[test]
    fn test_rejects_bad_values() {
        let bad_tz = env_of(&[("JWT_SECRET", "x"), ("TIMEZONE", "Mars/Olympus")]);
        assert!(Config::from_sources(bad_tz, None).is_err());

        let bad_port = env_of(&[("JWT_SECRET", "x"), ("PORT", "eighty")]);
        assert!(Config::from_sources(bad_port, None).is_err());

        let bad_day = env_of(&[("JWT_SECRET", "x"), ("WEEK_START", "someday")]);
        assert!(Config::from_sources(bad_day, None).is_err());

        let bad_ttl = env_of(&[("JWT_SECRET", "x"), ("SESSION_TTL_MINUTES", "0")]);
        assert!(Config::from_sources(bad_ttl, None).is_err());

        assert!(Config::from_sources(env_of(&[]), Some("port = \"x\"")).is_err());
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let env = env_of(&[("JWT_SECRET", "x"), ("REDIS_URL", "  ")]);
        let config = Config::from_sources(env, Some("redis_url = \"redis://cache:6379\"")).unwrap();
        assert_eq!(config.redis_url.as_deref(), Some("redis://cache:6379"));
    }
}
