use miette::Diagnostic;
use serde::Serialize;
use thiserror::Error;

/// A single rejected input field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    /// Name of the field as it appears on the wire
    pub field: String,
    /// Human-readable reason
    pub message: String,
}

impl FieldError {
    pub fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Main error type for the application
#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("{message}")]
    #[diagnostic(code(kalenteri::validation))]
    Validation {
        message: String,
        errors: Vec<FieldError>,
    },

    #[error("Unauthorized")]
    #[diagnostic(code(kalenteri::unauthorized))]
    Unauthorized,

    #[error("Invalid username or password")]
    #[diagnostic(code(kalenteri::invalid_credentials))]
    InvalidCredentials,

    #[error("{0}")]
    #[diagnostic(code(kalenteri::not_found))]
    NotFound(String),

    #[error("{0}")]
    #[diagnostic(code(kalenteri::conflict))]
    Conflict(String),

    #[error("Store error: {0}")]
    #[diagnostic(code(kalenteri::store))]
    Store(String),

    #[error("Environment error: {0}")]
    #[diagnostic(code(kalenteri::environment))]
    Environment(String),

    #[error("Configuration error: {0}")]
    #[diagnostic(code(kalenteri::config))]
    Config(String),

    #[error(transparent)]
    #[diagnostic(code(kalenteri::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(kalenteri::serialization))]
    Serialization(String),

    #[error("Other error: {0}")]
    #[diagnostic(code(kalenteri::other))]
    Other(String),
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Type alias for Result with our Error type
pub type AppResult<T> = Result<T, Error>;

/// Helper to create environment errors
pub fn env_error(var: &str) -> Error {
    Error::Environment(format!("Missing environment variable: {}", var))
}

/// Helper to create configuration errors
pub fn config_error(message: &str) -> Error {
    Error::Config(message.to_string())
}

/// Helper to create store errors
pub fn store_error(message: &str) -> Error {
    Error::Store(message.to_string())
}

/// Helper to create validation errors
pub fn validation_error(message: &str, errors: Vec<FieldError>) -> Error {
    Error::Validation {
        message: message.to_string(),
        errors,
    }
}

/// Helper to create not-found errors for events
pub fn event_not_found() -> Error {
    Error::NotFound("Event not found".to_string())
}
