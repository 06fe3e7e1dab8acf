//! HTTP surface: routing, shared state and error responses.

pub mod auth;
pub mod handlers;

use crate::calendar::RangeResolver;
use crate::config::Config;
use crate::error::{Error, FieldError};
use crate::store::CalendarDb;
use auth::{require_session, AuthConfig, AuthService};
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    /// Database for users, events and sessions
    pub db: Arc<dyn CalendarDb>,
    /// Auth service for accounts and tokens
    pub auth: Arc<AuthService>,
    pub resolver: RangeResolver,
}

impl AppState {
    pub fn new(config: Config, db: Arc<dyn CalendarDb>) -> Self {
        let auth = AuthService::new(AuthConfig::from_config(&config), Arc::clone(&db));
        let resolver = RangeResolver::new(config.timezone, config.week_start);
        Self {
            config: Arc::new(config),
            db,
            auth: Arc::new(auth),
            resolver,
        }
    }
}

/// Build the application router
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/user", get(handlers::current_user))
        .route(
            "/api/events",
            get(handlers::list_events).post(handlers::create_event),
        )
        .route(
            "/api/events/{id}",
            put(handlers::update_event).delete(handlers::delete_event),
        )
        .route("/api/calendar/{mode}", get(handlers::calendar_view))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_session));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/register", post(handlers::register))
        .route("/api/login", post(handlers::login))
        .route("/api/logout", post(handlers::logout))
        .merge(protected)
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer(&state.config.allowed_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

/// JSON body of every error response
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,
}

impl ErrorBody {
    fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            errors: Vec::new(),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            Error::Validation { message, errors } => {
                (StatusCode::BAD_REQUEST, ErrorBody { message, errors })
            }
            Error::Conflict(message) => (StatusCode::BAD_REQUEST, ErrorBody::message(message)),
            Error::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                ErrorBody::message(t!("http.unauthorized")),
            ),
            err @ Error::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, ErrorBody::message(err.to_string()))
            }
            Error::NotFound(message) => (StatusCode::NOT_FOUND, ErrorBody::message(message)),
            err => {
                // Internal details stay in the log
                error!("Request failed: {:?}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody::message(t!("http.internal_error")),
                )
            }
        };

        (status, Json(body)).into_response()
    }
}
