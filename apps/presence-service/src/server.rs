use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    extract::State,
    http::{
        HeaderMap, HeaderName, HeaderValue, Method, StatusCode,
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        request::Parts,
    },
    response::IntoResponse,
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::identity::IdentityValidator;
use crate::presence::PresenceService;


pub const USER_SUBJECT_HEADER: &str = "x-user-subject";
pub const USER_ACCESS_TOKEN_HEADER: &str = "x-user-access-token";

const CORS_MAX_AGE: Duration = Duration::from_secs(300);

#[derive(Clone)]
pub struct AppState {
    config: Config,
    presence: Arc<PresenceService>,
    validator: Arc<dyn IdentityValidator>,
    started_at: DateTime<Utc>,
}

impl AppState {
    #[must_use]
    pub fn new(
        config: Config,
        presence: Arc<PresenceService>,
        validator: Arc<dyn IdentityValidator>,
    ) -> Self {
        Self {
            config,
            presence,
            validator,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: String,
    build_sha: String,
    uptime_seconds: i64,
}

pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config);

    Router::new()
        .route("/ping", get(ping))
        .route("/ping/", get(ping))
        .route("/health", get(health))
        .with_state(state)
        .layer(cors)
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(TraceLayer::new_for_http()),
        )
}

pub async fn serve_http(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    axum::serve(listener, build_router(state)).await
}

fn cors_layer(config: &Config) -> CorsLayer {
    let allowed = config.cors_allowed_origins.clone();
    let development = config.development;

    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _parts: &Parts| {
                let Ok(origin) = origin.to_str() else {
                    return false;
                };
                let origin = origin.trim_end_matches('/').to_ascii_lowercase();
                allowed.iter().any(|value| *value == origin)
                    || (development && origin.starts_with("http://"))
            },
        ))
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([
            ACCEPT,
            AUTHORIZATION,
            CONTENT_TYPE,
            HeaderName::from_static("x-csrf-token"),
            HeaderName::from_static(USER_SUBJECT_HEADER),
            HeaderName::from_static(USER_ACCESS_TOKEN_HEADER),
        ])
        .max_age(CORS_MAX_AGE)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime_seconds = (Utc::now() - state.started_at).num_seconds();
    Json(HealthResponse {
        status: "ok",
        service: state.config.service_name,
        build_sha: state.config.build_sha,
        uptime_seconds,
    })
}

async fn ping(State(state): State<AppState>, headers: HeaderMap) -> Result<StatusCode, ApiError> {
    let (Some(subject), Some(token)) = (
        credential(&headers, USER_SUBJECT_HEADER),
        credential(&headers, USER_ACCESS_TOKEN_HEADER),
    ) else {
        return Err(ApiError::Unauthorized);
    };

    // A stalled dependency is a server failure, so the deadline maps to 500.
    let deadline = state.config.http_request_timeout;
    tokio::time::timeout(deadline, verify_and_record(&state, subject, token))
        .await
        .map_err(|_| {
            ApiError::Internal(format!(
                "ping did not complete within {}ms",
                deadline.as_millis()
            ))
        })??;

    Ok(StatusCode::OK)
}

async fn verify_and_record(state: &AppState, subject: &str, token: &str) -> Result<(), ApiError> {
    let valid = state
        .validator
        .validate(token, subject)
        .await
        .map_err(|error| ApiError::Internal(error.to_string()))?;
    if !valid {
        return Err(ApiError::Unauthorized);
    }

    state
        .presence
        .record_presence(subject)
        .await
        .map_err(|error| ApiError::Internal(error.to_string()))?;
    Ok(())
}

// Blank counts as missing; anything else is passed on exactly as sent.
fn credential<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .filter(|value| !value.trim().is_empty())
}

#[derive(Debug)]
enum ApiError {
    Unauthorized,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "error": "unauthorized",
                })),
            )
                .into_response(),
            Self::Internal(reason) => {
                tracing::error!(%reason, "ping request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({
                        "error": "internal_error",
                    })),
                )
                    .into_response()
            }
        }
    }
}
