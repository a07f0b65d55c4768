//! Mailspend Web Server
//!
//! Axum-based REST API for the Mailspend email transaction extraction
//! service.
//!
//! Surface:
//! - Connected mail account management (list, disconnect, manual sync)
//! - OAuth connect/callback endpoints for the supported providers
//! - Extracted candidate listings, rejection/retry, and extraction stats
//!
//! Callers are identified by the `X-User-Id` header; an API gateway in
//! front of this service is expected to authenticate users and set it.

use std::sync::Arc;

use axum::{
    http::{header, HeaderMap, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};

use mailspend_core::{
    Database, ExtractionConfig, HttpLedgerClient, Materializer, StateStore, SyncOrchestrator,
    TokenCipher,
};

mod handlers;
mod scheduler;

pub use scheduler::{start_materializer, start_sync_scheduler, start_token_sweep};

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// Header carrying the authenticated user id, set by the upstream gateway
const USER_ID_HEADER: &str = "x-user-id";

/// Shared application state
pub struct AppState {
    pub db: Database,
    pub sync: SyncOrchestrator,
    /// Pending OAuth authorizations keyed by anti-forgery state
    pub auth_states: Arc<StateStore>,
}

impl AppState {
    pub fn new(db: Database, sync: SyncOrchestrator) -> Self {
        Self {
            db,
            sync,
            auth_states: Arc::new(StateStore::new()),
        }
    }
}

/// Extract the authenticated user id from request headers
pub fn get_user_id(headers: &HeaderMap) -> Result<i64, AppError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse().ok())
        .ok_or_else(|| AppError::unauthorized("Missing or invalid X-User-Id header"))
}

/// Success response
#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// GET /health - Liveness probe
async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Create the application router
pub fn create_router(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        // Accounts
        .route("/accounts", get(handlers::list_accounts))
        .route("/accounts/:id", delete(handlers::disconnect_account))
        .route("/accounts/:id/sync", post(handlers::sync_account))
        .route("/accounts/:id/senders", get(handlers::list_senders))
        // OAuth
        .route("/auth/:provider/connect", get(handlers::start_auth))
        .route("/auth/:provider/callback", get(handlers::finish_auth))
        // Candidates
        .route("/candidates", get(handlers::list_candidates))
        .route(
            "/candidates/unprocessed",
            get(handlers::list_unprocessed),
        )
        .route(
            "/candidates/:id/reject",
            post(handlers::reject_candidate),
        )
        .route(
            "/candidates/:id/retry",
            post(handlers::retry_candidate),
        )
        // Stats
        .route("/stats", get(handlers::get_stats));

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
        ]);

    Router::new()
        .route("/health", get(health))
        .nest("/api", api_routes)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Start the server with schedulers wired from the environment
pub async fn serve(db: Database, host: &str, port: u16) -> anyhow::Result<()> {
    let config = ExtractionConfig::from_env();
    let cipher = TokenCipher::from_env()?;
    let sync = SyncOrchestrator::new(db.clone(), cipher, config.clone())?;

    let state = Arc::new(AppState::new(db.clone(), sync.clone()));

    start_sync_scheduler(sync.clone());
    start_token_sweep(sync, state.auth_states.clone());

    match HttpLedgerClient::from_env() {
        Some(ledger) => {
            let materializer = Materializer::new(db, ledger, &config);
            start_materializer(materializer, config.materializer_interval);
        }
        None => info!(
            "Ledger service not configured (set MAILSPEND_LEDGER_URL to enable automatic \
             transaction creation)"
        ),
    }

    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Error Handling
// ============================================================================

/// Application error type with proper HTTP status codes
pub struct AppError {
    status: StatusCode,
    message: String,
    internal: Option<anyhow::Error>,
}

impl AppError {
    pub fn bad_request(msg: &str) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn unauthorized(msg: &str) -> Self {
        Self {
            status: StatusCode::UNAUTHORIZED,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn not_found(msg: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn conflict(msg: &str) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.to_string(),
            internal: None,
        }
    }

    pub fn internal(msg: &str) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.to_string(),
            internal: None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full internal error if present
        if let Some(err) = &self.internal {
            error!(error = %err, "Internal error");
        }

        let body = Json(serde_json::json!({
            "error": self.message
        }));

        (self.status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        let err = err.into();
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            // Return generic message to client
            message: "An internal error occurred".to_string(),
            // Keep full error for logging
            internal: Some(err),
        }
    }
}

#[cfg(test)]
mod tests;
