//! Recon Web Server
//!
//! Axum-based REST API over the reconciliation service, plus the job
//! controller that runs scheduled reconciliation and retraining.
//!
//! Security features:
//! - API key authentication (secure by default, use --no-auth for local dev)
//! - Restrictive CORS policy
//! - Sanitized error responses

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::{cors::CorsLayer, set_header::SetResponseHeaderLayer, trace::TraceLayer};
use tracing::{error, info, warn};

use recon_core::config::SchedulerConfig;
use recon_core::{Error as CoreError, ReconciliationService};

mod handlers;
pub mod scheduler;

pub use scheduler::JobController;

/// Maximum pagination limit
pub const MAX_PAGE_LIMIT: usize = 1000;

/// Authorization header for API key auth
const AUTHORIZATION_HEADER: &str = "authorization";

/// Paths reachable without credentials
const PUBLIC_PATHS: [&str; 1] = ["/api/health"];

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    /// Whether authentication is required (secure by default)
    pub require_auth: bool,
    /// Allowed CORS origins (empty = same-origin only)
    pub allowed_origins: Vec<String>,
    /// API keys accepted as `Authorization: Bearer <key>`
    pub api_keys: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            require_auth: true,
            allowed_origins: vec![],
            api_keys: vec![],
        }
    }
}

impl ServerConfig {
    /// Read `RECON_API_KEYS` and `RECON_ALLOWED_ORIGINS` (both comma-separated)
    pub fn from_env() -> Self {
        let api_keys = std::env::var("RECON_API_KEYS")
            .map(|keys| parse_list(&keys))
            .unwrap_or_default();
        let allowed_origins = std::env::var("RECON_ALLOWED_ORIGINS")
            .map(|origins| parse_list(&origins))
            .unwrap_or_default();
        Self {
            api_keys,
            allowed_origins,
            ..Default::default()
        }
    }
}

/// Split a comma-separated list, dropping blanks
pub fn parse_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Shared application state
pub struct AppState {
    pub service: Arc<ReconciliationService>,
    pub config: ServerConfig,
}

/// Authentication middleware - validates API keys
///
/// Keys are compared in constant time.
async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if !state.config.require_auth || PUBLIC_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let api_key_valid = request
        .headers()
        .get(AUTHORIZATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|auth| auth.strip_prefix("Bearer "))
        .map(|key| validate_api_key(key, &state.config.api_keys))
        .unwrap_or(false);

    if api_key_valid {
        return next.run(request).await;
    }

    warn!(path = %request.uri().path(), "Unauthorized request - no valid auth");
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({
            "error": "Authentication required"
        })),
    )
        .into_response()
}

/// Validate an API key against the configured keys using constant-time
/// comparison.
fn validate_api_key(provided: &str, valid_keys: &[String]) -> bool {
    use subtle::ConstantTimeEq;

    let provided_bytes = provided.as_bytes();

    for key in valid_keys {
        let key_bytes = key.as_bytes();
        // Only compare if lengths match (constant-time for same-length keys)
        if provided_bytes.len() == key_bytes.len() && provided_bytes.ct_eq(key_bytes).into() {
            return true;
        }
    }
    false
}

/// Create the application router
pub fn create_router(service: Arc<ReconciliationService>, config: ServerConfig) -> Router {
    let state = Arc::new(AppState {
        service,
        config: config.clone(),
    });

    let api_routes = Router::new()
        .route("/health", get(handlers::health))
        // Accounts
        .route(
            "/accounts",
            get(handlers::list_accounts).post(handlers::create_account),
        )
        .route(
            "/accounts/:id/reconciliations",
            get(handlers::account_history),
        )
        .route(
            "/accounts/:id/adjustments",
            get(handlers::account_adjustments),
        )
        .route("/accounts/:id/reconcile", post(handlers::reconcile_account))
        .route(
            "/accounts/:id/reconcile/manual",
            post(handlers::reconcile_account_manual),
        )
        .route("/accounts/:id/insights", get(handlers::get_insights))
        // Reconciliation runs
        .route("/reconcile", post(handlers::reconcile_all))
        .route(
            "/reconciliation/status",
            get(handlers::reconciliation_status),
        )
        // Model
        .route("/ai/train", post(handlers::train_model))
        .route("/ai/retrain", post(handlers::retrain_model))
        .route("/ai/status", get(handlers::model_status))
        .route("/ai/policy", post(handlers::evaluate_policy));

    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    let cors = if config.allowed_origins.is_empty() {
        // Restrictive default: only allow same-origin
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    } else {
        let origins: Vec<HeaderValue> = config
            .allowed_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
    };

    Router::new()
        .nest("/api", api_routes)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
}

/// Start the server, optionally with scheduled jobs, until Ctrl-C
pub async fn serve(
    service: Arc<ReconciliationService>,
    host: &str,
    port: u16,
    config: ServerConfig,
    scheduler: Option<SchedulerConfig>,
) -> anyhow::Result<()> {
    if !config.require_auth {
        warn!("Authentication disabled - do not expose to network!");
    } else if config.api_keys.is_empty() {
        warn!("No API keys configured (set RECON_API_KEYS); every request will be rejected");
    }

    let mut jobs = scheduler.map(|sched| {
        let mut controller = JobController::new(service.clone(), sched);
        controller.start();
        controller
    });

    let app = create_router(service, config);
    let addr = format!("{}:{}", host, port);

    info!("Starting server at http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown requested");
        })
        .await?;

    if let Some(controller) = jobs.as_mut() {
        controller.stop().await;
    }

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
        let status = match err.downcast_ref::<CoreError>() {
            Some(CoreError::NotFound(_)) => StatusCode::NOT_FOUND,
            Some(CoreError::ExternalUnavailable(_) | CoreError::InvalidData(_)) => {
                StatusCode::BAD_REQUEST
            }
            Some(CoreError::InsufficientData(_)) => StatusCode::UNPROCESSABLE_ENTITY,
            Some(CoreError::InProgress(_)) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status == StatusCode::INTERNAL_SERVER_ERROR {
            Self {
                status,
                // Return generic message to client
                message: "An internal error occurred".to_string(),
                // Keep full error for logging
                internal: Some(err),
            }
        } else {
            Self {
                status,
                message: err.to_string(),
                internal: None,
            }
        }
    }
}

#[cfg(test)]
mod tests;
