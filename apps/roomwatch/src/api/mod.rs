//! # roomwatch HTTP API Module
//!
//! ## Endpoints
//!
//! - `GET /`, `GET /health` - Health check (503 if the database is down)
//! - `POST /api/signals/submit` - Upload a scan (Basic auth user)
//! - `POST /api/signals/server` - Estimator confidence for a scan, no session change
//! - `POST /api/fingerprint/collect` - Store a labelled training sample
//! - `GET /api/presence_history` - All users' sessions grouped by day and user
//! - `GET /api/users/{id}/presence_history` - One user's sessions grouped by day
//! - `GET /api/current_occupants` - Open sessions per room
//!
//! ## Environment
//!
//! - `ROOMWATCH_CORS_ORIGINS`: Comma-separated list of allowed origins, or "*" for all (default: localhost only)
//! - `ROOMWATCH_RATE_LIMIT`: Requests per second (default: 100, 0 to disable)

mod auth;
mod handlers;
mod middleware;
mod types;

pub use auth::{AuthUser, basic_auth_username};
pub use middleware::{CounterRequestId, create_rate_limiter, get_rate_limit_from_env};
pub use types::{
    ApiError, CurrentOccupantsResponse, ErrorResponse, HealthResponse, HistoryQuery,
    MessageResponse, PercentageResponse, PresenceHistoryResponse, UserHistoryResponse,
};

use crate::config::Config;
use crate::pipeline::UploadPipeline;
use crate::reaper::run_reaper;
use crate::registration::{RETRY_INTERVAL, RegisterRequest, register_with_proxy};
use axum::{
    Router,
    body::Body,
    http::{HeaderValue, Method, Request, header},
    middleware as axum_middleware,
    routing::{get, post},
};
use roomwatch_core::{PresenceError, RedbStore, StaleSessionReaper};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// Largest accepted request body (multipart uploads included).
const MAX_BODY_BYTES: usize = 32 * 1024 * 1024;

// =============================================================================
// SERVER STATE
// =============================================================================

/// Shared server state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<RedbStore>,
    pub pipeline: Arc<UploadPipeline>,
}

impl AppState {
    #[must_use]
    pub fn new(store: Arc<RedbStore>, pipeline: UploadPipeline) -> Self {
        Self {
            store,
            pipeline: Arc::new(pipeline),
        }
    }
}

// =============================================================================
// CORS CONFIGURATION
// =============================================================================

/// Build the CORS layer from `ROOMWATCH_CORS_ORIGINS`:
/// - "*": allow every origin
/// - unset or no valid entries: localhost only
/// - otherwise: the comma-separated origins
fn build_cors_layer() -> CorsLayer {
    let origins_env = std::env::var("ROOMWATCH_CORS_ORIGINS").ok();

    match origins_env.as_deref() {
        Some("*") => {
            tracing::warn!("CORS: Allowing ALL origins (ROOMWATCH_CORS_ORIGINS=*)");
            CorsLayer::permissive()
        }
        Some(origins) => {
            let allowed_origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|s| {
                    let trimmed = s.trim();
                    match trimmed.parse::<HeaderValue>() {
                        Ok(hv) => {
                            tracing::info!("CORS: Allowing origin: {}", trimmed);
                            Some(hv)
                        }
                        Err(e) => {
                            tracing::warn!("CORS: Invalid origin '{}': {}", trimmed, e);
                            None
                        }
                    }
                })
                .collect();

            if allowed_origins.is_empty() {
                tracing::warn!("CORS: No valid origins in ROOMWATCH_CORS_ORIGINS, defaulting to localhost only");
                build_localhost_cors()
            } else {
                CorsLayer::new()
                    .allow_origin(allowed_origins)
                    .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
                    .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
            }
        }
        None => build_localhost_cors(),
    }
}

fn build_localhost_cors() -> CorsLayer {
    let origins: Vec<HeaderValue> = [
        "http://localhost:3000",
        "http://localhost:8080",
        "http://127.0.0.1:3000",
        "http://127.0.0.1:8080",
    ]
    .into_iter()
    .filter_map(|o| o.parse::<HeaderValue>().ok())
    .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

// =============================================================================
// ROUTER CREATION
// =============================================================================

/// Create the axum router with all endpoints and middleware.
///
/// Middleware stack (outer to inner):
/// 1. Request id - assigned, then echoed on the response
/// 2. Tracing - one span per request, carrying the id
/// 3. CORS
/// 4. Body limit
/// 5. Rate limiting (if enabled)
pub fn create_router(state: AppState) -> Router {
    let cors = build_cors_layer();

    let rate_limit = get_rate_limit_from_env();
    let rate_limiter = if rate_limit > 0 {
        tracing::info!("Rate limiting enabled: {} requests/second", rate_limit);
        Some(create_rate_limiter(rate_limit))
    } else {
        tracing::info!("Rate limiting disabled");
        None
    };

    let mut router = Router::new()
        .route("/", get(handlers::health_handler))
        .route("/health", get(handlers::health_handler))
        .route("/api/signals/submit", post(handlers::submit_handler))
        .route("/api/signals/server", post(handlers::signals_server_handler))
        .route(
            "/api/fingerprint/collect",
            post(handlers::fingerprint_collect_handler),
        )
        .route(
            "/api/presence_history",
            get(handlers::presence_history_handler),
        )
        .route(
            "/api/users/{id}/presence_history",
            get(handlers::user_presence_history_handler),
        )
        .route(
            "/api/current_occupants",
            get(handlers::current_occupants_handler),
        );

    if let Some(limiter) = rate_limiter {
        router = router.layer(axum_middleware::from_fn_with_state(
            limiter,
            middleware::rate_limit_middleware,
        ));
    }

    let trace = TraceLayer::new_for_http().make_span_with(|request: &Request<Body>| {
        let request_id = request
            .headers()
            .get(middleware::REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("-");
        tracing::info_span!(
            "request",
            id = %request_id,
            method = %request.method(),
            uri = %request.uri(),
        )
    });

    router
        .layer(axum::extract::DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(cors)
        .layer(trace)
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(CounterRequestId::default()))
        .with_state(state)
}

// =============================================================================
// SERVER STARTUP
// =============================================================================

/// Start the HTTP server with its background tasks, and run until Ctrl-C.
pub async fn run_server(config: Config, store: Arc<RedbStore>) -> Result<(), PresenceError> {
    let pipeline = UploadPipeline::from_config(Arc::clone(&store), &config)?;
    let state = AppState::new(Arc::clone(&store), pipeline);
    let router = create_router(state);
    let cancel = CancellationToken::new();

    let mut background: Vec<(&'static str, JoinHandle<()>)> = vec![(
        "reaper",
        tokio::spawn(run_reaper(
            Arc::clone(&store),
            StaleSessionReaper::new(chrono::Duration::seconds(config.reaper.inactivity_secs)),
            Duration::from_secs(config.reaper.tick_secs),
            cancel.child_token(),
        )),
    )];

    let endpoints = config.endpoints();
    if endpoints.skip_registration {
        tracing::info!("Proxy registration skipped");
    } else {
        let http = reqwest::Client::builder()
            .timeout(config.dependency_timeout())
            .build()
            .map_err(|e| PresenceError::Dependency(format!("Cannot build HTTP client: {e}")))?;
        let registration = register_with_proxy(
            http,
            endpoints.proxy_url.clone(),
            RegisterRequest::http(&config.registration.system_uri, config.server_port),
            RETRY_INTERVAL,
            cancel.child_token(),
        );
        background.push((
            "registration",
            tokio::spawn(async move {
                let outcome = registration.await;
                tracing::debug!("Registration task finished: {:?}", outcome);
            }),
        ));
    }

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| PresenceError::Io(format!("Bind failed: {}", e)))?;

    tracing::info!("roomwatch listening on {} ({:?} mode)", addr, config.mode);

    let served = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .map_err(|e| PresenceError::Io(format!("Server error: {}", e)));

    stop_background_tasks(&cancel, background).await;
    served
}

/// Cancel the background tasks and wait for every one of them to finish.
async fn stop_background_tasks(
    cancel: &CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<()>)>,
) {
    cancel.cancel();
    for (name, task) in tasks {
        if let Err(e) = task.await {
            tracing::error!("{} task ended abnormally: {}", name, e);
        }
    }
}

/// Resolve on Ctrl-C or when `cancel` fires, cancelling background tasks.
async fn shutdown_signal(cancel: CancellationToken) {
    tokio::select! {
        result = tokio::signal::ctrl_c() => match result {
            Ok(()) => tracing::info!("Shutdown requested"),
            Err(e) => {
                tracing::error!("Cannot listen for shutdown signal: {}", e);
                cancel.cancelled().await;
            }
        },
        () = cancel.cancelled() => {}
    }
    cancel.cancel();
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn shutdown_joins_every_background_task() {
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicUsize::new(0));

        let tasks = ["reaper", "registration"]
            .into_iter()
            .map(|name| {
                let token = cancel.child_token();
                let finished = Arc::clone(&finished);
                let task = tokio::spawn(async move {
                    token.cancelled().await;
                    tokio::task::yield_now().await;
                    finished.fetch_add(1, Ordering::SeqCst);
                });
                (name, task)
            })
            .collect();

        stop_background_tasks(&cancel, tasks).await;
        assert!(cancel.is_cancelled());
        assert_eq!(finished.load(Ordering::SeqCst), 2);
    }
}
