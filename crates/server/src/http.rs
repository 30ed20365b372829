//! HTTP Endpoints
//!
//! REST API for the triage orchestrator.

use std::time::{Duration, Instant};

use axum::{
    extract::{DefaultBodyLimit, Json, State},
    http::{HeaderValue, Method, StatusCode},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use triage_core::{ConversationTurn, MediaReference, OrchestrationOutcome, TurnKind, TurnRole};

use crate::metrics::{metrics_handler, record_request};
use crate::state::AppState;
use crate::ServerError;

/// Create the application router
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;
    let cors_layer = build_cors_layer(&server.cors_origins, server.cors_enabled);
    let timeout = Duration::from_secs(server.timeout_seconds);
    let body_limit = server.max_body_bytes;

    Router::new()
        .route("/v1/turns", post(process_turn))
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(timeout))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(cors_layer)
        .with_state(state)
}

/// Build CORS layer from configured origins
///
/// - If cors_enabled is false, returns permissive layer (for dev)
/// - If cors_origins is empty, defaults to localhost:3000
fn build_cors_layer(origins: &[String], enabled: bool) -> CorsLayer {
    if !enabled {
        tracing::warn!("CORS is disabled - allowing all origins (NOT FOR PRODUCTION)");
        return CorsLayer::permissive();
    }

    let parsed_origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| {
            origin.parse::<HeaderValue>().ok().or_else(|| {
                tracing::warn!("Invalid CORS origin: {}", origin);
                None
            })
        })
        .collect();

    if parsed_origins.is_empty() {
        tracing::info!("No valid CORS origins configured, defaulting to localhost:3000");
        return CorsLayer::new()
            .allow_origin(HeaderValue::from_static("http://localhost:3000"))
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any);
    }

    tracing::info!("CORS configured with {} origins", parsed_origins.len());
    CorsLayer::new()
        .allow_origin(parsed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any)
}

/// One patient turn plus the caller-owned history
#[derive(Debug, Deserialize)]
pub struct TurnRequest {
    /// Correlation id for logs; generated when absent
    #[serde(default)]
    pub conversation_id: Option<String>,
    /// The patient's new message
    pub incoming: String,
    #[serde(default)]
    pub history: Vec<ConversationTurn>,
    /// Media attached to the incoming turn
    #[serde(default)]
    pub media: Vec<MediaReference>,
}

#[derive(Debug, Serialize)]
pub struct TurnResponse {
    pub conversation_id: String,
    #[serde(flatten)]
    pub outcome: OrchestrationOutcome,
    /// Turn to append to history before the next request
    pub assistant_turn: ConversationTurn,
}

/// POST /v1/turns
async fn process_turn(
    State(state): State<AppState>,
    Json(request): Json<TurnRequest>,
) -> Result<Json<TurnResponse>, ServerError> {
    let started = Instant::now();
    let result = run_turn(&state, request).await;

    let status = match &result {
        Ok(_) => StatusCode::OK,
        Err(ServerError::InvalidRequest(_)) => StatusCode::BAD_REQUEST,
        Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    record_request("/v1/turns", status, started.elapsed());

    result.map(Json)
}

async fn run_turn(state: &AppState, request: TurnRequest) -> Result<TurnResponse, ServerError> {
    if let Some(position) = request
        .history
        .iter()
        .position(|turn| turn.role == TurnRole::Patient && turn.kind == TurnKind::FollowUp)
    {
        return Err(ServerError::InvalidRequest(format!(
            "history[{}]: patient turns cannot be follow-up questions",
            position
        )));
    }

    let conversation_id = request
        .conversation_id
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let incoming = ConversationTurn::patient(request.incoming).with_timestamp(chrono::Utc::now());

    // Dropping the handler (client gone, request timeout) cancels the turn
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let outcome = state
        .orchestrator
        .process_turn(
            &conversation_id,
            &incoming,
            &request.history,
            &request.media,
            &cancel,
        )
        .await?;

    let assistant_turn = outcome.assistant_turn().with_timestamp(chrono::Utc::now());
    Ok(TurnResponse {
        conversation_id,
        outcome,
        assistant_turn,
    })
}

/// Liveness
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Readiness: the oracle backend must answer within two seconds
async fn readiness_check(State(state): State<AppState>) -> (StatusCode, Json<serde_json::Value>) {
    let model = state.backend.model_name().to_string();
    let backend_status =
        match tokio::time::timeout(Duration::from_secs(2), state.backend.is_available()).await {
            Ok(true) => "ok",
            Ok(false) => "unreachable",
            Err(_) => "timeout",
        };
    let ready = backend_status == "ok";

    let status_code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status_code,
        Json(serde_json::json!({
            "status": if ready { "ready" } else { "not_ready" },
            "checks": {
                "oracle_backend": {
                    "status": backend_status,
                    "model": model,
                    "endpoint": state.config.oracle.endpoint,
                }
            }
        })),
    )
}
