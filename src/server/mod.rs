//! HTTP surface — Axum server exposing the pipeline entry points.
//!
//! `POST /pipeline/shadow/run` is the primary entry point and returns
//! one complete report per call. The legacy `POST /api/v1/analyze` is
//! permanently unsupported and always answers 501 with a remediation
//! pointer. CORS enabled for local development.

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::pipeline::{self, PipelineContext, ShadowRunRequest};
use crate::types::PipelineError;

pub type AppState = Arc<PipelineContext>;

/// Serve the API until shutdown is signalled (Ctrl+C).
pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "API server starting on http://localhost:{port}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received.");
        })
        .await?;
    Ok(())
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin("*".parse::<HeaderValue>().unwrap())
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/pipeline/shadow/run", post(run_shadow_pipeline))
        .route("/api/v1/analyze", post(analyze_not_supported))
        .route("/health", get(health))
        .layer(cors)
        .with_state(state)
}

/// POST /pipeline/shadow/run
///
/// Returns a complete, schema-stamped report, or a structured error for
/// orchestration-level violations (gate, kill-switch, strict schema).
async fn run_shadow_pipeline(
    State(state): State<AppState>,
    Json(request): Json<ShadowRunRequest>,
) -> Response {
    match pipeline::run_shadow(&state, &request).await {
        Ok(report) => (StatusCode::OK, Json(report)).into_response(),
        Err(e) => {
            let status = match &e {
                PipelineError::ActivationGateRejected { .. } => StatusCode::FORBIDDEN,
                PipelineError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
                PipelineError::ConnectorNotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            };
            error!(code = e.code(), error = %e, "Shadow run refused");
            let body = serde_json::json!({
                "error": {
                    "code": e.code(),
                    "message": e.to_string(),
                },
            });
            (status, Json(body)).into_response()
        }
    }
}

/// POST /api/v1/analyze — disabled by design. Always 501; callers must
/// use the pipeline execution model instead.
async fn analyze_not_supported() -> Response {
    let body = serde_json::json!({
        "error": {
            "code": "ANALYZE_ENDPOINT_NOT_SUPPORTED",
            "message": "This endpoint is intentionally not supported. Use /pipeline/shadow/run.",
            "remediation": {
                "endpoint": "/pipeline/shadow/run",
                "notes": "The analyzer runs inside the pipeline execution model.",
            },
        },
    });
    (StatusCode::NOT_IMPLEMENTED, Json(body)).into_response()
}

/// GET /health
async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
