//! HTTP surface over a shared [`Coordinator`].
//!
//! | Method | Path             | Purpose                                   |
//! |--------|------------------|-------------------------------------------|
//! | GET    | `/health`        | liveness plus current cache size          |
//! | POST   | `/process-pdf`   | multipart upload (field `pdf`) → outline  |
//! | POST   | `/clear-cache`   | drop every cached outline                 |
//! | POST   | `/cleanup`       | purge the intermediate working areas      |
//! | GET    | `/test-pipeline` | which external tools and files are present|
//!
//! A stage failure is answered with the fallback outline and `200`, so a
//! client always gets something it can render. Malformed requests get `400`
//! and infrastructure problems `500`, both as `{"error": "..."}`.

use crate::coordinator::Coordinator;
use crate::error::PipelineError;
use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Name of the multipart field carrying the PDF.
pub const UPLOAD_FIELD: &str = "pdf";

/// Default request body limit for uploads.
pub const DEFAULT_UPLOAD_LIMIT_BYTES: usize = 100 * 1024 * 1024;

/// State shared by every handler.
#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<Coordinator>,
    pub upload_limit_bytes: usize,
}

impl AppState {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self {
            coordinator,
            upload_limit_bytes: DEFAULT_UPLOAD_LIMIT_BYTES,
        }
    }

    pub fn with_upload_limit(mut self, bytes: usize) -> Self {
        self.upload_limit_bytes = bytes;
        self
    }
}

// ── Responses ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub message: &'static str,
    pub cache_size: usize,
}

#[derive(Debug, Serialize)]
pub struct ComponentsResponse {
    pub pipeline_components: BTreeMap<String, bool>,
    pub current_directory: String,
}

/// `{"error": message}` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        match e {
            PipelineError::InvalidDocumentName { .. } | PipelineError::NotAPdf { .. } => {
                Self::bad_request(e.to_string())
            }
            other => Self::internal(format!("Server error: {other}")),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

// ── Router ───────────────────────────────────────────────────────────────

pub fn build_router(state: AppState) -> Router {
    let limit = state.upload_limit_bytes;
    Router::new()
        .route("/health", get(health))
        .route("/process-pdf", post(process_pdf))
        .route("/clear-cache", post(clear_cache))
        .route("/cleanup", post(cleanup))
        .route("/test-pipeline", get(test_pipeline))
        .layer(DefaultBodyLimit::max(limit))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C.
///
/// The working directories are created before the listener opens.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    state
        .coordinator
        .workspace()
        .ensure()
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Starting outline server on http://{}", listener.local_addr()?);

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Could not install Ctrl-C handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

// ── Handlers ─────────────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        message: "PDF outline server is running",
        cache_size: state.coordinator.cache().len(),
    })
}

async fn process_pdf(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("Malformed upload: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        let file_name = field.file_name().unwrap_or_default().to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::bad_request(format!("Malformed upload: {e}")))?;
        upload = Some((file_name, bytes));
        break;
    }

    let Some((file_name, bytes)) = upload else {
        return Err(ApiError::bad_request("No PDF file provided"));
    };
    if file_name.trim().is_empty() {
        return Err(ApiError::bad_request("No file selected"));
    }
    info!("Received upload {} ({} bytes)", file_name, bytes.len());

    let outcome = state
        .coordinator
        .process_upload_or_fallback(&bytes, &file_name)
        .await
        .inspect_err(|e| error!("Error processing {}: {}", file_name, e))?;
    Ok(Json(outcome.document).into_response())
}

async fn clear_cache(State(state): State<AppState>) -> Json<serde_json::Value> {
    let cache = state.coordinator.cache();
    cache.clear().await;
    info!("Outline cache cleared");
    Json(json!({
        "message": "Outline cache cleared",
        "cache_size": cache.len(),
    }))
}

async fn cleanup(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .coordinator
        .cleanup()
        .await
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok(Json(json!({ "message": "Cleanup completed" })))
}

async fn test_pipeline(State(state): State<AppState>) -> Json<ComponentsResponse> {
    let base_dir = &state.coordinator.config().base_dir;
    let current_directory = base_dir
        .canonicalize()
        .unwrap_or_else(|_| base_dir.clone())
        .display()
        .to_string();
    Json(ComponentsResponse {
        pipeline_components: state.coordinator.probe_components(),
        current_directory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_name_is_a_client_error() {
        let err: ApiError = PipelineError::InvalidDocumentName { name: "..".into() }.into();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn infrastructure_error_is_prefixed() {
        let err: ApiError = PipelineError::Internal("boom".into()).into();
        assert_eq!(err.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.message, "Server error: Internal error: boom");
    }
}
