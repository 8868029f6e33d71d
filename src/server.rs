//! HTTP service: upload a card, review the record, save it, download the table.
//!
//! | Route            | Body                     | Response                                   |
//! |------------------|--------------------------|--------------------------------------------|
//! | `GET /`          |                          | `{"message": "Card reader API is running"}` |
//! | `POST /extract`  | multipart, field `file`  | `{"filename", "status", "data"}`           |
//! | `POST /save`     | JSON [`SaveRequest`]     | `{"status", "message"}`                    |
//! | `GET /download`  |                          | the CSV, or `{"error": "File not found"}`  |
//!
//! `data` is an [`crate::ExtractionOutcome`]: the record mapping on success,
//! or an `"Error: …"` string. Clients must check its shape.

use crate::context::PipelineContext;
use crate::extract::extract_card;
use crate::storage::{CsvStore, SaveRequest};
use axum::extract::{Multipart, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Name the CSV is offered under by `GET /download`.
pub const DOWNLOAD_NAME: &str = "business_cards.csv";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub ctx: PipelineContext,
    pub store: Arc<CsvStore>,
    pub uploads_dir: PathBuf,
}

impl AppState {
    pub fn new(ctx: PipelineContext, store: CsvStore, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            ctx,
            store: Arc::new(store),
            uploads_dir: uploads_dir.into(),
        }
    }
}

/// Build the router with permissive CORS (the review UI runs on another origin).
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/extract", post(extract_handler))
        .route("/save", post(save_handler))
        .route("/download", get(download_handler))
        .route("/download-excel", get(download_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until the process is stopped.
pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Card reader API listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(state)).await
}

/// GET / - liveness message.
pub async fn root_handler() -> Json<Value> {
    Json(json!({ "message": "Card reader API is running" }))
}

/// POST /extract - store the uploaded card, run the pipeline on it.
///
/// # Errors
/// - 400 Bad Request: no `file` field, or the multipart body is malformed
/// - 500 Internal Server Error: the upload could not be written to disk
///
/// A card the pipeline cannot read is not an HTTP error: `data` carries the
/// `"Error: …"` string and the status is still 200.
pub async fn extract_handler(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, (StatusCode, Json<Value>)> {
    let bad_request = |msg: String| (StatusCode::BAD_REQUEST, Json(json!({ "error": msg })));

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| bad_request(format!("invalid multipart body: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let filename = upload_name(field.file_name());
        let bytes = field
            .bytes()
            .await
            .map_err(|e| bad_request(format!("failed to read upload: {e}")))?;

        let path = state.uploads_dir.join(&filename);
        store_upload(&path, &bytes).await.map_err(|e| {
            warn!("Failed to store upload '{}': {}", path.display(), e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("failed to store upload: {e}") })),
            )
        })?;
        info!("Stored upload '{}' ({} bytes)", filename, bytes.len());

        let outcome = extract_card(path.to_string_lossy(), &state.ctx).await;
        return Ok(Json(json!({
            "filename": filename,
            "status": "success",
            "data": outcome,
        })));
    }

    Err(bad_request("multipart field 'file' is required".to_string()))
}

/// POST /save - append a reviewed record to the CSV store.
pub async fn save_handler(
    State(state): State<AppState>,
    Json(request): Json<SaveRequest>,
) -> Json<Value> {
    let store = Arc::clone(&state.store);
    let row = request.to_row();
    let result = tokio::task::spawn_blocking(move || store.append(&row)).await;

    match result {
        Ok(Ok(_)) => Json(json!({ "status": "success", "message": "Data saved to CSV" })),
        Ok(Err(e)) => {
            warn!("Save failed: {e}");
            Json(json!({ "status": "error", "message": e.to_string() }))
        }
        Err(e) => Json(json!({ "status": "error", "message": format!("save task failed: {e}") })),
    }
}

/// GET /download - the CSV store as an attachment.
pub async fn download_handler(State(state): State<AppState>) -> Response {
    match tokio::fs::read(state.store.path()).await {
        Ok(bytes) => (
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
                (
                    header::CONTENT_DISPOSITION,
                    format!("attachment; filename=\"{DOWNLOAD_NAME}\""),
                ),
            ],
            bytes,
        )
            .into_response(),
        Err(_) => Json(json!({ "error": "File not found" })).into_response(),
    }
}

/// Keep only the final path component of a client-supplied file name.
fn upload_name(client_name: Option<&str>) -> String {
    client_name
        .and_then(|n| Path::new(n).file_name())
        .map(|n| n.to_string_lossy().into_owned())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| "upload".to_string())
}

async fn store_upload(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, bytes).await
}
