use axum::body::Bytes;
use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use personid_core::{IdentifyError, Report};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tower_http::services::ServeDir;

use crate::engine::{EngineError, EngineHandle, EngineInfo};
use crate::render::{self, ResultView};
use crate::storage::{Storage, StorageError};

/// Shared state for every handler.
pub struct AppState {
    pub engine: EngineHandle,
    pub storage: Storage,
    pub info: EngineInfo,
}

/// Failures that end a request with an error status instead of a page.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("malformed upload: {0}")]
    Multipart(#[from] MultipartError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::Multipart(e) => (e.status(), e.body_text()).into_response(),
            other => {
                tracing::error!(error = %other, "request failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
            }
        }
    }
}

/// Uploads turned away before (or instead of) producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    NoFileUploaded,
    NoFileSelected,
    InvalidFileName,
    UnreadableImage,
}

impl Rejection {
    fn message(self) -> &'static str {
        match self {
            Rejection::NoFileUploaded => "No file uploaded",
            Rejection::NoFileSelected => "No file selected",
            Rejection::InvalidFileName => "Invalid file name",
            Rejection::UnreadableImage => "Uploaded file is not a readable image",
        }
    }

    /// Status for the HTML form; the form re-renders normally for an empty submission.
    fn page_status(self) -> StatusCode {
        match self {
            Rejection::NoFileUploaded | Rejection::NoFileSelected => StatusCode::OK,
            Rejection::InvalidFileName | Rejection::UnreadableImage => StatusCode::BAD_REQUEST,
        }
    }
}

enum Outcome {
    Rejected(Rejection),
    Identified { report: Report, image_url: String },
}

struct Upload {
    file_name: Option<String>,
    bytes: Bytes,
}

#[derive(Serialize)]
struct IdentifyResponse {
    image_path: String,
    #[serde(flatten)]
    report: Report,
}

pub fn router(state: Arc<AppState>, max_upload_bytes: usize) -> Router {
    let static_files = ServeDir::new(state.storage.static_dir());
    Router::new()
        .route("/", get(index).post(upload_form))
        .route("/api/identify", post(upload_api))
        .route("/status", get(status))
        .nest_service("/static", static_files)
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .with_state(state)
}

async fn index() -> Html<String> {
    Html(render::page(None, None))
}

async fn upload_form(State(state): State<Arc<AppState>>, multipart: Multipart) -> Result<Response, AppError> {
    let response = match process_upload(&state, multipart).await? {
        Outcome::Rejected(rejection) => (
            rejection.page_status(),
            Html(render::page(Some(rejection.message()), None)),
        )
            .into_response(),
        Outcome::Identified { report, image_url } => Html(render::page(
            Some("Image processed!"),
            Some(ResultView {
                report: &report,
                image_url: &image_url,
            }),
        ))
        .into_response(),
    };
    Ok(response)
}

async fn upload_api(State(state): State<Arc<AppState>>, multipart: Multipart) -> Result<Response, AppError> {
    let response = match process_upload(&state, multipart).await? {
        Outcome::Rejected(rejection) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": rejection.message() })),
        )
            .into_response(),
        Outcome::Identified { report, image_url } => Json(IdentifyResponse {
            image_path: image_url,
            report,
        })
        .into_response(),
    };
    Ok(response)
}

async fn status(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "references": state.info.references,
        "threshold": state.info.threshold,
        "match_policy": state.info.policy,
        "output_mode": state.storage.output_mode().to_string(),
    }))
}

/// Save the upload, run it through the engine and apply retention.
///
/// The upload and its output stay held until the engine is done with them,
/// so retention triggered by other requests cannot remove them.
async fn process_upload(state: &AppState, mut multipart: Multipart) -> Result<Outcome, AppError> {
    let Some(Upload { file_name, bytes }) = read_file_field(&mut multipart).await? else {
        return Ok(Outcome::Rejected(Rejection::NoFileUploaded));
    };
    // A `file` part without a filename is a plain form value, not an upload.
    let Some(file_name) = file_name else {
        return Ok(Outcome::Rejected(Rejection::NoFileUploaded));
    };
    if file_name.trim().is_empty() || bytes.is_empty() {
        return Ok(Outcome::Rejected(Rejection::NoFileSelected));
    }

    let upload_path = match state.storage.upload_path(&file_name) {
        Ok(path) => path,
        Err(StorageError::InvalidFileName(name)) => {
            tracing::info!(name, "rejected upload file name");
            return Ok(Outcome::Rejected(Rejection::InvalidFileName));
        }
        Err(e) => return Err(e.into()),
    };
    let target = state.storage.output_target();
    let hold = state.storage.hold([upload_path.clone(), target.path.clone()]);

    let storage = state.storage.clone();
    let write_path = upload_path.clone();
    tokio::task::spawn_blocking(move || storage.write_upload(&write_path, &bytes)).await??;

    let result = state.engine.identify(upload_path, target.path).await;
    drop(hold);
    apply_retention(&state.storage).await;

    match result {
        Ok(report) => Ok(Outcome::Identified {
            report,
            image_url: target.url,
        }),
        Err(EngineError::Identify(IdentifyError::Decode(e))) => {
            tracing::info!(error = %e, "rejected undecodable upload");
            Ok(Outcome::Rejected(Rejection::UnreadableImage))
        }
        Err(e) => Err(e.into()),
    }
}

/// First multipart field named `file`, if any.
async fn read_file_field(multipart: &mut Multipart) -> Result<Option<Upload>, MultipartError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().map(str::to_string);
        let bytes = field.bytes().await?;
        return Ok(Some(Upload { file_name, bytes }));
    }
    Ok(None)
}

async fn apply_retention(storage: &Storage) {
    let storage = storage.clone();
    match tokio::task::spawn_blocking(move || storage.enforce_retention()).await {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, "retention cleanup failed"),
        Err(e) => tracing::warn!(error = %e, "retention task failed"),
    }
}
