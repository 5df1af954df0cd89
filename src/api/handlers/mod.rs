use std::io::Cursor;
use std::net::SocketAddr;

use axum::{
    extract::{ConnectInfo, Multipart, Path, Request, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use chrono::Utc;
use serde_json::{json, Value};
use uuid::Uuid;

use super::upload::{self, UploadError, ARCHIVE_UPLOAD, IMAGE_UPLOAD};
use super::AppState;
use crate::error::Error;
use crate::models::*;
use crate::transfer::write_archive;

type ApiError = (StatusCode, Json<Value>);

// ============================================================
// Error Handling
// ============================================================

fn error_body(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Map a domain error to a response. Client mistakes are returned with their
/// message; internal failures are logged in full and reported generically.
fn api_error(e: Error) -> ApiError {
    let status = match &e {
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::NotFound(_) | Error::SessionNotFound(_) => StatusCode::NOT_FOUND,
        Error::AlreadyExists(_) => StatusCode::CONFLICT,
        Error::Format(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Io { .. } | Error::CommitFailed { .. } => {
            tracing::error!("Internal error: {}", e);
            return error_body(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };
    tracing::warn!("Request failed: {}", e);
    error_body(status, e.to_string())
}

fn upload_error(e: UploadError) -> ApiError {
    let status = e.status();
    if status.is_server_error() {
        tracing::error!("Upload failed: {}", e);
        return error_body(status, "Failed to store upload");
    }
    tracing::warn!("Upload rejected: {}", e);
    error_body(status, e.to_string())
}

/// Run store and transfer work on the blocking pool.
async fn blocking<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: FnOnce() -> crate::Result<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(work).await {
        Ok(result) => result.map_err(api_error),
        Err(e) => {
            tracing::error!("Blocking task failed: {}", e);
            Err(error_body(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error",
            ))
        }
    }
}

// ============================================================
// Server
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Script telling the web client where the companion WebSocket server is.
///
/// In local mode a loopback client is pointed at loopback, whatever the
/// configured address.
pub async fn environment(State(state): State<AppState>, request: Request) -> impl IntoResponse {
    let config = &state.config;
    let mut address = config.ws_address.clone();

    if config.local {
        let client = request
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        if client.is_some_and(|ip| ip.is_loopback()) {
            address = "127.0.0.1".to_string();
        }
    }

    let env = json!({ "wsAddress": address, "wsPort": config.ws_port });
    (
        [(header::CONTENT_TYPE, "application/javascript")],
        format!("window.OpenSpaceEnvironment = {env}"),
    )
}

pub async fn list_endpoints(State(state): State<AppState>) -> Html<String> {
    let items: String = state
        .config
        .endpoints
        .iter()
        .map(|e| format!("<li><a href=\"/{0}\">{0}</a></li>", e.name))
        .collect();
    Html(format!("<h1>OpenSpace Endpoints</h1>{items}"))
}

pub async fn redirect_root(State(state): State<AppState>) -> Redirect {
    Redirect::to(&format!("/{}", state.config.redirect))
}

// ============================================================
// Assets
// ============================================================

pub async fn upload_image(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<UploadedImage>, ApiError> {
    let received = upload::receive(&mut multipart, &IMAGE_UPLOAD, &state.config.incoming_dir())
        .await
        .map_err(upload_error)?;

    let name = upload::pooled_name(received.original_filename.as_deref(), Utc::now());
    let pool = state.assets.clone();
    let stored_name = name.clone();
    blocking(move || {
        let stored = pool.put(&stored_name, &received.path);
        if let Err(e) = std::fs::remove_file(&received.path) {
            tracing::warn!("Failed to remove received upload: {}", e);
        }
        stored
    })
    .await?;

    tracing::info!("Uploaded image {}", name);
    Ok(Json(UploadedImage::new(name)))
}

pub async fn list_images(State(state): State<AppState>) -> Result<Json<ImageList>, ApiError> {
    let pool = state.assets.clone();
    let names = blocking(move || pool.list()).await?;

    let images = names
        .into_iter()
        .filter(|name| is_image_file(name))
        .map(|name| format!("{UPLOADS_PREFIX}{name}"))
        .collect();
    Ok(Json(ImageList { images }))
}

// ============================================================
// Export
// ============================================================

/// Package a project document and its assets as a zip download.
pub async fn package_project(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> Result<Response, ApiError> {
    let file_name = archive_file_name(&document, Utc::now()).map_err(api_error)?;

    let pool = state.assets.clone();
    let bytes = blocking(move || {
        let mut sink = Cursor::new(Vec::new());
        write_archive(&document, pool.as_ref(), &mut sink)?;
        Ok(sink.into_inner())
    })
    .await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}

// ============================================================
// Projects
// ============================================================

pub async fn save_project(
    State(state): State<AppState>,
    Json(document): Json<Value>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let name = file_stem(&document).map_err(api_error)?;
    let projects = state.projects.clone();
    blocking(move || projects.save(&name, &document)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Project saved successfully." })),
    ))
}

pub async fn list_projects(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProjectSummary>>, ApiError> {
    let projects = state.projects.clone();
    blocking(move || projects.list()).await.map(Json)
}

pub async fn get_project(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let projects = state.projects.clone();
    blocking(move || projects.load(&name)).await.map(Json)
}

// ============================================================
// Import
// ============================================================

/// Stage an uploaded project archive. Responds with the archived document
/// carrying its session id in `_tempImportId`.
pub async fn load_archive(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<Value>, ApiError> {
    let received = upload::receive(&mut multipart, &ARCHIVE_UPLOAD, &state.config.incoming_dir())
        .await
        .map_err(upload_error)?;
    tracing::debug!(
        "Received archive {:?} ({} bytes)",
        received.original_filename,
        received.size
    );

    let stager = state.stager.clone();
    let session = blocking(move || stager.begin_import(&received.path)).await?;
    Ok(Json(session.document))
}

pub async fn confirm_import(
    State(state): State<AppState>,
    Json(input): Json<ConfirmImportInput>,
) -> Result<Json<ImportOutcome>, ApiError> {
    let Some(raw_id) = input.temp_id.filter(|id| !id.trim().is_empty()) else {
        return Err(error_body(
            StatusCode::BAD_REQUEST,
            "Missing temporary import ID",
        ));
    };
    // Ids we never issued cannot name a live session
    let session_id = Uuid::parse_str(raw_id.trim())
        .map_err(|_| error_body(StatusCode::NOT_FOUND, "Import session not found or expired"))?;

    let reconciler = state.reconciler.clone();
    if input.confirm {
        let pool = state.assets.clone();
        let document =
            blocking(move || reconciler.confirm_import(session_id, pool.as_ref())).await?;
        Ok(Json(ImportOutcome::committed(document)))
    } else {
        blocking(move || reconciler.reject_import(session_id)).await?;
        Ok(Json(ImportOutcome::cancelled()))
    }
}
