use std::path::{Component, Path as FsPath, PathBuf};
use std::sync::Arc;

use axum::extract::{Multipart, Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::ingest;
use crate::AppState;

pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Accept one image, resolve every detected face, return one entry each.
pub async fn upload_face(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Response {
    let mut file: Option<Vec<u8>> = None;
    let mut origin: Option<String> = None;

    loop {
        match multipart.next_field().await {
            Ok(Some(field)) => {
                let name = field.name().map(str::to_string);
                match name.as_deref() {
                    Some("file") => match field.bytes().await {
                        Ok(bytes) => file = Some(bytes.to_vec()),
                        Err(err) => return bad_request(&format!("unreadable file field: {err}")),
                    },
                    Some("origin") | Some("pc_name") => {
                        origin = field.text().await.ok();
                    }
                    _ => {}
                }
            }
            Ok(None) => break,
            Err(err) => return bad_request(&format!("malformed multipart body: {err}")),
        }
    }

    let Some(bytes) = file else {
        return bad_request("missing file field");
    };
    let origin = origin
        .filter(|o| !o.is_empty())
        .unwrap_or_else(|| state.origin_default.clone());

    match ingest::process_image(&state, bytes, origin).await {
        Ok(results) => (
            StatusCode::OK,
            Json(json!({ "status": "success", "results": results })),
        )
            .into_response(),
        Err(err) if err.is_client_error() => bad_request(&err.to_string()),
        Err(err) => {
            tracing::error!(error = %err, "upload processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": err.to_string() })),
            )
                .into_response()
        }
    }
}

/// Serve a saved capture image from the staging or committed area.
///
/// A name that is anything but a single path component is rejected:
/// traversal attempts are refused, never sanitized into a servable name.
pub async fn serve_image(
    State(state): State<Arc<AppState>>,
    Path(filename): Path<String>,
) -> Response {
    for root in [&state.pending_dir, &state.captured_dir] {
        let Some(path) = resolve_contained(root, &filename) else {
            return StatusCode::NOT_FOUND.into_response();
        };
        if let Ok(bytes) = tokio::fs::read(&path).await {
            return (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "image/jpeg")],
                bytes,
            )
                .into_response();
        }
    }
    StatusCode::NOT_FOUND.into_response()
}

/// Resolve `name` inside `root`, or `None` when the name could escape it.
fn resolve_contained(root: &FsPath, name: &str) -> Option<PathBuf> {
    let mut components = FsPath::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => {}
        _ => return None,
    }
    Some(root.join(name))
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "status": "error", "message": message })),
    )
        .into_response()
}
