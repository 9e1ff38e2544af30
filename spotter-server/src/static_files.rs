//! Embedded front-end and artifact file serving

use axum::{
    body::Body,
    http::{header, Response, StatusCode},
};
use spotter_core::artifact::is_plain_basename;
use std::path::Path;
use tracing::debug;

/// Landing page
pub const INDEX_HTML: &str = include_str!("assets/index.html");

/// Front-end script loaded by the landing page
pub const APP_JS: &str = include_str!("assets/app.js");

/// Content type for a served file, by extension
pub fn content_type_for(name: &str) -> &'static str {
    match spotter_core::artifact::extension_of(name).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("js") => "application/javascript; charset=utf-8",
        Some("html") => "text/html; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Read `name` from `dir` as a response.
///
/// Returns `None` for anything that is not a plain file name directly
/// inside `dir`, or when the file does not exist.
pub async fn serve_from_dir(dir: &Path, name: &str) -> Option<Response<Body>> {
    if !is_plain_basename(name) {
        debug!("Rejected artifact name {:?}", name);
        return None;
    }

    let path = dir.join(name);
    let metadata = tokio::fs::metadata(&path).await.ok()?;
    if !metadata.is_file() {
        return None;
    }

    let bytes = tokio::fs::read(&path).await.ok()?;
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, content_type_for(name))
        .header(header::CACHE_CONTROL, "no-cache")
        .body(Body::from(bytes))
        .ok()
}
