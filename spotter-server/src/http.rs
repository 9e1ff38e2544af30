//! HTTP API: upload, detect, and serve annotated images

use crate::static_files::{serve_from_dir, APP_JS, INDEX_HTML};
use axum::{
    extract::{
        multipart::{Multipart, MultipartError, MultipartRejection},
        DefaultBodyLimit, Path as UrlPath, State,
    },
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use spotter_core::artifact::{is_allowed_file, upload_timestamp, AnnotatedImage, UploadedImage};
use spotter_core::SpotterConfig;
use spotter_eye::{DetectError, PredictionPipeline};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

const IMAGE_FIELD: &str = "image";
const SAVE_ATTEMPTS: usize = 16;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub config: Arc<SpotterConfig>,
    pub pipeline: Arc<PredictionPipeline>,
    pub uploads_dir: PathBuf,
    pub outputs_dir: PathBuf,
}

impl ApiState {
    pub fn new(config: Arc<SpotterConfig>, pipeline: Arc<PredictionPipeline>) -> Self {
        Self {
            uploads_dir: config.storage.uploads_dir(),
            outputs_dir: config.storage.outputs_dir(),
            config,
            pipeline,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DetectResponse {
    pub output_url: String,
}

/// Errors returned to API clients
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No file uploaded")]
    NoFile,

    #[error("No selected file")]
    NoSelectedFile,

    #[error("Only .jpg, .jpeg, .png allowed")]
    DisallowedExtension,

    #[error("{message}")]
    Multipart { status: StatusCode, message: String },

    #[error("Failed to store upload")]
    Storage(#[source] std::io::Error),

    #[error("Detection failed: {}", .0.public_reason())]
    Detection(#[from] DetectError),

    #[error("Not found")]
    NotFound,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NoFile | ApiError::NoSelectedFile | ApiError::DisallowedExtension => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Multipart { status, .. } => *status,
            ApiError::Storage(_) | ApiError::Detection(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        ApiError::Multipart {
            status: err.status(),
            message: err.body_text(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.to_string(),
        });
        (self.status(), body).into_response()
    }
}

/// Create the HTTP router
pub fn create_router(state: ApiState) -> Router {
    let body_limit = state.config.server.max_upload_bytes;

    Router::new()
        .route("/", get(index_handler))
        .route("/health", get(health_handler))
        .route("/static/js/app.js", get(app_js_handler))
        .route("/api/detect", post(detect_handler))
        .route("/static/outputs/*name", get(output_file_handler))
        .route("/static/uploads/*name", get(upload_file_handler))
        .fallback(not_found_handler)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
    })
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn app_js_handler() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "application/javascript; charset=utf-8")],
        APP_JS,
    )
}

async fn not_found_handler() -> ApiError {
    ApiError::NotFound
}

async fn output_file_handler(
    State(state): State<ApiState>,
    UrlPath(name): UrlPath<String>,
) -> Result<Response, ApiError> {
    serve_from_dir(&state.outputs_dir, &name)
        .await
        .ok_or(ApiError::NotFound)
}

async fn upload_file_handler(
    State(state): State<ApiState>,
    UrlPath(name): UrlPath<String>,
) -> Result<Response, ApiError> {
    serve_from_dir(&state.uploads_dir, &name)
        .await
        .ok_or(ApiError::NotFound)
}

/// Image part of a detect request, validated but not yet stored
struct ImageUpload {
    file_name: String,
    data: Vec<u8>,
}

async fn read_image_field(multipart: &mut Multipart) -> Result<ImageUpload, ApiError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(IMAGE_FIELD) {
            continue;
        }
        // A plain form value under the same name is not a file
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        if file_name.is_empty() {
            return Err(ApiError::NoSelectedFile);
        }
        if !is_allowed_file(&file_name) {
            return Err(ApiError::DisallowedExtension);
        }

        let data = field.bytes().await?;
        return Ok(ImageUpload {
            file_name,
            data: data.to_vec(),
        });
    }
    Err(ApiError::NoFile)
}

/// Store the upload under a fresh name, never replacing an existing file
async fn save_upload(dir: &Path, upload: &ImageUpload) -> Result<(UploadedImage, PathBuf), ApiError> {
    let mut last_err = None;

    for _ in 0..SAVE_ATTEMPTS {
        let stamp = upload_timestamp(&chrono::Local::now());
        let image = UploadedImage::from_original(&stamp, &upload.file_name)
            .ok_or(ApiError::DisallowedExtension)?;
        let path = dir.join(image.name());

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                last_err = Some(e);
                continue;
            }
            Err(e) => return Err(ApiError::Storage(e)),
        };

        let written = match file.write_all(&upload.data).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };

        if let Err(e) = written {
            drop(file);
            remove_quietly(&path).await;
            return Err(ApiError::Storage(e));
        }
        return Ok((image, path));
    }

    Err(ApiError::Storage(last_err.unwrap_or_else(|| {
        std::io::Error::new(ErrorKind::AlreadyExists, "no free upload name")
    })))
}

async fn remove_quietly(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        warn!("Failed to remove {:?}: {}", path, e);
    }
}

async fn detect_handler(
    State(state): State<ApiState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<DetectResponse>, ApiError> {
    // Requests without a multipart body carry no file
    let mut multipart = multipart.map_err(|_| ApiError::NoFile)?;
    let upload = read_image_field(&mut multipart).await?;

    let (uploaded, upload_path) = save_upload(&state.uploads_dir, &upload).await?;
    info!(
        "Stored upload {} ({} bytes)",
        uploaded.name(),
        upload.data.len()
    );

    let output_path = state.outputs_dir.join(uploaded.annotated().name());
    let pipeline = state.pipeline.clone();
    let weights = state.config.model.weights_path.clone();
    let input = upload_path.clone();

    let outcome = tokio::task::spawn_blocking(move || {
        pipeline.predict_to_file(&input, &output_path, Some(&weights))
    })
    .await
    .unwrap_or_else(|e| Err(DetectError::Inference(format!("detection task failed: {}", e))));

    let written = match outcome {
        Ok(path) => path,
        Err(e) => {
            error!("Detection failed for {}: {}", uploaded.name(), e);
            remove_quietly(&upload_path).await;
            return Err(ApiError::Detection(e));
        }
    };

    let annotated = AnnotatedImage::from_written(&written).ok_or_else(|| {
        ApiError::Detection(DetectError::EncodeWrite(format!(
            "unusable output path {:?}",
            written
        )))
    })?;

    info!("Detection complete: {}", annotated.name());
    Ok(Json(DetectResponse {
        output_url: annotated.url(),
    }))
}
