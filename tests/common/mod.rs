// Shared fixtures for the HTTP tests: a fake detector and multipart helpers

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    Router,
};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use serde_json::Value;
use spotter_core::SpotterConfig;
use spotter_eye::{DetectError, DetectedObject, Detector, DetectorBackend, Device};
use spotter_server::{create_router, startup};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

pub const BOUNDARY: &str = "spotter-test-boundary";

/// Finds one "dog" in the top-left quarter of every image
pub struct QuarterDetector;

impl Detector for QuarterDetector {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedObject>, DetectError> {
        Ok(vec![DetectedObject {
            class_id: 16,
            class_name: "dog".to_string(),
            confidence: 0.75,
            bbox: (0.0, 0.0, image.width() as f32 / 2.0, image.height() as f32 / 2.0),
        }])
    }

    fn name(&self) -> &str {
        "quarter"
    }
}

pub struct FakeBackend {
    pub loads: Arc<AtomicUsize>,
}

impl DetectorBackend for FakeBackend {
    fn load(&self, _weights: &Path, _device: Device) -> Result<Arc<dyn Detector>, DetectError> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(QuarterDetector))
    }
}

pub struct TestApp {
    pub dir: TempDir,
    pub router: Router,
    pub loads: Arc<AtomicUsize>,
    pub config: SpotterConfig,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with(|_| {}).await
    }

    /// Build an app over a temp static dir with fake weights in place
    pub async fn with(customize: impl FnOnce(&mut SpotterConfig)) -> Self {
        let dir = TempDir::new().unwrap();
        let weights = dir.path().join("model.onnx");
        std::fs::write(&weights, b"fake onnx").unwrap();

        let mut config = SpotterConfig::default();
        config.storage.static_dir = dir.path().join("static");
        config.model.weights_path = weights;
        config.model.prefer_gpu = false;
        customize(&mut config);

        let loads = Arc::new(AtomicUsize::new(0));
        let backend = FakeBackend { loads: loads.clone() };
        let state = startup::build_state_with(config.clone(), Box::new(backend))
            .await
            .unwrap();

        Self {
            dir,
            router: create_router(state),
            loads,
            config,
        }
    }

    pub fn uploads(&self) -> Vec<String> {
        list_dir(&self.config.storage.uploads_dir())
    }

    pub fn outputs(&self) -> Vec<String> {
        list_dir(&self.config.storage.outputs_dir())
    }

    pub fn static_dir(&self) -> PathBuf {
        self.config.storage.static_dir.clone()
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }

    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Vec<u8>) {
        send(self.router.clone(), request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Vec<u8>) {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }
}

pub async fn send(router: Router, request: Request<Body>) -> (StatusCode, Vec<u8>) {
    let response = router.oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

pub fn json(body: &[u8]) -> Value {
    serde_json::from_slice(body).unwrap()
}

fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([40, 40, 40])));
    let mut buf = Cursor::new(Vec::new());
    image.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

/// Multipart part: field name, optional file name, content
pub struct Part<'a> {
    pub name: &'a str,
    pub file_name: Option<&'a str>,
    pub data: &'a [u8],
}

pub fn multipart_body(parts: &[Part<'_>]) -> Vec<u8> {
    let mut body = Vec::new();
    for part in parts {
        body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
        match part.file_name {
            Some(file_name) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    part.name, file_name
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(
                format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", part.name).as_bytes(),
            ),
        }
        body.extend_from_slice(part.data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

pub fn detect_request(parts: &[Part<'_>]) -> Request<Body> {
    Request::post("/api/detect")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(multipart_body(parts)))
        .unwrap()
}

/// The common case: one `image` file part
pub fn upload_request(file_name: &str, data: &[u8]) -> Request<Body> {
    detect_request(&[Part {
        name: "image",
        file_name: Some(file_name),
        data,
    }])
}
