//! Composition root: logging, storage layout, model and pipeline wiring

use crate::http::ApiState;
use anyhow::Context;
use spotter_core::config::{LogFormat, LoggingConfig, ModelConfig, StorageConfig};
use spotter_core::SpotterConfig;
use spotter_eye::{
    DetectorBackend, ModelLoader, PipelineOptions, PredictionPipeline, WeightsFetcher, YoloBackend,
    YoloOptions,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over `logging.level` when set.
pub fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level)
            .with_context(|| format!("invalid log level '{}'", logging.level))?,
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false);

    let installed = match logging.format {
        LogFormat::Pretty => builder.try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    installed.map_err(|e| anyhow::anyhow!("failed to initialize logging: {}", e))
}

/// Create the uploads and outputs directories
pub async fn prepare_storage(storage: &StorageConfig) -> anyhow::Result<()> {
    for dir in [storage.uploads_dir(), storage.outputs_dir()] {
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    info!("📁 Storage ready under {}", storage.static_dir.display());
    Ok(())
}

/// Fetch the weights when a source is configured and the file is missing.
///
/// A failed fetch is logged; loading will then report missing weights.
pub async fn fetch_weights(model: &ModelConfig) {
    let Some(url) = model.weights_url.as_deref() else {
        return;
    };

    let fetched = WeightsFetcher::default()
        .ensure_weights(&model.weights_path, url, model.weights_sha256.as_deref())
        .await;

    if let Err(e) = fetched {
        warn!("⚠️  Could not fetch model weights: {}", e);
    }
}

pub fn yolo_options(model: &ModelConfig) -> YoloOptions {
    YoloOptions {
        input_size: model.input_size,
        confidence_threshold: model.confidence_threshold,
        iou_threshold: model.iou_threshold,
        max_detections: model.max_detections,
    }
}

/// Build the shared loader and pipeline around a detector backend
pub fn build_pipeline(backend: Box<dyn DetectorBackend>, model: &ModelConfig) -> Arc<PredictionPipeline> {
    let loader = Arc::new(ModelLoader::new(backend, model.prefer_gpu));
    Arc::new(PredictionPipeline::new(
        loader,
        PipelineOptions {
            jpeg_quality: model.jpeg_quality,
        },
    ))
}

/// Load the model before serving.
///
/// Failure is logged and the server keeps running; each detect request
/// then retries the load and reports the failure to its client.
pub async fn eager_load(pipeline: &Arc<PredictionPipeline>, model: &ModelConfig) {
    let loader = pipeline.loader().clone();
    let weights = model.weights_path.clone();

    let loaded = tokio::task::spawn_blocking(move || loader.ensure_loaded(&weights)).await;
    match loaded {
        Ok(Ok(handle)) => info!(
            "✅ Model loaded from {} on {}",
            handle.weights().display(),
            handle.device()
        ),
        Ok(Err(e)) => error!("❌ Failed to load model: {}", e),
        Err(e) => error!("❌ Model load task failed: {}", e),
    }
}

/// Wire everything the router needs from a validated configuration
pub async fn build_state_with(
    config: SpotterConfig,
    backend: Box<dyn DetectorBackend>,
) -> anyhow::Result<ApiState> {
    prepare_storage(&config.storage).await?;
    fetch_weights(&config.model).await;

    let pipeline = build_pipeline(backend, &config.model);
    if config.model.eager_load {
        eager_load(&pipeline, &config.model).await;
    }

    Ok(ApiState::new(Arc::new(config), pipeline))
}

/// Production wiring with the ONNX Runtime YOLO backend
pub async fn build_state(config: SpotterConfig) -> anyhow::Result<ApiState> {
    let backend = YoloBackend::new(yolo_options(&config.model));
    build_state_with(config, Box::new(backend)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_yolo_options_follow_config() {
        let mut model = ModelConfig::default();
        model.input_size = 320;
        model.iou_threshold = 0.6;

        let options = yolo_options(&model);
        assert_eq!(options.input_size, 320);
        assert_eq!(options.iou_threshold, 0.6);
        assert_eq!(options.max_detections, model.max_detections);
    }

    #[tokio::test]
    async fn test_prepare_storage_creates_dirs() {
        let dir = TempDir::new().unwrap();
        let storage = StorageConfig {
            static_dir: dir.path().join("static"),
        };

        prepare_storage(&storage).await.unwrap();
        assert!(storage.uploads_dir().is_dir());
        assert!(storage.outputs_dir().is_dir());
    }

    #[tokio::test]
    async fn test_missing_weights_do_not_stop_startup() {
        let dir = TempDir::new().unwrap();
        let mut config = SpotterConfig::default();
        config.storage.static_dir = dir.path().join("static");
        config.model.weights_path = dir.path().join("absent.onnx");
        config.model.prefer_gpu = false;

        let state = build_state(config).await.unwrap();
        assert!(!state.pipeline.loader().is_loaded());
        assert!(state.uploads_dir.is_dir());
    }
}
