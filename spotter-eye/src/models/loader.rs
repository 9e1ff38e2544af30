//! Load-once model loader
//!
//! The loader is owned by the composition root and shared by reference.
//! The first successful load is cached for the lifetime of the loader;
//! concurrent first calls are serialized so the backend loads exactly once.

use crate::detector::{Detector, DetectorBackend, Device};
use crate::error::DetectError;
use parking_lot::Mutex;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Shared reference to the loaded detector
#[derive(Clone)]
pub struct ModelHandle {
    detector: Arc<dyn Detector>,
    device: Device,
    weights: PathBuf,
}

impl ModelHandle {
    pub fn detector(&self) -> &dyn Detector {
        self.detector.as_ref()
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub fn weights(&self) -> &Path {
        &self.weights
    }

    /// Whether both handles refer to the same loaded model
    pub fn same_instance(a: &ModelHandle, b: &ModelHandle) -> bool {
        Arc::ptr_eq(&a.detector, &b.detector)
    }
}

impl fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("model", &self.detector.name())
            .field("device", &self.device)
            .field("weights", &self.weights)
            .finish()
    }
}

#[derive(Default)]
struct LoaderState {
    handle: Option<ModelHandle>,
    device: Option<Device>,
}

/// Model loader with auto-caching of the first successful load
pub struct ModelLoader {
    backend: Box<dyn DetectorBackend>,
    prefer_gpu: bool,
    state: Mutex<LoaderState>,
}

impl ModelLoader {
    /// Create a new model loader
    pub fn new(backend: Box<dyn DetectorBackend>, prefer_gpu: bool) -> Self {
        Self {
            backend,
            prefer_gpu,
            state: Mutex::new(LoaderState::default()),
        }
    }

    /// Return the cached handle, loading it from `weights` on first use.
    ///
    /// Once a handle exists it is returned unchanged, whatever `weights`
    /// points at.
    pub fn ensure_loaded(&self, weights: &Path) -> Result<ModelHandle, DetectError> {
        let mut state = self.state.lock();

        if let Some(handle) = &state.handle {
            debug!("Model already loaded from {:?}", handle.weights);
            return Ok(handle.clone());
        }

        if !weights.is_file() {
            warn!("Model weights not found at {:?}", weights);
            return Err(DetectError::WeightsNotFound(weights.to_path_buf()));
        }

        let device = match state.device {
            Some(device) => device,
            None => {
                let device = Device::select(self.prefer_gpu, self.backend.accelerator_available());
                info!("Selected execution device: {}", device);
                state.device = Some(device);
                device
            }
        };

        let start = Instant::now();
        let detector = self.backend.load(weights, device).map_err(|e| match e {
            DetectError::ModelLoad(_) => e,
            other => DetectError::ModelLoad(other.to_string()),
        })?;

        info!(
            "Model {} loaded from {:?} on {} in {:?}",
            detector.name(),
            weights,
            device,
            start.elapsed()
        );

        let handle = ModelHandle {
            detector,
            device,
            weights: weights.to_path_buf(),
        };
        state.handle = Some(handle.clone());
        Ok(handle)
    }

    /// The loaded handle, if any
    pub fn current(&self) -> Option<ModelHandle> {
        self.state.lock().handle.clone()
    }

    /// Check if the model is loaded
    pub fn is_loaded(&self) -> bool {
        self.state.lock().handle.is_some()
    }

    /// Device chosen on the first load attempt
    pub fn device(&self) -> Option<Device> {
        self.state.lock().device
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DetectedObject;
    use image::DynamicImage;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct NullDetector;

    impl Detector for NullDetector {
        fn detect(&self, _image: &DynamicImage) -> Result<Vec<DetectedObject>, DetectError> {
            Ok(vec![])
        }

        fn name(&self) -> &str {
            "null"
        }
    }

    struct CountingBackend {
        loads: Arc<AtomicUsize>,
        gpu: bool,
    }

    impl DetectorBackend for CountingBackend {
        fn load(&self, _weights: &Path, _device: Device) -> Result<Arc<dyn Detector>, DetectError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullDetector))
        }

        fn accelerator_available(&self) -> bool {
            self.gpu
        }
    }

    struct FailingBackend;

    impl DetectorBackend for FailingBackend {
        fn load(&self, _weights: &Path, _device: Device) -> Result<Arc<dyn Detector>, DetectError> {
            Err(DetectError::Inference("unsupported opset".to_string()))
        }
    }

    fn weights_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("model.onnx");
        std::fs::write(&path, b"weights").unwrap();
        path
    }

    #[test]
    fn test_loader_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let weights = weights_file(&dir);
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = ModelLoader::new(
            Box::new(CountingBackend { loads: loads.clone(), gpu: false }),
            true,
        );

        assert!(!loader.is_loaded());
        let first = loader.ensure_loaded(&weights).unwrap();
        let second = loader.ensure_loaded(&weights).unwrap();

        assert!(ModelHandle::same_instance(&first, &second));
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(loader.is_loaded());
        assert_eq!(first.device(), Device::Cpu);
    }

    #[test]
    fn test_loaded_handle_ignores_later_path() {
        let dir = TempDir::new().unwrap();
        let weights = weights_file(&dir);
        let loader = ModelLoader::new(
            Box::new(CountingBackend { loads: Arc::new(AtomicUsize::new(0)), gpu: false }),
            false,
        );

        let first = loader.ensure_loaded(&weights).unwrap();
        let again = loader.ensure_loaded(&dir.path().join("other.onnx")).unwrap();
        assert!(ModelHandle::same_instance(&first, &again));
        assert_eq!(again.weights(), weights.as_path());
    }

    #[test]
    fn test_missing_weights() {
        let dir = TempDir::new().unwrap();
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = ModelLoader::new(
            Box::new(CountingBackend { loads: loads.clone(), gpu: false }),
            false,
        );

        let result = loader.ensure_loaded(&dir.path().join("missing.onnx"));
        assert!(matches!(result, Err(DetectError::WeightsNotFound(_))));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
        assert!(loader.current().is_none());
    }

    #[test]
    fn test_backend_failure_is_model_load_error() {
        let dir = TempDir::new().unwrap();
        let weights = weights_file(&dir);
        let loader = ModelLoader::new(Box::new(FailingBackend), false);

        let result = loader.ensure_loaded(&weights);
        match result {
            Err(DetectError::ModelLoad(msg)) => assert!(msg.contains("unsupported opset")),
            other => panic!("Expected ModelLoad error, got {:?}", other),
        }
        assert!(!loader.is_loaded());
    }

    #[test]
    fn test_gpu_selected_when_available() {
        let dir = TempDir::new().unwrap();
        let weights = weights_file(&dir);
        let loader = ModelLoader::new(
            Box::new(CountingBackend { loads: Arc::new(AtomicUsize::new(0)), gpu: true }),
            true,
        );

        let handle = loader.ensure_loaded(&weights).unwrap();
        assert_eq!(handle.device(), Device::Cuda);
        assert_eq!(loader.device(), Some(Device::Cuda));
    }

    #[test]
    fn test_concurrent_first_load_runs_once() {
        let dir = TempDir::new().unwrap();
        let weights = weights_file(&dir);
        let loads = Arc::new(AtomicUsize::new(0));
        let loader = Arc::new(ModelLoader::new(
            Box::new(CountingBackend { loads: loads.clone(), gpu: false }),
            false,
        ));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let loader = loader.clone();
                let weights = weights.clone();
                std::thread::spawn(move || loader.ensure_loaded(&weights).unwrap())
            })
            .collect();

        let handles: Vec<ModelHandle> = threads.into_iter().map(|t| t.join().unwrap()).collect();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        for handle in &handles[1..] {
            assert!(ModelHandle::same_instance(&handles[0], handle));
        }
    }
}
