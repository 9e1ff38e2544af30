//! The detection capability and the seam used to load it

use crate::error::DetectError;
use image::DynamicImage;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Detected object, in pixel coordinates of the source image
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: (f32, f32, f32, f32), // x, y, width, height
}

/// Execution device for inference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
    Cuda,
    Cpu,
}

impl Device {
    /// Accelerated device when wanted and present, general-purpose CPU otherwise
    pub fn select(prefer_gpu: bool, accelerator_available: bool) -> Self {
        if prefer_gpu && accelerator_available {
            Device::Cuda
        } else {
            Device::Cpu
        }
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cuda => write!(f, "cuda"),
            Device::Cpu => write!(f, "cpu"),
        }
    }
}

/// A loaded, evaluation-ready detector.
///
/// Implementations must be safe to call repeatedly and from several
/// request threads.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedObject>, DetectError>;

    /// Human-readable model name for logs
    fn name(&self) -> &str;
}

/// Native loading capability of a detection model family
pub trait DetectorBackend: Send + Sync {
    /// Build a detector from weights already known to exist
    fn load(&self, weights: &Path, device: Device) -> Result<Arc<dyn Detector>, DetectError>;

    /// Whether an accelerated execution device can be used
    fn accelerator_available(&self) -> bool {
        false
    }
}
