//! spotter-eye: object detection for uploaded images
//!
//! Wraps a pretrained detector (an ONNX export run through ONNX Runtime)
//! behind the [`Detector`] capability, loads it once through the
//! [`ModelLoader`], and turns an image file into an annotated image file
//! with the [`PredictionPipeline`].

pub mod detector;
pub mod error;
pub mod models;
pub mod processing;
mod utils;

pub use detector::{DetectedObject, Detector, DetectorBackend, Device};
pub use error::DetectError;
pub use models::{ModelHandle, ModelLoader, WeightsFetcher, YoloBackend, YoloOptions};
pub use processing::{PipelineOptions, PredictionPipeline};
