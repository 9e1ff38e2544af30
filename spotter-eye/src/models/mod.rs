//! Detection model loading and inference

pub mod fetch;
pub mod loader;
pub mod yolo;

pub use fetch::WeightsFetcher;
pub use loader::{ModelHandle, ModelLoader};
pub use yolo::{YoloBackend, YoloModel, YoloOptions, COCO_CLASSES};
