//! Image processing: detection rendering and the prediction pipeline

pub mod annotate;
pub mod pipeline;

pub use annotate::annotate;
pub use pipeline::{PipelineOptions, PredictionPipeline};
