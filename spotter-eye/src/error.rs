//! Error types for spotter-eye

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Model weights not found: {}", .0.display())]
    WeightsNotFound(PathBuf),

    #[error("Model load error: {0}")]
    ModelLoad(String),

    #[error("Model not loaded yet and no weights path provided")]
    ModelUnavailable,

    #[error("Input image not found: {}", .0.display())]
    InputNotFound(PathBuf),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Inference error: {0}")]
    Inference(String),

    #[error("Failed to write result image: {0}")]
    EncodeWrite(String),

    #[error("Weights fetch error: {0}")]
    Fetch(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DetectError {
    /// Short, client-safe description of the failure class.
    pub fn public_reason(&self) -> &'static str {
        match self {
            DetectError::WeightsNotFound(_)
            | DetectError::ModelLoad(_)
            | DetectError::ModelUnavailable
            | DetectError::Fetch(_) => "model unavailable",
            DetectError::InputNotFound(_) => "uploaded image missing",
            DetectError::Decode(_) => "image could not be decoded",
            DetectError::Inference(_) => "inference failed",
            DetectError::EncodeWrite(_) | DetectError::Io(_) => "result could not be written",
        }
    }
}
