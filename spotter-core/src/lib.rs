//! spotter-core: shared data model and configuration.
//!
//! Holds the naming rules for the files the service writes (uploaded and
//! annotated images) and the layered configuration used by every crate.

pub mod artifact;
pub mod config;

pub use artifact::{AnnotatedImage, UploadedImage, ALLOWED_EXTENSIONS};
pub use config::{ConfigError, LogFormat, SpotterConfig};
