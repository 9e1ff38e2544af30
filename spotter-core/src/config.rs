// Configuration for the spotter service
//
// Layering: defaults -> optional TOML file -> SPOTTER_* environment -> CLI.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Largest accepted request body on the upload endpoint
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
            max_upload_bytes: 16 * 1024 * 1024,
        }
    }
}

/// On-disk layout for uploads and annotated outputs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub static_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            static_dir: PathBuf::from("./static"),
        }
    }
}

impl StorageConfig {
    pub fn uploads_dir(&self) -> PathBuf {
        self.static_dir.join("uploads")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.static_dir.join("outputs")
    }
}

/// Detection model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// ONNX weights of the detector
    pub weights_path: PathBuf,
    /// Where to fetch the weights from when they are missing (https only)
    pub weights_url: Option<String>,
    /// Expected SHA-256 (hex) of the fetched weights
    pub weights_sha256: Option<String>,
    /// Square network input size in pixels
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
    /// Use the CUDA execution provider when it is available
    pub prefer_gpu: bool,
    pub jpeg_quality: u8,
    /// Load the model before accepting requests
    pub eager_load: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights_path: PathBuf::from("./model.onnx"),
            weights_url: None,
            weights_sha256: None,
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 1000,
            prefer_gpu: true,
            jpeg_quality: 95,
            eager_load: true,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::Validation(format!(
                "unknown log format '{}' (expected 'pretty' or 'json')",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. `info` or `spotter_eye=debug,info`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Complete spotter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SpotterConfig {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl SpotterConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Load configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `SPOTTER_*` environment overrides on top of `self`
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary variable source
    pub fn apply_vars<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("SPOTTER_HOST") {
            self.server.host = host;
        }

        if let Some(port) = lookup("SPOTTER_PORT") {
            self.server.port = port.trim().parse::<u16>().map_err(|_| {
                ConfigError::Validation(format!("SPOTTER_PORT is not a valid port: '{}'", port))
            })?;
        }

        if let Some(limit) = lookup("SPOTTER_MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = limit.trim().parse::<usize>().map_err(|_| {
                ConfigError::Validation(format!(
                    "SPOTTER_MAX_UPLOAD_BYTES is not a valid size: '{}'",
                    limit
                ))
            })?;
        }

        if let Some(dir) = lookup("SPOTTER_STATIC_DIR") {
            self.storage.static_dir = PathBuf::from(dir);
        }

        if let Some(weights) = lookup("SPOTTER_WEIGHTS") {
            self.model.weights_path = PathBuf::from(weights);
        }

        if let Some(url) = lookup("SPOTTER_WEIGHTS_URL") {
            self.model.weights_url = Some(url).filter(|u| !u.trim().is_empty());
        }

        if let Some(level) = lookup("SPOTTER_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("SPOTTER_LOG_FORMAT") {
            self.logging.format = format.parse()?;
        }

        Ok(())
    }

    /// Socket address string for the listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Validation("server.host cannot be empty".to_string()));
        }

        if self.server.port == 0 {
            return Err(ConfigError::Validation("server.port cannot be 0".to_string()));
        }

        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::Validation(
                "server.max_upload_bytes must be > 0".to_string(),
            ));
        }

        if self.storage.static_dir.as_os_str().is_empty() {
            return Err(ConfigError::Validation(
                "storage.static_dir cannot be empty".to_string(),
            ));
        }

        let model = &self.model;
        if model.input_size == 0 || model.input_size % 32 != 0 || model.input_size > 4096 {
            return Err(ConfigError::Validation(
                "model.input_size must be a multiple of 32 between 32 and 4096".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&model.confidence_threshold) {
            return Err(ConfigError::Validation(
                "model.confidence_threshold must be between 0 and 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&model.iou_threshold) {
            return Err(ConfigError::Validation(
                "model.iou_threshold must be between 0 and 1".to_string(),
            ));
        }

        if model.max_detections == 0 {
            return Err(ConfigError::Validation(
                "model.max_detections must be > 0".to_string(),
            ));
        }

        if !(1..=100).contains(&model.jpeg_quality) {
            return Err(ConfigError::Validation(
                "model.jpeg_quality must be between 1 and 100".to_string(),
            ));
        }

        if let Some(url) = &model.weights_url {
            if !url.starts_with("https://") {
                return Err(ConfigError::Validation(
                    "model.weights_url must be an https:// URL".to_string(),
                ));
            }
        }

        if let Some(sum) = &model.weights_sha256 {
            if sum.len() != 64 || !sum.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(ConfigError::Validation(
                    "model.weights_sha256 must be 64 hex characters".to_string(),
                ));
            }
        }

        Ok(())
    }
}
