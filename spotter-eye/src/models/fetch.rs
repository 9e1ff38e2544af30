//! One-time weights fetch for deployments that ship without the model file

use crate::error::DetectError;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const MAX_WEIGHTS_SIZE: u64 = 2_000_000_000; // 2GB max
const MIN_WEIGHTS_SIZE: usize = 1024;
const DOWNLOAD_TIMEOUT_SECS: u64 = 3600;

/// Downloads detector weights into place when they are missing
pub struct WeightsFetcher {
    timeout: Duration,
}

impl Default for WeightsFetcher {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DOWNLOAD_TIMEOUT_SECS),
        }
    }
}

impl WeightsFetcher {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Make sure `path` exists, downloading it from `url` if needed.
    ///
    /// Existing files are never re-downloaded or re-verified.
    pub async fn ensure_weights(
        &self,
        path: &Path,
        url: &str,
        sha256: Option<&str>,
    ) -> Result<PathBuf, DetectError> {
        if path.is_file() {
            info!("Model weights already present at {:?}", path);
            return Ok(path.to_path_buf());
        }

        validate_url(url)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        info!("Downloading model weights from {}", url);

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| DetectError::Fetch(e.to_string()))?;

        let response = client
            .get(url)
            .send()
            .await
            .map_err(|e| DetectError::Fetch(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DetectError::Fetch(format!(
                "Failed to download weights: HTTP {}",
                response.status()
            )));
        }

        if let Some(content_length) = response.content_length() {
            if content_length > MAX_WEIGHTS_SIZE {
                return Err(DetectError::Fetch(format!(
                    "Weights too large: {} bytes (max {} bytes)",
                    content_length, MAX_WEIGHTS_SIZE
                )));
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| DetectError::Fetch(e.to_string()))?;

        if bytes.len() as u64 > MAX_WEIGHTS_SIZE {
            return Err(DetectError::Fetch(format!(
                "Downloaded weights too large: {} bytes",
                bytes.len()
            )));
        }

        if bytes.len() < MIN_WEIGHTS_SIZE {
            return Err(DetectError::Fetch(
                "Downloaded file too small, likely corrupted".to_string(),
            ));
        }

        match sha256 {
            Some(expected) => {
                verify_checksum(&bytes, expected)?;
                info!("Verified checksum of downloaded weights");
            }
            None => warn!(
                "Downloaded {} bytes of weights (checksum verification skipped)",
                bytes.len()
            ),
        }

        write_atomically(path, &bytes)?;
        info!("Model weights saved to {:?}", path);
        Ok(path.to_path_buf())
    }
}

fn validate_url(url: &str) -> Result<(), DetectError> {
    if url.is_empty() || url.len() > 2048 {
        return Err(DetectError::Fetch("Invalid weights URL".to_string()));
    }
    if !url.starts_with("https://") {
        return Err(DetectError::Fetch(
            "Only HTTPS URLs are allowed for weight downloads".to_string(),
        ));
    }
    Ok(())
}

/// Compare the SHA-256 of `bytes` against a hex digest (case-insensitive)
pub fn verify_checksum(bytes: &[u8], expected: &str) -> Result<(), DetectError> {
    let computed = hex::encode(Sha256::digest(bytes));
    if !computed.eq_ignore_ascii_case(expected.trim()) {
        return Err(DetectError::Fetch(format!(
            "Checksum mismatch: expected {}, got {}",
            expected, computed
        )));
    }
    Ok(())
}

// Temp file then rename, so a crash never leaves half-written weights behind
fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), DetectError> {
    let temp_path = path.with_extension("download");
    fs::write(&temp_path, bytes)?;
    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }
    Ok(())
}
