//! Prediction pipeline: image file in, annotated image file out

use crate::error::DetectError;
use crate::models::{ModelHandle, ModelLoader};
use crate::processing::annotate::annotate;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageFormat, RgbImage};
use std::fs::{self, File};
use std::io::{BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Output encoding options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    pub jpeg_quality: u8,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self { jpeg_quality: 95 }
    }
}

/// Runs the shared detector over image files and writes annotated copies
pub struct PredictionPipeline {
    loader: Arc<ModelLoader>,
    options: PipelineOptions,
}

impl PredictionPipeline {
    pub fn new(loader: Arc<ModelLoader>, options: PipelineOptions) -> Self {
        Self { loader, options }
    }

    pub fn loader(&self) -> &Arc<ModelLoader> {
        &self.loader
    }

    /// Detect objects in `input` and write the annotated image near `output`.
    ///
    /// The extension of `output` is kept when it is jpg, jpeg or png and
    /// replaced with `.jpg` otherwise; the returned path is the file
    /// actually written.
    pub fn predict_to_file(
        &self,
        input: &Path,
        output: &Path,
        weights: Option<&Path>,
    ) -> Result<PathBuf, DetectError> {
        if !input.is_file() {
            return Err(DetectError::InputNotFound(input.to_path_buf()));
        }

        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| DetectError::EncodeWrite(format!("{}: {}", parent.display(), e)))?;
        }

        let handle = self.model_handle(weights)?;

        let start = Instant::now();
        let image = decode(input)?;
        let detections = handle.detector().detect(&image)?;
        debug!(
            "{} found {} objects in {:?} ({:?})",
            handle.detector().name(),
            detections.len(),
            input,
            start.elapsed()
        );

        let mut canvas = image.to_rgb8();
        annotate(&mut canvas, &detections);

        let (output, format) = normalize_output(output);
        self.write(&canvas, &output, format)?;

        info!(
            "Wrote {:?} with {} detections in {:?}",
            output,
            detections.len(),
            start.elapsed()
        );
        Ok(output)
    }

    fn model_handle(&self, weights: Option<&Path>) -> Result<ModelHandle, DetectError> {
        if let Some(handle) = self.loader.current() {
            return Ok(handle);
        }
        match weights {
            Some(path) => self.loader.ensure_loaded(path),
            None => Err(DetectError::ModelUnavailable),
        }
    }

    fn write(&self, image: &RgbImage, path: &Path, format: ImageFormat) -> Result<(), DetectError> {
        let quality = self.options.jpeg_quality.clamp(1, 100);
        write_or_remove(path, |file| encode_into(BufWriter::new(file), image, format, quality))
    }
}

/// Create `path` and fill it, removing the file again if filling fails
fn write_or_remove<F>(path: &Path, fill: F) -> Result<(), DetectError>
where
    F: FnOnce(File) -> Result<(), String>,
{
    let file = File::create(path)
        .map_err(|e| DetectError::EncodeWrite(format!("{}: {}", path.display(), e)))?;

    if let Err(e) = fill(file) {
        if let Err(rm) = fs::remove_file(path) {
            debug!("Could not remove partial output {:?}: {}", path, rm);
        }
        return Err(DetectError::EncodeWrite(format!("{}: {}", path.display(), e)));
    }
    Ok(())
}

/// Encode `image` into `writer` and flush it
fn encode_into<W: Write + Seek>(
    mut writer: W,
    image: &RgbImage,
    format: ImageFormat,
    jpeg_quality: u8,
) -> Result<(), String> {
    let encoded = match format {
        ImageFormat::Png => image.write_to(&mut writer, ImageFormat::Png),
        _ => JpegEncoder::new_with_quality(&mut writer, jpeg_quality).encode_image(image),
    };
    encoded.map_err(|e| e.to_string())?;
    writer.flush().map_err(|e| e.to_string())
}

fn decode(path: &Path) -> Result<DynamicImage, DetectError> {
    image::io::Reader::open(path)
        .map_err(|e| DetectError::Decode(e.to_string()))?
        .with_guessed_format()
        .map_err(|e| DetectError::Decode(e.to_string()))?
        .decode()
        .map_err(|e| DetectError::Decode(e.to_string()))
}

/// Output path with a supported image extension, plus the format to encode
pub fn normalize_output(output: &Path) -> (PathBuf, ImageFormat) {
    let ext = output
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => (output.to_path_buf(), ImageFormat::Png),
        Some("jpg") | Some("jpeg") => (output.to_path_buf(), ImageFormat::Jpeg),
        _ => (output.with_extension("jpg"), ImageFormat::Jpeg),
    }
}
