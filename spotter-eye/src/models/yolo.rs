//! YOLO object detection model (ONNX Runtime)

use crate::detector::{DetectedObject, Detector, DetectorBackend, Device};
use crate::error::DetectError;
use crate::utils::{letterbox, rgb_to_chw, Letterbox};
use image::DynamicImage;
use ort::execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, ExecutionProvider};
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// COCO class names (80 classes)
pub const COCO_CLASSES: &[&str] = &[
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat",
    "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack",
    "umbrella", "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball",
    "kite", "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket",
    "bottle", "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple",
    "sandwich", "orange", "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair",
    "couch", "potted plant", "bed", "dining table", "toilet", "tv", "laptop", "mouse",
    "remote", "keyboard", "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator",
    "book", "clock", "vase", "scissors", "teddy bear", "hair drier", "toothbrush",
];

/// Inference parameters for YOLO models
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YoloOptions {
    pub input_size: u32,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub max_detections: usize,
}

impl Default for YoloOptions {
    fn default() -> Self {
        Self {
            input_size: 640,
            confidence_threshold: 0.25,
            iou_threshold: 0.45,
            max_detections: 1000,
        }
    }
}

/// Loads YOLO ONNX exports through ONNX Runtime
pub struct YoloBackend {
    options: YoloOptions,
}

impl YoloBackend {
    pub fn new(options: YoloOptions) -> Self {
        Self { options }
    }
}

impl DetectorBackend for YoloBackend {
    fn load(&self, weights: &Path, device: Device) -> Result<Arc<dyn Detector>, DetectError> {
        let model = YoloModel::new(weights, device, self.options)?;
        Ok(Arc::new(model))
    }

    fn accelerator_available(&self) -> bool {
        match CUDAExecutionProvider::default().is_available() {
            Ok(available) => available,
            Err(e) => {
                debug!("CUDA availability probe failed: {}", e);
                false
            }
        }
    }
}

/// YOLO model for object detection
pub struct YoloModel {
    session: Mutex<Session>,
    output_name: String,
    class_names: Vec<String>,
    options: YoloOptions,
    name: String,
}

impl YoloModel {
    /// Create a new YOLO model on the given device
    pub fn new(model_path: &Path, device: Device, options: YoloOptions) -> Result<Self, DetectError> {
        let builder = Session::builder()
            .map_err(|e| DetectError::ModelLoad(e.to_string()))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| DetectError::ModelLoad(e.to_string()))?;

        let builder = match device {
            Device::Cuda => builder.with_execution_providers([
                CUDAExecutionProvider::default().build(),
                CPUExecutionProvider::default().build(),
            ]),
            Device::Cpu => builder.with_execution_providers([CPUExecutionProvider::default().build()]),
        }
        .map_err(|e| DetectError::ModelLoad(format!("Failed to register execution provider: {}", e)))?;

        let session = builder
            .commit_from_file(model_path)
            .map_err(|e| DetectError::ModelLoad(format!("Failed to load YOLO model: {}", e)))?;

        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| DetectError::ModelLoad("Model has no outputs".to_string()))?;

        let class_names = session
            .metadata()
            .ok()
            .and_then(|meta| meta.custom("names").ok().flatten())
            .map(|raw| parse_names_metadata(&raw))
            .unwrap_or_default();

        if class_names.is_empty() {
            warn!("Model carries no class names metadata, falling back to COCO names");
        }

        let name = model_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "yolo".to_string());

        info!(
            "YOLO model loaded from {:?} ({} class names)",
            model_path,
            class_names.len()
        );

        Ok(Self {
            session: Mutex::new(session),
            output_name,
            class_names,
            options,
            name,
        })
    }

    fn run(&self, input: Vec<f32>) -> Result<(Vec<usize>, Vec<f32>), DetectError> {
        let size = self.options.input_size as usize;
        let tensor = Tensor::from_array(([1usize, 3, size, size], input.into_boxed_slice()))
            .map_err(|e| DetectError::Inference(format!("Failed to create input tensor: {}", e)))?;

        let mut session = self.session.lock();
        let outputs = session
            .run(ort::inputs![tensor])
            .map_err(|e| DetectError::Inference(format!("YOLO inference failed: {}", e)))?;

        let output = outputs.get(self.output_name.as_str()).ok_or_else(|| {
            DetectError::Inference(format!("Model missing output node {}", self.output_name))
        })?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectError::Inference(format!("Failed to extract output tensor: {}", e)))?;

        let shape: Vec<usize> = shape.iter().map(|&d| d.max(0) as usize).collect();
        Ok((shape, data.to_vec()))
    }
}

impl Detector for YoloModel {
    fn detect(&self, image: &DynamicImage) -> Result<Vec<DetectedObject>, DetectError> {
        debug!("Running YOLO detection on {}x{} image", image.width(), image.height());

        let (canvas, geometry) = letterbox(image, self.options.input_size)?;
        let (shape, data) = self.run(rgb_to_chw(&canvas))?;
        debug!("YOLO output shape: {:?}", shape);

        let num_classes = if self.class_names.is_empty() {
            COCO_CLASSES.len()
        } else {
            self.class_names.len()
        };
        let candidates =
            decode_predictions(&shape, &data, num_classes, self.options.confidence_threshold)?;
        let detections = to_detections(
            candidates,
            &geometry,
            (image.width(), image.height()),
            &self.class_names,
        );
        let detections = apply_nms(detections, self.options.iou_threshold, self.options.max_detections);

        debug!("YOLO detected {} objects", detections.len());
        Ok(detections)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Raw prediction in network input space (center format)
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Candidate {
    pub cx: f32,
    pub cy: f32,
    pub w: f32,
    pub h: f32,
    pub class_id: usize,
    pub confidence: f32,
}

/// How predictions are laid out in the output tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum OutputLayout {
    /// `[1, N, 5 + C]`: one row per prediction with an objectness score
    Rows,
    /// `[1, 4 + C, N]`: one channel per box coordinate or class score
    ChannelMajor,
}

/// Pick the layout from the class count, falling back to the longer axis
/// holding the predictions when the count matches neither or both axes.
pub(crate) fn output_layout(a: usize, b: usize, num_classes: usize) -> OutputLayout {
    let rows = b == num_classes + 5;
    let channels = a == num_classes + 4;
    match (rows, channels) {
        (true, false) => OutputLayout::Rows,
        (false, true) => OutputLayout::ChannelMajor,
        _ if a > b => OutputLayout::Rows,
        _ => OutputLayout::ChannelMajor,
    }
}

/// Decode a `[1, N, 5 + C]` (objectness) or `[1, 4 + C, N]` output tensor
pub(crate) fn decode_predictions(
    shape: &[usize],
    data: &[f32],
    num_classes: usize,
    confidence_threshold: f32,
) -> Result<Vec<Candidate>, DetectError> {
    if shape.len() != 3 || shape[0] != 1 {
        return Err(DetectError::Inference(format!(
            "Unexpected YOLO output shape: {:?}",
            shape
        )));
    }
    let (a, b) = (shape[1], shape[2]);
    let expected = a
        .checked_mul(b)
        .ok_or_else(|| DetectError::Inference("Output shape would overflow".to_string()))?;
    if data.len() < expected {
        return Err(DetectError::Inference(format!(
            "Output tensor holds {} values, shape {:?} needs {}",
            data.len(),
            shape,
            expected
        )));
    }

    let mut candidates = Vec::new();

    if output_layout(a, b, num_classes) == OutputLayout::Rows {
        // Row per prediction: cx, cy, w, h, objectness, class scores...
        if b < 6 {
            return Err(DetectError::Inference(format!(
                "YOLO rows need at least 6 values, got {}",
                b
            )));
        }
        for row in data[..expected].chunks_exact(b) {
            let objectness = row[4];
            if !objectness.is_finite() || objectness < confidence_threshold {
                continue;
            }
            if let Some((class_id, score)) = best_class(row[5..].iter().copied()) {
                let confidence = objectness * score;
                if confidence >= confidence_threshold {
                    candidates.push(Candidate {
                        cx: row[0],
                        cy: row[1],
                        w: row[2],
                        h: row[3],
                        class_id,
                        confidence,
                    });
                }
            }
        }
    } else {
        // Channel-major: a = 4 + classes, b = predictions
        if a < 5 {
            return Err(DetectError::Inference(format!(
                "YOLO output needs at least 5 channels, got {}",
                a
            )));
        }
        let at = |channel: usize, i: usize| data[channel * b + i];
        for i in 0..b {
            if let Some((class_id, confidence)) = best_class((4..a).map(|c| at(c, i))) {
                if confidence >= confidence_threshold {
                    candidates.push(Candidate {
                        cx: at(0, i),
                        cy: at(1, i),
                        w: at(2, i),
                        h: at(3, i),
                        class_id,
                        confidence,
                    });
                }
            }
        }
    }

    Ok(candidates)
}

fn best_class(scores: impl Iterator<Item = f32>) -> Option<(usize, f32)> {
    scores
        .enumerate()
        .filter(|(_, s)| s.is_finite())
        .fold(None, |best, (idx, score)| match best {
            Some((_, top)) if top >= score => best,
            _ => Some((idx, score)),
        })
}

/// Map candidates back to source pixels and attach class names
pub(crate) fn to_detections(
    candidates: Vec<Candidate>,
    geometry: &Letterbox,
    (width, height): (u32, u32),
    class_names: &[String],
) -> Vec<DetectedObject> {
    let (max_x, max_y) = (width as f32, height as f32);

    candidates
        .into_iter()
        .filter(|c| c.cx.is_finite() && c.cy.is_finite() && c.w.is_finite() && c.h.is_finite())
        .filter_map(|c| {
            let (x1, y1) = geometry.unmap(c.cx - c.w / 2.0, c.cy - c.h / 2.0);
            let (x2, y2) = geometry.unmap(c.cx + c.w / 2.0, c.cy + c.h / 2.0);
            let (x1, y1) = (x1.clamp(0.0, max_x), y1.clamp(0.0, max_y));
            let (x2, y2) = (x2.clamp(0.0, max_x), y2.clamp(0.0, max_y));

            if x2 - x1 <= 0.0 || y2 - y1 <= 0.0 {
                return None;
            }

            Some(DetectedObject {
                class_id: c.class_id,
                class_name: class_name(class_names, c.class_id),
                confidence: c.confidence,
                bbox: (x1, y1, x2 - x1, y2 - y1),
            })
        })
        .collect()
}

fn class_name(class_names: &[String], class_id: usize) -> String {
    if let Some(name) = class_names.get(class_id) {
        return name.clone();
    }
    if class_names.is_empty() {
        if let Some(name) = COCO_CLASSES.get(class_id) {
            return name.to_string();
        }
    }
    format!("class{}", class_id)
}

/// Parse Ultralytics `names` metadata, e.g. `{0: 'person', 1: 'bicycle'}`
///
/// Entries are split only at `, <index>:` boundaries, so names may contain
/// commas or colons.
pub(crate) fn parse_names_metadata(raw: &str) -> Vec<String> {
    let body = raw.trim().trim_start_matches('{').trim_end_matches('}');
    let Some((mut key, mut rest)) = parse_names_key(body) else {
        return Vec::new();
    };

    let mut entries: Vec<(usize, String)> = Vec::new();
    loop {
        let next = rest
            .match_indices(',')
            .find_map(|(i, _)| parse_names_key(&rest[i + 1..]).map(|found| (i, found)));

        match next {
            Some((i, (next_key, next_rest))) => {
                entries.push((key, unquote_name(&rest[..i])));
                key = next_key;
                rest = next_rest;
            }
            None => {
                entries.push((key, unquote_name(rest)));
                break;
            }
        }
    }
    entries.sort_by_key(|(k, _)| *k);

    let len = entries.last().map(|(k, _)| k + 1).unwrap_or(0);
    if len > 100_000 {
        return Vec::new();
    }
    let mut names: Vec<String> = (0..len).map(|i| format!("class{}", i)).collect();
    for (key, value) in entries {
        names[key] = value;
    }
    names
}

fn is_quote(c: char) -> bool {
    c == '\'' || c == '"'
}

/// Read a leading `<index>:` key, returning it and the text after the colon
fn parse_names_key(s: &str) -> Option<(usize, &str)> {
    let s = s.trim_start();
    let s = s.strip_prefix(is_quote).unwrap_or(s);
    let end = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    if end == 0 {
        return None;
    }
    let key = s[..end].parse::<usize>().ok()?;
    let s = &s[end..];
    let s = s.strip_prefix(is_quote).unwrap_or(s);
    let s = s.trim_start().strip_prefix(':')?;
    Some((key, s))
}

fn unquote_name(value: &str) -> String {
    value
        .trim()
        .trim_end_matches(',')
        .trim()
        .trim_matches(is_quote)
        .to_string()
}

/// Apply class-aware Non-Maximum Suppression, keeping at most `max_detections`
pub(crate) fn apply_nms(
    mut detections: Vec<DetectedObject>,
    iou_threshold: f32,
    max_detections: usize,
) -> Vec<DetectedObject> {
    detections.retain(|d| d.confidence.is_finite());
    detections.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep: Vec<DetectedObject> = Vec::new();
    for candidate in detections {
        if keep.len() >= max_detections {
            break;
        }
        let overlaps = keep.iter().any(|kept| {
            kept.class_id == candidate.class_id
                && compute_iou(&kept.bbox, &candidate.bbox) > iou_threshold
        });
        if !overlaps {
            keep.push(candidate);
        }
    }
    keep
}

/// Compute IoU between two (x, y, w, h) boxes
pub(crate) fn compute_iou(bbox1: &(f32, f32, f32, f32), bbox2: &(f32, f32, f32, f32)) -> f32 {
    let (x1, y1, w1, h1) = *bbox1;
    let (x2, y2, w2, h2) = *bbox2;

    let values = [x1, y1, w1, h1, x2, y2, w2, h2];
    if values.iter().any(|v| !v.is_finite()) || w1 < 0.0 || h1 < 0.0 || w2 < 0.0 || h2 < 0.0 {
        return 0.0;
    }

    let inter_w = (x1 + w1).min(x2 + w2) - x1.max(x2);
    let inter_h = (y1 + h1).min(y2 + h2) - y1.max(y2);
    if inter_w <= 0.0 || inter_h <= 0.0 {
        return 0.0;
    }

    let inter_area = inter_w * inter_h;
    let union_area = w1 * h1 + w2 * h2 - inter_area;
    if union_area <= 0.0 {
        return 0.0;
    }

    (inter_area / union_area).clamp(0.0, 1.0)
}
