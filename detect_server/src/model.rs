//! Detector capability: loading models and running them on frames.
//!
use std::path::Path;

use anyhow::Result;
use common::{Frame, Notice};

use crate::config::AppConfig;

/// COCO class names, in the order of the YOLO output channels.
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorcycle", "airplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "couch", "potted plant",
    "bed", "dining table", "toilet", "tv", "laptop", "mouse", "remote", "keyboard", "cell phone",
    "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase", "scissors",
    "teddy bear", "hair drier", "toothbrush",
];

/// One detected object.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`, normalized to `[0, 1]`
    pub bbox: [f32; 4],
    pub confidence: f32,
    pub class_id: usize,
}

impl Detection {
    pub fn label(&self) -> &'static str {
        COCO_CLASSES.get(self.class_id).copied().unwrap_or("object")
    }
}

/// A model ready to infer.
pub trait InferModel: Send {
    /// Find objects in a frame.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;

    /// Find objects and burn their boxes, labels and confidences into the frame.
    fn annotate(&mut self, frame: Frame) -> Result<Frame>;
}

/// Constructs models from files on disk.
pub trait Detector: Send + Sync {
    fn load(&self, path: &Path) -> Result<Box<dyn InferModel>>;
}

/// Which model artifact to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ModelVariant {
    /// The ONNX model as downloaded.
    #[default]
    Baseline,
    /// The NNEF export produced by the export action.
    Optimized,
}

impl ModelVariant {
    pub fn from_optimized(optimized: bool) -> Self {
        match optimized {
            true => ModelVariant::Optimized,
            false => ModelVariant::Baseline,
        }
    }

    /// User-facing message for a failed load, with a hint matching the variant.
    pub fn load_failure(&self, err: &anyhow::Error) -> Notice {
        match self {
            ModelVariant::Baseline => Notice::error(format!("Error loading model: {err:#}")),
            ModelVariant::Optimized => Notice::error(format!(
                "Error loading optimized model: {err:#}. Did you run 'Optimize for device'?"
            )),
        }
    }
}

/// Load the model of the given variant from the configured model directory.
pub fn load_model(
    detector: &dyn Detector,
    config: &AppConfig,
    variant: ModelVariant,
) -> Result<Box<dyn InferModel>, Notice> {
    let path = config.model_path(variant);
    log::info!("Loading {:?} model from {}", variant, path.display());

    detector.load(&path).map_err(|e| {
        log::error!("Failed to load model from {}: {e:#}", path.display());
        variant.load_failure(&e)
    })
}
