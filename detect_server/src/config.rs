//! Application configuration.
//!
use std::path::PathBuf;

use crate::model::ModelVariant;

/// File name of the baseline model.
pub const BASELINE_MODEL: &str = "yolo11n.onnx";

/// Directory name of the exported, optimized model.
pub const OPTIMIZED_MODEL_DIR: &str = "yolo11n_nnef_model";

/// Width and height of the square network input.
pub const INPUT_SIZE: u32 = 640;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding the baseline model and the optimized export.
    pub model_dir: PathBuf,
    /// TrueType font for box labels. Common system locations are tried if unset.
    pub font_path: Option<PathBuf>,
    pub min_confidence: f32,
    pub max_iou: f32,
    pub jpeg_quality: u8,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("."),
            font_path: None,
            min_confidence: 0.25,
            max_iou: 0.45,
            jpeg_quality: 80,
        }
    }
}

impl AppConfig {
    pub fn baseline_model_path(&self) -> PathBuf {
        self.model_dir.join(BASELINE_MODEL)
    }

    pub fn optimized_model_path(&self) -> PathBuf {
        self.model_dir.join(OPTIMIZED_MODEL_DIR)
    }

    pub fn model_path(&self, variant: ModelVariant) -> PathBuf {
        match variant {
            ModelVariant::Baseline => self.baseline_model_path(),
            ModelVariant::Optimized => self.optimized_model_path(),
        }
    }
}
