use std::{path::Path, sync::Arc};

use anyhow::{bail, Context, Result};
use common::Frame;
use tract_onnx::prelude::*;

use crate::{
    model::{Detection, Detector, InferModel},
    visualization::Annotator,
};

type NnModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Positive additive constant to avoid divide-by-zero.
const EPS: f32 = 1.0e-7;

/// Upper bound of detections kept per frame.
const MAX_DETECTIONS: usize = 300;

/// Pre- and postprocessing parameters of a YOLO model.
#[derive(Debug, Clone, Copy)]
pub struct YoloParams {
    /// Width and height of the square network input.
    pub input_size: u32,
    pub min_confidence: f32,
    pub max_iou: f32,
}

/// Loads YOLO models with tract, from ONNX files or exported NNEF directories.
pub struct TractDetector {
    params: YoloParams,
    annotator: Arc<Annotator>,
}

impl TractDetector {
    pub fn new(params: YoloParams, annotator: Arc<Annotator>) -> Self {
        Self { params, annotator }
    }
}

impl Detector for TractDetector {
    fn load(&self, path: &Path) -> Result<Box<dyn InferModel>> {
        let model = YoloModel::load(path, self.params, Arc::clone(&self.annotator))?;
        Ok(Box::new(model))
    }
}

pub struct YoloModel {
    model: NnModel,
    params: YoloParams,
    annotator: Arc<Annotator>,
}

impl YoloModel {
    pub fn load(path: &Path, params: YoloParams, annotator: Arc<Annotator>) -> Result<Self> {
        if !path.exists() {
            bail!("{} not found", path.display());
        }

        let model = match path.is_dir() {
            true => get_nnef_model(path)?,
            false => get_onnx_model(path, params.input_size)?,
        };
        log::info!("Model {} ready", path.display());

        Ok(Self {
            model,
            params,
            annotator,
        })
    }

    fn preproc(&self, frame: &Frame) -> Tensor {
        let size = self.params.input_size;
        let resized = image::imageops::resize(
            frame.buffer(),
            size,
            size,
            image::imageops::FilterType::Triangle,
        );
        let order = frame.order();

        let tensor: Tensor = tract_ndarray::Array4::from_shape_fn(
            (1, 3, size as usize, size as usize),
            |(_, c, y, x)| resized[(x as _, y as _)][order.index_of(c)] as f32 / 255.0,
        )
        .into();

        tensor
    }
}

impl InferModel for YoloModel {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let input = self.preproc(frame);
        let outputs = self.model.run(tvec!(input.into()))?;
        let output = outputs.get(0).context("model produced no outputs")?;

        postproc(output.to_array_view::<f32>()?, &self.params)
    }

    fn annotate(&mut self, mut frame: Frame) -> Result<Frame> {
        let detections = self.detect(&frame)?;
        log::debug!("Found {} objects in frame", detections.len());

        self.annotator.draw(&mut frame, &detections);
        Ok(frame)
    }
}

fn get_onnx_model(path: &Path, input_size: u32) -> Result<NnModel> {
    let size = input_size as usize;
    let input_fact = InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, size, size));
    let model = tract_onnx::onnx()
        .model_for_path(path)
        .with_context(|| format!("failed to load ONNX model from {}", path.display()))?
        .with_input_fact(0, input_fact)
        .context("failed to set input fact")?
        .into_optimized()
        .context("failed to optimize model")?
        .into_runnable()
        .context("failed to build runnable model")?;

    Ok(model)
}

fn get_nnef_model(path: &Path) -> Result<NnModel> {
    let model = nnef()
        .model_for_path(path)
        .with_context(|| format!("failed to load NNEF model from {}", path.display()))?
        .into_optimized()
        .context("failed to optimize model")?
        .into_runnable()
        .context("failed to build runnable model")?;

    Ok(model)
}

/// NNEF framework with the operator sets needed by models converted from ONNX.
pub(crate) fn nnef() -> tract_nnef::framework::Nnef {
    tract_nnef::nnef().with_onnx()
}

/// Decode the raw YOLO output into detections.
///
/// The output has shape `[1, 4 + classes, anchors]`. For every anchor the first four channels hold
/// the box center and size in input pixels, the remaining channels hold one score per class.
fn postproc(output: tract_ndarray::ArrayViewD<f32>, params: &YoloParams) -> Result<Vec<Detection>> {
    let output = output
        .into_dimensionality::<tract_ndarray::Ix3>()
        .context("expected a three-dimensional model output")?;
    let (channels, anchors) = (output.shape()[1], output.shape()[2]);
    if channels <= 4 {
        bail!("unexpected model output shape {:?}", output.shape());
    }

    let size = params.input_size as f32;
    let mut candidates = Vec::new();

    for anchor in 0..anchors {
        let (class_id, confidence) = (4..channels)
            .map(|channel| (channel - 4, output[[0, channel, anchor]]))
            .fold((0, f32::MIN), |best, current| match current.1 > best.1 {
                true => current,
                false => best,
            });

        if confidence <= params.min_confidence {
            continue;
        }

        let (cx, cy) = (output[[0, 0, anchor]], output[[0, 1, anchor]]);
        let (half_w, half_h) = (output[[0, 2, anchor]] / 2.0, output[[0, 3, anchor]] / 2.0);
        let bbox = [
            ((cx - half_w) / size).clamp(0.0, 1.0),
            ((cy - half_h) / size).clamp(0.0, 1.0),
            ((cx + half_w) / size).clamp(0.0, 1.0),
            ((cy + half_h) / size).clamp(0.0, 1.0),
        ];

        candidates.push(Detection {
            bbox,
            confidence,
            class_id,
        });
    }

    Ok(non_maximum_suppression(candidates, params.max_iou))
}

/// Run class-aware non-maximum-suppression on candidate detections.
///
/// Start with the most confident detection and iterate over all others in the order of sinking
/// confidence. A candidate is selected only if it does not overlap an already selected detection
/// of the same class by more than `max_iou`.
fn non_maximum_suppression(mut candidates: Vec<Detection>, max_iou: f32) -> Vec<Detection> {
    candidates.sort_by(|a, b| a.confidence.total_cmp(&b.confidence));

    let mut selected: Vec<Detection> = vec![];
    'candidates: while let Some(candidate) = candidates.pop() {
        if selected.len() == MAX_DETECTIONS {
            break;
        }

        for chosen in selected.iter() {
            if chosen.class_id == candidate.class_id && iou(&candidate.bbox, &chosen.bbox) > max_iou
            {
                continue 'candidates;
            }
        }

        selected.push(candidate);
    }

    selected
}

/// Calculate the intersection-over-union metric for two bounding boxes.
fn iou(bbox_a: &[f32; 4], bbox_b: &[f32; 4]) -> f32 {
    // If the boxes do not overlap, the overlap box is ill defined and has zero area
    let overlap_box: [f32; 4] = [
        f32::max(bbox_a[0], bbox_b[0]),
        f32::max(bbox_a[1], bbox_b[1]),
        f32::min(bbox_a[2], bbox_b[2]),
        f32::min(bbox_a[3], bbox_b[3]),
    ];

    let overlap_area = bbox_area(&overlap_box);

    overlap_area / (bbox_area(bbox_a) + bbox_area(bbox_b) - overlap_area + EPS)
}

/// Calculate the area enclosed by a bounding box.
///
/// The bounding box is passed as four-element array defining two points:
/// `[x_top_left, y_top_left, x_bottom_right, y_bottom_right]`
/// If the bottom-right point lies above or left of the top-left point, the area is zero.
fn bbox_area(bbox: &[f32; 4]) -> f32 {
    let width = bbox[2] - bbox[0];
    let height = bbox[3] - bbox[1];
    if width < 0.0 || height < 0.0 {
        return 0.0;
    }

    width * height
}

#[cfg(test)]
mod test {

    use super::*;

    const PARAMS: YoloParams = YoloParams {
        input_size: 640,
        min_confidence: 0.25,
        max_iou: 0.45,
    };

    fn detection(bbox: [f32; 4], confidence: f32, class_id: usize) -> Detection {
        Detection {
            bbox,
            confidence,
            class_id,
        }
    }

    #[test]
    fn iou_of_identical_and_disjoint_boxes() {
        let bbox = [0.1, 0.1, 0.5, 0.5];
        assert!((iou(&bbox, &bbox) - 1.0).abs() < 1e-4);
        assert_eq!(iou(&bbox, &[0.6, 0.6, 0.9, 0.9]), 0.0);
    }

    #[test]
    fn inverted_box_has_no_area() {
        assert_eq!(bbox_area(&[0.5, 0.5, 0.1, 0.9]), 0.0);
        assert!((bbox_area(&[0.0, 0.0, 0.5, 0.2]) - 0.1).abs() < 1e-6);
    }

    #[test]
    fn suppression_is_per_class() {
        let candidates = vec![
            detection([0.1, 0.1, 0.5, 0.5], 0.6, 0),
            detection([0.1, 0.1, 0.5, 0.52], 0.9, 0),
            detection([0.1, 0.1, 0.5, 0.5], 0.7, 3),
            detection([0.6, 0.6, 0.9, 0.9], 0.3, 0),
        ];

        let selected = non_maximum_suppression(candidates, 0.45);

        let confidences: Vec<f32> = selected.iter().map(|d| d.confidence).collect();
        assert_eq!(confidences, vec![0.9, 0.7, 0.3]);
    }

    #[test]
    fn decodes_yolo_output() -> Result<()> {
        let mut output = tract_ndarray::Array3::<f32>::zeros((1, 84, 3));
        // Two overlapping "car" candidates and one weak "bus"
        for (anchor, (cx, cy, score)) in [(320.0, 320.0, 0.9), (322.0, 320.0, 0.8)]
            .into_iter()
            .enumerate()
        {
            output[[0, 0, anchor]] = cx;
            output[[0, 1, anchor]] = cy;
            output[[0, 2, anchor]] = 64.0;
            output[[0, 3, anchor]] = 64.0;
            output[[0, 4 + 2, anchor]] = score;
        }
        output[[0, 4 + 5, 2]] = 0.1;

        let detections = postproc(output.view().into_dyn(), &PARAMS)?;

        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 2);
        assert_eq!(detections[0].label(), "car");
        assert!((detections[0].confidence - 0.9).abs() < 1e-6);
        for (value, expected) in detections[0].bbox.iter().zip([0.45, 0.45, 0.55, 0.55]) {
            assert!((value - expected).abs() < 1e-4);
        }

        Ok(())
    }

    #[test]
    fn boxes_are_clamped_to_the_frame() -> Result<()> {
        let mut output = tract_ndarray::Array3::<f32>::zeros((1, 5, 1));
        output[[0, 2, 0]] = 100.0;
        output[[0, 3, 0]] = 100.0;
        output[[0, 4, 0]] = 0.5;

        let detections = postproc(output.view().into_dyn(), &PARAMS)?;
        assert_eq!(detections[0].bbox[0], 0.0);
        assert_eq!(detections[0].bbox[1], 0.0);

        Ok(())
    }

    #[test]
    fn rejects_unexpected_output_shapes() {
        let output = tract_ndarray::Array2::<f32>::zeros((84, 3));
        assert!(postproc(output.view().into_dyn(), &PARAMS).is_err());

        let output = tract_ndarray::Array3::<f32>::zeros((1, 4, 3));
        assert!(postproc(output.view().into_dyn(), &PARAMS).is_err());
    }

    #[test]
    fn missing_model_fails_to_load() {
        let annotator = Arc::new(Annotator::new(None));
        let detector = TractDetector::new(PARAMS, annotator);
        let err = detector.load(Path::new("does/not/exist.onnx")).err().unwrap();
        assert!(err.to_string().contains("not found"));
    }
}
