use crate::{
    config::ModelConfig,
    detector::{load_class_labels, BoundingBox, Detection, Detector, DetectorError},
};
use async_trait::async_trait;
use image::{imageops::FilterType, DynamicImage, GenericImageView};
use ndarray::{s, Array, ArrayD, Axis, Ix3, Ix4};
use ort::{
    session::{builder::GraphOptimizationLevel, Session},
    value::TensorRef,
};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Mutex,
};

const INPUT_SIZE: u32 = 640;
const NMS_IOU_THRESHOLD: f32 = 0.7;

/// ONNX-backed detector for YOLOv8-style models. Holds a pool of sessions
/// picked round-robin so concurrent requests do not serialize on one session.
pub struct OrtDetector {
    sessions: Vec<Mutex<Session>>,
    counter: AtomicUsize,
    class_labels: Vec<String>,
}

impl OrtDetector {
    pub fn new(model_config: &ModelConfig) -> Result<Self, DetectorError> {
        let weights_path = model_config.get_weights_path();
        if !weights_path.exists() {
            return Err(DetectorError::WeightsNotFound(weights_path));
        }

        let class_labels = load_class_labels(&model_config.get_labels_path())?;

        ort::init().commit()?;
        let num_instances = model_config.num_instances.max(1);
        let sessions = (0..num_instances)
            .map(|_| {
                let session = Session::builder()?
                    .with_optimization_level(GraphOptimizationLevel::Level3)?
                    .commit_from_file(&weights_path)?;
                Ok(Mutex::new(session))
            })
            .collect::<Result<Vec<_>, ort::Error>>()?;

        tracing::info!(
            "Created {} ONNX sessions for {:?} ({} classes)",
            num_instances,
            weights_path,
            class_labels.len()
        );

        Ok(Self {
            sessions,
            counter: AtomicUsize::new(0),
            class_labels,
        })
    }

    fn run_inference(&self, input: &Array<f32, Ix4>) -> Result<ArrayD<f32>, DetectorError> {
        let index = self.counter.fetch_add(1, Ordering::SeqCst) % self.sessions.len();
        let mut session = self.sessions[index]
            .lock()
            .map_err(|e| DetectorError::Inference(format!("session mutex poisoned: {}", e)))?;

        tracing::debug!("Handling request with session {}", index);

        let tensor_ref = TensorRef::from_array_view(input.view())
            .map_err(|e| DetectorError::Inference(format!("failed to build tensor: {}", e)))?;

        let outputs = session
            .run(ort::inputs![tensor_ref])
            .map_err(|e| DetectorError::Inference(e.to_string()))?;

        let (shape, data) = outputs["output0"]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::Inference(format!("failed to extract tensor: {}", e)))?;

        ArrayD::from_shape_vec(shape.to_ixdyn(), data.to_vec())
            .map_err(|e| DetectorError::Output(format!("invalid tensor shape: {}", e)))
    }

    fn resolve_label(&self, class_id: usize) -> String {
        self.class_labels
            .get(class_id)
            .cloned()
            .unwrap_or_else(|| format!("unknown class {}", class_id))
    }
}

#[async_trait]
impl Detector for OrtDetector {
    async fn detect(
        &self,
        image: DynamicImage,
        min_confidence: f32,
    ) -> Result<Vec<Detection>, DetectorError> {
        let (input, img_width, img_height) = image_to_tensor(&image);
        let outputs = self.run_inference(&input)?;

        let candidates = decode_output(outputs, img_width, img_height, min_confidence)?;
        let kept = suppress_overlaps(candidates);

        let detections = kept
            .into_iter()
            .map(|scored| Detection {
                label: self.resolve_label(scored.class_id),
                confidence: scored.confidence,
                bbox: scored.bbox,
            })
            .collect::<Vec<_>>();

        tracing::debug!("Returning {} detections", detections.len());
        Ok(detections)
    }
}

#[derive(Debug, Clone)]
struct ScoredBox {
    class_id: usize,
    confidence: f32,
    bbox: BoundingBox,
}

/// Resizes to the model input square and normalizes into a CHW tensor.
/// Returns the tensor plus the source dimensions used to rescale boxes.
fn image_to_tensor(image: &DynamicImage) -> (Array<f32, Ix4>, u32, u32) {
    let (img_width, img_height) = image.dimensions();
    let resized = image.resize_exact(INPUT_SIZE, INPUT_SIZE, FilterType::CatmullRom);

    let size = INPUT_SIZE as usize;
    let mut input = Array::zeros((1, 3, size, size));
    for pixel in resized.pixels() {
        let x = pixel.0 as usize;
        let y = pixel.1 as usize;
        let [r, g, b, _] = pixel.2 .0;
        input[[0, 0, y, x]] = (r as f32) / 255.;
        input[[0, 1, y, x]] = (g as f32) / 255.;
        input[[0, 2, y, x]] = (b as f32) / 255.;
    }

    (input, img_width, img_height)
}

/// Walks the raw `[1, 4 + classes, anchors]` output: per-anchor argmax over
/// the class scores, confidence filter, and center/size to corner conversion
/// scaled back to source-image pixels.
fn decode_output(
    outputs: ArrayD<f32>,
    img_width: u32,
    img_height: u32,
    min_confidence: f32,
) -> Result<Vec<ScoredBox>, DetectorError> {
    let outputs = outputs
        .into_dimensionality::<Ix3>()
        .map_err(|e| DetectorError::Output(format!("expected 3 axes: {}", e)))?;

    let (batch, attrs, _anchors) = outputs.dim();
    if batch != 1 || attrs <= 4 {
        return Err(DetectorError::Output(format!(
            "unsupported output shape {:?}",
            outputs.shape()
        )));
    }

    let scale_x = img_width as f32 / INPUT_SIZE as f32;
    let scale_y = img_height as f32 / INPUT_SIZE as f32;

    let view = outputs.slice(s![0, .., ..]);
    let mut boxes = Vec::new();

    for anchor in view.axis_iter(Axis(1)) {
        let (class_id, confidence) = anchor
            .iter()
            .skip(4)
            .copied()
            .enumerate()
            .reduce(|best, candidate| {
                if candidate.1 > best.1 {
                    candidate
                } else {
                    best
                }
            })
            .expect("attrs > 4 guarantees at least one class score");

        if confidence < min_confidence {
            continue;
        }

        let xc = anchor[0] * scale_x;
        let yc = anchor[1] * scale_y;
        let w = anchor[2] * scale_x;
        let h = anchor[3] * scale_y;

        boxes.push(ScoredBox {
            class_id,
            confidence,
            bbox: BoundingBox {
                x1: xc - w / 2.,
                y1: yc - h / 2.,
                x2: xc + w / 2.,
                y2: yc + h / 2.,
            },
        });
    }

    Ok(boxes)
}

/// Greedy non-maximum suppression: keep the highest-confidence box, drop
/// everything overlapping it past the IoU threshold, repeat.
fn suppress_overlaps(mut boxes: Vec<ScoredBox>) -> Vec<ScoredBox> {
    boxes.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut kept = Vec::new();
    while !boxes.is_empty() {
        let best = boxes.remove(0);
        boxes.retain(|other| iou(&best.bbox, &other.bbox) < NMS_IOU_THRESHOLD);
        kept.push(best);
    }
    kept
}

fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let overlap_w = (a.x2.min(b.x2) - a.x1.max(b.x1)).max(0.);
    let overlap_h = (a.y2.min(b.y2) - a.y1.max(b.y1)).max(0.);
    let intersection = overlap_w * overlap_h;

    let area_a = (a.x2 - a.x1) * (a.y2 - a.y1);
    let area_b = (b.x2 - b.x1) * (b.y2 - b.y1);
    let union = area_a + area_b - intersection;
    if union <= 0. {
        return 0.;
    }
    intersection / union
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use ndarray::Array3;

    fn bbox(x1: f32, y1: f32, x2: f32, y2: f32) -> BoundingBox {
        BoundingBox { x1, y1, x2, y2 }
    }

    #[test]
    fn image_to_tensor_shape_and_dimensions() {
        let img = ImageBuffer::<Rgb<u8>, Vec<u8>>::from_pixel(100, 50, Rgb([255, 0, 0]));
        let image = DynamicImage::ImageRgb8(img);

        let (input, img_width, img_height) = image_to_tensor(&image);

        assert_eq!(input.shape(), &[1, 3, 640, 640]);
        assert_eq!(img_width, 100);
        assert_eq!(img_height, 50);
        // red channel normalized, green/blue empty
        assert_eq!(input[[0, 0, 0, 0]], 1.0);
        assert_eq!(input[[0, 1, 0, 0]], 0.0);
    }

    #[test]
    fn iou_of_disjoint_boxes_is_zero() {
        let a = bbox(0., 0., 10., 10.);
        let b = bbox(20., 20., 30., 30.);

        assert_eq!(iou(&a, &b), 0.);
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = bbox(5., 5., 15., 25.);

        assert_eq!(iou(&a, &a), 1.);
    }

    #[test]
    fn suppress_overlaps_keeps_highest_confidence() {
        let boxes = vec![
            ScoredBox {
                class_id: 0,
                confidence: 0.6,
                bbox: bbox(0., 0., 10., 10.),
            },
            ScoredBox {
                class_id: 0,
                confidence: 0.9,
                bbox: bbox(0.5, 0.5, 10.5, 10.5),
            },
            ScoredBox {
                class_id: 1,
                confidence: 0.5,
                bbox: bbox(100., 100., 120., 120.),
            },
        ];

        let kept = suppress_overlaps(boxes);

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 1);
    }

    #[test]
    fn decode_output_scales_and_filters() {
        // [1, 4 + 2 classes, 2 anchors]; anchor 0 is a confident class-1 hit
        // centered in the input square, anchor 1 is below threshold.
        let mut raw = Array3::<f32>::zeros((1, 6, 2));
        raw[[0, 0, 0]] = 320.;
        raw[[0, 1, 0]] = 320.;
        raw[[0, 2, 0]] = 64.;
        raw[[0, 3, 0]] = 64.;
        raw[[0, 4, 0]] = 0.1;
        raw[[0, 5, 0]] = 0.9;

        raw[[0, 0, 1]] = 100.;
        raw[[0, 1, 1]] = 100.;
        raw[[0, 2, 1]] = 10.;
        raw[[0, 3, 1]] = 10.;
        raw[[0, 4, 1]] = 0.2;
        raw[[0, 5, 1]] = 0.1;

        let boxes = decode_output(raw.into_dyn(), 1280, 640, 0.4).unwrap();

        assert_eq!(boxes.len(), 1);
        assert_eq!(boxes[0].class_id, 1);
        assert_eq!(boxes[0].confidence, 0.9);
        // x doubled by the 1280/640 scale, y unchanged
        assert_eq!(boxes[0].bbox.x1, 576.);
        assert_eq!(boxes[0].bbox.x2, 704.);
        assert_eq!(boxes[0].bbox.y1, 288.);
        assert_eq!(boxes[0].bbox.y2, 352.);
    }

    #[test]
    fn decode_output_rejects_unexpected_batch() {
        let raw = Array3::<f32>::zeros((2, 6, 1));
        let result = decode_output(raw.into_dyn(), 640, 640, 0.4);

        assert!(result.is_err());
    }
}
