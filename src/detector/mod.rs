mod labels;
mod ort;

pub use labels::load_class_labels;
pub use ort::OrtDetector;

use async_trait::async_trait;
use image::DynamicImage;
use std::path::PathBuf;
use thiserror::Error;

/// Axis-aligned box in source-image pixel space.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

/// One recognized object instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model weights not found at {0:?}")]
    WeightsNotFound(PathBuf),
    #[error("onnx runtime error: {0}")]
    Runtime(#[from] ::ort::Error),
    #[error("failed to load class labels: {0}")]
    Labels(#[from] std::io::Error),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output: {0}")]
    Output(String),
}

/// Narrow seam in front of the model so the endpoint's aggregation logic
/// can be exercised against a fake detector. Detections below
/// `min_confidence` are excluded by the implementation, not the caller.
#[async_trait]
pub trait Detector: Send + Sync + 'static {
    async fn detect(
        &self,
        image: DynamicImage,
        min_confidence: f32,
    ) -> Result<Vec<Detection>, DetectorError>;
}
