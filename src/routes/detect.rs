use crate::{
    detector::DetectorError,
    report::{build_report, DetectionReport},
    server::SharedState,
};
use axum::{
    extract::{
        multipart::{Multipart, MultipartError},
        State,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::Serialize;
use std::time::Instant;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum DetectError {
    #[error("Model not loaded.")]
    ModelUnavailable,
    #[error("No image file in request.")]
    MissingFile,
    #[error("Invalid multipart upload.")]
    Upload(#[from] MultipartError),
    #[error("Invalid image file.")]
    InvalidImage(#[source] image::ImageError),
    #[error("Inference failed.")]
    Inference(#[from] DetectorError),
}

#[derive(Serialize)]
struct ErrorBody {
    detail: String,
}

impl IntoResponse for DetectError {
    fn into_response(self) -> Response {
        let status = match &self {
            DetectError::ModelUnavailable | DetectError::Inference(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            DetectError::MissingFile | DetectError::Upload(_) | DetectError::InvalidImage(_) => {
                StatusCode::BAD_REQUEST
            }
        };

        if let DetectError::Inference(source) = &self {
            tracing::error!("Detector failed during inference: {}", source);
        }

        (
            status,
            Json(ErrorBody {
                detail: self.to_string(),
            }),
        )
            .into_response()
    }
}

/// Takes an uploaded image file, runs detection, and returns the violation
/// report. The model availability check comes first so a degraded server
/// answers identically for any input.
#[instrument(skip(state, multipart))]
pub async fn detect(
    State(state): State<SharedState>,
    mut multipart: Multipart,
) -> Result<Json<DetectionReport>, DetectError> {
    state.metrics.record_request("/detect");

    let detector = state
        .detector
        .as_ref()
        .ok_or(DetectError::ModelUnavailable)?;

    let field = multipart
        .next_field()
        .await?
        .ok_or(DetectError::MissingFile)?;
    let filename = field.file_name().unwrap_or("upload").to_string();
    let image_bytes = field.bytes().await?;

    let image = image::load_from_memory(&image_bytes).map_err(DetectError::InvalidImage)?;

    let started = Instant::now();
    let detections = detector
        .detect(image, state.model.min_confidence)
        .await?;
    state
        .metrics
        .record_detection_duration(started.elapsed().as_millis() as u64);

    let report = build_report(filename, detections, &state.detection.violation_label);
    state.metrics.record_violations(report.violation_count as u64);

    Ok(Json(report))
}
