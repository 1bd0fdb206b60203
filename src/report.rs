use crate::detector::Detection;
use serde::Serialize;

/// Wire form of one detection: label, display-rounded confidence, and
/// `[x1, y1, x2, y2]` corner coordinates in source-image pixels.
#[derive(Debug, Serialize)]
pub struct ReportedDetection {
    #[serde(rename = "class")]
    pub class_label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
}

/// Aggregated verdict for one uploaded image.
#[derive(Debug, Serialize)]
pub struct DetectionReport {
    pub filename: String,
    pub violation_count: u32,
    pub is_safe: bool,
    pub all_detections: Vec<ReportedDetection>,
}

/// Folds raw detections into the response report: confidences are rounded to
/// two decimals for display, and each exact match of `violation_label`
/// increments the violation counter. `is_safe` holds iff no violation was
/// counted.
pub fn build_report(
    filename: String,
    detections: Vec<Detection>,
    violation_label: &str,
) -> DetectionReport {
    let mut violation_count = 0;
    let mut all_detections = Vec::with_capacity(detections.len());

    for detection in detections {
        if detection.label == violation_label {
            violation_count += 1;
        }

        all_detections.push(ReportedDetection {
            class_label: detection.label,
            confidence: round_confidence(detection.confidence),
            bbox: [
                detection.bbox.x1,
                detection.bbox.y1,
                detection.bbox.x2,
                detection.bbox.y2,
            ],
        });
    }

    DetectionReport {
        filename,
        violation_count,
        is_safe: violation_count == 0,
        all_detections,
    }
}

fn round_confidence(confidence: f32) -> f32 {
    (confidence * 100.).round() / 100.
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::BoundingBox;

    fn detection(label: &str, confidence: f32) -> Detection {
        Detection {
            label: label.to_string(),
            confidence,
            bbox: BoundingBox {
                x1: 1.,
                y1: 2.,
                x2: 3.,
                y2: 4.,
            },
        }
    }

    #[test]
    fn empty_detections_are_safe() {
        let report = build_report("site.jpg".into(), vec![], "no helmet");

        assert_eq!(report.filename, "site.jpg");
        assert_eq!(report.violation_count, 0);
        assert!(report.is_safe);
        assert!(report.all_detections.is_empty());
    }

    #[test]
    fn counts_only_exact_label_matches() {
        let detections = vec![
            detection("helmet", 0.91),
            detection("no helmet", 0.85),
            detection("no helmet", 0.47),
            detection("No Helmet", 0.66),
        ];

        let report = build_report("crew.png".into(), detections, "no helmet");

        assert_eq!(report.violation_count, 2);
        assert!(!report.is_safe);
        assert_eq!(report.all_detections.len(), 4);
    }

    #[test]
    fn safe_when_only_other_classes_detected() {
        let detections = vec![detection("helmet", 0.93), detection("helmet", 0.88)];

        let report = build_report("crew.png".into(), detections, "no helmet");

        assert_eq!(report.violation_count, 0);
        assert!(report.is_safe);
    }

    #[test]
    fn confidences_round_to_two_decimals() {
        let detections = vec![detection("helmet", 0.876), detection("no helmet", 0.4012)];

        let report = build_report("crew.png".into(), detections, "no helmet");

        assert_eq!(report.all_detections[0].confidence, 0.88);
        assert_eq!(report.all_detections[1].confidence, 0.4);
        for reported in &report.all_detections {
            assert!(reported.confidence >= 0. && reported.confidence <= 1.);
        }
    }

    #[test]
    fn box_serializes_as_corner_sequence() {
        let report = build_report("one.jpg".into(), vec![detection("helmet", 0.9)], "no helmet");
        let json = serde_json::to_value(&report).unwrap();

        assert_eq!(json["all_detections"][0]["box"], serde_json::json!([1.0, 2.0, 3.0, 4.0]));
        assert_eq!(json["all_detections"][0]["class"], "helmet");
    }
}
