use std::sync::Arc;
use std::sync::mpsc;

use uuid::Uuid;

use crate::annotations::{Anomaly, Severity, Source};

// ============================================================================
// AI INFERENCE BOUNDARY
// ============================================================================
//
// The detection service is opaque to the editor: baseline + maintenance image
// in, annotated raster + detections out, all detection coordinates in the
// natural pixel space of the annotated image. The real service lives behind
// this trait; the crate ships a deterministic built-in stand-in.

/// One raw detection as the service reports it.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
    pub confidence: f32,
    pub classification: String,
    pub severity: Option<Severity>,
}

/// Full result of one analysis run.
#[derive(Clone, Debug)]
pub struct DetectionOutcome {
    /// Encoded raster (PNG/JPEG) with the detections burned in; becomes the
    /// new displayed image.
    pub annotated_image: Vec<u8>,
    pub detections: Vec<Detection>,
}

pub trait AnomalyDetector: Send + Sync {
    /// Run detection over a baseline/maintenance image pair, keeping only
    /// detections at or above `threshold` confidence.
    fn analyze(
        &self,
        baseline: &[u8],
        maintenance: &[u8],
        threshold: f32,
    ) -> Result<DetectionOutcome, String>;
}

/// Turn raw detections into store records: AI provenance, live, no comment.
pub fn detections_to_records(detections: &[Detection]) -> Vec<Anomaly> {
    detections
        .iter()
        .map(|d| Anomaly {
            id: Uuid::new_v4(),
            x: d.x,
            y: d.y,
            w: d.w,
            h: d.h,
            confidence: Some(d.confidence),
            severity: d.severity,
            classification: Some(d.classification.clone()),
            comment: String::new(),
            source: Source::Ai,
            deleted: false,
            user_id: None,
            created_at: None,
            updated_at: None,
        })
        .collect()
}

// ============================================================================
// BUILT-IN STAND-IN DETECTOR
// ============================================================================

/// Deterministic offline detector used until a real inference service is
/// configured: reports fixed hot-spot candidates at image-relative positions,
/// filtered by the requested threshold, and echoes the maintenance image as
/// the annotated raster.
pub struct BuiltinDetector;

/// (x, y, w, h) as fractions of the image, confidence, classification.
const CANDIDATES: &[(f32, f32, f32, f32, f32, &str)] = &[
    (0.18, 0.22, 0.12, 0.10, 0.93, "Loose Joint"),
    (0.55, 0.40, 0.10, 0.14, 0.74, "Point Overload"),
    (0.35, 0.68, 0.16, 0.09, 0.52, "Full Wire Overload"),
];

impl AnomalyDetector for BuiltinDetector {
    fn analyze(
        &self,
        _baseline: &[u8],
        maintenance: &[u8],
        threshold: f32,
    ) -> Result<DetectionOutcome, String> {
        let img = image::load_from_memory(maintenance)
            .map_err(|e| format!("Failed to decode maintenance image: {}", e))?;
        let (w, h) = (img.width() as f32, img.height() as f32);

        let detections = CANDIDATES
            .iter()
            .filter(|(.., confidence, _)| *confidence >= threshold)
            .map(|(fx, fy, fw, fh, confidence, classification)| Detection {
                x: fx * w,
                y: fy * h,
                w: fw * w,
                h: fh * h,
                confidence: *confidence,
                classification: classification.to_string(),
                severity: Some(if *confidence >= 0.85 {
                    Severity::Faulty
                } else if *confidence >= 0.6 {
                    Severity::PotentiallyFaulty
                } else {
                    Severity::Normal
                }),
            })
            .collect();

        Ok(DetectionOutcome {
            annotated_image: maintenance.to_vec(),
            detections,
        })
    }
}

// ============================================================================
// BACKGROUND RUNNER
// ============================================================================

#[derive(Debug)]
pub enum AnalysisResult {
    Done(DetectionOutcome),
    /// Inference failures block a user-initiated action, so they are
    /// surfaced immediately.
    Failed(String),
}

/// Drives one analysis at a time on a background thread; the UI polls for
/// the outcome each frame.
pub struct AnalysisRunner {
    sender: mpsc::Sender<AnalysisResult>,
    receiver: mpsc::Receiver<AnalysisResult>,
    running: bool,
}

impl Default for AnalysisRunner {
    fn default() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self {
            sender,
            receiver,
            running: false,
        }
    }
}

impl AnalysisRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start a run. Ignored while one is already in flight.
    pub fn begin(
        &mut self,
        detector: Arc<dyn AnomalyDetector>,
        baseline: Vec<u8>,
        maintenance: Vec<u8>,
        threshold: f32,
    ) {
        if self.running {
            return;
        }
        self.running = true;
        let sender = self.sender.clone();
        std::thread::spawn(move || {
            let result = match detector.analyze(&baseline, &maintenance, threshold) {
                Ok(outcome) => AnalysisResult::Done(outcome),
                Err(error) => AnalysisResult::Failed(error),
            };
            let _ = sender.send(result);
        });
    }

    pub fn poll(&mut self) -> Option<AnalysisResult> {
        match self.receiver.try_recv() {
            Ok(result) => {
                self.running = false;
                Some(result)
            }
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::annotations::AnnotationStore;

    /// 1×1 PNG, enough for the decoder.
    fn tiny_png() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(64, 48, image::Rgba([10, 10, 10, 255]));
        let mut bytes = Vec::new();
        img.write_to(
            &mut std::io::Cursor::new(&mut bytes),
            image::ImageOutputFormat::Png,
        )
        .expect("encode test png");
        bytes
    }

    #[test]
    fn builtin_detector_filters_by_threshold() {
        let png = tiny_png();
        let all = BuiltinDetector.analyze(&png, &png, 0.0).unwrap();
        assert_eq!(all.detections.len(), 3);
        let strict = BuiltinDetector.analyze(&png, &png, 0.8).unwrap();
        assert_eq!(strict.detections.len(), 1);
        assert_eq!(strict.detections[0].severity, Some(Severity::Faulty));
        // Coordinates are in the annotated image's natural pixel space.
        assert!(strict.detections[0].x < 64.0 && strict.detections[0].y < 48.0);
    }

    #[test]
    fn builtin_detector_rejects_undecodable_input() {
        let err = BuiltinDetector.analyze(b"junk", b"junk", 0.5).unwrap_err();
        assert!(err.contains("decode"));
    }

    #[test]
    fn ai_run_replaces_user_boxes_wholesale() {
        let mut store = AnnotationStore::new();
        store.add_user_box(egui::Rect::from_min_size(
            egui::pos2(0.0, 0.0),
            egui::vec2(30.0, 30.0),
        ));
        store.add_user_box(egui::Rect::from_min_size(
            egui::pos2(50.0, 50.0),
            egui::vec2(30.0, 30.0),
        ));

        let png = tiny_png();
        let outcome = BuiltinDetector.analyze(&png, &png, 0.0).unwrap();
        store.replace_all(detections_to_records(&outcome.detections));

        assert_eq!(store.len(), 3);
        assert!(store.all().iter().all(|a| a.source == Source::Ai));
        assert!(store.all().iter().all(|a| a.confidence.is_some()));
    }

    #[test]
    fn runner_reports_completion_and_failures() {
        use std::time::{Duration, Instant};
        let mut runner = AnalysisRunner::new();
        let png = tiny_png();
        runner.begin(Arc::new(BuiltinDetector), png.clone(), png, 0.5);
        assert!(runner.is_running());

        let deadline = Instant::now() + Duration::from_secs(2);
        let result = loop {
            if let Some(r) = runner.poll() {
                break r;
            }
            assert!(Instant::now() < deadline, "analysis never finished");
            std::thread::sleep(Duration::from_millis(5));
        };
        assert!(matches!(result, AnalysisResult::Done(_)));
        assert!(!runner.is_running());

        runner.begin(Arc::new(BuiltinDetector), b"junk".to_vec(), b"junk".to_vec(), 0.5);
        let deadline = Instant::now() + Duration::from_secs(2);
        let result = loop {
            if let Some(r) = runner.poll() {
                break r;
            }
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        };
        assert!(matches!(result, AnalysisResult::Failed(_)));
    }
}
