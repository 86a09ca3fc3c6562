//! Detector + recognizer behind a single seam.

use crate::alignment;
use crate::detector::{DetectorError, FaceDetector};
use crate::frame::Frame;
use crate::matcher::MatchOutcome;
use crate::recognizer::{FaceRecognizer, RecognizerError};
use crate::types::{Embedding, FaceRegion, RecognitionResult};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";

#[derive(Error, Debug)]
pub enum EmbedderError {
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer error: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// Turns frames into face regions and face regions into embeddings.
pub trait FaceEmbedder {
    /// All faces in `frame`, most confident first.
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, EmbedderError>;

    /// Embedding of one face.
    ///
    /// With a region, embeds that face. Without one, detects on the whole frame
    /// and embeds the first face. `Ok(None)` means no viable embedding
    /// (nothing detected, or a crop that cannot be aligned).
    fn embed(
        &mut self,
        frame: &Frame,
        region: Option<&FaceRegion>,
    ) -> Result<Option<Embedding>, EmbedderError>;
}

/// SCRFD detection + ArcFace embedding.
pub struct OnnxFaceEmbedder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl OnnxFaceEmbedder {
    pub fn new(detector: FaceDetector, recognizer: FaceRecognizer) -> Self {
        Self {
            detector,
            recognizer,
        }
    }

    /// Load `det_10g.onnx` and `w600k_r50.onnx` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self, EmbedderError> {
        let (scrfd, arcface) = model_paths(model_dir);
        let detector = FaceDetector::load(&scrfd)?;
        let recognizer = FaceRecognizer::load(&arcface)?;
        Ok(Self::new(detector, recognizer))
    }
}

pub fn model_paths(model_dir: &Path) -> (PathBuf, PathBuf) {
    (
        model_dir.join(SCRFD_MODEL_FILE),
        model_dir.join(ARCFACE_MODEL_FILE),
    )
}

impl FaceEmbedder for OnnxFaceEmbedder {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, EmbedderError> {
        Ok(self.detector.detect(frame)?)
    }

    fn embed(
        &mut self,
        frame: &Frame,
        region: Option<&FaceRegion>,
    ) -> Result<Option<Embedding>, EmbedderError> {
        let detected;
        let region = match region {
            Some(r) => r,
            None => {
                detected = self.detector.detect(frame)?;
                match detected.first() {
                    Some(r) => r,
                    None => return Ok(None),
                }
            }
        };

        let aligned = match &region.landmarks {
            Some(landmarks) => Some(alignment::align_face(frame, landmarks)),
            None => alignment::crop_resize(frame, region),
        };
        let Some(aligned) = aligned else {
            tracing::debug!(?region, "face region cannot be aligned");
            return Ok(None);
        };

        Ok(Some(self.recognizer.extract(&aligned)?))
    }
}

impl<E: FaceEmbedder + ?Sized> FaceEmbedder for Box<E> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, EmbedderError> {
        (**self).detect(frame)
    }

    fn embed(
        &mut self,
        frame: &Frame,
        region: Option<&FaceRegion>,
    ) -> Result<Option<Embedding>, EmbedderError> {
        (**self).embed(frame, region)
    }
}

/// Detect every face in `frame`, embed it and label it with `classify`.
///
/// Detection runs on a copy downscaled by `downscale` (1 means full size);
/// regions are mapped back to full-frame coordinates before embedding.
/// Faces without a viable embedding are left out.
pub fn recognize_faces<E, F>(
    embedder: &mut E,
    frame: &Frame,
    downscale: u32,
    mut classify: F,
) -> Result<Vec<RecognitionResult>, EmbedderError>
where
    E: FaceEmbedder + ?Sized,
    F: FnMut(&Embedding) -> MatchOutcome,
{
    let factor = downscale.max(1);
    let regions = if factor > 1 {
        let small = frame.downscale(factor);
        embedder
            .detect(&small)?
            .into_iter()
            .map(|r| r.scale(factor as f32).clamp_to(frame.width, frame.height))
            .collect()
    } else {
        embedder.detect(frame)?
    };

    let mut results = Vec::with_capacity(regions.len());
    for region in regions {
        let Some(embedding) = embedder.embed(frame, Some(&region))? else {
            tracing::debug!(?region, "no viable embedding for region");
            continue;
        };
        let outcome = classify(&embedding);
        results.push(RecognitionResult {
            region,
            label: outcome.label,
            distance: outcome.distance,
        });
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::Gallery;
    use crate::matcher::{EuclideanMatcher, Matcher};
    use crate::testing::{scene, BlobEmbedder};
    use crate::types::Label;

    #[test]
    fn test_model_paths() {
        let (det, rec) = model_paths(Path::new("/opt/scout/models"));
        assert_eq!(det, Path::new("/opt/scout/models/det_10g.onnx"));
        assert_eq!(rec, Path::new("/opt/scout/models/w600k_r50.onnx"));
    }

    #[test]
    fn test_load_reports_missing_detector() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxFaceEmbedder::load(dir.path()).err().unwrap();
        assert!(matches!(
            err,
            EmbedderError::Detector(DetectorError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_recognize_faces_rescales_downscaled_detections() {
        let red = FaceRegion::new(16, 48, 48, 16);
        let blue = FaceRegion::new(8, 120, 40, 88);
        let frame = scene(128, 64, &[(red.clone(), [230, 20, 20]), (blue.clone(), [20, 20, 230])]);

        let mut embedder = BlobEmbedder::new();
        let mut gallery = Gallery::new();
        let reference = embedder.embed(&frame, Some(&red)).unwrap().unwrap();
        gallery.push("alice", reference);
        let matcher = EuclideanMatcher::new(0.6);

        let mut classified = 0;
        let results = recognize_faces(&mut embedder, &frame, 4, |e| {
            classified += 1;
            matcher.compare(e, &gallery)
        })
        .unwrap();

        assert_eq!(classified, 2);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].region, red);
        assert_eq!(results[0].label, Label::Known("alice".into()));
        assert_eq!(results[1].region, blue);
        assert_eq!(results[1].label, Label::Unknown);
    }

    #[test]
    fn test_recognize_faces_detection_error_propagates() {
        let frame = scene(32, 32, &[(FaceRegion::new(4, 20, 20, 4), [240, 10, 10])]);
        // sequence 0 is a multiple of every n
        let mut embedder = BlobEmbedder::failing_every(3);
        let err = recognize_faces(&mut embedder, &frame, 1, |_| MatchOutcome::unknown());
        assert!(matches!(err, Err(EmbedderError::Detector(_))));
    }
}
