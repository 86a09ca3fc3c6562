//! scout-core — Face detection, embedding and gallery matching.
//!
//! Uses SCRFD for face detection and ArcFace for embeddings, both running via
//! ONNX Runtime on the CPU, and matches faces against an in-memory gallery by
//! Euclidean distance.

pub mod alignment;
pub mod detector;
pub mod embedder;
pub mod frame;
pub mod gallery;
pub mod matcher;
pub mod recognizer;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod types;

pub use detector::FaceDetector;
pub use embedder::{recognize_faces, EmbedderError, FaceEmbedder, OnnxFaceEmbedder};
pub use frame::{Frame, LatestFrame};
pub use gallery::{Gallery, GalleryError, GalleryLoad, Identity, LoadWarning, SharedGallery};
pub use matcher::{EuclideanMatcher, MatchOutcome, Matcher, DEFAULT_MATCH_THRESHOLD};
pub use recognizer::FaceRecognizer;
pub use types::{Embedding, FaceRegion, Label, RecognitionResult};
