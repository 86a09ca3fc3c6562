use serde::{Deserialize, Serialize};
use std::fmt;

/// Five-point facial landmarks: [left_eye, right_eye, nose, left_mouth, right_mouth].
pub type Landmarks = [(f32, f32); 5];

/// Pixel-space box of one detected face, valid only for the frame it came from.
///
/// `right` and `bottom` are exclusive, so a region scaled by an integer factor
/// covers exactly the pixels its downscaled source covered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
    /// Detector confidence in [0, 1].
    pub confidence: f32,
    /// Landmarks in the same coordinate space as the rectangle.
    pub landmarks: Option<Landmarks>,
}

impl FaceRegion {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self {
            top,
            right,
            bottom,
            left,
            confidence: 1.0,
            landmarks: None,
        }
    }

    pub fn width(&self) -> i32 {
        (self.right - self.left).max(0)
    }

    pub fn height(&self) -> i32 {
        (self.bottom - self.top).max(0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Multiply every coordinate by `factor`, rounding to the nearest pixel.
    ///
    /// A region detected on a frame downscaled by `s` is mapped back with
    /// `scale(1.0 / s)`; for the default quarter-size detection that is `scale(4.0)`.
    pub fn scale(&self, factor: f32) -> FaceRegion {
        let s = |v: i32| (v as f32 * factor).round() as i32;
        FaceRegion {
            top: s(self.top),
            right: s(self.right),
            bottom: s(self.bottom),
            left: s(self.left),
            confidence: self.confidence,
            landmarks: self
                .landmarks
                .map(|lms| lms.map(|(x, y)| (x * factor, y * factor))),
        }
    }

    /// Clip the rectangle to a `width` × `height` frame.
    pub fn clamp_to(&self, width: u32, height: u32) -> FaceRegion {
        let w = width as i32;
        let h = height as i32;
        FaceRegion {
            top: self.top.clamp(0, h),
            right: self.right.clamp(0, w),
            bottom: self.bottom.clamp(0, h),
            left: self.left.clamp(0, w),
            confidence: self.confidence,
            landmarks: self.landmarks,
        }
    }
}

/// Face embedding vector (512-dimensional for ArcFace).
///
/// Immutable once produced; compared only through [`Embedding::distance`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
    /// Model version that produced this embedding (e.g., "w600k_r50").
    model_version: Option<String>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values,
            model_version: None,
        }
    }

    pub fn with_model_version(values: Vec<f32>, model_version: &str) -> Self {
        Self {
            values,
            model_version: Some(model_version.to_string()),
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn model_version(&self) -> Option<&str> {
        self.model_version.as_deref()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Euclidean distance between two embeddings.
    ///
    /// Embeddings of different length are never the same face: the distance is `+inf`.
    pub fn distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Outcome label of one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Label {
    Known(String),
    Unknown,
}

impl Label {
    pub fn is_known(&self) -> bool {
        matches!(self, Label::Known(_))
    }

    pub fn as_known(&self) -> Option<&str> {
        match self {
            Label::Known(name) => Some(name),
            Label::Unknown => None,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Label::Known(name) => f.write_str(name),
            Label::Unknown => f.write_str("Unknown"),
        }
    }
}

/// One face in one frame: where it is, who it is, and how close the best match was.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionResult {
    pub region: FaceRegion,
    pub label: Label,
    /// Distance to the nearest gallery embedding (`+inf` when none was compared).
    pub distance: f32,
}
