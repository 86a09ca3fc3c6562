//! Deterministic stand-in for the ONNX models.
//!
//! A "face" is a solid rectangle whose dominant colour channel is at least 128.
//! Each channel (red, green, blue) can carry one face, so a scene holds up to
//! three. The embedding of a face is its mean colour scaled to [0, 1], which
//! makes distances between painted faces easy to reason about.

use crate::detector::DetectorError;
use crate::embedder::{EmbedderError, FaceEmbedder};
use crate::frame::Frame;
use crate::types::{Embedding, FaceRegion};

const FACE_MIN_LEVEL: u8 = 128;

/// Paint solid-colour faces onto a black `width` × `height` frame.
pub fn scene(width: u32, height: u32, faces: &[(FaceRegion, [u8; 3])]) -> Frame {
    let mut data = vec![0u8; (width * height * 3) as usize];
    for (region, color) in faces {
        let r = region.clamp_to(width, height);
        for y in r.top..r.bottom {
            for x in r.left..r.right {
                let i = (y as usize * width as usize + x as usize) * 3;
                data[i..i + 3].copy_from_slice(color);
            }
        }
    }
    match Frame::from_rgb(data, width, height) {
        Ok(frame) => frame,
        Err(e) => unreachable!("scene buffer sized from its own dimensions: {e}"),
    }
}

/// Dominant channel of a face pixel, if it is one.
fn face_channel(px: [u8; 3]) -> Option<usize> {
    let (c, &max) = px.iter().enumerate().max_by_key(|&(_, v)| *v)?;
    let unique = px.iter().filter(|&&v| v == max).count() == 1;
    (max >= FACE_MIN_LEVEL && unique).then_some(c)
}

/// Colour-blob detector and mean-colour embedder.
#[derive(Debug, Default)]
pub struct BlobEmbedder {
    /// Fail detection on frames whose sequence is a multiple of this.
    fail_every: Option<u64>,
    pub detect_calls: usize,
    pub embed_calls: usize,
}

impl BlobEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_every(n: u64) -> Self {
        Self {
            fail_every: Some(n.max(1)),
            ..Self::default()
        }
    }
}

impl FaceEmbedder for BlobEmbedder {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<FaceRegion>, EmbedderError> {
        self.detect_calls += 1;
        if let Some(n) = self.fail_every {
            if frame.sequence % n == 0 {
                return Err(DetectorError::InferenceFailed(format!(
                    "injected failure on frame {}",
                    frame.sequence
                ))
                .into());
            }
        }

        // per channel: (left, top, right, bottom), exclusive on right/bottom
        let mut bounds: [Option<(i32, i32, i32, i32)>; 3] = [None; 3];
        for y in 0..frame.height {
            for x in 0..frame.width {
                let Some(c) = face_channel(frame.pixel(x, y)) else {
                    continue;
                };
                let (x, y) = (x as i32, y as i32);
                bounds[c] = Some(match bounds[c] {
                    None => (x, y, x + 1, y + 1),
                    Some((l, t, r, b)) => (l.min(x), t.min(y), r.max(x + 1), b.max(y + 1)),
                });
            }
        }

        let mut regions: Vec<FaceRegion> = bounds
            .iter()
            .flatten()
            .map(|&(l, t, r, b)| FaceRegion::new(t, r, b, l))
            .collect();
        regions.sort_by_key(|r| (r.left, r.top));
        Ok(regions)
    }

    fn embed(
        &mut self,
        frame: &Frame,
        region: Option<&FaceRegion>,
    ) -> Result<Option<Embedding>, EmbedderError> {
        self.embed_calls += 1;
        let region = match region {
            Some(r) => r.clamp_to(frame.width, frame.height),
            None => match self.detect(frame)?.into_iter().next() {
                Some(r) => r,
                None => return Ok(None),
            },
        };

        let mut sum = [0f32; 3];
        let mut n = 0usize;
        for y in region.top..region.bottom {
            for x in region.left..region.right {
                let px = frame.pixel(x as u32, y as u32);
                if face_channel(px).is_some() {
                    for c in 0..3 {
                        sum[c] += px[c] as f32 / 255.0;
                    }
                    n += 1;
                }
            }
        }
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(Embedding::new(sum.iter().map(|s| s / n as f32).collect())))
    }
}
