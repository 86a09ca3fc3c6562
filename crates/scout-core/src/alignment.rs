//! Face alignment for the embedding model.
//!
//! Faces with landmarks are warped onto the five InsightFace reference points
//! with a least-squares similarity transform; faces without landmarks fall back
//! to a plain crop-and-resize of their rectangle. Both produce a 112×112 RGB crop.

use crate::frame::Frame;
use crate::types::{FaceRegion, Landmarks};

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: Landmarks = [
    (38.2946, 51.6963), // left eye
    (73.5318, 51.5014), // right eye
    (56.0252, 71.7366), // nose
    (41.5493, 92.3655), // left mouth
    (70.7299, 92.2041), // right mouth
];

pub const ALIGNED_SIZE: usize = 112;

/// 2×3 similarity transform `[a, -b, tx, b, a, ty]` mapping `src` onto `dst`.
///
/// Closed-form least squares over centred point sets; degenerate input
/// (all source points coincident) yields the identity.
fn estimate_similarity_transform(src: &Landmarks, dst: &Landmarks) -> [f32; 6] {
    let n = src.len() as f32;
    let mean = |pts: &Landmarks| {
        let (sx, sy) = pts.iter().fold((0.0, 0.0), |(ax, ay), &(x, y)| (ax + x, ay + y));
        (sx / n, sy / n)
    };
    let (smx, smy) = mean(src);
    let (dmx, dmy) = mean(dst);

    let mut dot = 0.0f32;
    let mut cross = 0.0f32;
    let mut norm = 0.0f32;
    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy) = (sx - smx, sy - smy);
        let (dx, dy) = (dx - dmx, dy - dmy);
        dot += sx * dx + sy * dy;
        cross += sx * dy - sy * dx;
        norm += sx * sx + sy * sy;
    }

    if norm < 1e-12 {
        return [1.0, 0.0, 0.0, 0.0, 1.0, 0.0];
    }

    let a = dot / norm;
    let b = cross / norm;
    let tx = dmx - (a * smx - b * smy);
    let ty = dmy - (b * smx + a * smy);
    [a, -b, tx, b, a, ty]
}

/// Bilinear RGB sample; out-of-bounds neighbours read as black.
fn sample_bilinear(frame: &Frame, sx: f32, sy: f32) -> [u8; 3] {
    let x0 = sx.floor() as i32;
    let y0 = sy.floor() as i32;
    let fx = sx - x0 as f32;
    let fy = sy - y0 as f32;
    let w = frame.width as i32;
    let h = frame.height as i32;
    let data = frame.data();

    let mut out = [0u8; 3];
    for (c, slot) in out.iter_mut().enumerate() {
        let at = |x: i32, y: i32| -> f32 {
            if x >= 0 && x < w && y >= 0 && y < h {
                data[(y as usize * w as usize + x as usize) * 3 + c] as f32
            } else {
                0.0
            }
        };
        let val = at(x0, y0) * (1.0 - fx) * (1.0 - fy)
            + at(x0 + 1, y0) * fx * (1.0 - fy)
            + at(x0, y0 + 1) * (1.0 - fx) * fy
            + at(x0 + 1, y0 + 1) * fx * fy;
        *slot = val.round().clamp(0.0, 255.0) as u8;
    }
    out
}

/// Inverse-map every output pixel through `matrix` and sample the source frame.
fn warp_affine(frame: &Frame, matrix: &[f32; 6], out_size: usize) -> Vec<u8> {
    let (a, tx) = (matrix[0], matrix[2]);
    let (b, ty) = (matrix[3], matrix[5]);

    let det = a * a + b * b;
    if det < 1e-12 {
        return vec![0u8; out_size * out_size * 3];
    }
    let ia = a / det;
    let ib = b / det;

    let mut output = Vec::with_capacity(out_size * out_size * 3);
    for oy in 0..out_size {
        for ox in 0..out_size {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;
            output.extend(sample_bilinear(frame, sx, sy));
        }
    }
    output
}

/// Warp a face onto the canonical 112×112 position from its five landmarks.
pub fn align_face(frame: &Frame, landmarks: &Landmarks) -> Vec<u8> {
    let matrix = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112);
    warp_affine(frame, &matrix, ALIGNED_SIZE)
}

/// Stretch the region's rectangle to 112×112. Returns `None` for an empty region.
pub fn crop_resize(frame: &Frame, region: &FaceRegion) -> Option<Vec<u8>> {
    let r = region.clamp_to(frame.width, frame.height);
    if r.is_empty() {
        return None;
    }
    let sx = r.width() as f32 / ALIGNED_SIZE as f32;
    let sy = r.height() as f32 / ALIGNED_SIZE as f32;

    let mut output = Vec::with_capacity(ALIGNED_SIZE * ALIGNED_SIZE * 3);
    for oy in 0..ALIGNED_SIZE {
        let y = r.top as f32 + (oy as f32 + 0.5) * sy - 0.5;
        for ox in 0..ALIGNED_SIZE {
            let x = r.left as f32 + (ox as f32 + 0.5) * sx - 0.5;
            output.extend(sample_bilinear(frame, x.max(0.0), y.max(0.0)));
        }
    }
    Some(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray_frame(width: u32, height: u32, value: u8) -> Frame {
        Frame::from_rgb(vec![value; (width * height * 3) as usize], width, height).unwrap()
    }

    #[test]
    fn test_identity_transform() {
        let m = estimate_similarity_transform(&REFERENCE_LANDMARKS_112, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 1.0).abs() < 1e-4, "a = {}", m[0]);
        assert!(m[1].abs() < 1e-4, "-b = {}", m[1]);
        assert!(m[2].abs() < 1e-3, "tx = {}", m[2]);
        assert!(m[3].abs() < 1e-4, "b = {}", m[3]);
        assert!(m[5].abs() < 1e-3, "ty = {}", m[5]);
    }

    #[test]
    fn test_scaled_transform() {
        let src = REFERENCE_LANDMARKS_112.map(|(x, y)| (x * 2.0 + 10.0, y * 2.0 + 5.0));
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);
        assert!((m[0] - 0.5).abs() < 1e-3, "a = {}, expected 0.5", m[0]);
        assert!(m[3].abs() < 1e-3);
        assert!((m[2] + 5.0).abs() < 1e-2, "tx = {}", m[2]);
        assert!((m[5] + 2.5).abs() < 1e-2, "ty = {}", m[5]);
    }

    #[test]
    fn test_degenerate_landmarks_yield_identity() {
        let src = [(5.0, 5.0); 5];
        let m = estimate_similarity_transform(&src, &REFERENCE_LANDMARKS_112);
        assert_eq!(m, [1.0, 0.0, 0.0, 0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_align_face_output_size() {
        let frame = gray_frame(640, 480, 128);
        let aligned = align_face(&frame, &REFERENCE_LANDMARKS_112);
        assert_eq!(aligned.len(), ALIGNED_SIZE * ALIGNED_SIZE * 3);
        // interior of a uniform frame stays uniform
        let mid = (56 * ALIGNED_SIZE + 56) * 3;
        assert_eq!(&aligned[mid..mid + 3], &[128, 128, 128]);
    }

    #[test]
    fn test_landmark_lands_on_reference() {
        let (w, h) = (200usize, 200usize);
        let mut data = vec![0u8; w * h * 3];
        let src: Landmarks = [
            (80.0, 60.0),
            (120.0, 60.0),
            (100.0, 85.0),
            (85.0, 110.0),
            (115.0, 110.0),
        ];
        // 5x5 bright patch on the left eye survives interpolation
        for y in 58..63 {
            for x in 78..83 {
                let i = (y * w + x) * 3;
                data[i..i + 3].copy_from_slice(&[255, 255, 255]);
            }
        }
        let frame = Frame::from_rgb(data, w as u32, h as u32).unwrap();
        let aligned = align_face(&frame, &src);

        let rx = REFERENCE_LANDMARKS_112[0].0.round() as usize;
        let ry = REFERENCE_LANDMARKS_112[0].1.round() as usize;
        let mut max_val = 0u8;
        for y in ry - 1..=ry + 1 {
            for x in rx - 1..=rx + 1 {
                max_val = max_val.max(aligned[(y * ALIGNED_SIZE + x) * 3]);
            }
        }
        assert!(max_val > 100, "no bright patch near ({rx}, {ry}), max={max_val}");
    }

    #[test]
    fn test_crop_resize() {
        let frame = gray_frame(64, 64, 77);
        let out = crop_resize(&frame, &FaceRegion::new(8, 40, 40, 8)).unwrap();
        assert_eq!(out.len(), ALIGNED_SIZE * ALIGNED_SIZE * 3);
        assert!(out.iter().all(|&p| p == 77));
        assert!(crop_resize(&frame, &FaceRegion::new(10, 10, 10, 10)).is_none());
    }
}
