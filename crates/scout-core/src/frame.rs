//! Frame type and image helpers: downscale, crop, annotation, latest-frame slot.

use crate::types::RecognitionResult;
use image::RgbImage;
use std::sync::{Arc, Mutex};
use std::time::Instant;

const KNOWN_COLOR: [u8; 3] = [0, 255, 0];
const UNKNOWN_COLOR: [u8; 3] = [255, 0, 0];
const BOX_THICKNESS: i32 = 2;

/// A decoded colour frame, RGB8 packed (3 bytes/pixel, row-major).
#[derive(Clone)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: Instant,
    pub sequence: u64,
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("sequence", &self.sequence)
            .finish()
    }
}

impl Frame {
    /// Wrap packed RGB8 pixels. Fails if `data` is not exactly `width * height * 3` bytes.
    pub fn from_rgb(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp: Instant::now(),
            sequence: 0,
        })
    }

    pub fn from_rgb_image(image: RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
            timestamp: Instant::now(),
            sequence: 0,
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    /// Packed RGB8 pixel data.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * 3;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        RgbImage::from_raw(self.width, self.height, self.data.clone())
    }

    /// Area-average downscale by an integer factor. A factor of 0 or 1 returns a copy.
    ///
    /// Trailing rows/columns that do not fill a whole block are dropped, so
    /// output pixel (x, y) summarises source block (x*f..x*f+f, y*f..y*f+f).
    pub fn downscale(&self, factor: u32) -> Frame {
        if factor <= 1 {
            return self.clone();
        }
        let f = factor as usize;
        let src_w = self.width as usize;
        let out_w = src_w / f;
        let out_h = self.height as usize / f;
        let block = (f * f) as u32;

        let mut data = Vec::with_capacity(out_w * out_h * 3);
        for oy in 0..out_h {
            for ox in 0..out_w {
                let mut acc = [0u32; 3];
                for y in oy * f..oy * f + f {
                    let row = y * src_w;
                    for x in ox * f..ox * f + f {
                        let i = (row + x) * 3;
                        acc[0] += self.data[i] as u32;
                        acc[1] += self.data[i + 1] as u32;
                        acc[2] += self.data[i + 2] as u32;
                    }
                }
                data.extend(acc.iter().map(|&c| ((c + block / 2) / block) as u8));
            }
        }

        Frame {
            data,
            width: out_w as u32,
            height: out_h as u32,
            timestamp: self.timestamp,
            sequence: self.sequence,
        }
    }

    /// Copy of the rectangle `[left, right) × [top, bottom)`, clipped to the frame.
    pub fn crop(&self, top: i32, right: i32, bottom: i32, left: i32) -> Option<Frame> {
        let x0 = left.clamp(0, self.width as i32) as usize;
        let x1 = right.clamp(0, self.width as i32) as usize;
        let y0 = top.clamp(0, self.height as i32) as usize;
        let y1 = bottom.clamp(0, self.height as i32) as usize;
        if x1 <= x0 || y1 <= y0 {
            return None;
        }

        let stride = self.width as usize * 3;
        let mut data = Vec::with_capacity((x1 - x0) * (y1 - y0) * 3);
        for y in y0..y1 {
            data.extend_from_slice(&self.data[y * stride + x0 * 3..y * stride + x1 * 3]);
        }
        Some(Frame {
            data,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
            timestamp: self.timestamp,
            sequence: self.sequence,
        })
    }

    /// Copy of this frame with one box per result: green for known faces, red otherwise.
    pub fn annotate(&self, results: &[RecognitionResult]) -> Frame {
        let mut out = self.clone();
        for result in results {
            let color = if result.label.is_known() {
                KNOWN_COLOR
            } else {
                UNKNOWN_COLOR
            };
            let r = result.region.clamp_to(self.width, self.height);
            if r.is_empty() {
                continue;
            }
            for t in 0..BOX_THICKNESS {
                out.hline(r.top + t, r.left, r.right, color);
                out.hline(r.bottom - 1 - t, r.left, r.right, color);
                out.vline(r.left + t, r.top, r.bottom, color);
                out.vline(r.right - 1 - t, r.top, r.bottom, color);
            }
        }
        out
    }

    fn put(&mut self, x: i32, y: i32, color: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i32 || y >= self.height as i32 {
            return;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        self.data[i..i + 3].copy_from_slice(&color);
    }

    fn hline(&mut self, y: i32, x0: i32, x1: i32, color: [u8; 3]) {
        for x in x0..x1 {
            self.put(x, y, color);
        }
    }

    fn vline(&mut self, x: i32, y0: i32, y1: i32, color: [u8; 3]) {
        for y in y0..y1 {
            self.put(x, y, color);
        }
    }
}

/// Single-slot, last-writer-wins holder of the most recent frame.
///
/// Readers get a shared snapshot; the lock is held only to swap the `Arc`.
#[derive(Clone, Default)]
pub struct LatestFrame {
    slot: Arc<Mutex<Option<Arc<Frame>>>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, frame: Arc<Frame>) {
        let mut slot = self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *slot = Some(frame);
    }

    pub fn snapshot(&self) -> Option<Arc<Frame>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid RGB length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FaceRegion, Label};

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data = rgb.repeat((width * height) as usize);
        Frame::from_rgb(data, width, height).unwrap()
    }

    #[test]
    fn test_from_rgb_rejects_bad_length() {
        assert!(Frame::from_rgb(vec![0; 10], 2, 2).is_err());
    }

    #[test]
    fn test_downscale_dimensions() {
        let frame = solid(640, 480, [10, 20, 30]);
        let small = frame.downscale(4);
        assert_eq!((small.width, small.height), (160, 120));
        assert_eq!(small.data().len(), 160 * 120 * 3);
        assert_eq!(small.pixel(5, 5), [10, 20, 30]);
    }

    #[test]
    fn test_downscale_averages_blocks() {
        // 2x2 checkerboard of 0/200 → single pixel of 100
        let mut data = Vec::new();
        for v in [0u8, 200, 200, 0] {
            data.extend([v, v, v]);
        }
        let frame = Frame::from_rgb(data, 2, 2).unwrap();
        assert_eq!(frame.downscale(2).pixel(0, 0), [100, 100, 100]);
    }

    #[test]
    fn test_downscale_factor_one_is_copy() {
        let frame = solid(8, 6, [1, 2, 3]);
        let same = frame.downscale(1);
        assert_eq!(same.data(), frame.data());
    }

    #[test]
    fn test_crop() {
        let mut frame = solid(10, 10, [0, 0, 0]);
        frame.put(4, 3, [9, 9, 9]);
        let crop = frame.crop(3, 6, 5, 4).unwrap();
        assert_eq!((crop.width, crop.height), (2, 2));
        assert_eq!(crop.pixel(0, 0), [9, 9, 9]);
        assert!(frame.crop(5, 4, 5, 4).is_none());
    }

    #[test]
    fn test_annotate_draws_colored_box() {
        let frame = solid(20, 20, [0, 0, 0]);
        let results = vec![
            RecognitionResult {
                region: FaceRegion::new(2, 8, 8, 2),
                label: Label::Known("alice".into()),
                distance: 0.1,
            },
            RecognitionResult {
                region: FaceRegion::new(10, 18, 18, 10),
                label: Label::Unknown,
                distance: 0.9,
            },
        ];
        let annotated = frame.annotate(&results);
        assert_eq!(annotated.pixel(2, 2), KNOWN_COLOR);
        assert_eq!(annotated.pixel(5, 5), [0, 0, 0]);
        assert_eq!(annotated.pixel(17, 17), UNKNOWN_COLOR);
        // source frame untouched
        assert_eq!(frame.pixel(2, 2), [0, 0, 0]);
    }

    #[test]
    fn test_latest_frame_last_writer_wins() {
        let latest = LatestFrame::new();
        assert!(latest.snapshot().is_none());
        latest.publish(Arc::new(solid(2, 2, [1, 1, 1]).with_sequence(1)));
        latest.publish(Arc::new(solid(2, 2, [2, 2, 2]).with_sequence(2)));
        let snap = latest.snapshot().unwrap();
        assert_eq!(snap.sequence, 2);
    }
}
