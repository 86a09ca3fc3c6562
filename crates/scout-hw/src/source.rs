//! The frame-source seam shared by the camera and network backends, plus the
//! bounded reconnect policy used when a source drops out.

use crate::camera::CameraSource;
use crate::mjpeg::MjpegSource;
use scout_core::Frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;

/// Longest single sleep while backing off, so cancellation is seen promptly.
const CANCEL_POLL: Duration = Duration::from_millis(50);

#[derive(Error, Debug)]
pub enum SourceError {
    /// The device or stream cannot be opened or read.
    #[error("source unavailable: {0}")]
    Unavailable(String),
    /// The stream ended (server closed the connection, device went away).
    #[error("end of stream")]
    EndOfStream,
    /// A retry loop was interrupted by shutdown.
    #[error("cancelled")]
    Cancelled,
}

/// Producer of decoded colour frames.
///
/// `Ok(None)` is an empty cycle: a read timed out or a payload failed to
/// decode. It is not a reason to reconnect.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;

    /// Drop the current handle and acquire a fresh one.
    fn reconnect(&mut self) -> Result<(), SourceError>;

    /// Human-readable identity for logs ("/dev/video0", a stream URL).
    fn describe(&self) -> String;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        (**self).next_frame()
    }

    fn reconnect(&mut self) -> Result<(), SourceError> {
        (**self).reconnect()
    }

    fn describe(&self) -> String {
        (**self).describe()
    }
}

/// Exponential backoff with a bounded number of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    /// Delay before attempt `attempt` (0-based): initial × 2^attempt, capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// Run `op` until it succeeds or `max_attempts` is spent, sleeping the
    /// backoff before each attempt. Returns the last error on exhaustion, or
    /// [`SourceError::Cancelled`] as soon as `cancel` is raised.
    pub fn retry<T>(
        &self,
        cancel: &AtomicBool,
        mut op: impl FnMut(u32) -> Result<T, SourceError>,
    ) -> Result<T, SourceError> {
        let mut last = SourceError::Unavailable("no attempts allowed".into());
        for attempt in 0..self.max_attempts {
            if !sleep_unless_cancelled(self.backoff(attempt), cancel) {
                return Err(SourceError::Cancelled);
            }
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        max = self.max_attempts,
                        error = %e,
                        "source retry failed"
                    );
                    last = e;
                }
            }
        }
        Err(last)
    }
}

/// Sleep for `total`, waking early if `cancel` is raised. Returns `false` if cancelled.
pub fn sleep_unless_cancelled(total: Duration, cancel: &AtomicBool) -> bool {
    let mut remaining = total;
    loop {
        if cancel.load(Ordering::Acquire) {
            return false;
        }
        if remaining.is_zero() {
            return true;
        }
        let step = remaining.min(CANCEL_POLL);
        std::thread::sleep(step);
        remaining -= step;
    }
}

/// Which backend to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceConfig {
    /// Local V4L2 device, e.g. `/dev/video0`.
    Camera { device: String },
    /// MJPEG over a single long-lived HTTP GET.
    Mjpeg { url: String, read_timeout: Duration },
}

impl SourceConfig {
    /// `http://` and `https://` locations are MJPEG streams; anything else is a device path.
    pub fn parse(location: &str, read_timeout: Duration) -> Self {
        let lower = location.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            SourceConfig::Mjpeg {
                url: location.to_string(),
                read_timeout,
            }
        } else {
            SourceConfig::Camera {
                device: location.to_string(),
            }
        }
    }
}

/// Open the configured source. Failure here is the one fatal startup error.
pub fn open_source(config: &SourceConfig) -> Result<Box<dyn FrameSource>, SourceError> {
    match config {
        SourceConfig::Camera { device } => Ok(Box::new(CameraSource::open(device)?)),
        SourceConfig::Mjpeg { url, read_timeout } => {
            Ok(Box::new(MjpegSource::connect(url, *read_timeout)?))
        }
    }
}
