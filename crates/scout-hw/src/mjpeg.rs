//! MJPEG-over-HTTP frame source (ESP32-CAM style `multipart/x-mixed-replace`).
//!
//! The response body is treated as an unbounded byte stream. JPEG payloads are
//! delimited by their SOI (`FF D8`) and EOI (`FF D9`) markers; multipart
//! boundaries and headers between payloads are skipped as stray bytes.

use crate::source::{FrameSource, SourceError};
use scout_core::Frame;
use std::io::{ErrorKind, Read};
use std::time::Duration;
use url::Url;

const READ_CHUNK: usize = 1024;
const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

fn find_marker(haystack: &[u8], marker: [u8; 2]) -> Option<usize> {
    haystack.windows(2).position(|w| w == marker)
}

/// Splits a byte stream into JPEG payloads.
pub struct MjpegReader<R> {
    reader: R,
    buffer: Vec<u8>,
    chunk: Box<[u8]>,
}

impl<R: Read> MjpegReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: Vec::with_capacity(64 * 1024),
            chunk: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    /// Bytes read but not yet returned as part of a frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Next complete JPEG payload, SOI through EOI inclusive.
    ///
    /// Returns `Ok(None)` if the underlying read times out before a payload
    /// completes; the partial payload stays buffered for the next call.
    pub fn next_jpeg(&mut self) -> Result<Option<Vec<u8>>, SourceError> {
        loop {
            if let Some(jpeg) = self.take_buffered_jpeg() {
                return Ok(Some(jpeg));
            }

            match self.reader.read(&mut self.chunk) {
                Ok(0) => {
                    if !self.buffer.is_empty() {
                        tracing::debug!(discarded = self.buffer.len(), "stream ended mid-frame");
                        self.buffer.clear();
                    }
                    return Err(SourceError::EndOfStream);
                }
                Ok(n) => self.buffer.extend_from_slice(&self.chunk[..n]),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    return Ok(None);
                }
                Err(e) => return Err(SourceError::Unavailable(format!("read mjpeg chunk: {e}"))),
            }
        }
    }

    /// Extract one payload from the buffer, discarding everything before it
    /// and keeping the buffer bounded while a payload is incomplete.
    fn take_buffered_jpeg(&mut self) -> Option<Vec<u8>> {
        let Some(start) = find_marker(&self.buffer, SOI) else {
            // keep a trailing 0xFF: it may be the first half of a marker
            let keep = usize::from(self.buffer.last() == Some(&0xFF));
            let drop = self.buffer.len() - keep;
            self.buffer.drain(..drop);
            return None;
        };
        if start > 0 {
            self.buffer.drain(..start);
        }

        match find_marker(&self.buffer[SOI.len()..], EOI) {
            Some(pos) => {
                let end = SOI.len() + pos + EOI.len();
                let jpeg = self.buffer[..end].to_vec();
                self.buffer.drain(..end);
                Some(jpeg)
            }
            None => {
                if self.buffer.len() > MAX_JPEG_BYTES {
                    tracing::warn!(bytes = self.buffer.len(), "oversized mjpeg payload dropped");
                    self.buffer.clear();
                }
                None
            }
        }
    }
}

/// Decode a JPEG payload into an RGB frame; `None` if it is malformed.
pub fn decode_jpeg(bytes: &[u8]) -> Option<Frame> {
    match image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg) {
        Ok(img) => Some(Frame::from_rgb_image(img.into_rgb8())),
        Err(e) => {
            tracing::debug!(error = %e, bytes = bytes.len(), "jpeg decode failed");
            None
        }
    }
}

/// Frame source reading an MJPEG stream from an HTTP endpoint.
pub struct MjpegSource {
    url: String,
    agent: ureq::Agent,
    reader: Option<MjpegReader<Box<dyn Read + Send>>>,
    sequence: u64,
}

impl MjpegSource {
    /// Validate the URL and issue the streaming GET.
    pub fn connect(url: &str, read_timeout: Duration) -> Result<Self, SourceError> {
        let parsed =
            Url::parse(url).map_err(|e| SourceError::Unavailable(format!("parse {url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(SourceError::Unavailable(format!(
                "unsupported scheme '{}'; expected http(s)",
                parsed.scheme()
            )));
        }

        let agent = ureq::AgentBuilder::new()
            .timeout_connect(CONNECT_TIMEOUT)
            .timeout_read(read_timeout)
            .build();

        let mut source = Self {
            url: url.to_string(),
            agent,
            reader: None,
            sequence: 0,
        };
        source.open_stream()?;
        Ok(source)
    }

    fn open_stream(&mut self) -> Result<(), SourceError> {
        self.reader = None;
        let response = self
            .agent
            .get(&self.url)
            .call()
            .map_err(|e| SourceError::Unavailable(format!("GET {}: {e}", self.url)))?;
        tracing::info!(
            url = %self.url,
            content_type = response.content_type(),
            "mjpeg stream connected"
        );
        let reader: Box<dyn Read + Send> = response.into_reader();
        self.reader = Some(MjpegReader::new(reader));
        Ok(())
    }
}

impl FrameSource for MjpegSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| SourceError::Unavailable("mjpeg stream not connected".into()))?;

        let Some(jpeg) = reader.next_jpeg()? else {
            return Ok(None);
        };
        self.sequence += 1;
        Ok(decode_jpeg(&jpeg).map(|f| f.with_sequence(self.sequence)))
    }

    fn reconnect(&mut self) -> Result<(), SourceError> {
        self.open_stream()
    }

    fn describe(&self) -> String {
        self.url.clone()
    }
}
