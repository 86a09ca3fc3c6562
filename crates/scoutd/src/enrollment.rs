use chrono::Local;
use scout_core::{EmbedderError, FaceEmbedder, GalleryError, LatestFrame, SharedGallery};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError {
    #[error("embedding failed: {0}")]
    Embedder(#[from] EmbedderError),
    #[error("gallery error: {0}")]
    Gallery(#[from] GalleryError),
}

/// What a capture request ended with. Only `Enrolled` mutates the gallery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnrollOutcome {
    Enrolled { label: String, path: PathBuf },
    /// Nothing has been captured yet.
    NoFrame,
    NoFace,
    /// The caller supplied no label.
    Cancelled,
}

/// On-demand enrollment of the face in the most recent frame.
pub struct EnrollmentFlow<E> {
    latest: LatestFrame,
    gallery: SharedGallery,
    embedder: Arc<Mutex<E>>,
}

impl<E: FaceEmbedder> EnrollmentFlow<E> {
    pub fn new(latest: LatestFrame, gallery: SharedGallery, embedder: Arc<Mutex<E>>) -> Self {
        Self {
            latest,
            gallery,
            embedder,
        }
    }

    /// Enroll the first face of the latest frame.
    ///
    /// `prompt` is asked for a label only once a face has been found; `None`
    /// or a blank answer cancels. The image is written before the embedding
    /// is appended, and a failed write leaves the gallery untouched.
    pub fn capture(
        &self,
        prompt: impl FnOnce() -> Option<String>,
    ) -> Result<EnrollOutcome, EnrollError> {
        let Some(frame) = self.latest.snapshot() else {
            tracing::info!("capture requested before any frame arrived");
            return Ok(EnrollOutcome::NoFrame);
        };

        let embedding = {
            let mut embedder = self.embedder.lock().unwrap_or_else(PoisonError::into_inner);
            embedder.embed(&frame, None)?
        };
        let Some(embedding) = embedding else {
            tracing::info!(sequence = frame.sequence, "capture: no face detected");
            return Ok(EnrollOutcome::NoFace);
        };

        let label = match prompt() {
            Some(label) if !label.trim().is_empty() => label.trim().to_string(),
            _ => {
                tracing::info!("capture cancelled");
                return Ok(EnrollOutcome::Cancelled);
            }
        };

        let path = self
            .gallery
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .enroll(&label, embedding, &frame, Local::now())?;

        Ok(EnrollOutcome::Enrolled { label, path })
    }
}
