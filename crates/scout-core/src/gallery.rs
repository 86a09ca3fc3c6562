//! Enrolled identities: loading from a directory of stills, in-session
//! enrollment, and persistence of enrollment captures.

use crate::embedder::FaceEmbedder;
use crate::frame::Frame;
use crate::types::Embedding;
use chrono::{DateTime, Local};
use image::ImageFormat;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use thiserror::Error;

const CAPTURE_EXTENSION: &str = "jpg";
const CAPTURE_TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Gallery shared between the recognition loop (reads) and enrollment (appends).
pub type SharedGallery = Arc<RwLock<Gallery>>;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("cannot read gallery directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("gallery has no storage directory")]
    NoStorage,
    #[error("invalid label {0:?}")]
    InvalidLabel(String),
    #[error("cannot encode capture: frame buffer does not match its dimensions")]
    BadFrame,
    #[error("cannot write capture {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// One enrolled person: a label and one or more reference embeddings.
#[derive(Debug, Clone)]
pub struct Identity {
    pub label: String,
    embeddings: Vec<Embedding>,
}

impl Identity {
    pub fn embeddings(&self) -> &[Embedding] {
        &self.embeddings
    }
}

/// Why a gallery file contributed nothing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadWarningKind {
    /// The file could not be decoded as an image.
    Unreadable(String),
    /// No face was detected in the image.
    NoFace,
    /// Detection or embedding failed for this file.
    EmbedFailed(String),
}

/// A skipped gallery file, reported from [`Gallery::load`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadWarning {
    pub path: PathBuf,
    pub kind: LoadWarningKind,
}

/// Result of loading a gallery directory.
#[derive(Debug)]
pub struct GalleryLoad {
    pub gallery: Gallery,
    pub warnings: Vec<LoadWarning>,
}

/// All enrolled identities. Grows during a session, never shrinks.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
    dir: Option<PathBuf>,
}

impl Gallery {
    /// In-memory gallery with no storage directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty gallery that persists enrollment captures into `dir`.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            identities: Vec::new(),
            dir: Some(dir.into()),
        }
    }

    /// Build a gallery from every image in `dir`.
    ///
    /// Each file contributes at most one embedding (its first detected face)
    /// under a label equal to the file stem, with invalid UTF-8 replaced by
    /// U+FFFD. Files that cannot be decoded or hold no face are skipped with
    /// a warning. Files are visited in name order; two files sharing a stem
    /// become two identities sharing a label.
    pub fn load<E: FaceEmbedder + ?Sized>(
        dir: &Path,
        embedder: &mut E,
    ) -> Result<GalleryLoad, GalleryError> {
        let read_dir = |source| GalleryError::ReadDir {
            path: dir.to_path_buf(),
            source,
        };
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)
            .map_err(read_dir)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(read_dir)?
            .into_iter()
            .map(|entry| entry.path())
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut gallery = Gallery::in_dir(dir);
        let mut warnings = Vec::new();

        for path in paths {
            let Some(stem) = path.file_stem() else {
                continue;
            };
            let label = stem.to_string_lossy().into_owned();

            let kind = match image::open(&path) {
                Err(e) => LoadWarningKind::Unreadable(e.to_string()),
                Ok(img) => {
                    let frame = Frame::from_rgb_image(img.into_rgb8());
                    match embedder.embed(&frame, None) {
                        Ok(Some(embedding)) => {
                            tracing::debug!(label = %label, path = %path.display(), "gallery image loaded");
                            gallery.push(&label, embedding);
                            continue;
                        }
                        Ok(None) => LoadWarningKind::NoFace,
                        Err(e) => LoadWarningKind::EmbedFailed(e.to_string()),
                    }
                }
            };

            tracing::warn!(path = %path.display(), reason = ?kind, "skipping gallery image");
            warnings.push(LoadWarning { path, kind });
        }

        tracing::info!(
            dir = %dir.display(),
            identities = gallery.len(),
            skipped = warnings.len(),
            "gallery loaded"
        );

        Ok(GalleryLoad { gallery, warnings })
    }

    /// Append a new identity holding one embedding. Returns its index.
    pub fn push(&mut self, label: &str, embedding: Embedding) -> usize {
        self.identities.push(Identity {
            label: label.to_string(),
            embeddings: vec![embedding],
        });
        self.identities.len() - 1
    }

    /// Add another reference embedding to an existing identity.
    ///
    /// Returns `false` if `index` is out of range.
    pub fn add_sample(&mut self, index: usize, embedding: Embedding) -> bool {
        match self.identities.get_mut(index) {
            Some(identity) => {
                identity.embeddings.push(embedding);
                true
            }
            None => false,
        }
    }

    /// Persist `source` as `<label>_<YYYYMMDD_HHMMSS>.jpg` and append the
    /// embedding under `label`. The gallery is unchanged if persistence fails.
    pub fn enroll(
        &mut self,
        label: &str,
        embedding: Embedding,
        source: &Frame,
        now: DateTime<Local>,
    ) -> Result<PathBuf, GalleryError> {
        let label = label.trim();
        if label.is_empty() {
            return Err(GalleryError::InvalidLabel(label.to_string()));
        }
        let dir = self.dir.as_deref().ok_or(GalleryError::NoStorage)?;
        let path = persist_capture(dir, label, source, now)?;
        self.push(label, embedding);
        tracing::info!(label, path = %path.display(), "identity enrolled");
        Ok(path)
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    /// Every (identity, reference embedding) pair, in gallery order.
    pub fn embeddings(&self) -> impl Iterator<Item = (&Identity, &Embedding)> {
        self.identities
            .iter()
            .flat_map(|id| id.embeddings.iter().map(move |e| (id, e)))
    }

    /// Number of identities.
    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    /// Number of reference embeddings across all identities.
    pub fn embedding_count(&self) -> usize {
        self.identities.iter().map(|id| id.embeddings.len()).sum()
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    pub fn into_shared(self) -> SharedGallery {
        Arc::new(RwLock::new(self))
    }
}

/// File-system-safe form of a label.
fn file_label(label: &str) -> String {
    label
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c => c,
        })
        .collect()
}

/// Write `frame` into `dir` under a label + timestamp name that does not
/// collide with an existing file.
pub fn persist_capture(
    dir: &Path,
    label: &str,
    frame: &Frame,
    now: DateTime<Local>,
) -> Result<PathBuf, GalleryError> {
    let stem = format!(
        "{}_{}",
        file_label(label),
        now.format(CAPTURE_TIMESTAMP_FORMAT)
    );
    let mut path = dir.join(format!("{stem}.{CAPTURE_EXTENSION}"));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{stem}_{n}.{CAPTURE_EXTENSION}"));
        n += 1;
    }

    std::fs::create_dir_all(dir)?;
    let image = frame.to_rgb_image().ok_or(GalleryError::BadFrame)?;
    image
        .save_with_format(&path, ImageFormat::Jpeg)
        .map_err(|source| GalleryError::Persist {
            path: path.clone(),
            source,
        })?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{scene, BlobEmbedder};
    use crate::types::FaceRegion;
    use chrono::TimeZone;

    fn alice_scene() -> Frame {
        scene(64, 64, &[(FaceRegion::new(16, 48, 48, 16), [230, 20, 20])])
    }

    fn save_png(dir: &Path, name: &str, frame: &Frame) {
        frame
            .to_rgb_image()
            .unwrap()
            .save_with_format(dir.join(name), ImageFormat::Png)
            .unwrap();
    }

    fn noon() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 19, 12, 30, 5).unwrap()
    }

    #[test]
    fn test_load_skips_faceless_image_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        save_png(dir.path(), "alice.png", &alice_scene());
        save_png(dir.path(), "bob.png", &scene(64, 64, &[]));

        let load = Gallery::load(dir.path(), &mut BlobEmbedder::new()).unwrap();
        assert_eq!(load.gallery.len(), 1);
        assert_eq!(load.gallery.identities()[0].label, "alice");
        assert_eq!(load.warnings.len(), 1);
        assert_eq!(load.warnings[0].path, dir.path().join("bob.png"));
        assert_eq!(load.warnings[0].kind, LoadWarningKind::NoFace);
    }

    #[cfg(unix)]
    #[test]
    fn test_load_keeps_non_utf8_stem() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(OsStr::from_bytes(b"jos\xe9.png"));
        alice_scene()
            .to_rgb_image()
            .unwrap()
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();

        let load = Gallery::load(dir.path(), &mut BlobEmbedder::new()).unwrap();
        assert!(load.warnings.is_empty());
        assert_eq!(load.gallery.len(), 1);
        assert_eq!(load.gallery.identities()[0].label, "jos\u{FFFD}");
    }

    #[test]
    fn test_load_skips_unreadable_file() {
        let dir = tempfile::tempdir().unwrap();
        save_png(dir.path(), "alice.png", &alice_scene());
        std::fs::write(dir.path().join("notes.txt"), b"not an image").unwrap();

        let load = Gallery::load(dir.path(), &mut BlobEmbedder::new()).unwrap();
        assert_eq!(load.gallery.len(), 1);
        assert!(matches!(load.warnings[0].kind, LoadWarningKind::Unreadable(_)));
    }

    #[test]
    fn test_load_duplicate_stems_stay_distinct() {
        let dir = tempfile::tempdir().unwrap();
        save_png(dir.path(), "dave.png", &alice_scene());
        alice_scene()
            .to_rgb_image()
            .unwrap()
            .save_with_format(dir.path().join("dave.bmp"), ImageFormat::Bmp)
            .unwrap();

        let load = Gallery::load(dir.path(), &mut BlobEmbedder::new()).unwrap();
        assert_eq!(load.gallery.len(), 2);
        assert!(load.gallery.identities().iter().all(|id| id.label == "dave"));
        assert_eq!(load.gallery.embedding_count(), 2);
    }

    #[test]
    fn test_load_missing_dir_is_error() {
        let err = Gallery::load(Path::new("/nonexistent/gallery"), &mut BlobEmbedder::new());
        assert!(matches!(err, Err(GalleryError::ReadDir { .. })));
    }

    #[test]
    fn test_enroll_persists_and_appends() {
        let dir = tempfile::tempdir().unwrap();
        let mut gallery = Gallery::in_dir(dir.path());
        let frame = alice_scene();

        let path = gallery
            .enroll("alice", Embedding::new(vec![0.9, 0.1, 0.1]), &frame, noon())
            .unwrap();
        assert_eq!(path, dir.path().join("alice_20261019_123005.jpg"));
        assert!(path.exists());
        assert_eq!(gallery.embedding_count(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_enroll_same_second_does_not_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let mut gallery = Gallery::in_dir(dir.path());
        let frame = alice_scene();
        let first = gallery.enroll("alice", Embedding::new(vec![1.0]), &frame, noon()).unwrap();
        let second = gallery.enroll("alice", Embedding::new(vec![1.0]), &frame, noon()).unwrap();
        assert_ne!(first, second);
        assert_eq!(second, dir.path().join("alice_20261019_123005_1.jpg"));
        assert_eq!(gallery.len(), 2);
    }

    #[test]
    fn test_enroll_without_storage_leaves_gallery_unchanged() {
        let mut gallery = Gallery::new();
        let err = gallery.enroll("alice", Embedding::new(vec![1.0]), &alice_scene(), noon());
        assert!(matches!(err, Err(GalleryError::NoStorage)));
        assert!(gallery.is_empty());
    }

    #[test]
    fn test_enroll_rejects_blank_label() {
        let dir = tempfile::tempdir().unwrap();
        let mut gallery = Gallery::in_dir(dir.path());
        let err = gallery.enroll("   ", Embedding::new(vec![1.0]), &alice_scene(), noon());
        assert!(matches!(err, Err(GalleryError::InvalidLabel(_))));
        assert_eq!(gallery.embedding_count(), 0);
    }

    #[test]
    fn test_file_label_strips_separators() {
        assert_eq!(file_label("../etc/passwd"), ".._etc_passwd");
    }

    #[test]
    fn test_enrolled_capture_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let mut gallery = Gallery::in_dir(dir.path());
        let frame = alice_scene();
        let mut emb = BlobEmbedder::new();
        let e = emb.embed(&frame, None).unwrap().unwrap();
        gallery.enroll("alice", e, &frame, noon()).unwrap();

        let load = Gallery::load(dir.path(), &mut emb).unwrap();
        assert_eq!(load.gallery.len(), 1);
        assert_eq!(load.gallery.identities()[0].label, "alice_20261019_123005");
    }
}
