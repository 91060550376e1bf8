//! Gallery of registered faces: one reference image per identity on disk.
//!
//! The file stem is the identity (`alice.jpg` → `alice`). Loading encodes each
//! image with the face engine; images without a detectable face are skipped.

use crate::engine::FaceEngine;
use crate::types::GalleryEntry;
use image::RgbImage;
use std::path::{Path, PathBuf};
use thiserror::Error;

const REFERENCE_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery directory {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid identity {0:?}: must be non-empty and contain no path separators")]
    InvalidIdentity(String),
    #[error("failed to save reference image {path}: {source}")]
    Save {
        path: PathBuf,
        source: image::ImageError,
    },
}

/// Registered identities in file-name order.
#[derive(Debug, Default, Clone)]
pub struct Gallery {
    entries: Vec<GalleryEntry>,
}

impl Gallery {
    /// Encode every image in `dir`.
    ///
    /// Only failing to list the directory is an error. Unreadable files and
    /// images with no detectable face are logged and skipped, so the result
    /// may be empty.
    pub fn load(dir: &Path, engine: &mut dyn FaceEngine) -> Result<Self, GalleryError> {
        let mut entries = Vec::new();

        for path in list_images(dir)? {
            let Some(identity) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string)
            else {
                continue;
            };

            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };

            match engine.encode_best(&image) {
                Ok(Some((face, embedding))) => {
                    tracing::debug!(identity = %identity, confidence = face.confidence, "encoded reference face");
                    entries.push(GalleryEntry {
                        identity,
                        embedding,
                    });
                }
                Ok(None) => {
                    tracing::warn!(identity = %identity, path = %path.display(), "no face detected in reference image, skipping");
                }
                Err(e) => {
                    tracing::warn!(identity = %identity, error = %e, "failed to encode reference image, skipping");
                }
            }
        }

        tracing::info!(dir = %dir.display(), count = entries.len(), "gallery loaded");
        Ok(Self { entries })
    }

    /// Build a gallery from already-encoded entries.
    pub fn from_entries(entries: Vec<GalleryEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[GalleryEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.identity.as_str())
    }
}

/// Sorted regular files in `dir`, creating the directory if it is missing.
fn list_images(dir: &Path) -> Result<Vec<PathBuf>, GalleryError> {
    let io_err = |source| GalleryError::Io {
        path: dir.to_path_buf(),
        source,
    };

    std::fs::create_dir_all(dir).map_err(io_err)?;
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(io_err)? {
        let path = entry.map_err(io_err)?.path();
        if path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Check a user-supplied name can be used as a file stem.
pub fn validate_identity(identity: &str) -> Result<(), GalleryError> {
    let bad = identity.is_empty()
        || identity == "."
        || identity == ".."
        || identity.contains(['/', '\\'])
        || identity.chars().any(char::is_control);
    if bad {
        Err(GalleryError::InvalidIdentity(identity.to_string()))
    } else {
        Ok(())
    }
}

/// Path of the reference image for `identity`.
pub fn reference_path(dir: &Path, identity: &str) -> PathBuf {
    dir.join(format!("{identity}.{REFERENCE_EXTENSION}"))
}

/// Save (or replace) the reference image for `identity`.
pub fn save_reference(dir: &Path, identity: &str, image: &RgbImage) -> Result<PathBuf, GalleryError> {
    validate_identity(identity)?;
    std::fs::create_dir_all(dir).map_err(|source| GalleryError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let path = reference_path(dir, identity);
    image.save(&path).map_err(|source| GalleryError::Save {
        path: path.clone(),
        source,
    })?;
    tracing::info!(identity, path = %path.display(), "reference image saved");
    Ok(path)
}
