//! Thumbnail normalization
//!
//! Any decodable image becomes an RGB JPEG of exactly `size`x`size` pixels,
//! rewritten in place. Failures are reported as [`ThumbnailError`], which the
//! pipeline absorbs.

use std::path::{Path, PathBuf};

use image::ImageFormat;
use image::imageops::FilterType;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ThumbnailError {
    #[error("failed to fetch thumbnail: {0}")]
    Fetch(String),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode or encode {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("thumbnail worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Copy)]
pub struct ThumbnailProcessor {
    size: u32,
}

impl ThumbnailProcessor {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    /// Decode, convert to RGB, resize to a square and re-encode as JPEG
    pub async fn normalize(&self, path: &Path) -> Result<(), ThumbnailError> {
        let size = self.size;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || normalize_blocking(&path, size)).await?
    }
}

fn normalize_blocking(path: &Path, size: u32) -> Result<(), ThumbnailError> {
    let image_error = |source| ThumbnailError::Image {
        path: path.to_path_buf(),
        source,
    };

    // Content decides the format; thumbnails often arrive with the wrong extension
    let image = image::io::Reader::open(path)
        .map_err(|source| ThumbnailError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .with_guessed_format()
        .map_err(|source| ThumbnailError::Io {
            path: path.to_path_buf(),
            source,
        })?
        .decode()
        .map_err(image_error)?;

    let rgb = image::imageops::resize(&image.to_rgb8(), size, size, FilterType::Triangle);
    rgb.save_with_format(path, ImageFormat::Jpeg)
        .map_err(image_error)?;

    debug!(path = %path.display(), size, "Thumbnail normalized");
    Ok(())
}
