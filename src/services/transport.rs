//! Transport contract: where source bytes come from and where renamed
//! artifacts are delivered.
//!
//! The chat/bot transport itself lives outside this crate; the pipeline only
//! talks to it through [`Transport`]. [`LocalTransport`](super::local_transport::LocalTransport)
//! implements it over the local filesystem.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::pipeline::ValidationError;

/// Progress callback: `(bytes_done, bytes_total)`
pub type ProgressCallback = Arc<dyn Fn(u64, u64) + Send + Sync>;

/// How an item is received or delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Document,
    Video,
    Audio,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Document => "document",
            MediaKind::Video => "video",
            MediaKind::Audio => "audio",
        }
    }

    /// Extension used when the declared filename carries none
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaKind::Document => ".mkv",
            MediaKind::Video => ".mp4",
            MediaKind::Audio => ".mp3",
        }
    }
}

impl FromStr for MediaKind {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "document" | "doc" => Ok(MediaKind::Document),
            "video" => Ok(MediaKind::Video),
            "audio" => Ok(MediaKind::Audio),
            other => Err(ValidationError::UnsupportedMedia(other.to_string())),
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Opaque reference to a thumbnail the transport knows how to fetch
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ThumbnailRef(pub String);

impl ThumbnailRef {
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// An inbound media item. Immutable once received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceItem {
    /// Opaque identity of the source; the dedup key
    pub source_key: String,
    pub user_id: i64,
    pub chat_id: i64,
    /// Declared filename
    pub file_name: String,
    pub size_bytes: u64,
    pub kind: MediaKind,
    /// Thumbnail embedded in the inbound item, if any
    pub thumbnail: Option<ThumbnailRef>,
    pub duration_secs: Option<u64>,
}

/// Everything handed to the transport for delivery
#[derive(Debug, Clone)]
pub struct Delivery<'a> {
    pub chat_id: i64,
    pub kind: MediaKind,
    pub payload: &'a Path,
    pub file_name: &'a str,
    pub caption: &'a str,
    pub thumbnail: Option<&'a Path>,
    pub duration_secs: Option<u64>,
}

#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport asked us to back off before trying again
    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },
    #[error("{0}")]
    Failed(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Download the item's bytes to `dest`, returning the number of bytes written
    async fn fetch(
        &self,
        item: &SourceItem,
        dest: &Path,
        progress: ProgressCallback,
    ) -> Result<u64, TransportError>;

    /// Download a thumbnail image to `dest`
    async fn fetch_thumbnail(&self, thumbnail: &ThumbnailRef, dest: &Path)
        -> Result<(), TransportError>;

    /// Deliver the finished artifact
    async fn send(
        &self,
        delivery: &Delivery<'_>,
        progress: ProgressCallback,
    ) -> Result<(), TransportError>;
}
