use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::services::ffmpeg::MuxError;
use crate::services::transport::TransportError;

/// Soft rejections returned to the caller before any work starts
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("no rename template configured")]
    MissingTemplate,

    #[error("unsupported media kind: {0}")]
    UnsupportedMedia(String),

    #[error("could not determine quality from {filename:?}")]
    UnknownQuality { filename: String },
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("file is {size} bytes, limit is {limit}")]
    TooLarge { size: u64, limit: u64 },

    #[error("download timed out after {}s", .after.as_secs())]
    Timeout { after: Duration },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Error)]
pub enum UploadError {
    /// Still rate limited after the single retry
    #[error("rate limited again after retry (retry after {}s)", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error(transparent)]
    Transport(TransportError),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("download failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("metadata embedding failed: {0}")]
    Mux(#[from] MuxError),

    #[error("upload failed: {0}")]
    Upload(#[from] UploadError),

    #[error("operation already in progress for {source_key}")]
    DuplicateSuppressed { source_key: String },

    #[error("filename rejected by content filter")]
    UnsafeContent,

    #[error("operation cancelled")]
    Cancelled,

    #[error("working directory {path} unavailable: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Rejections happen before an operation starts; everything else is a
    /// failed operation.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            PipelineError::Validation(_)
                | PipelineError::DuplicateSuppressed { .. }
                | PipelineError::UnsafeContent
        )
    }
}
