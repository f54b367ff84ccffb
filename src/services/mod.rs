//! Rename services and the collaborator contracts they depend on

pub mod content_filter;
pub mod ffmpeg;
pub mod file_utils;
pub mod filename_parser;
pub mod janitor;
pub mod local_transport;
pub mod naming;
pub mod operation_guard;
pub mod pipeline;
pub mod preferences;
pub mod thumbnail;
pub mod transport;

pub use content_filter::{ContentSafety, KeywordContentFilter, SafetyContext};
pub use ffmpeg::{FfmpegService, MetadataEmbedder, MuxError, ToolOutcome};
pub use filename_parser::{CascadeError, ExtractionResult, FilenameParser, Quality};
pub use janitor::{ArtifactKind, WorkingSet};
pub use local_transport::LocalTransport;
pub use naming::TemplateRenderer;
pub use operation_guard::{Admission, OperationGuard};
pub use pipeline::{
    Pipeline, PipelineError, PipelineServices, PipelineSettings, RenameReport, Stage, StageEvent,
};
pub use preferences::{MemoryPreferenceStore, MetadataFields, PreferenceStore};
pub use thumbnail::{ThumbnailError, ThumbnailProcessor};
pub use transport::{
    Delivery, MediaKind, ProgressCallback, SourceItem, ThumbnailRef, Transport, TransportError,
};
