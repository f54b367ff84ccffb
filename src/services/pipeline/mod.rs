//! Rename pipeline orchestration
//!
//! One call to [`Pipeline::process`] drives a single source item through
//! `Admitted -> Fetching -> Muxing -> ThumbProcessing -> Emitting -> Done`,
//! or to `Failed` from any of those. Working files are tracked by the
//! operation's [`WorkingSet`] and removed on every exit path; the dedup
//! admission is released after cleanup, also on every exit path.

mod error;
mod operation;

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub use error::{FetchError, PipelineError, UploadError, ValidationError};
pub use operation::{Operation, RenameReport, Stage, StageEvent};

use crate::config::Config;
use crate::services::content_filter::{ContentSafety, SafetyContext};
use crate::services::ffmpeg::MetadataEmbedder;
use crate::services::file_utils::get_extension;
use crate::services::filename_parser::FilenameParser;
use crate::services::janitor::{ArtifactKind, WorkingSet};
use crate::services::naming::{CaptionContext, TemplateRenderer, target_file_name};
use crate::services::operation_guard::OperationGuard;
use crate::services::preferences::PreferenceStore;
use crate::services::thumbnail::{ThumbnailError, ThumbnailProcessor};
use crate::services::transport::{
    Delivery, MediaKind, ProgressCallback, SourceItem, ThumbnailRef, Transport, TransportError,
};

const EVENT_CAPACITY: usize = 256;

/// Limits and locations for pipeline runs
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub work_dir: PathBuf,
    pub max_file_size: u64,
    pub fetch_timeout: Duration,
    pub rate_limit_cap: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            work_dir: config.work_dir.clone(),
            max_file_size: config.max_file_size,
            fetch_timeout: Duration::from_secs(config.fetch_timeout_secs),
            rate_limit_cap: Duration::from_secs(config.rate_limit_cap_secs),
        }
    }
}

/// Everything the pipeline delegates to
pub struct PipelineServices {
    pub parser: Arc<FilenameParser>,
    pub renderer: TemplateRenderer,
    pub guard: Arc<OperationGuard>,
    pub thumbnails: ThumbnailProcessor,
    pub embedder: Arc<dyn MetadataEmbedder>,
    pub transport: Arc<dyn Transport>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub safety: Arc<dyn ContentSafety>,
}

pub struct Pipeline {
    settings: PipelineSettings,
    services: PipelineServices,
    events: broadcast::Sender<StageEvent>,
}

/// Resolved inputs for one admitted operation
struct Plan<'a> {
    item: &'a SourceItem,
    kind: MediaKind,
    file_name: String,
}

impl Pipeline {
    pub fn new(settings: PipelineSettings, services: PipelineServices) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            settings,
            services,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StageEvent> {
        self.events.subscribe()
    }

    pub fn guard(&self) -> &Arc<OperationGuard> {
        &self.services.guard
    }

    /// Run one item through the pipeline.
    ///
    /// Cancelling `cancel` abandons the current stage (killing the metadata
    /// tool if it is running); cleanup and release still happen.
    pub async fn process(
        &self,
        item: &SourceItem,
        cancel: &CancellationToken,
    ) -> Result<RenameReport, PipelineError> {
        let template = self
            .services
            .preferences
            .get_template(item.user_id)
            .await
            .ok_or(ValidationError::MissingTemplate)?;

        let safety_ctx = SafetyContext {
            user_id: item.user_id,
            chat_id: item.chat_id,
        };
        if self
            .services
            .safety
            .is_unsafe(&item.file_name, &safety_ctx)
            .await
        {
            warn!(source_key = %item.source_key, file_name = %item.file_name, "Unsafe filename rejected");
            return Err(PipelineError::UnsafeContent);
        }

        let Some(admission) = self.services.guard.try_admit(&item.source_key) else {
            debug!(source_key = %item.source_key, "Duplicate trigger ignored");
            return Err(PipelineError::DuplicateSuppressed {
                source_key: item.source_key.clone(),
            });
        };

        let fields = self.services.parser.extract(&item.file_name);
        if fields.quality.is_unknown() {
            // `admission` drops here and releases the key
            return Err(ValidationError::UnknownQuality {
                filename: item.file_name.clone(),
            }
            .into());
        }

        let kind = self
            .services
            .preferences
            .get_media_preference(item.user_id)
            .await
            .unwrap_or(item.kind);
        let rendered = self.services.renderer.render(&template, &fields);
        let plan = Plan {
            item,
            kind,
            file_name: target_file_name(&rendered, &item.file_name, kind),
        };

        let id = Uuid::new_v4().to_string();
        let mut op = Operation::new(
            id.clone(),
            item.source_key.clone(),
            WorkingSet::new(&self.settings.work_dir, id),
        );
        info!(
            operation_id = %op.id,
            source_key = %op.source_key,
            target = %plan.file_name,
            kind = %plan.kind,
            "Operation admitted"
        );
        self.publish(&op);

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PipelineError::Cancelled),
            result = self.run_stages(&plan, &mut op) => result,
        };

        op.working.cleanup().await;

        match &result {
            Ok(_) => {
                op.advance(Stage::Done);
                info!(operation_id = %op.id, file_name = %plan.file_name, "Rename complete");
            }
            Err(e) => {
                let failed_in = op.stage();
                op.advance(Stage::Failed);
                error!(
                    operation_id = %op.id,
                    source_key = %op.source_key,
                    stage = %failed_in,
                    error = %e,
                    "Rename failed"
                );
            }
        }
        self.publish(&op);
        drop(admission);

        result
    }

    async fn run_stages(
        &self,
        plan: &Plan<'_>,
        op: &mut Operation,
    ) -> Result<RenameReport, PipelineError> {
        let item = plan.item;

        self.transition(op, Stage::Fetching);
        let source = self.fetch(plan, op).await?;

        self.transition(op, Stage::Muxing);
        let metadata = self
            .services
            .preferences
            .get_metadata_fields(item.user_id)
            .await;
        let target_ext = get_extension(&plan.file_name)
            .unwrap_or_else(|| plan.kind.default_extension().to_string());
        let muxed = op.working.acquire(ArtifactKind::Muxed, &target_ext);
        self.services
            .embedder
            .embed(&source, &muxed, &metadata)
            .await?;
        op.working.discard(ArtifactKind::Source).await;

        self.transition(op, Stage::ThumbProcessing);
        let thumbnail = match self.prepare_thumbnail(plan, op).await {
            Ok(thumbnail) => thumbnail,
            Err(e) => {
                warn!(operation_id = %op.id, error = %e, "Thumbnail unavailable, continuing without");
                op.working.discard(ArtifactKind::Thumbnail).await;
                None
            }
        };

        self.transition(op, Stage::Emitting);
        let caption_template = self.services.preferences.get_caption(item.chat_id).await;
        let caption = self.services.renderer.render_caption(
            caption_template.as_deref(),
            &CaptionContext {
                file_name: &plan.file_name,
                size_bytes: item.size_bytes,
                duration_secs: item.duration_secs,
            },
        );
        let delivery = Delivery {
            chat_id: item.chat_id,
            kind: plan.kind,
            payload: &muxed,
            file_name: &plan.file_name,
            caption: &caption,
            thumbnail: thumbnail.as_deref(),
            duration_secs: item.duration_secs,
        };
        self.upload(&delivery, &op.id).await?;

        Ok(RenameReport {
            source_key: item.source_key.clone(),
            file_name: plan.file_name.clone(),
            kind: plan.kind,
            caption,
            with_thumbnail: thumbnail.is_some(),
            bytes: item.size_bytes,
            started_at: op.started_at,
            finished_at: Utc::now(),
        })
    }

    async fn fetch(&self, plan: &Plan<'_>, op: &mut Operation) -> Result<PathBuf, PipelineError> {
        let item = plan.item;
        let limit = self.settings.max_file_size;
        if item.size_bytes > limit {
            return Err(FetchError::TooLarge {
                size: item.size_bytes,
                limit,
            }
            .into());
        }

        let work_dir = &self.settings.work_dir;
        tokio::fs::create_dir_all(work_dir)
            .await
            .map_err(|source| PipelineError::Io {
                path: work_dir.clone(),
                source,
            })?;

        let source_ext = get_extension(&item.file_name)
            .unwrap_or_else(|| plan.kind.default_extension().to_string());
        let path = op.working.acquire(ArtifactKind::Source, &source_ext);
        let progress = transfer_progress(op.id.clone(), "download");

        let after = self.settings.fetch_timeout;
        let bytes = tokio::time::timeout(
            after,
            self.services.transport.fetch(item, &path, progress),
        )
        .await
        .map_err(|_| FetchError::Timeout { after })?
        .map_err(FetchError::from)?;

        if bytes > limit {
            return Err(FetchError::TooLarge { size: bytes, limit }.into());
        }
        debug!(operation_id = %op.id, bytes, path = %path.display(), "Source fetched");
        Ok(path)
    }

    /// Chat thumbnail first, then (for video deliveries) the item's own
    async fn prepare_thumbnail(
        &self,
        plan: &Plan<'_>,
        op: &mut Operation,
    ) -> Result<Option<PathBuf>, ThumbnailError> {
        let stored = self
            .services
            .preferences
            .get_thumbnail(plan.item.chat_id)
            .await
            .map(ThumbnailRef::new);
        let embedded = (plan.kind == MediaKind::Video)
            .then(|| plan.item.thumbnail.clone())
            .flatten();
        let Some(reference) = stored.or(embedded) else {
            return Ok(None);
        };

        let path = op.working.acquire(ArtifactKind::Thumbnail, ".jpg");
        self.services
            .transport
            .fetch_thumbnail(&reference, &path)
            .await
            .map_err(|e| ThumbnailError::Fetch(e.to_string()))?;
        self.services.thumbnails.normalize(&path).await?;
        Ok(Some(path))
    }

    /// Deliver once, retrying a single time after a rate-limit signal
    async fn upload(&self, delivery: &Delivery<'_>, operation_id: &str) -> Result<(), UploadError> {
        let progress = transfer_progress(operation_id.to_string(), "upload");
        let retry_after = match self
            .services
            .transport
            .send(delivery, progress.clone())
            .await
        {
            Ok(()) => return Ok(()),
            Err(TransportError::RateLimited { retry_after }) => retry_after,
            Err(e) => return Err(UploadError::Transport(e)),
        };

        let wait = retry_after.min(self.settings.rate_limit_cap);
        warn!(
            operation_id = %operation_id,
            retry_after_secs = retry_after.as_secs(),
            wait_secs = wait.as_secs(),
            "Upload rate limited, retrying once"
        );
        tokio::time::sleep(wait).await;

        match self.services.transport.send(delivery, progress).await {
            Ok(()) => Ok(()),
            Err(TransportError::RateLimited { retry_after }) => {
                Err(UploadError::RateLimited { retry_after })
            }
            Err(e) => Err(UploadError::Transport(e)),
        }
    }

    fn transition(&self, op: &mut Operation, next: Stage) {
        op.advance(next);
        debug!(operation_id = %op.id, stage = %next, "Stage transition");
        self.publish(op);
    }

    fn publish(&self, op: &Operation) {
        // No subscribers is fine
        let _ = self.events.send(op.event());
    }
}

/// Logs transfer progress at every 10% step
fn transfer_progress(operation_id: String, phase: &'static str) -> ProgressCallback {
    let last_step = Arc::new(AtomicU64::new(0));
    Arc::new(move |done, total| {
        if total == 0 {
            return;
        }
        let step = done.saturating_mul(10) / total;
        if step > last_step.fetch_max(step, Ordering::Relaxed) {
            debug!(operation_id = %operation_id, phase, percent = step * 10, "Transfer progress");
        }
    })
}

