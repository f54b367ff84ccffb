//! Integration tests for the rename pipeline
//!
//! These tests drive complete operations through `Pipeline::process` with
//! in-process collaborators and verify:
//! - Stage transitions (admitted -> ... -> done / failed)
//! - Cleanup of every working file on every exit path
//! - Dedup admission and release
//! - Upload retry, thumbnail degradation and cancellation

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use async_trait::async_trait;
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tempfile::TempDir;
use tokio::sync::{Notify, broadcast};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use autorename::services::ffmpeg::MuxError;
use autorename::services::pipeline::{FetchError, UploadError, ValidationError};
use autorename::services::{
    ContentSafety, Delivery, FilenameParser, MediaKind, MemoryPreferenceStore, MetadataEmbedder,
    MetadataFields, OperationGuard, Pipeline, PipelineError, PipelineServices, PipelineSettings,
    ProgressCallback, SafetyContext, SourceItem, Stage, StageEvent, TemplateRenderer,
    ThumbnailProcessor, ThumbnailRef, Transport, TransportError,
};

const NARUTO: &str = "Naruto Shippuden S01 - EP07 - 1080p [Dual Audio].mkv";
const TEMPLATE: &str = "{season}x{episode} [{quality}]";
const USER: i64 = 7;
const CHAT: i64 = -100;

// ============================================================================
// Collaborators
// ============================================================================

#[derive(Debug, Clone)]
struct SentRecord {
    file_name: String,
    caption: String,
    kind: MediaKind,
    payload: Vec<u8>,
    thumbnail_dims: Option<(u32, u32)>,
}

struct MockTransport {
    payload: Vec<u8>,
    fail_fetch: bool,
    gate: Option<Arc<Notify>>,
    fetch_started: Notify,
    fetches: AtomicUsize,
    thumbnail_fetches: AtomicUsize,
    send_script: Mutex<VecDeque<Result<(), TransportError>>>,
    sent: Mutex<Vec<SentRecord>>,
    send_attempts: AtomicUsize,
}

impl MockTransport {
    fn new() -> Self {
        Self {
            payload: b"container bytes".to_vec(),
            fail_fetch: false,
            gate: None,
            fetch_started: Notify::new(),
            fetches: AtomicUsize::new(0),
            thumbnail_fetches: AtomicUsize::new(0),
            send_script: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
        }
    }

    /// Fetch blocks until the gate is notified
    fn gated(mut self, gate: Arc<Notify>) -> Self {
        self.gate = Some(gate);
        self
    }

    fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    /// Responses for successive sends; once exhausted, sends succeed
    fn with_sends(self, responses: Vec<Result<(), TransportError>>) -> Self {
        *self.send_script.lock() = responses.into();
        self
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    fn send_attempts(&self) -> usize {
        self.send_attempts.load(Ordering::SeqCst)
    }

    fn sent(&self) -> Vec<SentRecord> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch(
        &self,
        _item: &SourceItem,
        dest: &Path,
        progress: ProgressCallback,
    ) -> Result<u64, TransportError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetch_started.notify_one();
        if let Some(gate) = &self.gate {
            // A stalled download has already written part of the file
            tokio::fs::write(dest, b"partial").await.ok();
            gate.notified().await;
        }
        if self.fail_fetch {
            return Err(TransportError::Failed("connection reset".into()));
        }
        tokio::fs::write(dest, &self.payload)
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        let len = self.payload.len() as u64;
        progress(len, len);
        Ok(len)
    }

    async fn fetch_thumbnail(
        &self,
        thumbnail: &ThumbnailRef,
        dest: &Path,
    ) -> Result<(), TransportError> {
        self.thumbnail_fetches.fetch_add(1, Ordering::SeqCst);
        tokio::fs::copy(thumbnail.as_str(), dest)
            .await
            .map(|_| ())
            .map_err(|e| TransportError::Failed(e.to_string()))
    }

    async fn send(
        &self,
        delivery: &Delivery<'_>,
        _progress: ProgressCallback,
    ) -> Result<(), TransportError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let scripted = self.send_script.lock().pop_front();
        if let Some(Err(e)) = scripted {
            return Err(e);
        }
        let payload = tokio::fs::read(delivery.payload)
            .await
            .map_err(|e| TransportError::Failed(e.to_string()))?;
        let thumbnail_dims = delivery
            .thumbnail
            .map(|path| image::image_dimensions(path).expect("thumbnail readable at send time"));
        self.sent.lock().push(SentRecord {
            file_name: delivery.file_name.to_string(),
            caption: delivery.caption.to_string(),
            kind: delivery.kind,
            payload,
            thumbnail_dims,
        });
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
enum EmbedBehavior {
    Copy,
    Fail,
    Hang,
}

struct StubEmbedder {
    behavior: EmbedBehavior,
    started: Notify,
    seen: Mutex<Option<MetadataFields>>,
}

impl StubEmbedder {
    fn new(behavior: EmbedBehavior) -> Self {
        Self {
            behavior,
            started: Notify::new(),
            seen: Mutex::new(None),
        }
    }
}

#[async_trait]
impl MetadataEmbedder for StubEmbedder {
    async fn embed(
        &self,
        source: &Path,
        output: &Path,
        fields: &MetadataFields,
    ) -> Result<(), MuxError> {
        *self.seen.lock() = Some(fields.clone());
        self.started.notify_one();
        match self.behavior {
            EmbedBehavior::Copy => {
                tokio::fs::copy(source, output)
                    .await
                    .map_err(|source| MuxError::Spawn {
                        program: "stub".into(),
                        source,
                    })?;
                Ok(())
            }
            EmbedBehavior::Fail => {
                // A partial output is left behind, as a crashing tool would
                tokio::fs::write(output, b"partial").await.ok();
                Err(MuxError::Failed {
                    exit_code: Some(1),
                    stderr: "Invalid data found when processing input".into(),
                })
            }
            EmbedBehavior::Hang => {
                tokio::fs::write(output, b"partial").await.ok();
                std::future::pending::<()>().await;
                Ok(())
            }
        }
    }
}

struct StaticSafety(bool);

#[async_trait]
impl ContentSafety for StaticSafety {
    async fn is_unsafe(&self, _filename: &str, _ctx: &SafetyContext) -> bool {
        self.0
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    pipeline: Arc<Pipeline>,
    transport: Arc<MockTransport>,
    embedder: Arc<StubEmbedder>,
    preferences: Arc<MemoryPreferenceStore>,
    work_dir: PathBuf,
    _root: TempDir,
}

struct HarnessBuilder {
    transport: MockTransport,
    embedder: Option<Arc<dyn MetadataEmbedder>>,
    behavior: EmbedBehavior,
    unsafe_content: bool,
    max_file_size: u64,
    fetch_timeout: Duration,
}

impl HarnessBuilder {
    fn new() -> Self {
        Self {
            transport: MockTransport::new(),
            embedder: None,
            behavior: EmbedBehavior::Copy,
            unsafe_content: false,
            max_file_size: 1 << 30,
            fetch_timeout: Duration::from_secs(5),
        }
    }

    fn transport(mut self, transport: MockTransport) -> Self {
        self.transport = transport;
        self
    }

    fn embed(mut self, behavior: EmbedBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    fn embedder(mut self, embedder: Arc<dyn MetadataEmbedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    fn unsafe_content(mut self) -> Self {
        self.unsafe_content = true;
        self
    }

    fn max_file_size(mut self, limit: u64) -> Self {
        self.max_file_size = limit;
        self
    }

    fn fetch_timeout(mut self, after: Duration) -> Self {
        self.fetch_timeout = after;
        self
    }

    fn build(self) -> Harness {
        let root = tempfile::tempdir().unwrap();
        let work_dir = root.path().join("work");

        let transport = Arc::new(self.transport);
        let stub = Arc::new(StubEmbedder::new(self.behavior));
        let embedder: Arc<dyn MetadataEmbedder> = match self.embedder {
            Some(embedder) => embedder,
            None => stub.clone(),
        };
        let preferences = Arc::new(MemoryPreferenceStore::new());
        preferences.set_template(USER, TEMPLATE);

        let pipeline = Pipeline::new(
            PipelineSettings {
                work_dir: work_dir.clone(),
                max_file_size: self.max_file_size,
                fetch_timeout: self.fetch_timeout,
                rate_limit_cap: Duration::from_millis(20),
            },
            PipelineServices {
                parser: Arc::new(FilenameParser::new().unwrap()),
                renderer: TemplateRenderer::new().unwrap(),
                guard: Arc::new(OperationGuard::new(Duration::from_secs(10))),
                thumbnails: ThumbnailProcessor::new(320),
                embedder,
                transport: transport.clone(),
                preferences: preferences.clone(),
                safety: Arc::new(StaticSafety(self.unsafe_content)),
            },
        );

        Harness {
            pipeline: Arc::new(pipeline),
            transport,
            embedder: stub,
            preferences,
            work_dir,
            _root: root,
        }
    }
}

fn harness() -> Harness {
    HarnessBuilder::new().build()
}

fn item(file_name: &str) -> SourceItem {
    SourceItem {
        source_key: format!("{CHAT}/{file_name}"),
        user_id: USER,
        chat_id: CHAT,
        file_name: file_name.to_string(),
        size_bytes: 1024,
        kind: MediaKind::Document,
        thumbnail: None,
        duration_secs: None,
    }
}

/// Files left in the working directory (none if it was never created)
fn leftovers(dir: &Path) -> Vec<PathBuf> {
    match std::fs::read_dir(dir) {
        Ok(entries) => entries.map(|e| e.unwrap().path()).collect(),
        Err(_) => Vec::new(),
    }
}

fn stages(rx: &mut broadcast::Receiver<StageEvent>) -> Vec<Stage> {
    let mut stages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        stages.push(event.stage);
    }
    stages
}

// ============================================================================
// Success path
// ============================================================================

#[tokio::test]
async fn test_end_to_end_rename() {
    let h = harness();
    let mut events = h.pipeline.subscribe();

    let report = h
        .pipeline
        .process(&item(NARUTO), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.file_name, "01x07 [1080p].mkv");
    assert_eq!(report.caption, "**01x07 [1080p].mkv**");
    assert_eq!(report.kind, MediaKind::Document);
    assert!(!report.with_thumbnail);

    assert_eq!(
        stages(&mut events),
        vec![
            Stage::Admitted,
            Stage::Fetching,
            Stage::Muxing,
            Stage::ThumbProcessing,
            Stage::Emitting,
            Stage::Done,
        ]
    );

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].file_name, "01x07 [1080p].mkv");
    assert_eq!(sent[0].payload, b"container bytes");

    assert!(leftovers(&h.work_dir).is_empty());
    assert!(!h.pipeline.guard().is_tracked(&item(NARUTO).source_key));
}

#[tokio::test]
async fn test_metadata_fields_come_from_preferences() {
    let h = harness();
    let fields = MetadataFields {
        title: "Naruto".into(),
        audio_title: "Japanese".into(),
        ..Default::default()
    };
    h.preferences.set_metadata_fields(USER, fields.clone());

    h.pipeline
        .process(&item(NARUTO), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(h.embedder.seen.lock().clone(), Some(fields));
}

#[tokio::test]
async fn test_caption_template() {
    let h = harness();
    h.preferences.set_caption(CHAT, "{filename} ({filesize})");

    let report = h
        .pipeline
        .process(&item(NARUTO), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.caption, "01x07 [1080p].mkv (1.0 KB)");
    assert_eq!(h.transport.sent()[0].caption, report.caption);
}

#[tokio::test]
async fn test_media_preference_overrides_kind_and_default_extension() {
    let h = harness();
    h.preferences.set_media_preference(USER, MediaKind::Video);

    let report = h
        .pipeline
        .process(&item("Show S02E03 720p"), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.file_name, "02x03 [720p].mp4");
    assert_eq!(report.kind, MediaKind::Video);
    assert_eq!(h.transport.sent()[0].kind, MediaKind::Video);
}

// ============================================================================
// Rejections
// ============================================================================

#[tokio::test]
async fn test_unknown_quality_rejected_before_fetch() {
    let h = harness();
    let mut events = h.pipeline.subscribe();
    let item = item("Family Holiday 2019.mkv");

    let result = h.pipeline.process(&item, &CancellationToken::new()).await;

    assert_matches!(
        result,
        Err(PipelineError::Validation(ValidationError::UnknownQuality { .. }))
    );
    assert_eq!(h.transport.fetches(), 0);
    assert!(!h.work_dir.exists());
    assert!(stages(&mut events).is_empty());
    assert!(!h.pipeline.guard().is_tracked(&item.source_key));
}

#[tokio::test]
async fn test_missing_template_rejected() {
    let h = harness();
    let mut item = item(NARUTO);
    item.user_id = USER + 1;

    let result = h.pipeline.process(&item, &CancellationToken::new()).await;

    assert_matches!(
        result,
        Err(PipelineError::Validation(ValidationError::MissingTemplate))
    );
    assert_eq!(h.transport.fetches(), 0);
}

#[tokio::test]
async fn test_unsafe_content_short_circuits_before_admission() {
    let h = HarnessBuilder::new().unsafe_content().build();
    let item = item(NARUTO);

    let result = h.pipeline.process(&item, &CancellationToken::new()).await;

    assert_matches!(result, Err(PipelineError::UnsafeContent));
    assert!(result.unwrap_err().is_rejection());
    assert_eq!(h.pipeline.guard().tracked_count(), 0);
    assert_eq!(h.transport.fetches(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_duplicate_suppressed_while_in_flight() {
    let gate = Arc::new(Notify::new());
    let h = HarnessBuilder::new()
        .transport(MockTransport::new().gated(gate.clone()))
        .build();

    let first = {
        let pipeline = h.pipeline.clone();
        tokio::spawn(async move {
            pipeline
                .process(&item(NARUTO), &CancellationToken::new())
                .await
        })
    };
    h.transport.fetch_started.notified().await;

    let second = h
        .pipeline
        .process(&item(NARUTO), &CancellationToken::new())
        .await;
    assert_matches!(
        second,
        Err(PipelineError::DuplicateSuppressed { source_key }) if source_key == item(NARUTO).source_key
    );

    gate.notify_one();
    assert!(first.await.unwrap().is_ok());
    assert_eq!(h.transport.fetches(), 1);
    assert!(!h.pipeline.guard().is_tracked(&item(NARUTO).source_key));

    // Released on completion, so the same source is accepted again
    gate.notify_one();
    assert!(
        h.pipeline
            .process(&item(NARUTO), &CancellationToken::new())
            .await
            .is_ok()
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_triggers_single_operation() {
    let gate = Arc::new(Notify::new());
    let h = HarnessBuilder::new()
        .transport(MockTransport::new().gated(gate.clone()))
        .build();

    let mut tasks = JoinSet::new();
    for _ in 0..8 {
        let pipeline = h.pipeline.clone();
        tasks.spawn(async move {
            pipeline
                .process(&item(NARUTO), &CancellationToken::new())
                .await
        });
    }

    // The admitted operation is parked in fetch, so every other trigger
    // must come back suppressed before the gate opens
    h.transport.fetch_started.notified().await;
    let mut suppressed = 0;
    while suppressed < 7 {
        match tasks.join_next().await.unwrap().unwrap() {
            Err(PipelineError::DuplicateSuppressed { .. }) => suppressed += 1,
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    gate.notify_one();
    let mut succeeded = 0;
    while let Some(joined) = tasks.join_next().await {
        assert!(joined.unwrap().is_ok());
        succeeded += 1;
    }
    assert_eq!(succeeded, 1);
    assert_eq!(h.transport.fetches(), 1);
}

// ============================================================================
// Stage failures
// ============================================================================

#[tokio::test]
async fn test_mux_failure_cleans_up_and_releases() {
    let h = HarnessBuilder::new().embed(EmbedBehavior::Fail).build();
    let mut events = h.pipeline.subscribe();
    let item = item(NARUTO);

    let result = h.pipeline.process(&item, &CancellationToken::new()).await;

    assert_matches!(result, Err(PipelineError::Mux(MuxError::Failed { exit_code: Some(1), .. })));
    assert_eq!(stages(&mut events).last(), Some(&Stage::Failed));
    assert!(leftovers(&h.work_dir).is_empty());
    assert!(!h.pipeline.guard().is_tracked(&item.source_key));
    assert_eq!(h.transport.send_attempts(), 0);
}

#[tokio::test]
async fn test_fetch_failure() {
    let h = HarnessBuilder::new()
        .transport(MockTransport::new().failing_fetch())
        .build();
    let item = item(NARUTO);

    let result = h.pipeline.process(&item, &CancellationToken::new()).await;

    assert_matches!(result, Err(PipelineError::Fetch(FetchError::Transport(_))));
    assert!(leftovers(&h.work_dir).is_empty());
    assert!(!h.pipeline.guard().is_tracked(&item.source_key));
}

#[tokio::test]
async fn test_stalled_fetch_times_out() {
    let gate = Arc::new(Notify::new());
    let h = HarnessBuilder::new()
        .transport(MockTransport::new().gated(gate))
        .fetch_timeout(Duration::from_millis(50))
        .build();
    let item = item(NARUTO);
    let mut events = h.pipeline.subscribe();

    let result = h.pipeline.process(&item, &CancellationToken::new()).await;

    assert_matches!(
        result,
        Err(PipelineError::Fetch(FetchError::Timeout { after })) if after == Duration::from_millis(50)
    );
    assert_eq!(h.transport.fetches(), 1);
    assert_eq!(stages(&mut events).last(), Some(&Stage::Failed));
    assert!(leftovers(&h.work_dir).is_empty());
    assert!(!h.pipeline.guard().is_tracked(&item.source_key));
    assert!(h.transport.sent().is_empty());
}

#[tokio::test]
async fn test_oversized_source_fails_without_fetching() {
    let h = HarnessBuilder::new().max_file_size(512).build();

    let result = h
        .pipeline
        .process(&item(NARUTO), &CancellationToken::new())
        .await;

    assert_matches!(
        result,
        Err(PipelineError::Fetch(FetchError::TooLarge { size: 1024, limit: 512 }))
    );
    assert_eq!(h.transport.fetches(), 0);
}

#[tokio::test]
async fn test_rate_limited_upload_retried_once() {
    let h = HarnessBuilder::new()
        .transport(MockTransport::new().with_sends(vec![Err(TransportError::RateLimited {
            retry_after: Duration::from_secs(3600),
        })]))
        .build();

    let started = Instant::now();
    let result = h
        .pipeline
        .process(&item(NARUTO), &CancellationToken::new())
        .await;

    assert!(result.is_ok());
    assert_eq!(h.transport.send_attempts(), 2);
    assert_eq!(h.transport.sent().len(), 1);
    // Backoff is capped well below the signaled hour
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn test_rate_limited_twice_fails_upload() {
    let limited = || TransportError::RateLimited {
        retry_after: Duration::from_millis(1),
    };
    let h = HarnessBuilder::new()
        .transport(MockTransport::new().with_sends(vec![Err(limited()), Err(limited())]))
        .build();
    let item = item(NARUTO);

    let result = h.pipeline.process(&item, &CancellationToken::new()).await;

    assert_matches!(result, Err(PipelineError::Upload(UploadError::RateLimited { .. })));
    assert_eq!(h.transport.send_attempts(), 2);
    assert!(leftovers(&h.work_dir).is_empty());
    assert!(!h.pipeline.guard().is_tracked(&item.source_key));
}

#[tokio::test]
async fn test_upload_error_not_retried() {
    let h = HarnessBuilder::new()
        .transport(
            MockTransport::new().with_sends(vec![Err(TransportError::Failed("chat not found".into()))]),
        )
        .build();

    let result = h
        .pipeline
        .process(&item(NARUTO), &CancellationToken::new())
        .await;

    assert_matches!(result, Err(PipelineError::Upload(UploadError::Transport(_))));
    assert_eq!(h.transport.send_attempts(), 1);
    assert!(leftovers(&h.work_dir).is_empty());
}

// ============================================================================
// Thumbnails
// ============================================================================

#[tokio::test]
async fn test_chat_thumbnail_normalized_and_delivered() {
    let h = harness();
    let thumb_dir = tempfile::tempdir().unwrap();
    let source = thumb_dir.path().join("cover.png");
    image::RgbImage::from_pixel(40, 20, image::Rgb([0, 120, 255]))
        .save(&source)
        .unwrap();
    h.preferences
        .set_thumbnail(CHAT, source.to_string_lossy().into_owned());

    let report = h
        .pipeline
        .process(&item(NARUTO), &CancellationToken::new())
        .await
        .unwrap();

    assert!(report.with_thumbnail);
    assert_eq!(h.transport.sent()[0].thumbnail_dims, Some((320, 320)));
    assert!(leftovers(&h.work_dir).is_empty());
}

#[tokio::test]
async fn test_broken_thumbnail_is_not_fatal() {
    let h = harness();
    let thumb_dir = tempfile::tempdir().unwrap();
    let source = thumb_dir.path().join("cover.jpg");
    std::fs::write(&source, b"not an image").unwrap();
    h.preferences
        .set_thumbnail(CHAT, source.to_string_lossy().into_owned());

    let report = h
        .pipeline
        .process(&item(NARUTO), &CancellationToken::new())
        .await
        .unwrap();

    assert!(!report.with_thumbnail);
    assert_eq!(h.transport.sent()[0].thumbnail_dims, None);
    assert!(leftovers(&h.work_dir).is_empty());
}

#[tokio::test]
async fn test_embedded_thumbnail_only_used_for_video() {
    let h = harness();
    let thumb_dir = tempfile::tempdir().unwrap();
    let source = thumb_dir.path().join("embedded.png");
    image::RgbImage::from_pixel(8, 8, image::Rgb([1, 2, 3]))
        .save(&source)
        .unwrap();

    let mut document = item(NARUTO);
    document.thumbnail = Some(ThumbnailRef::new(source.to_string_lossy()));
    let report = h
        .pipeline
        .process(&document, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!report.with_thumbnail);
    assert_eq!(h.transport.thumbnail_fetches.load(Ordering::SeqCst), 0);

    let mut video = item("Show S01E02 720p.mp4");
    video.kind = MediaKind::Video;
    video.thumbnail = Some(ThumbnailRef::new(source.to_string_lossy()));
    let report = h
        .pipeline
        .process(&video, &CancellationToken::new())
        .await
        .unwrap();
    assert!(report.with_thumbnail);
}

// ============================================================================
// Cancellation
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancellation_mid_mux_cleans_up_and_releases() {
    let h = HarnessBuilder::new().embed(EmbedBehavior::Hang).build();
    let mut events = h.pipeline.subscribe();
    let cancel = CancellationToken::new();

    let task = {
        let pipeline = h.pipeline.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { pipeline.process(&item(NARUTO), &cancel).await })
    };

    h.embedder.started.notified().await;
    cancel.cancel();

    let result = task.await.unwrap();
    assert_matches!(result, Err(PipelineError::Cancelled));
    assert_eq!(stages(&mut events).last(), Some(&Stage::Failed));
    assert!(leftovers(&h.work_dir).is_empty());
    assert!(!h.pipeline.guard().is_tracked(&item(NARUTO).source_key));
}

// ============================================================================
// Real subprocess
// ============================================================================

#[cfg(unix)]
mod subprocess {
    use std::os::unix::fs::PermissionsExt;

    use autorename::services::FfmpegService;

    use super::*;

    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[tokio::test]
    async fn test_tool_nonzero_exit_is_mux_error() {
        let bin = tempfile::tempdir().unwrap();
        let tool = fake_ffmpeg(bin.path(), "echo 'moov atom not found' >&2; exit 1");
        let h = HarnessBuilder::new()
            .embedder(Arc::new(FfmpegService::new(
                tool.to_string_lossy(),
                Duration::from_secs(10),
            )))
            .build();
        let item = item(NARUTO);

        let result = h.pipeline.process(&item, &CancellationToken::new()).await;

        assert_matches!(
            result,
            Err(PipelineError::Mux(MuxError::Failed { exit_code: Some(1), ref stderr })) if stderr.contains("moov atom")
        );
        assert!(leftovers(&h.work_dir).is_empty());
        assert!(!h.pipeline.guard().is_tracked(&item.source_key));
    }

    #[tokio::test]
    async fn test_tool_timeout_is_mux_error() {
        let bin = tempfile::tempdir().unwrap();
        let tool = fake_ffmpeg(bin.path(), "exec sleep 30");
        let h = HarnessBuilder::new()
            .embedder(Arc::new(FfmpegService::new(
                tool.to_string_lossy(),
                Duration::from_millis(200),
            )))
            .build();

        let result = h
            .pipeline
            .process(&item(NARUTO), &CancellationToken::new())
            .await;

        assert_matches!(result, Err(PipelineError::Mux(MuxError::Timeout { .. })));
        assert!(leftovers(&h.work_dir).is_empty());
    }
}
