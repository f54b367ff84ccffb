//! autorename - rename media files from the metadata in their filenames
//!
//! Each file given on the command line becomes one pipeline operation,
//! delivered into the output directory through the local transport.

mod cli;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use autorename::config::Config;
use autorename::services::{
    FfmpegService, FilenameParser, KeywordContentFilter, LocalTransport, MemoryPreferenceStore,
    OperationGuard, Pipeline, PipelineError, PipelineServices, PipelineSettings, SourceItem,
    TemplateRenderer, ThumbnailProcessor,
};

use crate::cli::{CliOptions, kind_for_path};

/// The CLI acts as a single user in a single chat
const CLI_USER: i64 = 0;
const CLI_CHAT: i64 = 0;

fn init_tracing(json: bool) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "autorename=info".into()),
        )
        .with(json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json).then(|| tracing_subscriber::fmt::layer()))
        .init();
}

fn source_item(path: &Path) -> Result<SourceItem> {
    let canonical = path
        .canonicalize()
        .with_context(|| format!("Cannot open '{}'", path.display()))?;
    let size_bytes = std::fs::metadata(&canonical)
        .with_context(|| format!("Cannot stat '{}'", canonical.display()))?
        .len();
    let file_name = canonical
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .with_context(|| format!("'{}' has no file name", canonical.display()))?;

    Ok(SourceItem {
        source_key: canonical.to_string_lossy().into_owned(),
        user_id: CLI_USER,
        chat_id: CLI_CHAT,
        kind: kind_for_path(&canonical),
        file_name,
        size_bytes,
        thumbnail: None,
        duration_secs: None,
    })
}

fn preferences_from(options: &CliOptions) -> MemoryPreferenceStore {
    let preferences = MemoryPreferenceStore::new();
    if let Some(template) = &options.template {
        preferences.set_template(CLI_USER, template.clone());
    }
    if let Some(caption) = &options.caption {
        preferences.set_caption(CLI_CHAT, caption.clone());
    }
    if let Some(thumbnail) = &options.thumbnail {
        preferences.set_thumbnail(CLI_CHAT, thumbnail.to_string_lossy().into_owned());
    }
    if let Some(kind) = options.deliver_as {
        preferences.set_media_preference(CLI_USER, kind);
    }
    preferences.set_metadata_fields(CLI_USER, options.metadata_fields());
    preferences
}

#[tokio::main]
async fn main() -> Result<()> {
    let options = CliOptions::parse();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    init_tracing(config.json_logs);

    tracing::info!("Starting autorename");

    // Startup checks: any failure here stops the process
    let ffmpeg = FfmpegService::new(
        config.ffmpeg_path.clone(),
        Duration::from_secs(config.mux_timeout_secs),
    );
    ffmpeg
        .ensure_available()
        .await
        .context("ffmpeg is required for metadata embedding")?;
    let parser = FilenameParser::new().context("Invalid filename pattern")?;
    let renderer = TemplateRenderer::new().context("Invalid template pattern")?;
    let filter =
        KeywordContentFilter::new(&config.blocked_keywords).context("Invalid BLOCKED_KEYWORDS")?;

    let out_dir = options
        .out_dir
        .clone()
        .unwrap_or_else(|| config.output_dir.clone());

    let pipeline = Arc::new(Pipeline::new(
        PipelineSettings::from_config(&config),
        PipelineServices {
            parser: Arc::new(parser),
            renderer,
            guard: Arc::new(OperationGuard::new(Duration::from_secs(
                config.dedup_window_secs,
            ))),
            thumbnails: ThumbnailProcessor::new(config.thumbnail_size),
            embedder: Arc::new(ffmpeg),
            transport: Arc::new(LocalTransport::new(out_dir)),
            preferences: Arc::new(preferences_from(&options)),
            safety: Arc::new(filter),
        },
    ));

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, cancelling in-flight renames");
                cancel.cancel();
            }
        }
    });

    let mut failures = 0usize;
    let mut handles = Vec::new();
    for path in &options.files {
        let item = match source_item(path) {
            Ok(item) => item,
            Err(e) => {
                tracing::error!(error = %e, "Skipping file");
                failures += 1;
                continue;
            }
        };
        let pipeline = pipeline.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            let result = pipeline.process(&item, &cancel).await;
            (item, result)
        }));
    }

    for joined in futures::future::join_all(handles).await {
        let (item, result) = match joined {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Rename task panicked");
                failures += 1;
                continue;
            }
        };
        match result {
            Ok(report) if options.json => {
                println!("{}", serde_json::to_string(&report)?);
            }
            Ok(report) => println!("{} -> {}", item.file_name, report.file_name),
            Err(PipelineError::DuplicateSuppressed { source_key }) => {
                tracing::debug!(source_key = %source_key, "Duplicate file argument ignored");
            }
            Err(e) => {
                eprintln!("{}: {}", item.file_name, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} files failed", failures, options.files.len());
    }
    Ok(())
}
