//! Command-line arguments

use std::path::PathBuf;

use clap::Parser;

use autorename::services::{MediaKind, MetadataFields};

#[derive(Debug, Parser)]
#[command(name = "autorename", version, about = "Rename media files from their filenames")]
pub struct CliOptions {
    /// Rename template, e.g. "{season}x{episode} [{quality}]"
    #[arg(short, long, env = "RENAME_TEMPLATE")]
    pub template: Option<String>,

    /// Caption template ({filename}, {filesize}, {duration})
    #[arg(long)]
    pub caption: Option<String>,

    /// Custom thumbnail image
    #[arg(long)]
    pub thumbnail: Option<PathBuf>,

    /// Deliver as document, video or audio instead of guessing
    #[arg(long = "as", value_name = "KIND", value_parser = parse_kind)]
    pub deliver_as: Option<MediaKind>,

    /// Output directory (overrides OUTPUT_DIR)
    #[arg(short, long)]
    pub out_dir: Option<PathBuf>,

    #[arg(long, default_value = "")]
    pub title: String,

    #[arg(long, default_value = "")]
    pub artist: String,

    #[arg(long, default_value = "")]
    pub author: String,

    #[arg(long, default_value = "")]
    pub video_title: String,

    #[arg(long, default_value = "")]
    pub audio_title: String,

    #[arg(long, default_value = "")]
    pub subtitle: String,

    /// Print one JSON report per file
    #[arg(long)]
    pub json: bool,

    /// Files to rename
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
}

impl CliOptions {
    pub fn metadata_fields(&self) -> MetadataFields {
        MetadataFields {
            title: self.title.clone(),
            artist: self.artist.clone(),
            author: self.author.clone(),
            video_title: self.video_title.clone(),
            audio_title: self.audio_title.clone(),
            subtitle: self.subtitle.clone(),
        }
    }
}

fn parse_kind(value: &str) -> Result<MediaKind, String> {
    value.parse().map_err(|e: autorename::services::pipeline::ValidationError| e.to_string())
}

/// Guess the inbound kind from the file extension
pub fn kind_for_path(path: &std::path::Path) -> MediaKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "mp4" | "mov" | "webm" | "m4v" => MediaKind::Video,
        "mp3" | "m4a" | "flac" | "ogg" | "opus" | "wav" => MediaKind::Audio,
        _ => MediaKind::Document,
    }
}
