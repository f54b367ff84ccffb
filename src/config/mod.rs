//! Application configuration management

use std::env;
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    /// Scratch directory for per-operation working files
    pub work_dir: PathBuf,

    /// Where the local transport delivers renamed files
    pub output_dir: PathBuf,

    /// ffmpeg executable
    pub ffmpeg_path: String,

    /// Minimum seconds before the same source may be admitted again
    pub dedup_window_secs: u64,

    /// Hard ceiling for one ffmpeg invocation
    pub mux_timeout_secs: u64,

    pub fetch_timeout_secs: u64,

    /// Largest accepted source in bytes
    pub max_file_size: u64,

    /// Edge length of normalized thumbnails in pixels
    pub thumbnail_size: u32,

    /// Upper bound on a rate-limit backoff before the single retry
    pub rate_limit_cap_secs: u64,

    /// Whole-word keywords that mark a filename as unsafe
    pub blocked_keywords: Vec<String>,

    /// Emit JSON logs instead of human-readable ones
    pub json_logs: bool,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            work_dir: env::var("WORK_DIR")
                .unwrap_or_else(|_| "./data/work".to_string())
                .into(),

            output_dir: env::var("OUTPUT_DIR")
                .unwrap_or_else(|_| "./data/out".to_string())
                .into(),

            ffmpeg_path: env::var("FFMPEG_PATH").unwrap_or_else(|_| "ffmpeg".to_string()),

            dedup_window_secs: parse_var("DEDUP_WINDOW_SECS", 10)?,

            mux_timeout_secs: parse_var("MUX_TIMEOUT_SECS", 300)?,

            fetch_timeout_secs: parse_var("FETCH_TIMEOUT_SECS", 3600)?,

            max_file_size: parse_var("MAX_FILE_SIZE", 2_097_152_000)?,

            thumbnail_size: parse_var("THUMBNAIL_SIZE", 320)?,

            rate_limit_cap_secs: parse_var("RATE_LIMIT_CAP_SECS", 300)?,

            blocked_keywords: env::var("BLOCKED_KEYWORDS")
                .map(|v| parse_list(&v))
                .unwrap_or_default(),

            json_logs: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        })
    }
}

fn parse_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid {name}: {raw:?}")),
        Err(_) => Ok(default),
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
