//! FFmpeg-based metadata embedding
//!
//! Rewrites container metadata (title, artist, author and per-stream titles)
//! with a stream copy; nothing is re-encoded. The invocation always finishes
//! with a [`ToolOutcome`]: the process exits, or it is killed at the deadline.

use std::ffi::OsString;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::preferences::MetadataFields;

/// Terminal result of one tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },
    TimedOut {
        after: Duration,
    },
}

impl ToolOutcome {
    fn from_status(status: ExitStatus, stderr: String) -> Self {
        if status.success() {
            ToolOutcome::Success
        } else {
            ToolOutcome::Failed {
                exit_code: status.code(),
                stderr,
            }
        }
    }
}

#[derive(Debug, Error)]
pub enum MuxError {
    #[error("failed to execute {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ffmpeg failed (exit code {}): {}", exit_code_label(.exit_code), stderr_label(.stderr))]
    Failed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("ffmpeg timed out after {}s and was killed", .after.as_secs())]
    Timeout { after: Duration },
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn stderr_label(stderr: &str) -> &str {
    if stderr.trim().is_empty() {
        "no error output"
    } else {
        stderr.trim()
    }
}

/// Embeds metadata into a media container
#[async_trait]
pub trait MetadataEmbedder: Send + Sync + 'static {
    async fn embed(
        &self,
        source: &Path,
        output: &Path,
        fields: &MetadataFields,
    ) -> Result<(), MuxError>;
}

pub struct FfmpegService {
    /// Path to ffmpeg executable
    ffmpeg_path: String,
    /// Hard wall-clock ceiling for one invocation
    timeout: Duration,
}

impl FfmpegService {
    pub fn new(ffmpeg_path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            timeout,
        }
    }

    /// Startup check; a missing binary is fatal for the whole process
    pub async fn ensure_available(&self) -> Result<()> {
        let status = Command::new(&self.ffmpeg_path)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to execute '{}'", self.ffmpeg_path))?;
        if !status.success() {
            anyhow::bail!(
                "'{}' -version exited with code {:?}",
                self.ffmpeg_path,
                status.code()
            );
        }
        info!(path = %self.ffmpeg_path, "ffmpeg available");
        Ok(())
    }

    /// Argument list for a metadata-only stream copy
    pub fn mux_args(source: &Path, output: &Path, fields: &MetadataFields) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-i".into(), source.into()];
        for (flag, value) in [
            ("-metadata", format!("title={}", fields.title)),
            ("-metadata", format!("artist={}", fields.artist)),
            ("-metadata", format!("author={}", fields.author)),
            ("-metadata:s:v", format!("title={}", fields.video_title)),
            ("-metadata:s:a", format!("title={}", fields.audio_title)),
            ("-metadata:s:s", format!("title={}", fields.subtitle)),
        ] {
            args.push(flag.into());
            args.push(value.into());
        }
        args.extend(
            ["-map", "0", "-c", "copy", "-loglevel", "error"]
                .into_iter()
                .map(OsString::from),
        );
        args.push(output.into());
        args
    }

    /// Run ffmpeg with the configured deadline. The child is killed when the
    /// deadline passes, and also when this future is dropped.
    pub async fn run_with_timeout(&self, args: &[OsString]) -> Result<ToolOutcome, MuxError> {
        let mut child = Command::new(&self.ffmpeg_path)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| MuxError::Spawn {
                program: self.ffmpeg_path.clone(),
                source,
            })?;

        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let _ = stderr.read_to_end(&mut buf).await;
                String::from_utf8_lossy(&buf).into_owned()
            })
        });

        match tokio::time::timeout(self.timeout, child.wait()).await {
            Ok(Ok(status)) => {
                let stderr = match stderr_task {
                    Some(task) => task.await.unwrap_or_default(),
                    None => String::new(),
                };
                Ok(ToolOutcome::from_status(status, stderr))
            }
            Ok(Err(source)) => Err(MuxError::Spawn {
                program: self.ffmpeg_path.clone(),
                source,
            }),
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed out ffmpeg");
                }
                if let Some(task) = stderr_task {
                    task.abort();
                }
                Ok(ToolOutcome::TimedOut {
                    after: self.timeout,
                })
            }
        }
    }
}

#[async_trait]
impl MetadataEmbedder for FfmpegService {
    async fn embed(
        &self,
        source: &Path,
        output: &Path,
        fields: &MetadataFields,
    ) -> Result<(), MuxError> {
        debug!(
            source = %source.display(),
            output = %output.display(),
            "Embedding metadata with ffmpeg"
        );

        let args = Self::mux_args(source, output, fields);
        match self.run_with_timeout(&args).await? {
            ToolOutcome::Success => Ok(()),
            ToolOutcome::Failed { exit_code, stderr } => Err(MuxError::Failed { exit_code, stderr }),
            ToolOutcome::TimedOut { after } => Err(MuxError::Timeout { after }),
        }
    }
}
