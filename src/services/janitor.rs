//! Working-file lifetime management
//!
//! Every intermediate artifact of an operation is registered with a
//! [`WorkingSet`] before it is created. Paths leave the set either because a
//! later stage consumed them ([`WorkingSet::consume`]) or because they were
//! deleted by [`WorkingSet::cleanup`]. If the set is dropped with paths still
//! tracked (cancellation, panic) they are removed synchronously in `Drop`.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};

/// Role of a working file within an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Source,
    Muxed,
    Thumbnail,
}

impl ArtifactKind {
    fn suffix(&self) -> &'static str {
        match self {
            ArtifactKind::Source => "source",
            ArtifactKind::Muxed => "muxed",
            ArtifactKind::Thumbnail => "thumb",
        }
    }
}

#[derive(Debug)]
pub struct WorkingSet {
    dir: PathBuf,
    prefix: String,
    tracked: Vec<(ArtifactKind, PathBuf)>,
}

impl WorkingSet {
    /// `prefix` must be unique per operation; it namespaces every path
    pub fn new(dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            prefix: prefix.into(),
            tracked: Vec::new(),
        }
    }

    /// Register and return the path for an artifact. `extension` includes the
    /// leading dot. Registering the same kind twice returns the same path.
    pub fn acquire(&mut self, kind: ArtifactKind, extension: &str) -> PathBuf {
        if let Some(path) = self.path(kind) {
            return path.to_path_buf();
        }
        let path = self
            .dir
            .join(format!("{}.{}{}", self.prefix, kind.suffix(), extension));
        self.tracked.push((kind, path.clone()));
        path
    }

    pub fn path(&self, kind: ArtifactKind) -> Option<&Path> {
        self.tracked
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, p)| p.as_path())
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Delete one artifact now and stop tracking it
    pub async fn discard(&mut self, kind: ArtifactKind) {
        if let Some(index) = self.tracked.iter().position(|(k, _)| *k == kind) {
            let (_, path) = self.tracked.remove(index);
            remove_quietly(&path).await;
        }
    }

    /// Stop tracking an artifact that has been handed off and must not be
    /// deleted
    pub fn consume(&mut self, kind: ArtifactKind) -> Option<PathBuf> {
        let index = self.tracked.iter().position(|(k, _)| *k == kind)?;
        Some(self.tracked.remove(index).1)
    }

    /// Delete every tracked path. Missing files are not an error; any other
    /// failure is logged and swallowed.
    pub async fn cleanup(&mut self) {
        for (_, path) in std::mem::take(&mut self.tracked) {
            remove_quietly(&path).await;
        }
    }
}

impl Drop for WorkingSet {
    fn drop(&mut self) {
        for (_, path) in self.tracked.drain(..) {
            match std::fs::remove_file(&path) {
                Ok(()) => debug!(path = %path.display(), "Removed working file on drop"),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove working file"),
            }
        }
    }
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed working file"),
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove working file"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cleanup_removes_created_and_tolerates_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = WorkingSet::new(dir.path(), "op1");

        let source = set.acquire(ArtifactKind::Source, ".mkv");
        let muxed = set.acquire(ArtifactKind::Muxed, ".mkv");
        std::fs::write(&source, b"x").unwrap();
        // muxed is registered but never created

        assert_eq!(source, dir.path().join("op1.source.mkv"));
        set.cleanup().await;

        assert!(!source.exists());
        assert!(!muxed.exists());
        assert!(set.is_empty());
        // Second cleanup is a no-op
        set.cleanup().await;
    }

    #[tokio::test]
    async fn test_consumed_path_survives_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = WorkingSet::new(dir.path(), "op2");
        let muxed = set.acquire(ArtifactKind::Muxed, ".mp4");
        std::fs::write(&muxed, b"x").unwrap();

        assert_eq!(set.consume(ArtifactKind::Muxed), Some(muxed.clone()));
        set.cleanup().await;
        assert!(muxed.exists());
    }

    #[tokio::test]
    async fn test_discard_single_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut set = WorkingSet::new(dir.path(), "op3");
        let source = set.acquire(ArtifactKind::Source, ".mkv");
        let thumb = set.acquire(ArtifactKind::Thumbnail, ".jpg");
        std::fs::write(&source, b"x").unwrap();
        std::fs::write(&thumb, b"x").unwrap();

        set.discard(ArtifactKind::Source).await;
        assert!(!source.exists());
        assert!(thumb.exists());
        assert_eq!(set.path(ArtifactKind::Thumbnail), Some(thumb.as_path()));
    }

    #[test]
    fn test_drop_removes_remaining_paths() {
        let dir = tempfile::tempdir().unwrap();
        let thumb;
        {
            let mut set = WorkingSet::new(dir.path(), "op4");
            thumb = set.acquire(ArtifactKind::Thumbnail, ".jpg");
            std::fs::write(&thumb, b"x").unwrap();
        }
        assert!(!thumb.exists());
    }
}
