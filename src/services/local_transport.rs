//! Filesystem-backed [`Transport`]: source keys and thumbnail references are
//! local paths, deliveries land in an outbox directory.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, info};

use super::transport::{Delivery, ProgressCallback, SourceItem, ThumbnailRef, Transport, TransportError};

const COPY_CHUNK: usize = 256 * 1024;

pub struct LocalTransport {
    outbox: PathBuf,
}

impl LocalTransport {
    pub fn new(outbox: impl Into<PathBuf>) -> Self {
        Self {
            outbox: outbox.into(),
        }
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TransportError + '_ {
    move |source| TransportError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Delivery written under a hidden temporary name. Removed on drop unless
/// [`persist`](Self::persist) moved it into place.
struct PartialFile {
    path: PathBuf,
    persisted: bool,
}

impl PartialFile {
    fn new(outbox: &Path, file_name: &str) -> Self {
        Self {
            path: outbox.join(format!(".{file_name}.partial")),
            persisted: false,
        }
    }

    async fn persist(mut self, target: &Path) -> Result<(), TransportError> {
        fs::rename(&self.path, target)
            .await
            .map_err(io_error(target))?;
        self.persisted = true;
        Ok(())
    }
}

impl Drop for PartialFile {
    fn drop(&mut self) {
        if !self.persisted {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Chunked copy that reports progress after every chunk
async fn copy_with_progress(
    from: &Path,
    to: &Path,
    progress: &ProgressCallback,
) -> Result<u64, TransportError> {
    let mut reader = fs::File::open(from).await.map_err(io_error(from))?;
    let total = reader.metadata().await.map_err(io_error(from))?.len();
    let mut writer = fs::File::create(to).await.map_err(io_error(to))?;

    let mut buf = vec![0u8; COPY_CHUNK];
    let mut done = 0u64;
    loop {
        let read = reader.read(&mut buf).await.map_err(io_error(from))?;
        if read == 0 {
            break;
        }
        writer.write_all(&buf[..read]).await.map_err(io_error(to))?;
        done += read as u64;
        progress(done, total);
    }
    writer.flush().await.map_err(io_error(to))?;
    Ok(done)
}

#[async_trait]
impl Transport for LocalTransport {
    async fn fetch(
        &self,
        item: &SourceItem,
        dest: &Path,
        progress: ProgressCallback,
    ) -> Result<u64, TransportError> {
        let source = Path::new(&item.source_key);
        debug!(source = %source.display(), dest = %dest.display(), "Fetching local source");
        copy_with_progress(source, dest, &progress).await
    }

    async fn fetch_thumbnail(
        &self,
        thumbnail: &ThumbnailRef,
        dest: &Path,
    ) -> Result<(), TransportError> {
        let source = Path::new(thumbnail.as_str());
        fs::copy(source, dest).await.map_err(io_error(source))?;
        Ok(())
    }

    async fn send(
        &self,
        delivery: &Delivery<'_>,
        progress: ProgressCallback,
    ) -> Result<(), TransportError> {
        fs::create_dir_all(&self.outbox)
            .await
            .map_err(io_error(&self.outbox))?;

        let target = self.outbox.join(delivery.file_name);
        let partial = PartialFile::new(&self.outbox, delivery.file_name);
        copy_with_progress(delivery.payload, &partial.path, &progress).await?;
        partial.persist(&target).await?;

        if let Some(thumbnail) = delivery.thumbnail {
            let thumb_target = target.with_extension("jpg");
            fs::copy(thumbnail, &thumb_target)
                .await
                .map_err(io_error(thumbnail))?;
        }

        info!(
            path = %target.display(),
            kind = %delivery.kind,
            caption = %delivery.caption,
            "Delivered renamed file"
        );
        Ok(())
    }
}
