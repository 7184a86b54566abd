use std::{
    io,
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};
use thiserror::Error;
use tokio::{fs, io::AsyncWriteExt};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to create scratch directory {path:?}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },
    #[error("Failed to write frame {path:?}: {source}")]
    Write { path: PathBuf, source: io::Error },
}

/// Writes decoded frames into a scratch directory, one uniquely named file
/// per pipeline invocation.
#[derive(Debug)]
pub struct FrameStore {
    dir: PathBuf,
    sequence: AtomicU64,
}

impl FrameStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            sequence: AtomicU64::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn next_file_name(&self) -> String {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);

        format!(
            "frame-{}-{}-{}-{:08x}.jpg",
            millis,
            std::process::id(),
            sequence,
            rand::random::<u32>()
        )
    }

    pub async fn create(&self, bytes: &[u8]) -> Result<FrameRef, StorageError> {
        fs::create_dir_all(&self.dir)
            .await
            .map_err(|source| StorageError::CreateDir {
                path: self.dir.clone(),
                source,
            })?;

        let path = self.dir.join(self.next_file_name());
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|source| StorageError::Write {
                path: path.clone(),
                source,
            })?;

        // From here on the file exists, so the reference owns it even if the
        // write fails.
        let frame = FrameRef::new(path);

        let written = async {
            file.write_all(bytes).await?;
            file.flush().await
        }
        .await;
        drop(file);

        let frame = self.finish_write(frame, written).await?;
        tracing::debug!(path = ?frame.path(), size = bytes.len(), "Frame stored");
        Ok(frame)
    }

    /// A failed write leaves no partial file behind.
    async fn finish_write(
        &self,
        frame: FrameRef,
        written: io::Result<()>,
    ) -> Result<FrameRef, StorageError> {
        match written {
            Ok(()) => Ok(frame),
            Err(source) => {
                let path = frame.path().to_path_buf();
                self.delete(frame).await;
                Err(StorageError::Write { path, source })
            }
        }
    }

    /// Removes the frame file. Failures are logged and never propagated.
    pub async fn delete(&self, mut frame: FrameRef) {
        let Some(path) = frame.path.take() else {
            return;
        };

        match fs::remove_file(&path).await {
            Ok(()) => tracing::debug!(path = ?path, "Frame deleted"),
            Err(e) => tracing::warn!(path = ?path, "Failed to delete frame: {}", e),
        }
    }
}

/// Exclusive handle to one transient frame file.
///
/// The file is removed exactly once: by [`FrameStore::delete`], or on drop
/// when the owning invocation never got that far (cancellation).
#[derive(Debug)]
pub struct FrameRef {
    path: Option<PathBuf>,
}

impl FrameRef {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    pub fn path(&self) -> &Path {
        self.path.as_deref().unwrap_or_else(|| Path::new(""))
    }
}

impl Drop for FrameRef {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                if e.kind() != io::ErrorKind::NotFound {
                    tracing::warn!(path = ?path, "Failed to delete abandoned frame: {}", e);
                }
            } else {
                tracing::debug!(path = ?path, "Abandoned frame deleted");
            }
        }
    }
}
