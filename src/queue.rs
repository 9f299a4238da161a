//! File-backed queue of staged items.
//!
//! The store owns its in-memory copy of the document while loaded. Every
//! mutation saves immediately, and a save clears the loaded flag so the next
//! operation re-reads the file.

use crate::model::{QueueDocument, QueueItem};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to write queue file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize queue: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("queue index {index} out of range (len {len})")]
    OutOfRange { index: usize, len: usize },
}

#[derive(Debug)]
pub struct QueueStore {
    file: PathBuf,
    media_dir: PathBuf,
    doc: QueueDocument,
    loaded: bool,
}

impl QueueStore {
    pub fn new(file: impl Into<PathBuf>, media_dir: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            media_dir: media_dir.into(),
            doc: QueueDocument::default(),
            loaded: false,
        }
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn media_dir(&self) -> &Path {
        &self.media_dir
    }

    /// Location of a queued item's media on disk.
    pub fn media_path(&self, name: &str) -> PathBuf {
        self.media_dir.join(name)
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Items as of the last load or mutation.
    pub fn items(&self) -> &[QueueItem] {
        &self.doc.queue
    }

    pub fn len(&self) -> usize {
        self.doc.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.queue.is_empty()
    }

    /// Read the document unless already loaded. A missing or unreadable file
    /// is replaced by an empty document.
    pub async fn load(&mut self) -> Result<(), QueueError> {
        if self.loaded {
            debug!("queue already loaded");
            return Ok(());
        }
        match read_document(&self.file).await {
            Ok(doc) => {
                debug!(path = %self.file.display(), items = doc.queue.len(), "loaded queue");
                self.doc = doc;
            }
            Err(err) => {
                warn!(path = %self.file.display(), %err, "queue file missing or corrupted; recreating");
                self.doc = QueueDocument::default();
                write_document(&self.file, &self.doc).await?;
                info!(path = %self.file.display(), "created new queue file");
            }
        }
        self.loaded = true;
        Ok(())
    }

    /// Persist the in-memory document and clear the loaded flag.
    pub async fn save(&mut self) -> Result<(), QueueError> {
        write_document(&self.file, &self.doc).await?;
        debug!(path = %self.file.display(), items = self.doc.queue.len(), "saved queue");
        self.loaded = false;
        Ok(())
    }

    pub async fn contains(&mut self, path: &str) -> Result<bool, QueueError> {
        self.load().await?;
        Ok(self.position(path).is_some())
    }

    pub fn position(&self, path: &str) -> Option<usize> {
        self.doc.queue.iter().position(|item| item.path == path)
    }

    /// Append unless an entry with the same `path` exists. Returns whether an
    /// insertion happened.
    pub async fn append(&mut self, item: QueueItem) -> Result<bool, QueueError> {
        if self.contains(&item.path).await? {
            return Ok(false);
        }
        self.doc.queue.push(item);
        self.save().await?;
        Ok(true)
    }

    pub async fn remove_at(&mut self, index: usize) -> Result<QueueItem, QueueError> {
        self.load().await?;
        let len = self.doc.queue.len();
        if index >= len {
            return Err(QueueError::OutOfRange { index, len });
        }
        let item = self.doc.queue.remove(index);
        self.save().await?;
        info!(remaining = self.doc.queue.len(), "queued items remaining");
        Ok(item)
    }
}

/// Read a queue document without creating or rewriting the file.
pub async fn read_document(path: &Path) -> anyhow::Result<QueueDocument> {
    let raw = tokio::fs::read(path).await?;
    Ok(serde_json::from_slice(&raw)?)
}

/// Write via a sibling temp file and rename so a crash never leaves a
/// half-written queue behind.
async fn write_document(path: &Path, doc: &QueueDocument) -> Result<(), QueueError> {
    let body = serde_json::to_vec_pretty(doc)?;
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    let write_err = |source| QueueError::Write {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(write_err)?;
    }
    tokio::fs::write(&tmp, &body).await.map_err(write_err)?;
    if let Err(source) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(write_err(source));
    }
    Ok(())
}
