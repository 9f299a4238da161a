//! Publish pipeline: pick one queued item, prepare its media and deliver it.

use rand::Rng;
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, instrument, warn};

use crate::caption::{build_buttons, render_caption, LinkChecker};
use crate::media::{self, MediaLimits, PreparedMedia};
use crate::model::QueueItem;
use crate::queue::{QueueError, QueueStore};
use crate::retry::{deliver, Delivery, RetryPolicy};
use crate::telegram::{notify_admins, Channel, MediaFile, MediaRequest, MediaRole};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSettings {
    pub admins: Vec<i64>,
    pub limits: MediaLimits,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Empty,
    Published { path: String, attempts: u32 },
    /// Left in the queue for the next cycle.
    Failed { path: String, reason: String },
    /// Removed from the queue without publishing.
    Discarded { path: String, reason: String },
}

pub struct Publisher<'a> {
    queue: &'a mut QueueStore,
    channel: &'a dyn Channel,
    checker: &'a dyn LinkChecker,
    settings: &'a PublishSettings,
}

impl<'a> Publisher<'a> {
    pub fn new(
        queue: &'a mut QueueStore,
        channel: &'a dyn Channel,
        checker: &'a dyn LinkChecker,
        settings: &'a PublishSettings,
    ) -> Self {
        Self {
            queue,
            channel,
            checker,
            settings,
        }
    }

    #[instrument(skip_all)]
    pub async fn run(&mut self) -> Result<PublishOutcome, QueueError> {
        self.queue.load().await?;
        if self.queue.is_empty() {
            info!("queue is empty");
            self.notify("Queue is empty.").await;
            return Ok(PublishOutcome::Empty);
        }

        let index = rand::thread_rng().gen_range(0..self.queue.len());
        let item = self.queue.items()[index].clone();
        let source = self.queue.media_path(&item.path);
        debug!(path = %item.path, index, "selected item");

        let prepared = match media::prepare(&source, self.settings.limits).await {
            Ok(prepared) => prepared,
            Err(err) if err.is_permanent() => {
                warn!(path = %item.path, %err, "discarding undecodable media");
                remove_files(&[source.clone()]).await;
                self.remove(&item.path).await?;
                self.notify(&format!(
                    "Removed undecodable media from the queue: {}",
                    item.path
                ))
                .await;
                return Ok(PublishOutcome::Discarded {
                    path: item.path,
                    reason: err.to_string(),
                });
            }
            Err(err) => return Ok(self.fail(&item, &err.to_string()).await),
        };

        let outcome = self.send(&item, &prepared).await;
        match outcome {
            Delivery::Delivered { attempts } => {
                let mut files = vec![source];
                files.extend(prepared.byproducts.iter().cloned());
                files.dedup();
                remove_files(&files).await;
                self.remove(&item.path).await?;
                info!(path = %item.path, attempts, "published");
                Ok(PublishOutcome::Published {
                    path: item.path,
                    attempts,
                })
            }
            Delivery::Failed { error, .. } => {
                remove_files(&prepared.byproducts).await;
                Ok(self.fail(&item, &error).await)
            }
        }
    }

    async fn send(&self, item: &QueueItem, prepared: &PreparedMedia) -> Delivery {
        let files = match open_files(prepared).await {
            Ok(files) => files,
            Err(err) => {
                error!(path = %prepared.media.display(), %err, "failed to open media");
                return Delivery::Failed {
                    attempts: 0,
                    error: err.to_string(),
                };
            }
        };
        let buttons = match item.sauce.as_deref() {
            Some(sauce) => build_buttons(sauce, self.checker).await,
            None => None,
        };
        let mut request = MediaRequest {
            kind: prepared.kind,
            files,
            caption: render_caption(item),
            buttons,
        };
        deliver(&self.settings.retry, self.channel, &mut request).await
    }

    async fn fail(&self, item: &QueueItem, reason: &str) -> PublishOutcome {
        error!(path = %item.path, reason, "publish failed; keeping item queued");
        self.notify(&format!("Image failed to send: {}", item.path))
            .await;
        PublishOutcome::Failed {
            path: item.path.clone(),
            reason: reason.to_string(),
        }
    }

    /// Remove by path: the selected index is not stable across reloads.
    async fn remove(&mut self, path: &str) -> Result<(), QueueError> {
        self.queue.load().await?;
        match self.queue.position(path) {
            Some(index) => {
                self.queue.remove_at(index).await?;
            }
            None => warn!(path, "published item no longer queued"),
        }
        Ok(())
    }

    async fn notify(&self, text: &str) {
        notify_admins(self.channel, &self.settings.admins, text).await;
    }
}

async fn open_files(prepared: &PreparedMedia) -> std::io::Result<Vec<MediaFile>> {
    let mut files = vec![MediaFile::open(MediaRole::Media, &prepared.media).await?];
    if let Some(thumb) = &prepared.thumbnail {
        files.push(MediaFile::open(MediaRole::Thumbnail, thumb).await?);
    }
    Ok(files)
}

async fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        remove_file(path).await;
    }
}

async fn remove_file(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "removed"),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!(path = %path.display(), %err, "failed to remove file"),
    }
}
