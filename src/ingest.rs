//! Ingestion sync: drain the archive's pending set into the queue.

use anyhow::{anyhow, Context};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::caption::{escape_html, title_case};
use crate::hydrus::{ArchiveClient, TagAction, TagService};
use crate::model::{FileMetadata, QueueItem};
use crate::queue::{QueueError, QueueStore};
use crate::retry::{with_retry, RetryPolicy};

const TAG_SEARCH_URL: &str = "https://e621.net/posts?tags=";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    pub queue_tag: String,
    pub posted_tag: String,
    pub batch_size: usize,
}

/// Counts for one sync run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// False when the archive was unreachable or lacked permissions.
    pub archive_available: bool,
    pub found: usize,
    pub queued: usize,
    pub duplicates: usize,
    pub skipped: usize,
    pub failed: usize,
    pub tag_failures: usize,
}

#[derive(Debug, Error)]
enum ItemError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Item(#[from] anyhow::Error),
}

enum ItemOutcome {
    Queued,
    Duplicate,
    Skipped(&'static str),
}

/// Caption fragments extracted from an item's tags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fragments {
    pub creator: Option<String>,
    pub title: Option<String>,
    pub character: Option<String>,
}

pub struct Ingestor<'a> {
    archive: &'a dyn ArchiveClient,
    queue: &'a mut QueueStore,
    settings: &'a IngestSettings,
    retry: &'a RetryPolicy,
}

impl<'a> Ingestor<'a> {
    pub fn new(
        archive: &'a dyn ArchiveClient,
        queue: &'a mut QueueStore,
        settings: &'a IngestSettings,
        retry: &'a RetryPolicy,
    ) -> Self {
        Self {
            archive,
            queue,
            settings,
            retry,
        }
    }

    /// Only queue persistence failures escape; per-item problems are logged
    /// and counted.
    #[instrument(skip_all)]
    pub async fn run(&mut self) -> Result<SyncReport, QueueError> {
        let mut report = SyncReport::default();
        debug!("checking archive for new files");
        match self.archive.check_permissions().await {
            Ok(true) => report.archive_available = true,
            Ok(false) => return Ok(report),
            Err(err) => {
                warn!(?err, "archive unavailable; skipping sync");
                return Ok(report);
            }
        }

        let ids = match self.archive.search_by_tag(&self.settings.queue_tag).await {
            Ok(ids) => ids,
            Err(err) => {
                error!(?err, tag = %self.settings.queue_tag, "archive search failed");
                return Ok(report);
            }
        };
        report.found = ids.len();
        if ids.is_empty() {
            info!("No new images found.");
            return Ok(report);
        }

        for (n, batch) in ids.chunks(self.settings.batch_size.max(1)).enumerate() {
            debug!(batch = n, size = batch.len(), "processing batch");
            for &id in batch {
                match self.ingest_one(id).await {
                    Ok(ItemOutcome::Queued) => {
                        report.queued += 1;
                        self.mark_posted(id, &mut report).await;
                    }
                    Ok(ItemOutcome::Duplicate) => {
                        debug!(id, "already queued");
                        report.duplicates += 1;
                        self.mark_posted(id, &mut report).await;
                    }
                    Ok(ItemOutcome::Skipped(field)) => {
                        warn!(id, field, "metadata incomplete; leaving item tagged for inspection");
                        report.skipped += 1;
                    }
                    Err(ItemError::Queue(err)) => return Err(err),
                    Err(ItemError::Item(err)) => {
                        error!(id, ?err, "failed to ingest item");
                        report.failed += 1;
                    }
                }
            }
        }

        if report.queued > 0 {
            info!(count = report.queued, "Added image(s) to the queue.");
        } else {
            info!("No new images found.");
        }
        Ok(report)
    }

    async fn ingest_one(&mut self, id: u64) -> Result<ItemOutcome, ItemError> {
        let raw = self
            .archive
            .get_metadata(id)
            .await
            .with_context(|| format!("failed to fetch metadata for {id}"))?;
        let Some(raw) = raw else {
            return Ok(ItemOutcome::Skipped("metadata"));
        };
        let meta = match raw.validate(TagService::DownloaderTags.key()) {
            Ok(meta) => meta,
            Err(field) => return Ok(ItemOutcome::Skipped(field)),
        };

        let file_name = meta.file_name();
        let content = self
            .archive
            .get_content(meta.file_id)
            .await
            .with_context(|| format!("failed to fetch content for {}", meta.file_id))?;
        if content.is_empty() {
            return Err(anyhow!("archive returned no content for {}", meta.file_id).into());
        }
        let dest = self.queue.media_path(&file_name);
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        tokio::fs::write(&dest, &content)
            .await
            .with_context(|| format!("failed to write {}", dest.display()))?;

        let item = build_item(&meta);
        if self.queue.append(item).await? {
            debug!(id, path = %file_name, "queued");
            Ok(ItemOutcome::Queued)
        } else {
            Ok(ItemOutcome::Duplicate)
        }
    }

    /// Swap the queue tag for the posted tag. Each mutation is retried; a
    /// persistent failure leaves the queue tag in place and the next sync
    /// converges through dedup.
    async fn mark_posted(&self, id: u64, report: &mut SyncReport) {
        let queue_tag = self.settings.queue_tag.as_str();
        let posted_tag = self.settings.posted_tag.as_str();
        let steps = [
            (queue_tag, TagAction::Delete, TagService::DownloaderTags),
            (queue_tag, TagAction::Delete, TagService::MyTags),
            (posted_tag, TagAction::Add, TagService::MyTags),
        ];
        for (tag, action, service) in steps {
            let res = with_retry(self.retry, "tag mutation", || {
                self.archive.mutate_tag(id, tag, action, service)
            })
            .await;
            if let Err(err) = res {
                error!(id, tag, ?action, ?service, ?err, "failed to update archive tags");
                report.tag_failures += 1;
                return;
            }
        }
    }
}

pub fn build_item(meta: &FileMetadata) -> QueueItem {
    let fragments = extract_fragments(&meta.tags);
    let sauce = concatenate_sauce(&meta.known_urls);
    QueueItem {
        path: meta.file_name(),
        sauce: Some(sauce).filter(|s| !s.is_empty()),
        creator: fragments.creator,
        title: fragments.title,
        character: fragments.character,
    }
}

/// Keep only canonical listing URLs; direct file links are dropped.
pub fn concatenate_sauce(known_urls: &[String]) -> String {
    known_urls
        .iter()
        .filter(|u| u.starts_with("https://www.") || u.starts_with("https://e621.net/posts"))
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

pub fn extract_fragments(tags: &[String]) -> Fragments {
    let mut creators = Vec::new();
    let mut titles = Vec::new();
    let mut characters = Vec::new();
    for tag in tags {
        if let Some(name) = tag.strip_prefix("creator:") {
            creators.push(tag_link(name, name));
        } else if let Some(name) = tag.strip_prefix("title:") {
            titles.push(escape_html(&title_case(name)));
        } else if let Some(name) = tag.strip_prefix("character:") {
            let display = name.replace(" (character)", "");
            characters.push(tag_link(name, &display));
        }
    }
    let joined = |parts: Vec<String>| Some(parts.join("\n")).filter(|s| !s.is_empty());
    Fragments {
        creator: joined(creators),
        title: joined(titles),
        character: joined(characters),
    }
}

fn tag_link(tag: &str, display: &str) -> String {
    let query = urlencoding::encode(&tag.replace(' ', "_")).into_owned();
    format!(
        "<a href=\"{TAG_SEARCH_URL}{query}\">{}</a>",
        escape_html(&title_case(display))
    )
}
