#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use hydrus_telegram_bot::caption::LinkChecker;
use hydrus_telegram_bot::hydrus::model::{RawFileMetadata, ServiceTags};
use hydrus_telegram_bot::hydrus::{ArchiveClient, TagAction, TagService};
use hydrus_telegram_bot::ingest::IngestSettings;
use hydrus_telegram_bot::media::MediaLimits;
use hydrus_telegram_bot::publish::PublishSettings;
use hydrus_telegram_bot::retry::RetryPolicy;
use hydrus_telegram_bot::telegram::{Channel, ChannelError, MediaRequest, MediaRole, SendKind};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use url::Url;

pub const ADMIN: i64 = 42;
pub const QUEUE_TAG: &str = "telegram:queue";
pub const POSTED_TAG: &str = "telegram:posted";

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        base_timeout: Duration::from_secs(5),
    }
}

pub fn ingest_settings() -> IngestSettings {
    IngestSettings {
        queue_tag: QUEUE_TAG.into(),
        posted_tag: POSTED_TAG.into(),
        batch_size: 2,
    }
}

pub fn publish_settings() -> PublishSettings {
    PublishSettings {
        admins: vec![ADMIN],
        limits: MediaLimits {
            max_dimension: 10_000,
            max_file_size: 10_000_000,
        },
        retry: fast_retry(),
    }
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 7) as u8, (y * 13) as u8, 90])
    });
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .unwrap();
    buf
}

/// Metadata as the archive reports it, with `tags` under the downloader
/// service's current display tags.
pub fn raw_meta(id: u64, hash: &str, ext: &str, tags: &[&str], urls: &[&str]) -> RawFileMetadata {
    let mut display_tags = HashMap::new();
    display_tags.insert(
        "0".to_string(),
        tags.iter().map(|t| t.to_string()).collect::<Vec<_>>(),
    );
    let mut services = HashMap::new();
    services.insert(
        TagService::DownloaderTags.key().to_string(),
        ServiceTags { display_tags },
    );
    RawFileMetadata {
        file_id: Some(id),
        hash: Some(hash.into()),
        ext: Some(ext.into()),
        known_urls: urls.iter().map(|u| u.to_string()).collect(),
        tags: Some(services),
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveItem {
    pub meta: RawFileMetadata,
    pub content: Vec<u8>,
    pub tags: HashSet<(TagService, String)>,
}

#[derive(Clone, Default)]
pub struct FakeArchive {
    pub unavailable: bool,
    pub fail_mutations: bool,
    items: Arc<Mutex<BTreeMap<u64, ArchiveItem>>>,
    mutations: Arc<Mutex<Vec<(u64, String, TagAction, TagService)>>>,
}

impl FakeArchive {
    /// Every permission check fails as if the archive were down.
    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Default::default()
        }
    }

    /// Tag mutations are recorded but always fail.
    pub fn failing_mutations() -> Self {
        Self {
            fail_mutations: true,
            ..Default::default()
        }
    }

    /// Add an item tagged for publication.
    pub async fn add(&self, meta: RawFileMetadata, content: Vec<u8>) {
        let id = meta.file_id.unwrap_or_default();
        let mut tags = HashSet::new();
        tags.insert((TagService::DownloaderTags, QUEUE_TAG.to_string()));
        self.items.lock().await.insert(
            id,
            ArchiveItem {
                meta,
                content,
                tags,
            },
        );
    }

    pub async fn has_tag(&self, id: u64, tag: &str) -> bool {
        self.items
            .lock()
            .await
            .get(&id)
            .map(|item| item.tags.iter().any(|(_, t)| t == tag))
            .unwrap_or(false)
    }

    pub async fn mutations(&self) -> Vec<(u64, String, TagAction, TagService)> {
        self.mutations.lock().await.clone()
    }
}

#[async_trait]
impl ArchiveClient for FakeArchive {
    async fn check_permissions(&self) -> Result<bool> {
        if self.unavailable {
            return Err(anyhow!("connection refused"));
        }
        Ok(true)
    }

    async fn search_by_tag(&self, tag: &str) -> Result<Vec<u64>> {
        let items = self.items.lock().await;
        Ok(items
            .iter()
            .filter(|(_, item)| item.tags.iter().any(|(_, t)| t == tag))
            .map(|(id, _)| *id)
            .collect())
    }

    async fn get_metadata(&self, id: u64) -> Result<Option<RawFileMetadata>> {
        Ok(self.items.lock().await.get(&id).map(|item| item.meta.clone()))
    }

    async fn get_content(&self, file_id: u64) -> Result<Vec<u8>> {
        self.items
            .lock()
            .await
            .get(&file_id)
            .map(|item| item.content.clone())
            .ok_or_else(|| anyhow!("no file {file_id}"))
    }

    async fn mutate_tag(
        &self,
        id: u64,
        tag: &str,
        action: TagAction,
        service: TagService,
    ) -> Result<()> {
        self.mutations
            .lock()
            .await
            .push((id, tag.to_string(), action, service));
        if self.fail_mutations {
            return Err(anyhow!("archive returned 500"));
        }
        let mut items = self.items.lock().await;
        let item = items.get_mut(&id).ok_or_else(|| anyhow!("no file {id}"))?;
        let key = (service, tag.to_string());
        match action {
            TagAction::Add => {
                item.tags.insert(key);
            }
            TagAction::Delete => {
                item.tags.remove(&key);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct SentMedia {
    pub kind: SendKind,
    pub caption: String,
    pub content: Vec<u8>,
    pub buttons: usize,
}

/// Records every send. The first `fail_attempts` media sends read the whole
/// file and then fail, leaving the handle at EOF.
#[derive(Clone, Default)]
pub struct RecordingChannel {
    fail_attempts: Arc<Mutex<u32>>,
    attempts: Arc<Mutex<u32>>,
    messages: Arc<Mutex<Vec<(i64, String)>>>,
    media: Arc<Mutex<Vec<SentMedia>>>,
}

impl RecordingChannel {
    pub fn failing(attempts: u32) -> Self {
        Self {
            fail_attempts: Arc::new(Mutex::new(attempts)),
            ..Default::default()
        }
    }

    pub async fn messages(&self) -> Vec<(i64, String)> {
        self.messages.lock().await.clone()
    }

    pub async fn media(&self) -> Vec<SentMedia> {
        self.media.lock().await.clone()
    }

    pub async fn attempts(&self) -> u32 {
        *self.attempts.lock().await
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        self.messages.lock().await.push((chat_id, text.to_string()));
        Ok(())
    }

    async fn send_media(&self, request: &mut MediaRequest) -> Result<(), ChannelError> {
        *self.attempts.lock().await += 1;
        let content = match request.file_mut(MediaRole::Media) {
            Some(file) => file.read_remaining().await?,
            None => return Err(ChannelError::Rejected("no media".into())),
        };
        {
            let mut remaining = self.fail_attempts.lock().await;
            if *remaining > 0 {
                *remaining -= 1;
                return Err(ChannelError::Network("connection reset".into()));
            }
        }
        self.media.lock().await.push(SentMedia {
            kind: request.kind,
            caption: request.caption.clone(),
            content,
            buttons: request.buttons.iter().flatten().flatten().count(),
        });
        Ok(())
    }
}

#[derive(Clone, Copy, Default)]
pub struct AliveLinks;

#[async_trait]
impl LinkChecker for AliveLinks {
    async fn fetch_text(&self, _url: &Url) -> Result<String> {
        Ok("<html></html>".into())
    }
}
