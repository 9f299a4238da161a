//! One full cycle: ingest from the archive, then publish a single item.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::caption::LinkChecker;
use crate::config::Config;
use crate::hydrus::ArchiveClient;
use crate::ingest::{IngestSettings, Ingestor, SyncReport};
use crate::media::MediaLimits;
use crate::publish::{PublishOutcome, PublishSettings, Publisher};
use crate::queue::{QueueError, QueueStore};
use crate::retry::RetryPolicy;
use crate::scheduler::Cycle;
use crate::telegram::Channel;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub sync: SyncReport,
    pub publish: PublishOutcome,
}

pub struct Engine {
    queue: QueueStore,
    archive: Arc<dyn ArchiveClient>,
    channel: Arc<dyn Channel>,
    checker: Arc<dyn LinkChecker>,
    ingest: IngestSettings,
    publish: PublishSettings,
}

impl Engine {
    pub fn new(
        queue: QueueStore,
        archive: Arc<dyn ArchiveClient>,
        channel: Arc<dyn Channel>,
        checker: Arc<dyn LinkChecker>,
        ingest: IngestSettings,
        publish: PublishSettings,
    ) -> Self {
        Self {
            queue,
            archive,
            channel,
            checker,
            ingest,
            publish,
        }
    }

    pub fn from_config(
        cfg: &Config,
        archive: Arc<dyn ArchiveClient>,
        channel: Arc<dyn Channel>,
        checker: Arc<dyn LinkChecker>,
    ) -> Self {
        let ingest = IngestSettings {
            queue_tag: cfg.hydrus.queue_tag.clone(),
            posted_tag: cfg.hydrus.posted_tag.clone(),
            batch_size: cfg.hydrus.batch_size,
        };
        let publish = PublishSettings {
            admins: cfg.telegram.admins.clone(),
            limits: MediaLimits {
                max_dimension: cfg.media.max_image_dimension,
                max_file_size: cfg.media.max_file_size,
            },
            retry: RetryPolicy::default(),
        };
        Self::new(
            QueueStore::new(cfg.queue_file(), cfg.media_dir()),
            archive,
            channel,
            checker,
            ingest,
            publish,
        )
    }

    pub fn queue(&self) -> &QueueStore {
        &self.queue
    }

    /// Ingestion finishes before selection, so a freshly synced item can be
    /// published in the same cycle.
    #[instrument(skip_all)]
    pub async fn run_cycle(&mut self) -> Result<CycleReport, QueueError> {
        let sync = Ingestor::new(
            self.archive.as_ref(),
            &mut self.queue,
            &self.ingest,
            &self.publish.retry,
        )
        .run()
        .await?;
        info!(
            found = sync.found,
            queued = sync.queued,
            duplicates = sync.duplicates,
            skipped = sync.skipped,
            failed = sync.failed,
            "sync finished"
        );

        let publish = Publisher::new(
            &mut self.queue,
            self.channel.as_ref(),
            self.checker.as_ref(),
            &self.publish,
        )
        .run()
        .await?;
        Ok(CycleReport { sync, publish })
    }
}

#[async_trait]
impl Cycle for Engine {
    async fn run_once(&mut self) -> Result<()> {
        self.run_cycle().await?;
        Ok(())
    }
}
