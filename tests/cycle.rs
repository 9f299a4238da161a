mod common;

use common::*;
use hydrus_telegram_bot::engine::Engine;
use hydrus_telegram_bot::hydrus::{TagAction, TagService};
use hydrus_telegram_bot::ingest::Ingestor;
use hydrus_telegram_bot::model::QueueItem;
use hydrus_telegram_bot::publish::{PublishOutcome, Publisher};
use hydrus_telegram_bot::queue::{read_document, QueueStore};
use hydrus_telegram_bot::retry::RetryPolicy;
use hydrus_telegram_bot::telegram::SendKind;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn store(root: &Path) -> QueueStore {
    QueueStore::new(root.join("queue.json"), root.join("media"))
}

fn engine(root: &Path, archive: &FakeArchive, channel: &RecordingChannel) -> Engine {
    Engine::new(
        store(root),
        Arc::new(archive.clone()),
        Arc::new(channel.clone()),
        Arc::new(AliveLinks),
        ingest_settings(),
        publish_settings(),
    )
}

#[tokio::test]
async fn fresh_item_is_ingested_and_published_in_one_cycle() {
    let td = tempdir().unwrap();
    let archive = FakeArchive::default();
    let channel = RecordingChannel::default();
    let png = png_bytes(32, 24);
    archive
        .add(
            raw_meta(
                1,
                "deadbeef",
                ".png",
                &["creator:some artist", "title:night sky"],
                &["https://e621.net/posts/1", "https://static1.e621.net/data/x.png"],
            ),
            png.clone(),
        )
        .await;

    let mut engine = engine(td.path(), &archive, &channel);
    let report = engine.run_cycle().await.unwrap();

    assert_eq!(report.sync.found, 1);
    assert_eq!(report.sync.queued, 1);
    assert_eq!(report.sync.tag_failures, 0);
    assert_eq!(
        report.publish,
        PublishOutcome::Published {
            path: "deadbeef.png".into(),
            attempts: 1
        }
    );

    assert!(archive.has_tag(1, POSTED_TAG).await);
    assert!(!archive.has_tag(1, QUEUE_TAG).await);
    let mutations = archive.mutations().await;
    assert_eq!(
        mutations
            .iter()
            .map(|(_, tag, action, service)| (tag.as_str(), *action, *service))
            .collect::<Vec<_>>(),
        vec![
            (QUEUE_TAG, TagAction::Delete, TagService::DownloaderTags),
            (QUEUE_TAG, TagAction::Delete, TagService::MyTags),
            (POSTED_TAG, TagAction::Add, TagService::MyTags),
        ]
    );

    let doc = read_document(&td.path().join("queue.json")).await.unwrap();
    assert!(doc.queue.is_empty());
    assert!(!td.path().join("media").join("deadbeef.png").exists());

    let sent = channel.media().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, SendKind::Photo);
    assert_eq!(sent[0].content, png);
    assert_eq!(sent[0].buttons, 1);
    assert!(sent[0].caption.starts_with("Title(s):\nNight Sky\n\nUploader:\n<a href="));
    assert!(channel.messages().await.is_empty());
}

#[tokio::test]
async fn missing_media_stays_queued_and_notifies() {
    let td = tempdir().unwrap();
    let archive = FakeArchive::default();
    let channel = RecordingChannel::default();
    let mut queue = store(td.path());
    queue.append(QueueItem::new("gone.png")).await.unwrap();

    let mut engine = engine(td.path(), &archive, &channel);
    let report = engine.run_cycle().await.unwrap();

    assert!(matches!(report.publish, PublishOutcome::Failed { ref path, .. } if path == "gone.png"));
    let doc = read_document(&td.path().join("queue.json")).await.unwrap();
    assert_eq!(doc.queue, vec![QueueItem::new("gone.png")]);
    assert_eq!(
        channel.messages().await,
        vec![(ADMIN, "Image failed to send: gone.png".to_string())]
    );
    assert!(channel.media().await.is_empty());
}

#[tokio::test]
async fn unavailable_archive_still_publishes() {
    let td = tempdir().unwrap();
    let archive = FakeArchive::unavailable();
    let channel = RecordingChannel::default();
    std::fs::create_dir_all(td.path().join("media")).unwrap();
    std::fs::write(td.path().join("media").join("a.png"), png_bytes(4, 4)).unwrap();
    store(td.path()).append(QueueItem::new("a.png")).await.unwrap();

    let report = engine(td.path(), &archive, &channel).run_cycle().await.unwrap();
    assert!(!report.sync.archive_available);
    assert!(matches!(report.publish, PublishOutcome::Published { .. }));
    assert_eq!(channel.media().await.len(), 1);
}

#[tokio::test]
async fn retry_resends_full_content() {
    let td = tempdir().unwrap();
    let media = td.path().join("media");
    std::fs::create_dir_all(&media).unwrap();
    let png = png_bytes(40, 30);
    std::fs::write(media.join("r.png"), &png).unwrap();
    let mut queue = store(td.path());
    queue.append(QueueItem::new("r.png")).await.unwrap();

    let channel = RecordingChannel::failing(1);
    let settings = publish_settings();
    let out = Publisher::new(&mut queue, &channel, &AliveLinks, &settings)
        .run()
        .await
        .unwrap();

    assert_eq!(
        out,
        PublishOutcome::Published {
            path: "r.png".into(),
            attempts: 2
        }
    );
    assert_eq!(channel.attempts().await, 2);
    let sent = channel.media().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].content, png);
}

#[tokio::test]
async fn exhausted_retries_keep_item_and_media() {
    let td = tempdir().unwrap();
    let media = td.path().join("media");
    std::fs::create_dir_all(&media).unwrap();
    std::fs::write(media.join("k.png"), png_bytes(8, 8)).unwrap();
    let mut queue = store(td.path());
    queue.append(QueueItem::new("k.png")).await.unwrap();

    let channel = RecordingChannel::failing(10);
    let settings = publish_settings();
    let out = Publisher::new(&mut queue, &channel, &AliveLinks, &settings)
        .run()
        .await
        .unwrap();

    assert!(matches!(out, PublishOutcome::Failed { .. }));
    assert_eq!(channel.attempts().await, 3);
    assert!(media.join("k.png").exists());
    queue.load().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(
        channel.messages().await,
        vec![(ADMIN, "Image failed to send: k.png".to_string())]
    );
}

#[tokio::test]
async fn undecodable_media_is_discarded() {
    let td = tempdir().unwrap();
    let media = td.path().join("media");
    std::fs::create_dir_all(&media).unwrap();
    std::fs::write(media.join("bad.png"), b"definitely not an image").unwrap();
    let mut queue = store(td.path());
    queue.append(QueueItem::new("bad.png")).await.unwrap();

    let channel = RecordingChannel::default();
    let settings = publish_settings();
    let out = Publisher::new(&mut queue, &channel, &AliveLinks, &settings)
        .run()
        .await
        .unwrap();

    assert!(matches!(out, PublishOutcome::Discarded { ref path, .. } if path == "bad.png"));
    assert!(!media.join("bad.png").exists());
    queue.load().await.unwrap();
    assert!(queue.is_empty());
    assert_eq!(channel.attempts().await, 0);
    assert_eq!(
        channel.messages().await,
        vec![(
            ADMIN,
            "Removed undecodable media from the queue: bad.png".to_string()
        )]
    );
}

#[tokio::test]
async fn repeated_sync_never_duplicates() {
    let td = tempdir().unwrap();
    let archive = FakeArchive::failing_mutations();
    archive
        .add(raw_meta(5, "cafe", ".jpg", &[], &[]), png_bytes(2, 2))
        .await;
    let mut queue = store(td.path());
    let settings = ingest_settings();
    let retry = RetryPolicy {
        max_attempts: 1,
        ..fast_retry()
    };

    let first = Ingestor::new(&archive, &mut queue, &settings, &retry)
        .run()
        .await
        .unwrap();
    let second = Ingestor::new(&archive, &mut queue, &settings, &retry)
        .run()
        .await
        .unwrap();

    assert_eq!(first.queued, 1);
    assert_eq!(first.tag_failures, 1);
    assert_eq!(second.queued, 0);
    assert_eq!(second.duplicates, 1);
    assert!(archive.has_tag(5, QUEUE_TAG).await);

    queue.load().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.items()[0].path, "cafe.jpg");
}

#[tokio::test]
async fn incomplete_metadata_is_skipped_without_mutation() {
    let td = tempdir().unwrap();
    let archive = FakeArchive::default();
    let mut broken = raw_meta(7, "", ".png", &[], &[]);
    broken.hash = None;
    archive.add(broken, png_bytes(2, 2)).await;
    archive
        .add(raw_meta(8, "600d", ".png", &[], &[]), png_bytes(2, 2))
        .await;
    archive
        .add(raw_meta(9, "a150", ".png", &[], &[]), png_bytes(2, 2))
        .await;

    let mut queue = store(td.path());
    let settings = ingest_settings();
    let retry = fast_retry();
    let report = Ingestor::new(&archive, &mut queue, &settings, &retry)
        .run()
        .await
        .unwrap();

    assert_eq!(report.found, 3);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.queued, 2);
    assert!(archive.has_tag(7, QUEUE_TAG).await);
    assert!(archive.mutations().await.iter().all(|(id, ..)| *id != 7));
    assert!(td.path().join("media").join("600d.png").exists());
}

#[tokio::test]
async fn path_like_hash_never_leaves_media_dir() {
    let td = tempdir().unwrap();
    let archive = FakeArchive::default();
    archive
        .add(raw_meta(1, "../escaped", ".png", &[], &[]), png_bytes(2, 2))
        .await;

    let mut queue = store(td.path());
    let settings = ingest_settings();
    let retry = fast_retry();
    let report = Ingestor::new(&archive, &mut queue, &settings, &retry)
        .run()
        .await
        .unwrap();

    assert_eq!(report.skipped, 1);
    assert_eq!(report.queued, 0);
    assert!(!td.path().join("escaped.png").exists());
    assert!(archive.has_tag(1, QUEUE_TAG).await);
    queue.load().await.unwrap();
    assert!(queue.is_empty());
}
