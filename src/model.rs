use serde::{Deserialize, Serialize};
use std::path::Path;

/// One media item staged for publication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueItem {
    /// `hash + extension`; unique within the queue.
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sauce: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub creator: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub character: Option<String>,
}

impl QueueItem {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            sauce: None,
            creator: None,
            title: None,
            character: None,
        }
    }
}

/// Persisted form of the queue: `{ "queue": [ ... ] }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueDocument {
    #[serde(default)]
    pub queue: Vec<QueueItem>,
}

/// Archive metadata after validation at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMetadata {
    /// Raw id used to fetch the file content.
    pub file_id: u64,
    pub hash: String,
    /// Extension including the leading dot, as reported by the archive.
    pub ext: String,
    pub known_urls: Vec<String>,
    /// Display tags from the downloader tag service.
    pub tags: Vec<String>,
}

impl FileMetadata {
    /// Local file name: content hash followed by the original extension.
    pub fn file_name(&self) -> String {
        format!("{}{}", self.hash, self.ext)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Container the channel cannot play; needs an mp4 transcode.
    TranscodeVideo,
    /// Natively playable video; needs only a thumbnail.
    Video,
    Image,
}

impl MediaKind {
    pub fn classify<P: AsRef<Path>>(path: P) -> Self {
        let ext = path
            .as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        match ext.as_str() {
            "webm" | "mkv" | "avi" | "mov" | "flv" | "wmv" => MediaKind::TranscodeVideo,
            "mp4" | "m4v" => MediaKind::Video,
            _ => MediaKind::Image,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::TranscodeVideo => "transcode_video",
            MediaKind::Video => "video",
            MediaKind::Image => "image",
        }
    }
}
