//! Channel client: the seam between the publish pipeline and Telegram.

use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::Path;
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, InputFile, ParseMode};
use teloxide::RequestError;
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tracing::{debug, warn};

use crate::caption::ButtonLayout;
use crate::retry::IsRetryable;

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("network error: {0}")]
    Network(String),
    #[error("channel rejected request: {0}")]
    Rejected(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("local file error: {0}")]
    Io(#[from] std::io::Error),
}

impl IsRetryable for ChannelError {
    fn is_retryable(&self) -> bool {
        match self {
            ChannelError::Network(_) | ChannelError::Rejected(_) | ChannelError::Timeout(_) => true,
            // A broken local handle will not heal by resending.
            ChannelError::Io(_) => false,
        }
    }
}

impl From<RequestError> for ChannelError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Network(e) => ChannelError::Network(e.to_string()),
            RequestError::Io(e) => ChannelError::Network(e.to_string()),
            other => ChannelError::Rejected(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendKind {
    Photo,
    Video,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaRole {
    Media,
    Thumbnail,
}

/// An open file passed to the transport. The handle is shared across retry
/// attempts, so it must be rewound before each one.
#[derive(Debug)]
pub struct MediaFile {
    pub role: MediaRole,
    pub name: String,
    pub file: File,
}

impl MediaFile {
    pub async fn open(role: MediaRole, path: &Path) -> std::io::Result<Self> {
        let file = File::open(path).await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "media".to_string());
        Ok(Self { role, name, file })
    }

    pub async fn rewind(&mut self) -> std::io::Result<()> {
        self.file.seek(SeekFrom::Start(0)).await.map(|_| ())
    }

    /// Read from the current position to EOF.
    pub async fn read_remaining(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf).await?;
        Ok(buf)
    }
}

#[derive(Debug)]
pub struct MediaRequest {
    pub kind: SendKind,
    pub files: Vec<MediaFile>,
    pub caption: String,
    pub buttons: Option<ButtonLayout>,
}

impl MediaRequest {
    pub async fn rewind(&mut self) -> std::io::Result<()> {
        for f in &mut self.files {
            f.rewind().await?;
        }
        Ok(())
    }

    pub fn file_mut(&mut self, role: MediaRole) -> Option<&mut MediaFile> {
        self.files.iter_mut().find(|f| f.role == role)
    }
}

#[async_trait]
pub trait Channel: Send + Sync {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError>;

    /// Publish media to the target channel. Reads each file from its current
    /// position.
    async fn send_media(&self, request: &mut MediaRequest) -> Result<(), ChannelError>;
}

/// Best-effort message to every operator; failures are only logged.
pub async fn notify_admins(channel: &dyn Channel, admins: &[i64], text: &str) {
    if text.is_empty() {
        return;
    }
    for &admin in admins {
        if let Err(err) = channel.send_message(admin, text).await {
            warn!(admin, %err, "failed to notify operator");
        }
    }
}

#[derive(Debug, Clone)]
pub struct TelegramChannel {
    bot: Bot,
    channel: ChatId,
}

impl TelegramChannel {
    pub fn new(bot: Bot, channel: i64) -> Self {
        Self {
            bot,
            channel: ChatId(channel),
        }
    }
}

pub fn keyboard(layout: &ButtonLayout) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(layout.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::url(b.text.clone(), b.url.clone()))
            .collect::<Vec<_>>()
    }))
}

async fn input_file(request: &mut MediaRequest, role: MediaRole) -> Result<Option<InputFile>, ChannelError> {
    let Some(media) = request.file_mut(role) else {
        return Ok(None);
    };
    let bytes = media.read_remaining().await?;
    Ok(Some(InputFile::memory(bytes).file_name(media.name.clone())))
}

#[async_trait]
impl Channel for TelegramChannel {
    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), ChannelError> {
        self.bot.send_message(ChatId(chat_id), text).await?;
        Ok(())
    }

    async fn send_media(&self, request: &mut MediaRequest) -> Result<(), ChannelError> {
        let media = input_file(request, MediaRole::Media)
            .await?
            .ok_or_else(|| ChannelError::Rejected("request has no media file".into()))?;
        let thumb = input_file(request, MediaRole::Thumbnail).await?;
        let markup = request.buttons.as_ref().map(keyboard);
        debug!(kind = ?request.kind, caption_len = request.caption.chars().count(), "sending media");

        match request.kind {
            SendKind::Photo => {
                let mut req = self
                    .bot
                    .send_photo(self.channel, media)
                    .caption(request.caption.clone())
                    .parse_mode(ParseMode::Html);
                if let Some(markup) = markup {
                    req = req.reply_markup(markup);
                }
                req.await?;
            }
            SendKind::Video => {
                let mut req = self
                    .bot
                    .send_video(self.channel, media)
                    .caption(request.caption.clone())
                    .parse_mode(ParseMode::Html)
                    .supports_streaming(true);
                if let Some(thumb) = thumb {
                    req = req.thumb(thumb);
                }
                if let Some(markup) = markup {
                    req = req.reply_markup(markup);
                }
                req.await?;
            }
        }
        Ok(())
    }
}
