use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use teloxide::prelude::*;
use tracing::{debug, info, instrument, warn};

use crate::queue::read_document;

/// Reply for an operator message. `queued` is the staged item count, if it
/// could be read. Plain text and `/start` get no reply.
pub fn reply_for(text: &str, queued: Option<usize>) -> Option<String> {
    let trimmed = text.trim();
    if !trimmed.starts_with('/') {
        return None;
    }
    let command = trimmed
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .split('@')
        .next()
        .unwrap_or_default();
    match command {
        "/start" => None,
        "/ping" => Some("PONG".to_string()),
        "/queue" => Some(match queued {
            Some(1) => "1 item queued.".to_string(),
            Some(n) => format!("{n} items queued."),
            None => "Queue is unavailable.".to_string(),
        }),
        _ => Some("Unknown command.".to_string()),
    }
}

pub fn is_admin(admins: &[i64], msg: &Message) -> bool {
    msg.from()
        .map(|u| admins.contains(&(u.id.0 as i64)))
        .unwrap_or(false)
}

/// Staged item count. Reads the file only; a missing queue counts as empty.
pub async fn queued_count(queue_file: &Path) -> Option<usize> {
    if !tokio::fs::try_exists(queue_file).await.unwrap_or(false) {
        return Some(0);
    }
    match read_document(queue_file).await {
        Ok(doc) => Some(doc.queue.len()),
        Err(err) => {
            warn!(?err, path = %queue_file.display(), "failed to read queue");
            None
        }
    }
}

#[instrument(skip_all)]
pub async fn handle_message(bot: &Bot, msg: &Message, admins: &[i64], queue_file: &Path) -> Result<()> {
    if !is_admin(admins, msg) {
        debug!(chat = msg.chat.id.0, "ignoring message from non-admin");
        return Ok(());
    }
    let Some(text) = msg.text() else {
        return Ok(());
    };
    let queued = if text.trim().starts_with("/queue") {
        queued_count(queue_file).await
    } else {
        None
    };
    if let Some(reply) = reply_for(text, queued) {
        let _ = bot.send_message(msg.chat.id, reply).await;
    }
    Ok(())
}

/// Long-poll operator commands until the process stops.
pub async fn run(bot: Bot, admins: Vec<i64>, queue_file: PathBuf) {
    let admins = Arc::new(admins);
    let queue_file = Arc::new(queue_file);
    info!("listening for operator commands");
    teloxide::repl(bot, move |bot: Bot, msg: Message| {
        let admins = Arc::clone(&admins);
        let queue_file = Arc::clone(&queue_file);
        async move {
            if let Err(err) = handle_message(&bot, &msg, &admins, &queue_file).await {
                warn!(?err, "failed to handle command");
            }
            respond(())
        }
    })
    .await;
}
