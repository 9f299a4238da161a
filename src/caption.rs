//! Caption text and inline button layout for a published item.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::future::join_all;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::model::QueueItem;

/// Maximum caption length accepted by the channel.
pub const MAX_CAPTION_LEN: usize = 1024;
pub const ELLIPSIS: &str = "...";
pub const NO_INFO: &str = "No info.";

const FURAFFINITY_DEAD_MARKER: &str =
    "The submission you are trying to find is not in our database.";

static SUBREDDIT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)/(r/[a-z0-9][_a-z0-9]{2,20})/").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub text: String,
    pub url: Url,
}

/// Rows of buttons, at most two per row.
pub type ButtonLayout = Vec<Vec<Button>>;

/// Escape text for the channel's HTML parse mode.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
    out
}

/// Title-case every word. A letter right after an apostrophe keeps its
/// lower case, so `don't` becomes `Don't`.
pub fn title_case(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev: Option<char> = None;
    for c in text.chars() {
        let word_start = match prev {
            None => true,
            Some(p) => !p.is_alphanumeric() && p != '\'',
        };
        if word_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        prev = Some(c);
    }
    out
}

/// Assemble the caption from the item's fragments and fit it to the limit.
pub fn render_caption(item: &QueueItem) -> String {
    let sections = [
        ("Title(s):", &item.title),
        ("Uploader:", &item.creator),
        ("Character(s):", &item.character),
    ];
    let parts: Vec<String> = sections
        .iter()
        .filter_map(|(label, value)| {
            value
                .as_deref()
                .filter(|v| !v.is_empty())
                .map(|v| format!("{label}\n{v}"))
        })
        .collect();
    if parts.is_empty() {
        return NO_INFO.to_string();
    }
    truncate_caption(&parts.join("\n\n"))
}

/// Cut to at most [`MAX_CAPTION_LEN`] characters including the ellipsis,
/// breaking on the last newline that fits. Without one, cut at the last
/// position outside any markup element.
pub fn truncate_caption(caption: &str) -> String {
    if caption.chars().count() <= MAX_CAPTION_LEN {
        return caption.to_string();
    }
    let budget = MAX_CAPTION_LEN - ELLIPSIS.chars().count();
    let head_end = caption
        .char_indices()
        .nth(budget)
        .map(|(i, _)| i)
        .unwrap_or(caption.len());
    let head = &caption[..head_end];
    let cut = match head.rfind('\n') {
        Some(pos) => pos,
        None => last_markup_boundary(caption, budget),
    };
    format!("{}{}", caption[..cut].trim_end(), ELLIPSIS)
}

/// Byte index of the last cut point within the first `limit` characters that
/// is not inside a tag or between `<a ...>` and `</a>`.
fn last_markup_boundary(text: &str, limit: usize) -> usize {
    let mut best = 0;
    let mut tag_start: Option<usize> = None;
    let mut open_links = 0usize;
    for (n, (i, c)) in text.char_indices().enumerate() {
        if n >= limit {
            break;
        }
        if tag_start.is_none() && open_links == 0 {
            best = i;
        }
        match c {
            '<' if tag_start.is_none() => tag_start = Some(i),
            '>' => {
                if let Some(start) = tag_start.take() {
                    let tag = &text[start..=i];
                    if tag.starts_with("<a ") || tag == "<a>" {
                        open_links += 1;
                    } else if tag.starts_with("</a") {
                        open_links = open_links.saturating_sub(1);
                    }
                }
            }
            _ => {}
        }
    }
    best
}

/// Fetches page bodies for liveness checks.
#[async_trait]
pub trait LinkChecker: Send + Sync {
    async fn fetch_text(&self, url: &Url) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct HttpLinkChecker {
    http: Client,
}

impl HttpLinkChecker {
    pub fn new() -> Result<Self> {
        let http = Client::builder()
            .user_agent("hydrus-telegram-bot/0.1")
            .timeout(Duration::from_secs(10))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { http })
    }
}

#[async_trait]
impl LinkChecker for HttpLinkChecker {
    async fn fetch_text(&self, url: &Url) -> Result<String> {
        let res = self.http.get(url.clone()).send().await?;
        Ok(res.text().await?)
    }
}

/// Build the button layout from a comma-joined sauce string. Returns `None`
/// when no button survives.
pub async fn build_buttons(sauce: &str, checker: &dyn LinkChecker) -> Option<ButtonLayout> {
    let links: Vec<Url> = sauce
        .split(',')
        .map(str::trim)
        .filter(|s| s.contains("http"))
        .filter_map(|s| Url::parse(s).ok())
        .collect();
    let buttons: Vec<Button> = join_all(links.into_iter().map(|url| label_link(url, checker)))
        .await
        .into_iter()
        .flatten()
        .collect();
    if buttons.is_empty() {
        return None;
    }
    Some(buttons.chunks(2).map(<[Button]>::to_vec).collect())
}

async fn label_link(url: Url, checker: &dyn LinkChecker) -> Option<Button> {
    let host = url.host_str().unwrap_or_default().to_string();
    let text = if host.contains("furaffinity") {
        if url.path().contains("user") {
            return None;
        }
        match checker.fetch_text(&url).await {
            Ok(body) if body.contains(FURAFFINITY_DEAD_MARKER) => {
                debug!(%url, "skipping dead link");
                return None;
            }
            Ok(_) => {}
            Err(err) => warn!(%url, ?err, "could not check link; keeping it"),
        }
        "Furaffinity".to_string()
    } else if host.contains("e621") {
        "e621".to_string()
    } else if host.contains("reddit") {
        match SUBREDDIT_RE.captures(url.as_str()) {
            Some(caps) => format!("Reddit ({})", &caps[1]),
            None => "Reddit".to_string(),
        }
    } else {
        host
    };
    Some(Button { text, url })
}
