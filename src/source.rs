//! Message retrieval boundary
//!
//! The pipeline core never talks to a transport directly. Sources hand it
//! plain `SourceMessage` records and own their session lifecycle plus the
//! freshness filtering of what they return.

use crate::Result;
use anyhow::anyhow;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use std::time::Duration;
use tracing::{debug, warn};

/// Default freshness window in hours
const DEFAULT_FRESHNESS_HOURS: i64 = 24;

/// Timeout for preview page fetches in seconds
const FETCH_TIMEOUT_SECS: u64 = 30;

/// Browser user agent for preview fetches
const PREVIEW_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

static MESSAGE_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.tgme_widget_message").expect("Invalid message selector")
});

static TEXT_SELECTOR: Lazy<Selector> = Lazy::new(|| {
    Selector::parse("div.tgme_widget_message_text").expect("Invalid text selector")
});

static LINK_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("a[href]").expect("Invalid link selector"));

static TIME_SELECTOR: Lazy<Selector> =
    Lazy::new(|| Selector::parse("time[datetime]").expect("Invalid time selector"));

/// Quick relevance check so chatter-only messages are skipped before
/// extraction
static PROXY_HINT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)proxy|mtproto|socks|tg://|t\.me/proxy|server\s*[:=]|secret\s*[:=]|\b\d{1,3}(?:\.\d{1,3}){3}:\d{1,5}\b",
    )
    .expect("Invalid proxy hint regex")
});

/// A message retrieved from a source channel
#[derive(Debug, Clone)]
pub struct SourceMessage {
    pub text: String,
    /// Hyperlink targets found in the message body
    pub hyperlinks: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub channel: String,
}

/// Boundary to whatever transport supplies candidate-bearing messages.
///
/// Freshness filtering is the source's duty: `fetch_recent` returns only
/// messages inside the configured window.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Establish the session used by subsequent fetches
    async fn connect(&mut self) -> Result<()>;

    /// Tear the session down; must be safe to call on every exit path
    async fn disconnect(&mut self);

    /// Fetch recent messages from one channel
    async fn fetch_recent(&self, channel: &str) -> Result<Vec<SourceMessage>>;
}

/// Source reading the public `https://t.me/s/{channel}` preview pages
pub struct TelegramWebSource {
    freshness: ChronoDuration,
    client: Option<reqwest::Client>,
}

impl TelegramWebSource {
    pub fn new(freshness_hours: i64) -> Self {
        Self {
            freshness: ChronoDuration::hours(freshness_hours),
            client: None,
        }
    }

    /// Normalize a channel reference into its public preview URL
    fn preview_url(channel: &str) -> String {
        let name = channel
            .trim()
            .trim_start_matches("https://")
            .trim_start_matches("http://")
            .trim_start_matches("t.me/")
            .trim_start_matches("s/")
            .trim_start_matches('@');
        format!("https://t.me/s/{}", name)
    }

    /// Parse one preview page into fresh, relevant messages
    fn parse_preview(&self, channel: &str, html: &str) -> Vec<SourceMessage> {
        let document = Html::parse_document(html);
        let cutoff = Utc::now() - self.freshness;
        let mut messages = Vec::new();

        for container in document.select(&MESSAGE_SELECTOR) {
            let timestamp = container
                .select(&TIME_SELECTOR)
                .next()
                .and_then(|el| el.value().attr("datetime"))
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|dt| dt.with_timezone(&Utc));
            let timestamp = match timestamp {
                Some(timestamp) if timestamp >= cutoff => timestamp,
                _ => continue,
            };

            let text_div = match container.select(&TEXT_SELECTOR).next() {
                Some(div) => div,
                None => continue,
            };

            let text = text_div.text().collect::<Vec<_>>().join(" ");
            let hyperlinks: Vec<String> = text_div
                .select(&LINK_SELECTOR)
                .filter_map(|a| a.value().attr("href"))
                .map(str::to_string)
                .collect();

            let relevant = PROXY_HINT_REGEX.is_match(&text)
                || hyperlinks.iter().any(|href| PROXY_HINT_REGEX.is_match(href));
            if !relevant {
                continue;
            }

            messages.push(SourceMessage {
                text,
                hyperlinks,
                timestamp,
                channel: channel.to_string(),
            });
        }

        messages
    }
}

impl Default for TelegramWebSource {
    fn default() -> Self {
        Self::new(DEFAULT_FRESHNESS_HOURS)
    }
}

#[async_trait]
impl MessageSource for TelegramWebSource {
    async fn connect(&mut self) -> Result<()> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .user_agent(PREVIEW_USER_AGENT)
            .build()?;
        self.client = Some(client);
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.client = None;
    }

    /// Per-channel fetch problems degrade to an empty list with a warning;
    /// only a missing session is an error.
    async fn fetch_recent(&self, channel: &str) -> Result<Vec<SourceMessage>> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| anyhow!("source not connected"))?;

        let url = Self::preview_url(channel);
        let response = match client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                warn!(channel, error = %err, "preview fetch failed");
                return Ok(Vec::new());
            }
        };
        if !response.status().is_success() {
            warn!(channel, status = %response.status(), "preview fetch rejected");
            return Ok(Vec::new());
        }
        let html = match response.text().await {
            Ok(html) => html,
            Err(err) => {
                warn!(channel, error = %err, "preview body read failed");
                return Ok(Vec::new());
            }
        };

        let messages = self.parse_preview(channel, &html);
        debug!(channel, count = messages.len(), "fetched recent messages");
        Ok(messages)
    }
}

/// Fixed in-memory source, used by tests and one-shot extraction
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    messages: Vec<SourceMessage>,
}

impl StaticSource {
    pub fn new(messages: Vec<SourceMessage>) -> Self {
        Self { messages }
    }
}

#[async_trait]
impl MessageSource for StaticSource {
    async fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    async fn disconnect(&mut self) {}

    async fn fetch_recent(&self, channel: &str) -> Result<Vec<SourceMessage>> {
        Ok(self
            .messages
            .iter()
            .filter(|message| message.channel.is_empty() || message.channel == channel)
            .cloned()
            .collect())
    }
}
