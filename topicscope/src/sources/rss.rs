use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use common::MonitoringConfig;

use crate::factory::SourceMonitorFactory;
use crate::model::{ContentItem, RawRecord, SourceMetadata, SourceType};
use crate::monitor::SourceMonitor;

/// HTTP knobs of the feed fetcher.
#[derive(Debug, Clone)]
pub struct RssOptions {
    pub timeout: Duration,
    pub user_agent: String,
    pub max_retries: u32,
    /// Delay before the first retry; doubles on every further attempt
    pub retry_base: Duration,
}

impl Default for RssOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: format!("Topicscope/{}", env!("CARGO_PKG_VERSION")),
            max_retries: 3,
            retry_base: Duration::from_secs(1),
        }
    }
}

impl From<&MonitoringConfig> for RssOptions {
    fn from(cfg: &MonitoringConfig) -> Self {
        let d = RssOptions::default();
        Self {
            timeout: cfg.fetch_timeout_seconds.map(Duration::from_secs).unwrap_or(d.timeout),
            user_agent: cfg.user_agent.clone().unwrap_or(d.user_agent),
            max_retries: cfg.max_retries.unwrap_or(d.max_retries).max(1),
            retry_base: d.retry_base,
        }
    }
}

/// RSS/Atom/JSON Feed adapter.
///
/// `fetch_content` emits one JSON record per feed entry:
/// `{id, title, link, summary, content, published, author, categories}`.
#[derive(Debug, Clone)]
pub struct RssMonitor {
    source_id: String,
    feed_url: String,
    source_topics: Vec<String>,
    client: Client,
    options: RssOptions,
}

impl RssMonitor {
    pub fn new(metadata: &SourceMetadata) -> Result<Self> {
        Self::with_options(metadata, &RssOptions::default())
    }

    pub fn with_options(metadata: &SourceMetadata, options: &RssOptions) -> Result<Self> {
        let feed_url = metadata
            .source_url
            .clone()
            .filter(|u| !u.trim().is_empty())
            .ok_or_else(|| anyhow!("rss source '{}' has no source_url", metadata.source_id))?;
        url::Url::parse(&feed_url).with_context(|| format!("invalid feed url: {}", feed_url))?;

        let client = Client::builder()
            .timeout(options.timeout)
            .user_agent(options.user_agent.clone())
            .build()
            .context("failed to build reqwest client")?;

        Ok(Self {
            source_id: metadata.source_id.clone(),
            feed_url,
            source_topics: metadata.topics.iter().cloned().collect(),
            client,
            options: options.clone(),
        })
    }

    /// Download the feed body, retrying on 5xx, 429 and network errors.
    async fn fetch_feed_bytes(&self) -> Result<Vec<u8>> {
        let max_retries = self.options.max_retries.max(1);
        let mut last_error = None;

        for attempt in 1..=max_retries {
            if attempt > 1 {
                let backoff = retry_backoff(self.options.retry_base, attempt);
                info!(
                    "Retrying feed fetch for {} (attempt {}/{}) after {:?}...",
                    self.feed_url, attempt, max_retries, backoff
                );
                tokio::time::sleep(backoff).await;
            }

            match self.client.get(&self.feed_url).send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let bytes = response.bytes().await.context("failed to read response body")?;
                        return Ok(bytes.to_vec());
                    } else if status.is_server_error() {
                        last_error = Some(anyhow!("server error: {}", status));
                    } else if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        last_error = Some(anyhow!("rate limited: {}", status));
                    } else {
                        bail!("feed fetch failed with status: {}", status);
                    }
                }
                Err(e) => {
                    last_error = Some(anyhow::Error::new(e).context("network error during fetch"));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow!("unknown error after retries")))
    }
}

#[async_trait::async_trait]
impl SourceMonitor for RssMonitor {
    async fn fetch_content(&self) -> Result<Vec<RawRecord>> {
        let bytes = self.fetch_feed_bytes().await?;
        let feed = parser::parse(bytes.as_slice()).context("failed to parse feed")?;
        let fetched_at = Utc::now();
        debug!(source_id = %self.source_id, entries = feed.entries.len(), "feed parsed");
        Ok(feed
            .entries
            .iter()
            .map(|entry| entry_to_record(entry, fetched_at))
            .collect())
    }

    fn parse_content(&self, raw: &RawRecord) -> Result<ContentItem> {
        let title = str_field(raw, "title")
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or_else(|| anyhow!("entry has no title"))?;

        let published = str_field(raw, "published")
            .ok_or_else(|| anyhow!("entry has no date"))?;
        let published_date = DateTime::parse_from_rfc3339(published)
            .with_context(|| format!("invalid entry date: {}", published))?
            .with_timezone(&Utc);

        let link = str_field(raw, "link").map(str::to_string);
        let item_id = str_field(raw, "id")
            .map(str::to_string)
            .or_else(|| link.clone())
            .unwrap_or_default();

        let html = str_field(raw, "content")
            .filter(|c| !c.trim().is_empty())
            .or_else(|| str_field(raw, "summary"));
        let content = html.map(html_to_text);

        let mut topics: Vec<String> = raw
            .get("categories")
            .and_then(Value::as_array)
            .map(|cats| {
                cats.iter()
                    .filter_map(Value::as_str)
                    .map(|c| c.trim().to_lowercase())
                    .filter(|c| !c.is_empty())
                    .collect()
            })
            .unwrap_or_default();
        for topic in &self.source_topics {
            if !topics.contains(topic) {
                topics.push(topic.clone());
            }
        }

        let mut item = ContentItem::new(item_id, self.source_id.clone(), title, published_date);
        item.url = link;
        item.content = content;
        item.author = str_field(raw, "author").map(str::to_string);
        item.topics = topics;
        item.metadata
            .insert("feed_url".to_string(), Value::String(self.feed_url.clone()));
        Ok(item)
    }
}

/// Entries without any date are stamped with the fetch time so parsing stays deterministic.
fn entry_to_record(entry: &Entry, fetched_at: DateTime<Utc>) -> RawRecord {
    let published = entry.published.or(entry.updated).unwrap_or(fetched_at);
    json!({
        "id": entry.id,
        "title": entry.title.as_ref().map(|t| t.content.clone()),
        "link": entry.links.first().map(|l| l.href.clone()),
        "summary": entry.summary.as_ref().map(|s| s.content.clone()),
        "content": entry.content.as_ref().and_then(|c| c.body.clone()),
        "published": published.to_rfc3339(),
        "author": entry.authors.first().map(|a| a.name.clone()),
        "categories": entry.categories.iter().map(|c| c.term.clone()).collect::<Vec<_>>(),
    })
}

/// Delay before `attempt` (2-based): `base`, then doubling, saturating on large counts.
fn retry_backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(2)))
}

fn str_field<'a>(raw: &'a RawRecord, key: &str) -> Option<&'a str> {
    raw.get(key).and_then(Value::as_str)
}

fn html_to_text(html: &str) -> String {
    match html2text::from_read(html.as_bytes(), 80) {
        Ok(text) => text.trim().to_string(),
        Err(e) => {
            warn!("failed to convert entry HTML to text: {}", e);
            html.to_string()
        }
    }
}

/// Register the RSS adapter for `SourceType::Rss`.
pub fn register_rss(factory: &mut SourceMonitorFactory, options: RssOptions) {
    factory.register_monitor(SourceType::Rss, move |metadata| {
        let monitor = RssMonitor::with_options(metadata, &options)?;
        Ok(Box::new(monitor) as Box<dyn SourceMonitor>)
    });
}
