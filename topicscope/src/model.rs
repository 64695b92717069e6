//! Shared data model: source descriptors, normalized content items and the
//! per-call monitoring result handed back to the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use common::SourceConfig;

use crate::error::ConfigurationError;

/// Raw, source-native record as returned by `SourceMonitor::fetch_content`.
pub type RawRecord = serde_json::Value;

pub const FAMILY_GENERIC: &str = "generic";
pub const FAMILY_TRANSCRIPT: &str = "youtube_transcript";
pub const FAMILY_REPOSITORY: &str = "github_repository";
pub const FAMILY_SEARCH: &str = "web_search";

/// Kind of content source. Each tag maps to exactly one registered monitor
/// implementation; `Other` lets adapters add types without touching this enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SourceType {
    Rss,
    Api,
    WebScraping,
    McpServer,
    SocialMedia,
    Database,
    FileSystem,
    Other(String),
}

impl SourceType {
    pub fn as_str(&self) -> &str {
        match self {
            SourceType::Rss => "rss",
            SourceType::Api => "api",
            SourceType::WebScraping => "web_scraping",
            SourceType::McpServer => "mcp_server",
            SourceType::SocialMedia => "social_media",
            SourceType::Database => "database",
            SourceType::FileSystem => "file_system",
            SourceType::Other(tag) => tag,
        }
    }
}

impl From<&str> for SourceType {
    fn from(tag: &str) -> Self {
        match tag.trim().to_ascii_lowercase().as_str() {
            "rss" => SourceType::Rss,
            "api" => SourceType::Api,
            "web_scraping" => SourceType::WebScraping,
            "mcp_server" => SourceType::McpServer,
            "social_media" => SourceType::SocialMedia,
            "database" => SourceType::Database,
            "file_system" => SourceType::FileSystem,
            other => SourceType::Other(other.to_string()),
        }
    }
}

impl From<String> for SourceType {
    fn from(tag: String) -> Self {
        SourceType::from(tag.as_str())
    }
}

impl From<SourceType> for String {
    fn from(source_type: SourceType) -> Self {
        source_type.as_str().to_string()
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable descriptor of a monitored source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceMetadata {
    pub source_id: String,
    pub source_name: String,
    pub source_type: SourceType,
    pub source_url: Option<String>,
    /// Externally curated trust weight in [0, 1]
    pub authority_score: f64,
    /// "realtime", "hourly", "daily", "weekly" (informational)
    pub update_frequency: String,
    pub topics: BTreeSet<String>,
}

impl SourceMetadata {
    pub fn new(
        source_id: impl Into<String>,
        source_name: impl Into<String>,
        source_type: SourceType,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_name: source_name.into(),
            source_type,
            source_url: None,
            authority_score: 0.5,
            update_frequency: "daily".to_string(),
            topics: BTreeSet::new(),
        }
    }

    /// Reject descriptors that cannot identify or weight a source.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidMetadata {
            source_id: self.source_id.clone(),
            reason: reason.to_string(),
        };

        if self.source_id.trim().is_empty() {
            return Err(invalid("source_id is empty"));
        }
        if self.source_name.trim().is_empty() {
            return Err(invalid("source_name is empty"));
        }
        if self.source_type.as_str().is_empty() {
            return Err(invalid("source_type is empty"));
        }
        if !(0.0..=1.0).contains(&self.authority_score) {
            return Err(invalid("authority_score must be within [0, 1]"));
        }
        Ok(())
    }
}

impl TryFrom<&SourceConfig> for SourceMetadata {
    type Error = ConfigurationError;

    fn try_from(cfg: &SourceConfig) -> Result<Self, Self::Error> {
        let metadata = SourceMetadata {
            source_id: cfg.id.clone(),
            source_name: cfg.name.clone(),
            source_type: SourceType::from(cfg.source_type.as_str()),
            source_url: cfg.url.clone(),
            authority_score: cfg.authority.unwrap_or(0.5),
            update_frequency: cfg
                .update_frequency
                .clone()
                .unwrap_or_else(|| "daily".to_string()),
            topics: cfg.topics.iter().cloned().collect(),
        };
        metadata.validate()?;
        Ok(metadata)
    }
}

/// Source-family specific fields of a content item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ItemExtras {
    #[default]
    Plain,
    Transcript {
        video_id: String,
        channel: Option<String>,
        duration: Option<String>,
        view_count: Option<u64>,
        like_count: Option<u64>,
        language: Option<String>,
    },
    Repository {
        repo_name: String,
        stars: u64,
        forks: u64,
        language: Option<String>,
        license: Option<String>,
        open_issues: u64,
    },
    SearchResult {
        query: String,
        rank: Option<u32>,
        relevance: Option<f64>,
        domain: Option<String>,
    },
}

impl ItemExtras {
    /// Family tag stored in the `content_type` column.
    pub fn family(&self) -> &'static str {
        match self {
            ItemExtras::Plain => FAMILY_GENERIC,
            ItemExtras::Transcript { .. } => FAMILY_TRANSCRIPT,
            ItemExtras::Repository { .. } => FAMILY_REPOSITORY,
            ItemExtras::SearchResult { .. } => FAMILY_SEARCH,
        }
    }
}

/// Normalized unit of content produced by a monitor's parse step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Source-local identifier. May be empty when the source has no stable id.
    pub item_id: String,
    pub source_id: String,
    pub title: String,
    pub content: Option<String>,
    pub url: Option<String>,
    pub published_date: DateTime<Utc>,
    pub author: Option<String>,
    pub topics: Vec<String>,
    #[serde(default)]
    pub extras: ItemExtras,
    /// Open key/value fallback for genuinely source-specific keys.
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ContentItem {
    pub fn new(
        item_id: impl Into<String>,
        source_id: impl Into<String>,
        title: impl Into<String>,
        published_date: DateTime<Utc>,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            source_id: source_id.into(),
            title: title.into(),
            content: None,
            url: None,
            published_date,
            author: None,
            topics: Vec::new(),
            extras: ItemExtras::Plain,
            metadata: serde_json::Map::new(),
        }
    }

    /// Identity of this item within its source. Falls back to a content hash
    /// when the source did not provide a stable `item_id`.
    pub fn dedup_key(&self) -> String {
        if !self.item_id.trim().is_empty() {
            return self.item_id.clone();
        }
        let mut hasher = Sha256::new();
        hasher.update(self.source_id.as_bytes());
        hasher.update(b"\n");
        hasher.update(self.title.trim().as_bytes());
        hasher.update(b"\n");
        hasher.update(self.url.as_deref().unwrap_or_default().as_bytes());
        format!("sha256:{:x}", hasher.finalize())
    }

    pub fn content_family(&self) -> &'static str {
        self.extras.family()
    }

    /// Numeric metadata value, if present and numeric.
    pub fn metadata_f64(&self, key: &str) -> Option<f64> {
        self.metadata.get(key).and_then(|v| v.as_f64())
    }
}

/// Outcome of one `Monitor::monitor` call.
#[derive(Debug, Clone, Serialize)]
pub struct MonitoringResult {
    pub success: bool,
    /// Number of records fetched, before date filtering and dedup
    pub items_found: usize,
    pub new_items: Vec<ContentItem>,
    /// Always contains "fetch_time" (seconds)
    pub performance_metrics: BTreeMap<String, f64>,
    pub error: Option<String>,
    pub parse_errors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl MonitoringResult {
    pub fn failure(error: impl Into<String>, fetch_time: f64) -> Self {
        let mut performance_metrics = BTreeMap::new();
        performance_metrics.insert("fetch_time".to_string(), fetch_time);
        Self {
            success: false,
            items_found: 0,
            new_items: Vec::new(),
            performance_metrics,
            error: Some(error.into()),
            parse_errors: Vec::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn fetch_time(&self) -> f64 {
        self.performance_metrics
            .get("fetch_time")
            .copied()
            .unwrap_or_default()
    }
}

/// Coarse priority bucket. Variant order follows score order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl PriorityLevel {
    pub const ALL: [PriorityLevel; 4] = [
        PriorityLevel::Low,
        PriorityLevel::Medium,
        PriorityLevel::High,
        PriorityLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PriorityLevel::Low => "low",
            PriorityLevel::Medium => "medium",
            PriorityLevel::High => "high",
            PriorityLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for PriorityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PriorityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(PriorityLevel::Low),
            "medium" => Ok(PriorityLevel::Medium),
            "high" => Ok(PriorityLevel::High),
            "critical" => Ok(PriorityLevel::Critical),
            other => Err(format!("unknown priority level: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn source_type_round_trips_through_tag() {
        assert_eq!(SourceType::from("RSS"), SourceType::Rss);
        assert_eq!(SourceType::from("web_scraping"), SourceType::WebScraping);
        assert_eq!(
            SourceType::from("podcast"),
            SourceType::Other("podcast".to_string())
        );
        let json = serde_json::to_string(&SourceType::McpServer).unwrap();
        assert_eq!(json, "\"mcp_server\"");
    }

    #[test]
    fn dedup_key_prefers_item_id() {
        let item = ContentItem::new("abc", "src", "Title", Utc::now());
        assert_eq!(item.dedup_key(), "abc");
    }

    #[test]
    fn dedup_key_hashes_when_id_missing() {
        let mut a = ContentItem::new("", "src", "Same title", Utc::now());
        a.url = Some("https://example.com/a".into());
        let mut b = a.clone();
        b.published_date = Utc::now() - chrono::Duration::hours(3);
        assert!(a.dedup_key().starts_with("sha256:"));
        assert_eq!(a.dedup_key(), b.dedup_key());

        let mut other_source = a.clone();
        other_source.source_id = "other".into();
        assert_ne!(a.dedup_key(), other_source.dedup_key());
    }

    #[test]
    fn metadata_from_config_validates_authority() {
        let mut cfg = SourceConfig {
            id: "hn".into(),
            name: "Hacker News".into(),
            source_type: "rss".into(),
            url: None,
            authority: Some(1.4),
            update_frequency: None,
            topics: vec!["ai".into()],
        };
        assert!(SourceMetadata::try_from(&cfg).is_err());

        cfg.authority = Some(0.9);
        let metadata = SourceMetadata::try_from(&cfg).expect("valid metadata");
        assert_eq!(metadata.source_type, SourceType::Rss);
        assert!(metadata.topics.contains("ai"));
    }

    #[test]
    fn extras_serialize_with_kind_tag() {
        let extras = ItemExtras::Repository {
            repo_name: "rust-lang/rust".into(),
            stars: 100,
            forks: 10,
            language: Some("Rust".into()),
            license: None,
            open_issues: 0,
        };
        let value = serde_json::to_value(&extras).unwrap();
        assert_eq!(value["kind"], "repository");
        assert_eq!(extras.family(), FAMILY_REPOSITORY);
    }

    #[test]
    fn priority_levels_are_ordered() {
        assert!(PriorityLevel::Low < PriorityLevel::Medium);
        assert!(PriorityLevel::High < PriorityLevel::Critical);
        assert_eq!("HIGH".parse::<PriorityLevel>(), Ok(PriorityLevel::High));
    }
}
