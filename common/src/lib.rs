/*!
common/src/lib.rs

Shared configuration types, DB and logging helpers for Topicscope.

This file provides:
- Config data structures (deserialized from TOML)
- An async loader for a TOML config file, with default/override merging
- A helper to initialize an SQLite connection pool
- A helper to install the tracing subscriber
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing_subscriber::{fmt, EnvFilter};

/// Database configuration section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the sqlite database file (e.g. "data/topicscope.db")
    pub path: String,
    pub max_connections: Option<u32>,
    pub busy_timeout_seconds: Option<u64>,
}

/// Monitoring / fetching configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Upper bound for a single `fetch_content` call. Missing means no timeout.
    pub fetch_timeout_seconds: Option<u64>,
    /// How long a monitor remembers item ids it has already emitted.
    pub seen_retention_hours: Option<u64>,
    pub max_retries: Option<u32>,
    pub user_agent: Option<String>,
}

/// Scoring weights and priority thresholds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub w_authority: Option<f64>,
    pub w_recency: Option<f64>,
    pub w_topic: Option<f64>,
    pub w_engagement: Option<f64>,
    pub w_uniqueness: Option<f64>,
    pub w_completeness: Option<f64>,
    pub w_actionability: Option<f64>,
    pub w_cross_topic: Option<f64>,
    pub threshold_medium: Option<f64>,
    pub threshold_high: Option<f64>,
    pub threshold_critical: Option<f64>,
    /// Content value halves every `half_life_hours`
    pub half_life_hours: Option<f64>,
    /// Authority used for sources with no configured score
    pub default_authority: Option<f64>,
    /// Strategy name: "default", "news", "technical", "social"
    pub strategy: Option<String>,
}

/// Keyword lists for the relevance filter. Any list left out keeps the built-in defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelevanceConfig {
    pub relevant_topics: Option<Vec<String>>,
    pub irrelevant_topics: Option<Vec<String>>,
    pub high_value_keywords: Option<Vec<String>>,
    pub boilerplate_markers: Option<Vec<String>>,
    pub min_score: Option<f64>,
}

/// One monitored source, as written in the `[[sources]]` section
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    pub name: String,
    /// Source type tag ("rss", "api", ...)
    #[serde(rename = "type")]
    pub source_type: String,
    pub url: Option<String>,
    pub authority: Option<f64>,
    pub update_frequency: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
}

/// Top-level application configuration (deserialized from config.toml)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub monitoring: Option<MonitoringConfig>,
    pub scoring: Option<ScoringConfig>,
    pub relevance: Option<RelevanceConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

impl Config {
    /// Load configuration from a TOML file asynchronously.
    ///
    /// Example:
    ///   let cfg = Config::from_file("config.toml").await?;
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = tokio::fs::read_to_string(path.as_ref())
            .await
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let cfg: Config = toml::from_str(&data).context("Failed to parse TOML configuration")?;
        Ok(cfg)
    }

    /// Load configuration with an optional default file and an optional override file.
    /// If both are present, they are merged (override takes precedence).
    pub async fn load_with_defaults(default_path: Option<&Path>, override_path: Option<&Path>) -> Result<Self> {
        let mut config_value = toml::Value::Table(toml::map::Map::new());

        for path in [default_path, override_path].into_iter().flatten() {
            if !path.exists() {
                continue;
            }
            let data = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config: {}", path.display()))?;
            let val: toml::Value = toml::from_str(&data)
                .with_context(|| format!("Failed to parse configuration: {}", path.display()))?;
            merge_toml(&mut config_value, val);
        }

        let cfg: Config = config_value.try_into().context("Failed to parse merged configuration")?;
        Ok(cfg)
    }

    pub fn monitoring(&self) -> MonitoringConfig {
        self.monitoring.clone().unwrap_or_default()
    }

    pub fn scoring(&self) -> ScoringConfig {
        self.scoring.clone().unwrap_or_default()
    }

    pub fn relevance(&self) -> RelevanceConfig {
        self.relevance.clone().unwrap_or_default()
    }
}

fn merge_toml(a: &mut toml::Value, b: toml::Value) {
    match (a, b) {
        (toml::Value::Table(a_map), toml::Value::Table(b_map)) => {
            for (k, v) in b_map {
                if let Some(a_val) = a_map.get_mut(&k) {
                    merge_toml(a_val, v);
                } else {
                    a_map.insert(k, v);
                }
            }
        }
        (a_val, b_val) => *a_val = b_val,
    }
}

/// Initialize an SQLite connection pool.
///
/// This function will create the parent directory if necessary and return a configured
/// `SqlitePool` in WAL mode. Several monitor pipelines write concurrently, so the busy
/// timeout makes a writer wait for the lock instead of failing with SQLITE_BUSY.
/// Defaults:
/// - max_connections: 5
/// - busy_timeout: 10s
///
/// Example:
///   let pool = init_db_pool("data/topicscope.db").await?;
pub async fn init_db_pool(path: &str) -> Result<SqlitePool> {
    init_db_pool_with(&DatabaseConfig {
        path: path.to_string(),
        max_connections: None,
        busy_timeout_seconds: None,
    })
    .await
}

/// Same as [`init_db_pool`] but honours every field of the `[database]` section.
pub async fn init_db_pool_with(config: &DatabaseConfig) -> Result<SqlitePool> {
    let path = config.path.as_str();

    // Ensure parent directory exists
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            tokio::fs::create_dir_all(parent).await.with_context(|| {
                format!("Failed to create DB parent directory: {}", parent.display())
            })?;
        }
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(config.busy_timeout_seconds.unwrap_or(10)));

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections.unwrap_or(5))
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to connect to sqlite database at path: {}", path))?;

    tracing::debug!(db_path = %path, "sqlite pool ready");
    Ok(pool)
}

/// Install the global tracing subscriber.
///
/// `level` accepts anything `EnvFilter` understands ("info", "topicscope=debug", ...);
/// an unparsable value falls back to "info". Calling it twice is harmless.
pub fn init_tracing(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}
