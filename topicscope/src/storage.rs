use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::model::{ContentItem, ItemExtras, PriorityLevel, SourceMetadata};

/// Upper bound for every ranked analytics list. Consumers slice further.
pub const ANALYTICS_LIMIT: i64 = 50;

/// Columns added after the base layout. Rows that predate a column keep NULL.
const EXTENSION_COLUMNS: &[(&str, &str)] = &[
    ("ingested_at", "TIMESTAMP"),
    ("updated_at", "TIMESTAMP"),
    ("extras", "TEXT"),
    ("content_type", "TEXT"),
    ("youtube_video_id", "TEXT"),
    ("youtube_channel", "TEXT"),
    ("youtube_view_count", "INTEGER"),
    ("github_repo_name", "TEXT"),
    ("github_stars", "INTEGER"),
    ("github_forks", "INTEGER"),
    ("github_language", "TEXT"),
    ("search_query", "TEXT"),
    ("search_relevance", "REAL"),
    ("web_domain", "TEXT"),
];

const RECORD_COLUMNS: &str = "item_id, source_id, title, content, url, published_date, author, \
     topics, metadata, extras, priority_score, priority_level, ingested_at, updated_at, \
     content_type, youtube_video_id, youtube_channel, youtube_view_count, github_repo_name, \
     github_stars, github_forks, github_language, search_query, search_relevance, web_domain";

/// A row of `content_items`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct StoredRecord {
    pub item_id: String,
    pub source_id: String,
    pub title: String,
    pub content: Option<String>,
    pub url: Option<String>,
    pub published_date: Option<DateTime<Utc>>,
    pub author: Option<String>,
    /// JSON array
    pub topics: Option<String>,
    /// JSON object
    pub metadata: Option<String>,
    /// JSON of `ItemExtras`
    pub extras: Option<String>,
    pub priority_score: Option<f64>,
    pub priority_level: Option<String>,
    pub ingested_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub content_type: Option<String>,
    pub youtube_video_id: Option<String>,
    pub youtube_channel: Option<String>,
    pub youtube_view_count: Option<i64>,
    pub github_repo_name: Option<String>,
    pub github_stars: Option<i64>,
    pub github_forks: Option<i64>,
    pub github_language: Option<String>,
    pub search_query: Option<String>,
    pub search_relevance: Option<f64>,
    pub web_domain: Option<String>,
}

impl StoredRecord {
    pub fn topics(&self) -> Vec<String> {
        self.topics
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }

    pub fn metadata(&self) -> serde_json::Map<String, serde_json::Value> {
        self.metadata
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }

    pub fn extras(&self) -> ItemExtras {
        self.extras
            .as_deref()
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or_default()
    }

    /// Stored level; unknown or missing values read as low.
    pub fn level(&self) -> PriorityLevel {
        self.priority_level
            .as_deref()
            .and_then(|s| s.parse().ok())
            .unwrap_or(PriorityLevel::Low)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct TopicCount {
    pub topic: String,
    pub items: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Statistics {
    pub total_items: i64,
    pub topics_monitored: i64,
    pub items_last_24h: i64,
    /// Always holds all four levels
    pub items_by_priority: BTreeMap<PriorityLevel, i64>,
    pub top_topics: Vec<TopicCount>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct ChannelStats {
    pub channel: String,
    pub videos: i64,
    pub total_views: i64,
    pub avg_views: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct RepositoryStats {
    pub repo: String,
    pub stars: i64,
    pub forks: i64,
    pub language: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct LanguageCount {
    pub language: String,
    pub repositories: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct QueryStats {
    pub query: String,
    pub results: i64,
    pub avg_relevance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, sqlx::FromRow)]
pub struct DomainCount {
    pub domain: String,
    pub items: i64,
}

/// Per-family analytics; every list is ranked and holds at most `ANALYTICS_LIMIT` entries.
#[derive(Debug, Clone, Serialize)]
pub struct McpAnalytics {
    pub content_by_mcp_type: BTreeMap<String, i64>,
    /// By total views
    pub top_youtube_channels: Vec<ChannelStats>,
    /// By stars
    pub top_github_repos: Vec<RepositoryStats>,
    /// By repository count
    pub programming_languages: Vec<LanguageCount>,
    /// By average relevance
    pub top_search_queries: Vec<QueryStats>,
    /// By item count
    pub top_web_domains: Vec<DomainCount>,
}

/// Sole owner of the persisted record set.
#[derive(Debug, Clone)]
pub struct StorageManager {
    pool: SqlitePool,
}

impl StorageManager {
    /// Open (or create) the database file and bring its schema up to date.
    pub async fn open(path: &str) -> Result<Self> {
        let pool = common::init_db_pool(path).await?;
        Self::new(pool).await
    }

    pub async fn new(pool: SqlitePool) -> Result<Self> {
        let storage = Self { pool };
        storage.ensure_schema().await?;
        storage.migrate_schema().await?;
        Ok(storage)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema(&self) -> Result<()> {
        debug!("storage: ensuring DB schema (CREATE TABLE IF NOT EXISTS ...)");
        let stmts = [
            r#"
            CREATE TABLE IF NOT EXISTS sources (
                source_id TEXT PRIMARY KEY,
                source_name TEXT NOT NULL,
                source_type TEXT NOT NULL,
                source_url TEXT,
                authority_score REAL DEFAULT 0.5,
                update_frequency TEXT DEFAULT 'daily',
                topics TEXT,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS content_items (
                item_id TEXT NOT NULL,
                source_id TEXT NOT NULL,
                title TEXT NOT NULL,
                content TEXT,
                url TEXT,
                published_date TIMESTAMP,
                author TEXT,
                topics TEXT,
                metadata TEXT,
                priority_score REAL,
                priority_level TEXT,
                ingested_at TIMESTAMP
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS topics (
                topic_slug TEXT PRIMARY KEY,
                topic_name TEXT NOT NULL,
                last_monitored TIMESTAMP,
                items_collected INTEGER DEFAULT 0,
                critical_items INTEGER DEFAULT 0,
                error_count INTEGER DEFAULT 0,
                created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            );
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                metric_type TEXT NOT NULL,
                metric_name TEXT NOT NULL,
                metric_value REAL,
                topic_slug TEXT,
                source_id TEXT,
                recorded_at TIMESTAMP NOT NULL
            );
            "#,
            "CREATE INDEX IF NOT EXISTS idx_items_published ON content_items(published_date DESC);",
            "CREATE INDEX IF NOT EXISTS idx_items_priority ON content_items(priority_level, priority_score DESC);",
        ];

        for stmt in stmts {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to execute schema statement: {}", stmt.trim()))?;
        }
        Ok(())
    }

    /// Add missing extension columns and the dedup index.
    ///
    /// Safe to run on an up-to-date store; returns the number of columns added.
    pub async fn migrate_schema(&self) -> Result<usize> {
        let mut added = 0;
        for (name, sql_type) in EXTENSION_COLUMNS {
            let exists = sqlx::query_scalar::<_, i64>(
                "SELECT COUNT(*) FROM pragma_table_info('content_items') WHERE name = ?",
            )
            .bind(*name)
            .fetch_one(&self.pool)
            .await
            .context("failed to inspect content_items columns")?
                > 0;
            if exists {
                continue;
            }

            sqlx::query(&format!(
                "ALTER TABLE content_items ADD COLUMN {} {}",
                name, sql_type
            ))
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to add column content_items.{}", name))?;
            info!("storage: added column content_items.{}", name);
            added += 1;
        }

        for stmt in [
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_items_dedup ON content_items(source_id, item_id);",
            "CREATE INDEX IF NOT EXISTS idx_items_content_type ON content_items(content_type);",
        ] {
            sqlx::query(stmt)
                .execute(&self.pool)
                .await
                .with_context(|| format!("failed to create index: {}", stmt))?;
        }

        if added > 0 {
            info!("storage: schema migration added {} columns", added);
        }
        Ok(added)
    }

    /// Insert or update one item keyed by (source_id, dedup key).
    ///
    /// `Ok(false)` means the item was rejected by validation and nothing was written.
    /// Database failures are returned as errors.
    pub async fn store_content(
        &self,
        item: &ContentItem,
        priority_score: f64,
        priority_level: PriorityLevel,
    ) -> Result<bool> {
        if let Err(reason) = validate_item(item, priority_score) {
            warn!(source_id = %item.source_id, item_id = %item.item_id, "rejected item: {}", reason);
            return Ok(false);
        }

        let now = Utc::now();
        let item_id = item.dedup_key();
        let topics = serde_json::to_string(&item.topics).context("failed to serialize topics")?;
        let metadata =
            serde_json::to_string(&item.metadata).context("failed to serialize metadata")?;
        let extras = serde_json::to_string(&item.extras).context("failed to serialize extras")?;
        let columns = ExtensionValues::from_item(item);

        let mut tx = self.pool.begin().await.context("failed to begin transaction")?;

        sqlx::query(
            r#"
            INSERT INTO content_items (
                item_id, source_id, title, content, url, published_date, author,
                topics, metadata, extras, priority_score, priority_level, ingested_at, updated_at,
                content_type, youtube_video_id, youtube_channel, youtube_view_count,
                github_repo_name, github_stars, github_forks, github_language,
                search_query, search_relevance, web_domain
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id, item_id) DO UPDATE SET
                title = excluded.title,
                content = excluded.content,
                url = excluded.url,
                published_date = excluded.published_date,
                author = excluded.author,
                topics = excluded.topics,
                metadata = excluded.metadata,
                extras = excluded.extras,
                priority_score = excluded.priority_score,
                priority_level = excluded.priority_level,
                updated_at = excluded.updated_at,
                content_type = excluded.content_type,
                youtube_video_id = excluded.youtube_video_id,
                youtube_channel = excluded.youtube_channel,
                youtube_view_count = excluded.youtube_view_count,
                github_repo_name = excluded.github_repo_name,
                github_stars = excluded.github_stars,
                github_forks = excluded.github_forks,
                github_language = excluded.github_language,
                search_query = excluded.search_query,
                search_relevance = excluded.search_relevance,
                web_domain = excluded.web_domain
            "#,
        )
        .bind(&item_id)
        .bind(&item.source_id)
        .bind(&item.title)
        .bind(&item.content)
        .bind(&item.url)
        .bind(item.published_date)
        .bind(&item.author)
        .bind(&topics)
        .bind(&metadata)
        .bind(&extras)
        .bind(priority_score)
        .bind(priority_level.as_str())
        .bind(now)
        .bind(now)
        .bind(item.content_family())
        .bind(&columns.youtube_video_id)
        .bind(&columns.youtube_channel)
        .bind(columns.youtube_view_count)
        .bind(&columns.github_repo_name)
        .bind(columns.github_stars)
        .bind(columns.github_forks)
        .bind(&columns.github_language)
        .bind(&columns.search_query)
        .bind(columns.search_relevance)
        .bind(&columns.web_domain)
        .execute(&mut *tx)
        .await
        .context("failed to upsert content item")?;

        for topic in &item.topics {
            sqlx::query(
                "INSERT INTO topics (topic_slug, topic_name) VALUES (?, ?) ON CONFLICT(topic_slug) DO NOTHING",
            )
            .bind(topic)
            .bind(topic)
            .execute(&mut *tx)
            .await
            .context("failed to register topic")?;
        }

        tx.commit().await.context("failed to commit content item")?;
        debug!(source_id = %item.source_id, item_id = %item_id, level = %priority_level, "stored item");
        Ok(true)
    }

    /// Store several scored items; returns how many were accepted.
    pub async fn store_content_batch(
        &self,
        items: &[(ContentItem, f64, PriorityLevel)],
    ) -> Result<usize> {
        let mut stored = 0;
        for (item, score, level) in items {
            if self.store_content(item, *score, *level).await? {
                stored += 1;
            }
        }
        info!("Stored {}/{} items", stored, items.len());
        Ok(stored)
    }

    pub async fn get_statistics(&self) -> Result<Statistics> {
        let total_items = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM content_items")
            .fetch_one(&self.pool)
            .await
            .context("failed to count items")?;

        let topics_monitored = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM topics")
            .fetch_one(&self.pool)
            .await
            .context("failed to count topics")?;

        let items_last_24h = self.get_item_count(Some(Utc::now() - Duration::hours(24))).await?;

        let rows = sqlx::query_as::<_, (Option<String>, i64)>(
            "SELECT priority_level, COUNT(*) FROM content_items GROUP BY priority_level",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to count items by priority")?;

        let mut items_by_priority: BTreeMap<PriorityLevel, i64> =
            PriorityLevel::ALL.iter().map(|level| (*level, 0)).collect();
        for (level, count) in rows {
            let level = level
                .as_deref()
                .and_then(|s| s.parse().ok())
                .unwrap_or(PriorityLevel::Low);
            *items_by_priority.entry(level).or_insert(0) += count;
        }

        let top_topics = sqlx::query_as::<_, TopicCount>(
            r#"
            SELECT j.value AS topic, COUNT(*) AS items
            FROM content_items, json_each(content_items.topics) AS j
            WHERE json_valid(content_items.topics)
            GROUP BY j.value
            ORDER BY items DESC, topic ASC
            LIMIT 5
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to rank topics")?;

        Ok(Statistics {
            total_items,
            topics_monitored,
            items_last_24h,
            items_by_priority,
            top_topics,
        })
    }

    pub async fn get_mcp_analytics(&self) -> Result<McpAnalytics> {
        let content_by_mcp_type = sqlx::query_as::<_, (String, i64)>(
            "SELECT COALESCE(content_type, 'generic') AS family, COUNT(*) FROM content_items GROUP BY family",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to count items by content type")?
        .into_iter()
        .collect();

        let top_youtube_channels = sqlx::query_as::<_, ChannelStats>(
            r#"
            SELECT youtube_channel AS channel,
                   COUNT(*) AS videos,
                   CAST(COALESCE(SUM(youtube_view_count), 0) AS INTEGER) AS total_views,
                   CAST(COALESCE(AVG(youtube_view_count), 0) AS REAL) AS avg_views
            FROM content_items
            WHERE youtube_channel IS NOT NULL
            GROUP BY youtube_channel
            ORDER BY total_views DESC, channel ASC
            LIMIT ?
            "#,
        )
        .bind(ANALYTICS_LIMIT)
        .fetch_all(&self.pool)
        .await
        .context("failed to rank channels")?;

        let top_github_repos = sqlx::query_as::<_, RepositoryStats>(
            r#"
            SELECT github_repo_name AS repo,
                   CAST(MAX(COALESCE(github_stars, 0)) AS INTEGER) AS stars,
                   CAST(MAX(COALESCE(github_forks, 0)) AS INTEGER) AS forks,
                   MAX(github_language) AS language
            FROM content_items
            WHERE github_repo_name IS NOT NULL
            GROUP BY github_repo_name
            ORDER BY stars DESC, repo ASC
            LIMIT ?
            "#,
        )
        .bind(ANALYTICS_LIMIT)
        .fetch_all(&self.pool)
        .await
        .context("failed to rank repositories")?;

        let programming_languages = sqlx::query_as::<_, LanguageCount>(
            r#"
            SELECT github_language AS language, COUNT(DISTINCT github_repo_name) AS repositories
            FROM content_items
            WHERE github_language IS NOT NULL
            GROUP BY github_language
            ORDER BY repositories DESC, language ASC
            LIMIT ?
            "#,
        )
        .bind(ANALYTICS_LIMIT)
        .fetch_all(&self.pool)
        .await
        .context("failed to rank languages")?;

        let top_search_queries = sqlx::query_as::<_, QueryStats>(
            r#"
            SELECT search_query AS query,
                   COUNT(*) AS results,
                   CAST(COALESCE(AVG(search_relevance), 0) AS REAL) AS avg_relevance
            FROM content_items
            WHERE search_query IS NOT NULL
            GROUP BY search_query
            ORDER BY avg_relevance DESC, results DESC, query ASC
            LIMIT ?
            "#,
        )
        .bind(ANALYTICS_LIMIT)
        .fetch_all(&self.pool)
        .await
        .context("failed to rank search queries")?;

        let top_web_domains = sqlx::query_as::<_, DomainCount>(
            r#"
            SELECT web_domain AS domain, COUNT(*) AS items
            FROM content_items
            WHERE web_domain IS NOT NULL
            GROUP BY web_domain
            ORDER BY items DESC, domain ASC
            LIMIT ?
            "#,
        )
        .bind(ANALYTICS_LIMIT)
        .fetch_all(&self.pool)
        .await
        .context("failed to rank web domains")?;

        Ok(McpAnalytics {
            content_by_mcp_type,
            top_youtube_channels,
            top_github_repos,
            programming_languages,
            top_search_queries,
            top_web_domains,
        })
    }

    /// Most recent items of a content family ("youtube_transcript", ...) or of a
    /// registered source type ("rss", ...).
    pub async fn get_content_by_source_type(
        &self,
        source_type: &str,
        limit: i64,
    ) -> Result<Vec<StoredRecord>> {
        let sql = format!(
            r#"
            SELECT {}
            FROM content_items
            WHERE content_type = ?1
               OR source_id IN (SELECT source_id FROM sources WHERE source_type = ?1)
            ORDER BY published_date DESC
            LIMIT ?2
            "#,
            RECORD_COLUMNS
        );
        sqlx::query_as::<_, StoredRecord>(&sql)
            .bind(source_type)
            .bind(limit.max(0))
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("failed to load content for source type {}", source_type))
    }

    /// Most recent items, optionally restricted to a topic and a minimum level.
    pub async fn get_recent_items(
        &self,
        topic: Option<&str>,
        limit: i64,
        min_priority: Option<PriorityLevel>,
    ) -> Result<Vec<StoredRecord>> {
        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM content_items WHERE 1 = 1", RECORD_COLUMNS));

        if let Some(topic) = topic {
            qb.push(
                " AND json_valid(topics) AND EXISTS (SELECT 1 FROM json_each(content_items.topics) WHERE value = ",
            );
            qb.push_bind(topic.to_string());
            qb.push(")");
        }

        if let Some(min) = min_priority {
            qb.push(" AND priority_level IN (");
            let mut levels = qb.separated(", ");
            for level in PriorityLevel::ALL.iter().filter(|l| **l >= min) {
                levels.push_bind(level.as_str());
            }
            levels.push_unseparated(")");
        }

        qb.push(" ORDER BY published_date DESC LIMIT ");
        qb.push_bind(limit.max(0));

        qb.build_query_as::<StoredRecord>()
            .fetch_all(&self.pool)
            .await
            .context("failed to load recent items")
    }

    /// Number of stored items, optionally only those ingested after `since`.
    pub async fn get_item_count(&self, since: Option<DateTime<Utc>>) -> Result<i64> {
        let count = match since {
            Some(since) => {
                sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM content_items WHERE ingested_at > ?",
                )
                .bind(since)
                .fetch_one(&self.pool)
                .await
            }
            None => {
                sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM content_items")
                    .fetch_one(&self.pool)
                    .await
            }
        }
        .context("failed to count items")?;
        Ok(count)
    }

    pub async fn upsert_source(&self, source: &SourceMetadata) -> Result<()> {
        let topics = serde_json::to_string(&source.topics).context("failed to serialize topics")?;
        sqlx::query(
            r#"
            INSERT INTO sources (source_id, source_name, source_type, source_url, authority_score, update_frequency, topics)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(source_id) DO UPDATE SET
                source_name = excluded.source_name,
                source_type = excluded.source_type,
                source_url = excluded.source_url,
                authority_score = excluded.authority_score,
                update_frequency = excluded.update_frequency,
                topics = excluded.topics,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&source.source_id)
        .bind(&source.source_name)
        .bind(source.source_type.as_str())
        .bind(&source.source_url)
        .bind(source.authority_score)
        .bind(&source.update_frequency)
        .bind(&topics)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to upsert source {}", source.source_id))?;
        Ok(())
    }

    /// Add to the running counters of a topic, creating it if needed.
    pub async fn update_topic_stats(
        &self,
        topic_slug: &str,
        items_collected: i64,
        critical_items: i64,
        error_increment: i64,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO topics (topic_slug, topic_name, items_collected, critical_items, error_count, last_monitored)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(topic_slug) DO UPDATE SET
                items_collected = items_collected + excluded.items_collected,
                critical_items = critical_items + excluded.critical_items,
                error_count = error_count + excluded.error_count,
                last_monitored = excluded.last_monitored,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(topic_slug)
        .bind(topic_slug)
        .bind(items_collected)
        .bind(critical_items)
        .bind(error_increment)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to update stats for topic {}", topic_slug))?;
        Ok(())
    }

    /// Running totals of one topic: (items_collected, critical_items, error_count).
    pub async fn get_topic_stats(&self, topic_slug: &str) -> Result<Option<(i64, i64, i64)>> {
        sqlx::query_as::<_, (i64, i64, i64)>(
            "SELECT items_collected, critical_items, error_count FROM topics WHERE topic_slug = ?",
        )
        .bind(topic_slug)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load topic stats")
    }

    pub async fn save_metric(
        &self,
        metric_type: &str,
        metric_name: &str,
        value: f64,
        source_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO metrics (metric_type, metric_name, metric_value, source_id, recorded_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(metric_type)
        .bind(metric_name)
        .bind(value)
        .bind(source_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .context("failed to save metric")?;
        Ok(())
    }
}

fn validate_item(item: &ContentItem, priority_score: f64) -> std::result::Result<(), &'static str> {
    if item.source_id.trim().is_empty() {
        return Err("missing source_id");
    }
    if item.title.trim().is_empty() {
        return Err("missing title");
    }
    if !priority_score.is_finite() || !(0.0..=1.0).contains(&priority_score) {
        return Err("priority score outside [0, 1]");
    }
    Ok(())
}

/// Family-specific column values of one item.
#[derive(Default)]
struct ExtensionValues {
    youtube_video_id: Option<String>,
    youtube_channel: Option<String>,
    youtube_view_count: Option<i64>,
    github_repo_name: Option<String>,
    github_stars: Option<i64>,
    github_forks: Option<i64>,
    github_language: Option<String>,
    search_query: Option<String>,
    search_relevance: Option<f64>,
    web_domain: Option<String>,
}

impl ExtensionValues {
    fn from_item(item: &ContentItem) -> Self {
        let clamp = |v: u64| i64::try_from(v).unwrap_or(i64::MAX);
        let mut values = ExtensionValues {
            web_domain: item.url.as_deref().and_then(domain_of),
            ..Default::default()
        };

        match &item.extras {
            ItemExtras::Plain => {}
            ItemExtras::Transcript {
                video_id,
                channel,
                view_count,
                ..
            } => {
                values.youtube_video_id = Some(video_id.clone());
                values.youtube_channel = channel.clone();
                values.youtube_view_count = view_count.map(clamp);
            }
            ItemExtras::Repository {
                repo_name,
                stars,
                forks,
                language,
                ..
            } => {
                values.github_repo_name = Some(repo_name.clone());
                values.github_stars = Some(clamp(*stars));
                values.github_forks = Some(clamp(*forks));
                values.github_language = language.clone();
            }
            ItemExtras::SearchResult {
                query,
                relevance,
                domain,
                ..
            } => {
                values.search_query = Some(query.clone());
                values.search_relevance = *relevance;
                if let Some(domain) = domain {
                    values.web_domain = Some(strip_www(domain));
                }
            }
        }
        values
    }
}

fn domain_of(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(strip_www))
}

fn strip_www(host: &str) -> String {
    let host = host.to_ascii_lowercase();
    host.strip_prefix("www.").unwrap_or(&host).to_string()
}
