use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use sqlx::SqlitePool;

use topicscope::model::{ContentItem, PriorityLevel, RawRecord, SourceMetadata, SourceType};
use topicscope::monitor::{Monitor, SourceMonitor};
use topicscope::prioritizer::ContentPrioritizer;
use topicscope::relevance::RelevanceFilter;
use topicscope::storage::StorageManager;
use topicscope::sweep::{run_sweep, SweepOptions};

struct StaticSource {
    source_id: String,
    titles: Vec<&'static str>,
    fail: bool,
    /// Closed during the fetch, so storage breaks between monitoring and storing
    break_pool: Option<SqlitePool>,
}

#[async_trait::async_trait]
impl SourceMonitor for StaticSource {
    async fn fetch_content(&self) -> Result<Vec<RawRecord>> {
        if let Some(pool) = &self.break_pool {
            pool.close().await;
        }
        if self.fail {
            return Err(anyhow!("upstream returned 503"));
        }
        let now = Utc::now().to_rfc3339();
        Ok(self
            .titles
            .iter()
            .enumerate()
            .map(|(i, title)| json!({"id": format!("{}-{}", self.source_id, i), "title": title, "published": now}))
            .collect())
    }

    fn parse_content(&self, raw: &RawRecord) -> Result<ContentItem> {
        let published: DateTime<Utc> = raw["published"]
            .as_str()
            .ok_or_else(|| anyhow!("no date"))?
            .parse()?;
        let mut item = ContentItem::new(
            raw["id"].as_str().unwrap_or_default(),
            self.source_id.clone(),
            raw["title"].as_str().unwrap_or_default(),
            published,
        );
        item.topics = vec!["ai".to_string()];
        Ok(item)
    }
}

fn monitor(source_id: &str, titles: Vec<&'static str>, fail: bool) -> Monitor {
    let mut meta = SourceMetadata::new(source_id, source_id.to_uppercase(), SourceType::Api);
    meta.authority_score = 0.9;
    meta.topics.insert("ai".to_string());
    Monitor::new(
        meta,
        Box::new(StaticSource {
            source_id: source_id.to_string(),
            titles,
            fail,
            break_pool: None,
        }),
    )
}

async fn storage() -> (tempfile::TempDir, StorageManager) {
    common::init_tracing("topicscope=debug");
    let dir = tempfile::tempdir().expect("tempdir");
    let storage = StorageManager::open(&db_path(&dir)).await.expect("storage");
    (dir, storage)
}

fn db_path(dir: &tempfile::TempDir) -> String {
    dir.path().join("sweep.db").to_string_lossy().into_owned()
}

fn scorers(monitors: &[Monitor]) -> (RelevanceFilter, ContentPrioritizer) {
    let mut prioritizer = ContentPrioritizer::new();
    prioritizer.register_sources(monitors.iter().map(|m| m.metadata()));
    (RelevanceFilter::new(), prioritizer)
}

#[tokio::test]
async fn test_sweep_reports_every_source() {
    let (_dir, storage) = storage().await;
    let mut monitors = vec![
        monitor(
            "news",
            vec![
                "Claude Code update adds MCP server support",
                "Bitcoin price rallies again",
                "Prompt engineering guide for TypeScript developers",
            ],
            false,
        ),
        monitor("broken", vec!["never fetched"], true),
    ];
    let (filter, prioritizer) = scorers(&monitors);

    let report = run_sweep(
        &mut monitors,
        &filter,
        &prioritizer,
        &storage,
        None,
        &SweepOptions::default(),
    )
    .await
    .expect("sweep");

    assert_eq!(report.outcomes.len(), 2);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);

    let news = &report.outcomes[0];
    assert_eq!(news.source_id, "news");
    assert_eq!(news.items_found, 3);
    assert_eq!(news.new_items, 3);
    assert_eq!(news.relevant_items, 2);
    assert_eq!(news.stored_items, 2);

    let broken = &report.outcomes[1];
    assert!(!broken.success);
    assert!(broken.error.as_deref().unwrap_or_default().contains("503"));
    assert_eq!(broken.stored_items, 0);

    assert_eq!(report.total_stored(), 2);
    assert_eq!(report.stored_by_priority.len(), 4);
    assert_eq!(report.stored_by_priority.values().sum::<usize>(), 2);

    let stats = storage.get_statistics().await.expect("stats");
    assert_eq!(stats.total_items, 2);
    // Both sources carry the "ai" topic; only the broken one adds an error
    let critical = report.stored_by_priority[&PriorityLevel::Critical] as i64;
    assert_eq!(
        storage.get_topic_stats("ai").await.expect("topic"),
        Some((2, critical, 1))
    );
}

#[tokio::test]
async fn test_second_sweep_stores_nothing_new() {
    let (_dir, storage) = storage().await;
    let mut monitors = vec![monitor("news", vec!["LangChain agents with Claude"], false)];
    let (filter, prioritizer) = scorers(&monitors);
    let options = SweepOptions::default();

    let first = run_sweep(&mut monitors, &filter, &prioritizer, &storage, None, &options)
        .await
        .expect("first sweep");
    let second = run_sweep(&mut monitors, &filter, &prioritizer, &storage, None, &options)
        .await
        .expect("second sweep");

    assert_eq!(first.total_stored(), 1);
    assert_eq!(second.outcomes[0].items_found, 1);
    assert_eq!(second.outcomes[0].new_items, 0);
    assert_eq!(second.total_stored(), 0);
    assert_eq!(storage.get_item_count(None).await.expect("count"), 1);
}

#[tokio::test]
async fn test_keep_irrelevant_stores_everything() {
    let (_dir, storage) = storage().await;
    let mut monitors = vec![monitor(
        "mixed",
        vec!["Bitcoin price rallies again", "Gardening tips for spring"],
        false,
    )];
    let (filter, prioritizer) = scorers(&monitors);
    let options = SweepOptions {
        keep_irrelevant: true,
        ..SweepOptions::default()
    };

    let report = run_sweep(
        &mut monitors,
        &filter,
        &prioritizer,
        &storage,
        Some(Utc::now() - Duration::hours(1)),
        &options,
    )
    .await
    .expect("sweep");

    assert_eq!(report.outcomes[0].relevant_items, 0);
    assert_eq!(report.outcomes[0].stored_items, 2);
    assert_eq!(storage.get_item_count(None).await.expect("count"), 2);
}

#[tokio::test]
async fn test_storage_failure_keeps_unstored_items_for_next_sweep() {
    let (dir, broken_storage) = storage().await;
    let first = monitor("first", vec!["Claude Code update adds MCP server support"], false);
    let mut second_meta = first.metadata().clone();
    second_meta.source_id = "second".to_string();
    let second = Monitor::new(
        second_meta,
        Box::new(StaticSource {
            source_id: "second".to_string(),
            titles: vec!["LangChain agents with Claude"],
            fail: false,
            break_pool: Some(broken_storage.pool().clone()),
        }),
    );
    let mut monitors = vec![first, second];
    let (filter, prioritizer) = scorers(&monitors);
    let options = SweepOptions::default();

    let err = run_sweep(&mut monitors, &filter, &prioritizer, &broken_storage, None, &options)
        .await
        .expect_err("closed pool must fail the sweep");
    assert!(format!("{:#}", err).contains("closed"), "{:#}", err);
    assert!(monitors.iter().all(|m| m.get_source_info().seen_items == 0));

    let storage = StorageManager::open(&db_path(&dir)).await.expect("reopen");
    let retry = run_sweep(&mut monitors, &filter, &prioritizer, &storage, None, &options)
        .await
        .expect("retry sweep");

    assert_eq!(retry.outcomes[0].new_items, 1);
    assert_eq!(retry.outcomes[1].new_items, 1);
    assert_eq!(retry.total_stored(), 2);
    assert_eq!(storage.get_item_count(None).await.expect("count"), 2);
}
