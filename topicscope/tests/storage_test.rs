use chrono::{Duration, Utc};
use tempfile::TempDir;

use common::init_db_pool;
use topicscope::model::{ContentItem, ItemExtras, PriorityLevel, SourceMetadata, SourceType};
use topicscope::storage::StorageManager;

// Each test gets its own database file; the TempDir guard must outlive the storage.
async fn setup_storage() -> (TempDir, StorageManager) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("topics.db");
    let storage = StorageManager::open(&path.to_string_lossy())
        .await
        .expect("open storage");
    (dir, storage)
}

fn item(id: &str, source: &str, title: &str) -> ContentItem {
    let mut item = ContentItem::new(id, source, title, Utc::now());
    item.url = Some(format!("https://www.example.com/{}", id));
    item.topics = vec!["ai".to_string()];
    item
}

fn transcript(id: &str, channel: &str, views: u64) -> ContentItem {
    let mut it = item(id, "youtube", &format!("Video {}", id));
    it.extras = ItemExtras::Transcript {
        video_id: id.to_string(),
        channel: Some(channel.to_string()),
        duration: None,
        view_count: Some(views),
        like_count: None,
        language: Some("en".into()),
    };
    it
}

fn repository(name: &str, stars: u64, language: &str) -> ContentItem {
    let mut it = item(name, "github", name);
    it.url = Some(format!("https://github.com/{}", name));
    it.extras = ItemExtras::Repository {
        repo_name: name.to_string(),
        stars,
        forks: stars / 10,
        language: Some(language.to_string()),
        license: None,
        open_issues: 0,
    };
    it
}

fn search_hit(id: &str, query: &str, relevance: f64) -> ContentItem {
    let mut it = item(id, "search", &format!("Result {}", id));
    it.extras = ItemExtras::SearchResult {
        query: query.to_string(),
        rank: None,
        relevance: Some(relevance),
        domain: Some("www.docs.rs".to_string()),
    };
    it
}

#[tokio::test]
async fn test_upsert_keeps_one_record_with_latest_score() {
    let (_dir, storage) = setup_storage().await;
    let it = item("a1", "src", "First title");

    assert!(storage.store_content(&it, 0.3, PriorityLevel::Low).await.expect("store"));
    let first = storage
        .get_recent_items(None, 10, None)
        .await
        .expect("load")
        .remove(0);

    let mut updated = it.clone();
    updated.title = "Updated title".into();
    assert!(storage
        .store_content(&updated, 0.9, PriorityLevel::Critical)
        .await
        .expect("store again"));

    let rows = storage.get_recent_items(None, 10, None).await.expect("load");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].title, "Updated title");
    assert_eq!(rows[0].priority_score, Some(0.9));
    assert_eq!(rows[0].level(), PriorityLevel::Critical);
    assert_eq!(rows[0].ingested_at, first.ingested_at);
    assert!(rows[0].updated_at.is_some());
    assert_eq!(storage.get_item_count(None).await.expect("count"), 1);
}

#[tokio::test]
async fn test_same_item_id_in_two_sources_is_two_records() {
    let (_dir, storage) = setup_storage().await;
    storage
        .store_content(&item("42", "left", "L"), 0.5, PriorityLevel::Medium)
        .await
        .expect("store");
    storage
        .store_content(&item("42", "right", "R"), 0.5, PriorityLevel::Medium)
        .await
        .expect("store");
    assert_eq!(storage.get_item_count(None).await.expect("count"), 2);
}

#[tokio::test]
async fn test_validation_failures_return_false() {
    let (_dir, storage) = setup_storage().await;

    let untitled = item("u", "src", "");
    assert!(!storage.store_content(&untitled, 0.5, PriorityLevel::Medium).await.expect("no io error"));

    let orphan = item("o", "", "Orphan");
    assert!(!storage.store_content(&orphan, 0.5, PriorityLevel::Medium).await.expect("no io error"));

    let good = item("g", "src", "Good");
    assert!(!storage.store_content(&good, 1.5, PriorityLevel::Critical).await.expect("no io error"));
    assert!(!storage.store_content(&good, f64::NAN, PriorityLevel::Low).await.expect("no io error"));

    assert_eq!(storage.get_item_count(None).await.expect("count"), 0);
}

#[tokio::test]
async fn test_database_failure_is_an_error_not_a_rejection() {
    let (_dir, storage) = setup_storage().await;
    storage.pool().close().await;

    let err = storage
        .store_content(&item("x", "src", "Valid title"), 0.5, PriorityLevel::Medium)
        .await
        .expect_err("closed pool must surface as an error");
    assert!(format!("{:#}", err).contains("failed to begin transaction"));

    // Validation still runs first and never touches the database
    assert!(!storage
        .store_content(&item("y", "src", ""), 0.5, PriorityLevel::Medium)
        .await
        .expect("validation needs no connection"));
}

#[tokio::test]
async fn test_statistics_fill_every_priority_level() {
    let (_dir, storage) = setup_storage().await;

    let stats = storage.get_statistics().await.expect("stats");
    assert_eq!(stats.total_items, 0);
    assert_eq!(stats.items_by_priority.len(), 4);
    assert!(stats.items_by_priority.values().all(|c| *c == 0));

    storage.store_content(&item("1", "s", "One"), 0.9, PriorityLevel::Critical).await.expect("store");
    storage.store_content(&item("2", "s", "Two"), 0.75, PriorityLevel::High).await.expect("store");
    storage.store_content(&item("3", "s", "Three"), 0.72, PriorityLevel::High).await.expect("store");

    // A row written by an older version with a level that no longer exists
    sqlx::query(
        "INSERT INTO content_items (item_id, source_id, title, priority_level, ingested_at) VALUES ('legacy', 's', 'Old', 'archive', ?)",
    )
    .bind(Utc::now())
    .execute(storage.pool())
    .await
    .expect("insert legacy row");

    let stats = storage.get_statistics().await.expect("stats");
    assert_eq!(stats.total_items, 4);
    assert_eq!(stats.items_last_24h, 4);
    assert_eq!(stats.items_by_priority.len(), 4);
    assert_eq!(stats.items_by_priority[&PriorityLevel::Critical], 1);
    assert_eq!(stats.items_by_priority[&PriorityLevel::High], 2);
    assert_eq!(stats.items_by_priority[&PriorityLevel::Medium], 0);
    assert_eq!(stats.items_by_priority[&PriorityLevel::Low], 1);
    assert_eq!(stats.items_by_priority.values().sum::<i64>(), stats.total_items);
    assert_eq!(stats.topics_monitored, 1);
    assert_eq!(stats.top_topics[0].topic, "ai");
    assert_eq!(stats.top_topics[0].items, 3);
}

#[tokio::test]
async fn test_migration_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("topics.db").to_string_lossy().to_string();

    let storage = StorageManager::open(&path).await.expect("first open");
    assert_eq!(storage.migrate_schema().await.expect("migrate again"), 0);
    storage.store_content(&item("1", "s", "One"), 0.5, PriorityLevel::Medium).await.expect("store");
    drop(storage);

    let reopened = StorageManager::open(&path).await.expect("second open");
    assert_eq!(reopened.get_item_count(None).await.expect("count"), 1);
}

#[tokio::test]
async fn test_legacy_table_gains_extension_columns() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("legacy.db").to_string_lossy().to_string();
    let pool = init_db_pool(&path).await.expect("pool");

    sqlx::query(
        r#"
        CREATE TABLE content_items (
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
            collected_date TIMESTAMP
        );
        "#,
    )
    .execute(&pool)
    .await
    .expect("create legacy table");
    sqlx::query(
        "INSERT INTO content_items (item_id, source_id, title, published_date, topics, priority_score, priority_level) VALUES ('old', 'rss', 'Old row', ?, '[\"ai\"]', 0.6, 'medium')",
    )
    .bind(Utc::now() - Duration::days(3))
    .execute(&pool)
    .await
    .expect("insert legacy row");

    let storage = StorageManager::new(pool).await.expect("migrate legacy store");
    assert_eq!(storage.migrate_schema().await.expect("rerun"), 0);

    let rows = storage.get_recent_items(None, 10, None).await.expect("load");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].item_id, "old");
    assert!(rows[0].content_type.is_none());
    assert!(rows[0].github_stars.is_none());
    assert!(rows[0].ingested_at.is_none());
    assert_eq!(rows[0].topics(), vec!["ai"]);

    assert!(storage
        .store_content(&repository("rust-lang/rust", 90_000, "Rust"), 0.8, PriorityLevel::High)
        .await
        .expect("store into migrated table"));
    let stats = storage.get_statistics().await.expect("stats");
    assert_eq!(stats.total_items, 2);
    assert_eq!(stats.items_by_priority.values().sum::<i64>(), 2);
}

#[tokio::test]
async fn test_concurrent_upserts_do_not_duplicate() {
    let (_dir, storage) = setup_storage().await;

    let mut handles = Vec::new();
    for i in 0..10 {
        let storage = storage.clone();
        handles.push(tokio::spawn(async move {
            let shared = item("shared", "src", "Shared item");
            let score = i as f64 / 10.0;
            storage
                .store_content(&shared, score, PriorityLevel::Medium)
                .await
                .expect("store shared");
            storage
                .store_content(&item(&format!("own-{}", i), "src", "Own"), score, PriorityLevel::Low)
                .await
                .expect("store own");
        }));
    }
    for handle in handles {
        handle.await.expect("task");
    }

    assert_eq!(storage.get_item_count(None).await.expect("count"), 11);
    let shared: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM content_items WHERE source_id = 'src' AND item_id = 'shared'",
    )
    .fetch_one(storage.pool())
    .await
    .expect("count shared");
    assert_eq!(shared, 1);
}

#[tokio::test]
async fn test_mcp_analytics_rankings() {
    let (_dir, storage) = setup_storage().await;

    let items = vec![
        (transcript("v1", "Small Channel", 100), 0.5, PriorityLevel::Medium),
        (transcript("v2", "Small Channel", 300), 0.5, PriorityLevel::Medium),
        (transcript("v3", "Big Channel", 5_000), 0.7, PriorityLevel::High),
        (repository("tokio-rs/tokio", 25_000, "Rust"), 0.8, PriorityLevel::High),
        (repository("psf/requests", 50_000, "Python"), 0.8, PriorityLevel::High),
        (repository("serde-rs/serde", 9_000, "Rust"), 0.6, PriorityLevel::Medium),
        (search_hit("s1", "rust async", 0.4), 0.4, PriorityLevel::Low),
        (search_hit("s2", "sqlx upsert", 0.9), 0.4, PriorityLevel::Low),
        (item("plain", "blog", "Plain post"), 0.2, PriorityLevel::Low),
    ];
    assert_eq!(storage.store_content_batch(&items).await.expect("batch"), 9);

    let analytics = storage.get_mcp_analytics().await.expect("analytics");

    assert_eq!(analytics.content_by_mcp_type["youtube_transcript"], 3);
    assert_eq!(analytics.content_by_mcp_type["github_repository"], 3);
    assert_eq!(analytics.content_by_mcp_type["web_search"], 2);
    assert_eq!(analytics.content_by_mcp_type["generic"], 1);

    assert_eq!(analytics.top_youtube_channels[0].channel, "Big Channel");
    assert_eq!(analytics.top_youtube_channels[1].videos, 2);
    assert_eq!(analytics.top_youtube_channels[1].total_views, 400);
    assert!((analytics.top_youtube_channels[1].avg_views - 200.0).abs() < 1e-9);

    let repos: Vec<&str> = analytics.top_github_repos.iter().map(|r| r.repo.as_str()).collect();
    assert_eq!(repos, vec!["psf/requests", "tokio-rs/tokio", "serde-rs/serde"]);

    assert_eq!(analytics.programming_languages[0].language, "Rust");
    assert_eq!(analytics.programming_languages[0].repositories, 2);

    assert_eq!(analytics.top_search_queries[0].query, "sqlx upsert");

    let docs = analytics
        .top_web_domains
        .iter()
        .find(|d| d.domain == "docs.rs")
        .expect("search domain recorded without www");
    assert_eq!(docs.items, 2);
    assert!(analytics.top_web_domains.iter().all(|d| !d.domain.starts_with("www.")));
    assert!(analytics.top_web_domains.len() <= 50);
}

#[tokio::test]
async fn test_content_by_source_type_is_most_recent_first() {
    let (_dir, storage) = setup_storage().await;
    let now = Utc::now();

    for (i, hours) in [5, 1, 3].iter().enumerate() {
        let mut repo = repository(&format!("org/repo{}", i), 10, "Go");
        repo.published_date = now - Duration::hours(*hours);
        storage.store_content(&repo, 0.5, PriorityLevel::Medium).await.expect("store");
    }

    let rows = storage
        .get_content_by_source_type("github_repository", 2)
        .await
        .expect("load");
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].github_repo_name.as_deref(), Some("org/repo1"));
    assert_eq!(rows[1].github_repo_name.as_deref(), Some("org/repo2"));
    assert!(matches!(rows[0].extras(), ItemExtras::Repository { .. }));

    // Registered source types resolve through the sources table
    let mut meta = SourceMetadata::new("blog", "Blog", SourceType::Rss);
    meta.source_url = Some("https://example.com/feed.xml".into());
    storage.upsert_source(&meta).await.expect("source");
    storage
        .store_content(&item("p1", "blog", "Post"), 0.5, PriorityLevel::Medium)
        .await
        .expect("store");
    let rss = storage.get_content_by_source_type("rss", 10).await.expect("load");
    assert_eq!(rss.len(), 1);
    assert_eq!(rss[0].source_id, "blog");
}

#[tokio::test]
async fn test_recent_items_filters_topic_and_priority() {
    let (_dir, storage) = setup_storage().await;

    let mut rust = item("r", "s", "Rust news");
    rust.topics = vec!["rust".into()];
    storage.store_content(&rust, 0.9, PriorityLevel::Critical).await.expect("store");
    storage.store_content(&item("a", "s", "AI news"), 0.8, PriorityLevel::High).await.expect("store");
    storage.store_content(&item("b", "s", "AI minor"), 0.2, PriorityLevel::Low).await.expect("store");

    let ai = storage.get_recent_items(Some("ai"), 10, None).await.expect("load");
    assert_eq!(ai.len(), 2);

    let important = storage
        .get_recent_items(None, 10, Some(PriorityLevel::High))
        .await
        .expect("load");
    assert_eq!(important.len(), 2);
    assert!(important.iter().all(|r| r.level() >= PriorityLevel::High));

    let ai_important = storage
        .get_recent_items(Some("ai"), 10, Some(PriorityLevel::High))
        .await
        .expect("load");
    assert_eq!(ai_important.len(), 1);
    assert_eq!(ai_important[0].item_id, "a");

    assert_eq!(
        storage
            .get_item_count(Some(Utc::now() + Duration::hours(1)))
            .await
            .expect("count"),
        0
    );
}

#[tokio::test]
async fn test_topic_stats_and_metrics_accumulate() {
    let (_dir, storage) = setup_storage().await;

    storage.update_topic_stats("rust", 3, 1, 0).await.expect("stats");
    storage.update_topic_stats("rust", 2, 0, 1).await.expect("stats");
    assert_eq!(
        storage.get_topic_stats("rust").await.expect("load"),
        Some((5, 1, 1))
    );
    assert_eq!(storage.get_topic_stats("missing").await.expect("load"), None);

    storage
        .save_metric("performance", "fetch_time", 0.25, Some("src"))
        .await
        .expect("metric");
    let metrics: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM metrics WHERE source_id = 'src'")
        .fetch_one(storage.pool())
        .await
        .expect("count metrics");
    assert_eq!(metrics, 1);
}
