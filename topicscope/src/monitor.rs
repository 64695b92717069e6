use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use common::MonitoringConfig;

use crate::error::MonitorError;
use crate::model::{ContentItem, MonitoringResult, RawRecord, SourceMetadata, SourceType};

/// Contract every source adapter implements.
///
/// Adapters only know how to talk to their source; deduplication, date
/// filtering, timing and failure handling live in [`Monitor::monitor`].
#[async_trait::async_trait]
pub trait SourceMonitor: Send + Sync {
    /// Fetch raw, source-native records. May perform network I/O.
    async fn fetch_content(&self) -> Result<Vec<RawRecord>>;

    /// Turn one raw record into a `ContentItem`. Must be deterministic.
    fn parse_content(&self, raw: &RawRecord) -> Result<ContentItem>;

    /// Whether the source can filter server-side (e.g. by date or query)
    fn supports_filtering(&self) -> bool {
        false
    }
}

/// Per-monitor knobs applied by the factory
#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub fetch_timeout: Option<Duration>,
    /// Seen ids older than this are forgotten. `None` keeps them forever.
    pub seen_retention: Option<chrono::Duration>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            fetch_timeout: Some(Duration::from_secs(30)),
            seen_retention: Some(chrono::Duration::hours(24)),
        }
    }
}

impl From<&MonitoringConfig> for MonitorSettings {
    fn from(cfg: &MonitoringConfig) -> Self {
        let defaults = MonitorSettings::default();
        Self {
            fetch_timeout: cfg
                .fetch_timeout_seconds
                .map(Duration::from_secs)
                .or(defaults.fetch_timeout),
            seen_retention: cfg
                .seen_retention_hours
                .map(|h| chrono::Duration::hours(h as i64))
                .or(defaults.seen_retention),
        }
    }
}

/// Running counters of one monitor instance. Never reset automatically.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MonitorMetrics {
    pub total_fetches: u64,
    pub total_items: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub avg_fetch_time: f64,
}

impl MonitorMetrics {
    fn record(&mut self, success: bool, new_items: usize, fetch_time: f64) {
        self.total_fetches += 1;
        self.total_items += new_items as u64;
        if success {
            self.success_count += 1;
        } else {
            self.error_count += 1;
        }
        let n = self.total_fetches as f64;
        self.avg_fetch_time = (self.avg_fetch_time * (n - 1.0) + fetch_time) / n;
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_fetches == 0 {
            0.0
        } else {
            self.error_count as f64 / self.total_fetches as f64
        }
    }

    pub fn success_rate(&self) -> f64 {
        if self.total_fetches == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_fetches as f64
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    #[serde(flatten)]
    pub counters: MonitorMetrics,
    pub error_rate: f64,
    pub success_rate: f64,
}

/// Read-only view of a monitor for observability
#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub source_id: String,
    pub source_name: String,
    pub source_type: SourceType,
    pub authority_score: f64,
    pub update_frequency: String,
    pub topics: BTreeSet<String>,
    pub last_check: Option<DateTime<Utc>>,
    pub seen_items: usize,
    pub metrics: MetricsSnapshot,
}

/// One source's adapter plus the state the monitoring contract needs:
/// the seen-item set and the metrics accumulator.
///
/// `monitor` takes `&mut self`, so calls on one instance are serialized;
/// separate instances share nothing and can run concurrently.
pub struct Monitor {
    metadata: SourceMetadata,
    source: Box<dyn SourceMonitor>,
    settings: MonitorSettings,
    seen: HashMap<(String, String), DateTime<Utc>>,
    metrics: MonitorMetrics,
    last_check: Option<DateTime<Utc>>,
}

impl Monitor {
    pub fn new(metadata: SourceMetadata, source: Box<dyn SourceMonitor>) -> Self {
        Self::with_settings(metadata, source, MonitorSettings::default())
    }

    pub fn with_settings(
        metadata: SourceMetadata,
        source: Box<dyn SourceMonitor>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            metadata,
            source,
            settings,
            seen: HashMap::new(),
            metrics: MonitorMetrics::default(),
            last_check: None,
        }
    }

    pub fn metadata(&self) -> &SourceMetadata {
        &self.metadata
    }

    pub fn source_id(&self) -> &str {
        &self.metadata.source_id
    }

    pub fn metrics(&self) -> &MonitorMetrics {
        &self.metrics
    }

    /// Fetch, parse, date-filter and dedup one batch from the source.
    ///
    /// Never returns an error: fetch failures and timeouts produce a result with
    /// `success == false`, records that fail to parse are skipped and listed in
    /// `parse_errors`.
    pub async fn monitor(&mut self, since: Option<DateTime<Utc>>) -> MonitoringResult {
        let started = Instant::now();
        let now = Utc::now();
        self.last_check = Some(now);
        info!(source_id = %self.metadata.source_id, "starting monitor for {}", self.metadata.source_name);

        let fetched = self.fetch_with_timeout().await;
        let records = match fetched {
            Ok(records) => records,
            Err(e) => {
                let fetch_time = started.elapsed().as_secs_f64();
                self.metrics.record(false, 0, fetch_time);
                warn!(source_id = %self.metadata.source_id, error = %e, "monitor failed");
                return MonitoringResult::failure(e.to_string(), fetch_time);
            }
        };

        self.prune_seen(now);

        let items_found = records.len();
        let mut new_items = Vec::new();
        let mut parse_errors = Vec::new();

        for (index, raw) in records.iter().enumerate() {
            let item = match self.source.parse_content(raw) {
                Ok(item) => item,
                Err(reason) => {
                    let e = MonitorError::Parse { index, reason };
                    debug!(source_id = %self.metadata.source_id, error = %e, "skipping record");
                    parse_errors.push(e.to_string());
                    continue;
                }
            };

            if let Some(cutoff) = since {
                if item.published_date < cutoff {
                    continue;
                }
            }

            let key = (item.source_id.clone(), item.dedup_key());
            if self.seen.contains_key(&key) {
                continue;
            }
            self.seen.insert(key, now);
            new_items.push(item);
        }

        let fetch_time = started.elapsed().as_secs_f64();
        self.metrics.record(true, new_items.len(), fetch_time);

        let mut performance_metrics = BTreeMap::new();
        performance_metrics.insert("fetch_time".to_string(), fetch_time);
        performance_metrics.insert(
            "items_per_second".to_string(),
            if fetch_time > 0.0 {
                items_found as f64 / fetch_time
            } else {
                0.0
            },
        );

        let error = match parse_errors.len() {
            0 => None,
            n => Some(format!(
                "{} of {} records failed to parse; first: {}",
                n, items_found, parse_errors[0]
            )),
        };

        info!(
            source_id = %self.metadata.source_id,
            items_found,
            new_items = new_items.len(),
            parse_errors = parse_errors.len(),
            "monitor complete"
        );

        MonitoringResult {
            success: true,
            items_found,
            new_items,
            performance_metrics,
            error,
            parse_errors,
            timestamp: now,
        }
    }

    async fn fetch_with_timeout(&self) -> Result<Vec<RawRecord>, MonitorError> {
        match self.settings.fetch_timeout {
            Some(limit) => match tokio::time::timeout(limit, self.source.fetch_content()).await {
                Ok(result) => result.map_err(MonitorError::Fetch),
                Err(_) => Err(MonitorError::Timeout(limit)),
            },
            None => self.source.fetch_content().await.map_err(MonitorError::Fetch),
        }
    }

    fn prune_seen(&mut self, now: DateTime<Utc>) {
        if let Some(retention) = self.settings.seen_retention {
            let cutoff = now - retention;
            self.seen.retain(|_, first_seen| *first_seen > cutoff);
        }
    }

    /// Check that the source is reachable by performing one fetch.
    /// Does not touch the seen set or the metrics.
    pub async fn validate_source(&self) -> bool {
        match self.fetch_with_timeout().await {
            Ok(_) => true,
            Err(e) => {
                warn!(source_id = %self.metadata.source_id, error = %e, "source validation failed");
                false
            }
        }
    }

    /// Drop items from the seen set so the next `monitor` call returns them again.
    /// Returns how many entries were removed.
    pub fn forget(&mut self, items: &[ContentItem]) -> usize {
        let before = self.seen.len();
        for item in items {
            self.seen.remove(&(item.source_id.clone(), item.dedup_key()));
        }
        let forgotten = before - self.seen.len();
        if forgotten > 0 {
            debug!(source_id = %self.metadata.source_id, forgotten, "forgot seen items");
        }
        forgotten
    }

    pub fn supports_filtering(&self) -> bool {
        self.source.supports_filtering()
    }

    pub fn supports_real_time(&self) -> bool {
        self.metadata.update_frequency == "realtime"
    }

    pub fn get_source_info(&self) -> SourceInfo {
        SourceInfo {
            source_id: self.metadata.source_id.clone(),
            source_name: self.metadata.source_name.clone(),
            source_type: self.metadata.source_type.clone(),
            authority_score: self.metadata.authority_score,
            update_frequency: self.metadata.update_frequency.clone(),
            topics: self.metadata.topics.clone(),
            last_check: self.last_check,
            seen_items: self.seen.len(),
            metrics: MetricsSnapshot {
                counters: self.metrics.clone(),
                error_rate: self.metrics.error_rate(),
                success_rate: self.metrics.success_rate(),
            },
        }
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("source_id", &self.metadata.source_id)
            .field("source_type", &self.metadata.source_type)
            .field("seen", &self.seen.len())
            .field("metrics", &self.metrics)
            .finish()
    }
}
