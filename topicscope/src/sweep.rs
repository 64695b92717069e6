//! One orchestrated pass over every configured monitor.
//!
//! Monitors run concurrently; their results are then filtered, scored and
//! stored one source at a time. A failing source only shows up in its own
//! [`SourceOutcome`]. Storage I/O errors abort the sweep; items that were not
//! persisted are forgotten by their monitors so the next sweep returns them.

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, error, info, warn};

use crate::model::{MonitoringResult, PriorityLevel};
use crate::monitor::Monitor;
use crate::prioritizer::{ContentPrioritizer, Strategy};
use crate::relevance::RelevanceFilter;
use crate::storage::StorageManager;

#[derive(Debug, Clone, Default)]
pub struct SweepOptions {
    /// Store items the relevance filter rejected instead of dropping them
    pub keep_irrelevant: bool,
    /// Overrides the prioritizer's configured strategy
    pub strategy: Option<Strategy>,
}

/// What happened to one source during a sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SourceOutcome {
    pub source_id: String,
    pub success: bool,
    pub items_found: usize,
    pub new_items: usize,
    pub relevant_items: usize,
    pub stored_items: usize,
    /// Refused by storage validation
    pub rejected_items: usize,
    pub parse_errors: usize,
    pub fetch_time: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SweepReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per monitor, in input order
    pub outcomes: Vec<SourceOutcome>,
    pub stored_by_priority: BTreeMap<PriorityLevel, usize>,
}

impl SweepReport {
    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn total_stored(&self) -> usize {
        self.outcomes.iter().map(|o| o.stored_items).sum()
    }
}

pub async fn run_sweep(
    monitors: &mut [Monitor],
    filter: &RelevanceFilter,
    prioritizer: &ContentPrioritizer,
    storage: &StorageManager,
    since: Option<DateTime<Utc>>,
    options: &SweepOptions,
) -> Result<SweepReport> {
    let started_at = Utc::now();
    info!("Starting sweep over {} sources", monitors.len());

    for monitor in monitors.iter() {
        storage.upsert_source(monitor.metadata()).await?;
    }

    let results: Vec<MonitoringResult> =
        join_all(monitors.iter_mut().map(|m| m.monitor(since))).await;

    let mut outcomes = Vec::with_capacity(results.len());
    let mut stored_by_priority: BTreeMap<PriorityLevel, usize> =
        PriorityLevel::ALL.iter().map(|level| (*level, 0)).collect();

    for index in 0..results.len() {
        let swept = sweep_source(
            &monitors[index],
            &results[index],
            filter,
            prioritizer,
            storage,
            options,
            &mut stored_by_priority,
        )
        .await;

        match swept {
            Ok(outcome) => outcomes.push(outcome),
            Err(failure) => {
                // Unstored items must come back on the next sweep
                let mut forgotten = monitors[index]
                    .forget(&results[index].new_items[failure.first_unstored..]);
                for (monitor, result) in monitors[index + 1..].iter_mut().zip(&results[index + 1..]) {
                    forgotten += monitor.forget(&result.new_items);
                }
                error!(
                    source_id = %monitors[index].source_id(),
                    forgotten,
                    error = %failure.error,
                    "storage failed, aborting sweep"
                );
                return Err(failure.error);
            }
        }
    }

    let report = SweepReport {
        started_at,
        finished_at: Utc::now(),
        outcomes,
        stored_by_priority,
    };
    info!(
        "Sweep finished: {} ok, {} failed, {} items stored",
        report.succeeded(),
        report.failed(),
        report.total_stored()
    );
    Ok(report)
}

/// A storage error raised while sweeping one source, with the position of
/// the first new item that was not persisted.
struct StoreFailure {
    error: anyhow::Error,
    first_unstored: usize,
}

async fn sweep_source(
    monitor: &Monitor,
    result: &MonitoringResult,
    filter: &RelevanceFilter,
    prioritizer: &ContentPrioritizer,
    storage: &StorageManager,
    options: &SweepOptions,
    stored_by_priority: &mut BTreeMap<PriorityLevel, usize>,
) -> std::result::Result<SourceOutcome, StoreFailure> {
    let source_id = monitor.source_id().to_string();
    let mut outcome = SourceOutcome {
        source_id: source_id.clone(),
        success: result.success,
        items_found: result.items_found,
        new_items: result.new_items.len(),
        relevant_items: 0,
        stored_items: 0,
        rejected_items: 0,
        parse_errors: result.parse_errors.len(),
        fetch_time: result.fetch_time(),
        error: result.error.clone(),
    };
    let mut critical = 0;

    for (position, item) in result.new_items.iter().enumerate() {
        let verdict = filter.check_item(item);
        if verdict.is_relevant {
            outcome.relevant_items += 1;
        } else if !options.keep_irrelevant {
            debug!(source_id = %source_id, item_id = %item.item_id, reason = %verdict.reason, "dropped");
            continue;
        }

        let priority = match options.strategy {
            Some(strategy) => prioritizer.prioritize_with(item, strategy),
            None => prioritizer.prioritize(item),
        };

        let stored = storage
            .store_content(item, priority.total_score, priority.priority_level)
            .await
            .map_err(|error| StoreFailure {
                error,
                first_unstored: position,
            })?;
        if stored {
            outcome.stored_items += 1;
            *stored_by_priority.entry(priority.priority_level).or_insert(0) += 1;
            if priority.priority_level == PriorityLevel::Critical {
                critical += 1;
            }
        } else {
            outcome.rejected_items += 1;
        }
    }

    // Every item is persisted from here on; later failures leave nothing to retry
    let settled = |error| StoreFailure {
        error,
        first_unstored: result.new_items.len(),
    };
    let error_increment = i64::from(!result.success);
    for topic in &monitor.metadata().topics {
        storage
            .update_topic_stats(topic, outcome.stored_items as i64, critical, error_increment)
            .await
            .map_err(settled)?;
    }
    storage
        .save_metric("performance", "fetch_time", outcome.fetch_time, Some(&source_id))
        .await
        .map_err(settled)?;

    if outcome.success {
        info!(
            source_id = %source_id,
            found = outcome.items_found,
            new = outcome.new_items,
            stored = outcome.stored_items,
            "source swept"
        );
    } else {
        warn!(source_id = %source_id, error = ?outcome.error, "source failed");
    }
    Ok(outcome)
}
