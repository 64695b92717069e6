use std::time::Duration;

use crate::model::SourceType;

/// Setup defects: unknown source types, malformed metadata, inconsistent scoring tables.
/// These fail loudly at construction time instead of surfacing during a sweep.
#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("no monitor registered for source type: {0}")]
    UnregisteredSourceType(SourceType),

    #[error("invalid metadata for source '{source_id}': {reason}")]
    InvalidMetadata { source_id: String, reason: String },

    #[error("failed to construct monitor for source '{source_id}': {reason}")]
    Construction { source_id: String, reason: String },

    #[error("invalid priority thresholds: {0}")]
    InvalidThresholds(String),

    #[error("invalid scoring weights: {0}")]
    InvalidWeights(String),

    #[error("unknown scoring strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid relevance pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Why a single `monitor()` call, or one record inside it, failed.
/// Only ever rendered into `MonitoringResult::error`; it never escapes a sweep.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("Fetch error: {0:#}")]
    Fetch(anyhow::Error),

    #[error("Timeout: fetch exceeded {0:?}")]
    Timeout(Duration),

    #[error("Parse error: record {index}: {reason:#}")]
    Parse { index: usize, reason: anyhow::Error },
}
