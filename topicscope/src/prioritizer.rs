//! Priority scoring.
//!
//! Eight signals in [0, 1] are combined into a weighted average, and the
//! average is bucketed into a [`PriorityLevel`]. Weights and thresholds come
//! from the `[scoring]` config section. Strategies change how the signals are
//! derived, never how they are combined.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, info};

use common::ScoringConfig;

use crate::error::ConfigurationError;
use crate::model::{ContentItem, ItemExtras, PriorityLevel, SourceMetadata};

const BREAKING_INDICATORS: &[&str] = &["breaking", "just in", "alert", "urgent", "developing"];
const TECHNICAL_INDICATORS: &[&str] = &["tutorial", "guide", "documentation", "api", "example", "code"];

/// How signals are derived from an item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    #[default]
    Default,
    /// Recency in steps, breaking-news boost, authority weighs more
    News,
    /// Long-form content, slow decay, tutorials are actionable
    Technical,
    /// Views, shares and comments drive the score
    Social,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::Default => "default",
            Strategy::News => "news",
            Strategy::Technical => "technical",
            Strategy::Social => "social",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(Strategy::Default),
            "news" => Ok(Strategy::News),
            "technical" => Ok(Strategy::Technical),
            "social" => Ok(Strategy::Social),
            other => Err(ConfigurationError::UnknownStrategy(other.to_string())),
        }
    }
}

/// Relative weight of each signal. Only the ratios matter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityWeights {
    pub source_authority: f64,
    pub content_recency: f64,
    pub topic_relevance: f64,
    pub engagement_signals: f64,
    pub uniqueness: f64,
    pub completeness: f64,
    pub actionability: f64,
    pub cross_topic_value: f64,
}

impl Default for PriorityWeights {
    fn default() -> Self {
        Self {
            source_authority: 0.20,
            content_recency: 0.25,
            topic_relevance: 0.20,
            engagement_signals: 0.10,
            uniqueness: 0.10,
            completeness: 0.05,
            actionability: 0.05,
            cross_topic_value: 0.05,
        }
    }
}

impl PriorityWeights {
    pub fn from_config(cfg: &ScoringConfig) -> Self {
        let d = Self::default();
        Self {
            source_authority: cfg.w_authority.unwrap_or(d.source_authority),
            content_recency: cfg.w_recency.unwrap_or(d.content_recency),
            topic_relevance: cfg.w_topic.unwrap_or(d.topic_relevance),
            engagement_signals: cfg.w_engagement.unwrap_or(d.engagement_signals),
            uniqueness: cfg.w_uniqueness.unwrap_or(d.uniqueness),
            completeness: cfg.w_completeness.unwrap_or(d.completeness),
            actionability: cfg.w_actionability.unwrap_or(d.actionability),
            cross_topic_value: cfg.w_cross_topic.unwrap_or(d.cross_topic_value),
        }
    }

    fn as_array(&self) -> [f64; 8] {
        [
            self.source_authority,
            self.content_recency,
            self.topic_relevance,
            self.engagement_signals,
            self.uniqueness,
            self.completeness,
            self.actionability,
            self.cross_topic_value,
        ]
    }

    pub fn total(&self) -> f64 {
        self.as_array().iter().sum()
    }

    /// Every weight finite and non-negative, and at least one positive.
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if let Some(w) = self.as_array().iter().find(|w| !w.is_finite() || **w < 0.0) {
            return Err(ConfigurationError::InvalidWeights(format!(
                "weights must be finite and non-negative, got {}",
                w
            )));
        }
        if self.total() <= 0.0 {
            return Err(ConfigurationError::InvalidWeights(
                "at least one weight must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Lower bounds of the medium, high and critical buckets; anything below `medium` is low.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriorityThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for PriorityThresholds {
    fn default() -> Self {
        Self {
            medium: 0.50,
            high: 0.70,
            critical: 0.85,
        }
    }
}

impl PriorityThresholds {
    pub fn new(medium: f64, high: f64, critical: f64) -> Result<Self, ConfigurationError> {
        let thresholds = Self {
            medium,
            high,
            critical,
        };
        thresholds.validate()?;
        Ok(thresholds)
    }

    pub fn from_config(cfg: &ScoringConfig) -> Result<Self, ConfigurationError> {
        let d = Self::default();
        Self::new(
            cfg.threshold_medium.unwrap_or(d.medium),
            cfg.threshold_high.unwrap_or(d.high),
            cfg.threshold_critical.unwrap_or(d.critical),
        )
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let ordered = 0.0 <= self.medium
            && self.medium < self.high
            && self.high < self.critical
            && self.critical <= 1.0;
        if ordered {
            Ok(())
        } else {
            Err(ConfigurationError::InvalidThresholds(format!(
                "expected 0 <= medium < high < critical <= 1, got {} / {} / {}",
                self.medium, self.high, self.critical
            )))
        }
    }

    /// Monotone step function from score to level.
    pub fn level_for(&self, score: f64) -> PriorityLevel {
        if score >= self.critical {
            PriorityLevel::Critical
        } else if score >= self.high {
            PriorityLevel::High
        } else if score >= self.medium {
            PriorityLevel::Medium
        } else {
            PriorityLevel::Low
        }
    }
}

/// Raw signal values, each in [0, 1].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriorityFactors {
    pub source_authority: f64,
    pub content_recency: f64,
    pub topic_relevance: f64,
    pub engagement_signals: f64,
    pub uniqueness: f64,
    pub completeness: f64,
    pub actionability: f64,
    pub cross_topic_value: f64,
}

impl PriorityFactors {
    fn clamped(self) -> Self {
        let c = |v: f64| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            source_authority: c(self.source_authority),
            content_recency: c(self.content_recency),
            topic_relevance: c(self.topic_relevance),
            engagement_signals: c(self.engagement_signals),
            uniqueness: c(self.uniqueness),
            completeness: c(self.completeness),
            actionability: c(self.actionability),
            cross_topic_value: c(self.cross_topic_value),
        }
    }

    /// Signal name, value pairs in a fixed order.
    pub fn named(&self) -> [(&'static str, f64); 8] {
        [
            ("source_authority", self.source_authority),
            ("content_recency", self.content_recency),
            ("topic_relevance", self.topic_relevance),
            ("engagement_signals", self.engagement_signals),
            ("uniqueness", self.uniqueness),
            ("completeness", self.completeness),
            ("actionability", self.actionability),
            ("cross_topic_value", self.cross_topic_value),
        ]
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PriorityResult {
    pub item_id: String,
    pub total_score: f64,
    pub priority_level: PriorityLevel,
    /// Weighted contribution of every signal, zero entries included.
    /// Sums to `total_score`.
    pub score_breakdown: BTreeMap<String, f64>,
    pub factors: PriorityFactors,
    pub strategy: Strategy,
    pub reasoning: String,
    pub recommendations: Vec<String>,
}

/// Stateless scorer. Source authorities and topic preferences are lookup
/// tables filled at setup; scoring never mutates them.
#[derive(Debug, Clone)]
pub struct ContentPrioritizer {
    weights: PriorityWeights,
    thresholds: PriorityThresholds,
    half_life_hours: f64,
    default_authority: f64,
    default_strategy: Strategy,
    source_authorities: HashMap<String, f64>,
    topic_preferences: HashMap<String, f64>,
}

impl Default for ContentPrioritizer {
    fn default() -> Self {
        Self {
            weights: PriorityWeights::default(),
            thresholds: PriorityThresholds::default(),
            half_life_hours: 48.0,
            default_authority: 0.5,
            default_strategy: Strategy::Default,
            source_authorities: HashMap::new(),
            topic_preferences: HashMap::new(),
        }
    }
}

impl ContentPrioritizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(cfg: &ScoringConfig) -> Result<Self, ConfigurationError> {
        let weights = PriorityWeights::from_config(cfg);
        weights.validate()?;
        let thresholds = PriorityThresholds::from_config(cfg)?;

        let half_life_hours = cfg.half_life_hours.unwrap_or(48.0);
        if !(half_life_hours.is_finite() && half_life_hours > 0.0) {
            return Err(ConfigurationError::InvalidWeights(format!(
                "half_life_hours must be positive, got {}",
                half_life_hours
            )));
        }

        let default_strategy = match cfg.strategy.as_deref() {
            Some(name) => name.parse()?,
            None => Strategy::Default,
        };

        Ok(Self {
            weights,
            thresholds,
            half_life_hours,
            default_authority: cfg.default_authority.unwrap_or(0.5).clamp(0.0, 1.0),
            default_strategy,
            source_authorities: HashMap::new(),
            topic_preferences: HashMap::new(),
        })
    }

    pub fn with_weights(mut self, weights: PriorityWeights) -> Result<Self, ConfigurationError> {
        weights.validate()?;
        self.weights = weights;
        Ok(self)
    }

    pub fn with_thresholds(
        mut self,
        thresholds: PriorityThresholds,
    ) -> Result<Self, ConfigurationError> {
        thresholds.validate()?;
        self.thresholds = thresholds;
        Ok(self)
    }

    pub fn thresholds(&self) -> &PriorityThresholds {
        &self.thresholds
    }

    pub fn set_source_authorities(&mut self, authorities: HashMap<String, f64>) {
        self.source_authorities = authorities;
    }

    /// Use the curated authority of each source.
    pub fn register_sources<'a, I>(&mut self, sources: I)
    where
        I: IntoIterator<Item = &'a SourceMetadata>,
    {
        for source in sources {
            self.source_authorities
                .insert(source.source_id.clone(), source.authority_score);
        }
    }

    pub fn set_topic_preferences(&mut self, preferences: HashMap<String, f64>) {
        self.topic_preferences = preferences;
    }

    pub fn level_for(&self, score: f64) -> PriorityLevel {
        self.thresholds.level_for(score)
    }

    /// Score with the configured strategy as of now.
    pub fn prioritize(&self, item: &ContentItem) -> PriorityResult {
        self.prioritize_at(item, self.default_strategy, Utc::now())
    }

    pub fn prioritize_with(&self, item: &ContentItem, strategy: Strategy) -> PriorityResult {
        self.prioritize_at(item, strategy, Utc::now())
    }

    /// Score relative to a fixed clock, for reproducible results.
    pub fn prioritize_at(
        &self,
        item: &ContentItem,
        strategy: Strategy,
        now: DateTime<Utc>,
    ) -> PriorityResult {
        let factors = match strategy {
            Strategy::Default => self.default_factors(item, now),
            Strategy::News => self.news_factors(item, now),
            Strategy::Technical => self.technical_factors(item, now),
            Strategy::Social => self.social_factors(item),
        }
        .clamped();

        let total_weight = self.weights.total();
        let score_breakdown: BTreeMap<String, f64> = factors
            .named()
            .iter()
            .zip(self.weights.as_array())
            .map(|((name, value), weight)| (name.to_string(), value * weight / total_weight))
            .collect();

        let total_score = score_breakdown.values().sum::<f64>().clamp(0.0, 1.0);
        let priority_level = self.thresholds.level_for(total_score);

        debug!(item_id = %item.item_id, total_score, level = %priority_level, "prioritized");

        PriorityResult {
            item_id: item.item_id.clone(),
            total_score,
            priority_level,
            reasoning: reasoning(&factors, priority_level, strategy),
            recommendations: recommendations(&factors, priority_level),
            score_breakdown,
            factors,
            strategy,
        }
    }

    /// Score every item, highest score first.
    pub fn prioritize_batch(&self, items: &[ContentItem], strategy: Strategy) -> Vec<PriorityResult> {
        let now = Utc::now();
        let mut results: Vec<PriorityResult> = items
            .iter()
            .map(|item| self.prioritize_at(item, strategy, now))
            .collect();
        results.sort_by(|a, b| b.total_score.total_cmp(&a.total_score));
        info!("Prioritized {} items using {} strategy", results.len(), strategy);
        results
    }

    fn authority(&self, item: &ContentItem, fallback: f64) -> f64 {
        self.source_authorities
            .get(&item.source_id)
            .copied()
            .unwrap_or(fallback)
    }

    fn topic_relevance(&self, item: &ContentItem) -> f64 {
        item.topics
            .iter()
            .map(|t| self.topic_preferences.get(t).copied().unwrap_or(0.5))
            .reduce(f64::max)
            .unwrap_or(0.5)
    }

    fn default_factors(&self, item: &ContentItem, now: DateTime<Utc>) -> PriorityFactors {
        let age = age_hours(item, now);
        let body_len = item.content.as_deref().map_or(0, |c| c.chars().count());

        PriorityFactors {
            source_authority: self.authority(item, self.default_authority),
            content_recency: 0.5_f64.powf(age / self.half_life_hours),
            topic_relevance: self.topic_relevance(item),
            engagement_signals: engagement(item).unwrap_or(0.5),
            uniqueness: item.metadata_f64("uniqueness").unwrap_or(0.5),
            completeness: if body_len > 0 {
                body_len as f64 / 1000.0
            } else {
                0.3
            },
            actionability: item.metadata_f64("actionability").unwrap_or(0.5),
            cross_topic_value: if item.topics.is_empty() {
                0.1
            } else {
                item.topics.len() as f64 / 5.0
            },
        }
    }

    fn news_factors(&self, item: &ContentItem, now: DateTime<Utc>) -> PriorityFactors {
        let age = age_hours(item, now);
        let content_recency = if age < 1.0 {
            1.0
        } else if age < 6.0 {
            0.9
        } else if age < 24.0 {
            0.7
        } else {
            (1.0 - age / 168.0).max(0.1)
        };

        let title = item.title.to_lowercase();
        let breaking = BREAKING_INDICATORS.iter().any(|ind| title.contains(ind));

        PriorityFactors {
            source_authority: self.authority(item, 0.3) * 1.2,
            content_recency,
            topic_relevance: self.topic_relevance(item),
            engagement_signals: engagement(item).unwrap_or(0.4),
            uniqueness: if breaking {
                1.0
            } else {
                item.metadata_f64("uniqueness").unwrap_or(0.5)
            },
            completeness: item.metadata_f64("completeness").unwrap_or(0.5),
            actionability: if breaking { 0.7 } else { 0.4 },
            cross_topic_value: item.metadata_f64("cross_topic").unwrap_or(0.3),
        }
    }

    fn technical_factors(&self, item: &ContentItem, now: DateTime<Utc>) -> PriorityFactors {
        let body_len = item.content.as_deref().map_or(0, |c| c.chars().count());
        let title = item.title.to_lowercase();
        let technical = TECHNICAL_INDICATORS.iter().any(|ind| title.contains(ind));
        let age_days = (age_hours(item, now) / 24.0).floor();

        PriorityFactors {
            source_authority: self.authority(item, 0.6),
            content_recency: (1.0 - age_days / 90.0).max(0.3),
            topic_relevance: if technical { 0.8 } else { 0.5 },
            engagement_signals: engagement(item).unwrap_or(0.4),
            uniqueness: item.metadata_f64("uniqueness").unwrap_or(0.6),
            completeness: body_len as f64 / 2000.0,
            actionability: if title.contains("tutorial") || title.contains("guide") {
                0.9
            } else {
                0.5
            },
            cross_topic_value: item.metadata_f64("cross_topic").unwrap_or(0.4),
        }
    }

    fn social_factors(&self, item: &ContentItem) -> PriorityFactors {
        let views = match &item.extras {
            ItemExtras::Transcript {
                view_count: Some(v),
                ..
            } => *v as f64,
            _ => item.metadata_f64("views").unwrap_or(0.0),
        };
        let shares = item.metadata_f64("shares").unwrap_or(0.0);
        let comments = item.metadata_f64("comments").unwrap_or(0.0);

        let engagement_signals = match item.metadata_f64("engagement_score") {
            Some(score) if score > 0.0 => score,
            _ => {
                (views / 10_000.0).min(1.0) * 0.3
                    + (shares / 100.0).min(1.0) * 0.4
                    + (comments / 50.0).min(1.0) * 0.3
            }
        };
        let viral = views > 50_000.0 || shares > 500.0;

        PriorityFactors {
            source_authority: self.authority(item, self.default_authority),
            content_recency: 0.7,
            topic_relevance: 0.6,
            engagement_signals,
            uniqueness: if viral {
                0.9
            } else {
                item.metadata_f64("uniqueness").unwrap_or(0.5)
            },
            completeness: item.metadata_f64("completeness").unwrap_or(0.5),
            actionability: if viral { 0.6 } else { 0.4 },
            cross_topic_value: if viral { 0.7 } else { 0.3 },
        }
    }
}

/// Hours since publication; future dates count as brand new.
fn age_hours(item: &ContentItem, now: DateTime<Utc>) -> f64 {
    let seconds = (now - item.published_date).num_seconds().max(0);
    seconds as f64 / 3600.0
}

/// Engagement derived from the item's family fields, if any.
fn engagement(item: &ContentItem) -> Option<f64> {
    if let Some(score) = item.metadata_f64("engagement_score") {
        return Some(score);
    }
    match &item.extras {
        ItemExtras::Transcript {
            view_count,
            like_count,
            ..
        } if view_count.is_some() || like_count.is_some() => {
            let views = view_count.unwrap_or(0) as f64;
            let likes = like_count.unwrap_or(0) as f64;
            Some((views / 10_000.0).min(1.0) * 0.6 + (likes / 500.0).min(1.0) * 0.4)
        }
        ItemExtras::Repository { stars, forks, .. } => Some(
            (*stars as f64 / 1_000.0).min(1.0) * 0.7 + (*forks as f64 / 200.0).min(1.0) * 0.3,
        ),
        ItemExtras::SearchResult {
            relevance: Some(r), ..
        } => Some(*r),
        _ => None,
    }
}

fn reasoning(factors: &PriorityFactors, level: PriorityLevel, strategy: Strategy) -> String {
    let mut named = factors.named();
    named.sort_by(|a, b| b.1.total_cmp(&a.1));
    let top: Vec<String> = named
        .iter()
        .take(3)
        .map(|(name, value)| format!("{} ({:.2})", name.replace('_', " "), value))
        .collect();
    format!(
        "Content prioritized as {} using {} strategy. Key factors: {}.",
        level,
        strategy,
        top.join(", ")
    )
}

fn recommendations(factors: &PriorityFactors, level: PriorityLevel) -> Vec<String> {
    let mut out: Vec<String> = match level {
        PriorityLevel::Critical => vec![
            "Immediate review required".into(),
            "Consider cross-platform distribution".into(),
            "Alert relevant stakeholders".into(),
        ],
        PriorityLevel::High => vec![
            "Priority processing recommended".into(),
            "Schedule for detailed analysis".into(),
        ],
        PriorityLevel::Medium => vec!["Include in regular review cycle".into()],
        PriorityLevel::Low => Vec::new(),
    };
    if factors.uniqueness > 0.8 {
        out.push("Novel information - consider deep analysis".into());
    }
    if factors.cross_topic_value > 0.7 {
        out.push("Has cross-topic relevance - share across teams".into());
    }
    if factors.actionability > 0.8 {
        out.push("Highly actionable - create action items".into());
    }
    out
}
