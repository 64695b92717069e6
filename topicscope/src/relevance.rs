//! # Relevance filter
//!
//! Keyword/topic based predicate deciding whether an item belongs in the corpus.
//!
//! - High-value keywords accept immediately with a score of 1.0.
//! - Off-topic keywords in the title reject, unless the text has an AI/dev
//!   context that overrides them.
//! - Relevant keywords score `0.5 + 0.1` per distinct match, capped at 1.0.
//! - Boilerplate markers (sponsored posts, newsletter sign-ups) halve the score.
//!
//! The filter is advisory: it never drops or stores anything itself.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

use common::RelevanceConfig;

use crate::error::ConfigurationError;
use crate::model::ContentItem;

const CONTENT_WINDOW_CHARS: usize = 500;
const BOILERPLATE_PENALTY: f64 = 0.5;
const DEFAULT_MIN_SCORE: f64 = 0.35;

const DEFAULT_RELEVANT: &[&str] = &[
    "claude", "anthropic", "opus", "sonnet", "haiku", "claude code", "constitutional ai",
    "react", "typescript", "javascript", "next.js", "vue", "svelte", "frontend", "components",
    "hooks", "ai coding", "cursor", "copilot", "github copilot", "prompt engineering",
    "prompting", "few shot", "chain of thought", "llm", "language model", "gpt", "gemini",
    "mistral", "ai development", "ai tools", "ai applications", "mcp",
    "model context protocol", "langchain", "llamaindex", "rag", "retrieval augmented", "api",
    "graphql", "websocket", "developer productivity", "development tools",
];

const DEFAULT_IRRELEVANT: &[&str] = &[
    "voltage scaling", "power efficiency", "hpc", "high performance computing",
    "quantum computing", "qubits", "gpu optimization", "cuda", "tensor cores", "fpga", "asic",
    "chip design", "semiconductor", "cryptocurrency", "bitcoin", "ethereum", "blockchain", "nft",
    "web3", "defi", "smart contracts", "cve", "zero day", "patch tuesday", "malware",
    "computational complexity", "np complete", "category theory", "formal verification",
    "game development", "unreal engine", "embedded systems", "arduino", "raspberry pi",
    "kubernetes", "jenkins",
];

const DEFAULT_HIGH_VALUE: &[&str] = &[
    "claude opus 4", "opus 4.1", "anthropic announcement", "anthropic release",
    "claude code update", "new claude feature", "claude api", "react 19", "next.js 15",
    "typescript 5", "prompt engineering guide", "prompting best practices",
    "ai coding assistant", "cursor update", "mcp server", "model context protocol",
];

const DEFAULT_BOILERPLATE: &[&str] = &[
    "sponsored", "advertisement", "subscribe to our newsletter", "sign up for our newsletter",
    "cookie policy", "press release", "affiliate link",
];

/// Text that makes an off-topic keyword acceptable (e.g. "quantum" in an AI coding post).
static OVERRIDE_CONTEXT: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)\bclaude\b.*\b(can|does|helps|assists)\b",
        r"(?i)\bai\b.*\b(coding|development|assistant)\b",
        r"(?i)\bprompt\b.*\b(engineering|design|optimization)\b",
        r"(?i)\breact\b.*\b(component|hook|state)\b",
    ]
    .iter()
    .filter_map(|p| Regex::new(p).ok())
    .collect()
});

/// Grouping key of a verdict, rendered as the `<Category>` part of the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RelevanceCategory {
    HighValue,
    Relevant,
    Irrelevant,
    Boilerplate,
    NoMatch,
}

impl fmt::Display for RelevanceCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelevanceCategory::HighValue => "High-value",
            RelevanceCategory::Relevant => "Relevant",
            RelevanceCategory::Irrelevant => "Irrelevant",
            RelevanceCategory::Boilerplate => "Boilerplate",
            RelevanceCategory::NoMatch => "No match",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevanceVerdict {
    pub is_relevant: bool,
    /// Relevance estimate in [0, 1]
    pub score: f64,
    pub category: RelevanceCategory,
    /// "<Category>: <detail>"
    pub reason: String,
}

impl RelevanceVerdict {
    fn new(is_relevant: bool, score: f64, category: RelevanceCategory, detail: &str) -> Self {
        Self {
            is_relevant,
            score: score.clamp(0.0, 1.0),
            category,
            reason: format!("{}: {}", category, detail),
        }
    }
}

/// Stateless keyword filter. Patterns are compiled once at construction.
#[derive(Debug, Clone)]
pub struct RelevanceFilter {
    relevant: Option<Regex>,
    irrelevant: Option<Regex>,
    high_value: Option<Regex>,
    boilerplate: Option<Regex>,
    min_score: f64,
}

impl Default for RelevanceFilter {
    fn default() -> Self {
        // Built-in lists are escaped literals; compiling them cannot fail.
        Self::from_config(&RelevanceConfig::default()).unwrap_or(Self {
            relevant: None,
            irrelevant: None,
            high_value: None,
            boilerplate: None,
            min_score: DEFAULT_MIN_SCORE,
        })
    }
}

impl RelevanceFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from the `[relevance]` section; missing lists use the built-in defaults.
    pub fn from_config(cfg: &RelevanceConfig) -> Result<Self, ConfigurationError> {
        fn pick(configured: &Option<Vec<String>>, defaults: &[&str]) -> Vec<String> {
            configured
                .clone()
                .unwrap_or_else(|| defaults.iter().map(|s| s.to_string()).collect())
        }

        Ok(Self {
            relevant: compile_terms(&pick(&cfg.relevant_topics, DEFAULT_RELEVANT))?,
            irrelevant: compile_terms(&pick(&cfg.irrelevant_topics, DEFAULT_IRRELEVANT))?,
            high_value: compile_terms(&pick(&cfg.high_value_keywords, DEFAULT_HIGH_VALUE))?,
            boilerplate: compile_terms(&pick(&cfg.boilerplate_markers, DEFAULT_BOILERPLATE))?,
            min_score: cfg.min_score.unwrap_or(DEFAULT_MIN_SCORE).clamp(0.0, 1.0),
        })
    }

    /// Decide whether an item with this title, body and tags is worth keeping.
    pub fn is_relevant(&self, title: &str, content: &str, topics: &[String]) -> RelevanceVerdict {
        let snippet: String = content.chars().take(CONTENT_WINDOW_CHARS).collect();
        let all_text = format!("{} {} {}", title, snippet, topics.join(" "));

        if let Some(m) = first_match(&self.high_value, &all_text) {
            debug!("high-value content detected: {}", m);
            return RelevanceVerdict::new(true, 1.0, RelevanceCategory::HighValue, &m);
        }

        if let Some(m) = first_match(&self.irrelevant, title) {
            if !has_override_context(&all_text) {
                debug!("irrelevant topic detected: {}", m);
                return RelevanceVerdict::new(false, 0.0, RelevanceCategory::Irrelevant, &m);
            }
        }

        let matches = distinct_matches(&self.relevant, &all_text);
        if matches.is_empty() {
            return RelevanceVerdict::new(
                false,
                0.0,
                RelevanceCategory::NoMatch,
                "no relevant keywords found",
            );
        }

        let mut score = (0.5 + matches.len() as f64 * 0.1).min(1.0);
        let detail = matches.iter().take(3).cloned().collect::<Vec<_>>().join(", ");

        if let Some(marker) = first_match(&self.boilerplate, &all_text) {
            score *= BOILERPLATE_PENALTY;
            if score < self.min_score {
                return RelevanceVerdict::new(false, score, RelevanceCategory::Boilerplate, &marker);
            }
        }

        RelevanceVerdict::new(true, score, RelevanceCategory::Relevant, &detail)
    }

    pub fn check_item(&self, item: &ContentItem) -> RelevanceVerdict {
        self.is_relevant(&item.title, item.content.as_deref().unwrap_or_default(), &item.topics)
    }

    /// Keep only relevant items, each paired with its verdict.
    pub fn filter_items(&self, items: Vec<ContentItem>) -> Vec<(ContentItem, RelevanceVerdict)> {
        let total = items.len();
        let kept: Vec<_> = items
            .into_iter()
            .filter_map(|item| {
                let verdict = self.check_item(&item);
                if verdict.is_relevant {
                    Some((item, verdict))
                } else {
                    debug!(item_id = %item.item_id, reason = %verdict.reason, "filtered out");
                    None
                }
            })
            .collect();
        info!("Filtered {} items to {} relevant items", total, kept.len());
        kept
    }
}

/// One case-insensitive alternation, longest terms first so "claude code" wins over "claude".
/// Word boundaries are only added next to word characters ("next.js", "ci/cd" stay matchable).
fn compile_terms(terms: &[String]) -> Result<Option<Regex>, ConfigurationError> {
    let mut terms: Vec<&str> = terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return Ok(None);
    }
    terms.sort_by(|a, b| b.len().cmp(&a.len()).then(a.cmp(b)));
    terms.dedup();

    let alternatives: Vec<String> = terms
        .iter()
        .map(|term| {
            let starts_word = term.chars().next().is_some_and(is_word_char);
            let ends_word = term.chars().last().is_some_and(is_word_char);
            format!(
                "{}{}{}",
                if starts_word { r"\b" } else { "" },
                regex::escape(term),
                if ends_word { r"\b" } else { "" }
            )
        })
        .collect();

    let pattern = format!("(?i)(?:{})", alternatives.join("|"));
    Ok(Some(Regex::new(&pattern)?))
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn first_match(re: &Option<Regex>, text: &str) -> Option<String> {
    re.as_ref()
        .and_then(|re| re.find(text))
        .map(|m| m.as_str().to_lowercase())
}

fn distinct_matches(re: &Option<Regex>, text: &str) -> Vec<String> {
    let Some(re) = re else {
        return Vec::new();
    };
    let mut seen = Vec::new();
    for m in re.find_iter(text) {
        let term = m.as_str().to_lowercase();
        if !seen.contains(&term) {
            seen.push(term);
        }
    }
    seen
}

fn has_override_context(text: &str) -> bool {
    OVERRIDE_CONTEXT.iter().any(|re| re.is_match(text))
}
