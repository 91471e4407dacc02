//! Foresight Core: Fact-Trust & Causal-Reasoning Pipeline
//!
//! Turns already-tagged facts about world events into probability-annotated
//! future scenarios for a target entity, with every step traceable.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────────┐
//! │                        ANALYSIS SESSION (one owner)                      │
//! ├──────────────────────────────────────────────────────────────────────────┤
//! │                                                                          │
//! │  Fact Analyzer ──► ┌──────────────┐  clean   ┌────────────────┐          │
//! │  (external)        │ SourceTrust  │─────────►│ Knowledge      │          │
//! │                    │ Tracker      │          │ Extractor      │          │
//! │                    └──────┬───────┘          └───────┬────────┘          │
//! │                           │ poisoned                 │ concepts,         │
//! │                           ▼                          ▼ relations         │
//! │                      Audit log              ┌────────────────┐           │
//! │                                             │ KnowledgeGraph │           │
//! │  Situation factors ──► ┌───────────────┐ ◄──┤ (petgraph)     │           │
//! │  {id: desc, weight}    │ Reasoning     │    └────────────────┘           │
//! │                        │ Engine        │                                 │
//! │                        └──────┬────────┘                                 │
//! │            prioritized facts, │ causal chains, reasoning paths (frozen)  │
//! │                               ▼                                          │
//! │                   ┌─────────────────────┐      ┌──────────────────────┐  │
//! │                   │ ScenarioAssembler   │◄────►│ Text Generation      │  │
//! │                   │ 4 tasks, bounded    │      │ Service (external)   │  │
//! │                   └─────────┬───────────┘      └──────────────────────┘  │
//! │                             ▼                                            │
//! │                   ┌─────────────────────┐                                │
//! │                   │ Recommendation      │                                │
//! │                   │ Synthesizer         │                                │
//! │                   └─────────────────────┘                                │
//! └──────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Data flows strictly upward. No stage mutates an upstream stage's state; the
//! graph and prioritized facts are frozen before the scenario tasks start.
//!
//! ## Error classes
//! - input errors: skipped per item with an audit record
//! - trust violations: quarantined and counted
//! - generation errors: degrade to a fallback scenario
//! - graph-query misses: empty causal chain, not an error
//!
//! Only an empty set of situation factors rejects a run.

pub mod config;
pub mod extract;
pub mod graph;
pub mod lexicon;
pub mod llm;
pub mod reasoning;
pub mod recommend;
pub mod scenario;
pub mod session;
pub mod trust;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

pub use config::{ConfigError, SessionConfig};
pub use graph::{Concept, ConceptType, KnowledgeGraph, Relation, RelationType};
pub use lexicon::{Lexicon, Lexicons};
pub use llm::{GenerationError, MockGenerator, TextGenerator};
pub use reasoning::{CausalRelation, ReasoningEngine, ReasoningPath, WeightedFactor};
pub use recommend::{Recommendation, RecommendationSet, RecommendationSynthesizer};
pub use scenario::{Scenario, ScenarioAssembler};
pub use session::{AnalysisInput, AnalysisReport, AnalysisSession, SessionError};
pub use trust::{SourceReputation, SourceTrustTracker};

// ============================================================================
// Core Types
// ============================================================================

/// Identifier of a fact, assigned by the Fact Analyzer.
pub type FactId = String;

/// An attributed piece of information. Immutable once ingested.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: FactId,
    pub content: String,
    /// Source URL (or bare domain) the fact was extracted from.
    pub source: String,
    pub published: Option<NaiveDate>,
    pub confidence: f64,
    pub relevance: f64,
    pub tags: Vec<String>,
    /// Named entities tagged by the Fact Analyzer; these become graph concepts.
    pub entities: Vec<String>,
}

/// How a situation factor pushes outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImpactDirection {
    Positive,
    Negative,
    Neutral,
}

impl fmt::Display for ImpactDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        })
    }
}

/// Scenario polarity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Polarity {
    Positive,
    Negative,
}

impl Polarity {
    pub const ALL: [Polarity; 2] = [Polarity::Positive, Polarity::Negative];

    /// The factor pushes in this polarity's direction.
    pub fn matches(self, direction: ImpactDirection) -> bool {
        matches!(
            (self, direction),
            (Polarity::Positive, ImpactDirection::Positive)
                | (Polarity::Negative, ImpactDirection::Negative)
        )
    }

    /// The factor pushes against this polarity and is excluded from its simulation.
    pub fn opposes(self, direction: ImpactDirection) -> bool {
        matches!(
            (self, direction),
            (Polarity::Positive, ImpactDirection::Negative)
                | (Polarity::Negative, ImpactDirection::Positive)
        )
    }
}

impl fmt::Display for Polarity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
        })
    }
}

/// Temporal bucket of a factor or relation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    Immediate,
    Short,
    Medium,
    Long,
}

impl Timeframe {
    pub const ALL: [Timeframe; 4] = [
        Timeframe::Immediate,
        Timeframe::Short,
        Timeframe::Medium,
        Timeframe::Long,
    ];

    /// `immediate`/`short` belong to horizons up to 12 months, `medium`/`long` to longer ones.
    pub fn fits_horizon(self, horizon_months: u32) -> bool {
        match self {
            Timeframe::Immediate | Timeframe::Short => horizon_months <= 12,
            Timeframe::Medium | Timeframe::Long => horizon_months > 12,
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Immediate => "immediate",
            Self::Short => "short",
            Self::Medium => "medium",
            Self::Long => "long",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationKind {
    Causal,
    Temporal,
    Thematic,
}

/// A correlation between facts found by the Fact Analyzer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub fact_ids: Vec<FactId>,
    pub kind: CorrelationKind,
    pub strength: f64,
    #[serde(default)]
    pub explanation: String,
}

/// Clamp into [0, 1], rounding away float drift from repeated arithmetic.
pub(crate) fn unit(value: f64) -> f64 {
    if value.is_nan() {
        return 0.0;
    }
    ((value * 1e9).round() / 1e9).clamp(0.0, 1.0)
}

/// Truncate to at most `max_chars` characters without splitting a code point.
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

// ============================================================================
// Ingestion boundary
// ============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum IngestError {
    #[error("fact id is empty")]
    EmptyId,
    #[error("fact {0} has empty content")]
    EmptyContent(String),
    #[error("fact {id}: {field} = {value} is outside [0, 1]")]
    OutOfRange {
        id: String,
        field: &'static str,
        value: f64,
    },
    #[error("factor {0} has a non-finite weight")]
    InvalidWeight(String),
}

/// A fact record as delivered by the Fact Analyzer, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactInput {
    pub id: String,
    pub content: String,
    #[serde(default, alias = "source_domain")]
    pub source: String,
    #[serde(default, alias = "date")]
    pub published: Option<NaiveDate>,
    pub confidence: f64,
    #[serde(default)]
    pub relevance: Option<f64>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
}

impl FactInput {
    pub fn validate(self) -> Result<Fact, IngestError> {
        let id = self.id.trim().to_string();
        if id.is_empty() {
            return Err(IngestError::EmptyId);
        }
        if self.content.trim().is_empty() {
            return Err(IngestError::EmptyContent(id));
        }
        let relevance = self.relevance.unwrap_or(0.0);
        for (field, value) in [("confidence", self.confidence), ("relevance", relevance)] {
            if !value.is_finite() || !(0.0..=1.0).contains(&value) {
                return Err(IngestError::OutOfRange { id, field, value });
            }
        }
        Ok(Fact {
            id,
            content: self.content,
            source: self.source,
            published: self.published,
            confidence: self.confidence,
            relevance,
            tags: self.tags,
            entities: self.entities,
        })
    }
}

/// A caller-supplied situation factor: `{description, weight}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorInput {
    pub description: String,
    pub weight: f64,
}

impl FactorInput {
    pub fn new(description: impl Into<String>, weight: f64) -> Self {
        Self {
            description: description.into(),
            weight,
        }
    }

    pub fn validate(&self, id: &str) -> Result<(), IngestError> {
        if !self.weight.is_finite() {
            return Err(IngestError::InvalidWeight(id.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(id: &str, confidence: f64) -> FactInput {
        FactInput {
            id: id.to_string(),
            content: "Oil prices fall".to_string(),
            source: "https://oecd.org/report".to_string(),
            published: None,
            confidence,
            relevance: Some(0.5),
            tags: vec![],
            entities: vec![],
        }
    }

    #[test]
    fn test_fact_validation() {
        assert!(input("f1", 0.9).validate().is_ok());
        assert_eq!(input("  ", 0.9).validate(), Err(IngestError::EmptyId));
        assert!(matches!(
            input("f2", 1.5).validate(),
            Err(IngestError::OutOfRange { field: "confidence", .. })
        ));
        assert!(matches!(
            input("f3", f64::NAN).validate(),
            Err(IngestError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_fact_input_accepts_analyzer_field_names() {
        let json = r#"{"id": "f1", "content": "x", "source_domain": "un.org",
                       "date": "2024-03-01", "confidence": 0.7}"#;
        let fact = serde_json::from_str::<FactInput>(json).unwrap().validate().unwrap();
        assert_eq!(fact.source, "un.org");
        assert_eq!(fact.published, NaiveDate::from_ymd_opt(2024, 3, 1));
        assert_eq!(fact.relevance, 0.0);
    }

    #[test]
    fn test_polarity_matching() {
        assert!(Polarity::Positive.matches(ImpactDirection::Positive));
        assert!(!Polarity::Positive.matches(ImpactDirection::Neutral));
        assert!(Polarity::Negative.opposes(ImpactDirection::Positive));
        assert!(!Polarity::Negative.opposes(ImpactDirection::Neutral));
    }

    #[test]
    fn test_unit_clamps_and_rounds() {
        assert_eq!(unit(0.4 - 0.1), 0.3);
        assert_eq!(unit(-0.2), 0.0);
        assert_eq!(unit(7.0), 1.0);
        assert_eq!(unit(f64::NAN), 0.0);
    }

    #[test]
    fn test_truncate_chars_respects_code_points() {
        assert_eq!(truncate_chars("zażółć", 3), "zaż");
        assert_eq!(truncate_chars("abc", 10), "abc");
    }
}
