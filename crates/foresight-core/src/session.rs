//! Analysis Session: the single owner of all mutable pipeline state
//!
//! ```text
//! AnalysisInput ─► validate ─► trust filter ─► extract ─► graph
//!                                                          │
//!        factors ─► register ─► prioritize ◄───────────────┤
//!                                   │                      │
//!                                   ▼                      │
//!                            causal chains ◄───────────────┘
//!                                   │
//!                    simulate × (horizons × polarities)
//!                                   │  frozen
//!                                   ▼
//!                         scenario tasks ─► recommendations ─► AnalysisReport
//! ```
//!
//! Reputations persist across runs of one session; the graph, reasoning
//! engine and audit log are rebuilt on every [`AnalysisSession::run`].
//! Different sessions share nothing.

use crate::config::{ConfigError, SessionConfig};
use crate::extract::KnowledgeExtractor;
use crate::graph::{GraphSnapshot, KnowledgeGraph};
use crate::llm::TextGenerator;
use crate::reasoning::trace::{ChainOfThought, ReasoningStep, StepKind, TraceSummary};
use crate::reasoning::{ReasoningEngine, ReasoningError, WeightImpactAnalysis};
use crate::recommend::{RecommendationSet, RecommendationSynthesizer};
use crate::scenario::{PromptRecord, Scenario, ScenarioAssembler, ScenarioJob};
use crate::trust::{domain_of, ContradictionPair, SourceStatistics, SourceTrustTracker};
use crate::{unit, Correlation, Fact, FactInput, FactorInput, Polarity};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use uuid::Uuid;

// ============================================================================
// Input / Output
// ============================================================================

/// Everything a caller supplies for one run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisInput {
    pub facts: Vec<FactInput>,
    pub factors: BTreeMap<String, FactorInput>,
    #[serde(default)]
    pub correlations: Vec<Correlation>,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no situation factors registered")]
    NoFactors,
    #[error("no analysis has been run in this session")]
    NotRun,
    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl From<ReasoningError> for SessionError {
    fn from(e: ReasoningError) -> Self {
        match e {
            ReasoningError::NoFactors => SessionError::NoFactors,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    InvalidFact,
    DuplicateFact,
    InvalidFactor,
    QuarantinedFact,
    Contradiction,
    DanglingCorrelation,
    UnknownFactor,
    RejectedWeight,
    DegradedScenario,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: AuditKind,
    pub subject: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunStatistics {
    pub data_sources: usize,
    pub total_facts: usize,
    pub rejected_inputs: usize,
    pub clean_facts: usize,
    /// Clean facts backed by enough distinct source domains.
    pub verified_facts: usize,
    pub poisoned_facts: usize,
    pub correlations: usize,
    pub concepts: usize,
    pub relations: usize,
    pub conflicts: usize,
    pub causal_chains: usize,
    pub scenarios: usize,
    pub fallback_scenarios: usize,
    pub recommendations: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: Uuid,
    pub target: String,
    pub generated_at: DateTime<Utc>,
    pub scenarios: Vec<Scenario>,
    pub recommendations: RecommendationSet,
    pub statistics: RunStatistics,
    pub sources: SourceStatistics,
    pub weight_analysis: WeightImpactAnalysis,
    pub reasoning: TraceSummary,
    pub chain_of_thought: ChainOfThought,
    pub graph: GraphSnapshot,
    pub contradictions: Vec<ContradictionPair>,
    pub audit: Vec<AuditRecord>,
}

// ============================================================================
// Session
// ============================================================================

pub struct AnalysisSession {
    config: SessionConfig,
    tracker: SourceTrustTracker,
    extractor: KnowledgeExtractor,
    graph: KnowledgeGraph,
    engine: ReasoningEngine,
    assembler: ScenarioAssembler,
    synthesizer: RecommendationSynthesizer,
    facts: Vec<Fact>,
    correlations: Vec<Correlation>,
    contradictions: Vec<ContradictionPair>,
    audit: Vec<AuditRecord>,
    /// Audit records written by ingestion; reruns keep these and drop the rest.
    ingest_audit_len: usize,
    input_counts: (usize, usize, usize),
    verified_facts: usize,
    has_run: bool,
}

impl AnalysisSession {
    pub fn new(config: SessionConfig, generator: Arc<dyn TextGenerator>) -> Result<Self, SessionError> {
        config.validate()?;
        let tracker = SourceTrustTracker::new(config.trust.clone(), &config.lexicons)?;
        Ok(Self {
            tracker,
            extractor: KnowledgeExtractor::new(config.target.clone(), config.lexicons.clone()),
            graph: KnowledgeGraph::new(),
            engine: ReasoningEngine::new(config.reasoning.clone(), config.lexicons.clone()),
            assembler: ScenarioAssembler::new(config.scenario.clone(), generator),
            synthesizer: RecommendationSynthesizer::new(config.lexicons.clone(), &config.target),
            facts: Vec::new(),
            correlations: Vec::new(),
            contradictions: Vec::new(),
            audit: Vec::new(),
            ingest_audit_len: 0,
            input_counts: (0, 0, 0),
            verified_facts: 0,
            has_run: false,
            config,
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn graph(&self) -> &KnowledgeGraph {
        &self.graph
    }

    pub fn tracker(&self) -> &SourceTrustTracker {
        &self.tracker
    }

    pub fn engine(&self) -> &ReasoningEngine {
        &self.engine
    }

    pub fn audit(&self) -> &[AuditRecord] {
        &self.audit
    }

    pub fn prompt_memory(&self) -> Vec<PromptRecord> {
        self.assembler.prompt_memory()
    }

    fn record(&mut self, kind: AuditKind, subject: impl Into<String>, reason: impl Into<String>) {
        self.audit.push(AuditRecord {
            kind,
            subject: subject.into(),
            reason: reason.into(),
        });
    }

    /// Run the whole pipeline. Only an empty factor set is rejected.
    pub async fn run(&mut self, input: AnalysisInput) -> Result<AnalysisReport, SessionError> {
        if input.factors.is_empty() {
            return Err(SessionError::NoFactors);
        }

        self.audit.clear();
        self.graph = KnowledgeGraph::new();
        self.engine = ReasoningEngine::new(self.config.reasoning.clone(), self.config.lexicons.clone());

        let registration = self.engine.register_situation_factors(input.factors)?;
        for rejected in &registration.rejected {
            self.record(AuditKind::InvalidFactor, "factor", rejected.to_string());
        }

        // ingestion boundary
        let total_facts = input.facts.len();
        let mut seen = BTreeSet::new();
        let mut facts = Vec::with_capacity(total_facts);
        for raw in input.facts {
            match raw.validate() {
                Ok(fact) if !seen.insert(fact.id.clone()) => {
                    self.record(AuditKind::DuplicateFact, fact.id, "fact id already ingested in this run");
                }
                Ok(fact) => facts.push(fact),
                Err(e) => {
                    tracing::warn!(error = %e, "fact rejected at ingestion");
                    self.record(AuditKind::InvalidFact, "fact", e.to_string());
                }
            }
        }
        let rejected_inputs = total_facts - facts.len() + registration.rejected.len();
        self.engine.trace_mut().add_step(
            ReasoningStep::new(StepKind::FactAnalysis, format!("Analyzed {} facts", facts.len()))
                .with_facts(facts.iter().map(|f| f.id.clone()))
                .with_confidence(0.8),
        );

        // trust
        let outcome = self.tracker.filter(facts);
        let poisoned = outcome.poisoned.len();
        for q in &outcome.poisoned {
            self.record(AuditKind::QuarantinedFact, q.fact.id.clone(), q.reason.clone());
        }
        let clean = outcome.clean;
        self.contradictions = self.tracker.detect_contradictions(&clean);
        for pair in self.contradictions.clone() {
            self.record(
                AuditKind::Contradiction,
                format!("{} / {}", pair.first, pair.second),
                format!("score {:.2}", pair.score),
            );
        }

        // correlations must reference clean facts only
        let known: BTreeSet<&str> = clean.iter().map(|f| f.id.as_str()).collect();
        let mut correlations = Vec::new();
        let mut dangling = Vec::new();
        for (i, mut correlation) in input.correlations.into_iter().enumerate() {
            if correlation.fact_ids.iter().all(|id| known.contains(id.as_str())) {
                correlation.strength = unit(correlation.strength);
                correlations.push(correlation);
            } else {
                dangling.push(format!("correlation #{}", i + 1));
            }
        }
        for subject in dangling {
            self.record(
                AuditKind::DanglingCorrelation,
                subject,
                "references a missing or quarantined fact",
            );
        }

        // a fact is backed by its own domain and the domains of facts correlated with it
        let domains: BTreeMap<&str, String> =
            clean.iter().map(|f| (f.id.as_str(), domain_of(&f.source))).collect();
        let mut verified_facts = 0;
        for fact in &clean {
            let domain_of_fact = |id: &str| domains.get(id).map(String::as_str);
            let mut sources: BTreeSet<&str> = domain_of_fact(&fact.id).into_iter().collect();
            for correlation in correlations.iter().filter(|c| c.fact_ids.contains(&fact.id)) {
                sources.extend(correlation.fact_ids.iter().filter_map(|id| domain_of_fact(id)));
            }
            let mut verified = false;
            for source in sources {
                verified = self.tracker.cross_reference(&fact.id, source).0;
            }
            if verified {
                verified_facts += 1;
            }
        }
        tracing::debug!(verified = verified_facts, clean = clean.len(), "cross-referenced clean facts");
        self.engine.trace_mut().add_step(
            ReasoningStep::new(
                StepKind::CorrelationDetection,
                format!("Accepted {} correlations", correlations.len()),
            )
            .with_correlations((1..=correlations.len()).map(|i| format!("corr-{i}")))
            .with_confidence(0.7),
        );

        // knowledge graph
        self.extractor.populate(&mut self.graph, &clean);
        for conflict in self.graph.detect_conflicts() {
            self.engine.trace_mut().add_conflict(format!(
                "{:?} conflict between {} and {}",
                conflict.kind, conflict.first, conflict.second
            ));
        }

        self.facts = clean;
        self.correlations = correlations;
        self.input_counts = (total_facts, rejected_inputs, poisoned);
        self.verified_facts = verified_facts;
        self.ingest_audit_len = self.audit.len();
        self.has_run = true;
        Ok(self.reason_and_generate().await)
    }

    /// Apply new weights and regenerate prioritization, chains and scenarios.
    ///
    /// Reports returned earlier are not affected.
    pub async fn update_weights_and_rerun(
        &mut self,
        new_weights: &BTreeMap<String, f64>,
    ) -> Result<AnalysisReport, SessionError> {
        if !self.has_run {
            return Err(SessionError::NotRun);
        }
        self.audit.truncate(self.ingest_audit_len);
        let update = self.engine.update_weights(new_weights);
        for id in update.unknown {
            self.record(AuditKind::UnknownFactor, id, "weight update for an unregistered factor");
        }
        for id in update.rejected {
            self.record(AuditKind::RejectedWeight, id, "non-finite weight");
        }
        Ok(self.reason_and_generate().await)
    }

    async fn reason_and_generate(&mut self) -> AnalysisReport {
        let target = self.config.target.name.clone();
        let prioritized = self.engine.prioritize_facts(&self.facts, &self.graph);
        let chains = self.engine.build_causal_chains(&self.graph, &target);

        let top: Vec<_> = prioritized
            .iter()
            .take(self.config.scenario.max_facts)
            .cloned()
            .collect();
        let mut jobs = Vec::new();
        for &horizon_months in &self.config.scenario.horizons {
            for polarity in Polarity::ALL {
                jobs.push(ScenarioJob {
                    horizon_months,
                    polarity,
                    paths: self.engine.simulate_future_paths(horizon_months, polarity, &top),
                });
            }
        }

        let context = self
            .assembler
            .build_context(&target, &prioritized, &self.correlations, self.engine.factors());
        let scenarios = self.assembler.generate_all(context, jobs).await;
        for scenario in scenarios.iter().filter(|s| s.is_fallback()) {
            let subject = format!("scenario {}m {}", scenario.horizon_months, scenario.polarity);
            let reason = scenario
                .degraded_reason
                .clone()
                .unwrap_or_else(|| "fallback scenario".to_string());
            self.record(AuditKind::DegradedScenario, subject, reason);
        }

        let recommendations = self.synthesizer.synthesize(&scenarios);
        let (total_facts, rejected_inputs, poisoned_facts) = self.input_counts;
        let sources = self.tracker.statistics();
        let snapshot = self.graph.snapshot();

        let statistics = RunStatistics {
            data_sources: sources.total_sources,
            total_facts,
            rejected_inputs,
            clean_facts: self.facts.len(),
            verified_facts: self.verified_facts,
            poisoned_facts,
            correlations: self.correlations.len(),
            concepts: self.graph.concept_count(),
            relations: self.graph.relation_count(),
            conflicts: snapshot.conflicts.len(),
            causal_chains: chains.len(),
            scenarios: scenarios.len(),
            fallback_scenarios: scenarios.iter().filter(|s| s.is_fallback()).count(),
            recommendations: recommendations.len(),
        };
        tracing::info!(
            facts = statistics.clean_facts,
            poisoned = statistics.poisoned_facts,
            concepts = statistics.concepts,
            chains = statistics.causal_chains,
            scenarios = statistics.scenarios,
            fallbacks = statistics.fallback_scenarios,
            generator = self.assembler.generator_name(),
            "analysis run complete"
        );

        AnalysisReport {
            run_id: Uuid::new_v4(),
            target,
            generated_at: Utc::now(),
            scenarios,
            recommendations,
            statistics,
            sources,
            weight_analysis: self.engine.weight_impact_analysis(),
            reasoning: self.engine.trace().summary(),
            chain_of_thought: self.engine.trace().clone(),
            graph: snapshot,
            contradictions: self.contradictions.clone(),
            audit: self.audit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockGenerator;

    fn session() -> AnalysisSession {
        AnalysisSession::new(SessionConfig::default(), Arc::new(MockGenerator::always("not json"))).unwrap()
    }

    #[tokio::test]
    async fn test_empty_factors_rejected_before_processing() {
        let mut s = session();
        let result = s.run(AnalysisInput::default()).await;
        assert!(matches!(result, Err(SessionError::NoFactors)));
        assert_eq!(s.tracker().statistics().total_sources, 0);
    }

    #[tokio::test]
    async fn test_rerun_requires_a_prior_run() {
        let mut s = session();
        let result = s.update_weights_and_rerun(&BTreeMap::new()).await;
        assert!(matches!(result, Err(SessionError::NotRun)));
    }
}
