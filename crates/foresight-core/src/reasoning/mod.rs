//! Reasoning Engine: weighted factors → prioritized facts → causal chains → future paths
//!
//! ## Stages
//!
//! ```text
//! register_situation_factors ──► prioritize_facts ──► build_causal_chains ──► simulate_future_paths
//!        ▲                                                                            │
//!        └──────────── update_weights (regresses to FactorsRegistered) ◄──────────────┘
//! ```
//!
//! Each stage may be re-invoked. A weight update invalidates prioritization
//! and chains; those must be rerun before new scenarios are produced.
//! Already-emitted scenarios are never touched.
//!
//! ## Scores
//!
//! - priority: `0.3·relevance + 0.2·confidence + Σ 0.4·(weight/100) + Σ 0.1·importance`,
//!   summed over matched factors and linked concepts, clamped to [0, 1]
//! - path probability: `clamp(weight/100 · direction · horizon, 0, 0.95)` with
//!   direction `1.2` (matching) or `0.8`, horizon `1.1` (fitting) or `1.0`
//! - path confidence: `clamp(weight/100 · 1.2, 0, 0.9)`

pub mod trace;

use crate::config::ReasoningConfig;
use crate::graph::{Concept, KnowledgeGraph};
use crate::lexicon::Lexicons;
use crate::{truncate_chars, Fact, FactId, FactorInput, ImpactDirection, IngestError, Polarity, Timeframe};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use trace::{ChainOfThought, ReasoningStep, StepKind};

// ============================================================================
// Types
// ============================================================================

/// A registered situation driver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedFactor {
    pub id: String,
    pub description: String,
    pub weight: f64,
    pub impact_direction: ImpactDirection,
    pub timeframe: Timeframe,
    pub keywords: Vec<String>,
    pub matched_facts: Vec<FactId>,
    pub matched_concepts: Vec<String>,
}

impl WeightedFactor {
    pub fn normalized_weight(&self) -> f64 {
        self.weight / 100.0
    }

    /// Any keyword of the description occurs in the fact text.
    pub fn matches_fact(&self, fact: &Fact) -> bool {
        let content = fact.content.to_lowercase();
        self.keywords.iter().any(|k| content.contains(k.as_str()))
    }

    /// Any keyword occurs in the concept name or one of its attribute values.
    pub fn matches_concept(&self, concept: &Concept) -> bool {
        let name = concept.name.to_lowercase();
        let attributes: Vec<String> = concept.attributes.values().map(|v| v.to_lowercase()).collect();
        self.keywords
            .iter()
            .any(|k| name.contains(k.as_str()) || attributes.iter().any(|a| a.contains(k.as_str())))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrioritizedFact {
    pub fact: Fact,
    pub score: f64,
    pub matched_factors: Vec<String>,
}

/// A graph path from a factor-linked concept to the target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalRelation {
    pub id: String,
    pub factor_id: String,
    pub cause: String,
    pub effect: String,
    pub path: Vec<String>,
    pub strength: f64,
    pub timeframe: Timeframe,
    pub explanation: String,
    pub supporting_facts: Vec<FactId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningPath {
    pub id: String,
    pub horizon_months: u32,
    pub polarity: Polarity,
    pub factors_sequence: Vec<String>,
    pub causal_chain: Vec<CausalRelation>,
    pub supporting_facts: Vec<FactId>,
    pub conclusion: String,
    pub probability: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Empty,
    FactorsRegistered,
    FactsPrioritized,
    ChainsBuilt,
    PathsSimulated,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Registration {
    pub registered: usize,
    pub rejected: Vec<IngestError>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WeightUpdate {
    /// `(factor id, old weight, new weight)`
    pub applied: Vec<(String, f64, f64)>,
    pub unknown: Vec<String>,
    pub rejected: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightImpactAnalysis {
    pub total_factors: usize,
    pub total_weight: f64,
    pub weight_distribution: BTreeMap<String, f64>,
    pub weight_share: BTreeMap<String, f64>,
    pub impact_by_direction: BTreeMap<ImpactDirection, f64>,
    pub impact_by_timeframe: BTreeMap<Timeframe, f64>,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ReasoningError {
    #[error("no situation factors registered")]
    NoFactors,
}

// ============================================================================
// Engine
// ============================================================================

pub struct ReasoningEngine {
    config: ReasoningConfig,
    lexicons: Lexicons,
    factors: BTreeMap<String, WeightedFactor>,
    chains: Vec<CausalRelation>,
    stage: Stage,
    trace: ChainOfThought,
}

impl ReasoningEngine {
    pub fn new(config: ReasoningConfig, lexicons: Lexicons) -> Self {
        Self {
            config,
            lexicons,
            factors: BTreeMap::new(),
            chains: Vec::new(),
            stage: Stage::Empty,
            trace: ChainOfThought::new("reasoning_for_scenarios"),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn factor(&self, id: &str) -> Option<&WeightedFactor> {
        self.factors.get(id)
    }

    pub fn factors(&self) -> impl Iterator<Item = &WeightedFactor> {
        self.factors.values()
    }

    pub fn causal_chains(&self) -> &[CausalRelation] {
        &self.chains
    }

    pub fn trace(&self) -> &ChainOfThought {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut ChainOfThought {
        &mut self.trace
    }

    /// Replace the registered factors, inferring direction and timeframe from each description.
    ///
    /// Factors with a non-finite weight are rejected individually; an empty
    /// result is a precondition violation.
    pub fn register_situation_factors<I>(&mut self, factors: I) -> Result<Registration, ReasoningError>
    where
        I: IntoIterator<Item = (String, FactorInput)>,
    {
        let mut registration = Registration::default();
        let mut registered = BTreeMap::new();

        for (id, input) in factors {
            if let Err(e) = input.validate(&id) {
                tracing::warn!(factor = %id, error = %e, "factor rejected");
                registration.rejected.push(e);
                continue;
            }
            let factor = WeightedFactor {
                impact_direction: self.lexicons.impact_direction(&input.description),
                timeframe: self.lexicons.timeframe.infer(&input.description),
                keywords: self.lexicons.content_words(&input.description),
                id: id.clone(),
                description: input.description,
                weight: input.weight,
                matched_facts: Vec::new(),
                matched_concepts: Vec::new(),
            };
            self.trace
                .register_key_factor(&id, factor.weight, factor.impact_direction);
            registered.insert(id, factor);
        }

        if registered.is_empty() {
            return Err(ReasoningError::NoFactors);
        }
        registration.registered = registered.len();
        self.factors = registered;
        self.chains.clear();
        self.stage = Stage::FactorsRegistered;
        tracing::info!(factors = registration.registered, "situation factors registered");
        Ok(registration)
    }

    /// Score every fact and return them sorted by descending score (stable on ties).
    pub fn prioritize_facts(&mut self, facts: &[Fact], graph: &KnowledgeGraph) -> Vec<PrioritizedFact> {
        let importance = graph.importance_scores();
        let w = self.config.score_weights;

        for factor in self.factors.values_mut() {
            factor.matched_facts.clear();
        }

        let mut prioritized: Vec<PrioritizedFact> = facts
            .iter()
            .map(|fact| {
                let mut score = w.relevance * fact.relevance + w.confidence * fact.confidence;
                let mut matched_factors = Vec::new();

                for factor in self.factors.values_mut() {
                    if factor.matches_fact(fact) {
                        score += w.factor * factor.normalized_weight();
                        factor.matched_facts.push(fact.id.clone());
                        matched_factors.push(factor.id.clone());
                    }
                }
                for concept in graph.concepts_for_fact(&fact.id) {
                    score += w.centrality * importance.get(concept).copied().unwrap_or(0.0);
                }

                PrioritizedFact {
                    fact: fact.clone(),
                    score: score.clamp(0.0, 1.0),
                    matched_factors,
                }
            })
            .collect();

        prioritized.sort_by(|a, b| b.score.total_cmp(&a.score));

        self.trace.add_step(
            ReasoningStep::new(
                StepKind::Prioritization,
                format!("Prioritized {} facts by factor weights", facts.len()),
            )
            .with_facts(prioritized.iter().take(20).map(|p| p.fact.id.clone()))
            .with_weights(self.factors.values().map(|f| (f.id.clone(), f.weight)))
            .with_confidence(0.8),
        );
        self.stage = Stage::FactsPrioritized;
        prioritized
    }

    /// One causal relation per graph path from a factor-matched concept to `target`.
    pub fn build_causal_chains(&mut self, graph: &KnowledgeGraph, target: &str) -> Vec<CausalRelation> {
        let mut chains = Vec::new();

        for factor in self.factors.values_mut() {
            factor.matched_concepts = graph
                .concepts()
                .filter(|c| c.name != target && factor.matches_concept(c))
                .map(|c| c.name.clone())
                .collect();

            let mut seq = 0usize;
            for concept in &factor.matched_concepts {
                for path in graph.find_causal_paths(concept, target, self.config.max_path_depth) {
                    if path.len() < 2 {
                        continue;
                    }
                    seq += 1;
                    chains.push(CausalRelation {
                        id: format!("{}-{}", factor.id, seq),
                        factor_id: factor.id.clone(),
                        cause: path[0].clone(),
                        effect: target.to_string(),
                        explanation: format!(
                            "Factor {} ({}) reaches {} in {} steps",
                            factor.id,
                            truncate_chars(&factor.description, 100),
                            target,
                            path.len() - 1
                        ),
                        path,
                        strength: factor.normalized_weight(),
                        timeframe: factor.timeframe,
                        supporting_facts: factor.matched_facts.clone(),
                    });
                }
            }
        }

        for chain in &chains {
            self.trace.add_causal_relation(chain.clone());
        }
        self.trace.add_step(
            ReasoningStep::new(
                StepKind::CausalInference,
                format!("Built {} causal chains towards {}", chains.len(), target),
            )
            .with_confidence(0.75),
        );
        tracing::info!(chains = chains.len(), target, "causal chains built");

        self.chains = chains.clone();
        self.stage = Stage::ChainsBuilt;
        chains
    }

    /// Probability of a factor's path for a horizon and polarity.
    pub fn path_probability(&self, factor: &WeightedFactor, polarity: Polarity, horizon_months: u32) -> f64 {
        let direction = if polarity.matches(factor.impact_direction) {
            1.2
        } else {
            0.8
        };
        let horizon = if factor.timeframe.fits_horizon(horizon_months) {
            1.1
        } else {
            1.0
        };
        let p = factor.normalized_weight() * direction * horizon;
        if p.is_nan() {
            return 0.0;
        }
        p.clamp(0.0, self.config.probability_cap)
    }

    pub fn path_confidence(&self, factor: &WeightedFactor) -> f64 {
        let c = factor.normalized_weight() * 1.2;
        if c.is_nan() {
            return 0.0;
        }
        c.clamp(0.0, self.config.confidence_cap)
    }

    /// Reasoning paths for the top factors compatible with the horizon and polarity.
    ///
    /// Paths are emitted even when a factor has no causal chain to the target.
    pub fn simulate_future_paths(
        &mut self,
        horizon_months: u32,
        polarity: Polarity,
        top_facts: &[PrioritizedFact],
    ) -> Vec<ReasoningPath> {
        if self.stage < Stage::ChainsBuilt {
            tracing::warn!(stage = ?self.stage, "simulating before causal chains were built");
        }

        let mut eligible: Vec<&WeightedFactor> = self
            .factors
            .values()
            .filter(|f| f.timeframe.fits_horizon(horizon_months) && !polarity.opposes(f.impact_direction))
            .collect();
        eligible.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        let paths: Vec<ReasoningPath> = eligible
            .into_iter()
            .take(self.config.top_factors)
            .enumerate()
            .map(|(i, factor)| {
                let matched: BTreeSet<&str> = factor.matched_facts.iter().map(String::as_str).collect();
                ReasoningPath {
                    id: format!("{horizon_months}m-{polarity}-path-{}", i + 1),
                    horizon_months,
                    polarity,
                    factors_sequence: vec![factor.id.clone()],
                    causal_chain: self
                        .chains
                        .iter()
                        .filter(|c| c.factor_id == factor.id)
                        .cloned()
                        .collect(),
                    supporting_facts: top_facts
                        .iter()
                        .filter(|p| matched.contains(p.fact.id.as_str()))
                        .map(|p| p.fact.id.clone())
                        .collect(),
                    conclusion: format!(
                        "Factor {} ({}) leads to a {} scenario within {} months",
                        factor.id,
                        truncate_chars(&factor.description, 100),
                        polarity,
                        horizon_months
                    ),
                    probability: self.path_probability(factor, polarity, horizon_months),
                    confidence: self.path_confidence(factor),
                }
            })
            .collect();

        let average = if paths.is_empty() {
            0.5
        } else {
            paths.iter().map(|p| p.confidence).sum::<f64>() / paths.len() as f64
        };
        self.trace.add_step(
            ReasoningStep::new(
                StepKind::ScenarioGeneration,
                format!(
                    "Simulated {} paths for the {} {}-month scenario",
                    paths.len(),
                    polarity,
                    horizon_months
                ),
            )
            .with_confidence(average),
        );
        self.stage = Stage::PathsSimulated;
        paths
    }

    /// Change weights of registered factors. Prioritization and chains must be rerun afterwards.
    pub fn update_weights(&mut self, new_weights: &BTreeMap<String, f64>) -> WeightUpdate {
        let mut update = WeightUpdate::default();

        for (id, &weight) in new_weights {
            let Some(factor) = self.factors.get_mut(id) else {
                tracing::warn!(factor = %id, "weight update for unknown factor");
                update.unknown.push(id.clone());
                continue;
            };
            if !weight.is_finite() {
                update.rejected.push(id.clone());
                continue;
            }
            let old = factor.weight;
            factor.weight = weight;
            tracing::info!(factor = %id, "weight {old} → {weight}");
            self.trace.add_step(
                ReasoningStep::new(StepKind::WeightApplication, format!("Manual weight change for factor {id}"))
                    .with_weights([(id.clone(), weight)])
                    .with_confidence(1.0),
            );
            self.trace.register_key_factor(id, weight, factor.impact_direction);
            update.applied.push((id.clone(), old, weight));
        }

        if !update.applied.is_empty() {
            self.chains.clear();
            self.stage = Stage::FactorsRegistered;
        }
        update
    }

    pub fn weight_impact_analysis(&self) -> WeightImpactAnalysis {
        let total_weight: f64 = self.factors.values().map(|f| f.weight).sum();
        let mut impact_by_direction: BTreeMap<ImpactDirection, f64> = [
            ImpactDirection::Positive,
            ImpactDirection::Negative,
            ImpactDirection::Neutral,
        ]
        .into_iter()
        .map(|d| (d, 0.0))
        .collect();
        let mut impact_by_timeframe: BTreeMap<Timeframe, f64> =
            Timeframe::ALL.into_iter().map(|t| (t, 0.0)).collect();

        let mut weight_distribution = BTreeMap::new();
        let mut weight_share = BTreeMap::new();
        for factor in self.factors.values() {
            weight_distribution.insert(factor.id.clone(), factor.weight);
            let share = if total_weight == 0.0 {
                0.0
            } else {
                factor.weight / total_weight
            };
            weight_share.insert(factor.id.clone(), share);
            *impact_by_direction.entry(factor.impact_direction).or_insert(0.0) += factor.weight;
            *impact_by_timeframe.entry(factor.timeframe).or_insert(0.0) += factor.weight;
        }

        WeightImpactAnalysis {
            total_factors: self.factors.len(),
            total_weight,
            weight_distribution,
            weight_share,
            impact_by_direction,
            impact_by_timeframe,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ConceptType, Relation, RelationType};
    use approx::assert_relative_eq;

    fn engine_with(factors: &[(&str, &str, f64)]) -> ReasoningEngine {
        let mut engine = ReasoningEngine::new(ReasoningConfig::default(), Lexicons::default());
        engine
            .register_situation_factors(
                factors
                    .iter()
                    .map(|(id, desc, w)| (id.to_string(), FactorInput::new(*desc, *w))),
            )
            .unwrap();
        engine
    }

    fn fact(id: &str, content: &str) -> Fact {
        Fact {
            id: id.to_string(),
            content: content.to_string(),
            source: "un.org".to_string(),
            published: None,
            confidence: 0.5,
            relevance: 0.5,
            tags: vec![],
            entities: vec![],
        }
    }

    #[test]
    fn test_registration_infers_direction_and_timeframe() {
        let engine = engine_with(&[
            ("a", "Embargo on chips lasting a decade", 30.0),
            ("b", "Rapid growth of renewables within months", 20.0),
        ]);
        let a = engine.factor("a").unwrap();
        assert_eq!(a.impact_direction, ImpactDirection::Negative);
        assert_eq!(a.timeframe, Timeframe::Long);
        let b = engine.factor("b").unwrap();
        assert_eq!(b.impact_direction, ImpactDirection::Positive);
        assert_eq!(b.timeframe, Timeframe::Short);
        assert_eq!(engine.stage(), Stage::FactorsRegistered);
    }

    #[test]
    fn test_empty_registration_rejected() {
        let mut engine = ReasoningEngine::new(ReasoningConfig::default(), Lexicons::default());
        let result = engine.register_situation_factors(vec![(
            "x".to_string(),
            FactorInput::new("bad", f64::INFINITY),
        )]);
        assert_eq!(result, Err(ReasoningError::NoFactors));
    }

    #[test]
    fn test_priority_score_formula() {
        let mut engine = engine_with(&[("a", "shortage of procesorów", 30.0)]);
        let graph = KnowledgeGraph::new();
        let facts = vec![fact("f1", "Brak procesorów w Europie"), fact("f2", "Weather report")];
        let ranked = engine.prioritize_facts(&facts, &graph);

        assert_eq!(ranked[0].fact.id, "f1");
        assert_relative_eq!(ranked[0].score, 0.3 * 0.5 + 0.2 * 0.5 + 0.4 * 0.3);
        assert_relative_eq!(ranked[1].score, 0.3 * 0.5 + 0.2 * 0.5);
        assert_eq!(engine.factor("a").unwrap().matched_facts, vec!["f1".to_string()]);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let mut engine = engine_with(&[("a", "unrelated words entirely", 10.0)]);
        let facts = vec![fact("f1", "one"), fact("f2", "two"), fact("f3", "three")];
        let ids: Vec<String> = engine
            .prioritize_facts(&facts, &KnowledgeGraph::new())
            .into_iter()
            .map(|p| p.fact.id)
            .collect();
        assert_eq!(ids, vec!["f1", "f2", "f3"]);
    }

    #[test]
    fn test_causal_chains_and_paths() {
        let mut graph = KnowledgeGraph::new();
        graph.add_concept(Concept::new("Embargo", ConceptType::Event));
        graph.add_concept(Concept::new("Atlantis", ConceptType::Country));
        graph.add_relation(Relation::new("Embargo", "Chips", RelationType::Causes, 0.6));
        graph.add_relation(Relation::new("Chips", "Atlantis", RelationType::Affects, 0.6));

        let mut engine = engine_with(&[("a", "Embargo on chips lasting a decade", 30.0)]);
        let chains = engine.build_causal_chains(&graph, "Atlantis");
        // "embargo" matches Embargo, "chips" matches Chips; each has a path to Atlantis
        assert_eq!(chains.len(), 2);
        assert_relative_eq!(chains[0].strength, 0.3);
        assert_eq!(chains[0].path, vec!["Embargo", "Chips", "Atlantis"]);

        let paths = engine.simulate_future_paths(36, Polarity::Negative, &[]);
        assert_eq!(paths.len(), 1);
        assert_eq!(paths[0].causal_chain.len(), 2);
        assert_relative_eq!(paths[0].probability, 0.3 * 1.2 * 1.1);
        assert_relative_eq!(paths[0].confidence, 0.36);

        assert!(engine.simulate_future_paths(36, Polarity::Positive, &[]).is_empty());
        assert!(engine.simulate_future_paths(12, Polarity::Negative, &[]).is_empty());
    }

    #[test]
    fn test_neutral_factor_serves_both_polarities() {
        let mut engine = engine_with(&[("d", "Weak ceasefire holds", 10.0)]);
        for polarity in Polarity::ALL {
            let paths = engine.simulate_future_paths(36, polarity, &[]);
            assert_eq!(paths.len(), 1);
            assert!(paths[0].causal_chain.is_empty());
            assert_relative_eq!(paths[0].probability, 0.1 * 0.8 * 1.1);
        }
    }

    #[test]
    fn test_horizon_multiplier_only_when_fitting() {
        let engine = engine_with(&[("a", "Embargo on chips lasting a decade", 50.0)]);
        let factor = engine.factor("a").unwrap();
        assert_relative_eq!(engine.path_probability(factor, Polarity::Negative, 12), 0.5 * 1.2);
        assert_relative_eq!(engine.path_probability(factor, Polarity::Negative, 36), 0.5 * 1.2 * 1.1);
    }

    #[test]
    fn test_update_weights_regresses_stage() {
        let mut engine = engine_with(&[("a", "Embargo on chips", 30.0)]);
        engine.prioritize_facts(&[], &KnowledgeGraph::new());
        let update = engine.update_weights(&BTreeMap::from([
            ("a".to_string(), 45.0),
            ("zz".to_string(), 5.0),
        ]));
        assert_eq!(update.applied, vec![("a".to_string(), 30.0, 45.0)]);
        assert_eq!(update.unknown, vec!["zz".to_string()]);
        assert_eq!(engine.stage(), Stage::FactorsRegistered);
        assert_relative_eq!(engine.factor("a").unwrap().weight, 45.0);
    }

    #[test]
    fn test_weight_impact_analysis() {
        let engine = engine_with(&[
            ("a", "Embargo on chips", 30.0),
            ("f", "Growth of renewables", 10.0),
        ]);
        let analysis = engine.weight_impact_analysis();
        assert_eq!(analysis.total_factors, 2);
        assert_relative_eq!(analysis.total_weight, 40.0);
        assert_relative_eq!(analysis.weight_share["a"], 0.75);
        assert_relative_eq!(analysis.impact_by_direction[&ImpactDirection::Negative], 30.0);
        assert_relative_eq!(analysis.impact_by_timeframe[&Timeframe::Medium], 40.0);
    }
}
