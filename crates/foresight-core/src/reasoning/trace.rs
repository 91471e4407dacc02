//! Chain-of-thought trace
//!
//! An append-only log of the reasoning steps taken during a run, the causal
//! relations inferred and the key factors registered. Exported with the run
//! report so every scenario can be explained after the fact.

use super::CausalRelation;
use crate::{FactId, ImpactDirection};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    FactAnalysis,
    CorrelationDetection,
    WeightApplication,
    CausalInference,
    ScenarioGeneration,
    ConflictResolution,
    Prioritization,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReasoningStep {
    pub index: usize,
    pub kind: StepKind,
    pub content: String,
    pub facts_used: Vec<FactId>,
    pub correlations_used: Vec<String>,
    pub weights_applied: BTreeMap<String, f64>,
    pub confidence: f64,
    pub at: DateTime<Utc>,
}

impl ReasoningStep {
    pub fn new(kind: StepKind, content: impl Into<String>) -> Self {
        Self {
            index: 0,
            kind,
            content: content.into(),
            facts_used: Vec::new(),
            correlations_used: Vec::new(),
            weights_applied: BTreeMap::new(),
            confidence: 0.5,
            at: Utc::now(),
        }
    }

    pub fn with_facts(mut self, facts: impl IntoIterator<Item = FactId>) -> Self {
        self.facts_used.extend(facts);
        self
    }

    pub fn with_correlations(mut self, correlations: impl IntoIterator<Item = String>) -> Self {
        self.correlations_used.extend(correlations);
        self
    }

    pub fn with_weights(mut self, weights: impl IntoIterator<Item = (String, f64)>) -> Self {
        self.weights_applied.extend(weights);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = crate::unit(confidence);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyFactor {
    pub id: String,
    pub weight: f64,
    pub direction: ImpactDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceSummary {
    pub goal: String,
    pub steps: usize,
    pub causal_relations: usize,
    pub key_factors: usize,
    pub conflicts: usize,
    pub average_confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainOfThought {
    goal: String,
    steps: Vec<ReasoningStep>,
    causal_relations: Vec<CausalRelation>,
    key_factors: BTreeMap<String, KeyFactor>,
    conflicts: Vec<String>,
}

impl ChainOfThought {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            steps: Vec::new(),
            causal_relations: Vec::new(),
            key_factors: BTreeMap::new(),
            conflicts: Vec::new(),
        }
    }

    pub fn add_step(&mut self, mut step: ReasoningStep) {
        step.index = self.steps.len() + 1;
        self.steps.push(step);
    }

    pub fn add_causal_relation(&mut self, relation: CausalRelation) {
        self.causal_relations.push(relation);
    }

    pub fn register_key_factor(&mut self, id: &str, weight: f64, direction: ImpactDirection) {
        self.key_factors.insert(
            id.to_string(),
            KeyFactor {
                id: id.to_string(),
                weight,
                direction,
            },
        );
    }

    pub fn add_conflict(&mut self, description: impl Into<String>) {
        self.conflicts.push(description.into());
    }

    pub fn steps(&self) -> &[ReasoningStep] {
        &self.steps
    }

    pub fn causal_relations(&self) -> &[CausalRelation] {
        &self.causal_relations
    }

    pub fn key_factors(&self) -> impl Iterator<Item = &KeyFactor> {
        self.key_factors.values()
    }

    pub fn confidence_trajectory(&self) -> Vec<f64> {
        self.steps.iter().map(|s| s.confidence).collect()
    }

    pub fn average_confidence(&self) -> f64 {
        if self.steps.is_empty() {
            return 0.0;
        }
        self.steps.iter().map(|s| s.confidence).sum::<f64>() / self.steps.len() as f64
    }

    pub fn summary(&self) -> TraceSummary {
        TraceSummary {
            goal: self.goal.clone(),
            steps: self.steps.len(),
            causal_relations: self.causal_relations.len(),
            key_factors: self.key_factors.len(),
            conflicts: self.conflicts.len(),
            average_confidence: self.average_confidence(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_steps_are_numbered_and_averaged() {
        let mut trace = ChainOfThought::new("scenarios");
        trace.add_step(ReasoningStep::new(StepKind::FactAnalysis, "5 facts").with_confidence(0.8));
        trace.add_step(ReasoningStep::new(StepKind::Prioritization, "ranked").with_confidence(0.6));

        assert_eq!(trace.steps()[1].index, 2);
        assert_eq!(trace.confidence_trajectory(), vec![0.8, 0.6]);
        assert!((trace.average_confidence() - 0.7).abs() < 1e-9);
        assert_eq!(trace.summary().steps, 2);
    }
}
