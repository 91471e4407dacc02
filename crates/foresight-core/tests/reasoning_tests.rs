//! Reasoning engine over an extracted knowledge graph.

use approx::assert_relative_eq;
use foresight_core::config::{ReasoningConfig, TargetProfile};
use foresight_core::extract::KnowledgeExtractor;
use foresight_core::reasoning::Stage;
use foresight_core::{
    Fact, FactorInput, ImpactDirection, KnowledgeGraph, Lexicons, Polarity, ReasoningEngine, Timeframe,
};
use std::collections::BTreeMap;

const FACTOR_A: &str = "Wskutek zaistniałej przed miesiącem katastrofy naturalnej wiodący światowy \
    producent procesorów graficznych stracił 60% zdolności produkcyjnych; odbudowa mocy produkcyjnych \
    poprzez inwestycje w filie zlokalizowane na obszarach nieobjętych katastrofą potrwa do końca roku 2028";

const FACTOR_F: &str = "Mamy gwałtowny wzrost udziału energii z OZE w miksie energetycznym krajów UE \
    oraz Chin od początku roku 2028; wzrost podaży energii z OZE oraz nadpodaż paliw węglowodorowych \
    przekładają się na znaczny spadek cen ropy do poziomu 30-35 USD za baryłkę";

fn fact(id: &str, content: &str, relevance: f64, confidence: f64, entities: &[&str]) -> Fact {
    Fact {
        id: id.to_string(),
        content: content.to_string(),
        source: "oecd.org".to_string(),
        published: None,
        confidence,
        relevance,
        tags: vec!["tech".to_string()],
        entities: entities.iter().map(|e| e.to_string()).collect(),
    }
}

fn engine() -> ReasoningEngine {
    let mut engine = ReasoningEngine::new(ReasoningConfig::default(), Lexicons::default());
    engine
        .register_situation_factors([
            ("a".to_string(), FactorInput::new(FACTOR_A, 30.0)),
            ("f".to_string(), FactorInput::new(FACTOR_F, 25.0)),
        ])
        .unwrap();
    engine
}

fn facts() -> Vec<Fact> {
    vec![
        fact("f2", "Weather forecast calls for sunshine over the weekend", 0.2, 0.5, &[]),
        fact(
            "f1",
            "Wiodący producent procesorów graficznych ogłosił spadek produkcji, which leads to shortages in Atlantis",
            0.8,
            0.9,
            &["Producent procesorów", "Atlantis"],
        ),
    ]
}

#[test]
fn factor_inference_from_descriptions() {
    let engine = engine();
    let a = engine.factor("a").unwrap();
    // "odbudowa"/"inwestycje" are growth cues; "miesiącem" carries the short cue "miesiące"
    assert_eq!(a.impact_direction, ImpactDirection::Positive);
    assert_eq!(a.timeframe, Timeframe::Short);

    let f = engine.factor("f").unwrap();
    assert_eq!(f.impact_direction, ImpactDirection::Negative);
    assert_eq!(f.timeframe, Timeframe::Medium);
    assert!(f.keywords.iter().any(|k| k == "spadek"));
}

#[test]
fn weighted_factors_put_matching_fact_first() {
    let mut engine = engine();
    let ranked = engine.prioritize_facts(&facts(), &KnowledgeGraph::new());

    assert_eq!(ranked[0].fact.id, "f1");
    assert_eq!(ranked[0].matched_factors, vec!["a".to_string(), "f".to_string()]);
    assert_relative_eq!(ranked[0].score, 0.3 * 0.8 + 0.2 * 0.9 + 0.4 * 0.30 + 0.4 * 0.25, epsilon = 1e-12);
    assert_relative_eq!(ranked[1].score, 0.3 * 0.2 + 0.2 * 0.5, epsilon = 1e-12);
    assert_eq!(engine.stage(), Stage::FactsPrioritized);
}

#[test]
fn chains_follow_extracted_relations_to_target() {
    let facts = facts();
    let mut graph = KnowledgeGraph::new();
    KnowledgeExtractor::new(TargetProfile::default(), Lexicons::default()).populate(&mut graph, &facts);

    let mut engine = engine();
    let ranked = engine.prioritize_facts(&facts, &graph);
    assert_eq!(ranked[0].fact.id, "f1");

    let chains = engine.build_causal_chains(&graph, "Atlantis");
    assert_eq!(chains.len(), 1);
    let chain = &chains[0];
    assert_eq!(chain.id, "a-1");
    assert_eq!(chain.path, vec!["Producent procesorów", "Atlantis"]);
    assert_eq!(chain.effect, "Atlantis");
    assert_relative_eq!(chain.strength, 0.3);
    assert_eq!(chain.supporting_facts, vec!["f1".to_string()]);
    assert_eq!(engine.trace().causal_relations().len(), 1);
}

#[test]
fn paths_respect_horizon_and_polarity() {
    let facts = facts();
    let mut graph = KnowledgeGraph::new();
    KnowledgeExtractor::new(TargetProfile::default(), Lexicons::default()).populate(&mut graph, &facts);
    let mut engine = engine();
    let top = engine.prioritize_facts(&facts, &graph);
    engine.build_causal_chains(&graph, "Atlantis");

    // a: positive, short → only the 12-month positive scenario
    let p12 = engine.simulate_future_paths(12, Polarity::Positive, &top);
    assert_eq!(p12.len(), 1);
    assert_eq!(p12[0].id, "12m-positive-path-1");
    assert_eq!(p12[0].factors_sequence, vec!["a".to_string()]);
    assert_eq!(p12[0].causal_chain.len(), 1);
    assert_eq!(p12[0].supporting_facts, vec!["f1".to_string()]);
    assert_relative_eq!(p12[0].probability, 0.3 * 1.2 * 1.1);
    assert!(engine.simulate_future_paths(12, Polarity::Negative, &top).is_empty());

    // f: negative, medium → only the 36-month negative scenario
    let n36 = engine.simulate_future_paths(36, Polarity::Negative, &top);
    assert_eq!(n36.len(), 1);
    assert_relative_eq!(n36[0].probability, 0.25 * 1.2 * 1.1);
    assert!(n36[0].conclusion.starts_with("Factor f ("));
    assert!(n36[0].conclusion.ends_with("leads to a negative scenario within 36 months"));
    assert!(engine.simulate_future_paths(36, Polarity::Positive, &top).is_empty());
    assert_eq!(engine.stage(), Stage::PathsSimulated);
}

#[test]
fn reweighting_changes_ranking_inputs_not_old_paths() {
    let facts = facts();
    let graph = KnowledgeGraph::new();
    let mut engine = engine();
    engine.prioritize_facts(&facts, &graph);
    engine.build_causal_chains(&graph, "Atlantis");
    let before = engine.simulate_future_paths(12, Polarity::Positive, &[]);

    engine.update_weights(&BTreeMap::from([("a".to_string(), 70.0)]));
    assert_eq!(engine.stage(), Stage::FactorsRegistered);
    assert!(engine.causal_chains().is_empty());

    let after = engine.simulate_future_paths(12, Polarity::Positive, &[]);
    assert_relative_eq!(before[0].probability, 0.3 * 1.2 * 1.1);
    assert_relative_eq!(after[0].probability, 0.7 * 1.2 * 1.1);
    assert_relative_eq!(engine.trace().confidence_trajectory().last().copied().unwrap(), 0.84);
}
