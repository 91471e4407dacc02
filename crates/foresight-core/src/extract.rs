//! Knowledge extraction: tagged facts → concepts and relations
//!
//! Concepts come from the entities the Fact Analyzer tagged on each fact.
//! Relations are created between entities co-mentioned by a fact whose text
//! carries a relation cue ("leads to", "depends on", ...). Both steps are
//! keyword heuristics driven by [`Lexicons`].

use crate::config::TargetProfile;
use crate::graph::{Concept, ConceptType, KnowledgeGraph, Relation, RelationType};
use crate::lexicon::Lexicons;
use crate::Fact;
use std::collections::{BTreeMap, BTreeSet};

const DEFAULT_RELATION_STRENGTH: f64 = 0.6;
const DEFAULT_RELATION_CONFIDENCE: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExtractionSummary {
    pub concepts: usize,
    pub relations: usize,
    pub links: usize,
}

pub struct KnowledgeExtractor {
    target: TargetProfile,
    lexicons: Lexicons,
}

impl KnowledgeExtractor {
    pub fn new(target: TargetProfile, lexicons: Lexicons) -> Self {
        Self { target, lexicons }
    }

    /// One concept per distinct entity, enriched with every fact that mentions it.
    pub fn extract_concepts(&self, facts: &[Fact]) -> Vec<Concept> {
        let mut order: Vec<String> = Vec::new();
        let mut concepts: BTreeMap<String, Concept> = BTreeMap::new();

        for fact in facts {
            for entity in distinct_entities(fact) {
                match concepts.get_mut(entity) {
                    Some(concept) => {
                        concept.supporting_facts.insert(fact.id.clone());
                    }
                    None => {
                        let concept = Concept::new(entity, self.concept_type(entity, &fact.content))
                            .with_relevance(self.relevance_to_target(entity, &fact.content))
                            .with_fact(fact.id.clone())
                            .with_attribute("first_seen_in", fact.id.clone())
                            .with_attribute("tags", fact.tags.join(", "));
                        order.push(entity.to_string());
                        concepts.insert(entity.to_string(), concept);
                    }
                }
            }
        }

        order
            .into_iter()
            .filter_map(|name| concepts.remove(&name))
            .collect()
    }

    /// Relations between ordered entity pairs of facts that contain a relation cue.
    pub fn extract_relations(&self, facts: &[Fact], concepts: &[Concept]) -> Vec<Relation> {
        let known: BTreeSet<&str> = concepts.iter().map(|c| c.name.as_str()).collect();
        let cues = &self.lexicons.relation_cues;
        let typed = [
            (RelationType::Causes, &cues.causes),
            (RelationType::Affects, &cues.affects),
            (RelationType::DependsOn, &cues.depends_on),
        ];

        let mut relations = Vec::new();
        for fact in facts {
            let content = fact.content.to_lowercase();
            let entities: Vec<&str> = distinct_entities(fact)
                .into_iter()
                .filter(|e| known.contains(e))
                .collect();
            if entities.len() < 2 {
                continue;
            }
            let timeframe = self.lexicons.timeframe.infer(&content);

            for (relation_type, lexicon) in &typed {
                if !lexicon.matches(&content) {
                    continue;
                }
                for (i, source) in entities.iter().enumerate() {
                    for target in &entities[i + 1..] {
                        relations.push(
                            Relation::new(*source, *target, *relation_type, DEFAULT_RELATION_STRENGTH)
                                .with_timeframe(timeframe)
                                .with_confidence(DEFAULT_RELATION_CONFIDENCE)
                                .with_evidence(fact.id.clone()),
                        );
                    }
                }
            }
        }
        relations
    }

    /// Extract concepts and relations from `facts` into `graph`, linking every fact to its entities.
    pub fn populate(&self, graph: &mut KnowledgeGraph, facts: &[Fact]) -> ExtractionSummary {
        let concepts = self.extract_concepts(facts);
        let relations = self.extract_relations(facts, &concepts);
        let mut summary = ExtractionSummary {
            concepts: concepts.len(),
            relations: relations.len(),
            links: 0,
        };

        for concept in concepts {
            graph.add_concept(concept);
        }
        for fact in facts {
            for entity in distinct_entities(fact) {
                graph.link_fact(&fact.id, entity);
                summary.links += 1;
            }
        }
        for relation in relations {
            graph.add_relation(relation);
        }

        tracing::info!(
            concepts = summary.concepts,
            relations = summary.relations,
            links = summary.links,
            "knowledge graph populated"
        );
        summary
    }

    fn concept_type(&self, entity: &str, context: &str) -> ConceptType {
        if self.target.key_relations.iter().any(|k| k == entity) {
            return ConceptType::Country;
        }
        if self.target.organizations.iter().any(|k| k == entity) {
            return ConceptType::Organization;
        }
        let context = context.to_lowercase();
        let cues = &self.lexicons.concept_types;
        [
            (ConceptType::Country, &cues.country),
            (ConceptType::Organization, &cues.organization),
            (ConceptType::Event, &cues.event),
            (ConceptType::Trend, &cues.trend),
            (ConceptType::Resource, &cues.resource),
        ]
        .into_iter()
        .find(|(_, lexicon)| lexicon.matches(&context))
        .map(|(concept_type, _)| concept_type)
        .unwrap_or(ConceptType::General)
    }

    /// +0.5 if the target is named, +0.3 for a key entity, +0.2 per strong sector mentioned; capped at 1.
    pub fn relevance_to_target(&self, entity: &str, context: &str) -> f64 {
        let context = context.to_lowercase();
        let mut relevance: f64 = 0.0;
        if context.contains(&self.target.name.to_lowercase()) {
            relevance += 0.5;
        }
        if self.target.key_entities().any(|k| k == entity) {
            relevance += 0.3;
        }
        for sector in &self.target.strong_sectors {
            if context.contains(&sector.to_lowercase()) {
                relevance += 0.2;
            }
        }
        relevance.min(1.0)
    }
}

fn distinct_entities(fact: &Fact) -> Vec<&str> {
    let mut seen = BTreeSet::new();
    fact.entities
        .iter()
        .map(|e| e.trim())
        .filter(|e| !e.is_empty() && seen.insert(*e))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn fact(id: &str, content: &str, entities: &[&str]) -> Fact {
        Fact {
            id: id.to_string(),
            content: content.to_string(),
            source: "oecd.org".to_string(),
            published: None,
            confidence: 0.8,
            relevance: 0.5,
            tags: vec!["energy".to_string()],
            entities: entities.iter().map(|e| e.to_string()).collect(),
        }
    }

    fn extractor() -> KnowledgeExtractor {
        KnowledgeExtractor::new(TargetProfile::default(), Lexicons::default())
    }

    #[test]
    fn test_concepts_merge_across_facts() {
        let facts = vec![
            fact("f1", "Oil glut hits Russia", &["Russia", "Oil"]),
            fact("f2", "Russia budget strained", &["Russia"]),
        ];
        let concepts = extractor().extract_concepts(&facts);
        assert_eq!(concepts.len(), 2);
        assert_eq!(concepts[0].name, "Russia");
        assert_eq!(concepts[0].supporting_facts.len(), 2);
        assert_eq!(concepts[0].attributes["first_seen_in"], "f1");
        assert_eq!(concepts[1].concept_type, ConceptType::Resource);
    }

    #[test]
    fn test_relevance_formula() {
        let ex = extractor();
        assert_relative_eq!(
            ex.relevance_to_target("Ukraina", "Atlantis signs OZE deal with Ukraina"),
            0.5 + 0.3 + 0.2
        );
        assert_relative_eq!(ex.relevance_to_target("Chile", "copper prices"), 0.0);
        assert_eq!(ex.concept_type("NATO", "summit"), ConceptType::Organization);
    }

    #[test]
    fn test_relations_need_a_cue() {
        let ex = extractor();
        let facts = vec![
            fact("f1", "Embargo leads to chip shortage in Atlantis", &["Embargo", "Chips", "Atlantis"]),
            fact("f2", "Embargo and chips mentioned together", &["Embargo", "Chips"]),
        ];
        let concepts = ex.extract_concepts(&facts);
        let relations = ex.extract_relations(&facts, &concepts);
        assert_eq!(relations.len(), 3);
        assert!(relations.iter().all(|r| r.relation_type == RelationType::Causes));
        assert_eq!(relations[0].source, "Embargo");
        assert_eq!(relations[0].target, "Chips");
        assert!(relations[0].evidence.contains("f1"));
    }

    #[test]
    fn test_populate_links_facts() {
        let ex = extractor();
        let mut graph = KnowledgeGraph::new();
        let facts = vec![fact("f1", "Embargo causes shortage", &["Embargo", "Shortage"])];
        let summary = ex.populate(&mut graph, &facts);
        assert_eq!(summary.concepts, 2);
        assert_eq!(summary.relations, 1);
        assert_eq!(graph.concepts_for_fact("f1").count(), 2);
        assert_eq!(graph.find_causal_paths("Embargo", "Shortage", 5).len(), 1);
    }
}
