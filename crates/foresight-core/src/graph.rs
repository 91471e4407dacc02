//! Knowledge Graph: concepts and directed causal relations
//!
//! A petgraph `DiGraph` whose node weights are [`Concept`]s and whose edge
//! weights are [`Relation`]s. Parallel edges of different relation types are
//! allowed; upserting an existing `(source, target, type)` edge enriches it.
//!
//! `conflicts_with` relations never become edges: they live in a separate
//! list, so causal search cannot route through a stated conflict.
//!
//! The graph is append-only. There is no removal API; explanations built
//! earlier in a run stay reproducible.
//!
//! ## Centrality
//!
//! Computed over the collapsed simple digraph (parallel edges and self loops
//! ignored):
//! - degree centrality: `(in + out) / (n - 1)`, `1.0` for a single-node graph
//! - betweenness: Brandes, normalized by `1 / ((n - 1)(n - 2))`
//! - importance: `0.5 × degree + 0.5 × betweenness`

use crate::{FactId, Timeframe};
use petgraph::algo::all_simple_paths;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

// ============================================================================
// Concepts & Relations
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConceptType {
    Country,
    Organization,
    Event,
    Trend,
    Resource,
    General,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Concept {
    pub name: String,
    pub concept_type: ConceptType,
    /// Relevance to the analysis target, in [0, 1].
    pub relevance: f64,
    pub confidence: f64,
    pub supporting_facts: BTreeSet<FactId>,
    pub attributes: BTreeMap<String, String>,
}

impl Concept {
    pub fn new(name: impl Into<String>, concept_type: ConceptType) -> Self {
        Self {
            name: name.into(),
            concept_type,
            relevance: 0.0,
            confidence: 0.5,
            supporting_facts: BTreeSet::new(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_relevance(mut self, relevance: f64) -> Self {
        self.relevance = crate::unit(relevance);
        self
    }

    pub fn with_fact(mut self, fact_id: impl Into<FactId>) -> Self {
        self.supporting_facts.insert(fact_id.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Fold `other` into `self` without discarding anything already known.
    fn enrich(&mut self, other: Concept) {
        if self.concept_type == ConceptType::General {
            self.concept_type = other.concept_type;
        }
        self.relevance = self.relevance.max(other.relevance);
        self.confidence = self.confidence.max(other.confidence);
        self.supporting_facts.extend(other.supporting_facts);
        for (key, value) in other.attributes {
            self.attributes.entry(key).or_insert(value);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    Causes,
    Affects,
    Influences,
    DependsOn,
    ConflictsWith,
}

impl fmt::Display for RelationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Causes => "causes",
            Self::Affects => "affects",
            Self::Influences => "influences",
            Self::DependsOn => "depends_on",
            Self::ConflictsWith => "conflicts_with",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relation {
    pub source: String,
    pub target: String,
    pub relation_type: RelationType,
    pub strength: f64,
    pub timeframe: Timeframe,
    pub confidence: f64,
    pub evidence: BTreeSet<FactId>,
}

impl Relation {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation_type: RelationType,
        strength: f64,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation_type,
            strength: crate::unit(strength),
            timeframe: Timeframe::Medium,
            confidence: 0.5,
            evidence: BTreeSet::new(),
        }
    }

    pub fn with_timeframe(mut self, timeframe: Timeframe) -> Self {
        self.timeframe = timeframe;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = crate::unit(confidence);
        self
    }

    pub fn with_evidence(mut self, fact_id: impl Into<FactId>) -> Self {
        self.evidence.insert(fact_id.into());
        self
    }

    fn enrich(&mut self, other: Relation) {
        self.strength = self.strength.max(other.strength);
        self.confidence = self.confidence.max(other.confidence);
        self.evidence.extend(other.evidence);
    }

    fn same_endpoints(&self, other: &Relation) -> bool {
        self.source == other.source && self.target == other.target
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictKind {
    Direct,
    CircularCausality,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphConflict {
    pub first: String,
    pub second: String,
    pub kind: ConflictKind,
    pub severity: Severity,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedConcept {
    pub name: String,
    pub relation_type: RelationType,
    pub strength: f64,
}

// ============================================================================
// Export
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeView {
    pub id: String,
    pub concept_type: ConceptType,
    pub relevance: f64,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeView {
    pub source: String,
    pub target: String,
    pub relation_type: RelationType,
    pub strength: f64,
}

/// Serializable view for external visualization layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    pub nodes: Vec<NodeView>,
    pub edges: Vec<EdgeView>,
    pub conflicts: Vec<GraphConflict>,
}

// ============================================================================
// Graph
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    graph: DiGraph<Concept, Relation>,
    index: HashMap<String, NodeIndex>,
    conflicts: Vec<Relation>,
    fact_links: HashMap<FactId, BTreeSet<String>>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concept_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Causal edges plus stated conflicts.
    pub fn relation_count(&self) -> usize {
        self.graph.edge_count() + self.conflicts.len()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn concept(&self, name: &str) -> Option<&Concept> {
        self.index.get(name).map(|&idx| &self.graph[idx])
    }

    /// Concepts in insertion order.
    pub fn concepts(&self) -> impl Iterator<Item = &Concept> {
        self.graph.node_indices().map(move |idx| &self.graph[idx])
    }

    /// Causal edges in insertion order.
    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.graph.edge_indices().map(move |idx| &self.graph[idx])
    }

    pub fn conflict_relations(&self) -> &[Relation] {
        &self.conflicts
    }

    /// Insert a concept, or enrich the existing one of the same name.
    pub fn add_concept(&mut self, concept: Concept) {
        match self.index.get(&concept.name) {
            Some(&idx) => self.graph[idx].enrich(concept),
            None => {
                let name = concept.name.clone();
                let idx = self.graph.add_node(concept);
                self.index.insert(name, idx);
            }
        }
    }

    fn ensure_node(&mut self, name: &str) -> NodeIndex {
        if let Some(&idx) = self.index.get(name) {
            return idx;
        }
        let idx = self.graph.add_node(Concept::new(name, ConceptType::General));
        self.index.insert(name.to_string(), idx);
        idx
    }

    /// Upsert a relation. Endpoints missing from the graph are created as general concepts.
    pub fn add_relation(&mut self, relation: Relation) {
        let from = self.ensure_node(&relation.source);
        let to = self.ensure_node(&relation.target);

        if relation.relation_type == RelationType::ConflictsWith {
            match self.conflicts.iter_mut().find(|c| c.same_endpoints(&relation)) {
                Some(existing) => existing.enrich(relation),
                None => self.conflicts.push(relation),
            }
            return;
        }

        let existing = self
            .graph
            .edges_connecting(from, to)
            .find(|e| e.weight().relation_type == relation.relation_type)
            .map(|e| e.id());
        match existing {
            Some(edge) => self.graph[edge].enrich(relation),
            None => {
                self.graph.add_edge(from, to, relation);
            }
        }
    }

    pub fn link_fact(&mut self, fact_id: &str, concept_name: &str) {
        self.fact_links
            .entry(fact_id.to_string())
            .or_default()
            .insert(concept_name.to_string());
        if let Some(&idx) = self.index.get(concept_name) {
            self.graph[idx].supporting_facts.insert(fact_id.to_string());
        }
    }

    pub fn concepts_for_fact(&self, fact_id: &str) -> impl Iterator<Item = &str> {
        self.fact_links
            .get(fact_id)
            .into_iter()
            .flat_map(|names| names.iter().map(String::as_str))
    }

    /// Distinct successors of a node, in node-insertion order (self loops dropped).
    fn successors(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let set: BTreeSet<NodeIndex> = self
            .graph
            .neighbors_directed(idx, Direction::Outgoing)
            .filter(|&n| n != idx)
            .collect();
        set.into_iter().collect()
    }

    /// All simple directed paths from `source` to `target` with at most `max_depth` edges.
    ///
    /// Returns an empty list when either node is absent or unreachable. Parallel
    /// edges of different relation types yield one path; output is ordered by
    /// node insertion.
    pub fn find_causal_paths(&self, source: &str, target: &str, max_depth: usize) -> Vec<Vec<String>> {
        let (Some(&from), Some(&to)) = (self.index.get(source), self.index.get(target)) else {
            return Vec::new();
        };
        if from == to || max_depth == 0 {
            return Vec::new();
        }

        let paths: BTreeSet<Vec<NodeIndex>> =
            all_simple_paths::<Vec<NodeIndex>, _>(&self.graph, from, to, 0, Some(max_depth - 1)).collect();
        paths
            .into_iter()
            .map(|path| path.into_iter().map(|n| self.graph[n].name.clone()).collect())
            .collect()
    }

    /// `0.5 × degree + 0.5 × betweenness` for every concept.
    pub fn importance_scores(&self) -> HashMap<String, f64> {
        let n = self.graph.node_count();
        if n == 0 {
            return HashMap::new();
        }
        let nodes: Vec<NodeIndex> = self.graph.node_indices().collect();
        let succ: Vec<Vec<usize>> = nodes
            .iter()
            .map(|&idx| self.successors(idx).into_iter().map(|s| s.index()).collect())
            .collect();

        let mut in_degree = vec![0usize; n];
        for targets in &succ {
            for &t in targets {
                in_degree[t] += 1;
            }
        }
        let degree: Vec<f64> = (0..n)
            .map(|i| {
                if n == 1 {
                    1.0
                } else {
                    (in_degree[i] + succ[i].len()) as f64 / (n - 1) as f64
                }
            })
            .collect();
        let betweenness = brandes_betweenness(&succ);

        nodes
            .iter()
            .map(|&idx| {
                let i = idx.index();
                (self.graph[idx].name.clone(), 0.5 * degree[i] + 0.5 * betweenness[i])
            })
            .collect()
    }

    /// Importance of one concept; `0.0` when absent.
    pub fn get_concept_importance(&self, name: &str) -> f64 {
        if !self.contains(name) {
            return 0.0;
        }
        self.importance_scores().get(name).copied().unwrap_or(0.0)
    }

    /// Direct conflicts (high) plus pairs joined by `causes` edges both ways (medium).
    pub fn detect_conflicts(&self) -> Vec<GraphConflict> {
        let mut conflicts: Vec<GraphConflict> = self
            .conflicts
            .iter()
            .map(|c| GraphConflict {
                first: c.source.clone(),
                second: c.target.clone(),
                kind: ConflictKind::Direct,
                severity: Severity::High,
            })
            .collect();

        let mut seen: BTreeSet<(NodeIndex, NodeIndex)> = BTreeSet::new();
        for edge in self.graph.edge_references() {
            if edge.weight().relation_type != RelationType::Causes {
                continue;
            }
            let (a, b) = (edge.source(), edge.target());
            if a == b {
                continue;
            }
            let key = (a.min(b), a.max(b));
            if seen.contains(&key) {
                continue;
            }
            let reverse = self
                .graph
                .edges_connecting(b, a)
                .any(|e| e.weight().relation_type == RelationType::Causes);
            if reverse {
                seen.insert(key);
                conflicts.push(GraphConflict {
                    first: self.graph[a].name.clone(),
                    second: self.graph[b].name.clone(),
                    kind: ConflictKind::CircularCausality,
                    severity: Severity::Medium,
                });
            }
        }
        conflicts
    }

    /// Neighbours in both directions (conflicts included), strongest first.
    pub fn get_related_concepts(&self, name: &str, max: usize) -> Vec<RelatedConcept> {
        let mut related: Vec<RelatedConcept> = self
            .relations()
            .chain(self.conflicts.iter())
            .filter_map(|r| {
                let other = if r.source == name {
                    &r.target
                } else if r.target == name {
                    &r.source
                } else {
                    return None;
                };
                Some(RelatedConcept {
                    name: other.clone(),
                    relation_type: r.relation_type,
                    strength: r.strength,
                })
            })
            .collect();
        related.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        related.truncate(max);
        related
    }

    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self
                .concepts()
                .map(|c| NodeView {
                    id: c.name.clone(),
                    concept_type: c.concept_type,
                    relevance: c.relevance,
                    confidence: c.confidence,
                })
                .collect(),
            edges: self
                .relations()
                .chain(self.conflicts.iter())
                .map(|r| EdgeView {
                    source: r.source.clone(),
                    target: r.target.clone(),
                    relation_type: r.relation_type,
                    strength: r.strength,
                })
                .collect(),
            conflicts: self.detect_conflicts(),
        }
    }
}

/// Normalized betweenness centrality over an unweighted directed adjacency list.
fn brandes_betweenness(succ: &[Vec<usize>]) -> Vec<f64> {
    let n = succ.len();
    let mut centrality = vec![0.0f64; n];

    for s in 0..n {
        let mut order: Vec<usize> = Vec::with_capacity(n);
        let mut preds: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut sigma = vec![0.0f64; n];
        let mut dist = vec![-1i64; n];
        sigma[s] = 1.0;
        dist[s] = 0;

        let mut queue = VecDeque::from([s]);
        while let Some(v) = queue.pop_front() {
            order.push(v);
            for &w in &succ[v] {
                if dist[w] < 0 {
                    dist[w] = dist[v] + 1;
                    queue.push_back(w);
                }
                if dist[w] == dist[v] + 1 {
                    sigma[w] += sigma[v];
                    preds[w].push(v);
                }
            }
        }

        let mut delta = vec![0.0f64; n];
        while let Some(w) = order.pop() {
            for &v in &preds[w] {
                delta[v] += sigma[v] / sigma[w] * (1.0 + delta[w]);
            }
            if w != s {
                centrality[w] += delta[w];
            }
        }
    }

    if n > 2 {
        let scale = 1.0 / ((n - 1) * (n - 2)) as f64;
        for c in &mut centrality {
            *c *= scale;
        }
    }
    centrality
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn chain_graph() -> KnowledgeGraph {
        let mut kg = KnowledgeGraph::new();
        for name in ["A", "B", "C"] {
            kg.add_concept(Concept::new(name, ConceptType::General));
        }
        kg.add_relation(Relation::new("A", "B", RelationType::Causes, 0.7));
        kg.add_relation(Relation::new("B", "C", RelationType::Affects, 0.6));
        kg
    }

    #[test]
    fn test_paths_on_chain() {
        let kg = chain_graph();
        assert_eq!(kg.find_causal_paths("A", "C", 5), vec![vec!["A", "B", "C"]]);
        assert!(kg.find_causal_paths("A", "C", 1).is_empty());
        assert!(kg.find_causal_paths("C", "A", 5).is_empty());
        assert!(kg.find_causal_paths("A", "Missing", 5).is_empty());
    }

    #[test]
    fn test_parallel_edges_yield_one_path() {
        let mut kg = chain_graph();
        kg.add_relation(Relation::new("A", "B", RelationType::Affects, 0.5));
        kg.add_relation(Relation::new("A", "C", RelationType::Causes, 0.4));

        assert_eq!(
            kg.find_causal_paths("A", "C", 5),
            vec![vec!["A", "B", "C"], vec!["A", "C"]]
        );
        assert_eq!(kg.find_causal_paths("A", "C", 1), vec![vec!["A", "C"]]);
    }

    #[test]
    fn test_chain_centrality() {
        let kg = chain_graph();
        // n = 3: B has degree 2/2 and lies on the only A→C shortest path (1/2 normalized)
        assert_relative_eq!(kg.get_concept_importance("B"), 0.5 * 1.0 + 0.5 * 0.5);
        assert_relative_eq!(kg.get_concept_importance("A"), 0.5 * 0.5);
        assert_eq!(kg.get_concept_importance("Nope"), 0.0);
    }

    #[test]
    fn test_single_node_degree_is_one() {
        let mut kg = KnowledgeGraph::new();
        kg.add_concept(Concept::new("Solo", ConceptType::Country));
        assert_relative_eq!(kg.get_concept_importance("Solo"), 0.5);
    }

    #[test]
    fn test_conflicts_are_not_edges() {
        let mut kg = chain_graph();
        kg.add_relation(Relation::new("C", "A", RelationType::ConflictsWith, 0.9));
        assert!(kg.find_causal_paths("C", "A", 5).is_empty());
        assert_eq!(kg.relation_count(), 3);

        let conflicts = kg.detect_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].severity, Severity::High);
    }

    #[test]
    fn test_circular_causality_reported_once() {
        let mut kg = chain_graph();
        kg.add_relation(Relation::new("B", "A", RelationType::Causes, 0.4));
        let conflicts = kg.detect_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].kind, ConflictKind::CircularCausality);
        assert_eq!(conflicts[0].severity, Severity::Medium);
    }

    #[test]
    fn test_upserts_enrich() {
        let mut kg = chain_graph();
        kg.add_relation(Relation::new("A", "B", RelationType::Causes, 0.2).with_evidence("f9"));
        assert_eq!(kg.relation_count(), 2);
        let edge = kg.relations().next().unwrap();
        assert_relative_eq!(edge.strength, 0.7);
        assert!(edge.evidence.contains("f9"));

        kg.add_concept(Concept::new("A", ConceptType::Country).with_fact("f1"));
        let a = kg.concept("A").unwrap();
        assert_eq!(a.concept_type, ConceptType::Country);
        assert!(a.supporting_facts.contains("f1"));
        assert_eq!(kg.concept_count(), 3);
    }

    #[test]
    fn test_related_concepts_sorted_by_strength() {
        let kg = chain_graph();
        let related = kg.get_related_concepts("B", 10);
        assert_eq!(related.len(), 2);
        assert_eq!(related[0].name, "A");
        assert_eq!(related[1].name, "C");
        assert_eq!(kg.get_related_concepts("B", 1).len(), 1);
    }

    #[test]
    fn test_fact_links() {
        let mut kg = chain_graph();
        kg.link_fact("f1", "A");
        kg.link_fact("f1", "Ghost");
        let linked: Vec<&str> = kg.concepts_for_fact("f1").collect();
        assert_eq!(linked, vec!["A", "Ghost"]);
        assert!(kg.concept("A").unwrap().supporting_facts.contains("f1"));
        assert_eq!(kg.concepts_for_fact("f2").count(), 0);
    }
}
