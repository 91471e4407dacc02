//! Recommendation Synthesizer
//!
//! Reads the emitted scenarios and derives two ranked lists:
//!
//! - `avoid_negative`: threats repeated across negative scenarios, plus the
//!   top key events of each negative scenario
//! - `pursue_positive`: opportunities repeated across positive scenarios,
//!   plus the top key events of each positive scenario
//!
//! The output depends only on the scenario contents and the lexicons, so the
//! same scenarios always yield the same recommendations.

use crate::config::TargetProfile;
use crate::lexicon::{Lexicon, Lexicons};
use crate::scenario::Scenario;
use crate::{truncate_chars, Polarity};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::fmt::{self, Write as _};

const MAX_COMMON_EVENTS: usize = 10;
const EVENTS_PER_SCENARIO: usize = 3;
const MAX_PER_LIST: usize = 15;
const DEDUP_PREFIX_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn rank(self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Medium => 2,
            Priority::Low => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Political,
    Economic,
    Security,
    Diplomatic,
    Technological,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionTimeframe {
    Immediate,
    ShortTerm,
    MediumTerm,
    LongTerm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetScenario {
    AvoidNegative,
    PursuePositive,
}

macro_rules! impl_display {
    ($($ty:ty => { $($variant:ident => $name:literal),+ $(,)? }),+ $(,)?) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(match self { $(Self::$variant => $name),+ })
            }
        })+
    };
}

impl_display! {
    Priority => { Low => "low", Medium => "medium", High => "high" },
    Category => {
        Political => "political",
        Economic => "economic",
        Security => "security",
        Diplomatic => "diplomatic",
        Technological => "technological",
    },
    ActionTimeframe => {
        Immediate => "immediate",
        ShortTerm => "short_term",
        MediumTerm => "medium_term",
        LongTerm => "long_term",
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub title: String,
    pub description: String,
    pub category: Category,
    pub priority: Priority,
    pub timeframe: ActionTimeframe,
    pub target_scenario: TargetScenario,
    pub related_scenarios: Vec<String>,
    pub expected_impact: String,
    pub implementation_steps: Vec<String>,
    pub risks: Vec<String>,
    /// Number of scenarios the underlying event appeared in.
    pub occurrences: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub avoid_negative: Vec<Recommendation>,
    pub pursue_positive: Vec<Recommendation>,
}

impl RecommendationSet {
    pub fn len(&self) -> usize {
        self.avoid_negative.len() + self.pursue_positive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Markdown section listing the top `limit` recommendations of each list.
    pub fn to_markdown(&self, limit: usize) -> String {
        let mut out = String::new();
        for (heading, list) in [
            ("Decisions that help avoid the negative scenarios", &self.avoid_negative),
            ("Decisions that help realise the positive scenarios", &self.pursue_positive),
        ] {
            let _ = writeln!(out, "### {heading}\n");
            for (i, rec) in list.iter().take(limit).enumerate() {
                let _ = writeln!(out, "#### {}. {}", i + 1, rec.title);
                let _ = writeln!(out, "{}", rec.description);
                let _ = writeln!(out, "**Category:** {}", rec.category);
                let _ = writeln!(out, "**Priority:** {}", rec.priority);
                let _ = writeln!(out, "**Timeframe:** {}", rec.timeframe);
                let _ = writeln!(out, "**Expected impact:** {}", rec.expected_impact);
                let _ = writeln!(out, "**Implementation steps:**");
                for step in &rec.implementation_steps {
                    let _ = writeln!(out, "- {step}");
                }
                if !rec.risks.is_empty() {
                    let _ = writeln!(out, "**Risks:**");
                    for risk in &rec.risks {
                        let _ = writeln!(out, "- {risk}");
                    }
                }
                out.push('\n');
            }
        }
        out
    }
}

/// A key event repeated across scenarios of one polarity.
#[derive(Debug, Clone, PartialEq)]
struct CommonEvent {
    description: String,
    occurrences: usize,
    high: bool,
}

fn dedup_key(event: &str) -> String {
    truncate_chars(event.trim(), DEDUP_PREFIX_CHARS).to_lowercase()
}

pub struct RecommendationSynthesizer {
    lexicons: Lexicons,
    partners: Vec<String>,
}

impl RecommendationSynthesizer {
    pub fn new(lexicons: Lexicons, target: &TargetProfile) -> Self {
        Self {
            lexicons,
            partners: target.key_relations.iter().take(3).cloned().collect(),
        }
    }

    pub fn synthesize(&self, scenarios: &[Scenario]) -> RecommendationSet {
        let negative: Vec<&Scenario> = scenarios.iter().filter(|s| s.polarity == Polarity::Negative).collect();
        let positive: Vec<&Scenario> = scenarios.iter().filter(|s| s.polarity == Polarity::Positive).collect();

        let set = RecommendationSet {
            avoid_negative: self.list_for(&negative, TargetScenario::AvoidNegative),
            pursue_positive: self.list_for(&positive, TargetScenario::PursuePositive),
        };
        tracing::info!(
            avoid_negative = set.avoid_negative.len(),
            pursue_positive = set.pursue_positive.len(),
            "recommendations synthesized"
        );
        set
    }

    fn list_for(&self, scenarios: &[&Scenario], target: TargetScenario) -> Vec<Recommendation> {
        let (cue, strength) = match target {
            TargetScenario::AvoidNegative => (&self.lexicons.threat, &self.lexicons.high_severity),
            TargetScenario::PursuePositive => (&self.lexicons.opportunity, &self.lexicons.high_potential),
        };

        let mut recommendations: Vec<Recommendation> = common_events(scenarios, cue, strength)
            .iter()
            .enumerate()
            .map(|(i, event)| self.from_common_event(event, i + 1, target))
            .collect();

        let mut counter = 0usize;
        for scenario in scenarios {
            for event in scenario.key_events.iter().take(EVENTS_PER_SCENARIO) {
                counter += 1;
                recommendations.push(self.from_scenario_event(event, scenario, target, counter));
            }
        }

        recommendations.sort_by_key(|r| Reverse(r.priority.rank()));
        recommendations.truncate(MAX_PER_LIST);
        recommendations
    }

    fn from_common_event(&self, event: &CommonEvent, n: usize, target: TargetScenario) -> Recommendation {
        let lower = event.description.to_lowercase();
        let categories = &self.lexicons.categories;
        let summary = truncate_chars(&event.description, 100);
        let partners = if self.partners.is_empty() {
            "key partners".to_string()
        } else {
            self.partners.join(", ")
        };

        match target {
            TargetScenario::AvoidNegative => {
                let category = categorize(
                    &lower,
                    &[
                        (Category::Economic, &categories.economic),
                        (Category::Security, &categories.security),
                        (Category::Diplomatic, &categories.diplomatic),
                    ],
                );
                let priority = if event.high { Priority::High } else { Priority::Medium };
                Recommendation {
                    id: format!("mitigation_{n}"),
                    title: format!("Mitigate risk: {}", truncate_chars(&event.description, 80)),
                    description: format!("Reduce the likelihood of this threat materialising: {}", event.description),
                    category,
                    priority,
                    timeframe: if event.high {
                        ActionTimeframe::Immediate
                    } else {
                        ActionTimeframe::ShortTerm
                    },
                    target_scenario: target,
                    related_scenarios: Vec::new(),
                    expected_impact: "Lower probability of the negative scenario by 20-30%".to_string(),
                    implementation_steps: vec![
                        format!("Monitor developments related to: {summary}"),
                        "Prepare a contingency plan in case the threat materialises".to_string(),
                        format!("Build a coalition with key partners ({partners})"),
                        "Diversify dependencies in the affected area".to_string(),
                    ],
                    risks: vec!["Delayed implementation may increase the risk".to_string()],
                    occurrences: event.occurrences,
                }
            }
            TargetScenario::PursuePositive => {
                let category = categorize(
                    &lower,
                    &[
                        (Category::Economic, &categories.economic),
                        (Category::Technological, &categories.technological),
                    ],
                );
                let priority = if event.high { Priority::High } else { Priority::Medium };
                Recommendation {
                    id: format!("opportunity_{n}"),
                    title: format!("Realise opportunity: {}", truncate_chars(&event.description, 80)),
                    description: format!("Actively support this opportunity: {}", event.description),
                    category,
                    priority,
                    timeframe: ActionTimeframe::ShortTerm,
                    target_scenario: target,
                    related_scenarios: Vec::new(),
                    expected_impact: "Higher probability of the positive scenario by 25-35%".to_string(),
                    implementation_steps: vec![
                        format!("Actively support: {summary}"),
                        "Allocate strategic resources to the opportunity".to_string(),
                        "Build partnerships with key actors".to_string(),
                        "Monitor progress and adjust the strategy".to_string(),
                    ],
                    risks: vec!["Insufficient resources may limit delivery".to_string()],
                    occurrences: event.occurrences,
                }
            }
        }
    }

    fn from_scenario_event(
        &self,
        event: &str,
        scenario: &Scenario,
        target: TargetScenario,
        n: usize,
    ) -> Recommendation {
        let lower = event.to_lowercase();
        let (category, priority) = if self.lexicons.threat.matches(&lower) {
            let category = if self.lexicons.categories.security.matches(&lower) {
                Category::Security
            } else {
                Category::Economic
            };
            (category, Priority::High)
        } else if self.lexicons.opportunity.matches(&lower) {
            (Category::Economic, Priority::Medium)
        } else {
            (Category::Political, Priority::Low)
        };

        let (title, description, impact) = match target {
            TargetScenario::AvoidNegative => (
                format!("Prevent: {}", truncate_chars(event, 80)),
                format!("Prevent this negative event: {event}"),
                "Lower risk of the negative event",
            ),
            TargetScenario::PursuePositive => (
                format!("Support: {}", truncate_chars(event, 80)),
                format!("Support this positive event: {event}"),
                "Higher chance of the positive event",
            ),
        };

        Recommendation {
            id: format!("event_{}m_{}_{n}", scenario.horizon_months, scenario.polarity),
            title,
            description,
            category,
            priority,
            timeframe: if scenario.horizon_months <= 12 {
                ActionTimeframe::Immediate
            } else {
                ActionTimeframe::MediumTerm
            },
            target_scenario: target,
            related_scenarios: vec![format!("scenario_{}m_{}", scenario.horizon_months, scenario.polarity)],
            expected_impact: impact.to_string(),
            implementation_steps: vec![
                format!("Monitor developments: {event}"),
                "Prepare a strategic response".to_string(),
                "Coordinate with partners".to_string(),
            ],
            risks: Vec::new(),
            occurrences: 1,
        }
    }
}

fn categorize(lower: &str, buckets: &[(Category, &Lexicon)]) -> Category {
    buckets
        .iter()
        .find(|(_, lexicon)| lexicon.matches(lower))
        .map(|(category, _)| *category)
        .unwrap_or(Category::Political)
}

/// Cue-matching key events, deduplicated by normalized prefix and ranked by scenario count.
fn common_events(scenarios: &[&Scenario], cue: &Lexicon, strength: &Lexicon) -> Vec<CommonEvent> {
    let mut events: Vec<(String, CommonEvent)> = Vec::new();
    for scenario in scenarios {
        for event in &scenario.key_events {
            let lower = event.to_lowercase();
            if !cue.matches(&lower) {
                continue;
            }
            let key = dedup_key(event);
            if events.iter().any(|(k, _)| *k == key) {
                continue;
            }
            let occurrences = scenarios
                .iter()
                .filter(|s| s.key_events.iter().any(|e| dedup_key(e) == key))
                .count();
            events.push((
                key,
                CommonEvent {
                    description: event.clone(),
                    occurrences,
                    high: strength.matches(&lower),
                },
            ));
        }
    }

    let mut events: Vec<CommonEvent> = events.into_iter().map(|(_, e)| e).collect();
    events.sort_by_key(|e| Reverse(e.occurrences));
    events.truncate(MAX_COMMON_EVENTS);
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::GenerationOutcome;
    use chrono::Utc;
    use std::collections::BTreeMap;
    use uuid::Uuid;

    fn scenario(horizon_months: u32, polarity: Polarity, events: &[&str]) -> Scenario {
        Scenario {
            id: Uuid::new_v4(),
            horizon_months,
            polarity,
            title: String::new(),
            description: String::new(),
            key_events: events.iter().map(|e| e.to_string()).collect(),
            probabilities: BTreeMap::new(),
            impacts: BTreeMap::new(),
            recommendations: Vec::new(),
            confidence: 0.5,
            key_facts_used: Vec::new(),
            key_correlations: Vec::new(),
            supporting_facts: Vec::new(),
            reasoning_path_ids: Vec::new(),
            causal_relation_ids: Vec::new(),
            generation: GenerationOutcome::ParsedStrict,
            degraded_reason: None,
            created_at: Utc::now(),
        }
    }

    fn synthesizer() -> RecommendationSynthesizer {
        RecommendationSynthesizer::new(Lexicons::default(), &TargetProfile::default())
    }

    #[test]
    fn test_repeated_threat_ranks_first() {
        let scenarios = vec![
            scenario(12, Polarity::Negative, &["Energy crisis deepens", "Trade conflict with neighbours"]),
            scenario(36, Polarity::Negative, &["Trade conflict with neighbours", "Calm elections"]),
        ];
        let set = synthesizer().synthesize(&scenarios);
        assert!(set.pursue_positive.is_empty());

        let mitigations: Vec<&Recommendation> =
            set.avoid_negative.iter().filter(|r| r.id.starts_with("mitigation_")).collect();
        assert_eq!(mitigations.len(), 2);
        let conflict = mitigations.iter().find(|r| r.title.contains("Trade conflict")).unwrap();
        assert_eq!(conflict.occurrences, 2);
        assert_eq!(conflict.category, Category::Economic);
        assert_eq!(conflict.priority, Priority::Medium);
        let crisis = mitigations.iter().find(|r| r.title.contains("Energy crisis")).unwrap();
        assert_eq!(crisis.priority, Priority::High);
        assert_eq!(crisis.timeframe, ActionTimeframe::Immediate);
        assert_eq!(crisis.implementation_steps.len(), 4);
    }

    #[test]
    fn test_sorted_by_priority_and_capped() {
        let events: Vec<String> = (0..30).map(|i| format!("Investment wave {i}")).collect();
        let refs: Vec<&str> = events.iter().map(String::as_str).collect();
        let scenarios = vec![
            scenario(12, Polarity::Positive, &refs),
            scenario(36, Polarity::Positive, &refs),
            scenario(36, Polarity::Positive, &refs),
        ];
        let set = synthesizer().synthesize(&scenarios);

        assert_eq!(set.pursue_positive.len(), 15);
        let ranks: Vec<u8> = set.pursue_positive.iter().map(|r| r.priority.rank()).collect();
        assert!(ranks.windows(2).all(|w| w[0] >= w[1]));
        assert_eq!(set.pursue_positive[0].priority, Priority::High);
    }

    #[test]
    fn test_deterministic_for_same_input() {
        let scenarios = vec![
            scenario(12, Polarity::Negative, &["Cyber attack on grid"]),
            scenario(12, Polarity::Positive, &["Growth of OZE exports"]),
        ];
        let a = synthesizer().synthesize(&scenarios);
        let b = synthesizer().synthesize(&scenarios);
        assert_eq!(a, b);
        assert_eq!(a.avoid_negative[0].category, Category::Security);
        assert!(a.to_markdown(10).contains("Mitigate risk: Cyber attack on grid"));
    }
}
