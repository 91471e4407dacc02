//! Named keyword lexicons
//!
//! Every keyword heuristic in the pipeline (impact direction, timeframe,
//! sentiment polarity, threat/opportunity detection, categories, concept and
//! relation cues) reads its vocabulary from a [`Lexicon`] held in
//! [`Lexicons`]. Swapping a lexicon (or the whole set, loaded from JSON)
//! changes the vocabulary without touching control flow.
//!
//! Matching is case-insensitive substring matching over lowercased text, which
//! keeps the arithmetic of the scoring heuristics reproducible. English
//! timeframe cues are whole-word cues, so "now" does not fire inside "nowe".
//! It is an approximation, not NLP.

use crate::config::ConfigError;
use crate::{ImpactDirection, Timeframe};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A named list of lowercase cue words.
///
/// `words` match anywhere (so Polish stems catch inflected forms);
/// `whole_words` only match between non-alphanumeric boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lexicon {
    pub name: String,
    pub words: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub whole_words: Vec<String>,
}

impl Lexicon {
    pub fn new(name: &str, words: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            words: words.iter().map(|w| w.to_lowercase()).collect(),
            whole_words: Vec::new(),
        }
    }

    pub fn with_whole_words(mut self, words: &[&str]) -> Self {
        self.whole_words = words.iter().map(|w| w.to_lowercase()).collect();
        self
    }

    /// True if any cue word occurs in `text_lower`.
    pub fn matches(&self, text_lower: &str) -> bool {
        self.first_match(text_lower).is_some()
    }

    /// First cue word found in `text_lower`: substring cues in lexicon order, then whole-word cues.
    pub fn first_match(&self, text_lower: &str) -> Option<&str> {
        self.words
            .iter()
            .find(|w| text_lower.contains(w.as_str()))
            .or_else(|| {
                self.whole_words
                    .iter()
                    .find(|w| contains_whole_word(text_lower, w))
            })
            .map(String::as_str)
    }

    /// Exact whole-word membership (used for stop words).
    pub fn contains_word(&self, word: &str) -> bool {
        self.words.iter().any(|w| w == word)
    }
}

/// Temporal cue buckets, checked in order immediate → short → medium → long.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeframeLexicons {
    pub immediate: Lexicon,
    pub short: Lexicon,
    pub medium: Lexicon,
    pub long: Lexicon,
}

impl TimeframeLexicons {
    /// Infer the timeframe bucket of a text; [`Timeframe::Medium`] when no cue matches.
    pub fn infer(&self, text: &str) -> Timeframe {
        let lower = text.to_lowercase();
        if self.immediate.matches(&lower) {
            Timeframe::Immediate
        } else if self.short.matches(&lower) {
            Timeframe::Short
        } else if self.medium.matches(&lower) {
            Timeframe::Medium
        } else if self.long.matches(&lower) {
            Timeframe::Long
        } else {
            Timeframe::Medium
        }
    }
}

/// Recommendation category buckets; anything unmatched is political.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryLexicons {
    pub economic: Lexicon,
    pub security: Lexicon,
    pub diplomatic: Lexicon,
    pub technological: Lexicon,
}

/// Concept-type cues, checked in field order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptTypeLexicons {
    pub country: Lexicon,
    pub organization: Lexicon,
    pub event: Lexicon,
    pub trend: Lexicon,
    pub resource: Lexicon,
}

/// Relation cues for the knowledge extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationCueLexicons {
    pub causes: Lexicon,
    pub affects: Lexicon,
    pub depends_on: Lexicon,
}

/// The full vocabulary used by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Lexicons {
    pub negative_impact: Lexicon,
    pub positive_impact: Lexicon,
    pub timeframe: TimeframeLexicons,
    pub positive_sentiment: Lexicon,
    pub negative_sentiment: Lexicon,
    pub stop_words: Lexicon,
    pub threat: Lexicon,
    pub opportunity: Lexicon,
    pub high_severity: Lexicon,
    pub high_potential: Lexicon,
    pub categories: CategoryLexicons,
    pub concept_types: ConceptTypeLexicons,
    pub relation_cues: RelationCueLexicons,
}

impl Default for Lexicons {
    fn default() -> Self {
        Self {
            negative_impact: Lexicon::new(
                "negative_impact",
                &[
                    "crisis", "decline", "loss", "embargo", "attack", "threat", "kryzys",
                    "spadek", "załamanie", "utrata", "atak", "zagrożenie",
                ],
            ),
            positive_impact: Lexicon::new(
                "positive_impact",
                &[
                    "growth", "development", "success", "increase", "investment", "recovery",
                    "wzrost", "rozwój", "sukces", "zwiększenie", "inwestycje", "odbudowa",
                ],
            ),
            timeframe: TimeframeLexicons {
                immediate: Lexicon::new("timeframe_immediate", &["natychmiast", "obecnie", "teraz"])
                    .with_whole_words(&["immediate", "immediately", "now", "current", "today"]),
                short: Lexicon::new("timeframe_short", &["krótkoterminowy", "miesiące", "tygodnie"])
                    .with_whole_words(&["short-term", "weeks", "months", "recent"]),
                medium: Lexicon::new("timeframe_medium", &["średnioterminowy", "rok", "lata"])
                    .with_whole_words(&["medium-term", "year", "years"]),
                long: Lexicon::new("timeframe_long", &["długoterminowy", "przyszłość", "dekada"])
                    .with_whole_words(&["long-term", "future", "decade", "decades"]),
            },
            positive_sentiment: Lexicon::new(
                "positive_sentiment",
                &[
                    "wzrost", "rozwój", "sukces", "pozytywny", "dobry", "zwiększenie", "growth",
                    "success", "positive", "increase",
                ],
            ),
            negative_sentiment: Lexicon::new(
                "negative_sentiment",
                &[
                    "spadek", "kryzys", "porażka", "negatywny", "zły", "zmniejszenie", "decline",
                    "crisis", "failure", "negative", "decrease",
                ],
            ),
            stop_words: Lexicon::new(
                "stop_words",
                &[
                    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of",
                    "with", "by",
                ],
            ),
            threat: Lexicon::new(
                "threat",
                &[
                    "kryzys", "spadek", "atak", "embargo", "konflikt", "zagrożenie", "crisis",
                    "decline", "attack", "conflict", "threat",
                ],
            ),
            opportunity: Lexicon::new(
                "opportunity",
                &[
                    "wzrost", "rozwój", "inwestycje", "współpraca", "sukces", "szansa", "growth",
                    "development", "investment", "cooperation", "success", "opportunity",
                ],
            ),
            high_severity: Lexicon::new(
                "high_severity",
                &["kryzys", "atak", "embargo", "crisis", "attack"],
            ),
            high_potential: Lexicon::new(
                "high_potential",
                &["wzrost", "inwestycje", "growth", "investment"],
            ),
            categories: CategoryLexicons {
                economic: Lexicon::new(
                    "category_economic",
                    &[
                        "gospodarczy", "ekonomiczny", "handel", "rynki", "inwestycje", "economic",
                        "trade", "market", "investment",
                    ],
                ),
                security: Lexicon::new(
                    "category_security",
                    &[
                        "bezpieczeństwo", "wojskowy", "atak", "obrona", "security", "military",
                        "attack", "defence", "defense",
                    ],
                ),
                diplomatic: Lexicon::new(
                    "category_diplomatic",
                    &["polityczny", "dyplomatyczny", "relacje", "diplomatic", "relations"],
                ),
                technological: Lexicon::new(
                    "category_technological",
                    &["technologiczny", "ai", "cyfrowy", "ict", "technolog", "digital"],
                ),
            },
            concept_types: ConceptTypeLexicons {
                country: Lexicon::new("concept_country", &["country", "nation", "state", "republic"]),
                organization: Lexicon::new(
                    "concept_organization",
                    &["organization", "institution", "union", "alliance"],
                ),
                event: Lexicon::new(
                    "concept_event",
                    &["crisis", "conflict", "agreement", "summit", "meeting"],
                ),
                trend: Lexicon::new(
                    "concept_trend",
                    &["growth", "decline", "increase", "decrease", "trend"],
                ),
                resource: Lexicon::new(
                    "concept_resource",
                    &["oil", "gas", "energy", "resource", "commodity"],
                ),
            },
            relation_cues: RelationCueLexicons {
                causes: Lexicon::new(
                    "relation_causes",
                    &["causes", "leads to", "results in", "triggers"],
                ),
                affects: Lexicon::new("relation_affects", &["affects", "impacts", "influences"]),
                depends_on: Lexicon::new(
                    "relation_depends_on",
                    &["depends on", "relies on", "requires"],
                ),
            },
        }
    }
}

/// `cue` occurs in `text` with no letter or digit directly before or after it.
fn contains_whole_word(text: &str, cue: &str) -> bool {
    text.match_indices(cue).any(|(i, m)| {
        let before = text[..i].chars().next_back();
        let after = text[i + m.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

impl Lexicons {
    /// Load a lexicon set from a JSON file; missing sections keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| ConfigError::Invalid(e.to_string()))
    }

    /// Impact direction of a factor description. The negative lexicon is checked first.
    pub fn impact_direction(&self, text: &str) -> ImpactDirection {
        let lower = text.to_lowercase();
        if self.negative_impact.matches(&lower) {
            ImpactDirection::Negative
        } else if self.positive_impact.matches(&lower) {
            ImpactDirection::Positive
        } else {
            ImpactDirection::Neutral
        }
    }

    /// Lowercased whitespace tokens longer than three characters that are not stop words.
    pub fn content_words(&self, text: &str) -> Vec<String> {
        let mut words: Vec<String> = Vec::new();
        for token in text.to_lowercase().split_whitespace() {
            if token.chars().count() > 3
                && !self.stop_words.contains_word(token)
                && !words.iter().any(|w| w == token)
            {
                words.push(token.to_string());
            }
        }
        words
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negative_checked_first() {
        let lex = Lexicons::default();
        assert_eq!(
            lex.impact_direction("growth stalls amid a deep crisis"),
            ImpactDirection::Negative
        );
        assert_eq!(lex.impact_direction("Gwałtowny wzrost OZE"), ImpactDirection::Positive);
        assert_eq!(lex.impact_direction("Weak ceasefire holds"), ImpactDirection::Neutral);
    }

    #[test]
    fn test_timeframe_defaults_to_medium() {
        let lex = Lexicons::default();
        assert_eq!(lex.timeframe.infer("a sudden shift"), Timeframe::Medium);
        assert_eq!(lex.timeframe.infer("wpływ natychmiast"), Timeframe::Immediate);
        assert_eq!(lex.timeframe.infer("within weeks"), Timeframe::Short);
        assert_eq!(lex.timeframe.infer("over the next decade"), Timeframe::Long);
    }

    #[test]
    fn test_english_timeframe_cues_need_whole_words() {
        let lex = Lexicons::default();
        // "now" inside "nowe"/"odnowa", "short" inside "shortage"
        assert_eq!(lex.timeframe.infer("Nowe inwestycje w OZE"), Timeframe::Medium);
        assert_eq!(lex.timeframe.infer("Odnowa przemysłu"), Timeframe::Medium);
        assert_eq!(lex.timeframe.infer("Shortage of chips"), Timeframe::Medium);
        assert_eq!(lex.timeframe.infer("Prices spike now."), Timeframe::Immediate);
        assert_eq!(lex.timeframe.infer("a short-term squeeze"), Timeframe::Short);
        // Polish stems still match inflected forms
        assert_eq!(lex.timeframe.infer("do końca roku 2028"), Timeframe::Medium);
        assert_eq!(lex.timeframe.infer("przed kilkoma miesiącem"), Timeframe::Short);
    }

    #[test]
    fn test_lexicon_json_without_whole_words() {
        let plain: Lexicon = serde_json::from_str(r#"{"name": "p", "words": ["year"]}"#).unwrap();
        assert!(plain.whole_words.is_empty());
        assert!(plain.matches("yearly report"));
    }

    #[test]
    fn test_content_words_drop_short_and_stop_words() {
        let lex = Lexicons::default();
        let words = lex.content_words("The wzrost of OZE and with procesorów procesorów");
        assert_eq!(words, vec!["wzrost".to_string(), "procesorów".to_string()]);
    }
}
