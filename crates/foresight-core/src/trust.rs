//! Source Trust: reputation tracking and poisoning detection
//!
//! 1. **Reputation**: one record per content domain, seeded from a trusted
//!    allow-list, lowered by a fixed penalty per structural anomaly
//! 2. **Anomalies**: uppercase runs, punctuation runs, suspicious long URLs,
//!    too short / too long content
//! 3. **Cross-reference**: a fact becomes verified once enough distinct sources back it
//! 4. **Contradictions**: opposite-polarity vocabulary inside a keyword group
//! 5. **Filter**: clean vs quarantined facts, each verdict recorded once per fact
//!
//! Contradiction detection is a keyword heuristic, not entailment; scores are
//! approximate by construction.
//!
//! ```text
//! fact ──► domain_of(source) ──► verify_source ──┬─► reputation < 0.3 ──┐
//!                                                ├─► anomalies  > 2   ──┼─► poisoned
//!                                                └─► otherwise ──► clean
//! ```

use crate::config::{ConfigError, TrustConfig};
use crate::lexicon::{Lexicon, Lexicons};
use crate::{unit, Fact, FactId};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use url::Url;

/// Bucket for sources whose URL cannot be parsed.
pub const UNKNOWN_DOMAIN: &str = "unknown";

// ============================================================================
// Records
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReputation {
    pub domain: String,
    pub score: f64,
    pub verification_count: u32,
    pub anomaly_count: u32,
    pub trusted: bool,
    pub last_verified: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    UppercaseRun,
    PunctuationRun,
    SuspiciousUrl,
    TooShort,
    TooLong,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub anomalies: Vec<AnomalyKind>,
}

impl AnomalyReport {
    pub fn count(&self) -> usize {
        self.anomalies.len()
    }

    pub fn is_clean(&self) -> bool {
        self.anomalies.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContradictionPair {
    pub first: FactId,
    pub second: FactId,
    pub score: f64,
}

/// A fact excluded from all downstream stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuarantinedFact {
    pub fact: Fact,
    pub domain: String,
    pub reputation: f64,
    pub anomalies: Vec<AnomalyKind>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterOutcome {
    pub clean: Vec<Fact>,
    pub poisoned: Vec<QuarantinedFact>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceStatistics {
    pub total_sources: usize,
    pub trusted_sources: usize,
    pub average_reputation: f64,
    pub total_anomalies: u32,
    pub cross_referenced_facts: usize,
}

#[derive(Debug, Clone)]
enum Verdict {
    Clean,
    Poisoned(QuarantinedFact),
}

// ============================================================================
// Anomaly detection
// ============================================================================

struct AnomalyPattern {
    kind: AnomalyKind,
    regex: Regex,
}

/// Structural content checks.
pub struct AnomalyDetector {
    patterns: Vec<AnomalyPattern>,
    min_words: usize,
    max_words: usize,
}

impl AnomalyDetector {
    pub fn new(config: &TrustConfig) -> Result<Self, ConfigError> {
        let specs = [
            (AnomalyKind::UppercaseRun, format!("[A-Z]{{{},}}", config.uppercase_run)),
            (AnomalyKind::PunctuationRun, format!("[!?]{{{},}}", config.punctuation_run)),
            (
                AnomalyKind::SuspiciousUrl,
                format!(r"https?://\S{{{},}}", config.long_url_length),
            ),
        ];
        let patterns = specs
            .into_iter()
            .map(|(kind, pattern)| {
                Regex::new(&pattern)
                    .map(|regex| AnomalyPattern { kind, regex })
                    .map_err(|e| ConfigError::Pattern {
                        name: format!("{kind:?}"),
                        message: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            min_words: config.min_words,
            max_words: config.max_words,
        })
    }

    pub fn detect(&self, content: &str) -> AnomalyReport {
        let mut anomalies: Vec<AnomalyKind> = self
            .patterns
            .iter()
            .filter(|p| p.regex.is_match(content))
            .map(|p| p.kind)
            .collect();

        let words = content.split_whitespace().count();
        if words < self.min_words {
            anomalies.push(AnomalyKind::TooShort);
        } else if words > self.max_words {
            anomalies.push(AnomalyKind::TooLong);
        }
        AnomalyReport { anomalies }
    }
}

/// Host of a source URL (or bare domain), lowercased without a `www.` prefix.
///
/// Anything that does not yield a host maps to [`UNKNOWN_DOMAIN`].
pub fn domain_of(source: &str) -> String {
    let source = source.trim();
    if source.is_empty() {
        return UNKNOWN_DOMAIN.to_string();
    }
    let parsed = Url::parse(source).or_else(|_| Url::parse(&format!("https://{source}")));
    match parsed.ok().as_ref().and_then(Url::host_str) {
        Some(host) if host.contains('.') || host == "localhost" => {
            let host = host.to_lowercase();
            host.strip_prefix("www.").map(str::to_string).unwrap_or(host)
        }
        _ => UNKNOWN_DOMAIN.to_string(),
    }
}

// ============================================================================
// Tracker
// ============================================================================

pub struct SourceTrustTracker {
    config: TrustConfig,
    detector: AnomalyDetector,
    positive: Lexicon,
    negative: Lexicon,
    reputations: BTreeMap<String, SourceReputation>,
    cross_references: HashMap<FactId, BTreeSet<String>>,
    /// Keyed by (id, source, content): a reused id with new text is assessed afresh.
    verdicts: HashMap<(FactId, String, String), Verdict>,
}

impl SourceTrustTracker {
    pub fn new(config: TrustConfig, lexicons: &Lexicons) -> Result<Self, ConfigError> {
        let detector = AnomalyDetector::new(&config)?;
        Ok(Self {
            config,
            detector,
            positive: lexicons.positive_sentiment.clone(),
            negative: lexicons.negative_sentiment.clone(),
            reputations: BTreeMap::new(),
            cross_references: HashMap::new(),
            verdicts: HashMap::new(),
        })
    }

    pub fn with_defaults() -> Result<Self, ConfigError> {
        Self::new(TrustConfig::default(), &Lexicons::default())
    }

    pub fn is_trusted_domain(&self, domain: &str) -> bool {
        self.config
            .trusted_domains
            .iter()
            .any(|t| domain == t.as_str() || domain.ends_with(&format!(".{t}")))
    }

    pub fn reputation(&self, domain: &str) -> Option<&SourceReputation> {
        self.reputations.get(domain)
    }

    pub fn reputations(&self) -> impl Iterator<Item = &SourceReputation> {
        self.reputations.values()
    }

    pub fn detect_anomalies(&self, content: &str) -> AnomalyReport {
        self.detector.detect(content)
    }

    /// Look up or create the domain record, count the verification, apply anomaly penalties.
    pub fn verify_source(&mut self, domain: &str, content: &str) -> SourceReputation {
        let report = self.detector.detect(content);
        self.apply_verification(domain, &report)
    }

    fn apply_verification(&mut self, domain: &str, report: &AnomalyReport) -> SourceReputation {
        let trusted = self.is_trusted_domain(domain);
        let now = Utc::now();
        let config = &self.config;

        let record = self.reputations.entry(domain.to_string()).or_insert_with(|| {
            let score = if trusted {
                config.trusted_initial_score
            } else {
                config.untrusted_initial_score
            };
            tracing::debug!(domain, trusted, score, "new source domain");
            SourceReputation {
                domain: domain.to_string(),
                score: unit(score),
                verification_count: 0,
                anomaly_count: 0,
                trusted,
                last_verified: now,
            }
        });

        record.verification_count += 1;
        record.last_verified = now;

        let found = report.count();
        if found > 0 {
            let before = record.score;
            record.score = unit(record.score - config.anomaly_penalty * found as f64);
            record.anomaly_count += found as u32;
            tracing::debug!(
                domain,
                anomalies = found,
                before,
                after = record.score,
                "anomaly penalty applied"
            );
        }
        record.clone()
    }

    /// Record that `source_id` supports `fact_id`; returns `(verified, confidence)`.
    pub fn cross_reference(&mut self, fact_id: &str, source_id: &str) -> (bool, f64) {
        let sources = self.cross_references.entry(fact_id.to_string()).or_default();
        sources.insert(source_id.to_string());
        let count = sources.len() as f64;

        if sources.len() >= self.config.min_cross_reference_sources {
            (true, (0.5 + 0.15 * count).min(0.95))
        } else {
            (false, 0.3 + 0.1 * count)
        }
    }

    /// Heuristic contradiction pairs between facts sharing a keyword signature.
    pub fn detect_contradictions(&self, facts: &[Fact]) -> Vec<ContradictionPair> {
        let mut groups: BTreeMap<Vec<String>, Vec<&Fact>> = BTreeMap::new();
        for fact in facts {
            groups.entry(topic_signature(&fact.content)).or_default().push(fact);
        }

        let mut pairs = Vec::new();
        for group in groups.values().filter(|g| g.len() > 1) {
            for (i, first) in group.iter().enumerate() {
                for second in &group[i + 1..] {
                    let score = self.contradiction_score(&first.content, &second.content);
                    if score > self.config.contradiction_threshold {
                        pairs.push(ContradictionPair {
                            first: first.id.clone(),
                            second: second.id.clone(),
                            score,
                        });
                    }
                }
            }
        }
        pairs
    }

    fn contradiction_score(&self, a: &str, b: &str) -> f64 {
        let (a, b) = (a.to_lowercase(), b.to_lowercase());
        let a_pos = self.positive.matches(&a);
        let a_neg = self.negative.matches(&a);
        let b_pos = self.positive.matches(&b);
        let b_neg = self.negative.matches(&b);
        if (a_pos && b_neg) || (a_neg && b_pos) {
            0.8
        } else {
            0.0
        }
    }

    /// Split facts into clean and quarantined.
    ///
    /// Each fact is assessed once per tracker: re-filtering an already
    /// assessed fact (same id, source and content) reuses its verdict instead
    /// of penalizing its domain again, so filtering the clean output returns
    /// it unchanged.
    pub fn filter(&mut self, facts: Vec<Fact>) -> FilterOutcome {
        let mut outcome = FilterOutcome::default();

        for fact in facts {
            let key = (fact.id.clone(), fact.source.clone(), fact.content.clone());
            let verdict = match self.verdicts.get(&key) {
                Some(verdict) => verdict.clone(),
                None => {
                    let verdict = self.assess(&fact);
                    self.verdicts.insert(key, verdict.clone());
                    verdict
                }
            };
            match verdict {
                Verdict::Clean => outcome.clean.push(fact),
                Verdict::Poisoned(quarantined) => outcome.poisoned.push(quarantined),
            }
        }

        tracing::info!(
            clean = outcome.clean.len(),
            poisoned = outcome.poisoned.len(),
            "trust filter"
        );
        outcome
    }

    fn assess(&mut self, fact: &Fact) -> Verdict {
        let domain = domain_of(&fact.source);
        let report = self.detector.detect(&fact.content);
        let reputation = self.apply_verification(&domain, &report);

        if reputation.score < self.config.poison_threshold
            || report.count() > self.config.max_anomalies
        {
            let reason = format!(
                "reputation: {:.2}, anomalies: {}",
                reputation.score,
                report.count()
            );
            tracing::warn!(fact = %fact.id, domain = %domain, %reason, "fact quarantined");
            Verdict::Poisoned(QuarantinedFact {
                fact: fact.clone(),
                domain,
                reputation: reputation.score,
                anomalies: report.anomalies,
                reason,
            })
        } else {
            Verdict::Clean
        }
    }

    pub fn statistics(&self) -> SourceStatistics {
        let total = self.reputations.len();
        let average = if total == 0 {
            0.0
        } else {
            self.reputations.values().map(|r| r.score).sum::<f64>() / total as f64
        };
        SourceStatistics {
            total_sources: total,
            trusted_sources: self.reputations.values().filter(|r| r.trusted).count(),
            average_reputation: average,
            total_anomalies: self.reputations.values().map(|r| r.anomaly_count).sum(),
            cross_referenced_facts: self.cross_references.len(),
        }
    }
}

/// First ten lowercased words, deduplicated and sorted, first five kept.
fn topic_signature(content: &str) -> Vec<String> {
    let words: BTreeSet<String> = content
        .to_lowercase()
        .split_whitespace()
        .take(10)
        .map(str::to_string)
        .collect();
    words.into_iter().take(5).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("https://www.gov.uk/news/x"), "gov.uk");
        assert_eq!(domain_of("state.gov/briefing"), "state.gov");
        assert_eq!(domain_of("not a url at all"), UNKNOWN_DOMAIN);
        assert_eq!(domain_of(""), UNKNOWN_DOMAIN);
    }

    #[test]
    fn test_trusted_suffix_match() {
        let tracker = SourceTrustTracker::with_defaults().unwrap();
        assert!(tracker.is_trusted_domain("gov.uk"));
        assert!(tracker.is_trusted_domain("assets.publishing.gov.uk"));
        assert!(!tracker.is_trusted_domain("notgov.uk"));
    }

    #[test]
    fn test_anomaly_kinds() {
        let tracker = SourceTrustTracker::with_defaults().unwrap();
        let report = tracker.detect_anomalies("BREAKINGNEWSNOW!!!");
        assert_eq!(
            report.anomalies,
            vec![
                AnomalyKind::UppercaseRun,
                AnomalyKind::PunctuationRun,
                AnomalyKind::TooShort
            ]
        );

        let calm = "Officials met in Brussels on Tuesday to discuss the upcoming energy package";
        assert!(tracker.detect_anomalies(calm).is_clean());
    }

    #[test]
    fn test_topic_signature() {
        assert_eq!(
            topic_signature("b a c a d e f"),
            vec!["a", "b", "c", "d", "e"]
        );
    }
}
