//! Source trust tests: reputation thresholds, cross-referencing, quarantine.

use approx::assert_relative_eq;
use foresight_core::trust::{AnomalyKind, SourceTrustTracker};
use foresight_core::Fact;

fn fact(id: &str, source: &str, content: &str) -> Fact {
    Fact {
        id: id.to_string(),
        content: content.to_string(),
        source: source.to_string(),
        published: None,
        confidence: 0.7,
        relevance: 0.5,
        tags: vec![],
        entities: vec![],
    }
}

fn tracker() -> SourceTrustTracker {
    SourceTrustTracker::with_defaults().unwrap()
}

#[test]
fn reputation_at_threshold_is_not_poisoned() {
    let mut t = tracker();

    // uppercase run + punctuation run: 0.5 - 2 * 0.1 = 0.3
    let loud = fact(
        "f1",
        "blog.example",
        "BREAKINGNEWS about markets!!! and more words to pass the minimum count here",
    );
    let outcome = t.filter(vec![loud]);
    assert_eq!(outcome.clean.len(), 1);
    let rep = t.reputation("blog.example").unwrap();
    assert_eq!(rep.score, 0.3);
    assert_eq!(rep.anomaly_count, 2);
    assert!(!rep.trusted);

    // one more anomaly from the same domain drops it below the threshold
    let shouting = fact(
        "f2",
        "https://blog.example/post",
        "Another SHOUTINGWORD appears in this otherwise ordinary sentence about trade",
    );
    let outcome = t.filter(vec![shouting]);
    assert!(outcome.clean.is_empty());
    assert_eq!(outcome.poisoned.len(), 1);
    assert_relative_eq!(outcome.poisoned[0].reputation, 0.2);
    assert_eq!(outcome.poisoned[0].domain, "blog.example");
}

#[test]
fn three_anomalies_quarantine_even_trusted_sources() {
    let mut t = tracker();
    let content = format!(
        "OILCRASHNOWTODAY!!! prices collapse, read http://oil.example/{} for the full insider story now",
        "a".repeat(60)
    );
    let outcome = t.filter(vec![fact("f1", "https://www.oecd.org/x", &content)]);

    assert_eq!(outcome.poisoned.len(), 1);
    let q = &outcome.poisoned[0];
    assert_eq!(q.domain, "oecd.org");
    assert_relative_eq!(q.reputation, 0.6);
    assert_eq!(q.anomalies.len(), 3);
    assert!(q.anomalies.contains(&AnomalyKind::SuspiciousUrl));
    assert!(q.reason.contains("anomalies: 3"));
    assert!(t.reputation("oecd.org").unwrap().trusted);
}

#[test]
fn cross_reference_confidence_grows_with_distinct_sources() {
    let mut t = tracker();

    let (ok, c) = t.cross_reference("f1", "un.org");
    assert!(!ok);
    assert_relative_eq!(c, 0.4);

    let (ok, c) = t.cross_reference("f1", "oecd.org");
    assert!(!ok);
    assert_relative_eq!(c, 0.5);

    let (ok, c) = t.cross_reference("f1", "nato.int");
    assert!(ok);
    assert_relative_eq!(c, 0.95);

    // repeating a source does not count twice
    let (ok, c) = t.cross_reference("f1", "un.org");
    assert!(ok);
    assert_relative_eq!(c, 0.95);
    assert_eq!(t.statistics().cross_referenced_facts, 1);
}

#[test]
fn filtering_clean_output_again_is_a_no_op() {
    let mut t = tracker();
    let facts = vec![
        fact("f1", "https://europa.eu/news", "European car makers report falling margins across all segments this year"),
        fact("f2", "https://news.example", "TOTALLYTRUE oil!!!"),
    ];
    let first = t.filter(facts);
    assert_eq!(first.clean.len(), 1);
    let before = t.reputation("europa.eu").unwrap().clone();

    let second = t.filter(first.clean.clone());
    assert_eq!(second.clean, first.clean);
    assert!(second.poisoned.is_empty());
    let after = t.reputation("europa.eu").unwrap();
    assert_eq!(after.verification_count, before.verification_count);
    assert_eq!(after.score, before.score);
}

#[test]
fn reused_id_with_new_content_is_assessed_again() {
    let mut t = tracker();
    let calm = "Steel output in the region held steady through the last quarter of trading";
    assert_eq!(t.filter(vec![fact("f1", "blog.example", calm)]).clean.len(), 1);

    let rewritten = fact("f1", "blog.example", "STEELCOLLAPSE now!!! buy");
    let outcome = t.filter(vec![rewritten]);
    assert_eq!(outcome.poisoned.len(), 1);
    let rep = t.reputation("blog.example").unwrap();
    assert_eq!(rep.verification_count, 2);
    assert_relative_eq!(rep.score, 0.2);
}

#[test]
fn contradictions_need_same_topic_and_opposite_sentiment() {
    let t = tracker();
    let facts = vec![
        fact("f1", "oecd.org", "energy market outlook for atlantis shows wzrost"),
        fact("f2", "un.org", "energy market outlook for atlantis shows spadek"),
        fact("f3", "un.org", "copper mining output in chile shows spadek"),
    ];
    let pairs = t.detect_contradictions(&facts);
    assert_eq!(pairs.len(), 1);
    assert_eq!((pairs[0].first.as_str(), pairs[0].second.as_str()), ("f1", "f2"));
    assert_relative_eq!(pairs[0].score, 0.8);
}

#[test]
fn statistics_cover_every_seen_domain() {
    let mut t = tracker();
    t.verify_source("un.org", "A calm and well sourced report about trade flows in the region");
    t.verify_source("random.example", "short");

    let stats = t.statistics();
    assert_eq!(stats.total_sources, 2);
    assert_eq!(stats.trusted_sources, 1);
    assert_eq!(stats.total_anomalies, 1);
    assert_relative_eq!(stats.average_reputation, (0.9 + 0.4) / 2.0);
}
