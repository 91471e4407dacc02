//! Scenario Assembler
//!
//! ```text
//!   frozen ScenarioContext (Arc)          one task per (horizon, polarity)
//!   ┌──────────────────────────┐          bounded by a Semaphore
//!   │ top facts, correlations, │ ──┬──► [12m +] ──┐
//!   │ factors, target          │   ├──► [12m −] ──┤   timeout + retry
//!   └──────────────────────────┘   ├──► [36m +] ──┼──► TextGenerator
//!                                  └──► [36m −] ──┘
//!                                          │ raw text
//!                                          ▼
//!            strict JSON ─► longest balanced {...} ─► fallback scenario
//! ```
//!
//! A generation failure or malformed response only degrades its own
//! scenario; sibling tasks are unaffected.

use crate::config::ScenarioConfig;
use crate::llm::{GenerationError, GenerationRequest, TextGenerator};
use crate::reasoning::{PrioritizedFact, ReasoningPath, WeightedFactor};
use crate::{truncate_chars, unit, Correlation, FactId, Polarity};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

const FALLBACK_CONFIDENCE: f64 = 0.5;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationOutcome {
    /// The whole response was one JSON object.
    ParsedStrict,
    /// A JSON object was found inside surrounding text.
    ParsedExtracted,
    Fallback,
}

/// One probability-annotated narrative for a (horizon, polarity) pair. Never mutated after emission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub id: Uuid,
    pub horizon_months: u32,
    pub polarity: Polarity,
    pub title: String,
    pub description: String,
    pub key_events: Vec<String>,
    pub probabilities: BTreeMap<String, f64>,
    pub impacts: BTreeMap<String, String>,
    pub recommendations: Vec<String>,
    pub confidence: f64,
    pub key_facts_used: Vec<String>,
    pub key_correlations: Vec<String>,
    pub supporting_facts: Vec<FactId>,
    pub reasoning_path_ids: Vec<String>,
    pub causal_relation_ids: Vec<String>,
    pub generation: GenerationOutcome,
    /// Why the scenario fell back, when it did.
    pub degraded_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Scenario {
    pub fn is_fallback(&self) -> bool {
        self.generation == GenerationOutcome::Fallback
    }
}

/// Inputs shared read-only by every scenario task of a run.
#[derive(Debug, Clone)]
pub struct ScenarioContext {
    pub target: String,
    pub facts: Vec<PrioritizedFact>,
    pub correlations: Vec<Correlation>,
    pub factors: Vec<WeightedFactor>,
}

#[derive(Debug, Clone)]
pub struct ScenarioJob {
    pub horizon_months: u32,
    pub polarity: Polarity,
    pub paths: Vec<ReasoningPath>,
}

/// A generation call kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptRecord {
    pub horizon_months: u32,
    pub polarity: Polarity,
    pub context: Value,
    pub response: Option<String>,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

/// Fields recovered from a model response. Anything missing stays empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScenarioDraft {
    pub title: Option<String>,
    pub description: String,
    pub key_events: Vec<String>,
    pub probabilities: BTreeMap<String, f64>,
    pub impacts: BTreeMap<String, String>,
    pub recommendations: Vec<String>,
    pub key_facts_used: Vec<String>,
    pub key_correlations: Vec<String>,
    pub confidence: Option<f64>,
}

pub fn scenario_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "title": {"type": "string"},
            "description": {"type": "string"},
            "key_events": {"type": "array", "items": {"type": "string"}},
            "probabilities": {"type": "object", "additionalProperties": {"type": "number"}},
            "impacts": {"type": "object", "additionalProperties": {"type": "string"}},
            "recommendations": {"type": "array", "items": {"type": "string"}},
            "reasoning": {
                "type": "object",
                "properties": {
                    "key_facts_used": {"type": "array", "items": {"type": "string"}},
                    "key_correlations": {"type": "array", "items": {"type": "string"}},
                    "confidence": {"type": "number", "minimum": 0, "maximum": 1}
                }
            }
        },
        "required": ["title", "description", "key_events", "probabilities"]
    })
}

// ============================================================================
// Response parsing
// ============================================================================

/// Parse raw model text in three tiers: strict, extracted, none.
pub fn parse_scenario_response(raw: &str) -> (Option<ScenarioDraft>, GenerationOutcome) {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw.trim()) {
        tracing::debug!("scenario response parsed strictly");
        return (Some(ScenarioDraft::from_object(&map)), GenerationOutcome::ParsedStrict);
    }

    let mut candidates = balanced_objects(raw);
    candidates.sort_by_key(|c| std::cmp::Reverse(c.len()));
    for candidate in candidates {
        if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(candidate) {
            tracing::info!(chars = candidate.len(), "scenario JSON extracted from surrounding text");
            return (Some(ScenarioDraft::from_object(&map)), GenerationOutcome::ParsedExtracted);
        }
    }

    tracing::warn!(chars = raw.len(), "no JSON object in scenario response");
    (None, GenerationOutcome::Fallback)
}

/// Top-level balanced `{...}` substrings, ignoring braces inside JSON strings.
///
/// A `{` that is never closed is skipped and the scan resumes at the next `{`.
fn balanced_objects(text: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut from = 0usize;
    while let Some(offset) = text[from..].find('{') {
        let start = from + offset;
        match closing_brace(text.as_bytes(), start) {
            Some(end) => {
                found.push(&text[start..=end]);
                from = end + 1;
            }
            None => from = start + 1,
        }
    }
    found
}

/// Index of the `}` that balances the `{` at `start`.
fn closing_brace(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn text_of(value: &Value) -> Option<String> {
    let text = match value {
        Value::Null => return None,
        Value::String(s) => s.clone(),
        Value::Object(map) => ["event", "name", "title", "description"]
            .iter()
            .find_map(|k| map.get(*k).and_then(Value::as_str))?
            .to_string(),
        other => other.to_string(),
    };
    let text = text.trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// Numbers in [0, 1], percentages (`65`, `"65%"`) scaled down.
fn probability_of(value: &Value) -> Option<f64> {
    let raw = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse::<f64>().ok()?,
        Value::Object(map) => return map.get("probability").and_then(probability_of),
        _ => return None,
    };
    if !raw.is_finite() {
        return None;
    }
    Some(unit(if raw > 1.0 { raw / 100.0 } else { raw }))
}

fn strings_of(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(text_of).collect())
        .unwrap_or_default()
}

impl ScenarioDraft {
    fn from_object(map: &Map<String, Value>) -> Self {
        let mut draft = ScenarioDraft {
            title: map.get("title").and_then(text_of),
            description: map.get("description").and_then(text_of).unwrap_or_default(),
            recommendations: strings_of(map.get("recommendations")),
            ..Default::default()
        };

        if let Some(events) = map.get("key_events").and_then(Value::as_array) {
            for event in events {
                let Some(text) = text_of(event) else { continue };
                if let Some(p) = event.get("probability").and_then(probability_of) {
                    draft.probabilities.insert(text.clone(), p);
                }
                draft.key_events.push(text);
            }
        }
        if let Some(probabilities) = map.get("probabilities").and_then(Value::as_object) {
            for (event, value) in probabilities {
                if let Some(p) = probability_of(value) {
                    draft.probabilities.insert(event.clone(), p);
                }
            }
        }
        if let Some(impacts) = map.get("impacts").and_then(Value::as_object) {
            for (area, value) in impacts {
                if let Some(text) = text_of(value) {
                    draft.impacts.insert(area.clone(), text);
                }
            }
        }
        if let Some(reasoning) = map.get("reasoning") {
            draft.key_facts_used = strings_of(reasoning.get("key_facts_used"));
            draft.key_correlations = strings_of(reasoning.get("key_correlations"));
            draft.confidence = reasoning.get("confidence").and_then(probability_of);
        }
        draft
    }
}

// ============================================================================
// Assembler
// ============================================================================

#[derive(Clone)]
pub struct ScenarioAssembler {
    config: ScenarioConfig,
    generator: Arc<dyn TextGenerator>,
    memory: Arc<Mutex<VecDeque<PromptRecord>>>,
}

impl ScenarioAssembler {
    pub fn new(config: ScenarioConfig, generator: Arc<dyn TextGenerator>) -> Self {
        Self {
            config,
            generator,
            memory: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn generator_name(&self) -> &str {
        self.generator.name()
    }

    /// Freeze the inputs of a run: top facts, strongest correlations and all factors.
    pub fn build_context<'a>(
        &self,
        target: &str,
        prioritized: &[PrioritizedFact],
        correlations: &[Correlation],
        factors: impl IntoIterator<Item = &'a WeightedFactor>,
    ) -> ScenarioContext {
        let mut correlations = correlations.to_vec();
        correlations.sort_by(|a, b| b.strength.total_cmp(&a.strength));
        correlations.truncate(self.config.max_correlations);

        let mut factors: Vec<WeightedFactor> = factors.into_iter().cloned().collect();
        factors.sort_by(|a, b| b.weight.total_cmp(&a.weight));

        ScenarioContext {
            target: target.to_string(),
            facts: prioritized.iter().take(self.config.max_facts).cloned().collect(),
            correlations,
            factors,
        }
    }

    /// The structured object handed to the generator for one job.
    pub fn context_object(context: &ScenarioContext, job: &ScenarioJob) -> Value {
        json!({
            "target": context.target,
            "horizon_months": job.horizon_months,
            "polarity": job.polarity,
            "situation_factors": context.factors.iter().map(|f| json!({
                "id": f.id,
                "description": f.description,
                "weight": f.weight,
                "impact_direction": f.impact_direction,
                "timeframe": f.timeframe,
            })).collect::<Vec<_>>(),
            "top_facts": context.facts.iter().map(|p| json!({
                "id": p.fact.id,
                "content": p.fact.content,
                "source": p.fact.source,
                "confidence": p.fact.confidence,
                "priority": p.score,
            })).collect::<Vec<_>>(),
            "correlations": context.correlations,
            "reasoning_paths": job.paths.iter().map(|p| json!({
                "id": p.id,
                "conclusion": p.conclusion,
                "probability": p.probability,
                "confidence": p.confidence,
                "causal_chains": p.causal_chain.iter().map(|c| c.path.join(" -> ")).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
        })
    }

    fn system_prompt(context: &ScenarioContext, job: &ScenarioJob) -> String {
        format!(
            "You are a foresight analyst. Write a {} scenario for {} over the next {} months. \
             Use only the facts, correlations and reasoning paths in the context, cite fact ids \
             in reasoning.key_facts_used, and answer with one JSON object.",
            job.polarity, context.target, job.horizon_months
        )
    }

    /// Generate all jobs concurrently. Output order follows `jobs`.
    pub async fn generate_all(&self, context: ScenarioContext, jobs: Vec<ScenarioJob>) -> Vec<Scenario> {
        let context = Arc::new(context);
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut set = JoinSet::new();

        for (slot, job) in jobs.iter().cloned().enumerate() {
            let this = self.clone();
            let context = Arc::clone(&context);
            let semaphore = Arc::clone(&semaphore);
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (slot, this.generate_one(&context, &job).await)
            });
        }

        let mut slots: Vec<Option<Scenario>> = vec![None; jobs.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((slot, scenario)) => slots[slot] = Some(scenario),
                Err(e) => tracing::warn!(error = %e, "scenario task failed"),
            }
        }

        slots
            .into_iter()
            .zip(&jobs)
            .map(|(scenario, job)| {
                scenario.unwrap_or_else(|| {
                    self.assemble(&context, job, Err(GenerationError::Api("scenario task failed".to_string())))
                })
            })
            .collect()
    }

    pub async fn generate_one(&self, context: &ScenarioContext, job: &ScenarioJob) -> Scenario {
        let request = GenerationRequest {
            system: Self::system_prompt(context, job),
            context: Self::context_object(context, job),
            temperature: self.config.effective_temperature(),
            max_tokens: self.config.max_tokens,
            json_schema: Some(scenario_schema()),
        };
        let result = self.call_with_retry(&request).await;
        self.remember(job, &request, &result);
        self.assemble(context, job, result)
    }

    async fn call_with_retry(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let limit = Duration::from_secs(self.config.timeout_secs);
        let mut attempt = 0u32;
        loop {
            let result = match tokio::time::timeout(limit, self.generator.generate(request.clone())).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout {
                    secs: self.config.timeout_secs,
                }),
            };
            match result {
                Err(e) if e.is_timeout() && attempt < self.config.retries_on_timeout => {
                    attempt += 1;
                    let backoff = self.config.retry_backoff_ms * u64::from(attempt);
                    tracing::warn!(attempt, backoff_ms = backoff, "text generation timed out, retrying");
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
                other => return other,
            }
        }
    }

    fn remember(&self, job: &ScenarioJob, request: &GenerationRequest, result: &Result<String, GenerationError>) {
        let capacity = self.config.prompt_memory;
        if capacity == 0 {
            return;
        }
        let record = PromptRecord {
            horizon_months: job.horizon_months,
            polarity: job.polarity,
            context: request.context.clone(),
            response: result.as_ref().ok().cloned(),
            error: result.as_ref().err().map(ToString::to_string),
            at: Utc::now(),
        };
        let mut memory = self.memory.lock();
        memory.push_back(record);
        while memory.len() > capacity {
            memory.pop_front();
        }
    }

    pub fn prompt_memory(&self) -> Vec<PromptRecord> {
        self.memory.lock().iter().cloned().collect()
    }

    /// Turn a generator result into a scenario, merging reasoning-path numbers.
    pub fn assemble(
        &self,
        context: &ScenarioContext,
        job: &ScenarioJob,
        result: Result<String, GenerationError>,
    ) -> Scenario {
        let (draft, generation, degraded_reason, raw) = match result {
            Ok(raw) => {
                let (draft, outcome) = parse_scenario_response(&raw);
                let reason = draft.is_none().then(|| "response contained no JSON object".to_string());
                (draft, outcome, reason, raw)
            }
            Err(e) => {
                tracing::warn!(
                    horizon = job.horizon_months,
                    polarity = %job.polarity,
                    error = %e,
                    "text generation failed, using fallback scenario"
                );
                (None, GenerationOutcome::Fallback, Some(e.to_string()), String::new())
            }
        };

        let mut scenario = Scenario {
            id: Uuid::new_v4(),
            horizon_months: job.horizon_months,
            polarity: job.polarity,
            title: format!("Scenario {} {} months", job.polarity, job.horizon_months),
            description: String::new(),
            key_events: Vec::new(),
            probabilities: BTreeMap::new(),
            impacts: BTreeMap::new(),
            recommendations: Vec::new(),
            confidence: FALLBACK_CONFIDENCE,
            key_facts_used: Vec::new(),
            key_correlations: Vec::new(),
            supporting_facts: context.facts.iter().map(|p| p.fact.id.clone()).collect(),
            reasoning_path_ids: job.paths.iter().map(|p| p.id.clone()).collect(),
            causal_relation_ids: job
                .paths
                .iter()
                .flat_map(|p| p.causal_chain.iter().map(|c| c.id.clone()))
                .collect(),
            generation,
            degraded_reason,
            created_at: Utc::now(),
        };

        match draft {
            None => {
                scenario.description = match &scenario.degraded_reason {
                    Some(reason) if raw.is_empty() => format!("Generation failed: {reason}"),
                    _ => truncate_chars(&raw, self.config.fallback_description_chars).to_string(),
                };
            }
            Some(draft) => {
                if let Some(title) = draft.title {
                    scenario.title = title;
                }
                scenario.description = draft.description;
                scenario.probabilities = draft.probabilities;
                for event in &draft.key_events {
                    if scenario.probabilities.contains_key(event) {
                        continue;
                    }
                    if let Some(p) = path_probability_for(event, &job.paths, &context.factors) {
                        scenario.probabilities.insert(event.clone(), p);
                    }
                }
                scenario.key_events = draft.key_events;
                scenario.impacts = draft.impacts;
                scenario.recommendations = draft.recommendations;
                scenario.key_facts_used = draft.key_facts_used;
                scenario.key_correlations = draft.key_correlations;
                scenario.confidence = draft
                    .confidence
                    .or_else(|| mean(job.paths.iter().map(|p| p.confidence)))
                    .unwrap_or(FALLBACK_CONFIDENCE);
            }
        }

        tracing::info!(
            horizon = scenario.horizon_months,
            polarity = %scenario.polarity,
            generation = ?scenario.generation,
            events = scenario.key_events.len(),
            "scenario assembled"
        );
        scenario
    }
}

/// Probability of the first path whose factor shares a keyword with the event, else the mean.
fn path_probability_for(event: &str, paths: &[ReasoningPath], factors: &[WeightedFactor]) -> Option<f64> {
    let event = event.to_lowercase();
    paths
        .iter()
        .find(|path| {
            path.factors_sequence.iter().any(|id| {
                factors
                    .iter()
                    .filter(|f| &f.id == id)
                    .any(|f| f.keywords.iter().any(|k| event.contains(k.as_str())))
            })
        })
        .map(|path| path.probability)
        .or_else(|| mean(paths.iter().map(|p| p.probability)))
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strict_parse() {
        let (draft, outcome) = parse_scenario_response(
            r#"{"title": "Boom", "description": "d", "key_events": ["Chip fab opens"],
                "probabilities": {"Chip fab opens": 0.6}, "reasoning": {"confidence": 0.7}}"#,
        );
        let draft = draft.unwrap();
        assert_eq!(outcome, GenerationOutcome::ParsedStrict);
        assert_eq!(draft.title.as_deref(), Some("Boom"));
        assert_eq!(draft.probabilities["Chip fab opens"], 0.6);
        assert_eq!(draft.confidence, Some(0.7));
    }

    #[test]
    fn test_extracts_longest_object_from_prose() {
        let raw = "Sure! {\"x\": 1} Here it is:\n```json\n{\"title\": \"T\", \"description\": \"a } in text\", \"key_events\": []}\n```";
        let (draft, outcome) = parse_scenario_response(raw);
        assert_eq!(outcome, GenerationOutcome::ParsedExtracted);
        assert_eq!(draft.unwrap().description, "a } in text");
    }

    #[test]
    fn test_garbage_has_no_draft() {
        let (draft, outcome) = parse_scenario_response("I cannot help with that {unclosed");
        assert!(draft.is_none());
        assert_eq!(outcome, GenerationOutcome::Fallback);
    }

    #[test]
    fn test_lenient_event_and_probability_shapes() {
        let (draft, _) = parse_scenario_response(
            r#"{"key_events": [{"event": "Embargo lifted", "probability": "40%"}, "Grid upgrade"],
                "probabilities": {"Grid upgrade": 75}}"#,
        );
        let draft = draft.unwrap();
        assert_eq!(draft.key_events, vec!["Embargo lifted", "Grid upgrade"]);
        assert_eq!(draft.probabilities["Embargo lifted"], 0.4);
        assert_eq!(draft.probabilities["Grid upgrade"], 0.75);
    }
}
