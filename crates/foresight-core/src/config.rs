//! Session configuration
//!
//! All tunables live in plain serde structs with `Default` impls carrying the
//! reference constants. [`SessionConfig::from_env`] overlays `FORESIGHT_*`
//! variables on the defaults; [`SessionConfig::from_json_file`] loads a full
//! document where omitted sections keep their defaults.

use crate::lexicon::Lexicons;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("No text generation provider configured. Set OPENAI_API_KEY or LOCAL_LLM_URL")]
    NoProviderConfigured,
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
    #[error("Cannot read {path}: {message}")]
    Io { path: String, message: String },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Invalid anomaly pattern {name}: {message}")]
    Pattern { name: String, message: String },
}

// ============================================================================
// Trust
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrustConfig {
    pub trusted_initial_score: f64,
    pub untrusted_initial_score: f64,
    pub anomaly_penalty: f64,
    /// Facts whose source reputation is strictly below this are poisoned.
    pub poison_threshold: f64,
    /// Facts with strictly more anomalies than this are poisoned.
    pub max_anomalies: usize,
    pub min_cross_reference_sources: usize,
    pub min_words: usize,
    pub max_words: usize,
    pub uppercase_run: usize,
    pub punctuation_run: usize,
    pub long_url_length: usize,
    pub contradiction_threshold: f64,
    pub trusted_domains: Vec<String>,
}

impl Default for TrustConfig {
    fn default() -> Self {
        Self {
            trusted_initial_score: 0.9,
            untrusted_initial_score: 0.5,
            anomaly_penalty: 0.1,
            poison_threshold: 0.3,
            max_anomalies: 2,
            min_cross_reference_sources: 3,
            min_words: 10,
            max_words: 10_000,
            uppercase_run: 10,
            punctuation_run: 3,
            long_url_length: 50,
            contradiction_threshold: 0.7,
            trusted_domains: [
                "gov.uk",
                "state.gov",
                "europa.eu",
                "nato.int",
                "un.org",
                "oecd.org",
                "auswaertiges-amt.de",
                "diplomatie.gouv.fr",
                "mea.gov.in",
                "mofa.gov.sa",
                "fmprc.gov.cn",
                "mid.ru",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
        }
    }
}

// ============================================================================
// Target profile + reasoning
// ============================================================================

/// The entity every causal chain points at, plus what makes a concept relevant to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetProfile {
    pub name: String,
    pub key_relations: Vec<String>,
    pub organizations: Vec<String>,
    pub strong_sectors: Vec<String>,
}

impl Default for TargetProfile {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            name: "Atlantis".to_string(),
            key_relations: strings(&["Niemcy", "Francja", "Finlandia", "Ukraina", "USA", "Japonia"]),
            organizations: strings(&["EU", "NATO", "European Union"]),
            strong_sectors: strings(&[
                "przemysł ciężki",
                "motoryzacyjny",
                "spożywczy",
                "chemiczny",
                "ICT",
                "OZE",
                "przetwarzanie surowców krytycznych",
                "infrastruktura AI",
            ]),
        }
    }
}

impl TargetProfile {
    /// Key relations, organizations and sectors: names that count as key entities.
    pub fn key_entities(&self) -> impl Iterator<Item = &str> {
        self.key_relations
            .iter()
            .chain(&self.organizations)
            .chain(&self.strong_sectors)
            .map(String::as_str)
    }
}

/// Coefficients of the fact priority score.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub relevance: f64,
    pub confidence: f64,
    pub factor: f64,
    pub centrality: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            relevance: 0.3,
            confidence: 0.2,
            factor: 0.4,
            centrality: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReasoningConfig {
    pub max_path_depth: usize,
    pub top_factors: usize,
    pub probability_cap: f64,
    pub confidence_cap: f64,
    pub score_weights: ScoreWeights,
}

impl Default for ReasoningConfig {
    fn default() -> Self {
        Self {
            max_path_depth: 5,
            top_factors: 5,
            probability_cap: 0.95,
            confidence_cap: 0.9,
            score_weights: ScoreWeights::default(),
        }
    }
}

// ============================================================================
// Scenario generation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub horizons: Vec<u32>,
    pub max_facts: usize,
    pub max_correlations: usize,
    pub temperature: f32,
    pub creative_temperature: f32,
    pub creative: bool,
    pub max_tokens: usize,
    pub timeout_secs: u64,
    pub retries_on_timeout: u32,
    pub retry_backoff_ms: u64,
    pub concurrency: usize,
    pub fallback_description_chars: usize,
    pub prompt_memory: usize,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            horizons: vec![12, 36],
            max_facts: 30,
            max_correlations: 10,
            temperature: 0.3,
            creative_temperature: 0.8,
            creative: false,
            max_tokens: 3000,
            timeout_secs: 90,
            retries_on_timeout: 1,
            retry_backoff_ms: 500,
            concurrency: 4,
            fallback_description_chars: 1000,
            prompt_memory: 10,
        }
    }
}

impl ScenarioConfig {
    pub fn effective_temperature(&self) -> f32 {
        if self.creative {
            self.creative_temperature
        } else {
            self.temperature
        }
    }
}

// ============================================================================
// Session
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub target: TargetProfile,
    pub trust: TrustConfig,
    pub reasoning: ReasoningConfig,
    pub scenario: ScenarioConfig,
    pub lexicons: Lexicons,
}

impl SessionConfig {
    /// Defaults overlaid with `FORESIGHT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Ok(target) = std::env::var("FORESIGHT_TARGET") {
            config.target.name = target;
        }
        if let Some(v) = env_parse("FORESIGHT_TIMEOUT_SECS")? {
            config.scenario.timeout_secs = v;
        }
        if let Some(v) = env_parse("FORESIGHT_CONCURRENCY")? {
            config.scenario.concurrency = v;
        }
        if let Some(v) = env_parse("FORESIGHT_RETRIES")? {
            config.scenario.retries_on_timeout = v;
        }
        if let Some(v) = env_parse("FORESIGHT_TEMPERATURE")? {
            config.scenario.temperature = v;
        }
        if let Some(v) = env_parse("FORESIGHT_MAX_TOKENS")? {
            config.scenario.max_tokens = v;
        }
        if let Some(v) = env_parse("FORESIGHT_MIN_SOURCES")? {
            config.trust.min_cross_reference_sources = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        let config: Self =
            serde_json::from_str(&text).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scenario.concurrency == 0 {
            return Err(ConfigError::Invalid("scenario.concurrency must be at least 1".into()));
        }
        if self.scenario.horizons.is_empty() {
            return Err(ConfigError::Invalid("scenario.horizons must not be empty".into()));
        }
        if self.target.name.trim().is_empty() {
            return Err(ConfigError::Invalid("target.name must not be empty".into()));
        }
        if !(0.0..=1.0).contains(&self.trust.poison_threshold) {
            return Err(ConfigError::Invalid("trust.poison_threshold must be in [0, 1]".into()));
        }
        Ok(())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv {
                key: key.to_string(),
                value,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.scenario.horizons, vec![12, 36]);
        assert_eq!(config.trust.min_cross_reference_sources, 3);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"target": {{"name": "Borealia"}}, "scenario": {{"concurrency": 2}}}}"#)
            .unwrap();

        let config = SessionConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.target.name, "Borealia");
        assert_eq!(config.scenario.concurrency, 2);
        assert_eq!(config.scenario.max_tokens, 3000);
        assert_eq!(
            config.target.strong_sectors,
            TargetProfile::default().strong_sectors
        );
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let mut config = SessionConfig::default();
        config.scenario.concurrency = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
