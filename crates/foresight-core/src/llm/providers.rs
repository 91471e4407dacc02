//! Text generation providers
//!
//! One HTTP client speaks the OpenAI chat-completions wire format. It serves
//! hosted OpenAI as well as local OpenAI-compatible servers (vLLM, Ollama).

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};

#[cfg(feature = "openai")]
use super::{GenerationError, GenerationRequest, TextGenerator};
#[cfg(feature = "openai")]
use async_trait::async_trait;
#[cfg(feature = "openai")]
use reqwest::Client;
#[cfg(feature = "openai")]
use std::time::Duration;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    OpenAI,
    Local,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub provider: Provider,
    #[serde(default, skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    /// Retries on HTTP 429 only; timeouts are retried by the scenario assembler.
    pub max_retries: u32,
}

impl LlmConfig {
    /// Load from environment variables, preferring a hosted key over a local URL.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            return Ok(Self {
                provider: Provider::OpenAI,
                api_key: key,
                model: std::env::var("OPENAI_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
                base_url: std::env::var("OPENAI_BASE_URL").ok(),
                timeout_secs: 90,
                max_retries: 2,
            });
        }

        if let Ok(url) = std::env::var("LOCAL_LLM_URL") {
            return Ok(Self::local(
                &url,
                &std::env::var("LOCAL_LLM_MODEL").unwrap_or_else(|_| "default".to_string()),
            ));
        }

        Err(ConfigError::NoProviderConfigured)
    }

    pub fn openai(api_key: &str, model: &str) -> Self {
        Self {
            provider: Provider::OpenAI,
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: None,
            timeout_secs: 90,
            max_retries: 2,
        }
    }

    pub fn local(url: &str, model: &str) -> Self {
        Self {
            provider: Provider::Local,
            api_key: String::new(),
            model: model.to_string(),
            base_url: Some(url.trim_end_matches('/').to_string()),
            timeout_secs: 120,
            max_retries: 0,
        }
    }

    /// Full chat-completions URL for this provider.
    pub fn completions_url(&self) -> String {
        match (self.provider, self.base_url.as_deref()) {
            (Provider::Local, Some(base)) => format!("{base}/v1/chat/completions"),
            (_, base) => format!("{}/chat/completions", base.unwrap_or(OPENAI_BASE_URL)),
        }
    }
}

// ============================================================================
// OpenAI-compatible client
// ============================================================================

#[cfg(feature = "openai")]
pub struct OpenAiCompatibleGenerator {
    client: Client,
    config: LlmConfig,
}

#[cfg(feature = "openai")]
impl OpenAiCompatibleGenerator {
    pub fn new(config: LlmConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| GenerationError::Network(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client, config })
    }

    async fn complete_once(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let messages: Vec<serde_json::Value> = request
            .messages()
            .iter()
            .map(|m| serde_json::json!({ "role": m.role.as_str(), "content": m.content }))
            .collect();

        let mut body = serde_json::json!({
            "model": self.config.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
        });
        if request.json_schema.is_some() {
            body["response_format"] = serde_json::json!({"type": "json_object"});
        }

        let mut http = self
            .client
            .post(self.config.completions_url())
            .header("Content-Type", "application/json")
            .json(&body);
        if !self.config.api_key.is_empty() {
            http = http.header("Authorization", format!("Bearer {}", self.config.api_key));
        }

        let response = http.send().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout {
                    secs: self.config.timeout_secs,
                }
            } else {
                GenerationError::Network(e.to_string())
            }
        })?;

        if response.status() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(5);
            return Err(GenerationError::RateLimited {
                retry_after_ms: retry_after * 1000,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(GenerationError::Api(format!("{status}: {error_text}")));
        }

        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| GenerationError::InvalidResponse(e.to_string()))?;

        data["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| GenerationError::InvalidResponse("missing choices[0].message.content".to_string()))
    }
}

#[cfg(feature = "openai")]
#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let mut attempt = 0;
        loop {
            match self.complete_once(&request).await {
                Err(GenerationError::RateLimited { retry_after_ms }) if attempt < self.config.max_retries => {
                    attempt += 1;
                    let wait = retry_after_ms.min(10_000);
                    tracing::warn!(attempt, wait_ms = wait, model = %self.config.model, "rate limited, retrying");
                    tokio::time::sleep(Duration::from_millis(wait)).await;
                }
                other => return other,
            }
        }
    }

    fn name(&self) -> &str {
        &self.config.model
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completions_url_per_provider() {
        assert_eq!(
            LlmConfig::openai("k", "m").completions_url(),
            "https://api.openai.com/v1/chat/completions"
        );
        assert_eq!(
            LlmConfig::local("http://localhost:8000/", "m").completions_url(),
            "http://localhost:8000/v1/chat/completions"
        );
    }

    #[test]
    fn test_api_key_not_serialized() {
        let json = serde_json::to_string(&LlmConfig::openai("secret", "m")).unwrap();
        assert!(!json.contains("secret"));
    }
}
