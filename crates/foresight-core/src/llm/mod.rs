//! Text Generation Service seam
//!
//! The scenario assembler hands a structured context object to a
//! [`TextGenerator`] and gets raw text back. Nothing here assumes the text is
//! valid JSON or that the service is reachable; parsing and fallback live in
//! [`crate::scenario`].

pub mod providers;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub use providers::{LlmConfig, Provider};
#[cfg(feature = "openai")]
pub use providers::OpenAiCompatibleGenerator;

// ============================================================================
// Generator Interface
// ============================================================================

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Produce raw text for a structured context.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;

    /// Short provider name for logs and reports.
    fn name(&self) -> &str;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// One generation call: a system instruction plus a structured (non-prose) context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub system: String,
    pub context: serde_json::Value,
    pub temperature: f32,
    pub max_tokens: usize,
    pub json_schema: Option<serde_json::Value>,
}

impl GenerationRequest {
    /// Chat messages for chat-completion style services.
    pub fn messages(&self) -> Vec<Message> {
        let mut user = String::from("Context:\n");
        user.push_str(&serde_json::to_string_pretty(&self.context).unwrap_or_default());
        if let Some(schema) = &self.json_schema {
            user.push_str("\n\nRespond with a single JSON object matching this schema:\n");
            user.push_str(&schema.to_string());
        }
        vec![
            Message {
                role: Role::System,
                content: self.system.clone(),
            },
            Message {
                role: Role::User,
                content: user,
            },
        ]
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GenerationError {
    #[error("API error: {0}")]
    Api(String),
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },
    #[error("Timed out after {secs}s")]
    Timeout { secs: u64 },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Network error: {0}")]
    Network(String),
}

impl GenerationError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GenerationError::Timeout { .. })
    }
}

// ============================================================================
// Mock Generator
// ============================================================================

type ResponderFn = dyn Fn(&GenerationRequest) -> Result<String, GenerationError> + Send + Sync;

enum Responder {
    Scripted(Vec<Result<String, GenerationError>>),
    Dynamic(Box<ResponderFn>),
}

/// Offline generator for tests and demo runs.
///
/// Scripted responses are handed out in call order; once exhausted the last
/// one repeats. Every request is recorded.
pub struct MockGenerator {
    responder: Responder,
    cursor: AtomicUsize,
    delay: Option<Duration>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl MockGenerator {
    pub fn scripted(responses: Vec<Result<String, GenerationError>>) -> Self {
        Self {
            responder: Responder::Scripted(responses),
            cursor: AtomicUsize::new(0),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(text: impl Into<String>) -> Self {
        Self::scripted(vec![Ok(text.into())])
    }

    pub fn failing(error: GenerationError) -> Self {
        Self::scripted(vec![Err(error)])
    }

    /// Compute each response from its request.
    pub fn responding<F>(f: F) -> Self
    where
        F: Fn(&GenerationRequest) -> Result<String, GenerationError> + Send + Sync + 'static,
    {
        Self {
            responder: Responder::Dynamic(Box::new(f)),
            cursor: AtomicUsize::new(0),
            delay: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Sleep before answering, to exercise timeouts.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn call_count(&self) -> usize {
        self.cursor.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let call = self.cursor.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.responder {
            Responder::Scripted(responses) => match responses.get(call).or_else(|| responses.last()) {
                Some(response) => response.clone(),
                None => Err(GenerationError::Api("no scripted response".to_string())),
            },
            Responder::Dynamic(f) => f(&request),
        }
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "You are an analyst.".to_string(),
            context: json!({"horizon_months": 12}),
            temperature: 0.3,
            max_tokens: 100,
            json_schema: Some(json!({"type": "object"})),
        }
    }

    #[tokio::test]
    async fn test_scripted_responses_then_repeat_last() {
        let mock = MockGenerator::scripted(vec![
            Ok("first".to_string()),
            Err(GenerationError::Network("down".to_string())),
        ]);
        assert_eq!(mock.generate(request()).await.unwrap(), "first");
        assert!(mock.generate(request()).await.is_err());
        assert!(mock.generate(request()).await.is_err());
        assert_eq!(mock.call_count(), 3);
        assert_eq!(mock.requests().len(), 3);
    }

    #[test]
    fn test_messages_embed_context_and_schema() {
        let messages = request().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[1].content.contains("\"horizon_months\": 12"));
        assert!(messages[1].content.contains("schema"));
    }
}
