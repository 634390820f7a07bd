//! LLM client abstraction (C8).
//!
//! `openai_compat` talks the OpenAI chat-completions wire format and maps
//! transport/HTTP failures onto [`crate::error::LlmError`]; `analyze`
//! builds the insight-extraction prompt, retries transient failures with
//! backoff, and parses the model's response; `pricing` estimates the
//! dollar cost of a completion from its token usage.

pub mod analyze;
pub mod openai_compat;
pub mod pricing;

use crate::error::LlmError;

/// Token usage reported by (or estimated for) an LLM completion.
#[derive(Debug, Clone, Copy, Default, serde::Serialize, serde::Deserialize)]
pub struct TokenUsage {
    /// Number of tokens in the input/prompt.
    pub input_tokens: u32,
    /// Number of tokens in the output/completion.
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        (self.input_tokens + self.output_tokens) as u64
    }
}

/// Response from a single completion call.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The generated text content.
    pub text: String,
    /// Token usage for this completion.
    pub usage: TokenUsage,
    /// The model that produced this response.
    pub model: String,
}

/// Parameters controlling a single generation call.
#[derive(Debug, Clone)]
pub struct GenerationParams {
    /// Maximum number of tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature (0.0 = deterministic, 1.0+ = creative).
    pub temperature: f32,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: 0.2,
        }
    }
}

/// Abstraction over the LLM transport, so the retry/prompt-building logic
/// in `analyze` can be tested against a fake without a live HTTP server.
#[async_trait::async_trait]
pub trait LlmProvider: Send + Sync {
    /// Sends a single completion request. Implementations classify
    /// failures into [`LlmError`] variants so the caller can decide
    /// whether to retry.
    async fn complete(
        &self,
        system: &str,
        user_message: &str,
        params: &GenerationParams,
    ) -> Result<LlmResponse, LlmError>;
}
