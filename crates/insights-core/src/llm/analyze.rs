//! Insight extraction: prompt construction, retry with backoff, and
//! lenient parsing of the model's response.

use super::{GenerationParams, LlmProvider, TokenUsage};
use crate::error::LlmError;
use crate::llm::pricing;
use crate::model::Sentiment;
use rand::Rng;
use std::time::Duration;

const SYSTEM_PROMPT: &str = "You are an analyst summarizing a customer conversation thread. \
Respond with a single JSON object with exactly these keys: \
\"sentiment\" (one of positive, neutral, negative, mixed), \
\"topics\" (an array of short topic strings), \
\"gaps\" (an array of short strings describing unanswered questions or unmet needs), and \
\"summary\" (a one-sentence plain-language summary of the thread). \
Respond with JSON only, no surrounding prose.";

/// Retry policy for transient LLM failures: exponential
/// backoff from `base_delay`, doubling each attempt, with up to 20%
/// jitter, capped at `max_attempts` total tries.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub backoff_factor: f64,
    pub jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            jitter_fraction: 0.2,
        }
    }
}

impl RetryPolicy {
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponential = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let jitter = 1.0 + rand::thread_rng().gen_range(-self.jitter_fraction..=self.jitter_fraction);
        Duration::from_secs_f64((exponential * jitter).max(0.0))
    }
}

/// The structured result of analyzing one conversation.
#[derive(Debug, Clone)]
pub struct AnalysisOutcome {
    pub sentiment: Sentiment,
    pub topics: Vec<String>,
    pub gaps: Vec<String>,
    pub raw: serde_json::Value,
    pub usage: TokenUsage,
    pub cost_estimate: f64,
}

/// Runs the full analyze flow against `provider`: builds the prompt from
/// `rendered_thread`, retries transient failures per `policy`, and parses
/// the model's JSON response. A non-retriable error or exhausted retries
/// returns `Err`, which the analyzer turns into a `skipped_reason`.
pub async fn analyze_thread(
    provider: &dyn LlmProvider,
    rendered_thread: &str,
    model_for_pricing: &str,
    policy: &RetryPolicy,
) -> Result<AnalysisOutcome, LlmError> {
    let params = GenerationParams {
        max_tokens: 512,
        temperature: 0.2,
    };

    let mut last_err = None;
    for attempt in 0..policy.max_attempts {
        match provider.complete(SYSTEM_PROMPT, rendered_thread, &params).await {
            Ok(response) => {
                let parsed = parse_response(&response.text)?;
                let cost_estimate = pricing::lookup("openai", model_for_pricing)
                    .compute_cost(response.usage.input_tokens, response.usage.output_tokens);
                return Ok(AnalysisOutcome {
                    sentiment: parsed.sentiment,
                    topics: parsed.topics,
                    gaps: parsed.gaps,
                    raw: parsed.raw,
                    usage: response.usage,
                    cost_estimate,
                });
            }
            Err(err) if err.is_non_retriable() => return Err(err),
            Err(err) => {
                let wait = match &err {
                    LlmError::Transient {
                        retry_after_secs: Some(secs),
                        ..
                    } => Duration::from_secs(*secs),
                    _ => policy.delay_for_attempt(attempt),
                };
                last_err = Some(err);
                if attempt + 1 < policy.max_attempts {
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    Err(last_err.expect("loop runs at least once and only exits via return or this branch"))
}

struct ParsedAnalysis {
    sentiment: Sentiment,
    topics: Vec<String>,
    gaps: Vec<String>,
    raw: serde_json::Value,
}

/// Parses a model response leniently: extracts the first balanced
/// `{...}` region in the text (tolerating surrounding prose or markdown
/// fences the model adds despite instructions) and decodes it as JSON.
fn parse_response(text: &str) -> Result<ParsedAnalysis, LlmError> {
    let json_slice = extract_json_object(text)
        .ok_or_else(|| LlmError::Protocol("no JSON object found in LLM response".to_string()))?;

    let raw: serde_json::Value = serde_json::from_str(json_slice)
        .map_err(|e| LlmError::Protocol(format!("invalid JSON in LLM response: {e}")))?;

    let sentiment = raw
        .get("sentiment")
        .and_then(|v| v.as_str())
        .map(Sentiment::normalize)
        .unwrap_or(Sentiment::Unknown);

    let topics = raw
        .get("topics")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
        .unwrap_or_default();

    let gaps = raw
        .get("gaps")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).map(str::to_string).collect())
        .unwrap_or_default();

    Ok(ParsedAnalysis {
        sentiment,
        topics,
        gaps,
        raw,
    })
}

/// Finds the first `{...}` substring with balanced braces, ignoring
/// braces inside string literals.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
