//! Shared data model types for conversations, tweets, insights, and the
//! analysis cache.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A threaded conversation: a connected set of tweets linked by reply
/// relations, identified by a single `conversation_id`.
#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct Conversation {
    pub conversation_id: String,
    pub root_tweet_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single message within a conversation.
#[derive(Debug, Clone, sqlx::FromRow, Serialize, Deserialize)]
pub struct Tweet {
    pub tweet_id: String,
    pub conversation_id: String,
    pub author_id: String,
    pub text: String,
    pub in_reply_to_id: Option<String>,
    pub inbound: Option<bool>,
    pub created_at: DateTime<Utc>,
}

/// A message as submitted by a client, before `conversation_id` has been
/// resolved. The wire format never carries
/// `conversation_id` directly — admission groups `IngestTweet`s into one
/// bundle per submitted conversation and the store resolves which
/// `conversation_id` the bundle belongs to from the reply graph.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestTweet {
    pub tweet_id: String,
    pub author_id: String,
    pub text: String,
    #[serde(default)]
    pub in_reply_to_id: Option<String>,
    #[serde(default)]
    pub inbound: Option<bool>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl IngestTweet {
    /// Collapses runs of whitespace in `text` to single spaces and trims
    /// the ends; `normalize(normalize(x)) == normalize(x)`.
    pub fn normalize(mut self) -> Self {
        self.text = normalize_whitespace(&self.text);
        self.author_id = self.author_id.trim().to_string();
        self.tweet_id = self.tweet_id.trim().to_string();
        if let Some(parent) = &self.in_reply_to_id {
            let trimmed = parent.trim();
            self.in_reply_to_id = if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            };
        }
        self
    }
}

/// One client-submitted conversation: a bundle of messages that may link
/// to each other and/or to an already-persisted thread.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestConversation {
    pub messages: Vec<IngestTweet>,
}

/// Collapses any run of Unicode whitespace to a single ASCII space and
/// trims the result.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Sentiment classes an insight's extracted sentiment may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
    Mixed,
    Unknown,
}

impl Sentiment {
    /// Normalizes an arbitrary string (as returned by the LLM) into one of
    /// the permitted sentiment values; anything unrecognized maps to
    /// `Unknown`.
    pub fn normalize(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "positive" => Sentiment::Positive,
            "neutral" => Sentiment::Neutral,
            "negative" => Sentiment::Negative,
            "mixed" => Sentiment::Mixed,
            _ => Sentiment::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Neutral => "neutral",
            Sentiment::Negative => "negative",
            Sentiment::Mixed => "mixed",
            Sentiment::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Sentiment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The derived analysis record for a conversation. Exactly one of
/// `llm_output`/`skipped_reason` is set (invariant P5).
#[derive(Debug, Clone, Serialize)]
pub struct Insight {
    pub conversation_id: String,
    pub llm_output: Option<serde_json::Value>,
    pub sentiment: Sentiment,
    pub topics: Vec<String>,
    pub gaps: Vec<String>,
    pub token_usage: u64,
    pub cost_estimate: f64,
    pub skipped_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Insight {
    /// Builds a skipped insight for a given reason (pre-filter skip,
    /// empty thread, circuit-open deferral never reaches here, LLM error).
    pub fn skipped(conversation_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            llm_output: None,
            sentiment: Sentiment::Unknown,
            topics: Vec::new(),
            gaps: Vec::new(),
            token_usage: 0,
            cost_estimate: 0.0,
            skipped_reason: Some(reason.into()),
            created_at: Utc::now(),
        }
    }

    /// True if exactly one of `llm_output`/`skipped_reason` is set (P5).
    pub fn is_well_formed(&self) -> bool {
        self.llm_output.is_some() != self.skipped_reason.is_some()
    }
}

/// Result of `upsert_batch` for a single input conversation.
#[derive(Debug, Clone, Serialize)]
pub struct UpsertResult {
    pub conversation_id: String,
    pub created: bool,
}

/// Filter parameters accepted by `list_insights`.
#[derive(Debug, Clone, Default)]
pub struct InsightFilter {
    pub sentiment: Option<Sentiment>,
    pub topic: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
}

/// Trend window accepted by `/api/v1/trends`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrendWindow {
    OneDay,
    SevenDays,
    ThirtyDays,
}

impl TrendWindow {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "1d" => Some(TrendWindow::OneDay),
            "7d" => Some(TrendWindow::SevenDays),
            "30d" => Some(TrendWindow::ThirtyDays),
            _ => None,
        }
    }

    pub fn duration(&self) -> chrono::Duration {
        match self {
            TrendWindow::OneDay => chrono::Duration::days(1),
            TrendWindow::SevenDays => chrono::Duration::days(7),
            TrendWindow::ThirtyDays => chrono::Duration::days(30),
        }
    }
}

/// A `(count, value)` pair used for top-K topic/gap aggregation.
#[derive(Debug, Clone, Serialize)]
pub struct CountedValue {
    pub count: u64,
    pub value: String,
}

/// Windowed aggregate returned by `trends`.
#[derive(Debug, Clone, Serialize)]
pub struct TrendAggregate {
    pub volume: u64,
    pub sentiment_counts: std::collections::BTreeMap<String, u64>,
    pub top_topics: Vec<CountedValue>,
    pub top_gaps: Vec<CountedValue>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentiment_normalize_known_values() {
        assert_eq!(Sentiment::normalize("Positive"), Sentiment::Positive);
        assert_eq!(Sentiment::normalize(" negative "), Sentiment::Negative);
        assert_eq!(Sentiment::normalize("MIXED"), Sentiment::Mixed);
    }

    #[test]
    fn sentiment_normalize_unknown_falls_back() {
        assert_eq!(Sentiment::normalize("ecstatic"), Sentiment::Unknown);
        assert_eq!(Sentiment::normalize(""), Sentiment::Unknown);
    }

    #[test]
    fn insight_skipped_is_well_formed() {
        let insight = Insight::skipped("c1", "empty_thread");
        assert!(insight.is_well_formed());
        assert!(insight.llm_output.is_none());
    }

    #[test]
    fn insight_with_output_is_well_formed() {
        let mut insight = Insight::skipped("c1", "x");
        insight.skipped_reason = None;
        insight.llm_output = Some(serde_json::json!({"summary": "ok"}));
        assert!(insight.is_well_formed());
    }

    #[test]
    fn insight_with_both_set_is_malformed() {
        let mut insight = Insight::skipped("c1", "x");
        insight.llm_output = Some(serde_json::json!({}));
        assert!(!insight.is_well_formed());
    }

    #[test]
    fn trend_window_parses_known_values() {
        assert_eq!(TrendWindow::parse("1d"), Some(TrendWindow::OneDay));
        assert_eq!(TrendWindow::parse("7d"), Some(TrendWindow::SevenDays));
        assert_eq!(TrendWindow::parse("30d"), Some(TrendWindow::ThirtyDays));
        assert_eq!(TrendWindow::parse("90d"), None);
    }

    #[test]
    fn normalize_whitespace_collapses_runs() {
        assert_eq!(normalize_whitespace("  hi   there\n\tfriend "), "hi there friend");
    }

    #[test]
    fn normalize_whitespace_is_idempotent() {
        let once = normalize_whitespace("  hi   there  ");
        let twice = normalize_whitespace(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn ingest_tweet_normalize_is_idempotent() {
        let raw = IngestTweet {
            tweet_id: " t1 ".to_string(),
            author_id: " U1 ".to_string(),
            text: "  hello   world  ".to_string(),
            in_reply_to_id: Some("  ".to_string()),
            inbound: None,
            created_at: Utc::now(),
        };
        let once = raw.normalize();
        let twice = once.clone().normalize();
        assert_eq!(once.text, twice.text);
        assert_eq!(once.tweet_id, "t1");
        assert_eq!(once.in_reply_to_id, None, "blank in_reply_to_id normalizes away");
    }
}
