//! Pre-filter heuristics (C4): cheap checks applied before a conversation
//! reaches the LLM, so trivially thin threads are skipped without spending
//! a request budget on them.

use crate::model::Tweet;

/// Configurable thresholds a thread must clear to be analyzed.
#[derive(Debug, Clone, Copy)]
pub struct PreFilterConfig {
    /// Minimum number of distinct messages in the thread.
    pub min_messages: usize,
    /// Minimum combined character count across all messages.
    pub min_total_chars: usize,
}

/// Why a conversation did not clear the pre-filter, recorded verbatim as
/// `Insight::skipped_reason` in the literal form `message_count_{n}_lt_{min}`
/// / `total_chars_{n}_lt_{min}`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Fewer than `min_messages` tweets in the thread.
    TooFewMessages { count: usize, min: usize },
    /// Combined text shorter than `min_total_chars`.
    TooShort { count: usize, min: usize },
}

impl SkipReason {
    pub fn as_reason_tag(&self) -> String {
        match self {
            SkipReason::TooFewMessages { count, min } => format!("message_count_{count}_lt_{min}"),
            SkipReason::TooShort { count, min } => format!("total_chars_{count}_lt_{min}"),
        }
    }
}

/// Evaluates the pre-filter against a loaded thread. Returns `None` when
/// the thread clears both thresholds and should proceed to the LLM.
pub fn evaluate(tweets: &[Tweet], config: &PreFilterConfig) -> Option<SkipReason> {
    if tweets.len() < config.min_messages {
        return Some(SkipReason::TooFewMessages {
            count: tweets.len(),
            min: config.min_messages,
        });
    }
    let total_chars: usize = tweets.iter().map(|t| t.text.chars().count()).sum();
    if total_chars < config.min_total_chars {
        return Some(SkipReason::TooShort {
            count: total_chars,
            min: config.min_total_chars,
        });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn tweet(text: &str) -> Tweet {
        Tweet {
            tweet_id: "t".to_string(),
            conversation_id: "c".to_string(),
            author_id: "u".to_string(),
            text: text.to_string(),
            in_reply_to_id: None,
            inbound: Some(true),
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn config() -> PreFilterConfig {
        PreFilterConfig {
            min_messages: 2,
            min_total_chars: 40,
        }
    }

    #[test]
    fn single_message_thread_is_skipped() {
        let tweets = vec![tweet("this single message is plenty long enough on its own")];
        assert_eq!(
            evaluate(&tweets, &config()),
            Some(SkipReason::TooFewMessages { count: 1, min: 2 })
        );
        assert_eq!(
            evaluate(&tweets, &config()).unwrap().as_reason_tag(),
            "message_count_1_lt_2"
        );
    }

    #[test]
    fn short_thread_is_skipped() {
        let tweets = vec![tweet("hi"), tweet("yo")];
        assert_eq!(
            evaluate(&tweets, &config()),
            Some(SkipReason::TooShort { count: 4, min: 40 })
        );
        assert_eq!(
            evaluate(&tweets, &config()).unwrap().as_reason_tag(),
            "total_chars_4_lt_40"
        );
    }

    #[test]
    fn thread_clearing_both_thresholds_proceeds() {
        let tweets = vec![
            tweet("a message with enough content to matter"),
            tweet("a reply that also carries real content"),
        ];
        assert_eq!(evaluate(&tweets, &config()), None);
    }

    #[test]
    fn threshold_is_inclusive_at_the_boundary() {
        let config = PreFilterConfig {
            min_messages: 1,
            min_total_chars: 5,
        };
        let tweets = vec![tweet("12345")];
        assert_eq!(evaluate(&tweets, &config), None);
    }
}
