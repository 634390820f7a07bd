//! Admission controller (C3): the single/bulk/streaming entry points that
//! validate incoming conversations, commit them to the thread store, and
//! enqueue their resolved conversation IDs for analysis.
//!
//! Commit-before-enqueue: a batch is always persisted durably
//! before any of its conversations are offered to the work queue, so a
//! crash between commit and enqueue only ever loses queue position, never
//! data — the analyzer's recovery scan (C9) picks up conversations that
//! reached storage but never made it onto the queue.

use crate::error::{AdmissionError, ValidationError};
use crate::metrics::METRICS;
use crate::model::{IngestConversation, IngestTweet};
use crate::queue::QueueHandle;
use crate::storage::threads;
use crate::storage::DbPool;

/// Minimum number of conversations accepted by `submit_batch`.
pub const MIN_BATCH_SIZE: usize = 1;
/// Maximum number of conversations accepted by `submit_batch` in one request.
pub const MAX_BATCH_SIZE: usize = 500;

/// Per-conversation outcome of an admission call.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AdmissionResult {
    pub conversation_id: String,
    /// True if this conversation did not previously exist.
    pub created: bool,
    /// True if the conversation was successfully handed to the work queue.
    /// False means the conversation is durably stored but deferred —
    /// the sweeper (C9) will pick it up on its next pass.
    pub enqueued: bool,
    /// Set when `enqueued` is false, naming why (e.g. `"queue_full"`).
    pub backpressure_reason: Option<String>,
}

pub struct Admission {
    pool: DbPool,
    queue: QueueHandle,
}

impl Admission {
    pub fn new(pool: DbPool, queue: QueueHandle) -> Self {
        Self { pool, queue }
    }

    /// Submits a single conversation (one bundle of messages). Equivalent
    /// to `submit_batch` with one item, but not subject to the bulk size
    /// range.
    pub async fn submit_one(
        &self,
        messages: Vec<IngestTweet>,
    ) -> Result<AdmissionResult, AdmissionError> {
        let bundle = validate_conversation(messages)?;
        let results = self.commit_and_enqueue(vec![bundle]).await?;
        Ok(results.into_iter().next().expect("one bundle in, one result out"))
    }

    /// Validates, commits, and enqueues a batch of conversations.
    ///
    /// Validation rejects the whole batch (no partial commits) if the
    /// size is out of range or any conversation is malformed. Once
    /// committed, per-conversation enqueue failures are reported as flags
    /// on the result rather than failing the request — the data is
    /// already safe.
    pub async fn submit_batch(
        &self,
        conversations: Vec<Vec<IngestTweet>>,
    ) -> Result<Vec<AdmissionResult>, AdmissionError> {
        if conversations.len() < MIN_BATCH_SIZE || conversations.len() > MAX_BATCH_SIZE {
            return Err(ValidationError::BatchSizeOutOfRange {
                size: conversations.len(),
                min: MIN_BATCH_SIZE,
                max: MAX_BATCH_SIZE,
            }
            .into());
        }

        let bundles = conversations
            .into_iter()
            .map(validate_conversation)
            .collect::<Result<Vec<_>, _>>()?;

        self.commit_and_enqueue(bundles).await
    }

    async fn commit_and_enqueue(
        &self,
        bundles: Vec<IngestConversation>,
    ) -> Result<Vec<AdmissionResult>, AdmissionError> {
        let upserts = threads::upsert_batch(&self.pool, &bundles).await?;

        let results = upserts
            .into_iter()
            .map(|upsert| {
                let (enqueued, backpressure_reason) =
                    match self.queue.offer(upsert.conversation_id.clone()) {
                        Ok(()) => (true, None),
                        Err(crate::error::QueueError::Full { .. }) => {
                            METRICS
                                .backpressure_events_total
                                .with_label_values(&["queue_full"])
                                .inc();
                            (false, Some("queue_full".to_string()))
                        }
                        Err(crate::error::QueueError::Closed) => {
                            METRICS
                                .backpressure_events_total
                                .with_label_values(&["queue_closed"])
                                .inc();
                            (false, Some("queue_closed".to_string()))
                        }
                    };
                AdmissionResult {
                    conversation_id: upsert.conversation_id,
                    created: upsert.created,
                    enqueued,
                    backpressure_reason,
                }
            })
            .collect();

        Ok(results)
    }
}

/// Validates and normalizes one submitted conversation. Rejects empty
/// bundles and malformed messages; normalizes whitespace in
/// `text` and trims identifiers. Idempotent: normalizing an already
/// normalized conversation is a no-op.
fn validate_conversation(
    messages: Vec<IngestTweet>,
) -> Result<IngestConversation, ValidationError> {
    if messages.is_empty() {
        return Err(ValidationError::Malformed {
            message: "conversation must contain at least one message".to_string(),
        });
    }
    let messages = messages
        .into_iter()
        .map(|m| validate_message(m.normalize()))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(IngestConversation { messages })
}

fn validate_message(message: IngestTweet) -> Result<IngestTweet, ValidationError> {
    if message.tweet_id.is_empty() {
        return Err(ValidationError::Malformed {
            message: "tweet_id must not be empty".to_string(),
        });
    }
    if message.author_id.is_empty() {
        return Err(ValidationError::Malformed {
            message: "author_id must not be empty".to_string(),
        });
    }
    if message.text.is_empty() {
        return Err(ValidationError::Malformed {
            message: "text must not be empty".to_string(),
        });
    }
    Ok(message)
}
