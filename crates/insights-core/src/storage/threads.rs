//! Conversation and tweet persistence (C1: Thread store).
//!
//! `upsert_batch` is the single write path tweets enter the store through.
//! It resolves each submitted bundle of messages to a `conversation_id`:
//! a message whose `in_reply_to_id` resolves to an already-persisted
//! tweet joins that tweet's conversation; failing that, a message whose
//! `tweet_id` equals an existing conversation's `root_tweet_id` rejoins
//! it; otherwise a fresh conversation is allocated with its root set to
//! the bundle's earliest parentless message. Upserts are idempotent by
//! `tweet_id`. Admission commits through this module and waits for the
//! transaction to land before handing the conversation to the work queue,
//! so a crash between commit and enqueue can never lose already-durable
//! work.

use super::DbPool;
use crate::error::StorageError;
use crate::model::{Conversation, IngestConversation, Tweet, UpsertResult};
use chrono::Utc;

/// Upserts a batch of client-submitted conversation bundles in a single
/// transaction.
///
/// For each bundle, in order:
/// 1. If any message's `in_reply_to_id` matches a persisted tweet, the
///    bundle joins that tweet's conversation.
/// 2. Else if any message's `tweet_id` matches the `root_tweet_id` of a
///    persisted conversation, the bundle rejoins it.
/// 3. Else a new `conversation_id` is allocated, with `root_tweet_id` set
///    to the earliest message (by `created_at`, ties broken by
///    `tweet_id`) lacking `in_reply_to_id` — or, if every message in the
///    bundle has a parent (an adversarial or partial submission), the
///    earliest message overall. Ordering by `created_at` is sufficient
///    here; detecting cycles in the reply graph is not required.
///
/// Every message is then upserted by `tweet_id` (conflict updates in
/// place, so resubmission is a no-op beyond refreshed fields) and the
/// conversation's `updated_at` is advanced to now.
///
/// Returns one `UpsertResult` per input bundle, in order, `created` true
/// only when a new `conversation_id` was allocated.
pub async fn upsert_batch(
    pool: &DbPool,
    bundles: &[IngestConversation],
) -> Result<Vec<UpsertResult>, StorageError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| StorageError::Unavailable { source: e })?;

    let mut results = Vec::with_capacity(bundles.len());

    for bundle in bundles {
        if bundle.messages.is_empty() {
            continue;
        }
        let now = Utc::now();

        let resolved = resolve_conversation_id(&mut tx, bundle).await?;
        let conversation_id = resolved.conversation_id;
        let created = resolved.created;

        if created {
            sqlx::query(
                "INSERT INTO conversations (conversation_id, root_tweet_id, created_at, updated_at) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(&conversation_id)
            .bind(&resolved.root_tweet_id)
            .bind(now)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Query { source: e })?;
        } else {
            sqlx::query("UPDATE conversations SET updated_at = ? WHERE conversation_id = ?")
                .bind(now)
                .bind(&conversation_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| StorageError::Query { source: e })?;
        }

        for message in &bundle.messages {
            sqlx::query(
                "INSERT INTO tweets \
                 (tweet_id, conversation_id, author_id, text, in_reply_to_id, inbound, created_at) \
                 VALUES (?, ?, ?, ?, ?, ?, ?) \
                 ON CONFLICT(tweet_id) DO UPDATE SET \
                 author_id = excluded.author_id, \
                 text = excluded.text, \
                 in_reply_to_id = excluded.in_reply_to_id, \
                 inbound = excluded.inbound, \
                 created_at = excluded.created_at",
            )
            .bind(&message.tweet_id)
            .bind(&conversation_id)
            .bind(&message.author_id)
            .bind(&message.text)
            .bind(&message.in_reply_to_id)
            .bind(message.inbound)
            .bind(message.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| StorageError::Query { source: e })?;
        }

        results.push(UpsertResult {
            conversation_id,
            created,
        });
    }

    tx.commit()
        .await
        .map_err(|e| StorageError::Unavailable { source: e })?;

    Ok(results)
}

struct Resolution {
    conversation_id: String,
    created: bool,
    /// Only meaningful when `created` is true.
    root_tweet_id: String,
}

async fn resolve_conversation_id(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    bundle: &IngestConversation,
) -> Result<Resolution, StorageError> {
    for message in &bundle.messages {
        let Some(parent_id) = &message.in_reply_to_id else {
            continue;
        };
        let parent: Option<(String,)> =
            sqlx::query_as("SELECT conversation_id FROM tweets WHERE tweet_id = ?")
                .bind(parent_id)
                .fetch_optional(&mut **tx)
                .await
                .map_err(|e| StorageError::Query { source: e })?;
        if let Some((conversation_id,)) = parent {
            return Ok(Resolution {
                conversation_id,
                created: false,
                root_tweet_id: String::new(),
            });
        }
    }

    for message in &bundle.messages {
        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT conversation_id FROM conversations WHERE root_tweet_id = ?",
        )
        .bind(&message.tweet_id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| StorageError::Query { source: e })?;
        if let Some((conversation_id,)) = existing {
            return Ok(Resolution {
                conversation_id,
                created: false,
                root_tweet_id: String::new(),
            });
        }
    }

    let root = bundle
        .messages
        .iter()
        .filter(|m| m.in_reply_to_id.is_none())
        .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.tweet_id.cmp(&b.tweet_id)))
        .or_else(|| {
            bundle
                .messages
                .iter()
                .min_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.tweet_id.cmp(&b.tweet_id)))
        })
        .expect("bundle is non-empty");

    Ok(Resolution {
        conversation_id: uuid::Uuid::new_v4().to_string(),
        created: true,
        root_tweet_id: root.tweet_id.clone(),
    })
}

/// Loads a conversation's tweets, ordered by `created_at` then `tweet_id`
/// to give a stable order even when timestamps collide.
pub async fn load_thread(pool: &DbPool, conversation_id: &str) -> Result<Vec<Tweet>, StorageError> {
    sqlx::query_as::<_, Tweet>(
        "SELECT tweet_id, conversation_id, author_id, text, in_reply_to_id, inbound, created_at \
         FROM tweets WHERE conversation_id = ? ORDER BY created_at ASC, tweet_id ASC",
    )
    .bind(conversation_id)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Fetches a conversation's metadata row.
pub async fn get_conversation(
    pool: &DbPool,
    conversation_id: &str,
) -> Result<Option<Conversation>, StorageError> {
    sqlx::query_as::<_, Conversation>(
        "SELECT conversation_id, root_tweet_id, created_at, updated_at \
         FROM conversations WHERE conversation_id = ?",
    )
    .bind(conversation_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })
}

/// Lists conversation IDs lacking an insight row, used by the analyzer's
/// boot-time recovery scan and periodic sweeper to find work that
/// survived a crash.
pub async fn list_conversations_missing_insight(
    pool: &DbPool,
    limit: i64,
) -> Result<Vec<String>, StorageError> {
    let rows: Vec<(String,)> = sqlx::query_as(
        "SELECT c.conversation_id FROM conversations c \
         LEFT JOIN insights i ON i.conversation_id = c.conversation_id \
         WHERE i.conversation_id IS NULL \
         ORDER BY c.created_at ASC LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(rows.into_iter().map(|r| r.0).collect())
}
