//! Analysis result cache (C5).
//!
//! Keyed by `thread_hash`, a content hash of a conversation's canonical
//! rendering (see [`crate::hashing`]). A cache hit means a conversation
//! with identical content has already been analyzed, so the analyzer can
//! reuse that prior `conversation_id`'s insight instead of calling the LLM
//! again.

use super::DbPool;
use crate::error::StorageError;

/// Looks up the `conversation_id` previously analyzed under `thread_hash`,
/// if any.
pub async fn cache_get(pool: &DbPool, thread_hash: &str) -> Result<Option<String>, StorageError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT conversation_id FROM analysis_cache WHERE thread_hash = ?")
            .bind(thread_hash)
            .fetch_optional(pool)
            .await
            .map_err(|e| StorageError::Query { source: e })?;

    Ok(row.map(|r| r.0))
}

/// Records that `conversation_id` was analyzed with content hash
/// `thread_hash`. Idempotent: re-inserting the same hash for the same
/// conversation is a no-op; a hash collision with a different
/// conversation overwrites the mapping to the most recently analyzed one.
pub async fn cache_put(
    pool: &DbPool,
    thread_hash: &str,
    conversation_id: &str,
) -> Result<(), StorageError> {
    sqlx::query(
        "INSERT INTO analysis_cache (thread_hash, conversation_id) VALUES (?, ?) \
         ON CONFLICT(thread_hash) DO UPDATE SET conversation_id = excluded.conversation_id",
    )
    .bind(thread_hash)
    .bind(conversation_id)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::init_test_db;

    #[tokio::test]
    async fn cache_miss_returns_none() {
        let pool = init_test_db().await.expect("init db");
        let result = cache_get(&pool, "deadbeef").await.expect("get");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn cache_put_then_get_hits() {
        let pool = init_test_db().await.expect("init db");
        cache_put(&pool, "deadbeef", "c1").await.expect("put");
        let result = cache_get(&pool, "deadbeef").await.expect("get");
        assert_eq!(result, Some("c1".to_string()));
    }

    #[tokio::test]
    async fn cache_put_overwrites_mapping() {
        let pool = init_test_db().await.expect("init db");
        cache_put(&pool, "deadbeef", "c1").await.expect("put");
        cache_put(&pool, "deadbeef", "c2").await.expect("put again");
        let result = cache_get(&pool, "deadbeef").await.expect("get");
        assert_eq!(result, Some("c2".to_string()));
    }
}
