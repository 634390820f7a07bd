//! Insight persistence and trend aggregation (C1, query side of §4.10).

use super::DbPool;
use crate::error::StorageError;
use crate::model::{CountedValue, Insight, InsightFilter, Sentiment, TrendAggregate};
use chrono::{DateTime, Utc};

/// Upserts an insight for a conversation. A conversation has at most one
/// insight; re-analysis (e.g. after a prompt version bump clears the cache)
/// replaces the prior row rather than appending.
pub async fn put_insight(pool: &DbPool, insight: &Insight) -> Result<(), StorageError> {
    let llm_output = insight
        .llm_output
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StorageError::Query {
            source: sqlx::Error::Encode(Box::new(e)),
        })?;
    let topics = serde_json::to_string(&insight.topics).expect("string vec always serializes");
    let gaps = serde_json::to_string(&insight.gaps).expect("string vec always serializes");

    sqlx::query(
        "INSERT INTO insights \
         (conversation_id, llm_output, sentiment, topics, gaps, token_usage, cost_estimate, skipped_reason, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(conversation_id) DO UPDATE SET \
         llm_output = excluded.llm_output, \
         sentiment = excluded.sentiment, \
         topics = excluded.topics, \
         gaps = excluded.gaps, \
         token_usage = excluded.token_usage, \
         cost_estimate = excluded.cost_estimate, \
         skipped_reason = excluded.skipped_reason, \
         created_at = excluded.created_at",
    )
    .bind(&insight.conversation_id)
    .bind(&llm_output)
    .bind(insight.sentiment.as_str())
    .bind(&topics)
    .bind(&gaps)
    .bind(insight.token_usage as i64)
    .bind(insight.cost_estimate)
    .bind(&insight.skipped_reason)
    .bind(insight.created_at)
    .execute(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(())
}

#[derive(sqlx::FromRow)]
struct InsightRow {
    conversation_id: String,
    llm_output: Option<String>,
    sentiment: String,
    topics: String,
    gaps: String,
    token_usage: i64,
    cost_estimate: f64,
    skipped_reason: Option<String>,
    created_at: DateTime<Utc>,
}

impl InsightRow {
    fn into_insight(self) -> Insight {
        Insight {
            conversation_id: self.conversation_id,
            llm_output: self
                .llm_output
                .and_then(|s| serde_json::from_str(&s).ok()),
            sentiment: Sentiment::normalize(&self.sentiment),
            topics: serde_json::from_str(&self.topics).unwrap_or_default(),
            gaps: serde_json::from_str(&self.gaps).unwrap_or_default(),
            token_usage: self.token_usage.max(0) as u64,
            cost_estimate: self.cost_estimate,
            skipped_reason: self.skipped_reason,
            created_at: self.created_at,
        }
    }
}

/// Fetches a single conversation's insight row, if one exists. Used by the
/// analyzer to copy a cache-hit conversation's prior analysis fields onto
/// a new conversation.
pub async fn get_insight(
    pool: &DbPool,
    conversation_id: &str,
) -> Result<Option<Insight>, StorageError> {
    let row = sqlx::query_as::<_, InsightRow>(
        "SELECT conversation_id, llm_output, sentiment, topics, gaps, token_usage, \
         cost_estimate, skipped_reason, created_at FROM insights WHERE conversation_id = ?",
    )
    .bind(conversation_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?;

    Ok(row.map(InsightRow::into_insight))
}

/// Lists insights matching `filter`, newest first, with `conversation_id`
/// as a stable tiebreak so pagination is deterministic across identical
/// `created_at` values.
pub async fn list_insights(
    pool: &DbPool,
    filter: &InsightFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<Insight>, StorageError> {
    let mut query = String::from(
        "SELECT conversation_id, llm_output, sentiment, topics, gaps, token_usage, \
         cost_estimate, skipped_reason, created_at FROM insights WHERE 1 = 1",
    );
    if filter.sentiment.is_some() {
        query.push_str(" AND sentiment = ?");
    }
    if filter.topic.is_some() {
        query.push_str(" AND EXISTS (SELECT 1 FROM json_each(insights.topics) WHERE json_each.value = ?)");
    }
    if filter.created_after.is_some() {
        query.push_str(" AND created_at >= ?");
    }
    if filter.created_before.is_some() {
        query.push_str(" AND created_at <= ?");
    }
    query.push_str(" ORDER BY created_at DESC, conversation_id DESC LIMIT ? OFFSET ?");

    let mut q = sqlx::query_as::<_, InsightRow>(&query);
    if let Some(sentiment) = filter.sentiment {
        q = q.bind(sentiment.as_str());
    }
    if let Some(topic) = &filter.topic {
        q = q.bind(topic);
    }
    if let Some(after) = filter.created_after {
        q = q.bind(after);
    }
    if let Some(before) = filter.created_before {
        q = q.bind(before);
    }
    q = q.bind(limit).bind(offset);

    let rows = q
        .fetch_all(pool)
        .await
        .map_err(|e| StorageError::Query { source: e })?;

    Ok(rows.into_iter().map(InsightRow::into_insight).collect())
}

/// Computes the windowed trend aggregate for `/api/v1/trends`:
/// conversation volume, sentiment distribution, and the top-K most frequent
/// topics and gaps, with ties broken lexicographically by value.
pub async fn trends(
    pool: &DbPool,
    since: DateTime<Utc>,
    top_k: usize,
) -> Result<TrendAggregate, StorageError> {
    let rows = sqlx::query_as::<_, InsightRow>(
        "SELECT conversation_id, llm_output, sentiment, topics, gaps, token_usage, \
         cost_estimate, skipped_reason, created_at FROM insights WHERE created_at >= ?",
    )
    .bind(since)
    .fetch_all(pool)
    .await
    .map_err(|e| StorageError::Query { source: e })?
    .into_iter()
    .map(InsightRow::into_insight)
    .collect::<Vec<_>>();

    let volume = rows.len() as u64;
    let mut sentiment_counts = std::collections::BTreeMap::new();
    let mut topic_counts: std::collections::HashMap<String, u64> = std::collections::HashMap::new();
    let mut gap_counts: std::collections::HashMap<String, u64> = std::collections::HashMap::new();

    for insight in &rows {
        *sentiment_counts
            .entry(insight.sentiment.as_str().to_string())
            .or_insert(0) += 1;
        for topic in &insight.topics {
            *topic_counts.entry(topic.clone()).or_insert(0) += 1;
        }
        for gap in &insight.gaps {
            *gap_counts.entry(gap.clone()).or_insert(0) += 1;
        }
    }

    Ok(TrendAggregate {
        volume,
        sentiment_counts,
        top_topics: top_k_counted(topic_counts, top_k),
        top_gaps: top_k_counted(gap_counts, top_k),
    })
}

fn top_k_counted(counts: std::collections::HashMap<String, u64>, k: usize) -> Vec<CountedValue> {
    let mut values: Vec<CountedValue> = counts
        .into_iter()
        .map(|(value, count)| CountedValue { count, value })
        .collect();
    values.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
    values.truncate(k);
    values
}
