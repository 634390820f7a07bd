//! `GET /api/v1/insights`: paginated, filterable listing of derived
//! insights.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use insights_core::model::{Insight, InsightFilter, Sentiment};
use insights_core::storage::insights as insights_store;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_LIMIT: i64 = 20;
const MAX_LIMIT: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct ListInsightsQuery {
    sentiment: Option<String>,
    topic: Option<String>,
    created_after: Option<DateTime<Utc>>,
    created_before: Option<DateTime<Utc>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn list_insights(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListInsightsQuery>,
) -> Result<Json<Vec<Insight>>, ApiError> {
    let sentiment = query
        .sentiment
        .map(|raw| match Sentiment::normalize(&raw) {
            // An explicitly unrecognized sentiment filter is almost
            // certainly a client typo, not a deliberate match against the
            // `unknown` bucket — reject rather than silently filter wrong.
            Sentiment::Unknown if !raw.eq_ignore_ascii_case("unknown") => {
                Err(ApiError::BadRequest(format!("unrecognized sentiment '{raw}'")))
            }
            normalized => Ok(normalized),
        })
        .transpose()?;

    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    let offset = query.offset.unwrap_or(0).max(0);

    let filter = InsightFilter {
        sentiment,
        topic: query.topic,
        created_after: query.created_after,
        created_before: query.created_before,
    };

    let results = insights_store::list_insights(&state.pool, &filter, limit, offset).await?;
    Ok(Json(results))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::TimeZone;
    use http_body_util::BodyExt;
    use insights_core::admission::Admission;
    use insights_core::queue;
    use insights_core::storage::init_test_db;
    use std::sync::atomic::AtomicU64;
    use std::sync::Arc;
    use std::time::Instant;
    use tower::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        let pool = init_test_db().await.expect("init db");
        let (handle, _consumer) = queue::channel(10);
        let t0 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        insights_store::put_insight(
            &pool,
            &Insight {
                conversation_id: "c1".to_string(),
                llm_output: Some(serde_json::json!({"summary": "ok"})),
                sentiment: Sentiment::Positive,
                topics: vec!["pricing".to_string()],
                gaps: Vec::new(),
                token_usage: 42,
                cost_estimate: 0.01,
                skipped_reason: None,
                created_at: t0,
            },
        )
        .await
        .expect("seed insight");
        Arc::new(AppState {
            admission: Admission::new(pool.clone(), handle.clone()),
            pool,
            queue: handle,
            analyzed_count: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
            process_id: 1,
        })
    }

    #[tokio::test]
    async fn list_insights_returns_seeded_row() {
        let router = build_router(test_state().await);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/insights")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0]["conversation_id"], "c1");
    }

    #[tokio::test]
    async fn list_insights_rejects_unrecognized_sentiment() {
        let router = build_router(test_state().await);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/insights?sentiment=ecstatic")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_insights_accepts_unknown_sentiment_literal() {
        let router = build_router(test_state().await);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/insights?sentiment=unknown")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: Vec<serde_json::Value> = serde_json::from_slice(&body).unwrap();
        assert!(parsed.is_empty(), "seeded row is positive, not unknown");
    }

    #[tokio::test]
    async fn list_insights_clamps_limit_above_max() {
        let router = build_router(test_state().await);
        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/v1/insights?limit=10000")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
