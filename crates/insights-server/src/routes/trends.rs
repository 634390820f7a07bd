//! `GET /api/v1/trends`: windowed sentiment/topic/gap aggregation
//!.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use insights_core::model::{TrendAggregate, TrendWindow};
use insights_core::storage::insights as insights_store;
use serde::Deserialize;

use crate::error::ApiError;
use crate::state::AppState;

const DEFAULT_TOP_K: usize = 20;
const MAX_TOP_K: usize = 20;

#[derive(Debug, Deserialize)]
pub struct TrendsQuery {
    window: Option<String>,
    top_k: Option<usize>,
}

pub async fn trends(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrendsQuery>,
) -> Result<Json<TrendAggregate>, ApiError> {
    let window = query.window.as_deref().unwrap_or("7d");
    let window = TrendWindow::parse(window)
        .ok_or_else(|| ApiError::BadRequest(format!("unrecognized trend window '{window}'")))?;

    let top_k = query.top_k.unwrap_or(DEFAULT_TOP_K).clamp(1, MAX_TOP_K);
    let since = chrono::Utc::now() - window.duration();

    let aggregate = insights_store::trends(&state.pool, since, top_k).await?;
    Ok(Json(aggregate))
}
