//! `GET /health`: a thin liveness/readiness probe. Not queued through
//! admission; exempt from auth/CORS concerns since there are none in
//! this service.

use std::sync::Arc;

use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    queue_depth: usize,
    queue_capacity: usize,
    process_id: u32,
    uptime_seconds: u64,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        queue_depth: state.queue.depth(),
        queue_capacity: state.queue.capacity(),
        process_id: state.process_id,
        uptime_seconds: state.started_at.elapsed().as_secs(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use insights_core::admission::Admission;
    use insights_core::queue;
    use insights_core::storage::init_test_db;
    use std::sync::atomic::AtomicU64;
    use std::time::Instant;
    use tower::ServiceExt;

    async fn test_state() -> Arc<AppState> {
        let pool = init_test_db().await.expect("init db");
        let (handle, _consumer) = queue::channel(7);
        Arc::new(AppState {
            admission: Admission::new(pool.clone(), handle.clone()),
            pool,
            queue: handle,
            analyzed_count: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
            process_id: 42,
        })
    }

    #[tokio::test]
    async fn health_reports_queue_capacity_and_process_id() {
        let router = build_router(test_state().await);
        let response = router
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let parsed: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert_eq!(parsed["queue_capacity"], 7);
        assert_eq!(parsed["queue_depth"], 0);
        assert_eq!(parsed["process_id"], 42);
    }
}
