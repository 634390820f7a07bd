//! Shared application state for the insights API server.

use std::sync::atomic::AtomicU64;
use std::sync::Arc;
use std::time::Instant;

use insights_core::admission::Admission;
use insights_core::queue::QueueHandle;
use insights_core::storage::DbPool;

/// State shared by every route handler. Holds the single admission
/// entry point, a queue handle for depth/backpressure queries, and the
/// bits needed to estimate queue drain time for `Retry-After`.
pub struct AppState {
    pub pool: DbPool,
    pub queue: QueueHandle,
    pub admission: Admission,
    /// Conversations the analyzer has finished processing since boot,
    /// shared with the analyzer task.
    pub analyzed_count: Arc<AtomicU64>,
    pub started_at: Instant,
    pub process_id: u32,
}

impl AppState {
    /// Estimates seconds until the queue drains at the analyzer's observed
    /// throughput, clamped to a positive integer. Falls back
    /// to a conservative 1-request/sec estimate before any work has
    /// completed, so an empty-but-just-started service doesn't divide by
    /// zero into an unbounded wait.
    pub fn estimated_drain_seconds(&self) -> u64 {
        let elapsed = self.started_at.elapsed().as_secs_f64().max(1.0);
        let completed = self
            .analyzed_count
            .load(std::sync::atomic::Ordering::Relaxed) as f64;
        let throughput = (completed / elapsed).max(1.0 / 60.0);
        let depth = self.queue.depth() as f64;
        ((depth / throughput).ceil() as u64).max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use insights_core::admission::Admission;
    use insights_core::queue;
    use insights_core::storage::init_test_db;

    async fn test_state(queue_capacity: usize) -> AppState {
        let pool = init_test_db().await.expect("init db");
        let (handle, _consumer) = queue::channel(queue_capacity);
        AppState {
            admission: Admission::new(pool.clone(), handle.clone()),
            pool,
            queue: handle,
            analyzed_count: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
            process_id: 1,
        }
    }

    #[tokio::test]
    async fn drain_estimate_is_at_least_one_second_with_no_throughput_yet() {
        let state = test_state(10).await;
        assert_eq!(state.estimated_drain_seconds(), 1);
    }

    #[tokio::test]
    async fn drain_estimate_grows_with_queue_depth() {
        let state = test_state(10).await;
        for i in 0..5 {
            state.queue.offer(format!("c{i}")).expect("offer");
        }
        // With zero observed completions the estimate falls back to a
        // conservative 1/60 req/sec throughput floor, so a nonempty queue
        // must report a longer drain than an empty one.
        let empty_state = test_state(10).await;
        assert!(state.estimated_drain_seconds() > empty_state.estimated_drain_seconds());
    }
}
