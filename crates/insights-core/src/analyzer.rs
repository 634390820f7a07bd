//! The analyzer loop (C9): the background task that turns a queued
//! `conversation_id` into a persisted [`crate::model::Insight`].
//!
//! Per item: dequeue, load the thread, pre-filter, consult the
//! content cache, and — only if none of those short-circuit — acquire a
//! rate-limiter slot and call the LLM behind the circuit breaker. Every
//! path through the loop ends in exactly one `put_insight` or leaves the
//! conversation pending (breaker open), and no error escapes the loop —
//! this is the top-level error boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::breaker::CircuitBreaker;
use crate::hashing;
use crate::llm::analyze::{self, RetryPolicy};
use crate::llm::LlmProvider;
use crate::metrics::METRICS;
use crate::model::Insight;
use crate::prefilter::{self, PreFilterConfig};
use crate::queue::{QueueConsumer, QueueHandle};
use crate::ratelimit::RateLimiter;
use crate::storage::{cache, insights, threads, DbPool};

/// Number of conversations re-offered per recovery/sweep pass, bounding
/// the burst of re-enqueues against `MAX_QUEUE_DEPTH`.
const RECOVERY_BATCH_SIZE: i64 = 100;

/// Everything the analyzer needs to run one dequeue-to-persist cycle.
pub struct Analyzer<P: LlmProvider> {
    pool: DbPool,
    prefilter_config: PreFilterConfig,
    breaker: Arc<CircuitBreaker>,
    rate_limiter: Arc<RateLimiter>,
    llm: Arc<P>,
    retry_policy: RetryPolicy,
    model_for_pricing: String,
    /// Total conversations the loop has finished processing (any outcome),
    /// shared with the admission layer to estimate queue drain time for
    /// `Retry-After`.
    pub completed: Arc<AtomicU64>,
}

impl<P: LlmProvider> Analyzer<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: DbPool,
        prefilter_config: PreFilterConfig,
        breaker: Arc<CircuitBreaker>,
        rate_limiter: Arc<RateLimiter>,
        llm: Arc<P>,
        retry_policy: RetryPolicy,
        model_for_pricing: String,
    ) -> Self {
        Self {
            pool,
            prefilter_config,
            breaker,
            rate_limiter,
            llm,
            retry_policy,
            model_for_pricing,
            completed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Runs the main loop: takes items until the queue closes and the
    /// shutdown `cancel` token fires, draining whatever remains up to
    /// `drain_deadline`.
    pub async fn run(
        &self,
        mut queue: QueueConsumer,
        cancel: CancellationToken,
        drain_deadline: Duration,
    ) {
        loop {
            let next = queue.take_or_cancelled(&cancel).await;
            METRICS.queue_depth.set(queue.depth() as i64);
            match next {
                Some(conversation_id) => {
                    self.process_one(&conversation_id).await;
                }
                None => break,
            }
        }

        if cancel.is_cancelled() {
            let drain = async {
                loop {
                    let remaining = queue.drain_available();
                    if remaining.is_empty() {
                        break;
                    }
                    for id in remaining {
                        self.process_one(&id).await;
                    }
                }
            };
            let _ = tokio::time::timeout(drain_deadline, drain).await;
        }
    }

    /// Processes a single dequeued conversation id end to end.
    /// Never panics or propagates an error out to the caller — every
    /// branch either writes an insight or leaves the conversation
    /// pending for a later sweep.
    pub async fn process_one(&self, conversation_id: &str) {
        self.completed.fetch_add(1, Ordering::Relaxed);
        let thread = match threads::load_thread(&self.pool, conversation_id).await {
            Ok(thread) => thread,
            Err(err) => {
                tracing::error!(conversation_id, error = %err, "failed to load thread, skipping item");
                return;
            }
        };

        if thread.is_empty() {
            tracing::debug!(conversation_id, "empty thread, recording skip");
            self.record_skip(conversation_id, "empty_thread").await;
            return;
        }

        if let Some(reason) = prefilter::evaluate(&thread, &self.prefilter_config) {
            let tag = reason.as_reason_tag();
            tracing::debug!(conversation_id, reason = %tag, "pre-filter skip");
            METRICS
                .prefilter_skips_total
                .with_label_values(&[&tag])
                .inc();
            self.record_skip(conversation_id, &tag).await;
            return;
        }

        let thread_hash = hashing::thread_hash(&thread);

        match cache::cache_get(&self.pool, &thread_hash).await {
            Ok(Some(source_conversation_id)) => {
                METRICS
                    .cache_lookups_total
                    .with_label_values(&["hit"])
                    .inc();
                self.copy_cached_insight(conversation_id, &source_conversation_id, &thread_hash)
                    .await;
                return;
            }
            Ok(None) => {
                METRICS
                    .cache_lookups_total
                    .with_label_values(&["miss"])
                    .inc();
            }
            Err(err) => {
                tracing::error!(conversation_id, error = %err, "cache lookup failed, proceeding without it");
            }
        }

        let cancel = CancellationToken::new();
        if self.rate_limiter.acquire(&cancel).await.is_err() {
            tracing::warn!(conversation_id, "rate limiter acquire cancelled, leaving pending");
            return;
        }

        if self.breaker.check().is_err() {
            tracing::warn!(conversation_id, "circuit breaker open, leaving conversation pending");
            METRICS.set_circuit_state(self.breaker.state_label());
            return;
        }

        let rendered = hashing::canonical_render(&thread);
        let outcome = analyze::analyze_thread(
            self.llm.as_ref(),
            &rendered,
            &self.model_for_pricing,
            &self.retry_policy,
        )
        .await;

        METRICS.set_circuit_state(self.breaker.state_label());

        match outcome {
            Ok(outcome) => {
                self.breaker.record_success();
                METRICS.set_circuit_state(self.breaker.state_label());
                METRICS
                    .llm_requests_total
                    .with_label_values(&["success"])
                    .inc();
                self.rate_limiter.record_usage(outcome.usage.total());

                let insight = Insight {
                    conversation_id: conversation_id.to_string(),
                    llm_output: Some(outcome.raw),
                    sentiment: outcome.sentiment,
                    topics: outcome.topics,
                    gaps: outcome.gaps,
                    token_usage: outcome.usage.total(),
                    cost_estimate: outcome.cost_estimate,
                    skipped_reason: None,
                    created_at: chrono::Utc::now(),
                };

                if let Err(err) = insights::put_insight(&self.pool, &insight).await {
                    tracing::error!(conversation_id, error = %err, "failed to persist insight");
                    return;
                }
                if let Err(err) = cache::cache_put(&self.pool, &thread_hash, conversation_id).await {
                    tracing::error!(conversation_id, error = %err, "failed to record cache entry");
                }
            }
            Err(err) => {
                self.breaker.record_failure();
                METRICS.set_circuit_state(self.breaker.state_label());
                METRICS
                    .llm_requests_total
                    .with_label_values(&[err.class_tag()])
                    .inc();
                tracing::warn!(conversation_id, error = %err, "LLM analysis failed");
                self.record_skip(conversation_id, &format!("llm_error:{}", err.class_tag()))
                    .await;
            }
        }
    }

    /// Copies a cache-hit conversation's prior insight fields onto a new
    /// row for `conversation_id`: same extracted fields and
    /// `llm_output`, no additional LLM call.
    async fn copy_cached_insight(
        &self,
        conversation_id: &str,
        source_conversation_id: &str,
        thread_hash: &str,
    ) {
        match insights::get_insight(&self.pool, source_conversation_id).await {
            Ok(Some(mut source_insight)) => {
                source_insight.conversation_id = conversation_id.to_string();
                source_insight.created_at = chrono::Utc::now();
                if let Err(err) = insights::put_insight(&self.pool, &source_insight).await {
                    tracing::error!(conversation_id, error = %err, "failed to persist cached insight copy");
                    return;
                }
                if let Err(err) = cache::cache_put(&self.pool, thread_hash, conversation_id).await {
                    tracing::error!(conversation_id, error = %err, "failed to refresh cache entry");
                }
            }
            Ok(None) => {
                tracing::warn!(
                    conversation_id,
                    source_conversation_id,
                    "cache pointed at a conversation with no insight; treating as a miss"
                );
            }
            Err(err) => {
                tracing::error!(conversation_id, error = %err, "failed to load cached insight");
            }
        }
    }

    async fn record_skip(&self, conversation_id: &str, reason: &str) {
        let insight = Insight::skipped(conversation_id, reason);
        if let Err(err) = insights::put_insight(&self.pool, &insight).await {
            tracing::error!(conversation_id, error = %err, "failed to persist skipped insight");
        }
    }

    /// Boot-time recovery scan: re-offers every conversation lacking an
    /// insight row so a crash between commit and analysis heals without
    /// operator intervention. Best-effort — an item dropped by a full
    /// queue is picked up again by the periodic sweep.
    pub async fn recover(pool: &DbPool, queue: &QueueHandle) {
        match threads::list_conversations_missing_insight(pool, RECOVERY_BATCH_SIZE).await {
            Ok(ids) => {
                let count = ids.len();
                for id in ids {
                    let _ = queue.offer(id);
                }
                if count > 0 {
                    tracing::info!(count, "recovery scan re-offered unanalyzed conversations");
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "recovery scan failed");
            }
        }
    }

    /// Periodic sweep for conversations left pending because the breaker
    /// was open at their first attempt. Runs on
    /// `sweep_interval` until `cancel` fires.
    pub async fn run_sweeper(pool: DbPool, queue: QueueHandle, sweep_interval: Duration, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = tokio::time::sleep(sweep_interval) => {
                    Self::recover(&pool, &queue).await;
                }
            }
        }
    }
}
