//! Conversation insights API server binary.
//!
//! Boots storage, the work queue, and the single analyzer task, then
//! serves the HTTP API until SIGINT/SIGTERM, draining the queue for up to
//! `SHUTDOWN_GRACE_SECONDS` before exiting.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use insights_core::admission::Admission;
use insights_core::analyzer::Analyzer;
use insights_core::breaker::CircuitBreaker;
use insights_core::config::Config;
use insights_core::llm::analyze::RetryPolicy;
use insights_core::llm::openai_compat::OpenAiCompatProvider;
use insights_core::prefilter::PreFilterConfig;
use insights_core::queue;
use insights_core::ratelimit::RateLimiter;
use insights_core::storage;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use insights_server::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::load()?;

    tracing::info!(
        database_url = %config.database_url,
        llm_model = %config.llm_model,
        max_queue_depth = config.max_queue_depth,
        "starting conversation insights server"
    );

    let pool = storage::init_db(&config.database_url).await?;

    let (queue_handle, queue_consumer) = queue::channel(config.max_queue_depth);

    Analyzer::<OpenAiCompatProvider>::recover(&pool, &queue_handle).await;

    let breaker = Arc::new(CircuitBreaker::new(
        config.circuit_failure_threshold,
        Duration::from_secs(config.circuit_cooldown_seconds),
    ));
    let rate_limiter = Arc::new(RateLimiter::new(config.llm_rpm, config.llm_tpm));
    let llm = Arc::new(OpenAiCompatProvider::new(
        config.llm_base_url.clone(),
        config.llm_api_key.clone(),
        config.llm_model.clone(),
    ));

    let analyzer = Arc::new(Analyzer::new(
        pool.clone(),
        PreFilterConfig {
            min_messages: config.pre_filter_min_messages,
            min_total_chars: config.pre_filter_min_total_chars,
        },
        breaker,
        rate_limiter,
        llm,
        RetryPolicy::default(),
        config.llm_model.clone(),
    ));

    let shutdown = CancellationToken::new();
    let drain_deadline = Duration::from_secs(config.shutdown_grace_seconds);

    let analyzer_task = {
        let analyzer = analyzer.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            analyzer.run(queue_consumer, shutdown, drain_deadline).await;
        })
    };

    let sweeper_task = {
        let pool = pool.clone();
        let queue_handle = queue_handle.clone();
        let shutdown = shutdown.clone();
        let sweep_interval = Duration::from_secs(config.sweep_interval_seconds);
        tokio::spawn(async move {
            Analyzer::<OpenAiCompatProvider>::run_sweeper(pool, queue_handle, sweep_interval, shutdown)
                .await;
        })
    };

    let admission = Admission::new(pool.clone(), queue_handle.clone());
    let state = Arc::new(AppState {
        pool,
        queue: queue_handle.clone(),
        admission,
        analyzed_count: analyzer.completed.clone(),
        started_at: Instant::now(),
        process_id: std::process::id(),
    });

    let router = insights_server::build_router(state);

    let listener = tokio::net::TcpListener::bind("0.0.0.0:8080").await?;
    tracing::info!("listening on http://0.0.0.0:8080");

    axum::serve(listener, router)
        .with_graceful_shutdown(wait_for_shutdown_signal())
        .await?;

    tracing::info!("HTTP server stopped, closing the work queue and draining in-flight analysis");
    queue_handle.close();
    shutdown.cancel();

    let _ = analyzer_task.await;
    sweeper_task.abort();

    Ok(())
}

/// Resolves once SIGINT or (on Unix) SIGTERM is received.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
