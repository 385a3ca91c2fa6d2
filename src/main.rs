//! keybroker — shared credential broker daemon.
//!
//! Multiplexes a pool of third-party API subscription keys across
//! concurrent callers under per-window and per-day usage quotas. Exposes a
//! small HTTP surface backed by a durable key store and a fair wait queue,
//! kept fresh by a periodic maintenance scheduler and two external
//! reconcilers (config file re-sync, upstream health probe).

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use keybroker::config::Config;
use keybroker::engine::ReservationEngine;
use keybroker::queue::redis::RedisQueue;
use keybroker::queue::WaitQueueWorker;
use keybroker::reconcile::ConfigReconciler;
use keybroker::registry::KeyRegistry;
use keybroker::scheduler::MaintenanceScheduler;
use keybroker::store::mongo::MongoKeyStore;
use keybroker::{http, watch};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_new(&config.log_filter)
                .unwrap_or_else(|_| "keybroker=info".into()),
        )
        .with_target(false)
        .init();

    info!("keybroker v{}", env!("CARGO_PKG_VERSION"));

    // ── Key Store ───────────────────────────────────────────────────
    let store = Arc::new(
        MongoKeyStore::connect(&config.mongodb_uri, &config.mongodb_db_name)
            .await
            .context("failed to connect to MongoDB")?,
    );

    // ── Reservation Engine ──────────────────────────────────────────
    let engine = Arc::new(ReservationEngine::new(store.clone()));

    // ── Key Registry & initial config sync ──────────────────────────
    let registry = Arc::new(KeyRegistry::new(store.clone(), config.interval_overrides));
    let config_reconciler = Arc::new(ConfigReconciler::new(registry.clone()));
    config_reconciler
        .sync(&config.key_preload)
        .await
        .context("initial key preload sync failed")?;

    if let Some(watched_path) = config.watched_key_file.clone() {
        watch::watch_key_file(watched_path, config_reconciler.clone())
            .context("failed to start key preload file watcher")?;
    }

    // ── Maintenance Scheduler ───────────────────────────────────────
    Arc::new(MaintenanceScheduler::new(store.clone())).spawn();

    // ── Wait Queue ──────────────────────────────────────────────────
    let queue = Arc::new(
        RedisQueue::connect(&config.redis.url)
            .await
            .context("failed to connect to Redis")?,
    );
    let worker_queue = queue.clone();
    let worker_engine = engine.clone();
    let queue_cfg = config.queue.clone();
    tokio::spawn(async move {
        worker_queue
            .run_worker(
                worker_engine,
                queue_cfg.concurrency,
                queue_cfg.backoff_ms,
                queue_cfg.max_wait_ms,
            )
            .await;
    });

    // ── HTTP Surface ────────────────────────────────────────────────
    let app_state = Arc::new(http::AppState::new(
        engine,
        registry,
        queue,
        config.interval_overrides,
        config.queue.request_timeout_ms,
    ));
    let app = http::build_router(app_state);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    info!(%addr, "keybroker ready");
    axum::serve(listener, app).await?;

    Ok(())
}
