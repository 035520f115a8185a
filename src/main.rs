use std::sync::Arc;
use std::time::Duration;

use vitals_collector::config::Settings;
use vitals_collector::dispatch::AnalyticsDispatcher;
use vitals_collector::sources::{EntryBus, SourceSet};
use vitals_collector::storage::{KeyValueStore, MemoryStore, MetricsStorage, RedisStore};
use vitals_collector::{redis_client, server, telemetry, AppState, WebVitalsMonitor};

/// Longest we wait for queued analytics deliveries on shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    telemetry::init_logging();

    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║   📈  WEB VITALS COLLECTOR                       ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    // ── 1. Configuration ─────────────────────────────────────────
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    // ── 2. Metric log store ──────────────────────────────────────
    let store = open_store(&settings).await;
    let storage = MetricsStorage::with_capacity(store, settings.storage_capacity);

    // ── 3. Monitor & sources ─────────────────────────────────────
    let bus = EntryBus::new();
    let dispatcher = Arc::new(AnalyticsDispatcher::new());
    let monitor = Arc::new(WebVitalsMonitor::new(
        storage,
        dispatcher.clone(),
        SourceSet::from_bus(&bus, settings.tbt_window),
    ));
    monitor.start(settings.monitor_config());

    // ── 4. Router ────────────────────────────────────────────────
    let state = Arc::new(AppState { monitor, bus });
    let app = server::create_router(state);

    // ── 5. Bind & serve ──────────────────────────────────────────
    let listener = match tokio::net::TcpListener::bind(&settings.bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(addr = %settings.bind_addr, error = %e, "failed to bind");
            std::process::exit(1);
        }
    };

    let addr = &settings.bind_addr;
    println!("Collector listening on http://{addr}");
    println!("Beacon ingest   → POST http://{addr}/api/vitals/beacon");
    println!("Dashboard SSE   → http://{addr}/api/vitals/stream");
    println!("Alerts SSE      → http://{addr}/api/vitals/alerts/stream");
    println!("Report          → http://{addr}/api/vitals/report");
    println!();

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "server exited with error");
    }

    // ── 6. Flush analytics ───────────────────────────────────────
    if tokio::time::timeout(DRAIN_TIMEOUT, dispatcher.wait_idle())
        .await
        .is_err()
    {
        tracing::warn!(
            pending = dispatcher.pending(),
            "analytics queue not drained before shutdown"
        );
    }
    tracing::info!("collector stopped");
}

/// Redis when configured and reachable, otherwise an in-process store.
async fn open_store(settings: &Settings) -> Arc<dyn KeyValueStore> {
    let Some(url) = settings.redis_url.as_deref() else {
        tracing::info!("no Redis configured, metric log kept in memory");
        return Arc::new(MemoryStore::new());
    };

    tracing::info!(%url, "connecting to Redis");
    match redis_client::connect(url).await {
        Ok(conn) => {
            tracing::info!(origin = %settings.origin, "metric log stored in Redis");
            Arc::new(RedisStore::new(conn, &settings.origin))
        }
        Err(e) => {
            tracing::warn!(%url, error = %e, "Redis unavailable, metric log kept in memory");
            Arc::new(MemoryStore::new())
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
