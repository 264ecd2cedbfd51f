use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ticketgate_core::{
    inbound_queue, load_config, validate_config, Config, ExpirySweeper, HttpNotifier,
    KafkaChannel, ReconcilerPool, ReconciliationEngine, RedisStateStore, SchemaRegistry,
    SourceRegistry, SqliteStateStore, StateStore, StoreBackend, TicketGateway,
};

use ticketgate_server::api::create_router;
use ticketgate_server::state::AppState;

/// Timeout for callbacks to sources.
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());

    // TICKETGATE_LOG_FORMAT=json switches to one JSON object per line.
    let json = std::env::var("TICKETGATE_LOG_FORMAT").is_ok_and(|format| format == "json");
    if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn open_store(config: &Config) -> Result<Arc<dyn StateStore>> {
    let store = &config.store;
    let store: Arc<dyn StateStore> = match store.backend {
        StoreBackend::Redis => Arc::new(
            RedisStateStore::new(&store.redis_url, store.ttl_secs, store.scan_batch)
                .await
                .context("Failed to connect to Redis")?,
        ),
        StoreBackend::Sqlite => Arc::new(
            SqliteStateStore::new(&store.sqlite_path, store.ttl_secs, store.scan_batch)
                .with_context(|| format!("Failed to open {:?}", store.sqlite_path))?,
        ),
    };
    info!(backend = ?config.store.backend, "State store initialized");
    Ok(store)
}

async fn run() -> Result<()> {
    init_logging();

    // Determine config path
    let config_path = std::env::var("TICKETGATE_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;
    validate_config(&config).context("Configuration validation failed")?;
    info!(
        brokers = %config.broker.brokers,
        sources = config.sources.len(),
        "Configuration loaded successfully"
    );

    // Both schemas are required before anything can be produced or consumed.
    let registry = SchemaRegistry::new(
        config.registry.url.clone(),
        Duration::from_secs(config.registry.timeout_secs),
    )
    .context("Failed to create schema registry client")?;
    let outbound = registry
        .load_codec(config.registry.outbound_schema_id)
        .await
        .context("Failed to load outbound schema")?;
    let inbound = registry
        .load_codec(config.registry.inbound_schema_id)
        .await
        .context("Failed to load inbound schema")?;

    let store = open_store(&config).await?;

    let channel = Arc::new(
        KafkaChannel::new(&config.broker, outbound, inbound)
            .context("Failed to create Kafka channel")?,
    );

    let gateway = Arc::new(TicketGateway::new(Arc::clone(&store), channel.clone()));

    let sources = Arc::new(SourceRegistry::from_config(&config.sources));
    if sources.is_empty() {
        warn!("No sources configured, backend replies will not be forwarded");
    }
    let notifier =
        Arc::new(HttpNotifier::new(NOTIFY_TIMEOUT).context("Failed to create HTTP notifier")?);
    let engine = Arc::new(ReconciliationEngine::new(
        Arc::clone(&store),
        channel.clone(),
        notifier,
        sources,
    ));

    // Consumer feeds the pool through the inbound queue.
    let (queue_tx, queue_rx) = inbound_queue();
    let pool = ReconcilerPool::new(engine, config.reconciler.workers);
    pool.start(queue_rx).await;

    let (consumer_shutdown, consumer_shutdown_rx) = broadcast::channel(1);
    let consumer = channel
        .spawn_consumer(queue_tx, consumer_shutdown_rx)
        .context("Failed to start consumer")?;

    let sweeper = ExpirySweeper::new(Arc::clone(&store), config.sweeper.clone());
    sweeper.start();

    let state = Arc::new(AppState::new(config.clone(), gateway));
    let app = create_router(state);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");

    // Stop intake first so the pool only drains what was already consumed.
    let _ = consumer_shutdown.send(());
    if let Err(e) = consumer.await {
        warn!(error = %e, "Consumer task ended abnormally");
    }
    pool.stop().await;
    sweeper.stop();

    info!("Shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
