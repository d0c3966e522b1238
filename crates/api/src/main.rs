//! API server entry point.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use service::{LogProducer, MessageProducer};
use storage::{
    DEFAULT_STOCK, MemoryStore, OrderRepository, OutboxRepository, PostgresStore, StockRepository,
    TxManager,
};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use api::config::Config;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

/// Reads the configured stock seed, or the bundled one.
async fn load_stock(config: &Config) -> Vec<domain::StockItem> {
    let json = match &config.stock_seed_path {
        Some(path) => tokio::fs::read_to_string(path)
            .await
            .unwrap_or_else(|e| panic!("failed to read stock seed {}: {e}", path.display())),
        None => DEFAULT_STOCK.to_string(),
    };
    storage::parse_stock(&json).expect("invalid stock seed")
}

/// Serves HTTP and runs the outbox dispatcher until shutdown.
async fn serve<S>(config: &Config, store: Arc<S>, metrics_handle: PrometheusHandle)
where
    S: TxManager
        + OrderRepository<S::Tx>
        + OutboxRepository<S::Tx>
        + StockRepository<S::Tx>
        + 'static,
{
    // No broker client is wired in; status events are written to the log.
    let producer: Arc<dyn MessageProducer> = Arc::new(LogProducer::default());
    let (state, dispatcher) = api::create_state(store, producer, config.dispatcher());
    let dispatcher = dispatcher.spawn();

    let app = api::create_app(state, metrics_handle);

    let addr = config.addr();
    tracing::info!(%addr, "starting API server");

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    dispatcher.stop().await;
    tracing::info!("server shut down gracefully");
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    // 1. Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // 2. Install Prometheus metrics recorder
    let prometheus_builder = metrics_exporter_prometheus::PrometheusBuilder::new();
    let metrics_handle = prometheus_builder
        .install_recorder()
        .expect("failed to install Prometheus recorder");

    // 3. Open the store and seed the stock ledger
    let stock = load_stock(&config).await;
    match &config.database_url {
        Some(url) => {
            let store = PostgresStore::connect(url, config.db_max_connections)
                .await
                .expect("failed to connect to database");
            store
                .run_migrations()
                .await
                .expect("failed to run migrations");
            store.seed_stock(&stock).await.expect("failed to seed stock");
            tracing::info!("using PostgreSQL store");
            serve(&config, Arc::new(store), metrics_handle).await;
        }
        None => {
            let store = MemoryStore::with_stock(stock);
            tracing::info!("using in-memory store");
            serve(&config, Arc::new(store), metrics_handle).await;
        }
    }
}
