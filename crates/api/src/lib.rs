//! HTTP API server with observability for the order management service.
//!
//! Provides REST endpoints for the order lifecycle and stock lookups,
//! with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use service::{DispatcherConfig, MessageProducer, OrderService, StatusEventDispatcher};
use storage::{OrderRepository, OutboxRepository, StockRepository, TxManager};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared application state accessible from all handlers.
pub struct AppState<M: TxManager> {
    pub order_service: OrderService<M>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<M: TxManager + 'static>(
    state: Arc<AppState<M>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create::<M>))
        .route("/orders/{id}", get(routes::orders::get::<M>))
        .route("/orders/{id}/pay", post(routes::orders::pay::<M>))
        .route("/orders/{id}/cancel", post(routes::orders::cancel::<M>))
        .route("/orders/{id}/events", get(routes::orders::events::<M>))
        .route("/stocks/{sku}", get(routes::stocks::get::<M>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state and the outbox dispatcher over one store.
///
/// The dispatcher is returned unstarted; the caller spawns it.
pub fn create_state<S>(
    store: Arc<S>,
    producer: Arc<dyn MessageProducer>,
    dispatcher_config: DispatcherConfig,
) -> (Arc<AppState<S>>, StatusEventDispatcher<S>)
where
    S: TxManager
        + OrderRepository<S::Tx>
        + OutboxRepository<S::Tx>
        + StockRepository<S::Tx>
        + 'static,
{
    let order_service = OrderService::from_store(Arc::clone(&store));
    let dispatcher = StatusEventDispatcher::new(
        Arc::clone(&store),
        store,
        producer,
        dispatcher_config,
    );

    (Arc::new(AppState { order_service }), dispatcher)
}
