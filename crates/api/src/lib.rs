//! HTTP API server for the inventory reservation and checkout subsystem.
//!
//! Exposes the cart lifecycle, settlement, order administration, and
//! ledger seeding operations over REST, with structured logging (tracing)
//! and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, patch, post, put};
use checkout::{CheckoutConfig, CheckoutService};
use checkout_store::CheckoutStore;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use routes::carts::AppState;

/// Builds the shared application state from a store and configuration.
pub fn create_state<S: CheckoutStore>(store: S, config: &Config) -> Arc<AppState<S>> {
    Arc::new(AppState {
        checkout: CheckoutService::new(store, CheckoutConfig::with_ttl(config.cart_ttl())),
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: CheckoutStore + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route(
            "/skus/{sku_id}",
            put(routes::skus::upsert::<S>).get(routes::skus::get::<S>),
        )
        .route("/carts/{cart_id}", get(routes::carts::get::<S>))
        .route("/carts/{cart_id}/items", post(routes::carts::add_item::<S>))
        .route(
            "/carts/{cart_id}/items/{sku_id}",
            put(routes::carts::update_item::<S>).delete(routes::carts::remove_item::<S>),
        )
        .route(
            "/carts/{cart_id}/checkout",
            post(routes::orders::settle::<S>),
        )
        .route("/orders", get(routes::orders::find_by_reference::<S>))
        .route("/orders/{order_id}", get(routes::orders::get::<S>))
        .route(
            "/orders/{order_id}/status",
            patch(routes::orders::update_status::<S>),
        )
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
