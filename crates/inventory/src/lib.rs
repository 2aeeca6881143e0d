//! Stock ledger and product catalog service.
//!
//! Owns product records and their stock counts. Stock only moves through
//! a conditional decrement (never below zero) or an explicit release, and
//! every committed change is followed by an event.

pub mod config;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod product;
pub mod routes;
pub mod service;
pub mod store;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use common::JwtManager;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{InventoryError, ProductStoreError, Result};
pub use memory::InMemoryProductStore;
pub use postgres::PostgresProductStore;
pub use product::{NewProduct, Product, ProductUpdate};
pub use routes::products::AppState;
pub use service::InventoryService;
pub use store::{
    MAX_RESERVATION_KEY_LEN, ProductStore, ProductStoreExt, ReservationRelease, StockDecrement,
    StockLevels,
};

/// Creates the Axum application router with all routes and shared state.
///
/// Everything under `/products` requires a bearer token; `/health` and
/// `/metrics` do not.
pub fn create_app<S: ProductStore + 'static>(
    state: Arc<AppState<S>>,
    jwt: Arc<JwtManager>,
    metrics_handle: PrometheusHandle,
) -> Router {
    use routes::products;

    let product_routes = Router::new()
        .route(
            "/products",
            get(products::list::<S>).post(products::create::<S>),
        )
        .route("/products/with-stock", get(products::with_stock::<S>))
        .route("/products/search", get(products::search::<S>))
        .route(
            "/products/{id}",
            get(products::get::<S>)
                .put(products::update::<S>)
                .delete(products::delete::<S>),
        )
        .route(
            "/products/{id}/validate-stock/{quantity}",
            get(products::validate_stock::<S>),
        )
        .route(
            "/products/{id}/update-stock",
            post(products::update_stock::<S>),
        )
        .route(
            "/products/{id}/release-stock",
            post(products::release_stock::<S>),
        )
        .route_layer(axum::middleware::from_fn_with_state(
            jwt,
            common::require_auth,
        ))
        .with_state(state);

    Router::new()
        .merge(product_routes)
        .merge(common::ops::ops_router("inventory", metrics_handle))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state around `store`.
pub fn create_state<S: ProductStore + 'static>(
    store: S,
    publisher: Arc<dyn messaging::EventPublisher>,
) -> Arc<AppState<S>> {
    Arc::new(AppState {
        inventory: InventoryService::new(store, publisher),
    })
}
