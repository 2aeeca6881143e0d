//! Order ledger and order placement service.
//!
//! Orders are placed by [`OrderWorkflow`], which reserves stock on the
//! inventory service through an [`InventoryGateway`] before confirming,
//! and gives reservations back when any line cannot be reserved.

pub mod config;
pub mod error;
pub mod gateway;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod routes;
pub mod store;
pub mod workflow;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post, put};
use common::JwtManager;
use metrics_exporter_prometheus::PrometheusHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use error::{OrderStoreError, Result, WorkflowError};
pub use gateway::{
    HttpInventoryGateway, InMemoryInventoryGateway, InventoryGateway, ProductLookup, Release,
    Reservation, StockCheck,
};
pub use memory::InMemoryOrderStore;
pub use order::{
    LineRequest, LineReservation, NewOrder, Order, OrderLine, OrderResponse, OrderStatus,
    SagaState,
};
pub use postgres::PostgresOrderStore;
pub use routes::orders::AppState;
pub use store::{OrderStore, OrderStoreExt};
pub use workflow::{OrderWorkflow, RecoveryReport};

/// Creates the Axum application router with all routes and shared state.
///
/// Everything except `/health` and `/metrics` requires a bearer token.
pub fn create_app<O, G>(
    state: Arc<AppState<O, G>>,
    jwt: Arc<JwtManager>,
    metrics_handle: PrometheusHandle,
) -> Router
where
    O: OrderStore + 'static,
    G: InventoryGateway + 'static,
{
    use routes::orders;

    let order_routes = Router::new()
        .route(
            "/orders",
            get(orders::list::<O, G>).post(orders::create::<O, G>),
        )
        .route("/orders/mine", get(orders::mine::<O, G>))
        .route("/orders/recent", get(orders::recent::<O, G>))
        .route("/orders/reports/sales", get(orders::sales_report::<O, G>))
        .route(
            "/orders/customer/{customer_id}",
            get(orders::by_customer::<O, G>),
        )
        .route("/orders/status/{status}", get(orders::by_status::<O, G>))
        .route("/orders/{id}", get(orders::get::<O, G>))
        .route("/orders/{id}/status", put(orders::update_status::<O, G>))
        .route("/orders/{id}/cancel", post(orders::cancel::<O, G>))
        .route("/catalog", get(orders::catalog::<O, G>))
        .route_layer(axum::middleware::from_fn_with_state(
            jwt,
            common::require_auth,
        ))
        .with_state(state);

    Router::new()
        .merge(order_routes)
        .merge(common::ops::ops_router("sales", metrics_handle))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state around the two collaborators.
pub fn create_state<O, G>(
    orders: O,
    inventory: G,
    publisher: Arc<dyn messaging::EventPublisher>,
) -> Arc<AppState<O, G>>
where
    O: OrderStore + 'static,
    G: InventoryGateway + 'static,
{
    Arc::new(AppState {
        workflow: OrderWorkflow::new(orders, inventory, publisher),
    })
}
