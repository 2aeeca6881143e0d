//! Order endpoints.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::{DateTime, Utc};
use common::{ApiError, ApiResponse, Claims, CustomerId, Money, OrderId, ProductResponse, Role};
use serde::{Deserialize, Serialize};

use crate::gateway::InventoryGateway;
use crate::order::{CreateOrderRequest, Order, OrderResponse, OrderStatus};
use crate::store::OrderStore;
use crate::workflow::OrderWorkflow;

/// Roles that may see and manage every customer's orders.
const ELEVATED: [Role; 2] = [Role::Admin, Role::Seller];

const DEFAULT_RECENT_LIMIT: usize = 10;

/// Shared application state accessible from all handlers.
pub struct AppState<O: OrderStore, G: InventoryGateway> {
    pub workflow: OrderWorkflow<O, G>,
}

type OrderList = ApiResponse<Vec<OrderResponse>>;

#[derive(Debug, Deserialize)]
pub struct StatusUpdateRequest {
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RecentParams {
    #[serde(default = "default_recent_limit")]
    pub limit: usize,
}

fn default_recent_limit() -> usize {
    DEFAULT_RECENT_LIMIT
}

#[derive(Debug, Deserialize)]
pub struct PeriodParams {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesReport {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub total_cents: Money,
}

fn responses(orders: Vec<Order>) -> Vec<OrderResponse> {
    orders.into_iter().map(OrderResponse::from).collect()
}

fn parse_status(value: &str) -> Result<OrderStatus, ApiError> {
    OrderStatus::parse(value).ok_or_else(|| ApiError::bad_request(format!("Invalid status: {value}")))
}

/// Owners and elevated callers only.
fn ensure_access(claims: &Claims, order: &Order) -> Result<(), ApiError> {
    if claims.can_access(&order.customer_id) {
        Ok(())
    } else {
        Err(ApiError::Forbidden(
            "You do not have access to this order".to_string(),
        ))
    }
}

/// POST /orders: places an order for the caller.
#[tracing::instrument(skip(state, claims, body), fields(customer_id = %claims.sub))]
pub async fn create<O: OrderStore + 'static, G: InventoryGateway + 'static>(
    State(state): State<Arc<AppState<O, G>>>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<CreateOrderRequest>,
) -> Result<(StatusCode, ApiResponse<OrderResponse>), ApiError> {
    let order = state
        .workflow
        .create_order(claims.customer_id(), &body.items, &body.notes)
        .await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::ok_with_message(order.into(), "Order created successfully"),
    ))
}

/// GET /orders
#[tracing::instrument(skip(state, claims))]
pub async fn list<O: OrderStore + 'static, G: InventoryGateway + 'static>(
    State(state): State<Arc<AppState<O, G>>>,
    Extension(claims): Extension<Claims>,
) -> Result<OrderList, ApiError> {
    claims.require_any(&ELEVATED)?;
    let orders = state.workflow.list_all().await?;
    Ok(ApiResponse::ok(responses(orders)))
}

/// GET /orders/mine
#[tracing::instrument(skip(state, claims))]
pub async fn mine<O: OrderStore + 'static, G: InventoryGateway + 'static>(
    State(state): State<Arc<AppState<O, G>>>,
    Extension(claims): Extension<Claims>,
) -> Result<OrderList, ApiError> {
    let orders = state
        .workflow
        .list_by_customer(&claims.customer_id())
        .await?;
    Ok(ApiResponse::ok(responses(orders)))
}

/// GET /orders/customer/{customer_id}
#[tracing::instrument(skip(state, claims))]
pub async fn by_customer<O: OrderStore + 'static, G: InventoryGateway + 'static>(
    State(state): State<Arc<AppState<O, G>>>,
    Extension(claims): Extension<Claims>,
    Path(customer_id): Path<String>,
) -> Result<OrderList, ApiError> {
    claims.require_any(&ELEVATED)?;
    let orders = state
        .workflow
        .list_by_customer(&CustomerId::new(customer_id))
        .await?;
    Ok(ApiResponse::ok(responses(orders)))
}

/// GET /orders/status/{status}
#[tracing::instrument(skip(state, claims))]
pub async fn by_status<O: OrderStore + 'static, G: InventoryGateway + 'static>(
    State(state): State<Arc<AppState<O, G>>>,
    Extension(claims): Extension<Claims>,
    Path(status): Path<String>,
) -> Result<OrderList, ApiError> {
    claims.require_any(&ELEVATED)?;
    let status = parse_status(&status)?;
    let orders = state.workflow.list_by_status(status).await?;
    Ok(ApiResponse::ok(responses(orders)))
}

/// GET /orders/recent?limit=
#[tracing::instrument(skip(state, claims))]
pub async fn recent<O: OrderStore + 'static, G: InventoryGateway + 'static>(
    State(state): State<Arc<AppState<O, G>>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<RecentParams>,
) -> Result<OrderList, ApiError> {
    claims.require_any(&ELEVATED)?;
    let orders = state.workflow.list_recent(params.limit).await?;
    Ok(ApiResponse::ok(responses(orders)))
}

/// GET /orders/reports/sales?start=&end=
#[tracing::instrument(skip(state, claims))]
pub async fn sales_report<O: OrderStore + 'static, G: InventoryGateway + 'static>(
    State(state): State<Arc<AppState<O, G>>>,
    Extension(claims): Extension<Claims>,
    Query(params): Query<PeriodParams>,
) -> Result<ApiResponse<SalesReport>, ApiError> {
    claims.require_any(&ELEVATED)?;
    let total = state
        .workflow
        .total_sales_in_period(params.start, params.end)
        .await?;
    Ok(ApiResponse::ok(SalesReport {
        start: params.start,
        end: params.end,
        total_cents: total,
    }))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state, claims))]
pub async fn get<O: OrderStore + 'static, G: InventoryGateway + 'static>(
    State(state): State<Arc<AppState<O, G>>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<OrderResponse>, ApiError> {
    let order = state.workflow.get_order(OrderId::new(id)).await?;
    ensure_access(&claims, &order)?;
    Ok(ApiResponse::ok(order.into()))
}

/// PUT /orders/{id}/status
#[tracing::instrument(skip(state, claims, body))]
pub async fn update_status<O: OrderStore + 'static, G: InventoryGateway + 'static>(
    State(state): State<Arc<AppState<O, G>>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(body): Json<StatusUpdateRequest>,
) -> Result<ApiResponse<OrderResponse>, ApiError> {
    claims.require_any(&ELEVATED)?;
    let status = parse_status(&body.status)?;
    let order = state
        .workflow
        .update_status(OrderId::new(id), status, body.reason)
        .await?;
    Ok(ApiResponse::ok_with_message(
        order.into(),
        "Order status updated successfully",
    ))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state, claims, body))]
pub async fn cancel<O: OrderStore + 'static, G: InventoryGateway + 'static>(
    State(state): State<Arc<AppState<O, G>>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(body): Json<CancelRequest>,
) -> Result<ApiResponse<OrderResponse>, ApiError> {
    let id = OrderId::new(id);
    let order = state.workflow.get_order(id).await?;
    ensure_access(&claims, &order)?;

    let order = state.workflow.cancel_order(id, body.reason).await?;
    Ok(ApiResponse::ok_with_message(
        order.into(),
        "Order cancelled successfully",
    ))
}

/// GET /catalog: products the inventory service reports in stock.
#[tracing::instrument(skip(state))]
pub async fn catalog<O: OrderStore + 'static, G: InventoryGateway + 'static>(
    State(state): State<Arc<AppState<O, G>>>,
) -> Result<ApiResponse<Vec<ProductResponse>>, ApiError> {
    let products = state
        .workflow
        .inventory()
        .list_available()
        .await
        .map_err(|reason| ApiError::Unavailable(format!("Inventory unavailable: {reason}")))?;
    Ok(ApiResponse::ok(products))
}
