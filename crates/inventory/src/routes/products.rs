//! Product catalog and stock endpoints.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use common::{ApiError, ApiResponse, Claims, ProductId, ProductResponse, Role, StockChangeRequest};
use serde::Deserialize;
use std::sync::Arc;

use crate::product::{NewProduct, ProductUpdate};
use crate::service::InventoryService;
use crate::store::{ProductStore, ReservationRelease, StockDecrement};

/// Roles allowed to change the catalog or move stock.
const STOCK_WRITERS: [Role; 3] = [Role::Admin, Role::Seller, Role::Service];

const DEFAULT_STOCK_REASON: &str = "Manual update";
const DEFAULT_RELEASE_REASON: &str = "Stock released";

/// Shared application state accessible from all handlers.
pub struct AppState<S: ProductStore> {
    pub inventory: InventoryService<S>,
}

type ProductList = ApiResponse<Vec<ProductResponse>>;

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub term: String,
}

fn responses(products: Vec<crate::Product>) -> Vec<ProductResponse> {
    products.into_iter().map(ProductResponse::from).collect()
}

fn positive_quantity(quantity: i64) -> Result<u32, ApiError> {
    if quantity <= 0 {
        return Err(ApiError::bad_request("Quantity must be greater than zero"));
    }
    u32::try_from(quantity).map_err(|_| ApiError::bad_request("Quantity is too large"))
}

fn reason_or(reason: Option<String>, default: &str) -> String {
    reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| default.to_string())
}

/// GET /products: active products ordered by name.
#[tracing::instrument(skip(state))]
pub async fn list<S: ProductStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<ProductList, ApiError> {
    let products = state.inventory.list_products().await?;
    Ok(ApiResponse::ok(responses(products)))
}

/// GET /products/with-stock: active products with stock above zero.
#[tracing::instrument(skip(state))]
pub async fn with_stock<S: ProductStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Result<ProductList, ApiError> {
    let products = state.inventory.list_with_stock().await?;
    Ok(ApiResponse::ok(responses(products)))
}

/// GET /products/search?term=
#[tracing::instrument(skip(state))]
pub async fn search<S: ProductStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Query(params): Query<SearchParams>,
) -> Result<ProductList, ApiError> {
    let products = state.inventory.search_products(&params.term).await?;
    Ok(ApiResponse::ok(responses(products)))
}

/// GET /products/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: ProductStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<ProductResponse>, ApiError> {
    let product = state.inventory.get_product(ProductId::new(id)).await?;
    Ok(ApiResponse::ok(product.into()))
}

/// POST /products
#[tracing::instrument(skip(state, claims, body))]
pub async fn create<S: ProductStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Extension(claims): Extension<Claims>,
    Json(body): Json<NewProduct>,
) -> Result<(StatusCode, ApiResponse<ProductResponse>), ApiError> {
    claims.require_any(&STOCK_WRITERS)?;
    let product = state.inventory.create_product(body).await?;
    Ok((
        StatusCode::CREATED,
        ApiResponse::ok_with_message(product.into(), "Product created successfully"),
    ))
}

/// PUT /products/{id}
#[tracing::instrument(skip(state, claims, body))]
pub async fn update<S: ProductStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(body): Json<ProductUpdate>,
) -> Result<ApiResponse<ProductResponse>, ApiError> {
    claims.require_any(&STOCK_WRITERS)?;
    let product = state
        .inventory
        .update_product(ProductId::new(id), body)
        .await?;
    Ok(ApiResponse::ok_with_message(
        product.into(),
        "Product updated successfully",
    ))
}

/// DELETE /products/{id}: soft delete, Admin only.
#[tracing::instrument(skip(state, claims))]
pub async fn delete<S: ProductStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
) -> Result<ApiResponse<bool>, ApiError> {
    claims.require_any(&[Role::Admin])?;
    state.inventory.delete_product(ProductId::new(id)).await?;
    Ok(ApiResponse::ok_with_message(
        true,
        "Product deleted successfully",
    ))
}

/// GET /products/{id}/validate-stock/{quantity}
///
/// `data` is false for unknown or inactive products as well as for short
/// supply.
#[tracing::instrument(skip(state))]
pub async fn validate_stock<S: ProductStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path((id, quantity)): Path<(i64, i64)>,
) -> Result<ApiResponse<bool>, ApiError> {
    let quantity = positive_quantity(quantity)?;
    let available = state
        .inventory
        .has_sufficient_stock(ProductId::new(id), quantity)
        .await?;
    Ok(ApiResponse::ok(available))
}

/// POST /products/{id}/update-stock: conditional decrement.
///
/// Short supply answers 400 with the message `Insufficient stock` and
/// leaves the stock untouched. With a `reservation_key` the decrement is
/// idempotent: a repeat answers 200 without moving stock again, and a key
/// that was already released answers 400.
#[tracing::instrument(skip(state, claims, body))]
pub async fn update_stock<S: ProductStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(body): Json<StockChangeRequest>,
) -> Result<ApiResponse<bool>, ApiError> {
    claims.require_any(&STOCK_WRITERS)?;
    let quantity = positive_quantity(body.quantity)?;
    let reason = reason_or(body.reason, DEFAULT_STOCK_REASON);
    let id = ProductId::new(id);

    let outcome = match body.reservation_key.as_deref() {
        Some(key) => {
            state
                .inventory
                .reserve_stock(id, quantity, key, &reason)
                .await?
        }
        None => state.inventory.decrement_stock(id, quantity, &reason).await?,
    };

    match outcome {
        StockDecrement::Applied(_) => Ok(ApiResponse::ok_with_message(
            true,
            "Stock updated successfully",
        )),
        StockDecrement::AlreadyReserved => {
            Ok(ApiResponse::ok_with_message(true, "Stock already reserved"))
        }
        StockDecrement::Insufficient { .. } => {
            Err(ApiError::Conflict("Insufficient stock".to_string()))
        }
        StockDecrement::Revoked => Err(ApiError::Conflict(
            "Reservation already released".to_string(),
        )),
        StockDecrement::NotFound => Err(ApiError::NotFound(format!("Product {id} not found"))),
    }
}

/// POST /products/{id}/release-stock: gives previously decremented stock
/// back.
///
/// With a `reservation_key` the release happens at most once and `data`
/// tells whether stock actually moved. A key that holds nothing is closed
/// so a late reservation with it is refused.
#[tracing::instrument(skip(state, claims, body))]
pub async fn release_stock<S: ProductStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<i64>,
    Json(body): Json<StockChangeRequest>,
) -> Result<ApiResponse<bool>, ApiError> {
    claims.require_any(&STOCK_WRITERS)?;
    let quantity = positive_quantity(body.quantity)?;
    let reason = reason_or(body.reason, DEFAULT_RELEASE_REASON);
    let id = ProductId::new(id);

    let Some(key) = body.reservation_key.as_deref() else {
        state.inventory.release_stock(id, quantity, &reason).await?;
        return Ok(ApiResponse::ok_with_message(true, "Stock released successfully"));
    };

    let response = match state
        .inventory
        .release_reservation(id, quantity, key, &reason)
        .await?
    {
        ReservationRelease::Released { .. } => {
            ApiResponse::ok_with_message(true, "Stock released successfully")
        }
        ReservationRelease::AlreadyReleased => {
            ApiResponse::ok_with_message(false, "Reservation already released")
        }
        ReservationRelease::NothingReserved => {
            ApiResponse::ok_with_message(false, "No stock reserved under this key")
        }
    };
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_must_be_positive() {
        assert!(positive_quantity(0).is_err());
        assert!(positive_quantity(-3).is_err());
        assert!(positive_quantity(i64::MAX).is_err());
        assert_eq!(positive_quantity(4).unwrap(), 4);
    }

    #[test]
    fn blank_reason_falls_back_to_default() {
        assert_eq!(reason_or(None, DEFAULT_STOCK_REASON), "Manual update");
        assert_eq!(reason_or(Some("  ".into()), DEFAULT_STOCK_REASON), "Manual update");
        assert_eq!(reason_or(Some("Sale".into()), DEFAULT_STOCK_REASON), "Sale");
    }
}
