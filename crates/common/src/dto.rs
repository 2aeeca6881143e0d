//! Wire shapes shared by the inventory surface and its sales-side client.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Money, ProductId};

/// Product as returned by `GET /products/{id}` and the listing endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductResponse {
    pub id: ProductId,
    pub name: String,
    pub description: String,
    pub price_cents: Money,
    pub stock_quantity: u32,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Body of `POST /products/{id}/update-stock` and `/release-stock`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StockChangeRequest {
    pub quantity: i64,
    #[serde(default)]
    pub reason: Option<String>,
    /// Idempotency key of a reservation. A decrement carrying a key is
    /// applied at most once per key, and a release carrying one gives back
    /// only what that key holds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reservation_key: Option<String>,
}
