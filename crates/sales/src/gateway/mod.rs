//! Sales-side facade over the inventory service.
//!
//! Every operation answers with a tagged result. Transport failures,
//! timeouts, unexpected statuses and malformed bodies all become an
//! `Unavailable` variant carrying the reason; nothing is propagated as an
//! error, so callers can tell "not enough stock" apart from "could not
//! ask".

pub mod http;
pub mod memory;

use async_trait::async_trait;
use common::{ProductId, ProductResponse};

pub use http::HttpInventoryGateway;
pub use memory::InMemoryInventoryGateway;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductLookup {
    Found(ProductResponse),
    NotFound,
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StockCheck {
    Available,
    Insufficient,
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reservation {
    Reserved,
    Insufficient,
    NotFound,
    Unavailable(String),
}

impl Reservation {
    /// Short description used in failure messages.
    pub fn describe(&self) -> String {
        match self {
            Reservation::Reserved => "reserved".to_string(),
            Reservation::Insufficient => "insufficient stock".to_string(),
            Reservation::NotFound => "product no longer exists".to_string(),
            Reservation::Unavailable(reason) => format!("inventory unavailable ({reason})"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Release {
    /// Nothing is held under the key any more.
    Released,
    /// The ledger has no such product; there is nothing to give back to.
    NotFound,
    Unavailable(String),
}

/// The inventory service as seen by the order workflow.
#[async_trait]
pub trait InventoryGateway: Send + Sync {
    async fn fetch_product(&self, id: ProductId) -> ProductLookup;

    async fn check_stock(&self, id: ProductId, quantity: u32) -> StockCheck;

    /// Conditional decrement on the remote ledger, applied at most once
    /// per `key`. Retrying with the same key after a lost reply is safe.
    async fn reserve_stock(
        &self,
        id: ProductId,
        quantity: u32,
        key: &str,
        reason: &str,
    ) -> Reservation;

    /// Gives back whatever `key` holds. When nothing is held the call is a
    /// no-op that closes the key, so a reservation still in flight with it
    /// is refused when it lands.
    async fn release_stock(&self, id: ProductId, quantity: u32, key: &str, reason: &str)
    -> Release;

    /// Active products with stock. `Err` carries the unavailability reason.
    async fn list_available(&self) -> Result<Vec<ProductResponse>, String>;
}

/// Logs and counts a degraded gateway call, returning the reason.
pub(crate) fn unavailable(operation: &'static str, reason: impl Into<String>) -> String {
    let reason = reason.into();
    metrics::counter!("inventory_gateway_unavailable_total", "operation" => operation)
        .increment(1);
    tracing::warn!(operation, %reason, "inventory service unavailable");
    reason
}
