//! Event topics and their JSON payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{CustomerId, Money, OrderId, ProductId};

/// Named queues every event is published to.
pub mod topics {
    pub const ORDER_CREATED: &str = "order.created";
    pub const ORDER_STATUS_UPDATED: &str = "order.status.updated";
    pub const INVENTORY_UPDATED: &str = "inventory.updated";
    pub const INVENTORY_INSUFFICIENT: &str = "inventory.insufficient";
    pub const PRODUCT_CREATED: &str = "product.created";
    pub const PRODUCT_UPDATED: &str = "product.updated";

    pub const ALL: [&str; 6] = [
        ORDER_CREATED,
        ORDER_STATUS_UPDATED,
        INVENTORY_UPDATED,
        INVENTORY_INSUFFICIENT,
        PRODUCT_CREATED,
        PRODUCT_UPDATED,
    ];
}

/// Stock moved on a product. Published on `inventory.updated`,
/// `product.created` and `product.updated`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChangedMessage {
    pub product_id: ProductId,
    pub previous_quantity: u32,
    pub current_quantity: u32,
    pub reason: String,
    pub changed_at: DateTime<Utc>,
}

/// A decrement was refused for lack of supply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsufficientStockMessage {
    pub product_id: ProductId,
    pub product_name: String,
    pub requested: u32,
    pub available: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineMessage {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreatedMessage {
    pub order_id: OrderId,
    pub customer_id: CustomerId,
    pub total_cents: Money,
    pub lines: Vec<OrderLineMessage>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStatusUpdatedMessage {
    pub order_id: OrderId,
    pub previous_status: String,
    pub current_status: String,
    pub reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_names_are_distinct() {
        let mut names = topics::ALL.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), topics::ALL.len());
    }

    #[test]
    fn order_created_is_a_flat_record() {
        let msg = OrderCreatedMessage {
            order_id: OrderId::new(7),
            customer_id: CustomerId::from("c-1"),
            total_cents: Money::from_cents(3000),
            lines: vec![OrderLineMessage {
                product_id: ProductId::new(1),
                product_name: "Keyboard".into(),
                quantity: 3,
                unit_price_cents: Money::from_cents(1000),
            }],
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["order_id"], 7);
        assert_eq!(json["customer_id"], "c-1");
        assert_eq!(json["total_cents"], 3000);
        assert_eq!(json["lines"][0]["unit_price_cents"], 1000);
    }
}
