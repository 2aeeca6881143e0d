//! Order aggregate, its lines and the two state machines it carries.

use chrono::{DateTime, Utc};
use common::messages::{OrderCreatedMessage, OrderLineMessage};
use common::{CustomerId, Money, OrderId, ProductId};
use serde::{Deserialize, Serialize};

pub const MAX_NOTES_LEN: usize = 500;

/// Largest line quantity the order ledger can store.
pub const MAX_LINE_QUANTITY: u32 = i32::MAX as u32;

/// Customer-facing order status.
///
/// ```text
/// Pending ──► Confirmed ──► Processing ──► Shipped ──► Delivered
///    │            │
///    └────────────┴──► Cancelled
/// ```
///
/// Operators may move an order to any status; nothing here enforces the
/// arrows above.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    #[default]
    Pending,
    Confirmed,
    Processing,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Confirmed,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// Returns true for `Delivered` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Returns true if the order counts towards sales totals.
    pub fn counts_as_sale(&self) -> bool {
        !matches!(self, OrderStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Confirmed => "Confirmed",
            OrderStatus::Processing => "Processing",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }

    /// Case-insensitive parse of a status name.
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(value))
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Progress of the placement saga that spans the order ledger and the
/// remote stock ledger.
///
/// ```text
/// Reserving ──┬──► Reserved ──► Confirmed
///             └──► Compensating ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SagaState {
    /// Lines are being reserved one by one.
    #[default]
    Reserving,

    /// Every line holds its stock.
    Reserved,

    /// A reservation failed and reserved lines are being released.
    Compensating,

    /// The order was confirmed (terminal state).
    Confirmed,

    /// Compensation finished and the order was cancelled (terminal state).
    Failed,
}

impl SagaState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Confirmed | SagaState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SagaState::Reserving => "Reserving",
            SagaState::Reserved => "Reserved",
            SagaState::Compensating => "Compensating",
            SagaState::Confirmed => "Confirmed",
            SagaState::Failed => "Failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Reserving" => Some(SagaState::Reserving),
            "Reserved" => Some(SagaState::Reserved),
            "Compensating" => Some(SagaState::Compensating),
            "Confirmed" => Some(SagaState::Confirmed),
            "Failed" => Some(SagaState::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for SagaState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Whether a line's stock is held on the remote ledger.
///
/// A line goes `InDoubt` before its reservation is sent and stays there
/// when the reply is lost, so compensation and recovery release it by key
/// whether or not the remote side committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LineReservation {
    #[default]
    Unreserved,
    InDoubt,
    Reserved,
}

impl LineReservation {
    pub fn as_str(&self) -> &'static str {
        match self {
            LineReservation::Unreserved => "Unreserved",
            LineReservation::InDoubt => "InDoubt",
            LineReservation::Reserved => "Reserved",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "Unreserved" => Some(LineReservation::Unreserved),
            "InDoubt" => Some(LineReservation::InDoubt),
            "Reserved" => Some(LineReservation::Reserved),
            _ => None,
        }
    }

    /// True when the remote ledger may hold stock for the line.
    pub fn may_hold_stock(&self) -> bool {
        !matches!(self, LineReservation::Unreserved)
    }
}

/// A line of an order. Name and price are captured when the order is
/// placed and never follow later catalog changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price: Money,
    pub reservation: LineReservation,
}

impl OrderLine {
    pub fn new(
        product_id: ProductId,
        product_name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id,
            product_name: product_name.into(),
            quantity,
            unit_price,
            reservation: LineReservation::Unreserved,
        }
    }

    pub fn subtotal(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A validated order about to be stored for the first time.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLine>,
    pub notes: String,
}

impl NewOrder {
    pub fn total(&self) -> Money {
        self.lines.iter().map(OrderLine::subtotal).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub lines: Vec<OrderLine>,
    pub total: Money,
    pub status: OrderStatus,
    pub saga_state: SagaState,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    /// Builds the stored form of `new` with a freshly assigned id.
    pub fn from_new(id: OrderId, new: NewOrder, now: DateTime<Utc>) -> Self {
        let total = new.total();
        Self {
            id,
            customer_id: new.customer_id,
            lines: new.lines,
            total,
            status: OrderStatus::Pending,
            saga_state: SagaState::Reserving,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn reserved_lines(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.reservation == LineReservation::Reserved)
            .count()
    }

    /// Lines whose reservation outcome is unknown.
    pub fn in_doubt_lines(&self) -> usize {
        self.lines
            .iter()
            .filter(|l| l.reservation == LineReservation::InDoubt)
            .count()
    }

    /// Idempotency key of the reservation for the line at `position`.
    pub fn reservation_key(&self, position: usize) -> String {
        format!("order-{}-line-{}", self.id, position)
    }

    pub fn created_message(&self) -> OrderCreatedMessage {
        OrderCreatedMessage {
            order_id: self.id,
            customer_id: self.customer_id.clone(),
            total_cents: self.total,
            lines: self
                .lines
                .iter()
                .map(|line| OrderLineMessage {
                    product_id: line.product_id,
                    product_name: line.product_name.clone(),
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price,
                })
                .collect(),
            created_at: self.created_at,
        }
    }
}

/// One requested line of `POST /orders`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct LineRequest {
    pub product_id: i64,
    pub quantity: i64,
}

impl LineRequest {
    pub fn new(product_id: i64, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub items: Vec<LineRequest>,
    #[serde(default)]
    pub notes: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLineResponse {
    pub product_id: ProductId,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_cents: Money,
    pub subtotal_cents: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub status: OrderStatus,
    pub saga_state: SagaState,
    pub lines: Vec<OrderLineResponse>,
    pub total_cents: Money,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            customer_id: order.customer_id,
            status: order.status,
            saga_state: order.saga_state,
            lines: order
                .lines
                .into_iter()
                .map(|line| OrderLineResponse {
                    subtotal_cents: line.subtotal(),
                    product_id: line.product_id,
                    product_name: line.product_name,
                    quantity: line.quantity,
                    unit_price_cents: line.unit_price,
                })
                .collect(),
            total_cents: order.total,
            notes: order.notes,
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}
