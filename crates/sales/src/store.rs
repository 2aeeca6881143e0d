use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId};

use crate::{OrderStoreError, Result};
use crate::order::{NewOrder, Order, OrderStatus};

/// Core trait for order ledger implementations.
///
/// Lists are ordered newest first. Orders are never physically deleted.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Stores a new order as `Pending` / `Reserving` and assigns its id.
    async fn insert(&self, order: NewOrder) -> Result<Order>;

    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Overwrites status, saga state, notes, timestamps and the
    /// reservation state of every line. Returns false when no order has
    /// that id.
    async fn save(&self, order: &Order) -> Result<bool>;

    async fn list_all(&self) -> Result<Vec<Order>>;

    async fn list_by_customer(&self, customer_id: &CustomerId) -> Result<Vec<Order>>;

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>>;

    /// At most `limit` most recent orders.
    async fn list_recent(&self, limit: usize) -> Result<Vec<Order>>;

    /// Orders created within `[start, end]`, both bounds inclusive.
    async fn list_in_period(&self, start: DateTime<Utc>, end: DateTime<Utc>)
    -> Result<Vec<Order>>;

    /// Orders whose placement saga has not reached a terminal state,
    /// oldest first.
    async fn list_incomplete(&self) -> Result<Vec<Order>>;
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Sum of the totals of non-cancelled orders created within
    /// `[start, end]`. Fails instead of wrapping when the sum leaves the
    /// cent range.
    async fn total_sales_in_period(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Money> {
        let orders = self.list_in_period(start, end).await?;
        orders
            .iter()
            .filter(|o| o.status.counts_as_sale())
            .try_fold(Money::zero(), |sum, o| sum.checked_add(o.total))
            .ok_or(OrderStoreError::TotalOverflow)
    }
}

impl<T: OrderStore + ?Sized> OrderStoreExt for T {}
