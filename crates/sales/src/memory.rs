use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId};
use tokio::sync::RwLock;

use crate::Result;
use crate::order::{NewOrder, Order, OrderStatus};
use crate::store::OrderStore;

#[derive(Default)]
struct OrderLedgerState {
    orders: BTreeMap<OrderId, Order>,
    last_id: i64,
}

/// In-memory order ledger for tests and local runs.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<OrderLedgerState>>,
}

impl InMemoryOrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }

    async fn collect<F>(&self, keep: F) -> Vec<Order>
    where
        F: Fn(&Order) -> bool + Send,
    {
        let state = self.state.read().await;
        let mut orders: Vec<Order> = state.orders.values().filter(|o| keep(o)).cloned().collect();
        newest_first(&mut orders);
        orders
    }
}

fn newest_first(orders: &mut [Order]) {
    orders.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: NewOrder) -> Result<Order> {
        let mut state = self.state.write().await;
        state.last_id += 1;
        let id = OrderId::new(state.last_id);
        let order = Order::from_new(id, order, Utc::now());
        state.orders.insert(id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn save(&self, order: &Order) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.orders.get_mut(&order.id) {
            Some(stored) => {
                *stored = order.clone();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_all(&self) -> Result<Vec<Order>> {
        Ok(self.collect(|_| true).await)
    }

    async fn list_by_customer(&self, customer_id: &CustomerId) -> Result<Vec<Order>> {
        Ok(self.collect(|o| &o.customer_id == customer_id).await)
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        Ok(self.collect(|o| o.status == status).await)
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Order>> {
        let mut orders = self.collect(|_| true).await;
        orders.truncate(limit);
        Ok(orders)
    }

    async fn list_in_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        Ok(self
            .collect(|o| o.created_at >= start && o.created_at <= end)
            .await)
    }

    async fn list_incomplete(&self) -> Result<Vec<Order>> {
        let mut orders = self.collect(|o| !o.saga_state.is_terminal()).await;
        orders.reverse();
        Ok(orders)
    }
}
