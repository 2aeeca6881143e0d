use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{Money, ProductId, ProductResponse};
use tokio::sync::RwLock;

use super::{InventoryGateway, ProductLookup, Release, Reservation, StockCheck};

/// A stock movement recorded by the in-memory gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockMovement {
    pub product_id: ProductId,
    /// Negative for reservations, positive for releases.
    pub delta: i64,
    pub reason: String,
}

#[derive(Debug, Clone, Copy)]
struct Hold {
    product_id: ProductId,
    quantity: u32,
    released: bool,
}

#[derive(Default)]
struct GatewayState {
    products: BTreeMap<ProductId, ProductResponse>,
    holds: HashMap<String, Hold>,
    last_id: i64,
    movements: Vec<StockMovement>,
    unavailable: bool,
    fail_reservations: HashSet<ProductId>,
    lost_replies: HashSet<ProductId>,
    fail_on_release: bool,
}

/// In-memory inventory for testing the order workflow.
///
/// Holds its own small catalog and applies keyed reservations with the
/// same check-then-act and at-most-once semantics as the real ledger.
#[derive(Clone, Default)]
pub struct InMemoryInventoryGateway {
    state: Arc<RwLock<GatewayState>>,
}

impl InMemoryInventoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an active product and returns its id.
    pub async fn add_product(&self, name: &str, price_cents: i64, stock: u32) -> ProductId {
        let mut state = self.state.write().await;
        state.last_id += 1;
        let id = ProductId::new(state.last_id);
        let now = Utc::now();
        state.products.insert(
            id,
            ProductResponse {
                id,
                name: name.to_string(),
                description: String::new(),
                price_cents: Money::from_cents(price_cents),
                stock_quantity: stock,
                active: true,
                created_at: now,
                updated_at: now,
            },
        );
        id
    }

    pub async fn stock_of(&self, id: ProductId) -> Option<u32> {
        self.state
            .read()
            .await
            .products
            .get(&id)
            .map(|p| p.stock_quantity)
    }

    /// Makes every call answer as if the service were unreachable.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    /// Makes reservations of `id` fail while lookups and checks still
    /// succeed, as when another order takes the stock in between.
    pub async fn fail_reservations_for(&self, id: ProductId) {
        self.state.write().await.fail_reservations.insert(id);
    }

    /// Makes reservations of `id` commit on the ledger but answer as if
    /// the reply timed out.
    pub async fn lose_reservation_replies_for(&self, id: ProductId) {
        self.state.write().await.lost_replies.insert(id);
    }

    /// Number of keys currently holding stock.
    pub async fn held_reservations(&self) -> usize {
        self.state
            .read()
            .await
            .holds
            .values()
            .filter(|h| !h.released)
            .count()
    }

    pub async fn set_fail_on_release(&self, fail: bool) {
        self.state.write().await.fail_on_release = fail;
    }

    pub async fn movements(&self) -> Vec<StockMovement> {
        self.state.read().await.movements.clone()
    }
}

const UNREACHABLE: &str = "connection refused";
const TIMED_OUT: &str = "operation timed out";

#[async_trait]
impl InventoryGateway for InMemoryInventoryGateway {
    async fn fetch_product(&self, id: ProductId) -> ProductLookup {
        let state = self.state.read().await;
        if state.unavailable {
            return ProductLookup::Unavailable(UNREACHABLE.to_string());
        }
        match state.products.get(&id).filter(|p| p.active) {
            Some(product) => ProductLookup::Found(product.clone()),
            None => ProductLookup::NotFound,
        }
    }

    async fn check_stock(&self, id: ProductId, quantity: u32) -> StockCheck {
        let state = self.state.read().await;
        if state.unavailable {
            return StockCheck::Unavailable(UNREACHABLE.to_string());
        }
        match state.products.get(&id) {
            Some(p) if p.active && p.stock_quantity >= quantity => StockCheck::Available,
            _ => StockCheck::Insufficient,
        }
    }

    async fn reserve_stock(
        &self,
        id: ProductId,
        quantity: u32,
        key: &str,
        reason: &str,
    ) -> Reservation {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.unavailable {
            return Reservation::Unavailable(UNREACHABLE.to_string());
        }
        if state.fail_reservations.contains(&id) {
            return Reservation::Insufficient;
        }

        if let Some(hold) = state.holds.get(key) {
            return if hold.released {
                Reservation::Unavailable("rejected: Reservation already released".to_string())
            } else {
                Reservation::Reserved
            };
        }

        let Some(product) = state.products.get_mut(&id).filter(|p| p.active) else {
            return Reservation::NotFound;
        };
        if product.stock_quantity < quantity {
            return Reservation::Insufficient;
        }

        product.stock_quantity -= quantity;
        product.updated_at = Utc::now();
        state.holds.insert(
            key.to_string(),
            Hold {
                product_id: id,
                quantity,
                released: false,
            },
        );
        state.movements.push(StockMovement {
            product_id: id,
            delta: -i64::from(quantity),
            reason: reason.to_string(),
        });

        if state.lost_replies.contains(&id) {
            return Reservation::Unavailable(TIMED_OUT.to_string());
        }
        Reservation::Reserved
    }

    async fn release_stock(
        &self,
        id: ProductId,
        quantity: u32,
        key: &str,
        reason: &str,
    ) -> Release {
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.unavailable || state.fail_on_release {
            return Release::Unavailable(UNREACHABLE.to_string());
        }

        let Some(hold) = state.holds.get_mut(key) else {
            state.holds.insert(
                key.to_string(),
                Hold {
                    product_id: id,
                    quantity,
                    released: true,
                },
            );
            return Release::Released;
        };
        if hold.released {
            return Release::Released;
        }

        let Some(product) = state.products.get_mut(&hold.product_id) else {
            return Release::NotFound;
        };
        product.stock_quantity += hold.quantity;
        product.updated_at = Utc::now();
        hold.released = true;
        state.movements.push(StockMovement {
            product_id: hold.product_id,
            delta: i64::from(hold.quantity),
            reason: reason.to_string(),
        });
        Release::Released
    }

    async fn list_available(&self) -> Result<Vec<ProductResponse>, String> {
        let state = self.state.read().await;
        if state.unavailable {
            return Err(UNREACHABLE.to_string());
        }
        let mut products: Vec<ProductResponse> = state
            .products
            .values()
            .filter(|p| p.active && p.stock_quantity > 0)
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(products)
    }
}
