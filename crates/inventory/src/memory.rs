use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{Money, ProductId};
use tokio::sync::RwLock;

use crate::product::{NewProduct, Product, ProductUpdate, clamp_stock};
use crate::store::{ProductStore, ReservationRelease, StockDecrement, StockLevels};
use crate::{ProductStoreError, Result};

/// Stock held under a reservation key.
#[derive(Debug, Clone, Copy)]
struct HeldStock {
    product_id: ProductId,
    quantity: u32,
    released: bool,
}

#[derive(Default)]
struct LedgerState {
    products: BTreeMap<ProductId, Product>,
    reservations: HashMap<String, HeldStock>,
    last_id: i64,
}

fn decrement(
    products: &mut BTreeMap<ProductId, Product>,
    id: ProductId,
    quantity: u32,
) -> StockDecrement {
    let Some(product) = products.get_mut(&id).filter(|p| p.active) else {
        return StockDecrement::NotFound;
    };

    if product.stock_quantity < quantity {
        return StockDecrement::Insufficient {
            available: product.stock_quantity,
        };
    }

    let previous = product.stock_quantity;
    product.stock_quantity -= quantity;
    product.updated_at = Utc::now();

    StockDecrement::Applied(StockLevels {
        previous,
        current: product.stock_quantity,
    })
}

fn increment(
    products: &mut BTreeMap<ProductId, Product>,
    id: ProductId,
    quantity: u32,
) -> Option<StockLevels> {
    let product = products.get_mut(&id)?;

    let previous = product.stock_quantity;
    product.stock_quantity = product.stock_quantity.saturating_add(quantity);
    product.updated_at = Utc::now();

    Some(StockLevels {
        previous,
        current: product.stock_quantity,
    })
}

/// In-memory product ledger for tests and local runs.
///
/// Every stock mutation holds the single write lock for its whole
/// check-then-act, which serializes concurrent decrements.
#[derive(Clone, Default)]
pub struct InMemoryProductStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryProductStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored products, inactive included.
    pub async fn product_count(&self) -> usize {
        self.state.read().await.products.len()
    }

    async fn collect_active<F>(&self, keep: F) -> Vec<Product>
    where
        F: Fn(&Product) -> bool + Send,
    {
        let state = self.state.read().await;
        let mut products: Vec<Product> = state
            .products
            .values()
            .filter(|p| p.active && keep(p))
            .cloned()
            .collect();
        products.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        products
    }
}

#[async_trait]
impl ProductStore for InMemoryProductStore {
    async fn get(&self, id: ProductId) -> Result<Option<Product>> {
        let state = self.state.read().await;
        Ok(state.products.get(&id).filter(|p| p.active).cloned())
    }

    async fn get_including_inactive(&self, id: ProductId) -> Result<Option<Product>> {
        Ok(self.state.read().await.products.get(&id).cloned())
    }

    async fn list_active(&self) -> Result<Vec<Product>> {
        Ok(self.collect_active(|_| true).await)
    }

    async fn list_with_stock(&self) -> Result<Vec<Product>> {
        Ok(self.collect_active(|p| p.stock_quantity > 0).await)
    }

    async fn search(&self, term: &str) -> Result<Vec<Product>> {
        let term = term.trim().to_string();
        Ok(self.collect_active(move |p| p.matches(&term)).await)
    }

    async fn insert(&self, product: NewProduct) -> Result<Product> {
        let mut state = self.state.write().await;
        state.last_id += 1;
        let now = Utc::now();
        let stored = Product {
            id: ProductId::new(state.last_id),
            name: product.name.trim().to_string(),
            description: product.description,
            price: Money::from_cents(product.price_cents),
            stock_quantity: clamp_stock(product.stock_quantity),
            active: true,
            created_at: now,
            updated_at: now,
        };
        state.products.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn update(
        &self,
        id: ProductId,
        update: ProductUpdate,
    ) -> Result<Option<(Product, StockLevels)>> {
        let mut state = self.state.write().await;
        let Some(product) = state.products.get_mut(&id).filter(|p| p.active) else {
            return Ok(None);
        };

        let previous = product.stock_quantity;
        update.apply_to(product);
        product.updated_at = Utc::now();

        let levels = StockLevels {
            previous,
            current: product.stock_quantity,
        };
        Ok(Some((product.clone(), levels)))
    }

    async fn deactivate(&self, id: ProductId) -> Result<bool> {
        let mut state = self.state.write().await;
        match state.products.get_mut(&id).filter(|p| p.active) {
            Some(product) => {
                product.active = false;
                product.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<StockDecrement> {
        let mut state = self.state.write().await;
        Ok(decrement(&mut state.products, id, quantity))
    }

    async fn increment_stock(&self, id: ProductId, quantity: u32) -> Result<Option<StockLevels>> {
        let mut state = self.state.write().await;
        Ok(increment(&mut state.products, id, quantity))
    }

    async fn reserve_stock(
        &self,
        key: &str,
        id: ProductId,
        quantity: u32,
    ) -> Result<StockDecrement> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        if let Some(held) = state.reservations.get(key) {
            return Ok(if held.released {
                StockDecrement::Revoked
            } else {
                StockDecrement::AlreadyReserved
            });
        }

        let outcome = decrement(&mut state.products, id, quantity);
        if outcome.is_applied() {
            state.reservations.insert(
                key.to_string(),
                HeldStock {
                    product_id: id,
                    quantity,
                    released: false,
                },
            );
        }
        Ok(outcome)
    }

    async fn release_reservation(
        &self,
        key: &str,
        id: ProductId,
        quantity: u32,
    ) -> Result<ReservationRelease> {
        let mut guard = self.state.write().await;
        let state = &mut *guard;

        let Some(held) = state.reservations.get_mut(key) else {
            state.reservations.insert(
                key.to_string(),
                HeldStock {
                    product_id: id,
                    quantity,
                    released: true,
                },
            );
            return Ok(ReservationRelease::NothingReserved);
        };
        if held.released {
            return Ok(ReservationRelease::AlreadyReleased);
        }

        let levels = increment(&mut state.products, held.product_id, held.quantity).ok_or_else(
            || ProductStoreError::CorruptRow {
                id: held.product_id.as_i64(),
                reason: format!("reservation {key} points at a missing product"),
            },
        )?;
        held.released = true;

        Ok(ReservationRelease::Released {
            product_id: held.product_id,
            levels,
        })
    }
}
