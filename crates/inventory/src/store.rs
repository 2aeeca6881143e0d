use async_trait::async_trait;
use common::ProductId;

use crate::Result;
use crate::product::{NewProduct, Product, ProductUpdate};

/// Stock before and after a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StockLevels {
    pub previous: u32,
    pub current: u32,
}

/// Outcome of a conditional decrement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockDecrement {
    Applied(StockLevels),
    /// Nothing changed; `available` is the stock seen by the failed check.
    Insufficient { available: u32 },
    /// No active product with that id.
    NotFound,
    /// A reservation with the same key already holds this stock; nothing
    /// changed.
    AlreadyReserved,
    /// The key was released before this reservation arrived; nothing
    /// changed.
    Revoked,
}

impl StockDecrement {
    pub fn is_applied(&self) -> bool {
        matches!(self, StockDecrement::Applied(_))
    }

    /// True when the caller's stock is held after this outcome.
    pub fn holds_stock(&self) -> bool {
        matches!(
            self,
            StockDecrement::Applied(_) | StockDecrement::AlreadyReserved
        )
    }
}

/// Outcome of releasing a keyed reservation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationRelease {
    /// The held stock went back to its product.
    Released {
        product_id: ProductId,
        levels: StockLevels,
    },
    /// The key was released before; nothing changed.
    AlreadyReleased,
    /// Nothing is held under the key. The key is now closed, so a
    /// reservation that arrives later with it is refused.
    NothingReserved,
}

/// Longest accepted reservation key.
pub const MAX_RESERVATION_KEY_LEN: usize = 100;

/// Core trait for product ledger implementations.
///
/// Every read except [`ProductStore::get_including_inactive`] ignores
/// inactive products. Stock only moves through the plain and keyed
/// decrements, their releases and an explicit operator update.
#[async_trait]
pub trait ProductStore: Send + Sync {
    /// Active product by id.
    async fn get(&self, id: ProductId) -> Result<Option<Product>>;

    /// Product by id regardless of the active flag.
    async fn get_including_inactive(&self, id: ProductId) -> Result<Option<Product>>;

    /// Active products ordered by name.
    async fn list_active(&self) -> Result<Vec<Product>>;

    /// Active products with stock above zero, ordered by name.
    async fn list_with_stock(&self) -> Result<Vec<Product>>;

    /// Active products whose name or description contains `term`,
    /// ignoring case.
    async fn search(&self, term: &str) -> Result<Vec<Product>>;

    /// Stores a validated product and assigns its id.
    async fn insert(&self, product: NewProduct) -> Result<Product>;

    /// Applies a validated partial update to an active product.
    ///
    /// Returns the updated product and the stock levels around the change.
    async fn update(
        &self,
        id: ProductId,
        update: ProductUpdate,
    ) -> Result<Option<(Product, StockLevels)>>;

    /// Soft delete. Returns false when no active product has that id.
    async fn deactivate(&self, id: ProductId) -> Result<bool>;

    /// Atomically subtracts `quantity` if the active product holds at
    /// least that much stock.
    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<StockDecrement>;

    /// Adds `quantity` back. Inactive products are included so a
    /// compensation never fails on a product deleted in the meantime.
    async fn increment_stock(&self, id: ProductId, quantity: u32) -> Result<Option<StockLevels>>;

    /// Keyed conditional decrement.
    ///
    /// The first call for `key` behaves like [`ProductStore::decrement_stock`]
    /// and records the reservation when it applies, atomically with the
    /// decrement. Later calls with the same key change nothing.
    async fn reserve_stock(&self, key: &str, id: ProductId, quantity: u32)
    -> Result<StockDecrement>;

    /// Gives back what `key` holds, at most once.
    ///
    /// `id` and `quantity` only describe the closed key when nothing is
    /// held; a held reservation releases its own recorded product and
    /// quantity.
    async fn release_reservation(
        &self,
        key: &str,
        id: ProductId,
        quantity: u32,
    ) -> Result<ReservationRelease>;
}

/// Extension trait providing convenience methods for product stores.
#[async_trait]
pub trait ProductStoreExt: ProductStore {
    /// True iff the product exists, is active and holds at least `quantity`.
    async fn has_sufficient_stock(&self, id: ProductId, quantity: u32) -> Result<bool> {
        Ok(self
            .get(id)
            .await?
            .is_some_and(|p| p.has_stock_for(quantity)))
    }
}

// Blanket implementation for all ProductStore implementations
impl<T: ProductStore + ?Sized> ProductStoreExt for T {}
