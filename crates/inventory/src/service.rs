//! Inventory service: catalog operations and stock movements, each
//! followed by its event.

use std::sync::Arc;

use chrono::Utc;
use common::ProductId;
use common::messages::{InsufficientStockMessage, StockChangedMessage, topics};
use messaging::{EventPublisher, EventPublisherExt};

use crate::error::InventoryError;
use crate::product::{NewProduct, Product, ProductUpdate};
use crate::store::{
    MAX_RESERVATION_KEY_LEN, ProductStore, ProductStoreExt, ReservationRelease, StockDecrement,
    StockLevels,
};

pub const REASON_PRODUCT_CREATED: &str = "Product created";
pub const REASON_PRODUCT_UPDATED: &str = "Product updated";

/// Owns the product ledger and publishes a stock event after every
/// committed change.
///
/// Publication happens after the ledger write and its failure is only
/// logged, so a broker outage never blocks stock movements.
pub struct InventoryService<S: ProductStore> {
    store: S,
    publisher: Arc<dyn EventPublisher>,
}

impl<S: ProductStore> InventoryService<S> {
    pub fn new(store: S, publisher: Arc<dyn EventPublisher>) -> Self {
        Self { store, publisher }
    }

    /// Returns a reference to the underlying ledger.
    pub fn store(&self) -> &S {
        &self.store
    }

    #[tracing::instrument(skip(self), fields(product_id = %id))]
    pub async fn get_product(&self, id: ProductId) -> Result<Product, InventoryError> {
        self.store
            .get(id)
            .await?
            .ok_or(InventoryError::NotFound(id))
    }

    /// Audit read that ignores the active flag.
    pub async fn get_product_including_inactive(
        &self,
        id: ProductId,
    ) -> Result<Product, InventoryError> {
        self.store
            .get_including_inactive(id)
            .await?
            .ok_or(InventoryError::NotFound(id))
    }

    pub async fn list_products(&self) -> Result<Vec<Product>, InventoryError> {
        Ok(self.store.list_active().await?)
    }

    pub async fn list_with_stock(&self) -> Result<Vec<Product>, InventoryError> {
        Ok(self.store.list_with_stock().await?)
    }

    /// A blank term lists every active product.
    pub async fn search_products(&self, term: &str) -> Result<Vec<Product>, InventoryError> {
        if term.trim().is_empty() {
            return self.list_products().await;
        }
        Ok(self.store.search(term).await?)
    }

    /// False for unknown or inactive products.
    #[tracing::instrument(skip(self), fields(product_id = %id))]
    pub async fn has_sufficient_stock(
        &self,
        id: ProductId,
        quantity: u32,
    ) -> Result<bool, InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity);
        }
        Ok(self.store.has_sufficient_stock(id, quantity).await?)
    }

    /// Conditional decrement. Never overwrites stock blindly; a refused
    /// decrement changes nothing and publishes `inventory.insufficient`.
    #[tracing::instrument(skip(self), fields(product_id = %id))]
    pub async fn decrement_stock(
        &self,
        id: ProductId,
        quantity: u32,
        reason: &str,
    ) -> Result<StockDecrement, InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity);
        }

        let outcome = self.store.decrement_stock(id, quantity).await?;
        self.record_decrement(id, quantity, outcome, reason).await?;
        Ok(outcome)
    }

    /// Keyed conditional decrement.
    ///
    /// Repeating a call with the same key changes nothing and reports
    /// `AlreadyReserved`, so a caller that lost the reply can retry safely.
    #[tracing::instrument(skip(self), fields(product_id = %id))]
    pub async fn reserve_stock(
        &self,
        id: ProductId,
        quantity: u32,
        key: &str,
        reason: &str,
    ) -> Result<StockDecrement, InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity);
        }
        let key = checked_key(key)?;

        let outcome = self.store.reserve_stock(key, id, quantity).await?;
        self.record_decrement(id, quantity, outcome, reason).await?;
        Ok(outcome)
    }

    async fn record_decrement(
        &self,
        id: ProductId,
        quantity: u32,
        outcome: StockDecrement,
        reason: &str,
    ) -> Result<(), InventoryError> {
        match outcome {
            StockDecrement::Applied(levels) => {
                metrics::counter!("stock_decrements_total").increment(1);
                tracing::info!(
                    previous = levels.previous,
                    current = levels.current,
                    reason,
                    "stock decremented"
                );
                self.publish_stock_change(topics::INVENTORY_UPDATED, id, levels, reason)
                    .await;
            }
            StockDecrement::Insufficient { available } => {
                metrics::counter!("stock_insufficient_total").increment(1);
                tracing::warn!(requested = quantity, available, "insufficient stock");

                let product_name = self
                    .store
                    .get_including_inactive(id)
                    .await?
                    .map(|p| p.name)
                    .unwrap_or_default();
                let message = InsufficientStockMessage {
                    product_id: id,
                    product_name,
                    requested: quantity,
                    available,
                    occurred_at: Utc::now(),
                };
                self.publisher
                    .publish_or_warn(topics::INVENTORY_INSUFFICIENT, &message)
                    .await;
            }
            StockDecrement::NotFound => {
                tracing::debug!("decrement on unknown product");
            }
            StockDecrement::AlreadyReserved => {
                tracing::info!(reason, "reservation repeated, stock already held");
            }
            StockDecrement::Revoked => {
                tracing::warn!(reason, "reservation arrived after its release");
            }
        }
        Ok(())
    }

    /// Adds stock back after a reservation is undone.
    #[tracing::instrument(skip(self), fields(product_id = %id))]
    pub async fn release_stock(
        &self,
        id: ProductId,
        quantity: u32,
        reason: &str,
    ) -> Result<StockLevels, InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity);
        }

        let levels = self
            .store
            .increment_stock(id, quantity)
            .await?
            .ok_or(InventoryError::NotFound(id))?;

        tracing::info!(
            previous = levels.previous,
            current = levels.current,
            reason,
            "stock released"
        );
        self.publish_stock_change(topics::INVENTORY_UPDATED, id, levels, reason)
            .await;

        Ok(levels)
    }

    /// Gives back what `key` holds, at most once.
    ///
    /// Releasing a key that holds nothing is a no-op that closes the key,
    /// so a reservation still in flight with it is refused on arrival.
    #[tracing::instrument(skip(self), fields(product_id = %id))]
    pub async fn release_reservation(
        &self,
        id: ProductId,
        quantity: u32,
        key: &str,
        reason: &str,
    ) -> Result<ReservationRelease, InventoryError> {
        if quantity == 0 {
            return Err(InventoryError::InvalidQuantity);
        }
        let key = checked_key(key)?;

        let outcome = self.store.release_reservation(key, id, quantity).await?;
        match outcome {
            ReservationRelease::Released { product_id, levels } => {
                tracing::info!(
                    previous = levels.previous,
                    current = levels.current,
                    reason,
                    "reservation released"
                );
                self.publish_stock_change(topics::INVENTORY_UPDATED, product_id, levels, reason)
                    .await;
            }
            ReservationRelease::AlreadyReleased => {
                tracing::info!(reason, "reservation already released");
            }
            ReservationRelease::NothingReserved => {
                tracing::info!(reason, "nothing reserved, key closed");
            }
        }

        Ok(outcome)
    }

    #[tracing::instrument(skip(self, product), fields(name = %product.name))]
    pub async fn create_product(&self, product: NewProduct) -> Result<Product, InventoryError> {
        let errors = product.validate();
        if !errors.is_empty() {
            return Err(InventoryError::Validation(errors));
        }

        let created = self.store.insert(product).await?;
        tracing::info!(product_id = %created.id, "product created");

        let levels = StockLevels {
            previous: 0,
            current: created.stock_quantity,
        };
        self.publish_stock_change(
            topics::PRODUCT_CREATED,
            created.id,
            levels,
            REASON_PRODUCT_CREATED,
        )
        .await;

        Ok(created)
    }

    /// Applies the provided fields. `product.updated` is published only
    /// when the stock quantity actually changed.
    #[tracing::instrument(skip(self, update), fields(product_id = %id))]
    pub async fn update_product(
        &self,
        id: ProductId,
        update: ProductUpdate,
    ) -> Result<Product, InventoryError> {
        let errors = update.validate();
        if !errors.is_empty() {
            return Err(InventoryError::Validation(errors));
        }

        let (product, levels) = self
            .store
            .update(id, update)
            .await?
            .ok_or(InventoryError::NotFound(id))?;

        if levels.previous != levels.current {
            self.publish_stock_change(topics::PRODUCT_UPDATED, id, levels, REASON_PRODUCT_UPDATED)
                .await;
        }

        Ok(product)
    }

    /// Soft delete.
    #[tracing::instrument(skip(self), fields(product_id = %id))]
    pub async fn delete_product(&self, id: ProductId) -> Result<(), InventoryError> {
        if self.store.deactivate(id).await? {
            tracing::info!("product deactivated");
            Ok(())
        } else {
            Err(InventoryError::NotFound(id))
        }
    }

    async fn publish_stock_change(
        &self,
        topic: &str,
        id: ProductId,
        levels: StockLevels,
        reason: &str,
    ) {
        let message = StockChangedMessage {
            product_id: id,
            previous_quantity: levels.previous,
            current_quantity: levels.current,
            reason: reason.to_string(),
            changed_at: Utc::now(),
        };
        self.publisher.publish_or_warn(topic, &message).await;
    }
}

fn checked_key(key: &str) -> Result<&str, InventoryError> {
    let key = key.trim();
    if key.is_empty() || key.chars().count() > MAX_RESERVATION_KEY_LEN {
        return Err(InventoryError::InvalidReservationKey);
    }
    Ok(key)
}

#[cfg(test)]
mod tests {
    use messaging::InMemoryBroker;

    use super::*;
    use crate::memory::InMemoryProductStore;

    fn service() -> (InventoryService<InMemoryProductStore>, InMemoryBroker) {
        let broker = InMemoryBroker::new();
        let service = InventoryService::new(InMemoryProductStore::new(), Arc::new(broker.clone()));
        (service, broker)
    }

    fn keyboard(stock: i64) -> NewProduct {
        NewProduct {
            name: "Keyboard".into(),
            description: "Mechanical".into(),
            price_cents: 12_990,
            stock_quantity: stock,
        }
    }

    #[tokio::test]
    async fn create_publishes_product_created() {
        let (service, broker) = service();
        let product = service.create_product(keyboard(10)).await.unwrap();

        let events: Vec<StockChangedMessage> =
            broker.decoded(topics::PRODUCT_CREATED).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].product_id, product.id);
        assert_eq!(events[0].previous_quantity, 0);
        assert_eq!(events[0].current_quantity, 10);
        assert_eq!(events[0].reason, REASON_PRODUCT_CREATED);
    }

    #[tokio::test]
    async fn create_rejects_invalid_input_without_side_effects() {
        let (service, broker) = service();
        let err = service
            .create_product(NewProduct {
                name: String::new(),
                description: String::new(),
                price_cents: -1,
                stock_quantity: 1,
            })
            .await
            .unwrap_err();

        match err {
            InventoryError::Validation(errors) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(service.store().product_count().await, 0);
        assert!(!broker.is_declared(topics::PRODUCT_CREATED).await);
    }

    #[tokio::test]
    async fn decrement_publishes_inventory_updated() {
        let (service, broker) = service();
        let product = service.create_product(keyboard(10)).await.unwrap();

        let outcome = service
            .decrement_stock(product.id, 3, "Sale - order #1")
            .await
            .unwrap();
        assert!(outcome.is_applied());

        let events: Vec<StockChangedMessage> =
            broker.decoded(topics::INVENTORY_UPDATED).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous_quantity, 10);
        assert_eq!(events[0].current_quantity, 7);
        assert_eq!(events[0].reason, "Sale - order #1");
    }

    #[tokio::test]
    async fn insufficient_decrement_changes_nothing_and_reports() {
        let (service, broker) = service();
        let product = service.create_product(keyboard(2)).await.unwrap();

        let outcome = service
            .decrement_stock(product.id, 5, "Sale - order #1")
            .await
            .unwrap();
        assert_eq!(outcome, StockDecrement::Insufficient { available: 2 });
        assert_eq!(service.get_product(product.id).await.unwrap().stock_quantity, 2);

        let events: Vec<InsufficientStockMessage> =
            broker.decoded(topics::INVENTORY_INSUFFICIENT).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].product_name, "Keyboard");
        assert_eq!(events[0].requested, 5);
        assert_eq!(events[0].available, 2);
        assert_eq!(broker.len(topics::INVENTORY_UPDATED).await, 0);
    }

    #[tokio::test]
    async fn zero_quantity_is_rejected() {
        let (service, _) = service();
        let product = service.create_product(keyboard(2)).await.unwrap();
        assert!(matches!(
            service.decrement_stock(product.id, 0, "x").await,
            Err(InventoryError::InvalidQuantity)
        ));
        assert!(matches!(
            service.has_sufficient_stock(product.id, 0).await,
            Err(InventoryError::InvalidQuantity)
        ));
    }

    #[tokio::test]
    async fn release_restores_stock() {
        let (service, broker) = service();
        let product = service.create_product(keyboard(4)).await.unwrap();
        service.decrement_stock(product.id, 4, "sale").await.unwrap();

        let levels = service
            .release_stock(product.id, 4, "Compensation - order #9")
            .await
            .unwrap();
        assert_eq!(levels.current, 4);
        assert_eq!(broker.len(topics::INVENTORY_UPDATED).await, 2);

        assert!(matches!(
            service.release_stock(ProductId::new(404), 1, "x").await,
            Err(InventoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn repeated_reservation_moves_stock_once() {
        let (service, broker) = service();
        let product = service.create_product(keyboard(10)).await.unwrap();

        let first = service
            .reserve_stock(product.id, 3, "order-1-line-0", "Sale - order #1")
            .await
            .unwrap();
        assert!(first.is_applied());
        let again = service
            .reserve_stock(product.id, 3, "order-1-line-0", "Sale - order #1")
            .await
            .unwrap();
        assert_eq!(again, StockDecrement::AlreadyReserved);

        assert_eq!(service.get_product(product.id).await.unwrap().stock_quantity, 7);
        assert_eq!(broker.len(topics::INVENTORY_UPDATED).await, 1);
    }

    #[tokio::test]
    async fn reservation_release_is_at_most_once() {
        let (service, broker) = service();
        let product = service.create_product(keyboard(10)).await.unwrap();
        service
            .reserve_stock(product.id, 3, "order-2-line-0", "sale")
            .await
            .unwrap();

        let released = service
            .release_reservation(product.id, 3, "order-2-line-0", "Compensation - order #2")
            .await
            .unwrap();
        assert!(matches!(released, ReservationRelease::Released { .. }));
        assert_eq!(
            service
                .release_reservation(product.id, 3, "order-2-line-0", "again")
                .await
                .unwrap(),
            ReservationRelease::AlreadyReleased
        );

        assert_eq!(service.get_product(product.id).await.unwrap().stock_quantity, 10);
        let events: Vec<StockChangedMessage> =
            broker.decoded(topics::INVENTORY_UPDATED).await.unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].reason, "Compensation - order #2");
    }

    #[tokio::test]
    async fn late_reservation_after_release_is_refused() {
        let (service, _) = service();
        let product = service.create_product(keyboard(10)).await.unwrap();

        assert_eq!(
            service
                .release_reservation(product.id, 3, "order-3-line-0", "Compensation - order #3")
                .await
                .unwrap(),
            ReservationRelease::NothingReserved
        );
        assert_eq!(
            service
                .reserve_stock(product.id, 3, "order-3-line-0", "Sale - order #3")
                .await
                .unwrap(),
            StockDecrement::Revoked
        );
        assert_eq!(service.get_product(product.id).await.unwrap().stock_quantity, 10);
    }

    #[tokio::test]
    async fn reservation_key_must_be_present_and_short() {
        let (service, _) = service();
        let product = service.create_product(keyboard(10)).await.unwrap();

        assert!(matches!(
            service.reserve_stock(product.id, 1, "   ", "x").await,
            Err(InventoryError::InvalidReservationKey)
        ));
        let long = "k".repeat(MAX_RESERVATION_KEY_LEN + 1);
        assert!(matches!(
            service.release_reservation(product.id, 1, &long, "x").await,
            Err(InventoryError::InvalidReservationKey)
        ));
    }

    #[tokio::test]
    async fn update_publishes_only_on_stock_change() {
        let (service, broker) = service();
        let product = service.create_product(keyboard(4)).await.unwrap();

        service
            .update_product(
                product.id,
                ProductUpdate {
                    price_cents: Some(1),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(broker.len(topics::PRODUCT_UPDATED).await, 0);

        service
            .update_product(
                product.id,
                ProductUpdate {
                    stock_quantity: Some(9),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let events: Vec<StockChangedMessage> =
            broker.decoded(topics::PRODUCT_UPDATED).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].previous_quantity, 4);
        assert_eq!(events[0].current_quantity, 9);
    }

    #[tokio::test]
    async fn delete_hides_product() {
        let (service, _) = service();
        let product = service.create_product(keyboard(4)).await.unwrap();
        service.delete_product(product.id).await.unwrap();

        assert!(matches!(
            service.get_product(product.id).await,
            Err(InventoryError::NotFound(_))
        ));
        assert!(!service.has_sufficient_stock(product.id, 1).await.unwrap());
        assert!(
            !service
                .get_product_including_inactive(product.id)
                .await
                .unwrap()
                .active
        );
        assert!(matches!(
            service.delete_product(product.id).await,
            Err(InventoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn stock_moves_even_when_broker_is_down() {
        let (service, broker) = service();
        let product = service.create_product(keyboard(3)).await.unwrap();
        broker.set_fail_on_publish(true).await;

        let outcome = service.decrement_stock(product.id, 1, "sale").await.unwrap();
        assert!(outcome.is_applied());
        assert_eq!(service.get_product(product.id).await.unwrap().stock_quantity, 2);
    }

    #[tokio::test]
    async fn blank_search_lists_everything() {
        let (service, _) = service();
        service.create_product(keyboard(1)).await.unwrap();
        service
            .create_product(NewProduct {
                name: "Mouse".into(),
                description: String::new(),
                price_cents: 100,
                stock_quantity: 0,
            })
            .await
            .unwrap();

        assert_eq!(service.search_products("  ").await.unwrap().len(), 2);
        assert_eq!(service.search_products("mou").await.unwrap().len(), 1);
    }
}
