//! Order placement across the order ledger and the remote stock ledger.
//!
//! The two ledgers share no transaction, so placement runs as a saga
//! whose progress is persisted on the order itself:
//!
//! 1. Every requested line is looked up and stock-checked. Any problem
//!    rejects the whole request before anything is written.
//! 2. The order is stored as `Pending` / `Reserving`.
//! 3. Lines are reserved one at a time, in request order, each under its
//!    own idempotency key. A line is persisted as `InDoubt` before its
//!    reservation is sent and as `Reserved` once it is confirmed; a lost
//!    reply leaves it `InDoubt`.
//! 4. When every line is reserved the order becomes `Confirmed` and
//!    `order.created` is published.
//! 5. When a reservation fails, every line that may hold stock is released
//!    by key in reverse order and the order is cancelled. A release that cannot be
//!    delivered leaves the saga in `Compensating` for
//!    [`OrderWorkflow::recover_incomplete`].

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use common::messages::{OrderStatusUpdatedMessage, topics};
use common::{CustomerId, Money, OrderId, ProductId};
use messaging::{EventPublisher, EventPublisherExt};

use crate::error::WorkflowError;
use crate::gateway::{InventoryGateway, ProductLookup, Release, Reservation, StockCheck};
use crate::order::{
    LineRequest, LineReservation, MAX_LINE_QUANTITY, MAX_NOTES_LEN, NewOrder, Order, OrderLine,
    OrderStatus, SagaState,
};
use crate::store::{OrderStore, OrderStoreExt};

pub const DEFAULT_CANCEL_REASON: &str = "Cancelled by customer";
pub const MAX_RECENT_LIMIT: usize = 100;

/// A reservation that did not go through.
#[derive(Debug, Clone)]
struct ReservationFailure {
    product_name: String,
    reason: String,
}

/// Outcome of [`OrderWorkflow::recover_incomplete`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Orders that were fully reserved and are now confirmed.
    pub confirmed: usize,
    /// Orders whose reservations were given back and are now cancelled.
    pub failed: usize,
    /// Orders still waiting for a release to go through.
    pub pending: usize,
}

/// Places orders and moves them through their lifecycle.
pub struct OrderWorkflow<O: OrderStore, G: InventoryGateway> {
    orders: O,
    inventory: G,
    publisher: Arc<dyn EventPublisher>,
}

impl<O: OrderStore, G: InventoryGateway> OrderWorkflow<O, G> {
    pub fn new(orders: O, inventory: G, publisher: Arc<dyn EventPublisher>) -> Self {
        Self {
            orders,
            inventory,
            publisher,
        }
    }

    /// Returns a reference to the order ledger.
    pub fn orders(&self) -> &O {
        &self.orders
    }

    /// Returns a reference to the inventory gateway.
    pub fn inventory(&self) -> &G {
        &self.inventory
    }

    /// Places an order for `customer_id`.
    ///
    /// Returns the confirmed order. Rejections list one message per
    /// problem line and leave both ledgers untouched.
    #[tracing::instrument(
        skip(self, customer_id, lines, notes),
        fields(customer_id = %customer_id, lines = lines.len())
    )]
    pub async fn create_order(
        &self,
        customer_id: CustomerId,
        lines: &[LineRequest],
        notes: &str,
    ) -> Result<Order, WorkflowError> {
        let started = Instant::now();
        let result = self.place(customer_id, lines, notes).await;
        metrics::histogram!("order_workflow_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn place(
        &self,
        customer_id: CustomerId,
        lines: &[LineRequest],
        notes: &str,
    ) -> Result<Order, WorkflowError> {
        let requested = validate_request(lines, notes)?;

        let mut order_lines = Vec::with_capacity(requested.len());
        let mut problems = Vec::new();
        let mut total = Some(Money::zero());

        for (product_id, quantity) in requested {
            let product = match self.inventory.fetch_product(product_id).await {
                ProductLookup::Found(product) => product,
                ProductLookup::NotFound => {
                    problems.push(format!("Product ID {product_id} not found"));
                    continue;
                }
                ProductLookup::Unavailable(_) => {
                    problems.push(format!(
                        "Product ID {product_id} could not be checked: inventory unavailable"
                    ));
                    continue;
                }
            };

            let subtotal = product.price_cents.checked_multiply(quantity);
            total = total.zip(subtotal).and_then(|(sum, line)| sum.checked_add(line));
            if subtotal.is_none() || total.is_none() {
                problems.push(format!("Order total for product {} is too large", product.name));
                continue;
            }

            match self.inventory.check_stock(product_id, quantity).await {
                StockCheck::Available => order_lines.push(OrderLine::new(
                    product_id,
                    product.name,
                    quantity,
                    product.price_cents,
                )),
                StockCheck::Insufficient => {
                    problems.push(format!("Insufficient stock for product {}", product.name));
                }
                StockCheck::Unavailable(_) => problems.push(format!(
                    "Stock for product {} could not be checked: inventory unavailable",
                    product.name
                )),
            }
        }

        if !problems.is_empty() {
            metrics::counter!("orders_rejected_total").increment(1);
            tracing::info!(problems = problems.len(), "order rejected");
            return Err(WorkflowError::Rejected(problems));
        }

        let mut order = self
            .orders
            .insert(NewOrder {
                customer_id,
                lines: order_lines,
                notes: notes.trim().to_string(),
            })
            .await?;
        tracing::info!(order_id = %order.id, total = %order.total, "order stored, reserving stock");

        match self.reserve_lines(&mut order).await? {
            None => {
                self.confirm(&mut order).await?;
                Ok(order)
            }
            Some(failure) => {
                metrics::counter!("order_reservation_failures_total").increment(1);
                tracing::warn!(
                    order_id = %order.id,
                    product = %failure.product_name,
                    reason = %failure.reason,
                    "reservation failed, compensating"
                );
                let reason = format!(
                    "Reservation failed for product {}: {}",
                    failure.product_name, failure.reason
                );
                self.compensate(&mut order, &reason).await?;
                Err(WorkflowError::ReservationFailed {
                    order_id: order.id,
                    product_name: failure.product_name,
                    reason: failure.reason,
                })
            }
        }
    }

    /// Reserves every line not yet reserved, in order. Stops at the first
    /// failure and reports it.
    ///
    /// Each line is saved as `InDoubt` before its reservation goes out, so
    /// a crash or a lost reply never leaves stock held by a line that
    /// claims to be unreserved.
    async fn reserve_lines(
        &self,
        order: &mut Order,
    ) -> Result<Option<ReservationFailure>, WorkflowError> {
        let reason = format!("Sale - order #{}", order.id);

        for index in 0..order.lines.len() {
            if order.lines[index].reservation == LineReservation::Reserved {
                continue;
            }
            let (product_id, quantity) = (order.lines[index].product_id, order.lines[index].quantity);
            let key = order.reservation_key(index);

            order.lines[index].reservation = LineReservation::InDoubt;
            order.touch();
            self.orders.save(order).await?;

            let outcome = self
                .inventory
                .reserve_stock(product_id, quantity, &key, &reason)
                .await;

            order.lines[index].reservation = match outcome {
                Reservation::Reserved => LineReservation::Reserved,
                Reservation::Unavailable(_) => LineReservation::InDoubt,
                Reservation::Insufficient | Reservation::NotFound => LineReservation::Unreserved,
            };
            order.touch();
            self.orders.save(order).await?;

            if outcome != Reservation::Reserved {
                return Ok(Some(ReservationFailure {
                    product_name: order.lines[index].product_name.clone(),
                    reason: outcome.describe(),
                }));
            }
        }

        Ok(None)
    }

    /// `Reserved` then `Confirmed`, then `order.created`.
    async fn confirm(&self, order: &mut Order) -> Result<(), WorkflowError> {
        order.saga_state = SagaState::Reserved;
        order.touch();
        self.orders.save(order).await?;

        order.status = OrderStatus::Confirmed;
        order.saga_state = SagaState::Confirmed;
        order.touch();
        self.orders.save(order).await?;

        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id, total = %order.total, "order confirmed");

        self.publisher
            .publish_or_warn(topics::ORDER_CREATED, &order.created_message())
            .await;
        Ok(())
    }

    /// Releases every line that may hold stock, by key and in reverse
    /// order, then cancels the order. Releasing an in-doubt line that
    /// never reserved anything is a no-op on the remote side.
    ///
    /// Returns false if a release could not be delivered; the order then
    /// stays in `Compensating`.
    #[tracing::instrument(skip(self, order, reason), fields(order_id = %order.id))]
    async fn compensate(&self, order: &mut Order, reason: &str) -> Result<bool, WorkflowError> {
        if order.saga_state != SagaState::Compensating {
            order.saga_state = SagaState::Compensating;
            order.touch();
            self.orders.save(order).await?;
            metrics::counter!("order_compensations_total").increment(1);
        }

        let release_reason = format!("Compensation - order #{}", order.id);
        for index in (0..order.lines.len()).rev() {
            if !order.lines[index].reservation.may_hold_stock() {
                continue;
            }
            let line = &order.lines[index];
            let (product_id, quantity) = (line.product_id, line.quantity);
            let key = order.reservation_key(index);

            match self
                .inventory
                .release_stock(product_id, quantity, &key, &release_reason)
                .await
            {
                Release::Released => {}
                Release::NotFound => {
                    tracing::warn!(%product_id, "released product no longer exists");
                }
                Release::Unavailable(cause) => {
                    tracing::error!(
                        %product_id,
                        quantity,
                        %cause,
                        "could not release stock, compensation left pending"
                    );
                    return Ok(false);
                }
            }

            order.lines[index].reservation = LineReservation::Unreserved;
            order.touch();
            self.orders.save(order).await?;
        }

        let previous = order.status;
        order.status = OrderStatus::Cancelled;
        order.saga_state = SagaState::Failed;
        order.touch();
        self.orders.save(order).await?;

        tracing::info!(order_id = %order.id, "order cancelled after compensation");
        self.publish_status_change(order, previous, Some(reason.to_string()))
            .await;
        Ok(true)
    }

    /// Resumes every order whose placement saga was interrupted.
    ///
    /// Fully reserved orders are confirmed. Orders caught while reserving
    /// or compensating give their reservations back, in-doubt lines
    /// included, and are cancelled.
    #[tracing::instrument(skip(self))]
    pub async fn recover_incomplete(&self) -> Result<RecoveryReport, WorkflowError> {
        let mut report = RecoveryReport::default();

        for mut order in self.orders.list_incomplete().await? {
            tracing::info!(order_id = %order.id, saga_state = %order.saga_state, "recovering order");

            match order.saga_state {
                SagaState::Reserved => {
                    self.confirm(&mut order).await?;
                    report.confirmed += 1;
                }
                SagaState::Reserving | SagaState::Compensating => {
                    if self
                        .compensate(&mut order, "Placement interrupted")
                        .await?
                    {
                        report.failed += 1;
                    } else {
                        report.pending += 1;
                    }
                }
                SagaState::Confirmed | SagaState::Failed => {}
            }
        }

        if report != RecoveryReport::default() {
            tracing::info!(
                confirmed = report.confirmed,
                failed = report.failed,
                pending = report.pending,
                "recovered interrupted orders"
            );
        }
        Ok(report)
    }

    /// Sets `status` regardless of the current one and publishes
    /// `order.status.updated`.
    #[tracing::instrument(skip(self, reason), fields(order_id = %id))]
    pub async fn update_status(
        &self,
        id: OrderId,
        status: OrderStatus,
        reason: Option<String>,
    ) -> Result<Order, WorkflowError> {
        let mut order = self.get_order(id).await?;
        let previous = order.status;

        order.status = status;
        order.touch();
        self.orders.save(&order).await?;

        tracing::info!(%previous, current = %status, "order status updated");
        self.publish_status_change(&order, previous, reason).await;
        Ok(order)
    }

    pub async fn cancel_order(
        &self,
        id: OrderId,
        reason: Option<String>,
    ) -> Result<Order, WorkflowError> {
        let reason = reason
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| DEFAULT_CANCEL_REASON.to_string());
        self.update_status(id, OrderStatus::Cancelled, Some(reason))
            .await
    }

    pub async fn get_order(&self, id: OrderId) -> Result<Order, WorkflowError> {
        self.orders
            .get(id)
            .await?
            .ok_or(WorkflowError::NotFound(id))
    }

    pub async fn list_all(&self) -> Result<Vec<Order>, WorkflowError> {
        Ok(self.orders.list_all().await?)
    }

    pub async fn list_by_customer(
        &self,
        customer_id: &CustomerId,
    ) -> Result<Vec<Order>, WorkflowError> {
        Ok(self.orders.list_by_customer(customer_id).await?)
    }

    pub async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>, WorkflowError> {
        Ok(self.orders.list_by_status(status).await?)
    }

    /// `limit` must lie in `1..=100`.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Order>, WorkflowError> {
        if !(1..=MAX_RECENT_LIMIT).contains(&limit) {
            return Err(WorkflowError::InvalidLimit {
                max: MAX_RECENT_LIMIT,
            });
        }
        Ok(self.orders.list_recent(limit).await?)
    }

    pub async fn list_in_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Order>, WorkflowError> {
        check_period(start, end)?;
        Ok(self.orders.list_in_period(start, end).await?)
    }

    /// Sum of non-cancelled order totals created within `[start, end]`.
    pub async fn total_sales_in_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Money, WorkflowError> {
        check_period(start, end)?;
        Ok(self.orders.total_sales_in_period(start, end).await?)
    }

    async fn publish_status_change(
        &self,
        order: &Order,
        previous: OrderStatus,
        reason: Option<String>,
    ) {
        let message = OrderStatusUpdatedMessage {
            order_id: order.id,
            previous_status: previous.to_string(),
            current_status: order.status.to_string(),
            reason,
            updated_at: order.updated_at,
        };
        self.publisher
            .publish_or_warn(topics::ORDER_STATUS_UPDATED, &message)
            .await;
    }
}

fn check_period(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<(), WorkflowError> {
    if start > end {
        return Err(WorkflowError::InvalidPeriod);
    }
    Ok(())
}

/// Shape checks that need no lookups.
fn validate_request(
    lines: &[LineRequest],
    notes: &str,
) -> Result<Vec<(ProductId, u32)>, WorkflowError> {
    if lines.is_empty() {
        return Err(WorkflowError::Validation(vec![
            "Order must contain at least one item".to_string(),
        ]));
    }

    let mut errors = Vec::new();
    let mut requested = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity <= 0 {
            errors.push(format!(
                "Quantity for product ID {} must be greater than zero",
                line.product_id
            ));
            continue;
        }
        match u32::try_from(line.quantity) {
            Ok(quantity) if quantity <= MAX_LINE_QUANTITY => {
                requested.push((ProductId::new(line.product_id), quantity));
            }
            _ => errors.push(format!(
                "Quantity for product ID {} must be at most {MAX_LINE_QUANTITY}",
                line.product_id
            )),
        }
    }
    if notes.len() > MAX_NOTES_LEN {
        errors.push(format!("Notes must be at most {MAX_NOTES_LEN} characters"));
    }

    if errors.is_empty() {
        Ok(requested)
    } else {
        Err(WorkflowError::Validation(errors))
    }
}
