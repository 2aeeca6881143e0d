use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, Money, OrderId, ProductId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::order::{LineReservation, NewOrder, Order, OrderLine, OrderStatus, SagaState};
use crate::store::OrderStore;
use crate::{OrderStoreError, Result};

const ORDER_COLUMNS: &str =
    "id, customer_id, total_cents, status, saga_state, notes, created_at, updated_at";

const LINE_COLUMNS: &str =
    "order_id, product_id, product_name, quantity, unit_price_cents, reservation";

/// PostgreSQL-backed order ledger.
///
/// An order and its lines are written in one transaction; lines keep
/// their request position.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations/sales").run(&self.pool).await
    }

    /// Maps an `orders` row. Lines are attached separately.
    fn row_to_order(row: &PgRow) -> Result<Order> {
        let id: i64 = row.try_get("id")?;
        let status: String = row.try_get("status")?;
        let saga_state: String = row.try_get("saga_state")?;
        let customer_id: String = row.try_get("customer_id")?;

        Ok(Order {
            id: OrderId::new(id),
            customer_id: CustomerId::new(customer_id),
            lines: Vec::new(),
            total: Money::from_cents(row.try_get("total_cents")?),
            status: OrderStatus::parse(&status).ok_or_else(|| OrderStoreError::CorruptRow {
                id,
                reason: format!("unknown status {status}"),
            })?,
            saga_state: SagaState::parse(&saga_state).ok_or_else(|| {
                OrderStoreError::CorruptRow {
                    id,
                    reason: format!("unknown saga state {saga_state}"),
                }
            })?,
            notes: row.try_get("notes")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_line(row: &PgRow) -> Result<OrderLine> {
        let order_id: i64 = row.try_get("order_id")?;
        let quantity: i32 = row.try_get("quantity")?;
        let quantity = u32::try_from(quantity).map_err(|_| OrderStoreError::CorruptRow {
            id: order_id,
            reason: format!("negative line quantity {quantity}"),
        })?;
        let product_id: i64 = row.try_get("product_id")?;
        let reservation: String = row.try_get("reservation")?;
        let reservation = LineReservation::parse(&reservation).ok_or_else(|| {
            OrderStoreError::CorruptRow {
                id: order_id,
                reason: format!("unknown line reservation {reservation}"),
            }
        })?;

        Ok(OrderLine {
            product_id: ProductId::new(product_id),
            product_name: row.try_get("product_name")?,
            quantity,
            unit_price: Money::from_cents(row.try_get("unit_price_cents")?),
            reservation,
        })
    }

    /// Maps order rows and loads their lines with one extra query.
    async fn with_lines(&self, rows: Vec<PgRow>) -> Result<Vec<Order>> {
        let mut orders = rows
            .iter()
            .map(Self::row_to_order)
            .collect::<Result<Vec<_>>>()?;
        if orders.is_empty() {
            return Ok(orders);
        }

        let ids: Vec<i64> = orders.iter().map(|o| o.id.as_i64()).collect();
        let line_rows = sqlx::query(&format!(
            "SELECT {LINE_COLUMNS} FROM order_lines WHERE order_id = ANY($1) \
             ORDER BY order_id, position"
        ))
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let mut lines: HashMap<i64, Vec<OrderLine>> = HashMap::new();
        for row in &line_rows {
            let order_id: i64 = row.try_get("order_id")?;
            lines
                .entry(order_id)
                .or_default()
                .push(Self::row_to_line(row)?);
        }

        for order in &mut orders {
            order.lines = lines.remove(&order.id.as_i64()).unwrap_or_default();
        }
        Ok(orders)
    }

    async fn fetch_orders(&self, sql: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        self.with_lines(rows).await
    }
}

/// Placement rejects quantities above `MAX_LINE_QUANTITY`, so the clamp
/// never changes a stored line.
fn quantity_param(quantity: u32) -> i32 {
    i32::try_from(quantity).unwrap_or(i32::MAX)
}

fn limit_param(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, order), fields(customer_id = %order.customer_id))]
    async fn insert(&self, order: NewOrder) -> Result<Order> {
        let total = order.total();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO orders (customer_id, total_cents, status, saga_state, notes)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {ORDER_COLUMNS}
            "#
        ))
        .bind(order.customer_id.as_str())
        .bind(total.cents())
        .bind(OrderStatus::Pending.as_str())
        .bind(SagaState::Reserving.as_str())
        .bind(&order.notes)
        .fetch_one(&mut *tx)
        .await?;

        let mut stored = Self::row_to_order(&row)?;

        for (position, line) in order.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO order_lines
                    (order_id, position, product_id, product_name, quantity, unit_price_cents, reservation)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(stored.id.as_i64())
            .bind(position as i32)
            .bind(line.product_id.as_i64())
            .bind(&line.product_name)
            .bind(quantity_param(line.quantity))
            .bind(line.unit_price.cents())
            .bind(line.reservation.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        stored.lines = order.lines;
        Ok(stored)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        let rows = sqlx::query(&format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"))
            .bind(id.as_i64())
            .fetch_all(&self.pool)
            .await?;

        Ok(self.with_lines(rows).await?.pop())
    }

    #[tracing::instrument(skip(self, order), fields(order_id = %order.id))]
    async fn save(&self, order: &Order) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $2, saga_state = $3, notes = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(order.id.as_i64())
        .bind(order.status.as_str())
        .bind(order.saga_state.as_str())
        .bind(&order.notes)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Ok(false);
        }

        for (position, line) in order.lines.iter().enumerate() {
            sqlx::query(
                "UPDATE order_lines SET reservation = $3 WHERE order_id = $1 AND position = $2",
            )
            .bind(order.id.as_i64())
            .bind(position as i32)
            .bind(line.reservation.as_str())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list_all(&self) -> Result<Vec<Order>> {
        self.fetch_orders(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id DESC"
        ))
        .await
    }

    async fn list_by_customer(&self, customer_id: &CustomerId) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE customer_id = $1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(customer_id.as_str())
        .fetch_all(&self.pool)
        .await?;
        self.with_lines(rows).await
    }

    async fn list_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE status = $1 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        self.with_lines(rows).await
    }

    async fn list_recent(&self, limit: usize) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders ORDER BY created_at DESC, id DESC LIMIT $1"
        ))
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await?;
        self.with_lines(rows).await
    }

    async fn list_in_period(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE created_at BETWEEN $1 AND $2 \
             ORDER BY created_at DESC, id DESC"
        ))
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        self.with_lines(rows).await
    }

    async fn list_incomplete(&self) -> Result<Vec<Order>> {
        self.fetch_orders(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders \
             WHERE saga_state NOT IN ('Confirmed', 'Failed') ORDER BY created_at, id"
        ))
        .await
    }
}
