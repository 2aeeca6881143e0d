use async_trait::async_trait;
use common::{Money, ProductId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::product::{NewProduct, Product, ProductUpdate, clamp_stock};
use crate::store::{ProductStore, ReservationRelease, StockDecrement, StockLevels};
use crate::{ProductStoreError, Result};

const PRODUCT_COLUMNS: &str =
    "id, name, description, price_cents, stock_quantity, active, created_at, updated_at";

/// PostgreSQL-backed product ledger.
///
/// Decrements are a single conditional `UPDATE`, so the stock check and
/// the write happen under the row lock Postgres takes for the update.
/// Keyed reservations claim their `stock_reservations` row in the same
/// transaction as the stock change, and the primary key serializes
/// racing calls with one key.
#[derive(Clone)]
pub struct PostgresProductStore {
    pool: PgPool,
}

impl PostgresProductStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> std::result::Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("../../migrations/inventory")
            .run(&self.pool)
            .await
    }

    fn row_to_product(row: &PgRow) -> Result<Product> {
        let id: i64 = row.try_get("id")?;
        let stock: i32 = row.try_get("stock_quantity")?;

        Ok(Product {
            id: ProductId::new(id),
            name: row.try_get("name")?,
            description: row.try_get("description")?,
            price: Money::from_cents(row.try_get("price_cents")?),
            stock_quantity: to_stock(id, stock)?,
            active: row.try_get("active")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    async fn fetch_many(&self, sql: &str, bind: Option<String>) -> Result<Vec<Product>> {
        let mut query = sqlx::query(sql);
        if let Some(value) = bind {
            query = query.bind(value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_product).collect()
    }

    async fn current_stock(&self, id: ProductId) -> Result<Option<u32>> {
        let stock: Option<i32> = sqlx::query_scalar(
            "SELECT stock_quantity FROM products WHERE id = $1 AND active",
        )
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        stock.map(|s| to_stock(id.as_i64(), s)).transpose()
    }
}

fn to_stock(id: i64, stock: i32) -> Result<u32> {
    u32::try_from(stock).map_err(|_| ProductStoreError::CorruptRow {
        id,
        reason: format!("negative stock {stock}"),
    })
}

fn quantity_param(quantity: u32) -> i32 {
    i32::try_from(quantity).unwrap_or(i32::MAX)
}

#[async_trait]
impl ProductStore for PostgresProductStore {
    async fn get(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND active"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_product).transpose()
    }

    async fn get_including_inactive(&self, id: ProductId) -> Result<Option<Product>> {
        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1"
        ))
        .bind(id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_product).transpose()
    }

    async fn list_active(&self) -> Result<Vec<Product>> {
        self.fetch_many(
            &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE active ORDER BY name, id"),
            None,
        )
        .await
    }

    async fn list_with_stock(&self) -> Result<Vec<Product>> {
        self.fetch_many(
            &format!(
                "SELECT {PRODUCT_COLUMNS} FROM products \
                 WHERE active AND stock_quantity > 0 ORDER BY name, id"
            ),
            None,
        )
        .await
    }

    async fn search(&self, term: &str) -> Result<Vec<Product>> {
        let pattern = format!("%{}%", term.trim());
        self.fetch_many(
            &format!(
                "SELECT {PRODUCT_COLUMNS} FROM products \
                 WHERE active AND (name ILIKE $1 OR description ILIKE $1) ORDER BY name, id"
            ),
            Some(pattern),
        )
        .await
    }

    async fn insert(&self, product: NewProduct) -> Result<Product> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO products (name, description, price_cents, stock_quantity)
            VALUES ($1, $2, $3, $4)
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(product.name.trim())
        .bind(&product.description)
        .bind(product.price_cents)
        .bind(quantity_param(clamp_stock(product.stock_quantity)))
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_product(&row)
    }

    async fn update(
        &self,
        id: ProductId,
        update: ProductUpdate,
    ) -> Result<Option<(Product, StockLevels)>> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {PRODUCT_COLUMNS} FROM products WHERE id = $1 AND active FOR UPDATE"
        ))
        .bind(id.as_i64())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let mut product = Self::row_to_product(&row)?;
        let previous = product.stock_quantity;
        update.apply_to(&mut product);

        let row = sqlx::query(&format!(
            r#"
            UPDATE products
            SET name = $2, description = $3, price_cents = $4, stock_quantity = $5, updated_at = NOW()
            WHERE id = $1
            RETURNING {PRODUCT_COLUMNS}
            "#
        ))
        .bind(id.as_i64())
        .bind(&product.name)
        .bind(&product.description)
        .bind(product.price.cents())
        .bind(quantity_param(product.stock_quantity))
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        let product = Self::row_to_product(&row)?;
        let levels = StockLevels {
            previous,
            current: product.stock_quantity,
        };
        Ok(Some((product, levels)))
    }

    async fn deactivate(&self, id: ProductId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE products SET active = FALSE, updated_at = NOW() WHERE id = $1 AND active",
        )
        .bind(id.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    #[tracing::instrument(skip(self), fields(product_id = %id))]
    async fn decrement_stock(&self, id: ProductId, quantity: u32) -> Result<StockDecrement> {
        let current: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $2, updated_at = NOW()
            WHERE id = $1 AND active AND stock_quantity >= $2
            RETURNING stock_quantity
            "#,
        )
        .bind(id.as_i64())
        .bind(quantity_param(quantity))
        .fetch_optional(&self.pool)
        .await?;

        if let Some(current) = current {
            let current = to_stock(id.as_i64(), current)?;
            return Ok(StockDecrement::Applied(StockLevels {
                previous: current + quantity,
                current,
            }));
        }

        // No row matched: tell missing apart from short supply.
        Ok(match self.current_stock(id).await? {
            Some(available) => StockDecrement::Insufficient { available },
            None => StockDecrement::NotFound,
        })
    }

    async fn increment_stock(&self, id: ProductId, quantity: u32) -> Result<Option<StockLevels>> {
        let current: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING stock_quantity
            "#,
        )
        .bind(id.as_i64())
        .bind(quantity_param(quantity))
        .fetch_optional(&self.pool)
        .await?;

        current
            .map(|c| {
                let current = to_stock(id.as_i64(), c)?;
                Ok(StockLevels {
                    previous: current.saturating_sub(quantity),
                    current,
                })
            })
            .transpose()
    }

    #[tracing::instrument(skip(self), fields(product_id = %id))]
    async fn reserve_stock(
        &self,
        key: &str,
        id: ProductId,
        quantity: u32,
    ) -> Result<StockDecrement> {
        let mut tx = self.pool.begin().await?;

        let claimed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO stock_reservations (reservation_key, product_id, quantity)
            VALUES ($1, $2, $3)
            ON CONFLICT (reservation_key) DO NOTHING
            RETURNING reservation_key
            "#,
        )
        .bind(key)
        .bind(id.as_i64())
        .bind(quantity_param(quantity))
        .fetch_optional(&mut *tx)
        .await?;

        if claimed.is_none() {
            let released: bool = sqlx::query_scalar(
                "SELECT released FROM stock_reservations WHERE reservation_key = $1",
            )
            .bind(key)
            .fetch_one(&mut *tx)
            .await?;
            tx.commit().await?;

            return Ok(if released {
                StockDecrement::Revoked
            } else {
                StockDecrement::AlreadyReserved
            });
        }

        let current: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity - $2, updated_at = NOW()
            WHERE id = $1 AND active AND stock_quantity >= $2
            RETURNING stock_quantity
            "#,
        )
        .bind(id.as_i64())
        .bind(quantity_param(quantity))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            // The claim goes away with the rollback, so the key stays open.
            tx.rollback().await?;
            return Ok(match self.current_stock(id).await? {
                Some(available) => StockDecrement::Insufficient { available },
                None => StockDecrement::NotFound,
            });
        };

        tx.commit().await?;

        let current = to_stock(id.as_i64(), current)?;
        Ok(StockDecrement::Applied(StockLevels {
            previous: current + quantity,
            current,
        }))
    }

    #[tracing::instrument(skip(self), fields(product_id = %id))]
    async fn release_reservation(
        &self,
        key: &str,
        id: ProductId,
        quantity: u32,
    ) -> Result<ReservationRelease> {
        let mut tx = self.pool.begin().await?;

        let closed: Option<String> = sqlx::query_scalar(
            r#"
            INSERT INTO stock_reservations
                (reservation_key, product_id, quantity, released, released_at)
            VALUES ($1, $2, $3, TRUE, NOW())
            ON CONFLICT (reservation_key) DO NOTHING
            RETURNING reservation_key
            "#,
        )
        .bind(key)
        .bind(id.as_i64())
        .bind(quantity_param(quantity))
        .fetch_optional(&mut *tx)
        .await?;

        if closed.is_some() {
            tx.commit().await?;
            return Ok(ReservationRelease::NothingReserved);
        }

        let held = sqlx::query(
            r#"
            UPDATE stock_reservations
            SET released = TRUE, released_at = NOW()
            WHERE reservation_key = $1 AND NOT released
            RETURNING product_id, quantity
            "#,
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(held) = held else {
            tx.commit().await?;
            return Ok(ReservationRelease::AlreadyReleased);
        };

        let product_id: i64 = held.try_get("product_id")?;
        let held_quantity: i32 = held.try_get("quantity")?;
        let held_quantity = to_stock(product_id, held_quantity)?;

        let current: Option<i32> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock_quantity = stock_quantity + $2, updated_at = NOW()
            WHERE id = $1
            RETURNING stock_quantity
            "#,
        )
        .bind(product_id)
        .bind(quantity_param(held_quantity))
        .fetch_optional(&mut *tx)
        .await?;

        let Some(current) = current else {
            tx.rollback().await?;
            return Err(ProductStoreError::CorruptRow {
                id: product_id,
                reason: format!("reservation {key} points at a missing product"),
            });
        };

        tx.commit().await?;

        let current = to_stock(product_id, current)?;
        Ok(ReservationRelease::Released {
            product_id: ProductId::new(product_id),
            levels: StockLevels {
                previous: current.saturating_sub(held_quantity),
                current,
            },
        })
    }
}
