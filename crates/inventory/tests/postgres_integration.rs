//! PostgreSQL ledger integration tests.
//!
//! These tests share one PostgreSQL container and need Docker. Run with:
//!
//! ```bash
//! cargo test -p inventory --test postgres_integration -- --ignored --test-threads=1
//! ```

use std::sync::Arc;

use common::ProductId;
use inventory::{
    NewProduct, PostgresProductStore, ProductStore, ProductStoreExt, ProductUpdate,
    ReservationRelease, StockDecrement,
};
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();
            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();
            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/inventory/001_create_products.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/inventory/002_create_stock_reservations.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn get_test_store() -> PostgresProductStore {
    let info = get_container_info().await;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE products, stock_reservations RESTART IDENTITY")
        .execute(&pool)
        .await
        .unwrap();

    PostgresProductStore::new(pool)
}

fn new_product(name: &str, stock: i64) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        description: format!("{name} description"),
        price_cents: 1_500,
        stock_quantity: stock,
    }
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_insert_and_get() {
    let store = get_test_store().await;
    let created = store.insert(new_product("Keyboard", 4)).await.unwrap();

    let loaded = store.get(created.id).await.unwrap().unwrap();
    assert_eq!(loaded.name, "Keyboard");
    assert_eq!(loaded.price.cents(), 1_500);
    assert_eq!(loaded.stock_quantity, 4);
    assert!(loaded.active);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_decrement_never_goes_negative() {
    let store = get_test_store().await;
    let p = store.insert(new_product("Mouse", 2)).await.unwrap();

    let outcome = store.decrement_stock(p.id, 3).await.unwrap();
    assert_eq!(outcome, StockDecrement::Insufficient { available: 2 });

    let outcome = store.decrement_stock(p.id, 2).await.unwrap();
    assert!(outcome.is_applied());
    assert_eq!(store.get(p.id).await.unwrap().unwrap().stock_quantity, 0);

    let missing = store.decrement_stock(ProductId::new(9_999), 1).await.unwrap();
    assert_eq!(missing, StockDecrement::NotFound);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_decrements_on_last_unit() {
    let store = Arc::new(get_test_store().await);
    let p = store.insert(new_product("Last One", 1)).await.unwrap();
    let id = p.id;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.decrement_stock(id, 1).await.unwrap()
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if handle.await.unwrap().is_applied() {
            applied += 1;
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(store.get(id).await.unwrap().unwrap().stock_quantity, 0);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_deactivate_hides_product_but_release_still_lands() {
    let store = get_test_store().await;
    let p = store.insert(new_product("Retired", 1)).await.unwrap();

    assert!(store.deactivate(p.id).await.unwrap());
    assert!(store.get(p.id).await.unwrap().is_none());
    assert!(!store.has_sufficient_stock(p.id, 1).await.unwrap());

    let levels = store.increment_stock(p.id, 2).await.unwrap().unwrap();
    assert_eq!(levels.previous, 1);
    assert_eq!(levels.current, 3);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_update_and_search() {
    let store = get_test_store().await;
    let p = store.insert(new_product("Headset", 1)).await.unwrap();
    store.insert(new_product("Monitor", 1)).await.unwrap();

    let update = ProductUpdate {
        stock_quantity: Some(6),
        ..ProductUpdate::default()
    };
    let (updated, levels) = store.update(p.id, update).await.unwrap().unwrap();
    assert_eq!(updated.stock_quantity, 6);
    assert_eq!(levels.previous, 1);

    let found = store.search("HEAD").await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, p.id);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_keyed_reservation_and_release() {
    let store = get_test_store().await;
    let p = store.insert(new_product("Dock", 10)).await.unwrap();

    assert!(store.reserve_stock("order-1-line-0", p.id, 3).await.unwrap().is_applied());
    assert_eq!(
        store.reserve_stock("order-1-line-0", p.id, 3).await.unwrap(),
        StockDecrement::AlreadyReserved
    );
    assert_eq!(store.get(p.id).await.unwrap().unwrap().stock_quantity, 7);

    let released = store.release_reservation("order-1-line-0", p.id, 3).await.unwrap();
    assert!(matches!(released, ReservationRelease::Released { product_id, .. } if product_id == p.id));
    assert_eq!(
        store.release_reservation("order-1-line-0", p.id, 3).await.unwrap(),
        ReservationRelease::AlreadyReleased
    );
    assert_eq!(store.get(p.id).await.unwrap().unwrap().stock_quantity, 10);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_refused_reservation_keeps_key_open() {
    let store = get_test_store().await;
    let p = store.insert(new_product("Cable", 2)).await.unwrap();

    assert_eq!(
        store.reserve_stock("order-2-line-0", p.id, 5).await.unwrap(),
        StockDecrement::Insufficient { available: 2 }
    );
    assert!(store.reserve_stock("order-2-line-0", p.id, 2).await.unwrap().is_applied());
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_release_before_reservation_closes_key() {
    let store = get_test_store().await;
    let p = store.insert(new_product("Hub", 5)).await.unwrap();

    assert_eq!(
        store.release_reservation("order-3-line-0", p.id, 2).await.unwrap(),
        ReservationRelease::NothingReserved
    );
    assert_eq!(
        store.reserve_stock("order-3-line-0", p.id, 2).await.unwrap(),
        StockDecrement::Revoked
    );
    assert_eq!(store.get(p.id).await.unwrap().unwrap().stock_quantity, 5);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_reservations_with_one_key_apply_once() {
    let store = Arc::new(get_test_store().await);
    let p = store.insert(new_product("Lamp", 10)).await.unwrap();
    let id = p.id;

    let mut handles = Vec::new();
    for _ in 0..6 {
        let store = store.clone();
        handles.push(tokio::spawn(async move {
            store.reserve_stock("order-4-line-0", id, 2).await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if let Ok(outcome) = handle.await.unwrap() {
            if outcome.is_applied() {
                applied += 1;
            }
        }
    }

    assert_eq!(applied, 1);
    assert_eq!(store.get(id).await.unwrap().unwrap().stock_quantity, 8);
}
