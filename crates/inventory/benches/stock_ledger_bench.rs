use common::ProductId;
use criterion::{Criterion, criterion_group, criterion_main};
use inventory::{InMemoryProductStore, NewProduct, ProductStore, ProductStoreExt};

fn new_product(name: &str, stock: i64) -> NewProduct {
    NewProduct {
        name: name.to_string(),
        description: String::new(),
        price_cents: 999,
        stock_quantity: stock,
    }
}

async fn seeded_store(count: usize) -> (InMemoryProductStore, Vec<ProductId>) {
    let store = InMemoryProductStore::new();
    let mut ids = Vec::with_capacity(count);
    for i in 0..count {
        let p = store
            .insert(new_product(&format!("Product {i:04}"), 1_000_000))
            .await
            .unwrap();
        ids.push(p.id);
    }
    (store, ids)
}

fn bench_decrement_single(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, ids) = rt.block_on(seeded_store(1));
    let id = ids[0];

    c.bench_function("stock_ledger/decrement_single", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.decrement_stock(id, 1).await.unwrap();
            });
        });
    });
}

fn bench_decrement_then_release(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, ids) = rt.block_on(seeded_store(1));
    let id = ids[0];

    c.bench_function("stock_ledger/decrement_then_release", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.decrement_stock(id, 2).await.unwrap();
                store.increment_stock(id, 2).await.unwrap();
            });
        });
    });
}

fn bench_has_sufficient_stock(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, ids) = rt.block_on(seeded_store(100));
    let id = ids[50];

    c.bench_function("stock_ledger/has_sufficient_stock", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.has_sufficient_stock(id, 5).await.unwrap();
            });
        });
    });
}

fn bench_search_1000(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let (store, _) = rt.block_on(seeded_store(1_000));

    c.bench_function("stock_ledger/search_1000_products", |b| {
        b.iter(|| {
            rt.block_on(async {
                store.search("product 09").await.unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_decrement_single,
    bench_decrement_then_release,
    bench_has_sufficient_stock,
    bench_search_1000
);
criterion_main!(benches);
