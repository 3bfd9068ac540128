use checkout_store::{CheckoutStore, InMemoryCheckoutStore};
use chrono::{Duration, Utc};
use common::{CartId, Money, PaymentReference, SkuId};
use criterion::{Criterion, criterion_group, criterion_main};

async fn seeded_store(available: u32) -> (InMemoryCheckoutStore, SkuId) {
    let store = InMemoryCheckoutStore::new();
    let sku = SkuId::new("SKU-BENCH");
    store
        .upsert_sku(&sku, available, Money::from_cents(999))
        .await
        .unwrap();
    (store, sku)
}

fn bench_add_item(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("checkout_store/add_item", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (store, sku) = seeded_store(1_000_000).await;
                let now = Utc::now();
                store
                    .add_item(CartId::new(), &sku, 1, now, now + Duration::minutes(30))
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_add_update_remove_cycle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("checkout_store/add_update_remove_cycle", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (store, sku) = seeded_store(1_000_000).await;
                let now = Utc::now();
                let cart_id = CartId::new();
                store
                    .add_item(cart_id, &sku, 5, now, now + Duration::minutes(30))
                    .await
                    .unwrap();
                store.update_quantity(cart_id, &sku, 2, now).await.unwrap();
                store.remove_item(cart_id, &sku, now).await.unwrap();
            });
        });
    });
}

fn bench_settle(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("checkout_store/settle", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (store, sku) = seeded_store(1_000_000).await;
                let now = Utc::now();
                let cart_id = CartId::new();
                store
                    .add_item(cart_id, &sku, 2, now, now + Duration::minutes(30))
                    .await
                    .unwrap();
                store
                    .settle(cart_id, &PaymentReference::new("pay_bench"), now)
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_reclaim_pass(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function("checkout_store/reclaim_100_carts", |b| {
        b.iter(|| {
            rt.block_on(async {
                let (store, sku) = seeded_store(1_000_000).await;
                let now = Utc::now();
                for _ in 0..100 {
                    store
                        .add_item(CartId::new(), &sku, 1, now, now + Duration::minutes(1))
                        .await
                        .unwrap();
                }
                let late = now + Duration::minutes(5);
                for cart_id in store.list_expired(late, 100).await.unwrap() {
                    store.reclaim_cart(cart_id, late).await.unwrap();
                }
            });
        });
    });
}

criterion_group!(
    benches,
    bench_add_item,
    bench_add_update_remove_cycle,
    bench_settle,
    bench_reclaim_pass
);
criterion_main!(benches);
