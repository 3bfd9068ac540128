//! PostgreSQL integration tests
//!
//! These tests share one PostgreSQL container for efficiency and are
//! serialized because every test truncates the tables.

use std::sync::Arc;

use checkout_store::{CheckoutError, CheckoutStore, OrderStatus, PostgresCheckoutStore};
use chrono::{DateTime, Duration, Utc};
use common::{CartId, Money, PaymentReference, SkuId};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            // Create a temporary pool just for the schema
            let temp_pool = PgPool::connect(&connection_string).await.unwrap();

            sqlx::raw_sql(include_str!(
                "../../../migrations/001_create_checkout_tables.sql"
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

/// Get a fresh store with its own pool and cleared tables
async fn get_test_store() -> PostgresCheckoutStore {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE reservations, order_items, orders, carts, skus CASCADE")
        .execute(&pool)
        .await
        .unwrap();

    PostgresCheckoutStore::new(pool)
}

fn in_minutes(now: DateTime<Utc>, minutes: i64) -> DateTime<Utc> {
    now + Duration::minutes(minutes)
}

async fn seed(store: &PostgresCheckoutStore, sku: &str, available: u32) -> SkuId {
    let sku = SkuId::new(sku);
    store
        .upsert_sku(&sku, available, Money::from_cents(500))
        .await
        .unwrap();
    sku
}

async fn available(store: &PostgresCheckoutStore, sku: &SkuId) -> u32 {
    store.stock_level(sku).await.unwrap().unwrap().available
}

#[tokio::test]
#[serial]
async fn add_update_remove_roundtrip() {
    let store = get_test_store().await;
    let sku = seed(&store, "SKU-1", 10).await;
    let now = Utc::now();
    let cart_id = CartId::new();

    let view = store
        .add_item(cart_id, &sku, 3, now, in_minutes(now, 30))
        .await
        .unwrap();
    assert_eq!(view.quantity_of(&sku), 3);
    assert_eq!(available(&store, &sku).await, 7);

    let view = store.update_quantity(cart_id, &sku, 1, now).await.unwrap();
    assert_eq!(view.quantity_of(&sku), 1);
    assert_eq!(available(&store, &sku).await, 9);

    let view = store.remove_item(cart_id, &sku, now).await.unwrap();
    assert!(view.is_empty());
    assert_eq!(available(&store, &sku).await, 10);
}

#[tokio::test]
#[serial]
async fn add_item_failure_rolls_back_everything() {
    let store = get_test_store().await;
    let sku = seed(&store, "SKU-1", 2).await;
    let now = Utc::now();
    let cart_id = CartId::new();

    let err = store
        .add_item(cart_id, &sku, 3, now, in_minutes(now, 30))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CheckoutError::OutOfStock {
            requested: 3,
            available: 2,
            ..
        }
    ));

    assert_eq!(available(&store, &sku).await, 2);
    // The cart insert rolled back with the reservation.
    let err = store.get_cart(cart_id, now).await.unwrap_err();
    assert!(matches!(err, CheckoutError::CartExpiredOrMissing(_)));
}

#[tokio::test]
#[serial]
async fn add_item_slides_expiry_forward() {
    let store = get_test_store().await;
    let sku = seed(&store, "SKU-1", 10).await;
    let now = Utc::now();
    let cart_id = CartId::new();

    store
        .add_item(cart_id, &sku, 1, now, in_minutes(now, 30))
        .await
        .unwrap();
    let later = in_minutes(now, 10);
    let view = store
        .add_item(cart_id, &sku, 1, later, in_minutes(later, 30))
        .await
        .unwrap();
    assert_eq!(view.expires_at, in_minutes(later, 30));

    // Reads do not slide it back or forward.
    let view = store.get_cart(cart_id, later).await.unwrap();
    assert_eq!(view.expires_at, in_minutes(later, 30));
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn no_oversell_under_concurrent_unit_adds() {
    let store = get_test_store().await;
    let nominal = 5u32;
    let sku = seed(&store, "SKU-HOT", nominal).await;
    let now = Utc::now();

    let mut handles = Vec::new();
    for _ in 0..nominal + 5 {
        let store = store.clone();
        let sku = sku.clone();
        handles.push(tokio::spawn(async move {
            store
                .add_item(CartId::new(), &sku, 1, now, now + Duration::minutes(30))
                .await
        }));
    }

    let mut successes = 0u32;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(CheckoutError::OutOfStock { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, nominal);
    assert_eq!(available(&store, &sku).await, 0);
}

#[tokio::test]
#[serial]
async fn settle_is_idempotent_and_keeps_the_decrement() {
    let store = get_test_store().await;
    let sku = seed(&store, "SKU-1", 5).await;
    let now = Utc::now();
    let cart_id = CartId::new();
    let reference = PaymentReference::new("pay_123");

    store
        .add_item(cart_id, &sku, 2, now, in_minutes(now, 30))
        .await
        .unwrap();
    let order = store.settle(cart_id, &reference, now).await.unwrap();
    assert_eq!(order.status, OrderStatus::Paid);
    assert_eq!(order.lines.len(), 1);
    assert_eq!(order.total(), Money::from_cents(1000));
    assert_eq!(available(&store, &sku).await, 3);

    // Duplicate webhook after the cart row is terminal.
    let replay = store
        .settle(cart_id, &reference, in_minutes(now, 5))
        .await
        .unwrap();
    assert_eq!(replay.id, order.id);
    assert_eq!(available(&store, &sku).await, 3);

    // A different payment for the same cart is rejected.
    let err = store
        .settle(cart_id, &PaymentReference::new("pay_456"), now)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::AlreadySettled(_)));

    let found = store
        .find_order_by_reference(&reference)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(found.id, order.id);
    assert_eq!(found.lines, order.lines);
}

#[tokio::test]
#[serial]
async fn same_reference_across_carts_returns_the_first_order() {
    let store = get_test_store().await;
    let sku = seed(&store, "SKU-1", 5).await;
    let now = Utc::now();
    let reference = PaymentReference::new("pay_dup");

    let cart_a = CartId::new();
    let cart_b = CartId::new();
    store
        .add_item(cart_a, &sku, 1, now, in_minutes(now, 30))
        .await
        .unwrap();
    store
        .add_item(cart_b, &sku, 1, now, in_minutes(now, 30))
        .await
        .unwrap();

    let order_a = store.settle(cart_a, &reference, now).await.unwrap();
    // The reference is the idempotency key: replaying it against another
    // cart returns the original order and leaves cart B untouched.
    let replay = store.settle(cart_b, &reference, now).await.unwrap();
    assert_eq!(replay.id, order_a.id);

    let view = store.get_cart(cart_b, now).await.unwrap();
    assert_eq!(view.quantity_of(&sku), 1);
}

#[tokio::test]
#[serial]
async fn reclaim_returns_stock_exactly_once() {
    let store = get_test_store().await;
    let sku = seed(&store, "SKU-1", 5).await;
    let now = Utc::now();
    let cart_id = CartId::new();

    store
        .add_item(cart_id, &sku, 2, now, in_minutes(now, 30))
        .await
        .unwrap();

    let late = in_minutes(now, 31);
    let expired = store.list_expired(late, 100).await.unwrap();
    assert_eq!(expired, vec![cart_id]);

    let reclaimed = store.reclaim_cart(cart_id, late).await.unwrap().unwrap();
    assert_eq!(reclaimed.units_returned, 2);
    assert_eq!(available(&store, &sku).await, 5);

    // Second pass: nothing to do.
    assert!(store.reclaim_cart(cart_id, late).await.unwrap().is_none());
    assert_eq!(available(&store, &sku).await, 5);

    // A reclaimed cart cannot settle.
    let err = store
        .settle(cart_id, &PaymentReference::new("pay_late"), late)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::CartExpiredOrMissing(_)));
}

#[tokio::test]
#[serial]
async fn settle_rejects_expired_cart_before_reclamation() {
    let store = get_test_store().await;
    let sku = seed(&store, "SKU-1", 5).await;
    let now = Utc::now();
    let cart_id = CartId::new();

    store
        .add_item(cart_id, &sku, 2, now, in_minutes(now, 30))
        .await
        .unwrap();

    let err = store
        .settle(cart_id, &PaymentReference::new("pay_1"), in_minutes(now, 31))
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::CartExpiredOrMissing(_)));
    // Nothing moved: the reclaimer still owns the reversal.
    assert_eq!(available(&store, &sku).await, 3);
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn settle_and_reclaim_race_has_exactly_one_winner() {
    let store = get_test_store().await;
    let sku = seed(&store, "SKU-1", 5).await;
    let now = Utc::now();
    let cart_id = CartId::new();
    let reference = PaymentReference::new("pay_race");

    store
        .add_item(cart_id, &sku, 2, now, in_minutes(now, 30))
        .await
        .unwrap();

    // Models the expiry boundary: the settling handler's clock still sees
    // the cart live while the reclaimer's clock sees it expired. The cart
    // row lock decides the winner; the loser observes a terminal cart.
    let settle_handle = {
        let store = store.clone();
        let reference = reference.clone();
        tokio::spawn(async move { store.settle(cart_id, &reference, now).await })
    };
    let reclaim_handle = {
        let store = store.clone();
        let late = in_minutes(now, 31);
        tokio::spawn(async move { store.reclaim_cart(cart_id, late).await })
    };

    let settle_result = settle_handle.await.unwrap();
    let reclaim_result = reclaim_handle.await.unwrap().unwrap();

    match (&settle_result, &reclaim_result) {
        // Settlement committed first; the reclaimer found the cart
        // terminal and did nothing.
        (Ok(order), None) => {
            assert_eq!(order.lines[0].quantity, 2);
            assert_eq!(available(&store, &sku).await, 3);
        }
        // The reclaimer won; settlement found the cart gone.
        (Err(CheckoutError::CartExpiredOrMissing(_)), Some(reclaimed)) => {
            assert_eq!(reclaimed.units_returned, 2);
            assert_eq!(available(&store, &sku).await, 5);
        }
        other => panic!("impossible race outcome: {other:?}"),
    }
}

#[tokio::test]
#[serial]
async fn order_status_chain_is_enforced() {
    let store = get_test_store().await;
    let sku = seed(&store, "SKU-1", 5).await;
    let now = Utc::now();
    let cart_id = CartId::new();

    store
        .add_item(cart_id, &sku, 1, now, in_minutes(now, 30))
        .await
        .unwrap();
    let order = store
        .settle(cart_id, &PaymentReference::new("pay_1"), now)
        .await
        .unwrap();

    let order = store
        .update_order_status(order.id, OrderStatus::Processing)
        .await
        .unwrap();
    let order = store
        .update_order_status(order.id, OrderStatus::Shipped)
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Shipped);

    let err = store
        .update_order_status(order.id, OrderStatus::Paid)
        .await
        .unwrap_err();
    assert!(matches!(err, CheckoutError::InvalidStatusTransition { .. }));

    let stored = store.get_order(order.id).await.unwrap().unwrap();
    assert_eq!(stored.status, OrderStatus::Shipped);
}

#[tokio::test]
#[serial]
async fn ledger_conservation_across_mixed_outcomes() {
    let store = get_test_store().await;
    let nominal = 20u32;
    let sku = seed(&store, "SKU-1", nominal).await;
    let now = Utc::now();

    let settled_cart = CartId::new();
    let live_cart = CartId::new();
    let abandoned_cart = CartId::new();

    store
        .add_item(settled_cart, &sku, 4, now, in_minutes(now, 30))
        .await
        .unwrap();
    store
        .add_item(live_cart, &sku, 3, now, in_minutes(now, 30))
        .await
        .unwrap();
    store
        .add_item(abandoned_cart, &sku, 5, now, in_minutes(now, 1))
        .await
        .unwrap();

    let reference = PaymentReference::new("pay_1");
    store.settle(settled_cart, &reference, now).await.unwrap();
    store
        .reclaim_cart(abandoned_cart, in_minutes(now, 2))
        .await
        .unwrap();

    let available = available(&store, &sku).await;
    let live = store
        .get_cart(live_cart, in_minutes(now, 2))
        .await
        .unwrap()
        .quantity_of(&sku);
    let settled: u32 = store
        .find_order_by_reference(&reference)
        .await
        .unwrap()
        .unwrap()
        .lines
        .iter()
        .map(|line| line.quantity)
        .sum();

    assert_eq!(available + live + settled, nominal);
}
