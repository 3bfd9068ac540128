//! The public cart and settlement operations.

use checkout_store::{CartView, CheckoutError, CheckoutStore, Order, OrderStatus, Result, StockLevel};
use chrono::Utc;
use common::{CartId, Money, OrderId, PaymentReference, SkuId};

use crate::config::CheckoutConfig;

/// Cart lifecycle manager and settlement engine.
///
/// Generic over the storage backend so production runs against PostgreSQL
/// and tests against the in-memory store. The service owns what the store
/// does not: the wall clock, the TTL policy, input validation, and
/// observability.
pub struct CheckoutService<S: CheckoutStore> {
    store: S,
    config: CheckoutConfig,
}

impl<S: CheckoutStore> CheckoutService<S> {
    /// Creates a new service over the given store.
    pub fn new(store: S, config: CheckoutConfig) -> Self {
        Self { store, config }
    }

    /// Gets a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Reserves `quantity` units of `sku` into the cart, creating the cart
    /// on first use and sliding its expiry forward.
    #[tracing::instrument(skip(self), fields(%cart_id, %sku))]
    pub async fn add_item(&self, cart_id: CartId, sku: &SkuId, quantity: u32) -> Result<CartView> {
        if quantity == 0 {
            return Err(CheckoutError::ZeroQuantity);
        }
        let now = Utc::now();
        let expires_at = now + self.config.ttl_chrono();

        let result = self.store.add_item(cart_id, sku, quantity, now, expires_at).await;
        match &result {
            Ok(_) => metrics::counter!("cart_items_added_total").increment(1),
            Err(CheckoutError::OutOfStock { .. }) => {
                metrics::counter!("cart_out_of_stock_total").increment(1);
            }
            Err(_) => {}
        }
        result
    }

    /// Sets a line to exactly `new_quantity`; zero removes the line. Does
    /// not slide the cart's expiry.
    #[tracing::instrument(skip(self), fields(%cart_id, %sku))]
    pub async fn update_quantity(
        &self,
        cart_id: CartId,
        sku: &SkuId,
        new_quantity: u32,
    ) -> Result<CartView> {
        let result = self
            .store
            .update_quantity(cart_id, sku, new_quantity, Utc::now())
            .await;
        if let Err(CheckoutError::OutOfStock { .. }) = &result {
            metrics::counter!("cart_out_of_stock_total").increment(1);
        }
        result
    }

    /// Releases a line entirely and deletes it from the cart.
    #[tracing::instrument(skip(self), fields(%cart_id, %sku))]
    pub async fn remove_item(&self, cart_id: CartId, sku: &SkuId) -> Result<CartView> {
        self.store.remove_item(cart_id, sku, Utc::now()).await
    }

    /// Read-only cart snapshot; never slides the expiry.
    #[tracing::instrument(skip(self), fields(%cart_id))]
    pub async fn get_cart(&self, cart_id: CartId) -> Result<CartView> {
        self.store.get_cart(cart_id, Utc::now()).await
    }

    /// Converts a paid cart into an order exactly once. Replays of the
    /// same payment reference return the original order.
    #[tracing::instrument(skip(self), fields(%cart_id, reference = %payment_reference))]
    pub async fn settle(
        &self,
        cart_id: CartId,
        payment_reference: &PaymentReference,
    ) -> Result<Order> {
        let started = std::time::Instant::now();
        let result = self.store.settle(cart_id, payment_reference, Utc::now()).await;
        match &result {
            Ok(order) => {
                metrics::counter!("orders_settled_total").increment(1);
                metrics::histogram!("settle_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                tracing::info!(order_id = %order.id, "cart settled");
            }
            Err(err) => {
                tracing::warn!(error = %err, "settlement rejected");
            }
        }
        result
    }

    /// Creates or replaces a SKU's ledger row.
    #[tracing::instrument(skip(self), fields(%sku))]
    pub async fn upsert_sku(
        &self,
        sku: &SkuId,
        available: u32,
        unit_price: Money,
    ) -> Result<StockLevel> {
        self.store.upsert_sku(sku, available, unit_price).await
    }

    /// Returns the current ledger row for a SKU, if any.
    pub async fn stock_level(&self, sku: &SkuId) -> Result<Option<StockLevel>> {
        self.store.stock_level(sku).await
    }

    /// Returns an order by ID, if it exists.
    pub async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.store.get_order(order_id).await
    }

    /// Returns the order created under a payment reference, if any.
    pub async fn find_order_by_reference(
        &self,
        payment_reference: &PaymentReference,
    ) -> Result<Option<Order>> {
        self.store.find_order_by_reference(payment_reference).await
    }

    /// Advances an order along its status machine.
    #[tracing::instrument(skip(self), fields(%order_id, status = %status))]
    pub async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        self.store.update_order_status(order_id, status).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use checkout_store::InMemoryCheckoutStore;
    use std::time::Duration;

    fn service_with_ttl(ttl: Duration) -> CheckoutService<InMemoryCheckoutStore> {
        CheckoutService::new(
            InMemoryCheckoutStore::new(),
            CheckoutConfig::with_ttl(ttl),
        )
    }

    async fn seed(service: &CheckoutService<InMemoryCheckoutStore>, sku: &SkuId, quantity: u32) {
        service
            .upsert_sku(sku, quantity, Money::from_cents(500))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn zero_quantity_add_is_rejected_before_the_store() {
        let service = service_with_ttl(Duration::from_secs(1800));
        let sku = SkuId::new("SKU-1");
        seed(&service, &sku, 5).await;

        let err = service.add_item(CartId::new(), &sku, 0).await.unwrap_err();
        assert!(matches!(err, CheckoutError::ZeroQuantity));
    }

    #[tokio::test]
    async fn add_item_stamps_expiry_from_ttl() {
        let service = service_with_ttl(Duration::from_secs(1800));
        let sku = SkuId::new("SKU-1");
        seed(&service, &sku, 5).await;

        let before = Utc::now();
        let view = service.add_item(CartId::new(), &sku, 1).await.unwrap();
        let after = Utc::now();

        assert!(view.expires_at >= before + chrono::Duration::minutes(30));
        assert!(view.expires_at <= after + chrono::Duration::minutes(30));
    }

    #[tokio::test]
    async fn zero_ttl_cart_is_expired_immediately() {
        let service = service_with_ttl(Duration::ZERO);
        let sku = SkuId::new("SKU-1");
        seed(&service, &sku, 5).await;

        let cart_id = CartId::new();
        service.add_item(cart_id, &sku, 1).await.unwrap();

        let err = service.get_cart(cart_id).await.unwrap_err();
        assert!(matches!(err, CheckoutError::CartExpiredOrMissing(_)));
    }

    #[tokio::test]
    async fn full_flow_reserve_adjust_settle() {
        let service = service_with_ttl(Duration::from_secs(1800));
        let sku = SkuId::new("SKU-1");
        seed(&service, &sku, 5).await;

        let cart_id = CartId::new();
        service.add_item(cart_id, &sku, 3).await.unwrap();
        service.update_quantity(cart_id, &sku, 2).await.unwrap();

        let reference = PaymentReference::new("pay_1");
        let order = service.settle(cart_id, &reference).await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.lines[0].quantity, 2);

        let replay = service.settle(cart_id, &reference).await.unwrap();
        assert_eq!(replay.id, order.id);

        let found = service
            .find_order_by_reference(&reference)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.id, order.id);

        let level = service.stock_level(&sku).await.unwrap().unwrap();
        assert_eq!(level.available, 3);
    }
}
