use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, Money, OrderId, PaymentReference, SkuId};
use tokio::sync::Mutex;

use crate::{
    CartLine, CartRecord, CartStatus, CartView, CheckoutError, Order, OrderLine, OrderStatus,
    Result, StockLevel,
    store::{CheckoutStore, MAX_QUANTITY, ReclaimedCart},
};

#[derive(Debug, Default)]
struct State {
    skus: HashMap<SkuId, StockLevel>,
    carts: HashMap<CartId, CartRecord>,
    // BTreeMap keeps lines in SKU order for deterministic views.
    reservations: HashMap<CartId, BTreeMap<SkuId, u32>>,
    orders: HashMap<OrderId, Order>,
    orders_by_reference: HashMap<PaymentReference, OrderId>,
}

impl State {
    fn reserve_stock(&mut self, sku: &SkuId, quantity: u32) -> Result<()> {
        if quantity > MAX_QUANTITY {
            return Err(CheckoutError::QuantityTooLarge(quantity));
        }
        let level = self
            .skus
            .get_mut(sku)
            .ok_or_else(|| CheckoutError::UnknownSku(sku.clone()))?;
        if level.available < quantity {
            return Err(CheckoutError::OutOfStock {
                sku: sku.clone(),
                requested: quantity,
                available: level.available,
            });
        }
        level.available -= quantity;
        level.version += 1;
        Ok(())
    }

    // Precondition: paired exactly once with a prior successful reserve.
    fn release_stock(&mut self, sku: &SkuId, quantity: u32) {
        if let Some(level) = self.skus.get_mut(sku) {
            level.available = level.available.saturating_add(quantity);
            level.version += 1;
        }
    }

    /// Rejects operations against carts that cannot accept mutations:
    /// settled, reclaimed, expired, or missing.
    fn check_live(&self, cart_id: CartId, now: DateTime<Utc>) -> Result<()> {
        match self.carts.get(&cart_id) {
            None => Err(CheckoutError::CartExpiredOrMissing(cart_id)),
            Some(cart) if cart.status == CartStatus::Settled => {
                Err(CheckoutError::AlreadySettled(cart_id))
            }
            Some(cart) if cart.is_live(now) => Ok(()),
            Some(_) => Err(CheckoutError::CartExpiredOrMissing(cart_id)),
        }
    }

    fn cart_view(&self, cart_id: CartId) -> CartView {
        let expires_at = self
            .carts
            .get(&cart_id)
            .map(|cart| cart.expires_at)
            .unwrap_or_default();
        let lines = self
            .reservations
            .get(&cart_id)
            .map(|lines| {
                lines
                    .iter()
                    .map(|(sku, &quantity)| CartLine {
                        sku: sku.clone(),
                        quantity,
                        unit_price: self
                            .skus
                            .get(sku)
                            .map(|level| level.unit_price)
                            .unwrap_or_default(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        CartView {
            cart_id,
            lines,
            expires_at,
        }
    }
}

/// In-memory checkout store for testing.
///
/// A single async mutex serializes whole operations, which gives the same
/// observable atomicity as the PostgreSQL implementation's transactions.
/// Not suitable for multi-process deployment; the production ledger must
/// lock at the storage layer.
#[derive(Clone, Default)]
pub struct InMemoryCheckoutStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryCheckoutStore {
    /// Creates a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of settled orders.
    pub async fn order_count(&self) -> usize {
        self.state.lock().await.orders.len()
    }

    /// Returns the total number of cart rows, terminal tombstones included.
    pub async fn cart_count(&self) -> usize {
        self.state.lock().await.carts.len()
    }

    /// Clears all state.
    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        *state = State::default();
    }
}

#[async_trait]
impl CheckoutStore for InMemoryCheckoutStore {
    async fn upsert_sku(
        &self,
        sku: &SkuId,
        available: u32,
        unit_price: Money,
    ) -> Result<StockLevel> {
        if available > MAX_QUANTITY {
            return Err(CheckoutError::QuantityTooLarge(available));
        }
        let mut state = self.state.lock().await;
        let level = state
            .skus
            .entry(sku.clone())
            .and_modify(|level| {
                level.available = available;
                level.unit_price = unit_price;
                level.version += 1;
            })
            .or_insert_with(|| StockLevel {
                sku: sku.clone(),
                available,
                version: 0,
                unit_price,
            });
        Ok(level.clone())
    }

    async fn stock_level(&self, sku: &SkuId) -> Result<Option<StockLevel>> {
        let state = self.state.lock().await;
        Ok(state.skus.get(sku).cloned())
    }

    async fn add_item(
        &self,
        cart_id: CartId,
        sku: &SkuId,
        quantity: u32,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<CartView> {
        let mut state = self.state.lock().await;

        let cart_exists = state.carts.contains_key(&cart_id);
        if cart_exists {
            state.check_live(cart_id, now)?;
        }

        // Reserve before touching cart state so a failure leaves nothing
        // behind, matching the transactional rollback of the SQL backend.
        state.reserve_stock(sku, quantity)?;

        let cart = state.carts.entry(cart_id).or_insert_with(|| CartRecord {
            id: cart_id,
            status: CartStatus::Active,
            created_at: now,
            expires_at,
        });
        cart.expires_at = expires_at;

        let lines = state.reservations.entry(cart_id).or_default();
        *lines.entry(sku.clone()).or_insert(0) += quantity;

        Ok(state.cart_view(cart_id))
    }

    async fn update_quantity(
        &self,
        cart_id: CartId,
        sku: &SkuId,
        new_quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<CartView> {
        if new_quantity == 0 {
            return self.remove_item(cart_id, sku, now).await;
        }

        let mut state = self.state.lock().await;
        state.check_live(cart_id, now)?;

        let current = state
            .reservations
            .get(&cart_id)
            .and_then(|lines| lines.get(sku))
            .copied()
            .unwrap_or(0);

        if new_quantity > current {
            state.reserve_stock(sku, new_quantity - current)?;
        } else if new_quantity < current {
            state.release_stock(sku, current - new_quantity);
        }

        state
            .reservations
            .entry(cart_id)
            .or_default()
            .insert(sku.clone(), new_quantity);

        Ok(state.cart_view(cart_id))
    }

    async fn remove_item(
        &self,
        cart_id: CartId,
        sku: &SkuId,
        now: DateTime<Utc>,
    ) -> Result<CartView> {
        let mut state = self.state.lock().await;
        state.check_live(cart_id, now)?;

        let removed = state
            .reservations
            .get_mut(&cart_id)
            .and_then(|lines| lines.remove(sku));
        if let Some(quantity) = removed {
            state.release_stock(sku, quantity);
        }

        Ok(state.cart_view(cart_id))
    }

    async fn get_cart(&self, cart_id: CartId, now: DateTime<Utc>) -> Result<CartView> {
        let state = self.state.lock().await;
        state.check_live(cart_id, now)?;
        Ok(state.cart_view(cart_id))
    }

    async fn settle(
        &self,
        cart_id: CartId,
        payment_reference: &PaymentReference,
        now: DateTime<Utc>,
    ) -> Result<Order> {
        let mut state = self.state.lock().await;

        // Idempotent replay: a reference that already produced an order
        // returns it unchanged, even after the cart is gone.
        if let Some(order_id) = state.orders_by_reference.get(payment_reference)
            && let Some(order) = state.orders.get(order_id)
        {
            return Ok(order.clone());
        }

        let cart = state
            .carts
            .get(&cart_id)
            .ok_or(CheckoutError::CartExpiredOrMissing(cart_id))?;
        match cart.status {
            CartStatus::Settled => return Err(CheckoutError::AlreadySettled(cart_id)),
            CartStatus::Reclaimed => return Err(CheckoutError::CartExpiredOrMissing(cart_id)),
            CartStatus::Active if cart.expires_at <= now => {
                return Err(CheckoutError::CartExpiredOrMissing(cart_id));
            }
            CartStatus::Active => {}
        }

        let lines: Vec<OrderLine> = state
            .reservations
            .remove(&cart_id)
            .unwrap_or_default()
            .into_iter()
            .map(|(sku, quantity)| {
                let unit_price = state
                    .skus
                    .get(&sku)
                    .map(|level| level.unit_price)
                    .unwrap_or_default();
                OrderLine {
                    sku,
                    quantity,
                    unit_price,
                }
            })
            .collect();

        // The ledger is deliberately untouched: the decrement made at
        // reservation time becomes the permanent sale.
        let order = Order {
            id: OrderId::new(),
            payment_reference: payment_reference.clone(),
            status: OrderStatus::Paid,
            created_at: now,
            lines,
        };

        if let Some(cart) = state.carts.get_mut(&cart_id) {
            cart.status = CartStatus::Settled;
        }
        state
            .orders_by_reference
            .insert(payment_reference.clone(), order.id);
        state.orders.insert(order.id, order.clone());

        Ok(order)
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state.orders.get(&order_id).cloned())
    }

    async fn find_order_by_reference(
        &self,
        payment_reference: &PaymentReference,
    ) -> Result<Option<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .orders_by_reference
            .get(payment_reference)
            .and_then(|order_id| state.orders.get(order_id))
            .cloned())
    }

    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order> {
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&order_id)
            .ok_or(CheckoutError::OrderNotFound(order_id))?;
        if !order.status.can_transition_to(status) {
            return Err(CheckoutError::InvalidStatusTransition {
                from: order.status,
                to: status,
            });
        }
        order.status = status;
        Ok(order.clone())
    }

    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CartId>> {
        let state = self.state.lock().await;
        let mut expired: Vec<&CartRecord> = state
            .carts
            .values()
            .filter(|cart| cart.is_expired(now))
            .collect();
        expired.sort_by_key(|cart| cart.expires_at);
        Ok(expired.iter().take(limit).map(|cart| cart.id).collect())
    }

    async fn reclaim_cart(
        &self,
        cart_id: CartId,
        now: DateTime<Utc>,
    ) -> Result<Option<ReclaimedCart>> {
        let mut state = self.state.lock().await;

        // Re-verify under the lock: the cart may have settled, been
        // reclaimed by a concurrent pass, or had its expiry refreshed
        // since the candidate scan.
        match state.carts.get(&cart_id) {
            Some(cart) if cart.is_expired(now) => {}
            _ => return Ok(None),
        }

        let lines = state.reservations.remove(&cart_id).unwrap_or_default();
        let mut units_returned = 0u64;
        for (sku, quantity) in lines {
            state.release_stock(&sku, quantity);
            units_returned += u64::from(quantity);
        }
        if let Some(cart) = state.carts.get_mut(&cart_id) {
            cart.status = CartStatus::Reclaimed;
        }

        Ok(Some(ReclaimedCart {
            cart_id,
            units_returned,
        }))
    }
}
