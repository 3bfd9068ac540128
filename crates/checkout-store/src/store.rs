use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CartId, Money, OrderId, PaymentReference, SkuId};

use crate::{CartView, Order, OrderStatus, Result, StockLevel};

/// Largest quantity a single reservation or ledger row may carry.
///
/// Bounded by the ledger's integer column; both store implementations
/// enforce it so behavior does not diverge between backends.
pub const MAX_QUANTITY: u32 = i32::MAX as u32;

/// Outcome of reclaiming one expired cart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReclaimedCart {
    pub cart_id: CartId,
    /// Total units returned to the ledger across all of the cart's
    /// reservations.
    pub units_returned: u64,
}

/// Core trait for checkout persistence backends.
///
/// Each method is one atomic unit: the implementation must apply the whole
/// mutation inside a single transaction (or equivalent critical section),
/// so the stock ledger and the reservation store can never be observed
/// inconsistent with each other. Callers supply `now` explicitly; the store
/// never reads the wall clock.
///
/// Concurrent reservations against one SKU serialize on that SKU's ledger
/// row. The winner of two racing calls is decided by commit order, not call
/// order. A bounded lock wait that elapses surfaces as
/// [`CheckoutError::Contention`](crate::CheckoutError::Contention) with
/// nothing committed.
#[async_trait]
pub trait CheckoutStore: Send + Sync {
    /// Creates or replaces a SKU's ledger row with the given available
    /// quantity and unit price. This is the ledger-initialization surface
    /// used by catalog administration; it does not touch reservations.
    async fn upsert_sku(
        &self,
        sku: &SkuId,
        available: u32,
        unit_price: Money,
    ) -> Result<StockLevel>;

    /// Returns the current ledger row for a SKU, or None if it has none.
    async fn stock_level(&self, sku: &SkuId) -> Result<Option<StockLevel>>;

    /// Reserves `quantity` units of `sku` into the cart, creating the cart
    /// if absent (with `expires_at` as its expiry) and refreshing the
    /// expiry to `expires_at` on success (sliding TTL). An existing
    /// reservation for the same (cart, SKU) pair is increased, not
    /// replaced.
    ///
    /// Fails with `OutOfStock` when the ledger cannot cover the quantity,
    /// leaving ledger, reservations, and cart untouched.
    async fn add_item(
        &self,
        cart_id: CartId,
        sku: &SkuId,
        quantity: u32,
        now: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Result<CartView>;

    /// Sets the reservation for (cart, SKU) to exactly `new_quantity`,
    /// reserving or releasing the delta against the ledger. A failed
    /// reserve leaves the existing reservation untouched; releases cannot
    /// fail. `new_quantity == 0` is equivalent to [`remove_item`].
    /// Does not refresh the cart's expiry.
    ///
    /// [`remove_item`]: CheckoutStore::remove_item
    async fn update_quantity(
        &self,
        cart_id: CartId,
        sku: &SkuId,
        new_quantity: u32,
        now: DateTime<Utc>,
    ) -> Result<CartView>;

    /// Releases the full reserved quantity for (cart, SKU) back to the
    /// ledger and deletes the reservation. Removing a SKU the cart does
    /// not hold is a no-op success.
    async fn remove_item(&self, cart_id: CartId, sku: &SkuId, now: DateTime<Utc>)
    -> Result<CartView>;

    /// Read-only cart snapshot. Does not refresh the expiry; a cart past
    /// its expiry reads as `CartExpiredOrMissing` even before the
    /// reclaimer has run.
    async fn get_cart(&self, cart_id: CartId, now: DateTime<Utc>) -> Result<CartView>;

    /// Converts a paid cart into an order exactly once.
    ///
    /// Replaying a `payment_reference` that already produced an order
    /// returns that order unchanged, regardless of the cart's fate since.
    /// The reserved stock is not released: the decrement made at
    /// reservation time becomes the permanent sale.
    async fn settle(
        &self,
        cart_id: CartId,
        payment_reference: &PaymentReference,
        now: DateTime<Utc>,
    ) -> Result<Order>;

    /// Returns an order by ID, or None.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Returns the order created under the given payment reference, or
    /// None.
    async fn find_order_by_reference(
        &self,
        payment_reference: &PaymentReference,
    ) -> Result<Option<Order>>;

    /// Advances an order along its status machine, rejecting illegal
    /// transitions with `InvalidStatusTransition`.
    async fn update_order_status(&self, order_id: OrderId, status: OrderStatus) -> Result<Order>;

    /// Returns up to `limit` carts that are active but past expiry at
    /// `now`, oldest expiry first. A cheap unlocked scan; every candidate
    /// must be re-verified by [`reclaim_cart`] before its stock moves.
    ///
    /// [`reclaim_cart`]: CheckoutStore::reclaim_cart
    async fn list_expired(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<CartId>>;

    /// Atomically reclaims one expired cart: re-verifies that it is still
    /// active and past expiry under the cart lock, returns every reserved
    /// unit to the ledger, deletes the reservations, and marks the cart
    /// reclaimed.
    ///
    /// Takes the same per-cart lock settlement takes, so at most one of
    /// the two ever mutates a given cart. Returns None when the cart is
    /// gone, already terminal, or had its expiry refreshed since the scan
    /// — all no-ops, not errors.
    async fn reclaim_cart(&self, cart_id: CartId, now: DateTime<Utc>)
    -> Result<Option<ReclaimedCart>>;
}
