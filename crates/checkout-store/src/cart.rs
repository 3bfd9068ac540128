//! Cart records, status machine, and read views.

use chrono::{DateTime, Duration, Utc};
use common::{CartId, Money, SkuId};
use serde::{Deserialize, Serialize};

/// The stored state of a cart.
///
/// State transitions:
/// ```text
/// Active ──(settle)──► Settled
///    │
///    └──(expiry passes, reclaimer wins)──► Reclaimed
/// ```
///
/// "Expired" is not a stored status: an `Active` cart whose `expires_at`
/// has passed is expired, and stays in that condition until the reclaimer
/// converts it to `Reclaimed` or a settlement race it already lost finds it
/// gone. `Settled` and `Reclaimed` are terminal and mutually exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CartStatus {
    /// The cart can accept reservation changes until its expiry.
    #[default]
    Active,

    /// Converted into an order (terminal).
    Settled,

    /// Expired and its stock returned to the ledger (terminal).
    Reclaimed,
}

impl CartStatus {
    /// Returns true if this is a terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, CartStatus::Settled | CartStatus::Reclaimed)
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            CartStatus::Active => "active",
            CartStatus::Settled => "settled",
            CartStatus::Reclaimed => "reclaimed",
        }
    }

    /// Parses a stored status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(CartStatus::Active),
            "settled" => Some(CartStatus::Settled),
            "reclaimed" => Some(CartStatus::Reclaimed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CartStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A stored cart row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartRecord {
    pub id: CartId,
    pub status: CartStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CartRecord {
    /// Returns true if the cart is active and not yet expired at `now`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.status == CartStatus::Active && self.expires_at > now
    }

    /// Returns true if the cart is active but past its expiry at `now`,
    /// i.e. eligible for reclamation.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == CartStatus::Active && self.expires_at <= now
    }
}

/// One reserved line in a cart view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    pub sku: SkuId,
    pub quantity: u32,
    /// Price per unit at read time; settlement snapshots this into the
    /// order line.
    pub unit_price: Money,
}

impl CartLine {
    /// Returns the total price for this line.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// Read-only snapshot of a live cart, as returned by the public cart
/// operations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartView {
    pub cart_id: CartId,
    /// Lines ordered by SKU for deterministic output.
    pub lines: Vec<CartLine>,
    pub expires_at: DateTime<Utc>,
}

impl CartView {
    /// Returns the remaining time before the cart expires, zero if already
    /// past expiry.
    pub fn time_to_expiry(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Returns the reserved quantity for a SKU, zero if not in the cart.
    pub fn quantity_of(&self, sku: &SkuId) -> u32 {
        self.lines
            .iter()
            .find(|line| &line.sku == sku)
            .map(|line| line.quantity)
            .unwrap_or(0)
    }

    /// Returns the total price across all lines.
    pub fn total(&self) -> Money {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    /// Returns true if the cart holds no reservations.
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!CartStatus::Active.is_terminal());
        assert!(CartStatus::Settled.is_terminal());
        assert!(CartStatus::Reclaimed.is_terminal());
    }

    #[test]
    fn status_roundtrips_through_storage_form() {
        for status in [CartStatus::Active, CartStatus::Settled, CartStatus::Reclaimed] {
            assert_eq!(CartStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(CartStatus::parse("abandoned"), None);
    }

    #[test]
    fn cart_is_live_until_the_expiry_instant() {
        let now = Utc::now();
        let cart = CartRecord {
            id: CartId::new(),
            status: CartStatus::Active,
            created_at: now,
            expires_at: now + Duration::minutes(30),
        };

        assert!(cart.is_live(now));
        assert!(!cart.is_expired(now));
        assert!(!cart.is_live(now + Duration::minutes(30)));
        assert!(cart.is_expired(now + Duration::minutes(30)));
    }

    #[test]
    fn terminal_cart_is_neither_live_nor_expired() {
        let now = Utc::now();
        let cart = CartRecord {
            id: CartId::new(),
            status: CartStatus::Settled,
            created_at: now - Duration::minutes(10),
            expires_at: now - Duration::minutes(5),
        };

        assert!(!cart.is_live(now));
        assert!(!cart.is_expired(now));
    }

    #[test]
    fn view_reports_remaining_ttl_clamped_at_zero() {
        let now = Utc::now();
        let view = CartView {
            cart_id: CartId::new(),
            lines: vec![],
            expires_at: now + Duration::minutes(10),
        };

        assert_eq!(view.time_to_expiry(now), Duration::minutes(10));
        assert_eq!(
            view.time_to_expiry(now + Duration::minutes(15)),
            Duration::zero()
        );
    }

    #[test]
    fn view_totals_sum_line_totals() {
        let view = CartView {
            cart_id: CartId::new(),
            lines: vec![
                CartLine {
                    sku: SkuId::new("SKU-1"),
                    quantity: 2,
                    unit_price: Money::from_cents(500),
                },
                CartLine {
                    sku: SkuId::new("SKU-2"),
                    quantity: 1,
                    unit_price: Money::from_cents(250),
                },
            ],
            expires_at: Utc::now(),
        };

        assert_eq!(view.total(), Money::from_cents(1250));
        assert_eq!(view.quantity_of(&SkuId::new("SKU-1")), 2);
        assert_eq!(view.quantity_of(&SkuId::new("SKU-9")), 0);
    }
}
