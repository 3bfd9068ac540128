//! Settled orders and their status machine.

use chrono::{DateTime, Utc};
use common::{Money, OrderId, PaymentReference, SkuId};
use serde::{Deserialize, Serialize};

/// The fulfillment status of a settled order.
///
/// Status transitions:
/// ```text
/// Pending ──► Paid ──► Processing ──► Shipped ──► Delivered
///    │         │           │            │            │
///    │         │           │            │            └──► Refunded
///    └─────────┴───────────┴────────────┴──► Cancelled
///                                       (Paid and later may also refund)
/// ```
///
/// Settlement creates orders directly in `Paid`; later transitions are
/// driven by the surrounding admin console one step at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    /// Created but payment not yet confirmed.
    Pending,

    /// Payment confirmed; this is the status settlement writes.
    Paid,

    /// Being picked and packed.
    Processing,

    /// Handed to the carrier.
    Shipped,

    /// Received by the customer.
    Delivered,

    /// Cancelled before delivery (terminal).
    Cancelled,

    /// Payment returned to the customer (terminal).
    Refunded,
}

impl OrderStatus {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Cancelled | OrderStatus::Refunded)
    }

    /// Returns true if `next` is a legal transition from this status.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Paid)
                | (Paid, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Pending | Paid | Processing | Shipped, Cancelled)
                | (Paid | Processing | Shipped | Delivered, Refunded)
        )
    }

    /// Returns the status name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Refunded => "refunded",
        }
    }

    /// Parses a stored status name.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(OrderStatus::Pending),
            "paid" => Some(OrderStatus::Paid),
            "processing" => Some(OrderStatus::Processing),
            "shipped" => Some(OrderStatus::Shipped),
            "delivered" => Some(OrderStatus::Delivered),
            "cancelled" => Some(OrderStatus::Cancelled),
            "refunded" => Some(OrderStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An immutable order line, snapshotted from a reservation at settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub sku: SkuId,
    pub quantity: u32,
    /// Price per unit at settlement time; later catalog price changes do
    /// not touch this.
    pub unit_price: Money,
}

impl OrderLine {
    /// Returns the total price for this line.
    pub fn line_total(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A durable order created exactly once per successfully paid cart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: OrderId,
    /// The payment collaborator's idempotency key; unique across all
    /// orders.
    pub payment_reference: PaymentReference,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    /// Lines ordered by SKU for deterministic output.
    pub lines: Vec<OrderLine>,
}

impl Order {
    /// Returns the total price across all lines.
    pub fn total(&self) -> Money {
        self.lines.iter().map(OrderLine::line_total).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_chain_advances_one_step_at_a_time() {
        assert!(OrderStatus::Pending.can_transition_to(OrderStatus::Paid));
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Processing));
        assert!(OrderStatus::Processing.can_transition_to(OrderStatus::Shipped));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Delivered));

        assert!(!OrderStatus::Pending.can_transition_to(OrderStatus::Shipped));
        assert!(!OrderStatus::Paid.can_transition_to(OrderStatus::Delivered));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn cancel_and_refund_are_terminal_side_branches() {
        assert!(OrderStatus::Paid.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Shipped.can_transition_to(OrderStatus::Cancelled));
        assert!(OrderStatus::Delivered.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Delivered.can_transition_to(OrderStatus::Cancelled));

        assert!(OrderStatus::Cancelled.is_terminal());
        assert!(OrderStatus::Refunded.is_terminal());
        assert!(!OrderStatus::Cancelled.can_transition_to(OrderStatus::Refunded));
        assert!(!OrderStatus::Refunded.can_transition_to(OrderStatus::Paid));
    }

    #[test]
    fn status_roundtrips_through_storage_form() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::Paid,
            OrderStatus::Processing,
            OrderStatus::Shipped,
            OrderStatus::Delivered,
            OrderStatus::Cancelled,
            OrderStatus::Refunded,
        ] {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(OrderStatus::parse("archived"), None);
    }

    #[test]
    fn order_total_sums_line_totals() {
        let order = Order {
            id: OrderId::new(),
            payment_reference: PaymentReference::new("pay_1"),
            status: OrderStatus::Paid,
            created_at: Utc::now(),
            lines: vec![
                OrderLine {
                    sku: SkuId::new("SKU-1"),
                    quantity: 3,
                    unit_price: Money::from_cents(100),
                },
                OrderLine {
                    sku: SkuId::new("SKU-2"),
                    quantity: 1,
                    unit_price: Money::from_cents(995),
                },
            ],
        };

        assert_eq!(order.total(), Money::from_cents(1295));
    }
}
