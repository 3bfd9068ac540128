//! Stock ledger rows.

use common::{Money, SkuId};
use serde::{Deserialize, Serialize};

/// Current ledger state for one SKU.
///
/// `available` is the quantity still open for reservation; it excludes
/// units held by live carts and units consumed by settled orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLevel {
    /// The SKU this row tracks.
    pub sku: SkuId,

    /// Units currently available for reservation. Never negative by
    /// construction.
    pub available: u32,

    /// Monotonic mutation counter, bumped on every ledger write.
    pub version: i64,

    /// Current price per unit, snapshotted into order lines at settlement.
    pub unit_price: Money,
}
