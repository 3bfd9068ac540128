//! Expiry reclamation: finds carts whose TTL has lapsed and returns their
//! held stock to the ledger.
//!
//! The reclaimer owns no timer policy of its own beyond the interval it is
//! configured with; the scheduling collaborator (the API binary, a cron
//! job, a test) decides when passes run. Each pass is safe to run
//! concurrently with settlement and with other passes: the per-cart
//! reclamation re-verifies state under the cart lock and treats lost races
//! as no-ops.

pub mod sweeper;

pub use sweeper::{ReclaimReport, Reclaimer, ReclaimerConfig};
