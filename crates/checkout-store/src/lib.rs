//! Persistence layer for inventory reservation and checkout settlement.
//!
//! The stock ledger, reservation store, cart records, and settled orders
//! live behind the [`CheckoutStore`] trait so the cart lifecycle,
//! settlement, and expiry reclamation components can run against PostgreSQL
//! in production and an in-memory store in tests. Every trait operation is
//! atomic: either the ledger and the reservation rows move together, or
//! neither moves.

pub mod cart;
pub mod error;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod sku;
pub mod store;

pub use cart::{CartLine, CartRecord, CartStatus, CartView};
pub use error::{CheckoutError, ErrorClass, Result};
pub use memory::InMemoryCheckoutStore;
pub use order::{Order, OrderLine, OrderStatus};
pub use postgres::PostgresCheckoutStore;
pub use sku::StockLevel;
pub use store::{CheckoutStore, MAX_QUANTITY, ReclaimedCart};
