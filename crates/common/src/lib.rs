pub mod types;

pub use types::{CartId, Money, OrderId, PaymentReference, SkuId};
