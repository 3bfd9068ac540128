//! Cart lifecycle policy knobs.

use std::time::Duration;

/// Default sliding TTL for inactive carts.
const DEFAULT_CART_TTL: Duration = Duration::from_secs(30 * 60);

/// Policy configuration for the checkout service.
#[derive(Debug, Clone)]
pub struct CheckoutConfig {
    /// How long a cart stays live after its last `add_item`. The expiry
    /// slides forward on every successful add; other operations leave it
    /// alone.
    pub cart_ttl: Duration,
}

impl CheckoutConfig {
    /// Creates a config with the given cart TTL.
    pub fn with_ttl(cart_ttl: Duration) -> Self {
        Self { cart_ttl }
    }

    pub(crate) fn ttl_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.cart_ttl).unwrap_or_else(|_| chrono::Duration::minutes(30))
    }
}

impl Default for CheckoutConfig {
    fn default() -> Self {
        Self {
            cart_ttl: DEFAULT_CART_TTL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_ttl_is_thirty_minutes() {
        let config = CheckoutConfig::default();
        assert_eq!(config.cart_ttl, Duration::from_secs(1800));
        assert_eq!(config.ttl_chrono(), chrono::Duration::minutes(30));
    }

    #[test]
    fn custom_ttl_is_preserved() {
        let config = CheckoutConfig::with_ttl(Duration::from_secs(60));
        assert_eq!(config.ttl_chrono(), chrono::Duration::seconds(60));
    }
}
