//! Counter configuration.
//!
//! Controls fallback poll intervals via the `[counters]` section of `harvestline.toml`.

use std::time::Duration;

use crate::config::CounterSettings;

/// Fallback poll interval for each counter kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterConfig {
    pub cart_poll: Duration,
    pub unread_poll: Duration,
    pub pending_orders_poll: Duration,
    pub delivery_orders_poll: Duration,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self::from(&CounterSettings::default())
    }
}

impl From<&CounterSettings> for CounterConfig {
    fn from(settings: &CounterSettings) -> Self {
        Self {
            cart_poll: settings.cart_poll,
            unread_poll: settings.unread_poll,
            pending_orders_poll: settings.pending_orders_poll,
            delivery_orders_poll: settings.delivery_orders_poll,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_values() {
        let config = CounterConfig::default();
        assert_eq!(config.cart_poll, Duration::from_secs(10));
        assert_eq!(config.unread_poll, Duration::from_secs(5));
        assert_eq!(config.pending_orders_poll, Duration::from_secs(30));
        assert_eq!(config.delivery_orders_poll, Duration::from_secs(15));
    }

    #[test]
    fn overrides_carry_over_from_settings() {
        let settings = CounterSettings {
            unread_poll: Duration::from_secs(2),
            ..CounterSettings::default()
        };
        let config = CounterConfig::from(&settings);
        assert_eq!(config.unread_poll, Duration::from_secs(2));
        assert_eq!(config.cart_poll, CounterConfig::default().cart_poll);
    }
}
