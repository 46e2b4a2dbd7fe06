//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, str::FromStr, time::Duration};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

mod cli;

pub use cli::{
    CartArgs, CliArgs, Command, FixtureArgs, LoggingOverrides, WatchArgs, WatchOverrides,
};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "harvestline";
const DEFAULT_CART_POLL_SECS: u64 = 10;
const DEFAULT_UNREAD_POLL_SECS: u64 = 5;
const DEFAULT_PENDING_ORDERS_POLL_SECS: u64 = 30;
const DEFAULT_DELIVERY_ORDERS_POLL_SECS: u64 = 15;
const DEFAULT_STOCK_CAP_DEBOUNCE_MS: u64 = 300;
const DEFAULT_FEED_CAPACITY: u64 = crate::infra::memory::DEFAULT_FEED_CAPACITY as u64;

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub counters: CounterSettings,
    pub cart: CartSettings,
    pub store: StoreSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterSettings {
    pub cart_poll: Duration,
    pub unread_poll: Duration,
    pub pending_orders_poll: Duration,
    pub delivery_orders_poll: Duration,
}

impl Default for CounterSettings {
    fn default() -> Self {
        Self {
            cart_poll: Duration::from_secs(DEFAULT_CART_POLL_SECS),
            unread_poll: Duration::from_secs(DEFAULT_UNREAD_POLL_SECS),
            pending_orders_poll: Duration::from_secs(DEFAULT_PENDING_ORDERS_POLL_SECS),
            delivery_orders_poll: Duration::from_secs(DEFAULT_DELIVERY_ORDERS_POLL_SECS),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CartSettings {
    pub stock_cap_debounce: Duration,
}

#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub feed_capacity: NonZeroUsize,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("HARVESTLINE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Watch(args) => raw.apply_watch_overrides(&args.overrides),
        Command::Cart(args) => raw.apply_logging_overrides(&args.logging),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    counters: RawCounterSettings,
    cart: RawCartSettings,
    store: RawStoreSettings,
}

impl RawSettings {
    fn apply_watch_overrides(&mut self, overrides: &WatchOverrides) {
        self.apply_logging_overrides(&overrides.logging);
        if let Some(seconds) = overrides.cart_poll_seconds {
            self.counters.cart_poll_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.unread_poll_seconds {
            self.counters.unread_poll_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.pending_orders_poll_seconds {
            self.counters.pending_orders_poll_seconds = Some(seconds);
        }
        if let Some(millis) = overrides.stock_cap_debounce_ms {
            self.cart.stock_cap_debounce_ms = Some(millis);
        }
        if let Some(capacity) = overrides.feed_capacity {
            self.store.feed_capacity = Some(capacity);
        }
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            counters,
            cart,
            store,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            counters: build_counter_settings(counters)?,
            cart: build_cart_settings(cart),
            store: build_store_settings(store)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_counter_settings(counters: RawCounterSettings) -> Result<CounterSettings, LoadError> {
    Ok(CounterSettings {
        cart_poll: poll_interval(
            counters.cart_poll_seconds,
            DEFAULT_CART_POLL_SECS,
            "counters.cart_poll_seconds",
        )?,
        unread_poll: poll_interval(
            counters.unread_poll_seconds,
            DEFAULT_UNREAD_POLL_SECS,
            "counters.unread_poll_seconds",
        )?,
        pending_orders_poll: poll_interval(
            counters.pending_orders_poll_seconds,
            DEFAULT_PENDING_ORDERS_POLL_SECS,
            "counters.pending_orders_poll_seconds",
        )?,
        delivery_orders_poll: poll_interval(
            counters.delivery_orders_poll_seconds,
            DEFAULT_DELIVERY_ORDERS_POLL_SECS,
            "counters.delivery_orders_poll_seconds",
        )?,
    })
}

fn build_cart_settings(cart: RawCartSettings) -> CartSettings {
    let millis = cart
        .stock_cap_debounce_ms
        .unwrap_or(DEFAULT_STOCK_CAP_DEBOUNCE_MS);
    CartSettings {
        stock_cap_debounce: Duration::from_millis(millis),
    }
}

fn build_store_settings(store: RawStoreSettings) -> Result<StoreSettings, LoadError> {
    let value = store.feed_capacity.unwrap_or(DEFAULT_FEED_CAPACITY);
    let value: usize = value.try_into().map_err(|_| {
        LoadError::invalid(
            "store.feed_capacity",
            "value exceeds supported range for usize",
        )
    })?;
    let feed_capacity = NonZeroUsize::new(value)
        .ok_or_else(|| LoadError::invalid("store.feed_capacity", "must be greater than zero"))?;

    Ok(StoreSettings { feed_capacity })
}

fn poll_interval(
    value: Option<u64>,
    default: u64,
    key: &'static str,
) -> Result<Duration, LoadError> {
    let seconds = value.unwrap_or(default);
    if seconds == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(seconds))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCounterSettings {
    cart_poll_seconds: Option<u64>,
    unread_poll_seconds: Option<u64>,
    pending_orders_poll_seconds: Option<u64>,
    delivery_orders_poll_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCartSettings {
    stock_cap_debounce_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawStoreSettings {
    feed_capacity: Option<u64>,
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
