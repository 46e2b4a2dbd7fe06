use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use uuid::Uuid;

/// Command-line arguments for the Harvestline binary.
#[derive(Debug, Parser)]
#[command(
    name = "harvestline",
    version,
    about = "Harvestline marketplace client core"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "HARVESTLINE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the reconciled counters for a user against a seeded store and log every change.
    Watch(Box<WatchArgs>),
    /// Print a user's cart summary and per-seller delivery eligibility as JSON.
    Cart(CartArgs),
}

#[derive(Debug, Args, Clone)]
pub struct FixtureArgs {
    /// TOML fixture used to seed the in-memory store.
    #[arg(long, value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub fixture: PathBuf,

    /// The signed-in user.
    #[arg(long, value_name = "UUID")]
    pub user: Uuid,
}

#[derive(Debug, Args, Clone)]
pub struct WatchArgs {
    #[command(flatten)]
    pub target: FixtureArgs,

    /// Stop after this many seconds; runs until Ctrl-C when omitted.
    #[arg(long, value_name = "SECONDS")]
    pub seconds: Option<u64>,

    #[command(flatten)]
    pub overrides: WatchOverrides,
}

#[derive(Debug, Args, Clone)]
pub struct CartArgs {
    #[command(flatten)]
    pub target: FixtureArgs,

    #[command(flatten)]
    pub logging: LoggingOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct WatchOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the cart counter poll interval.
    #[arg(long = "cart-poll-seconds", value_name = "SECONDS")]
    pub cart_poll_seconds: Option<u64>,

    /// Override the unread conversations poll interval.
    #[arg(long = "unread-poll-seconds", value_name = "SECONDS")]
    pub unread_poll_seconds: Option<u64>,

    /// Override the pending orders poll interval.
    #[arg(long = "pending-orders-poll-seconds", value_name = "SECONDS")]
    pub pending_orders_poll_seconds: Option<u64>,

    /// Override the stock auto-cap debounce.
    #[arg(long = "stock-cap-debounce-ms", value_name = "MILLIS")]
    pub stock_cap_debounce_ms: Option<u64>,

    /// Override the in-memory change feed capacity.
    #[arg(long = "feed-capacity", value_name = "COUNT")]
    pub feed_capacity: Option<u64>,
}
