//! Reconciled counters.
//!
//! A counter is a small integer derived from a collection the client does not
//! own (cart lines, unread conversations, pending orders). It is kept close to
//! the authoritative aggregate through four paths:
//!
//! - an initial fetch when the owner becomes known,
//! - optimistic deltas applied by local mutations,
//! - a refetch whenever the table's change feed reports a mutation,
//! - a fallback poll on a fixed interval.
//!
//! Refresh results always win over optimistic deltas; the poll keeps the value
//! converging when a feed silently drops.
//!
//! ## Configuration
//!
//! Poll intervals are controlled via `harvestline.toml`:
//!
//! ```toml
//! [counters]
//! cart_poll_seconds = 10
//! unread_poll_seconds = 5
//! ```

mod config;
mod counter;
mod driver;
mod events;
mod lock;
mod source;
pub mod sources;

pub use config::CounterConfig;
pub use counter::CounterCache;
pub use driver::CounterDriver;
pub use events::{Freshness, RefreshOutcome, RefreshTrigger};
pub use source::{CounterSource, FeedSpec};

pub(crate) use lock::{mutex_lock, rw_read, rw_write};
