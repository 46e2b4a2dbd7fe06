//! Counter lifecycle vocabulary.

use std::fmt;

/// Where a counter value stands relative to the authoritative aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Never fetched for this owner, or changed locally since the last fetch.
    Stale,
    /// A refresh is in flight.
    Reconciling,
    /// Last written by a successful refresh.
    Fresh,
}

/// Why a refresh was issued. Used for logs and metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshTrigger {
    OwnerChanged,
    ChangeFeed,
    FeedLagged,
    Poll,
    Manual,
}

impl RefreshTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RefreshTrigger::OwnerChanged => "owner_changed",
            RefreshTrigger::ChangeFeed => "change_feed",
            RefreshTrigger::FeedLagged => "feed_lagged",
            RefreshTrigger::Poll => "poll",
            RefreshTrigger::Manual => "manual",
        }
    }
}

impl fmt::Display for RefreshTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a single refresh attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The fetched aggregate replaced the cached value.
    Applied(u64),
    /// The read failed; the cached value was left alone.
    Failed,
    /// The owner changed while the read was in flight; the result was dropped.
    Discarded,
    /// The requested owner is not the counter's current owner.
    Skipped,
}
