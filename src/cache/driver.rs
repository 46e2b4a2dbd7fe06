//! Background reconciliation for a single counter.
//!
//! The driver owns the counter's change-feed subscriptions and its poll timer.
//! Every owner change tears both down, resets the counter and starts over for
//! the new owner. Only owner changes, feed notices and the poll tick trigger a
//! refresh.

use std::sync::Arc;
use std::time::Duration;

use futures::stream::{BoxStream, SelectAll, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use crate::application::repos::FeedNotice;

use super::counter::CounterCache;
use super::events::RefreshTrigger;

/// Handle to a running reconciliation task.
///
/// Dropping the handle closes the owner channel, which stops the task and
/// releases its subscriptions at the next wakeup; [`CounterDriver::shutdown`]
/// does the same and waits for it.
pub struct CounterDriver {
    cache: Arc<CounterCache>,
    owner_tx: watch::Sender<Option<Uuid>>,
    handle: JoinHandle<()>,
}

impl CounterDriver {
    /// Spawn the driver on the current tokio runtime.
    pub fn spawn(cache: Arc<CounterCache>, poll: Duration, owner: Option<Uuid>) -> Self {
        let (owner_tx, owner_rx) = watch::channel(owner);
        let span = info_span!("counter_driver", counter = cache.name());
        let handle = tokio::spawn(run(cache.clone(), poll, owner_rx).instrument(span));
        Self {
            cache,
            owner_tx,
            handle,
        }
    }

    pub fn cache(&self) -> &Arc<CounterCache> {
        &self.cache
    }

    /// Point the counter at a new owner (or none, on logout).
    pub fn set_owner(&self, owner: Option<Uuid>) {
        self.owner_tx.send_if_modified(|current| {
            if *current == owner {
                false
            } else {
                *current = owner;
                true
            }
        });
    }

    /// Stop the task and wait until its subscriptions are released.
    pub async fn shutdown(self) {
        let Self {
            cache,
            owner_tx,
            handle,
        } = self;
        drop(owner_tx);
        if let Err(err) = handle.await {
            warn!(counter = cache.name(), error = %err, "Counter driver ended abnormally");
        }
    }
}

async fn run(cache: Arc<CounterCache>, poll: Duration, mut owner_rx: watch::Receiver<Option<Uuid>>) {
    loop {
        let owner = *owner_rx.borrow_and_update();
        cache.set_owner(owner);

        let keep_running = match owner {
            Some(owner) => reconcile_owner(&cache, poll, owner, &mut owner_rx).await,
            None => owner_rx.changed().await.is_ok(),
        };
        if !keep_running {
            break;
        }
    }
    debug!(counter = cache.name(), "Counter driver stopped");
}

/// Keep the counter reconciled for `owner` until the owner changes.
///
/// Returns false when the driver handle is gone and the task should exit.
async fn reconcile_owner(
    cache: &CounterCache,
    poll: Duration,
    owner: Uuid,
    owner_rx: &mut watch::Receiver<Option<Uuid>>,
) -> bool {
    // Subscribe before the first fetch so nothing committed in between is missed.
    let mut feeds = open_feeds(cache, owner).await;
    let mut feeds_open = !feeds.is_empty();
    cache.refresh_with(owner, RefreshTrigger::OwnerChanged).await;

    let mut ticker = time::interval_at(Instant::now() + poll, poll);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        counter = cache.name(),
        owner = %owner,
        feeds = feeds.len(),
        poll_ms = poll.as_millis() as u64,
        "Counter reconciliation started"
    );

    loop {
        tokio::select! {
            changed = owner_rx.changed() => return changed.is_ok(),
            notice = feeds.next(), if feeds_open => match notice {
                Some(FeedNotice::Change(event)) => {
                    if cache.source().reacts_to(&event) {
                        cache.refresh_with(owner, RefreshTrigger::ChangeFeed).await;
                    }
                }
                Some(FeedNotice::Lagged(skipped)) => {
                    debug!(counter = cache.name(), skipped, "Change feed lagged");
                    cache.refresh_with(owner, RefreshTrigger::FeedLagged).await;
                }
                None => {
                    warn!(counter = cache.name(), "Change feeds closed; relying on poll");
                    feeds_open = false;
                }
            },
            _ = ticker.tick() => {
                cache.refresh_with(owner, RefreshTrigger::Poll).await;
            }
        }
    }
}

async fn open_feeds(cache: &CounterCache, owner: Uuid) -> SelectAll<BoxStream<'static, FeedNotice>> {
    let mut feeds = SelectAll::new();
    for spec in cache.source().feeds(owner) {
        let table = spec.table;
        match cache.store().subscribe(spec.table, spec.filters).await {
            Ok(feed) => feeds.push(feed.into_stream()),
            Err(err) => warn!(
                counter = cache.name(),
                %table,
                error = %err,
                "Subscription failed; relying on poll"
            ),
        }
    }
    feeds
}
