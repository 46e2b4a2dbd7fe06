//! The cached counter itself.

use std::sync::{Arc, RwLock};
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::sync::watch;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::repos::RemoteStore;

use super::events::{Freshness, RefreshOutcome, RefreshTrigger};
use super::lock::{rw_read, rw_write};
use super::source::CounterSource;

const SOURCE: &str = "cache::counter";
const METRIC_REFRESH_TOTAL: &str = "harvestline_counter_refresh_total";
const METRIC_REFRESH_FAILED_TOTAL: &str = "harvestline_counter_refresh_failed_total";
const METRIC_REFRESH_MS: &str = "harvestline_counter_refresh_ms";

#[derive(Debug)]
struct CounterState {
    owner: Option<Uuid>,
    /// Bumped on every owner change so late results for a previous owner are dropped.
    epoch: u64,
    value: u64,
    freshness: Freshness,
}

/// A non-negative count derived from a remote collection, owned by one scope.
///
/// The value starts at zero for each owner, is nudged by optimistic deltas and
/// is replaced wholesale by every successful refresh.
pub struct CounterCache {
    source: Arc<dyn CounterSource>,
    store: Arc<dyn RemoteStore>,
    state: RwLock<CounterState>,
    value_tx: watch::Sender<u64>,
}

impl CounterCache {
    pub fn new(source: Arc<dyn CounterSource>, store: Arc<dyn RemoteStore>) -> Self {
        let (value_tx, _) = watch::channel(0);
        Self {
            source,
            store,
            state: RwLock::new(CounterState {
                owner: None,
                epoch: 0,
                value: 0,
                freshness: Freshness::Stale,
            }),
            value_tx,
        }
    }

    pub fn name(&self) -> &'static str {
        self.source.name()
    }

    pub fn source(&self) -> &Arc<dyn CounterSource> {
        &self.source
    }

    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    pub fn value(&self) -> u64 {
        rw_read(&self.state, SOURCE, "value").value
    }

    pub fn owner(&self) -> Option<Uuid> {
        rw_read(&self.state, SOURCE, "owner").owner
    }

    pub fn freshness(&self) -> Freshness {
        rw_read(&self.state, SOURCE, "freshness").freshness
    }

    /// Receiver that observes every value change.
    pub fn watch(&self) -> watch::Receiver<u64> {
        self.value_tx.subscribe()
    }

    /// Replace the value locally, ahead of any confirmation from the store.
    pub fn set_value(&self, value: u64) {
        {
            let mut state = rw_write(&self.state, SOURCE, "set_value");
            state.value = value;
            state.freshness = Freshness::Stale;
        }
        self.publish(value);
    }

    /// Apply an optimistic signed delta, clamping at zero. Returns the new value.
    pub fn apply_delta(&self, delta: i64) -> u64 {
        let value = {
            let mut state = rw_write(&self.state, SOURCE, "apply_delta");
            state.value = state.value.saturating_add_signed(delta);
            state.freshness = Freshness::Stale;
            state.value
        };
        debug!(counter = self.name(), delta, value, "Optimistic counter delta");
        self.publish(value);
        value
    }

    /// Switch owners. A new owner starts from zero and stale; returns whether it changed.
    pub fn set_owner(&self, owner: Option<Uuid>) -> bool {
        {
            let mut state = rw_write(&self.state, SOURCE, "set_owner");
            if state.owner == owner {
                return false;
            }
            state.owner = owner;
            state.epoch += 1;
            state.value = 0;
            state.freshness = Freshness::Stale;
        }
        debug!(counter = self.name(), owner = ?owner, "Counter owner changed");
        self.publish(0);
        true
    }

    /// Re-read the aggregate for `owner` and replace the cached value.
    pub async fn refresh(&self, owner: Uuid) -> RefreshOutcome {
        self.refresh_with(owner, RefreshTrigger::Manual).await
    }

    pub(crate) async fn refresh_with(&self, owner: Uuid, trigger: RefreshTrigger) -> RefreshOutcome {
        let epoch = {
            let mut state = rw_write(&self.state, SOURCE, "refresh.begin");
            if state.owner != Some(owner) {
                debug!(
                    counter = self.name(),
                    owner = %owner,
                    current = ?state.owner,
                    "Refresh skipped: not the current owner"
                );
                return RefreshOutcome::Skipped;
            }
            state.freshness = Freshness::Reconciling;
            state.epoch
        };

        let started_at = Instant::now();
        let result = self.source.aggregate(self.store.as_ref(), owner).await;
        histogram!(METRIC_REFRESH_MS, "counter" => self.name())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(value) => {
                {
                    let mut state = rw_write(&self.state, SOURCE, "refresh.apply");
                    if state.epoch != epoch {
                        debug!(
                            counter = self.name(),
                            owner = %owner,
                            "Refresh result discarded after owner change"
                        );
                        return RefreshOutcome::Discarded;
                    }
                    state.value = value;
                    state.freshness = Freshness::Fresh;
                }
                counter!(
                    METRIC_REFRESH_TOTAL,
                    "counter" => self.name(),
                    "trigger" => trigger.as_str()
                )
                .increment(1);
                debug!(counter = self.name(), owner = %owner, %trigger, value, "Counter reconciled");
                self.publish(value);
                RefreshOutcome::Applied(value)
            }
            Err(err) => {
                {
                    let mut state = rw_write(&self.state, SOURCE, "refresh.failed");
                    if state.epoch == epoch && state.freshness == Freshness::Reconciling {
                        state.freshness = Freshness::Stale;
                    }
                }
                counter!(METRIC_REFRESH_FAILED_TOTAL, "counter" => self.name()).increment(1);
                warn!(
                    counter = self.name(),
                    owner = %owner,
                    %trigger,
                    error = %err,
                    "Counter refresh failed; keeping cached value"
                );
                RefreshOutcome::Failed
            }
        }
    }

    fn publish(&self, value: u64) {
        self.value_tx.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }
}

impl std::fmt::Debug for CounterCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = rw_read(&self.state, SOURCE, "debug");
        f.debug_struct("CounterCache")
            .field("name", &self.name())
            .field("owner", &state.owner)
            .field("value", &state.value)
            .field("freshness", &state.freshness)
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedSource;
    use super::*;
    use crate::infra::memory::InMemoryStore;

    fn counter(source: &Arc<ScriptedSource>) -> CounterCache {
        let store: Arc<dyn RemoteStore> = Arc::new(InMemoryStore::new());
        CounterCache::new(source.clone(), store)
    }

    #[tokio::test]
    async fn reconciliation_overwrites_any_optimistic_sequence() {
        let sequences: [&[i64]; 5] = [&[], &[1, 1, 1], &[-3, 2, -1], &[10, -20, 4], &[i64::MAX, 1]];
        for deltas in sequences {
            let source = Arc::new(ScriptedSource::default());
            let cache = counter(&source);
            let owner = Uuid::new_v4();
            cache.set_owner(Some(owner));
            for delta in deltas {
                cache.apply_delta(*delta);
            }
            source.push(Ok(7));

            assert_eq!(cache.refresh(owner).await, RefreshOutcome::Applied(7));
            assert_eq!(cache.value(), 7, "deltas {deltas:?}");
            assert_eq!(cache.freshness(), Freshness::Fresh);
        }
    }

    #[tokio::test]
    async fn decrements_clamp_at_zero() {
        let source = Arc::new(ScriptedSource::default());
        let cache = counter(&source);
        cache.set_value(2);

        assert_eq!(cache.apply_delta(-1), 1);
        assert_eq!(cache.apply_delta(-5), 0);
        assert_eq!(cache.apply_delta(i64::MIN), 0);
        assert_eq!(cache.apply_delta(3), 3);
    }

    #[tokio::test]
    async fn failed_read_keeps_previous_value() {
        let source = Arc::new(ScriptedSource::default());
        let cache = counter(&source);
        let owner = Uuid::new_v4();
        cache.set_owner(Some(owner));
        source.push(Ok(4));
        source.push(Err("connection reset"));

        cache.refresh(owner).await;
        cache.apply_delta(1);
        assert_eq!(cache.refresh(owner).await, RefreshOutcome::Failed);

        assert_eq!(cache.value(), 5);
        assert_eq!(cache.freshness(), Freshness::Stale);
    }

    #[tokio::test]
    async fn refresh_for_another_owner_is_skipped() {
        let source = Arc::new(ScriptedSource::default());
        let cache = counter(&source);
        cache.set_owner(Some(Uuid::new_v4()));
        source.push(Ok(9));

        assert_eq!(cache.refresh(Uuid::new_v4()).await, RefreshOutcome::Skipped);
        assert_eq!(cache.value(), 0);
    }

    #[tokio::test]
    async fn owner_change_resets_to_zero() {
        let source = Arc::new(ScriptedSource::default());
        let cache = counter(&source);
        let first = Uuid::new_v4();
        cache.set_owner(Some(first));
        source.push(Ok(3));
        cache.refresh(first).await;

        assert!(cache.set_owner(None));
        assert_eq!(cache.value(), 0);
        assert_eq!(cache.owner(), None);
        assert!(!cache.set_owner(None));
    }

    #[tokio::test]
    async fn result_for_previous_owner_is_discarded() {
        let source = Arc::new(ScriptedSource::default());
        source.gate();
        source.push(Ok(12));
        let cache = Arc::new(counter(&source));
        let first = Uuid::new_v4();
        cache.set_owner(Some(first));

        let pending = tokio::spawn({
            let cache = cache.clone();
            async move { cache.refresh(first).await }
        });
        source.entered.notified().await;
        cache.set_owner(Some(Uuid::new_v4()));
        source.release.notify_one();

        assert_eq!(pending.await.unwrap(), RefreshOutcome::Discarded);
        assert_eq!(cache.value(), 0);
    }

    #[tokio::test]
    async fn in_flight_refresh_wins_over_newer_delta() {
        let source = Arc::new(ScriptedSource::default());
        source.gate();
        source.push(Ok(2));
        let cache = Arc::new(counter(&source));
        let owner = Uuid::new_v4();
        cache.set_owner(Some(owner));

        let pending = tokio::spawn({
            let cache = cache.clone();
            async move { cache.refresh(owner).await }
        });
        source.entered.notified().await;
        cache.apply_delta(5);
        source.release.notify_one();
        pending.await.unwrap();

        assert_eq!(cache.value(), 2);
    }

    #[tokio::test]
    async fn watchers_see_changes() {
        let source = Arc::new(ScriptedSource::default());
        let cache = counter(&source);
        let mut values = cache.watch();

        cache.apply_delta(2);
        assert!(values.has_changed().unwrap());
        assert_eq!(*values.borrow_and_update(), 2);

        cache.apply_delta(0);
        assert!(!values.has_changed().unwrap());
    }
}
