//! Delivery eligibility for the seller groups of a cart.
//!
//! Each seller present in the cart gets a daily delivery-order counter with its
//! own reconciliation driver. Drivers start when a seller enters the cart and
//! stop when the seller leaves it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use harvestline_query::{Filter, Table};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::application::error::AppError;
use crate::application::repos::{RemoteStore, decode_rows};
use crate::cache::sources::DailyDeliveryOrders;
use crate::cache::{CounterCache, CounterDriver, CounterSource, Freshness, mutex_lock};
use crate::domain::cart::{CartSummary, SellerGroup};
use crate::domain::delivery::{DeliveryEligibility, DeliveryPolicy, evaluate};
use crate::domain::entities::ProfileRecord;
use crate::util::clock::Clock;

const SOURCE: &str = "application::delivery";

pub struct DeliveryTracker {
    store: Arc<dyn RemoteStore>,
    source: Arc<DailyDeliveryOrders>,
    poll: Duration,
    drivers: Mutex<HashMap<Uuid, CounterDriver>>,
}

impl DeliveryTracker {
    pub fn new(store: Arc<dyn RemoteStore>, clock: Arc<dyn Clock>, poll: Duration) -> Self {
        Self {
            store,
            source: Arc::new(DailyDeliveryOrders::new(clock)),
            poll,
            drivers: Mutex::new(HashMap::new()),
        }
    }

    /// Track exactly `sellers`: start drivers for new ones, stop the rest.
    ///
    /// Must be called from within a tokio runtime.
    pub fn track(&self, sellers: &[Uuid]) {
        let mut drivers = mutex_lock(&self.drivers, SOURCE, "track");
        drivers.retain(|seller, _| {
            let keep = sellers.contains(seller);
            if !keep {
                debug!(seller = %seller, "Seller left the cart; delivery counter stopped");
            }
            keep
        });
        for seller in sellers {
            drivers.entry(*seller).or_insert_with(|| {
                let cache = Arc::new(CounterCache::new(self.source.clone(), self.store.clone()));
                debug!(seller = %seller, "Seller entered the cart; delivery counter started");
                CounterDriver::spawn(cache, self.poll, Some(*seller))
            });
        }
    }

    /// Track the sellers of `summary`.
    pub fn track_summary(&self, summary: &CartSummary) {
        self.track(&summary.seller_ids());
    }

    pub fn tracked(&self) -> Vec<Uuid> {
        let mut sellers: Vec<Uuid> = mutex_lock(&self.drivers, SOURCE, "tracked")
            .keys()
            .copied()
            .collect();
        sellers.sort();
        sellers
    }

    /// The tracked counter for `seller`, if any.
    pub fn counter(&self, seller: Uuid) -> Option<Arc<CounterCache>> {
        mutex_lock(&self.drivers, SOURCE, "counter")
            .get(&seller)
            .map(|driver| driver.cache().clone())
    }

    /// Today's delivery orders for `seller`.
    ///
    /// Uses the tracked counter when it is fresh and queries the store otherwise.
    pub async fn todays_orders(&self, seller: Uuid) -> Result<u64, AppError> {
        if let Some(counter) = self.counter(seller)
            && counter.freshness() == Freshness::Fresh
        {
            return Ok(counter.value());
        }
        Ok(self.source.aggregate(self.store.as_ref(), seller).await?)
    }

    /// Eligibility of a single seller group.
    pub async fn evaluate_group(&self, group: &SellerGroup) -> Result<DeliveryEligibility, AppError> {
        let policies = self.policies(&[group.seller_id]).await?;
        let policy = policies
            .get(&group.seller_id)
            .copied()
            .unwrap_or_default();
        let today = self.todays_orders(group.seller_id).await?;
        Ok(evaluate(group.seller_id, policy, group.quantity(), today))
    }

    /// Eligibility of every seller group in `summary`, in group order.
    pub async fn eligibility(
        &self,
        summary: &CartSummary,
    ) -> Result<Vec<DeliveryEligibility>, AppError> {
        if summary.is_empty() {
            return Ok(Vec::new());
        }
        let policies = self.policies(&summary.seller_ids()).await?;

        let mut results = Vec::with_capacity(summary.groups.len());
        for group in &summary.groups {
            let policy = policies
                .get(&group.seller_id)
                .copied()
                .unwrap_or_default();
            let today = self.todays_orders(group.seller_id).await?;
            results.push(evaluate(group.seller_id, policy, group.quantity(), today));
        }
        Ok(results)
    }

    /// Stop every driver and wait for the subscriptions to close.
    pub async fn shutdown(&self) {
        let drivers: Vec<CounterDriver> = mutex_lock(&self.drivers, SOURCE, "shutdown")
            .drain()
            .map(|(_, driver)| driver)
            .collect();
        for driver in drivers {
            driver.shutdown().await;
        }
    }

    async fn policies(&self, sellers: &[Uuid]) -> Result<HashMap<Uuid, DeliveryPolicy>, AppError> {
        let rows = self
            .store
            .select(Table::Profiles, &[Filter::is_in("id", sellers)])
            .await?;
        let profiles: Vec<ProfileRecord> = decode_rows(rows)?;
        let policies: HashMap<Uuid, DeliveryPolicy> = profiles
            .iter()
            .map(|profile| (profile.id, DeliveryPolicy::from(profile)))
            .collect();
        for seller in sellers {
            if !policies.contains_key(seller) {
                warn!(seller = %seller, "Seller profile missing; using default delivery policy");
            }
        }
        Ok(policies)
    }
}

impl std::fmt::Debug for DeliveryTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryTracker")
            .field("poll", &self.poll)
            .field("sellers", &self.tracked())
            .finish_non_exhaustive()
    }
}
