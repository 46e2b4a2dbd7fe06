//! Silent reduction of cart quantities that exceed current stock.
//!
//! Runs after every new cart version, debounced so bursts of product updates
//! collapse into one pass. Each version is capped at most once, each line is
//! removed at most once, and the cart is never re-fetched afterwards: the
//! cached lines are patched in place by item id.

use std::collections::HashSet;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use metrics::counter;
use serde::Serialize;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::cart::{CartService, CartSnapshot};
use crate::application::error::AppError;
use crate::cache::mutex_lock;

const SOURCE: &str = "application::stock_cap";
const METRIC_ADJUSTED_TOTAL: &str = "harvestline_stock_cap_adjusted_total";
const METRIC_FAILED_TOTAL: &str = "harvestline_stock_cap_failed_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum StockAdjustment {
    Reduced {
        item_id: Uuid,
        product_id: Uuid,
        from: u32,
        to: u32,
    },
    /// The product sold out, so the line was dropped.
    Removed {
        item_id: Uuid,
        product_id: Uuid,
        from: u32,
    },
}

impl StockAdjustment {
    pub fn item_id(&self) -> Uuid {
        match *self {
            StockAdjustment::Reduced { item_id, .. } | StockAdjustment::Removed { item_id, .. } => {
                item_id
            }
        }
    }

    fn action(&self) -> &'static str {
        match self {
            StockAdjustment::Reduced { .. } => "reduced",
            StockAdjustment::Removed { .. } => "removed",
        }
    }
}

/// Adjustments needed to bring every line of `snapshot` within stock.
pub fn plan(snapshot: &CartSnapshot) -> Vec<StockAdjustment> {
    snapshot
        .lines
        .iter()
        .filter_map(|line| {
            let to = line.stock_cap()?;
            let item_id = line.item.id;
            let product_id = line.product.id;
            let from = line.item.quantity;
            Some(if to == 0 {
                StockAdjustment::Removed {
                    item_id,
                    product_id,
                    from,
                }
            } else {
                StockAdjustment::Reduced {
                    item_id,
                    product_id,
                    from,
                    to,
                }
            })
        })
        .collect()
}

pub struct StockAutoCap {
    service: CartService,
    debounce: Duration,
    generation: AtomicU64,
    capped_version: Mutex<Option<u64>>,
    removed: Mutex<HashSet<Uuid>>,
    running: AsyncMutex<()>,
}

impl StockAutoCap {
    pub fn new(service: CartService, debounce: Duration) -> Self {
        Self {
            service,
            debounce,
            generation: AtomicU64::new(0),
            capped_version: Mutex::new(None),
            removed: Mutex::new(HashSet::new()),
            running: AsyncMutex::new(()),
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Latest cart version already capped.
    pub fn capped_version(&self) -> Option<u64> {
        *mutex_lock(&self.capped_version, SOURCE, "capped_version")
    }

    /// Wait out the debounce window. False when a later request superseded this one.
    pub(crate) async fn settle(&self) -> bool {
        let ticket = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.debounce).await;
        self.generation.load(Ordering::SeqCst) == ticket
    }

    /// Hold while reading, capping and patching one snapshot so passes never overlap.
    pub(crate) async fn exclusive(&self) -> MutexGuard<'_, ()> {
        self.running.lock().await
    }

    /// Persist every adjustment `snapshot` needs, unless its version was already capped.
    ///
    /// Returns the adjustments that were persisted. Individual write failures are
    /// logged and skipped; the error is returned only when nothing could be written.
    pub async fn cap(&self, snapshot: &CartSnapshot) -> Result<Vec<StockAdjustment>, AppError> {
        {
            let mut capped = mutex_lock(&self.capped_version, SOURCE, "cap");
            if capped.is_some_and(|version| version >= snapshot.version) {
                debug!(version = snapshot.version, "Cart version already capped");
                return Ok(Vec::new());
            }
            *capped = Some(snapshot.version);
        }

        let mut applied = Vec::new();
        let mut first_error = None;
        for adjustment in plan(snapshot) {
            if let StockAdjustment::Removed { item_id, .. } = adjustment
                && !mutex_lock(&self.removed, SOURCE, "reserve").insert(item_id)
            {
                debug!(item = %item_id, "Cart line already removed");
                continue;
            }

            let result = match adjustment {
                StockAdjustment::Reduced { item_id, to, .. } => self
                    .service
                    .write_quantity(item_id, to)
                    .await
                    .map(|_| ()),
                StockAdjustment::Removed { item_id, .. } => {
                    self.service.remove_item(item_id).await
                }
            };

            match result {
                Ok(()) => {
                    counter!(METRIC_ADJUSTED_TOTAL, "action" => adjustment.action()).increment(1);
                    info!(
                        item = %adjustment.item_id(),
                        action = adjustment.action(),
                        version = snapshot.version,
                        "Cart line capped to stock"
                    );
                    applied.push(adjustment);
                }
                Err(err) => {
                    if let StockAdjustment::Removed { item_id, .. } = adjustment {
                        mutex_lock(&self.removed, SOURCE, "release").remove(&item_id);
                    }
                    counter!(METRIC_FAILED_TOTAL).increment(1);
                    warn!(
                        item = %adjustment.item_id(),
                        error = %err,
                        "Stock cap could not be persisted"
                    );
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) if applied.is_empty() => Err(err),
            _ => Ok(applied),
        }
    }
}

impl std::fmt::Debug for StockAutoCap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StockAutoCap")
            .field("debounce", &self.debounce)
            .field("capped_version", &self.capped_version())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use harvestline_query::Table;
    use serde_json::Value;

    use super::*;
    use crate::application::cart::testing::CartFixture;
    use crate::domain::cart::fixtures::line;

    #[test]
    fn plan_reduces_and_removes() {
        let seller = Uuid::new_v4();
        let snapshot = CartSnapshot {
            version: 1,
            lines: vec![line(seller, 100, 5, 3), line(seller, 100, 2, 9), line(seller, 100, 4, 0)],
        };

        let planned = plan(&snapshot);

        assert_eq!(planned.len(), 2);
        assert!(matches!(planned[0], StockAdjustment::Reduced { from: 5, to: 3, .. }));
        assert!(matches!(planned[1], StockAdjustment::Removed { from: 4, .. }));
    }

    async fn capped_fixture(quantity: u32, stock: u32) -> (CartFixture, StockAutoCap, CartSnapshot) {
        let fixture = CartFixture::new();
        let product = fixture.product(250, 20);
        fixture
            .service
            .add_item(fixture.user, product, quantity)
            .await
            .unwrap();
        let mut lines = fixture.service.fetch(fixture.user).await.unwrap();
        lines[0].product.stock = stock;
        let auto_cap = StockAutoCap::new(fixture.service.clone(), Duration::from_millis(300));
        (fixture, auto_cap, CartSnapshot { version: 1, lines })
    }

    #[tokio::test]
    async fn caps_each_version_once() {
        let (fixture, auto_cap, snapshot) = capped_fixture(6, 2).await;

        let first = auto_cap.cap(&snapshot).await.unwrap();
        let second = auto_cap.cap(&snapshot).await.unwrap();

        assert_eq!(first.len(), 1);
        assert!(second.is_empty());
        assert_eq!(auto_cap.capped_version(), Some(1));
        let stored = fixture.store.rows(Table::CartItems);
        assert_eq!(stored[0].get("quantity"), Some(&Value::from(2)));
    }

    #[tokio::test]
    async fn sold_out_lines_are_removed_and_badge_drops() {
        let (fixture, auto_cap, snapshot) = capped_fixture(3, 0).await;
        assert_eq!(fixture.service.counter().value(), 1);

        let applied = auto_cap.cap(&snapshot).await.unwrap();

        assert!(matches!(applied[0], StockAdjustment::Removed { .. }));
        assert!(fixture.store.rows(Table::CartItems).is_empty());
        assert_eq!(fixture.service.counter().value(), 0);
    }

    #[tokio::test]
    async fn a_removed_line_is_never_removed_twice() {
        let fixture = CartFixture::new();
        let sold_out = fixture.product(250, 20);
        let kept = fixture.product(400, 20);
        for product in [sold_out, kept] {
            fixture.service.add_item(fixture.user, product, 2).await.unwrap();
        }
        let mut lines = fixture.service.fetch(fixture.user).await.unwrap();
        for line in lines.iter_mut().filter(|line| line.product.id == sold_out) {
            line.product.stock = 0;
        }
        let auto_cap = StockAutoCap::new(fixture.service.clone(), Duration::from_millis(300));

        let first = CartSnapshot { version: 1, lines: lines.clone() };
        assert_eq!(auto_cap.cap(&first).await.unwrap().len(), 1);
        assert_eq!(fixture.service.counter().value(), 1);

        // A newer version built before the removal was patched in.
        let stale = CartSnapshot { version: 2, lines };
        assert!(auto_cap.cap(&stale).await.unwrap().is_empty());
        assert_eq!(auto_cap.capped_version(), Some(2));
        assert_eq!(fixture.service.counter().value(), 1);
        assert_eq!(fixture.store.rows(Table::CartItems).len(), 1);
    }

    #[tokio::test]
    async fn write_failure_is_reported_when_nothing_persists() {
        let (fixture, auto_cap, snapshot) = capped_fixture(6, 2).await;
        fixture.store.fail_next_writes(1);

        assert!(auto_cap.cap(&snapshot).await.is_err());
        assert_eq!(auto_cap.capped_version(), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn settle_lets_only_the_last_request_through() {
        let fixture = CartFixture::new();
        let auto_cap = Arc::new(StockAutoCap::new(
            fixture.service.clone(),
            Duration::from_millis(300),
        ));

        let early = tokio::spawn({
            let auto_cap = auto_cap.clone();
            async move { auto_cap.settle().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let late = tokio::spawn({
            let auto_cap = auto_cap.clone();
            async move { auto_cap.settle().await }
        });

        assert!(!early.await.unwrap());
        assert!(late.await.unwrap());
    }
}
