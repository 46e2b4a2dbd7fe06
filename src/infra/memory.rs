//! In-process stand-in for the hosted store.
//!
//! Rows live in per-table vectors; every mutation is published on a single
//! broadcast channel that subscriptions filter by table and predicate. Reads and
//! writes can be made to fail on demand to exercise the error paths.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use harvestline_query::{ChangeEvent, Filter, Row, Table};
use serde_json::Value;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use crate::application::repos::{ChangeFeed, RemoteStore, RepoError};
use crate::cache::{rw_read, rw_write};

const SOURCE: &str = "infra::memory";
pub const DEFAULT_FEED_CAPACITY: usize = 256;

pub struct InMemoryStore {
    tables: RwLock<HashMap<Table, Vec<Row>>>,
    feed: broadcast::Sender<ChangeEvent>,
    failing_reads: AtomicUsize,
    failing_writes: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_feed_capacity(DEFAULT_FEED_CAPACITY)
    }

    pub fn with_feed_capacity(capacity: usize) -> Self {
        let (feed, _) = broadcast::channel(capacity.max(1));
        Self {
            tables: RwLock::new(HashMap::new()),
            feed,
            failing_reads: AtomicUsize::new(0),
            failing_writes: AtomicUsize::new(0),
        }
    }

    /// Load rows without publishing change events.
    pub fn seed(&self, table: Table, rows: Vec<Row>) {
        rw_write(&self.tables, SOURCE, "seed")
            .entry(table)
            .or_default()
            .extend(rows);
    }

    /// Snapshot of every row in `table`.
    pub fn rows(&self, table: Table) -> Vec<Row> {
        rw_read(&self.tables, SOURCE, "rows")
            .get(&table)
            .cloned()
            .unwrap_or_default()
    }

    /// Publish an event as if another client had mutated the store.
    pub fn publish(&self, event: ChangeEvent) {
        // No receivers is fine: nobody is listening yet.
        let _ = self.feed.send(event);
    }

    /// Live subscriptions across all tables.
    pub fn subscriber_count(&self) -> usize {
        self.feed.receiver_count()
    }

    /// Make the next `count` reads fail.
    pub fn fail_next_reads(&self, count: usize) {
        self.failing_reads.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` writes fail.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn check_read(&self, table: Table) -> Result<(), RepoError> {
        if Self::take_failure(&self.failing_reads) {
            return Err(RepoError::Unavailable(format!(
                "injected read failure on `{table}`"
            )));
        }
        Ok(())
    }

    fn check_write(&self, table: Table) -> Result<(), RepoError> {
        if Self::take_failure(&self.failing_writes) {
            return Err(RepoError::Unavailable(format!(
                "injected write failure on `{table}`"
            )));
        }
        Ok(())
    }

    fn publish_all(&self, events: Vec<ChangeEvent>) {
        for event in events {
            debug!(table = %event.table, kind = ?event.kind, "Store change published");
            self.publish(event);
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn fill_generated_columns(row: &mut Row) {
    if !row.contains_key("id") {
        row.insert("id".to_string(), Value::String(Uuid::new_v4().to_string()));
    }
    if !row.contains_key("created_at")
        && let Ok(now) = OffsetDateTime::now_utc().format(&Rfc3339)
    {
        row.insert("created_at".to_string(), Value::String(now));
    }
}

#[async_trait]
impl RemoteStore for InMemoryStore {
    async fn select(&self, table: Table, filters: &[Filter]) -> Result<Vec<Row>, RepoError> {
        self.check_read(table)?;
        let tables = rw_read(&self.tables, SOURCE, "select");
        Ok(tables
            .get(&table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| Filter::all_match(filters, row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, RepoError> {
        self.check_write(table)?;
        let mut inserted = Vec::with_capacity(rows.len());
        {
            let mut tables = rw_write(&self.tables, SOURCE, "insert");
            let stored = tables.entry(table).or_default();
            for mut row in rows {
                fill_generated_columns(&mut row);
                stored.push(row.clone());
                inserted.push(row);
            }
        }
        self.publish_all(
            inserted
                .iter()
                .cloned()
                .map(|row| ChangeEvent::insert(table, row))
                .collect(),
        );
        Ok(inserted)
    }

    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, RepoError> {
        self.check_write(table)?;
        let mut events = Vec::new();
        let mut updated = Vec::new();
        {
            let mut tables = rw_write(&self.tables, SOURCE, "update");
            if let Some(rows) = tables.get_mut(&table) {
                for row in rows.iter_mut().filter(|row| Filter::all_match(filters, row)) {
                    let old = row.clone();
                    for (column, value) in &patch {
                        row.insert(column.clone(), value.clone());
                    }
                    updated.push(row.clone());
                    events.push(ChangeEvent::update(table, old, row.clone()));
                }
            }
        }
        self.publish_all(events);
        Ok(updated)
    }

    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<u64, RepoError> {
        self.check_write(table)?;
        let mut removed = Vec::new();
        {
            let mut tables = rw_write(&self.tables, SOURCE, "delete");
            if let Some(rows) = tables.get_mut(&table) {
                let (gone, kept): (Vec<Row>, Vec<Row>) = rows
                    .drain(..)
                    .partition(|row| Filter::all_match(filters, row));
                *rows = kept;
                removed = gone;
            }
        }
        let count = removed.len() as u64;
        self.publish_all(
            removed
                .into_iter()
                .map(|row| ChangeEvent::delete(table, row))
                .collect(),
        );
        Ok(count)
    }

    async fn subscribe(&self, table: Table, filters: Vec<Filter>) -> Result<ChangeFeed, RepoError> {
        Ok(ChangeFeed::new(table, filters, self.feed.subscribe()))
    }
}
