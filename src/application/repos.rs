//! The remote store seam: generic query/mutate/subscribe against the hosted database.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use harvestline_query::{ChangeEvent, Filter, Row, Table};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("row could not be decoded: {0}")]
    Decode(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Hosted relational store with realtime change feeds.
///
/// Implementations are shared across counter drivers and services, so every
/// method takes `&self` and the trait object must be `Send + Sync`.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Rows of `table` satisfying every filter.
    async fn select(&self, table: Table, filters: &[Filter]) -> Result<Vec<Row>, RepoError>;

    /// Insert rows, returning them as stored (with generated columns filled in).
    async fn insert(&self, table: Table, rows: Vec<Row>) -> Result<Vec<Row>, RepoError>;

    /// Merge `patch` into every matching row, returning the updated rows.
    async fn update(
        &self,
        table: Table,
        filters: &[Filter],
        patch: Row,
    ) -> Result<Vec<Row>, RepoError>;

    /// Delete every matching row, returning how many were removed.
    async fn delete(&self, table: Table, filters: &[Filter]) -> Result<u64, RepoError>;

    /// Open a change feed for `table`, narrowed by `filters`.
    ///
    /// Dropping the returned feed releases the subscription.
    async fn subscribe(&self, table: Table, filters: Vec<Filter>) -> Result<ChangeFeed, RepoError>;
}

/// What a change feed delivers to its reader.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedNotice {
    Change(ChangeEvent),
    /// The reader fell behind and this many events were skipped.
    Lagged(u64),
}

/// A live subscription to one table's change feed.
pub struct ChangeFeed {
    table: Table,
    filters: Vec<Filter>,
    receiver: broadcast::Receiver<ChangeEvent>,
}

impl ChangeFeed {
    pub fn new(
        table: Table,
        filters: Vec<Filter>,
        receiver: broadcast::Receiver<ChangeEvent>,
    ) -> Self {
        Self {
            table,
            filters,
            receiver,
        }
    }

    pub fn table(&self) -> Table {
        self.table
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Wait for the next matching event. `None` once the feed is closed.
    pub async fn next(&mut self) -> Option<FeedNotice> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.matches(self.table, &self.filters) => {
                    return Some(FeedNotice::Change(event));
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => return Some(FeedNotice::Lagged(skipped)),
                Err(RecvError::Closed) => return None,
            }
        }
    }

    pub fn into_stream(self) -> BoxStream<'static, FeedNotice> {
        stream::unfold(self, |mut feed| async move {
            feed.next().await.map(|notice| (notice, feed))
        })
        .boxed()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("table", &self.table)
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

pub fn decode_row<T: DeserializeOwned>(row: Row) -> Result<T, RepoError> {
    serde_json::from_value(Value::Object(row)).map_err(|err| RepoError::Decode(err.to_string()))
}

pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, RepoError> {
    rows.into_iter().map(decode_row).collect()
}

/// Build a single-column patch.
pub fn patch(column: &str, value: impl Into<Value>) -> Row {
    let mut row = Row::new();
    row.insert(column.to_string(), value.into());
    row
}
