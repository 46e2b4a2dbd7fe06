use async_trait::async_trait;
use harvestline_query::{ChangeEvent, Filter, Table};
use uuid::Uuid;

use crate::application::repos::{RemoteStore, RepoError};

/// A change feed a counter listens to.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedSpec {
    pub table: Table,
    pub filters: Vec<Filter>,
}

impl FeedSpec {
    pub fn new(table: Table, filters: Vec<Filter>) -> Self {
        Self { table, filters }
    }

    pub fn whole_table(table: Table) -> Self {
        Self::new(table, Vec::new())
    }
}

/// One kind of counter: how to compute it and which feeds invalidate it.
#[async_trait]
pub trait CounterSource: Send + Sync {
    /// Short name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Compute the authoritative aggregate for `owner`.
    async fn aggregate(&self, store: &dyn RemoteStore, owner: Uuid) -> Result<u64, RepoError>;

    /// Feeds whose events should trigger a refresh for `owner`.
    fn feeds(&self, owner: Uuid) -> Vec<FeedSpec>;

    /// Whether a matching event should trigger a refresh.
    fn reacts_to(&self, _event: &ChangeEvent) -> bool {
        true
    }
}
