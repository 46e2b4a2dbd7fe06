use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;

use crate::{Filter, Row, Table};

/// Kind of row-level mutation carried by a change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

/// One row-level mutation published on a table's change feed.
///
/// `new` is present for inserts and updates, `old` for updates and deletes.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub table: Table,
    pub kind: ChangeKind,
    pub new: Option<Row>,
    pub old: Option<Row>,
    pub committed_at: OffsetDateTime,
}

impl ChangeEvent {
    pub fn insert(table: Table, row: Row) -> Self {
        Self::build(table, ChangeKind::Insert, Some(row), None)
    }

    pub fn update(table: Table, old: Row, new: Row) -> Self {
        Self::build(table, ChangeKind::Update, Some(new), Some(old))
    }

    pub fn delete(table: Table, old: Row) -> Self {
        Self::build(table, ChangeKind::Delete, None, Some(old))
    }

    fn build(table: Table, kind: ChangeKind, new: Option<Row>, old: Option<Row>) -> Self {
        Self {
            table,
            kind,
            new,
            old,
            committed_at: OffsetDateTime::now_utc(),
        }
    }

    /// The most recent image of the row.
    pub fn record(&self) -> Option<&Row> {
        self.new.as_ref().or(self.old.as_ref())
    }

    /// Column value from the most recent image of the row.
    pub fn column(&self, name: &str) -> Option<&Value> {
        self.record().and_then(|row| row.get(name))
    }

    /// True when the event belongs to `table` and either row image satisfies `filters`.
    pub fn matches(&self, table: Table, filters: &[Filter]) -> bool {
        if self.table != table {
            return false;
        }
        if filters.is_empty() {
            return true;
        }
        [self.new.as_ref(), self.old.as_ref()]
            .into_iter()
            .flatten()
            .any(|row| Filter::all_match(filters, row))
    }
}
