//! Shared vocabulary for talking to the hosted marketplace store.
//!
//! Adapters speak in [`Table`]s, [`Row`]s and [`Filter`]s, and publish row-level
//! mutations as [`ChangeEvent`]s. Nothing here performs I/O.

mod change;
mod filter;
mod table;

pub use change::{ChangeEvent, ChangeKind};
pub use filter::Filter;
pub use table::{ParseTableError, Table};

/// A single row as returned by the hosted store: column name to JSON value.
pub type Row = serde_json::Map<String, serde_json::Value>;
