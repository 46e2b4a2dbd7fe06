//! TOML seed files for the in-memory store.
//!
//! Each top-level key names a table and holds an array of rows:
//!
//! ```toml
//! [[products]]
//! id = "4a7c..."
//! seller_id = "9e21..."
//! name = "Heirloom tomatoes"
//! price_cents = 450
//! stock = 12
//! ```
//!
//! Timestamps are written as RFC 3339 strings, the same shape the store returns.

use std::{collections::BTreeMap, fs, path::Path};

use harvestline_query::{Row, Table};
use serde_json::Value;
use tracing::info;

use super::error::InfraError;
use super::memory::InMemoryStore;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Fixture {
    tables: BTreeMap<Table, Vec<Row>>,
}

impl Fixture {
    pub fn load(path: &Path) -> Result<Self, InfraError> {
        let data = fs::read_to_string(path)?;
        Self::parse(&data, &path.display().to_string())
    }

    /// Parse fixture text; `origin` only labels errors.
    pub fn parse(data: &str, origin: &str) -> Result<Self, InfraError> {
        let raw: BTreeMap<String, Vec<Row>> = toml::from_str(data)
            .map_err(|err| InfraError::fixture(origin, err.to_string()))?;

        let mut tables = BTreeMap::new();
        for (name, rows) in raw {
            let table: Table = name
                .parse()
                .map_err(|err| InfraError::fixture(origin, format!("{err}")))?;
            if let Some(index) = rows.iter().position(has_toml_datetime) {
                return Err(InfraError::fixture(
                    origin,
                    format!("{table} row {index} uses a TOML datetime; write timestamps as strings"),
                ));
            }
            tables
                .entry(table)
                .or_insert_with(Vec::new)
                .extend(rows);
        }

        Ok(Self { tables })
    }

    pub fn rows(&self, table: Table) -> &[Row] {
        self.tables.get(&table).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn row_count(&self) -> usize {
        self.tables.values().map(Vec::len).sum()
    }

    /// Load every table into `store` without publishing change events.
    pub fn seed(&self, store: &InMemoryStore) {
        for (table, rows) in &self.tables {
            store.seed(*table, rows.clone());
        }
        info!(
            tables = self.tables.len(),
            rows = self.row_count(),
            "Store seeded from fixture"
        );
    }
}

fn has_toml_datetime(row: &Row) -> bool {
    row.values().any(|value| match value {
        Value::Object(inner) => inner.keys().any(|key| key.starts_with("$__toml")),
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const FIXTURE: &str = r#"
[[profiles]]
id = "9e21b7a2-3c4d-4e5f-8a6b-7c8d9e0f1a2b"
display_name = "Willow Creek Farm"
role = "producer"
daily_delivery_cap = 3

[[products]]
id = "4a7c0e1d-2b3c-4d5e-9f60-718293a4b5c6"
seller_id = "9e21b7a2-3c4d-4e5f-8a6b-7c8d9e0f1a2b"
name = "Heirloom tomatoes"
price_cents = 450
stock = 12

[[users]]
id = "0b1c2d3e-4f50-4a6b-8c7d-9e0f1a2b3c4d"
display_name = "Sam"
"#;

    #[test]
    fn parses_tables_and_legacy_names() {
        let fixture = Fixture::parse(FIXTURE, "inline").expect("valid fixture");

        assert_eq!(fixture.rows(Table::Profiles).len(), 2);
        assert_eq!(fixture.rows(Table::Products).len(), 1);
        assert!(fixture.rows(Table::Orders).is_empty());
        assert_eq!(
            fixture.rows(Table::Products)[0].get("stock"),
            Some(&Value::from(12))
        );
    }

    #[test]
    fn unknown_tables_are_rejected() {
        let err = Fixture::parse("[[barns]]\nid = 1\n", "inline").unwrap_err();
        assert!(matches!(err, InfraError::Fixture { .. }));
        assert!(err.to_string().contains("barns"));
    }

    #[test]
    fn toml_datetimes_are_rejected() {
        let err = Fixture::parse("[[orders]]\ncreated_at = 2026-10-19T10:00:00Z\n", "inline")
            .unwrap_err();
        assert!(err.to_string().contains("strings"));
    }

    #[test]
    fn load_reads_from_disk_and_seeds_store() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(FIXTURE.as_bytes()).expect("write fixture");

        let fixture = Fixture::load(file.path()).expect("fixture loads");
        let store = InMemoryStore::new();
        fixture.seed(&store);

        assert_eq!(store.rows(Table::Profiles).len(), 2);
        assert_eq!(store.subscriber_count(), 0);
    }
}
