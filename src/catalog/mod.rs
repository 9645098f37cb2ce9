pub mod schema;
pub mod types;

use crate::catalog::schema::{SchemaVersion, TableSchema};
use crate::error::StashError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Table definitions in force at one schema version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Catalog {
    pub version: u32,
    pub tables: BTreeMap<String, TableSchema>,
}

/// What applying one schema version did to the set of tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CatalogChanges {
    pub created: Vec<String>,
    pub reindexed: Vec<String>,
    pub dropped: Vec<String>,
}

impl CatalogChanges {
    pub fn is_empty(&self) -> bool {
        self.created.is_empty() && self.reindexed.is_empty() && self.dropped.is_empty()
    }
}

impl Catalog {
    pub fn table(&self, name: &str) -> Result<&TableSchema, StashError> {
        self.tables
            .get(name)
            .ok_or_else(|| StashError::TableNotFound {
                table: name.to_string(),
            })
    }

    pub fn table_names(&self) -> Vec<String> {
        self.tables.keys().cloned().collect()
    }

    /// Applies one version on top of the current definitions. Tables the
    /// version does not mention are carried over unchanged.
    pub fn apply_version(&mut self, version: &SchemaVersion) -> Result<CatalogChanges, StashError> {
        if version.version <= self.version {
            return Err(StashError::Validation(format!(
                "schema version {} is not newer than current version {}",
                version.version, self.version
            )));
        }

        let mut next = self.tables.clone();
        let mut changes = CatalogChanges::default();
        for (name, spec) in &version.stores {
            match spec {
                None => {
                    if next.remove(name).is_some() {
                        changes.dropped.push(name.clone());
                    }
                }
                Some(spec) => {
                    let schema = TableSchema::parse(name, spec)?;
                    match next.get(name) {
                        None => changes.created.push(name.clone()),
                        Some(existing) if existing.primary_key != schema.primary_key => {
                            return Err(StashError::Validation(format!(
                                "table '{name}' cannot change its primary key from '{}' to '{}'",
                                existing.primary_key.column, schema.primary_key.column
                            )));
                        }
                        Some(existing) if existing.indexes != schema.indexes => {
                            changes.reindexed.push(name.clone());
                        }
                        Some(_) => {}
                    }
                    next.insert(name.clone(), schema);
                }
            }
        }

        self.tables = next;
        self.version = version.version;
        Ok(changes)
    }
}
