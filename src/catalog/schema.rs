use crate::error::StashError;
use crate::storage::store::UpgradeTx;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrimaryKeyDef {
    pub column: String,
    pub auto_increment: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexDef {
    pub column: String,
    pub unique: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSchema {
    pub table_name: String,
    pub primary_key: PrimaryKeyDef,
    #[serde(default)]
    pub indexes: Vec<IndexDef>,
}

impl TableSchema {
    /// Parses a field spec such as `"++id, name, &email"`. The first entry is
    /// the primary key; the rest are secondary indexes.
    pub fn parse(table_name: &str, spec: &str) -> Result<Self, StashError> {
        let mut entries = spec.split(',').map(str::trim);
        let pk = entries.next().unwrap_or_default();
        let (pk_column, auto_increment) = match pk.strip_prefix("++") {
            Some(column) => (column, true),
            None => (pk, false),
        };
        validate_column(table_name, pk_column)?;

        let mut indexes: Vec<IndexDef> = Vec::new();
        for entry in entries {
            if entry.is_empty() {
                continue;
            }
            let (column, unique) = match entry.strip_prefix('&') {
                Some(column) => (column, true),
                None => (entry, false),
            };
            validate_column(table_name, column)?;
            if column == pk_column || indexes.iter().any(|idx| idx.column == column) {
                return Err(StashError::Validation(format!(
                    "table '{table_name}' declares index '{column}' more than once"
                )));
            }
            indexes.push(IndexDef {
                column: column.to_string(),
                unique,
            });
        }

        Ok(Self {
            table_name: table_name.to_string(),
            primary_key: PrimaryKeyDef {
                column: pk_column.to_string(),
                auto_increment,
            },
            indexes,
        })
    }

    /// True when `column` is the primary key or carries a secondary index.
    pub fn is_indexed(&self, column: &str) -> bool {
        self.primary_key.column == column || self.index(column).is_some()
    }

    pub fn index(&self, column: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|idx| idx.column == column)
    }
}

fn validate_column(table_name: &str, column: &str) -> Result<(), StashError> {
    if column.is_empty() {
        return Err(StashError::Validation(format!(
            "table '{table_name}' has an empty key path"
        )));
    }
    if column.starts_with('*') || column.starts_with('[') || column.contains('+') {
        return Err(StashError::Validation(format!(
            "table '{table_name}': unsupported key path '{column}'"
        )));
    }
    if column.chars().any(char::is_whitespace) {
        return Err(StashError::Validation(format!(
            "table '{table_name}': key path '{column}' contains whitespace"
        )));
    }
    Ok(())
}

pub type UpgradeHook = Arc<dyn Fn(&mut UpgradeTx<'_>) -> Result<(), StashError> + Send + Sync>;

/// One registered schema version. `stores` maps a table name to its field
/// spec; `None` drops the table in this version.
#[derive(Clone)]
pub struct SchemaVersion {
    pub version: u32,
    pub stores: BTreeMap<String, Option<String>>,
    pub upgrade: Option<UpgradeHook>,
}

impl SchemaVersion {
    pub fn new(version: u32) -> Self {
        Self {
            version,
            stores: BTreeMap::new(),
            upgrade: None,
        }
    }

    pub fn table(mut self, name: impl Into<String>, spec: impl Into<String>) -> Self {
        self.stores.insert(name.into(), Some(spec.into()));
        self
    }

    pub fn drop_table(mut self, name: impl Into<String>) -> Self {
        self.stores.insert(name.into(), None);
        self
    }

    pub fn upgrade<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut UpgradeTx<'_>) -> Result<(), StashError> + Send + Sync + 'static,
    {
        self.upgrade = Some(Arc::new(hook));
        self
    }
}

impl fmt::Debug for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaVersion")
            .field("version", &self.version)
            .field("stores", &self.stores)
            .field("upgrade", &self.upgrade.is_some())
            .finish()
    }
}
