use crate::catalog::schema::{SchemaVersion, TableSchema};
use crate::error::StashError;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Runtime configuration for a stash instance.
#[derive(Debug, Clone)]
pub struct StashConfig {
    pub name: String,
    /// Upper bound on live pool workers.
    pub max_workers: usize,
    pub action_queue_capacity: usize,
    /// Directory holding the store snapshot; `None` keeps the store in memory.
    pub data_dir: Option<PathBuf>,
    pub schema: Vec<SchemaVersion>,
    pub checkpoint_on_close: bool,
}

impl Default for StashConfig {
    fn default() -> Self {
        Self {
            name: "app-db".into(),
            max_workers: 5,
            action_queue_capacity: 4096,
            data_dir: None,
            schema: vec![SchemaVersion::new(1).table("data", "name")],
            checkpoint_on_close: true,
        }
    }
}

impl StashConfig {
    pub fn in_memory(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_dir: None,
            ..Self::default()
        }
    }

    pub fn persistent(name: impl Into<String>, dir: impl AsRef<Path>) -> Self {
        Self {
            name: name.into(),
            data_dir: Some(dir.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    pub fn with_schema(mut self, schema: Vec<SchemaVersion>) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_version(mut self, version: SchemaVersion) -> Self {
        self.schema.push(version);
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.action_queue_capacity = capacity;
        self
    }

    pub fn latest_version(&self) -> u32 {
        self.schema.iter().map(|v| v.version).max().unwrap_or(0)
    }

    /// Schema versions sorted ascending.
    pub fn ordered_schema(&self) -> Vec<SchemaVersion> {
        let mut versions = self.schema.clone();
        versions.sort_by_key(|v| v.version);
        versions
    }
}

pub(crate) fn validate_config(config: &StashConfig) -> Result<(), StashError> {
    if config.name.trim().is_empty() {
        return Err(StashError::InvalidConfig {
            message: "name must not be empty".into(),
        });
    }
    if config.name.contains(['/', '\\']) {
        return Err(StashError::InvalidConfig {
            message: format!("name '{}' must not contain path separators", config.name),
        });
    }
    if config.max_workers == 0 {
        return Err(StashError::InvalidConfig {
            message: "max_workers must be > 0".into(),
        });
    }
    if config.action_queue_capacity == 0 {
        return Err(StashError::InvalidConfig {
            message: "action_queue_capacity must be > 0".into(),
        });
    }
    if config.schema.is_empty() {
        return Err(StashError::InvalidConfig {
            message: "at least one schema version is required".into(),
        });
    }
    let mut seen = BTreeSet::new();
    for version in &config.schema {
        if version.version == 0 {
            return Err(StashError::InvalidConfig {
                message: "schema versions start at 1".into(),
            });
        }
        if !seen.insert(version.version) {
            return Err(StashError::InvalidConfig {
                message: format!("schema version {} is declared twice", version.version),
            });
        }
        for (table, spec) in &version.stores {
            if let Some(spec) = spec {
                TableSchema::parse(table, spec).map_err(|e| StashError::InvalidConfig {
                    message: format!("schema version {}: {e}", version.version),
                })?;
            }
        }
    }
    Ok(())
}
