pub mod loader;
pub mod writer;

use crate::catalog::Catalog;
use crate::storage::keyspace::Keyspace;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// File extension of store snapshots.
pub const CHECKPOINT_EXTENSION: &str = "stash";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    pub filename: String,
    pub version: u32,
    pub rows: usize,
    pub sha256_hex: String,
    pub created_at_micros: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct CheckpointData {
    pub name: String,
    pub catalog: Catalog,
    pub keyspace: Keyspace,
}

pub fn checkpoint_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}.{CHECKPOINT_EXTENSION}"))
}
