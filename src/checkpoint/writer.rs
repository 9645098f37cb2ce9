use crate::catalog::Catalog;
use crate::checkpoint::{CheckpointData, CheckpointMeta, checkpoint_path};
use crate::error::StashError;
use crate::storage::keyspace::Keyspace;
use sha2::{Digest, Sha256};
use std::fs;
use std::io::Write;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::NamedTempFile;

/// Writes the store image to `<dir>/<name>.stash`, replacing any previous
/// snapshot atomically. The payload is followed by its SHA-256 digest.
pub fn write_checkpoint(
    name: &str,
    catalog: &Catalog,
    keyspace: &Keyspace,
    dir: &Path,
) -> Result<CheckpointMeta, StashError> {
    fs::create_dir_all(dir)?;
    let checkpoint = CheckpointData {
        name: name.to_string(),
        catalog: catalog.clone(),
        keyspace: keyspace.clone(),
    };
    let encoded = rmp_serde::to_vec_named(&checkpoint)?;
    let digest = Sha256::digest(&encoded);
    let mut payload = encoded;
    payload.extend_from_slice(&digest);

    let final_path = checkpoint_path(dir, name);
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&payload)?;
    tmp.flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(&final_path).map_err(|e| StashError::Io(e.error))?;

    Ok(CheckpointMeta {
        filename: final_path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default(),
        version: catalog.version,
        rows: keyspace.row_count(),
        sha256_hex: hex::encode(digest),
        created_at_micros: now_micros(),
    })
}

fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as u64
}
