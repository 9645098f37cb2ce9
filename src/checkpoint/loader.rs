use crate::catalog::Catalog;
use crate::checkpoint::CheckpointData;
use crate::error::StashError;
use crate::storage::keyspace::Keyspace;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

const DIGEST_LEN: usize = 32;

#[derive(Debug)]
pub struct LoadedCheckpoint {
    pub name: String,
    pub catalog: Catalog,
    pub keyspace: Keyspace,
}

pub fn load_checkpoint(path: &Path) -> Result<LoadedCheckpoint, StashError> {
    let bytes = fs::read(path)?;
    if bytes.len() < DIGEST_LEN {
        return Err(StashError::Decode("checkpoint too small".into()));
    }
    let (payload, trailer) = bytes.split_at(bytes.len() - DIGEST_LEN);
    let actual = Sha256::digest(payload);
    if actual.as_slice() != trailer {
        return Err(StashError::IntegrityError {
            message: format!("checkpoint {} hash mismatch", path.display()),
        });
    }
    let data: CheckpointData = rmp_serde::from_slice(payload)?;
    Ok(LoadedCheckpoint {
        name: data.name,
        catalog: data.catalog,
        keyspace: data.keyspace,
    })
}
