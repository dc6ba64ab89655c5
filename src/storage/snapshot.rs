// ============================================================================
// Store Snapshots
// ============================================================================

use super::record::StoredObject;
use crate::core::{AssemblyError, ObjectId, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Committed records grouped by kind, then id.
pub type StoreTables = BTreeMap<String, BTreeMap<ObjectId, StoredObject>>;

#[derive(Debug, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    pub next_id: ObjectId,
    pub records: StoreTables,
    pub metadata: SnapshotMetadata,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub created_at: u64,
    pub record_count: usize,
    pub kind_count: usize,
}

impl StoreSnapshot {
    pub fn new(records: StoreTables, next_id: ObjectId) -> Self {
        let record_count = records.values().map(BTreeMap::len).sum();
        let kind_count = records.len();
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        Self {
            version: 1,
            next_id,
            records,
            metadata: SnapshotMetadata {
                created_at,
                record_count,
                kind_count,
            },
        }
    }
}

pub struct SnapshotManager {
    snapshot_path: PathBuf,
}

impl SnapshotManager {
    pub fn new<P: AsRef<Path>>(snapshot_path: P) -> Self {
        Self {
            snapshot_path: snapshot_path.as_ref().to_path_buf(),
        }
    }

    /// Write the snapshot to a temporary file, then rename it into place.
    pub fn save(&self, snapshot: &StoreSnapshot) -> Result<()> {
        if let Some(parent) = self.snapshot_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let temp_path = self.snapshot_path.with_extension("tmp");
        let temp_file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(temp_file);
        let serialized = rmp_serde::to_vec(snapshot)
            .map_err(|e| AssemblyError::StorageError(format!("Failed to serialize snapshot: {}", e)))?;
        writer.write_all(&serialized)?;
        writer.flush()?;
        writer.get_mut().sync_all()?;
        fs::rename(&temp_path, &self.snapshot_path)?;
        Ok(())
    }

    pub fn load(&self) -> Result<Option<StoreSnapshot>> {
        if !self.snapshot_path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&self.snapshot_path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        let snapshot: StoreSnapshot = rmp_serde::from_slice(&data)
            .map_err(|e| AssemblyError::StorageError(format!("Failed to deserialize snapshot: {}", e)))?;
        Ok(Some(snapshot))
    }

    pub fn exists(&self) -> bool {
        self.snapshot_path.exists()
    }
}
