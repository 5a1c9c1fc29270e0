use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tierstore_core::{ObjectId, Record};

use crate::error::StorageError;
use crate::traits::{BackingStore, ChangeSet, StoreKind};

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    records: Vec<Record>,
}

/// Store that keeps every record in memory and persists the whole set as one
/// msgpack file. Each commit writes a sibling temp file and renames it over
/// the snapshot, so the file on disk is always a complete committed state.
pub struct BinaryStore {
    path: PathBuf,
    records: BTreeMap<ObjectId, Record>,
}

impl BinaryStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let records = match fs::read(&path) {
            Ok(bytes) => {
                let snapshot: Snapshot = rmp_serde::from_slice(&bytes)
                    .map_err(|e| StorageError::Serialization(e.to_string()))?;
                if snapshot.version != SNAPSHOT_VERSION {
                    return Err(StorageError::Serialization(format!(
                        "unsupported snapshot version {}",
                        snapshot.version
                    )));
                }
                snapshot.records.into_iter().map(|r| (r.id(), r)).collect()
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(StorageError::Io(e)),
        };

        let store = Self { path, records };
        if !store.path.exists() {
            store.write_snapshot(&store.records)?;
        }
        tracing::debug!(path = %store.path.display(), records = store.records.len(), "opened binary store");
        Ok(store)
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".tmp");
        PathBuf::from(name)
    }

    fn write_snapshot(&self, records: &BTreeMap<ObjectId, Record>) -> Result<(), StorageError> {
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            records: records.values().cloned().collect(),
        };
        let bytes =
            rmp_serde::to_vec(&snapshot).map_err(|e| StorageError::Serialization(e.to_string()))?;

        let temp = self.temp_path();
        let mut file = fs::File::create(&temp)?;
        file.write_all(&bytes)?;
        file.sync_all()?;
        fs::rename(&temp, &self.path)?;
        Ok(())
    }
}

impl BackingStore for BinaryStore {
    fn kind(&self) -> StoreKind {
        StoreKind::Binary
    }

    fn path(&self) -> Option<&Path> {
        Some(&self.path)
    }

    fn load(&self, object_id: ObjectId) -> Result<Option<Record>, StorageError> {
        Ok(self.records.get(&object_id).cloned())
    }

    fn load_entity(&self, entity: &str) -> Result<Vec<Record>, StorageError> {
        Ok(self
            .records
            .values()
            .filter(|r| r.entity() == entity)
            .cloned()
            .collect())
    }

    fn count(&self, entity: &str) -> Result<u64, StorageError> {
        Ok(self.records.values().filter(|r| r.entity() == entity).count() as u64)
    }

    fn commit(&mut self, changes: &ChangeSet) -> Result<(), StorageError> {
        if changes.is_empty() {
            return Ok(());
        }
        let mut next = self.records.clone();

        for record in &changes.inserted {
            if next.contains_key(&record.id()) {
                return Err(StorageError::ObjectCollision {
                    object_id: record.id().to_string(),
                });
            }
            next.insert(record.id(), record.clone());
        }
        for record in &changes.updated {
            match next.get_mut(&record.id()) {
                Some(existing) if existing.entity() == record.entity() => *existing = record.clone(),
                _ => {
                    return Err(StorageError::NotFound(format!(
                        "{} {}",
                        record.entity(),
                        record.id()
                    )));
                }
            }
        }
        for record in &changes.deleted {
            if next.remove(&record.id()).is_none() {
                return Err(StorageError::NotFound(format!(
                    "{} {}",
                    record.entity(),
                    record.id()
                )));
            }
        }

        self.write_snapshot(&next)?;
        self.records = next;
        Ok(())
    }
}
