use std::path::Path;

use serde::{Deserialize, Serialize};
use tierstore_core::{ObjectId, Record};

use crate::error::StorageError;

/// How the backing store persists its records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// SQLite database file.
    #[default]
    Sqlite,
    /// SQLite database held in memory; nothing touches disk.
    Memory,
    /// Whole-store msgpack snapshot, rewritten on every commit.
    Binary,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Memory => "memory",
            Self::Binary => "binary",
        }
    }

    /// Extension of the backing file, or `None` when the store has no file.
    pub fn file_extension(&self) -> Option<&'static str> {
        match self {
            Self::Sqlite => Some("sqlite"),
            Self::Memory => None,
            Self::Binary => Some("store"),
        }
    }

    pub fn file_name(&self, store_name: &str) -> Option<String> {
        self.file_extension().map(|ext| format!("{store_name}.{ext}"))
    }
}

/// Everything one save pushes down to the store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub inserted: Vec<Record>,
    pub updated: Vec<Record>,
    /// Last known state of each deleted record.
    pub deleted: Vec<Record>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inserted.len() + self.updated.len() + self.deleted.len()
    }

    pub fn deleted_ids(&self) -> impl Iterator<Item = ObjectId> + '_ {
        self.deleted.iter().map(Record::id)
    }
}

pub trait BackingStore: Send {
    fn kind(&self) -> StoreKind;

    /// File the store persists to, if any.
    fn path(&self) -> Option<&Path>;

    fn load(&self, object_id: ObjectId) -> Result<Option<Record>, StorageError>;

    fn load_entity(&self, entity: &str) -> Result<Vec<Record>, StorageError>;

    fn count(&self, entity: &str) -> Result<u64, StorageError>;

    /// Apply a change set atomically: either every change lands or none does.
    /// Updating or deleting an object the store does not hold is an error.
    fn commit(&mut self, changes: &ChangeSet) -> Result<(), StorageError>;
}
