use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, OptionalExtension};
use tierstore_core::{FieldValue, ObjectId, Record};

use crate::error::StorageError;
use crate::traits::{BackingStore, ChangeSet, StoreKind};

/// Convert Vec<u8> to fixed-size array with proper error handling.
fn to_array<const N: usize>(v: Vec<u8>, label: &str) -> Result<[u8; N], StorageError> {
    v.try_into()
        .map_err(|_| StorageError::Serialization(format!("invalid {label} length")))
}

pub struct SqliteStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let conn = Connection::open(&path)?;
        crate::schema::init_schema(&conn)?;
        tracing::debug!(path = %path.display(), "opened sqlite store");
        Ok(Self {
            conn,
            path: Some(path),
        })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn, path: None })
    }

    fn load_fields(&self, object_id: ObjectId) -> Result<BTreeMap<String, FieldValue>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT field_key, value FROM fields WHERE object_id = ?1")?;
        let rows = stmt.query_map(rusqlite::params![object_id.as_bytes().as_slice()], |row| {
            let key: String = row.get(0)?;
            let value: Vec<u8> = row.get(1)?;
            Ok((key, value))
        })?;

        let mut fields = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            fields.insert(key, FieldValue::from_msgpack(&value)?);
        }
        Ok(fields)
    }
}

fn write_fields(conn: &Connection, record: &Record) -> Result<(), StorageError> {
    for (key, value) in record.fields() {
        let value_bytes = value.to_msgpack()?;
        conn.execute(
            "INSERT INTO fields (object_id, field_key, value) VALUES (?1, ?2, ?3)",
            rusqlite::params![record.id().as_bytes().as_slice(), key, value_bytes],
        )?;
    }
    Ok(())
}

fn insert_object(conn: &Connection, record: &Record) -> Result<(), StorageError> {
    let result = conn.execute(
        "INSERT INTO objects (object_id, entity) VALUES (?1, ?2)",
        rusqlite::params![record.id().as_bytes().as_slice(), record.entity()],
    );
    match result {
        Ok(_) => {}
        Err(rusqlite::Error::SqliteFailure(err, _))
            if err.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            return Err(StorageError::ObjectCollision {
                object_id: record.id().to_string(),
            });
        }
        Err(e) => return Err(StorageError::Sqlite(e)),
    }
    write_fields(conn, record)
}

fn update_object(conn: &Connection, record: &Record) -> Result<(), StorageError> {
    let changed = conn.execute(
        "UPDATE objects SET updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)
         WHERE object_id = ?1 AND entity = ?2",
        rusqlite::params![record.id().as_bytes().as_slice(), record.entity()],
    )?;
    if changed == 0 {
        return Err(StorageError::NotFound(format!(
            "{} {}",
            record.entity(),
            record.id()
        )));
    }
    conn.execute(
        "DELETE FROM fields WHERE object_id = ?1",
        rusqlite::params![record.id().as_bytes().as_slice()],
    )?;
    write_fields(conn, record)
}

fn delete_object(conn: &Connection, record: &Record) -> Result<(), StorageError> {
    let changed = conn.execute(
        "DELETE FROM objects WHERE object_id = ?1",
        rusqlite::params![record.id().as_bytes().as_slice()],
    )?;
    if changed == 0 {
        return Err(StorageError::NotFound(format!(
            "{} {}",
            record.entity(),
            record.id()
        )));
    }
    Ok(())
}

impl BackingStore for SqliteStore {
    fn kind(&self) -> StoreKind {
        if self.path.is_some() {
            StoreKind::Sqlite
        } else {
            StoreKind::Memory
        }
    }

    fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn load(&self, object_id: ObjectId) -> Result<Option<Record>, StorageError> {
        let entity: Option<String> = self
            .conn
            .query_row(
                "SELECT entity FROM objects WHERE object_id = ?1",
                rusqlite::params![object_id.as_bytes().as_slice()],
                |row| row.get(0),
            )
            .optional()?;

        match entity {
            Some(entity) => {
                let fields = self.load_fields(object_id)?;
                Ok(Some(Record::from_parts(object_id, entity, fields)))
            }
            None => Ok(None),
        }
    }

    fn load_entity(&self, entity: &str) -> Result<Vec<Record>, StorageError> {
        let mut stmt = self.conn.prepare(
            "SELECT o.object_id, f.field_key, f.value
             FROM objects o LEFT JOIN fields f ON f.object_id = o.object_id
             WHERE o.entity = ?1
             ORDER BY o.object_id",
        )?;
        let rows = stmt.query_map(rusqlite::params![entity], |row| {
            let id_bytes: Vec<u8> = row.get(0)?;
            let key: Option<String> = row.get(1)?;
            let value: Option<Vec<u8>> = row.get(2)?;
            Ok((id_bytes, key, value))
        })?;

        let mut records: Vec<Record> = Vec::new();
        for row in rows {
            let (id_bytes, key, value) = row?;
            let object_id = ObjectId::from_bytes(to_array::<16>(id_bytes, "object_id")?);
            if records.last().is_none_or(|r| r.id() != object_id) {
                records.push(Record::with_id(object_id, entity));
            }
            if let (Some(key), Some(value), Some(record)) = (key, value, records.last_mut()) {
                record.set(key, FieldValue::from_msgpack(&value)?);
            }
        }
        Ok(records)
    }

    fn count(&self, entity: &str) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM objects WHERE entity = ?1",
            rusqlite::params![entity],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn commit(&mut self, changes: &ChangeSet) -> Result<(), StorageError> {
        if changes.is_empty() {
            return Ok(());
        }
        let tx = self.conn.transaction()?;

        for record in &changes.inserted {
            insert_object(&tx, record)?;
        }
        for record in &changes.updated {
            update_object(&tx, record)?;
        }
        for record in &changes.deleted {
            delete_object(&tx, record)?;
        }

        tx.commit()?;
        Ok(())
    }
}
