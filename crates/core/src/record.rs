use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::field_value::FieldValue;
use crate::ids::ObjectId;

/// A snapshot of one persisted entity instance.
///
/// Records are values: the context that produced a record keeps its own copy,
/// and handing a record to another context means re-resolving its identity
/// there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    id: ObjectId,
    entity: String,
    fields: BTreeMap<String, FieldValue>,
}

impl Record {
    pub fn new(entity: impl Into<String>) -> Self {
        Self::with_id(ObjectId::new(), entity)
    }

    pub fn with_id(id: ObjectId, entity: impl Into<String>) -> Self {
        Self {
            id,
            entity: entity.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn from_parts(
        id: ObjectId,
        entity: impl Into<String>,
        fields: BTreeMap<String, FieldValue>,
    ) -> Self {
        Self {
            id,
            entity: entity.into(),
            fields,
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    /// Missing fields read as `None`; an explicit null reads as `Some(Null)`.
    pub fn get(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn get_text(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(FieldValue::as_text)
    }

    pub fn get_integer(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(FieldValue::as_integer)
    }

    pub fn get_ref(&self, key: &str) -> Option<ObjectId> {
        self.get(key).and_then(FieldValue::as_ref_id)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<FieldValue>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn clear(&mut self, key: &str) -> Option<FieldValue> {
        self.fields.remove(key)
    }
}

/// Typed view over a [`Record`] of one entity.
pub trait Model: Sized {
    const ENTITY: &'static str;

    fn from_record(record: Record) -> Self;

    fn as_record(&self) -> &Record;

    fn as_record_mut(&mut self) -> &mut Record;

    fn into_record(self) -> Record;

    fn id(&self) -> ObjectId {
        self.as_record().id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_and_clear_fields() {
        let mut record = Record::new("User");
        record.set("name", "paco");
        record.set("age", 36i64);
        record.set("nickname", Option::<&str>::None);

        assert_eq!(record.entity(), "User");
        assert_eq!(record.get_text("name"), Some("paco"));
        assert_eq!(record.get_integer("age"), Some(36));
        assert_eq!(record.get("nickname"), Some(&FieldValue::Null));
        assert_eq!(record.get("email"), None);

        assert_eq!(record.clear("age"), Some(FieldValue::Integer(36)));
        assert_eq!(record.get_integer("age"), None);
    }
}
