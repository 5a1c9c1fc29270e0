use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::FieldValue;
use crate::ids::ObjectId;
use crate::record::Record;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    Text,
    Integer,
    Float,
    Boolean,
    Timestamp,
    Bytes,
    /// Reference to a record of the named entity.
    Reference(String),
}

impl AttributeKind {
    pub fn accepts(&self, value: &FieldValue) -> bool {
        matches!(
            (self, value),
            (Self::Text, FieldValue::Text(_))
                | (Self::Integer, FieldValue::Integer(_))
                | (Self::Float, FieldValue::Float(_))
                | (Self::Boolean, FieldValue::Boolean(_))
                | (Self::Timestamp, FieldValue::Timestamp(_))
                | (Self::Bytes, FieldValue::Bytes(_))
                | (Self::Reference(_), FieldValue::Ref(_))
        )
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Timestamp => "timestamp",
            Self::Bytes => "bytes",
            Self::Reference(_) => "reference",
        }
    }
}

fn default_optional() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeDescription {
    pub name: String,
    pub kind: AttributeKind,
    #[serde(default = "default_optional")]
    pub optional: bool,
    #[serde(default)]
    pub default: Option<FieldValue>,
}

impl AttributeDescription {
    pub fn new(name: impl Into<String>, kind: AttributeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            optional: true,
            default: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.optional = false;
        self
    }

    pub fn with_default(mut self, value: impl Into<FieldValue>) -> Self {
        self.default = Some(value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDescription {
    pub name: String,
    #[serde(default)]
    pub attributes: Vec<AttributeDescription>,
}

impl EntityDescription {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
        }
    }

    pub fn attribute(mut self, attribute: AttributeDescription) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn find_attribute(&self, name: &str) -> Option<&AttributeDescription> {
        self.attributes.iter().find(|a| a.name == name)
    }

    /// A fresh record of this entity with every attribute default applied.
    pub fn new_record(&self) -> Record {
        let mut record = Record::new(self.name.clone());
        for attribute in &self.attributes {
            if let Some(default) = &attribute.default {
                record.set(attribute.name.clone(), default.clone());
            }
        }
        record
    }

    fn violation(&self, attribute: &str, reason: impl Into<String>) -> CoreError {
        CoreError::Validation {
            entity: self.name.clone(),
            attribute: attribute.to_string(),
            reason: reason.into(),
        }
    }
}

/// The object model a store is opened with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    #[serde(default)]
    pub entities: Vec<EntityDescription>,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: Vec::new(),
        }
    }

    pub fn entity(mut self, entity: EntityDescription) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn find_entity(&self, name: &str) -> Option<&EntityDescription> {
        self.entities.iter().find(|e| e.name == name)
    }

    pub fn require_entity(&self, name: &str) -> Result<&EntityDescription, CoreError> {
        self.find_entity(name)
            .ok_or_else(|| CoreError::UnknownEntity(name.to_string()))
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.name.as_str())
    }

    /// Check a record against its entity description before it is saved.
    pub fn validate(&self, record: &Record) -> Result<(), CoreError> {
        let entity = self.require_entity(record.entity())?;

        for (key, value) in record.fields() {
            let Some(attribute) = entity.find_attribute(key) else {
                return Err(entity.violation(key, "undeclared attribute"));
            };
            if value.is_null() {
                if !attribute.optional {
                    return Err(entity.violation(key, "required attribute is null"));
                }
            } else if !attribute.kind.accepts(value) {
                return Err(entity.violation(
                    key,
                    format!(
                        "expected {}, got {}",
                        attribute.kind.as_str(),
                        value.type_name()
                    ),
                ));
            }
        }

        for attribute in entity.attributes.iter().filter(|a| !a.optional) {
            if record.get(&attribute.name).is_none() {
                return Err(entity.violation(&attribute.name, "required attribute is missing"));
            }
        }
        Ok(())
    }

    /// Check that every reference in `record` points at an existing record of
    /// the declared entity. `entity_of` resolves an identity to its entity
    /// name, or `None` when no such record is visible.
    pub fn validate_references<E>(
        &self,
        record: &Record,
        mut entity_of: impl FnMut(ObjectId) -> Result<Option<String>, E>,
    ) -> Result<(), E>
    where
        E: From<CoreError>,
    {
        let entity = self.require_entity(record.entity())?;
        for attribute in &entity.attributes {
            let AttributeKind::Reference(target) = &attribute.kind else {
                continue;
            };
            let Some(id) = record.get_ref(&attribute.name) else {
                continue;
            };
            match entity_of(id)? {
                Some(found) if found == *target => {}
                Some(found) => {
                    return Err(entity
                        .violation(&attribute.name, format!("expected reference to {target}, got {found}"))
                        .into());
                }
                None => {
                    return Err(entity
                        .violation(&attribute.name, format!("dangling reference to {target} {id}"))
                        .into());
                }
            }
        }
        Ok(())
    }

    /// Every `(entity, attribute)` pair declared as a reference to `target`.
    pub fn inbound_references<'a>(&'a self, target: &'a str) -> impl Iterator<Item = (&'a str, &'a str)> + 'a {
        self.entities.iter().flat_map(move |entity| {
            entity.attributes.iter().filter_map(move |attribute| match &attribute.kind {
                AttributeKind::Reference(to) if to == target => {
                    Some((entity.name.as_str(), attribute.name.as_str()))
                }
                _ => None,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn blog() -> Schema {
        Schema::new("blog")
            .entity(
                EntityDescription::new("User")
                    .attribute(AttributeDescription::new("name", AttributeKind::Text).required())
                    .attribute(AttributeDescription::new("email", AttributeKind::Text))
                    .attribute(
                        AttributeDescription::new("karma", AttributeKind::Integer).with_default(0i64),
                    ),
            )
            .entity(
                EntityDescription::new("Post")
                    .attribute(AttributeDescription::new("desc", AttributeKind::Text))
                    .attribute(AttributeDescription::new(
                        "owner",
                        AttributeKind::Reference("User".into()),
                    )),
            )
    }

    #[test]
    fn new_record_applies_defaults() {
        let schema = blog();
        let record = schema.find_entity("User").unwrap().new_record();
        assert_eq!(record.get_integer("karma"), Some(0));
        assert!(record.get("email").is_none());
    }

    #[test]
    fn validate_accepts_well_formed_records() {
        let schema = blog();
        let mut user = schema.find_entity("User").unwrap().new_record();
        user.set("name", "paco");
        user.set("email", Option::<&str>::None);
        schema.validate(&user).unwrap();

        let mut post = Record::new("Post");
        post.set("owner", user.id());
        schema.validate(&post).unwrap();
    }

    #[test]
    fn validate_rejects_missing_required_attribute() {
        let schema = blog();
        let user = Record::new("User");
        let err = schema.validate(&user).unwrap_err();
        assert!(matches!(err, CoreError::Validation { ref attribute, .. } if attribute == "name"));
    }

    #[test]
    fn validate_rejects_kind_mismatch_and_undeclared_fields() {
        let schema = blog();

        let mut post = Record::new("Post");
        post.set("owner", "not a reference");
        assert!(matches!(
            schema.validate(&post),
            Err(CoreError::Validation { ref reason, .. }) if reason == "expected reference, got text"
        ));

        let mut post = Record::new("Post");
        post.set("title", "hello");
        assert!(schema.validate(&post).is_err());

        let comment = Record::with_id(ObjectId::new(), "Comment");
        assert!(matches!(schema.validate(&comment), Err(CoreError::UnknownEntity(_))));
    }

    #[test]
    fn parses_toml_definition() {
        let source = r#"
            name = "blog"

            [[entities]]
            name = "User"

            [[entities.attributes]]
            name = "name"
            kind = "text"
            optional = false

            [[entities]]
            name = "Post"

            [[entities.attributes]]
            name = "owner"
            kind = { reference = "User" }
        "#;
        let schema: Schema = toml::from_str(source).unwrap();
        assert_eq!(schema.entity_names().collect::<Vec<_>>(), vec!["User", "Post"]);

        let name = schema.find_entity("User").unwrap().find_attribute("name").unwrap();
        assert!(!name.optional);
        let owner = schema.find_entity("Post").unwrap().find_attribute("owner").unwrap();
        assert_eq!(owner.kind, AttributeKind::Reference("User".into()));
        assert!(owner.optional);
    }

    #[test]
    fn references_must_resolve_to_the_declared_entity() {
        let schema = blog();
        let user = Record::with_id(ObjectId::new(), "User");
        let other_post = Record::with_id(ObjectId::new(), "Post");
        let known: HashMap<ObjectId, String> = [&user, &other_post]
            .into_iter()
            .map(|r| (r.id(), r.entity().to_string()))
            .collect();
        let lookup = |id: ObjectId| Ok::<_, CoreError>(known.get(&id).cloned());

        let mut post = Record::new("Post");
        post.set("owner", user.id());
        assert!(schema.validate_references(&post, lookup).is_ok());

        post.set("owner", other_post.id());
        assert!(matches!(
            schema.validate_references(&post, lookup),
            Err(CoreError::Validation { ref reason, .. }) if reason == "expected reference to User, got Post"
        ));

        post.set("owner", ObjectId::new());
        assert!(matches!(
            schema.validate_references(&post, lookup),
            Err(CoreError::Validation { ref attribute, .. }) if attribute == "owner"
        ));

        post.set("owner", Option::<ObjectId>::None);
        assert!(schema.validate_references(&post, lookup).is_ok());
    }

    #[test]
    fn inbound_references_lists_referring_attributes() {
        let schema = blog();
        assert_eq!(schema.inbound_references("User").collect::<Vec<_>>(), vec![("Post", "owner")]);
        assert_eq!(schema.inbound_references("Post").count(), 0);
    }
}
