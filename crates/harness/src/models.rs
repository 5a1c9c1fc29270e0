use tierstore_core::{
    AttributeDescription, AttributeKind, EntityDescription, FieldValue, Model, ObjectId, Record,
    Schema,
};
use tierstore_engine::{FetchResult, RequestScope};

pub const BLOG: &str = "blog";

/// Users own and view posts.
pub fn blog_schema() -> Schema {
    Schema::new(BLOG)
        .entity(
            EntityDescription::new(User::ENTITY)
                .attribute(AttributeDescription::new("name", AttributeKind::Text).required())
                .attribute(AttributeDescription::new("email", AttributeKind::Text)),
        )
        .entity(
            EntityDescription::new(Post::ENTITY)
                .attribute(
                    AttributeDescription::new("desc", AttributeKind::Text)
                        .required()
                        .with_default(""),
                )
                .attribute(AttributeDescription::new("created_at", AttributeKind::Timestamp))
                .attribute(AttributeDescription::new(
                    "owner",
                    AttributeKind::Reference(User::ENTITY.to_string()),
                ))
                .attribute(AttributeDescription::new(
                    "viewer",
                    AttributeKind::Reference(User::ENTITY.to_string()),
                )),
        )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    record: Record,
}

impl User {
    pub fn name(&self) -> Option<&str> {
        self.record.get_text("name")
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.record.set("name", name.into());
    }

    pub fn email(&self) -> Option<&str> {
        self.record.get_text("email")
    }

    pub fn set_email(&mut self, email: Option<&str>) {
        self.record.set("email", email);
    }
}

impl Model for User {
    const ENTITY: &'static str = "User";

    fn from_record(record: Record) -> Self {
        Self { record }
    }

    fn as_record(&self) -> &Record {
        &self.record
    }

    fn as_record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    fn into_record(self) -> Record {
        self.record
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Post {
    record: Record,
}

impl Post {
    pub fn desc(&self) -> Option<&str> {
        self.record.get_text("desc")
    }

    pub fn set_desc(&mut self, desc: impl Into<String>) {
        self.record.set("desc", desc.into());
    }

    /// Milliseconds since the Unix epoch.
    pub fn created_at(&self) -> Option<i64> {
        self.record.get("created_at").and_then(FieldValue::as_timestamp)
    }

    pub fn set_created_at(&mut self, millis: i64) {
        self.record.set("created_at", FieldValue::Timestamp(millis));
    }

    pub fn owner_id(&self) -> Option<ObjectId> {
        self.record.get_ref("owner")
    }

    pub fn set_owner(&mut self, owner: &User) {
        self.record.set("owner", owner.id());
    }

    pub fn viewer_id(&self) -> Option<ObjectId> {
        self.record.get_ref("viewer")
    }

    pub fn set_viewer(&mut self, viewer: &User) {
        self.record.set("viewer", viewer.id());
    }

    /// Resolves the owner through `scope`.
    pub fn owner(&self, scope: &RequestScope) -> FetchResult<User> {
        match self.owner_id() {
            Some(id) => scope.fetch_by_id(id),
            None => FetchResult::empty(),
        }
    }
}

impl Model for Post {
    const ENTITY: &'static str = "Post";

    fn from_record(record: Record) -> Self {
        Self { record }
    }

    fn as_record(&self) -> &Record {
        &self.record
    }

    fn as_record_mut(&mut self) -> &mut Record {
        &mut self.record
    }

    fn into_record(self) -> Record {
        self.record
    }
}
