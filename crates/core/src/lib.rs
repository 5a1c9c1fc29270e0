pub mod error;
pub mod field_value;
pub mod ids;
pub mod query;
pub mod record;
pub mod schema;

pub use error::CoreError;
pub use field_value::FieldValue;
pub use ids::*;
pub use query::{Predicate, Query, SortDescriptor};
pub use record::{Model, Record};
pub use schema::{AttributeDescription, AttributeKind, EntityDescription, Schema};
