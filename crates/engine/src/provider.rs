use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use tierstore_core::Schema;

use crate::error::SchemaError;

/// Source of the schema an engine is prepared with.
pub trait SchemaProvider: Send + Sync {
    fn load_schema(&self, name: &str) -> Result<Schema, SchemaError>;
}

/// Schemas registered in code, keyed by schema name.
#[derive(Debug, Clone, Default)]
pub struct StaticSchemaProvider {
    schemas: HashMap<String, Schema>,
}

impl StaticSchemaProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_schema(mut self, schema: Schema) -> Self {
        self.schemas.insert(schema.name.clone(), schema);
        self
    }
}

impl From<Schema> for StaticSchemaProvider {
    fn from(schema: Schema) -> Self {
        Self::new().with_schema(schema)
    }
}

impl SchemaProvider for StaticSchemaProvider {
    fn load_schema(&self, name: &str) -> Result<Schema, SchemaError> {
        self.schemas
            .get(name)
            .cloned()
            .ok_or_else(|| SchemaError::NotFound(name.to_string()))
    }
}

/// Loads `<dir>/<name>.toml` schema definition files.
#[derive(Debug, Clone)]
pub struct FileSchemaProvider {
    dir: PathBuf,
}

impl FileSchemaProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl SchemaProvider for FileSchemaProvider {
    fn load_schema(&self, name: &str) -> Result<Schema, SchemaError> {
        let path = self.dir.join(format!("{name}.toml"));
        let source = match fs::read_to_string(&path) {
            Ok(source) => source,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SchemaError::NotFound(path.display().to_string()));
            }
            Err(e) => {
                return Err(SchemaError::LoadFailure {
                    name: name.to_string(),
                    reason: e.to_string(),
                });
            }
        };
        toml::from_str(&source).map_err(|e| SchemaError::LoadFailure {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}
