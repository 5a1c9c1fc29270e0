use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("object collision: {object_id}")]
    ObjectCollision { object_id: String },

    #[error("core error: {0}")]
    Core(#[from] tierstore_core::CoreError),
}

#[derive(Debug, Error)]
pub enum LocationError {
    #[error("no container registered for shared group {0}")]
    UnknownGroup(String),

    #[error("cannot prepare directory {path}: {source}")]
    Directory {
        path: String,
        #[source]
        source: std::io::Error,
    },
}
