use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown entity: {0}")]
    UnknownEntity(String),

    #[error("{entity}.{attribute}: {reason}")]
    Validation {
        entity: String,
        attribute: String,
        reason: String,
    },
}
