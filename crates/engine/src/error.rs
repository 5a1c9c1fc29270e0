use std::fmt;
use std::sync::Arc;

use thiserror::Error;
use tierstore_core::{CoreError, ObjectId};
use tierstore_storage::{LocationError, StorageError};

use crate::context::ContextRole;

#[derive(Debug, Error)]
pub enum SchemaError {
    #[error("schema not found: {0}")]
    NotFound(String),

    #[error("failed to load schema {name}: {reason}")]
    LoadFailure { name: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Underlying cause of an initialization or system failure.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    #[error("location error: {0}")]
    Location(#[from] LocationError),

    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("{0} context is not attached to a store")]
    NotRoot(ContextRole),
}

/// Error carried by every operation result.
#[derive(Debug, Clone, Error)]
pub enum StackError {
    #[error("initialization failed: {0}")]
    Init(#[source] Arc<EngineError>),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("system error: {0}")]
    System(#[source] Arc<EngineError>),

    #[error("{0}")]
    Custom(AbortReason),
}

impl StackError {
    pub(crate) fn init(cause: impl Into<EngineError>) -> Self {
        Self::Init(Arc::new(cause.into()))
    }

    pub(crate) fn system(cause: impl Into<EngineError>) -> Self {
        Self::System(Arc::new(cause.into()))
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }

    pub fn is_system(&self) -> bool {
        matches!(self, Self::System(_))
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState(_))
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match self {
            Self::Custom(reason) => Some(reason),
            _ => None,
        }
    }

    /// The engine-level cause of an `Init` or `System` error.
    pub fn cause(&self) -> Option<&EngineError> {
        match self {
            Self::Init(cause) | Self::System(cause) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct AbortMessage(String);

/// Why a transaction body gave up. May be empty.
#[derive(Debug, Clone, Default)]
pub struct AbortReason {
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl AbortReason {
    pub fn unspecified() -> Self {
        Self::default()
    }

    pub fn new<E>(cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn message(message: impl Into<String>) -> Self {
        Self::new(AbortMessage(message.into()))
    }

    pub fn cause(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.cause.as_deref()
    }

    pub fn is_unspecified(&self) -> bool {
        self.cause.is_none()
    }
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.cause {
            Some(cause) => write!(f, "transaction aborted: {cause}"),
            None => f.write_str("transaction aborted"),
        }
    }
}

impl From<StackError> for AbortReason {
    fn from(error: StackError) -> Self {
        Self::new(error)
    }
}

impl From<Option<StackError>> for AbortReason {
    fn from(error: Option<StackError>) -> Self {
        error.map_or_else(Self::unspecified, Self::new)
    }
}

impl From<&str> for AbortReason {
    fn from(message: &str) -> Self {
        Self::message(message)
    }
}

impl From<String> for AbortReason {
    fn from(message: String) -> Self {
        Self::message(message)
    }
}
