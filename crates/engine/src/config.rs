use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tierstore_storage::StoreKind;

use crate::error::ConfigError;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    /// Schema to load, and stem of the backing file name.
    pub store_name: String,
    pub store_kind: StoreKind,
    /// Shared container group the backing file lives in, if any.
    pub shared_group: Option<String>,
    /// Transaction bodies running longer than this are reported.
    pub slow_transaction_ms: u64,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            store_name: "default".to_string(),
            store_kind: StoreKind::Sqlite,
            shared_group: None,
            slow_transaction_ms: 2_000,
        }
    }
}

impl StackConfig {
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            ..Self::default()
        }
    }

    pub fn with_store_kind(mut self, kind: StoreKind) -> Self {
        self.store_kind = kind;
        self
    }

    pub fn with_shared_group(mut self, group: impl Into<String>) -> Self {
        self.shared_group = Some(group.into());
        self
    }

    pub fn with_slow_transaction_ms(mut self, millis: u64) -> Self {
        self.slow_transaction_ms = millis;
        self
    }

    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let source = fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Backing file name, or `None` for stores without a file.
    pub fn file_name(&self) -> Option<String> {
        self.store_kind.file_name(&self.store_name)
    }

    pub fn slow_transaction_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_transaction_ms)
    }
}
