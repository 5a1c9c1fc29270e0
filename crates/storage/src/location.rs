use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::LocationError;

/// Resolves where a store's backing file lives.
pub trait StorageLocation: Send + Sync {
    fn resolve(&self, file_name: &str, shared_group: Option<&str>) -> Result<PathBuf, LocationError>;
}

/// Places stores in a base directory, or in a per-group container directory
/// when a shared group is requested.
#[derive(Debug, Clone)]
pub struct DirectoryLocation {
    base: PathBuf,
    groups: HashMap<String, PathBuf>,
}

impl DirectoryLocation {
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            groups: HashMap::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>, container: impl Into<PathBuf>) -> Self {
        self.groups.insert(group.into(), container.into());
        self
    }
}

impl StorageLocation for DirectoryLocation {
    fn resolve(&self, file_name: &str, shared_group: Option<&str>) -> Result<PathBuf, LocationError> {
        let dir = match shared_group {
            Some(group) => self
                .groups
                .get(group)
                .ok_or_else(|| LocationError::UnknownGroup(group.to_string()))?,
            None => &self.base,
        };
        fs::create_dir_all(dir).map_err(|source| LocationError::Directory {
            path: dir.display().to_string(),
            source,
        })?;
        Ok(dir.join(file_name))
    }
}

/// Delete every file next to `store_path` whose name starts with the store's
/// file name (journal, WAL and temp files included). Failures are logged and
/// skipped. Returns the paths that were removed.
pub fn remove_backing_files(store_path: &Path) -> Vec<PathBuf> {
    let mut removed = Vec::new();
    let (Some(dir), Some(file_name)) = (store_path.parent(), store_path.file_name()) else {
        tracing::warn!(path = %store_path.display(), "store path has no parent directory");
        return removed;
    };
    let prefix = file_name.to_string_lossy();

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "failed to list store directory");
            return removed;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        let matches = path.is_file()
            && entry
                .file_name()
                .to_string_lossy()
                .starts_with(prefix.as_ref());
        if !matches {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "removed store file");
                removed.push(path);
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove store file"),
        }
    }
    removed
}
