use tierstore_storage::ChangeSet;

use crate::context::ContextRole;

/// Notified after a change set reaches the backing store.
pub trait ChangeObserver: Send + Sync {
    fn context_did_save(&self, origin: ContextRole, changes: &ChangeSet);
}

/// Diagnostic observer registered by `Engine::prepare`.
#[derive(Debug, Default)]
pub struct LogChanges;

impl ChangeObserver for LogChanges {
    fn context_did_save(&self, origin: ContextRole, changes: &ChangeSet) {
        if !changes.inserted.is_empty() {
            tracing::debug!(
                context = %origin,
                count = changes.inserted.len(),
                records = ?changes.inserted,
                "inserted"
            );
        }
        if !changes.updated.is_empty() {
            tracing::debug!(
                context = %origin,
                count = changes.updated.len(),
                records = ?changes.updated,
                "updated"
            );
        }
        if !changes.deleted.is_empty() {
            tracing::debug!(
                context = %origin,
                count = changes.deleted.len(),
                ids = ?changes.deleted_ids().collect::<Vec<_>>(),
                "deleted"
            );
        }
    }
}
