pub mod config;
pub mod context;
pub mod error;
pub mod observer;
pub mod provider;
mod queue;
pub mod request;
pub mod result;
pub mod transaction;

pub use config::StackConfig;
pub use context::{ContextRole, WorkContext};
pub use error::{AbortReason, ConfigError, EngineError, SchemaError, StackError};
pub use observer::{ChangeObserver, LogChanges};
pub use provider::{FileSchemaProvider, SchemaProvider, StaticSchemaProvider};
pub use request::RequestScope;
pub use result::FetchResult;
pub use transaction::{Transaction, TransactionObserver, TransactionPhase};

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tierstore_core::{Query, Schema, TransactionId};
use tierstore_storage::{
    BackingStore, BinaryStore, SqliteStore, StorageLocation, StoreKind, remove_backing_files,
};

use crate::transaction::TransactionRegistry;

/// The prepared context graph: one root over the store, two writers under it.
pub(crate) struct ContextStack {
    pub(crate) schema: Arc<Schema>,
    pub(crate) read: Arc<WorkContext>,
    pub(crate) write: Arc<WorkContext>,
    pub(crate) transaction_write: Arc<WorkContext>,
    pub(crate) store_path: Option<PathBuf>,
}

impl ContextStack {
    pub(crate) fn target(&self, transactional: bool) -> &Arc<WorkContext> {
        if transactional {
            &self.transaction_write
        } else {
            &self.write
        }
    }
}

pub(crate) struct EngineShared {
    config: StackConfig,
    schema_provider: Box<dyn SchemaProvider>,
    location: Box<dyn StorageLocation>,
    stack: OnceLock<Arc<ContextStack>>,
    preparing: Mutex<()>,
    registry: Arc<TransactionRegistry>,
}

impl EngineShared {
    pub(crate) fn stack(&self) -> Result<Arc<ContextStack>, StackError> {
        self.stack
            .get()
            .cloned()
            .ok_or_else(|| StackError::invalid("engine is not prepared"))
    }
}

/// Owns one store and the contexts layered over it.
pub struct Engine {
    shared: Arc<EngineShared>,
}

impl Engine {
    pub fn new(
        config: StackConfig,
        schema_provider: impl SchemaProvider + 'static,
        location: impl StorageLocation + 'static,
    ) -> Self {
        Self {
            shared: Arc::new(EngineShared {
                config,
                schema_provider: Box::new(schema_provider),
                location: Box::new(location),
                stack: OnceLock::new(),
                preparing: Mutex::new(()),
                registry: Arc::new(TransactionRegistry::default()),
            }),
        }
    }

    pub fn config(&self) -> &StackConfig {
        &self.shared.config
    }

    /// Loads the schema, opens the store and builds the context graph.
    pub fn prepare(&self) -> Result<(), StackError> {
        let _preparing = self.shared.preparing.lock();
        if self.is_prepared() {
            return Err(StackError::invalid("engine is already prepared"));
        }

        let config = &self.shared.config;
        let schema = self
            .shared
            .schema_provider
            .load_schema(&config.store_name)
            .map_err(StackError::init)?;
        let schema = Arc::new(schema);
        let store = self.open_store().map_err(StackError::init)?;
        let store_path = store.path().map(Path::to_path_buf);
        let kind = store.kind();

        let read = WorkContext::root(ContextRole::Read, Arc::clone(&schema), store);
        read.add_observer(Arc::new(LogChanges));
        let write = WorkContext::child(ContextRole::Write, &read);
        let transaction_write = WorkContext::child(ContextRole::TransactionWrite, &read);

        tracing::info!(
            store = %config.store_name,
            kind = kind.as_str(),
            path = ?store_path,
            entities = schema.entities.len(),
            "engine prepared"
        );
        let _ = self.shared.stack.set(Arc::new(ContextStack {
            schema,
            read,
            write,
            transaction_write,
            store_path,
        }));
        Ok(())
    }

    fn open_store(&self) -> Result<Box<dyn BackingStore>, EngineError> {
        let config = &self.shared.config;
        let Some(file_name) = config.file_name() else {
            return Ok(Box::new(SqliteStore::open_in_memory()?));
        };
        let path = self
            .shared
            .location
            .resolve(&file_name, config.shared_group.as_deref())?;
        let store: Box<dyn BackingStore> = match config.store_kind {
            StoreKind::Binary => Box::new(BinaryStore::open(&path)?),
            StoreKind::Sqlite | StoreKind::Memory => Box::new(SqliteStore::open(&path)?),
        };
        Ok(store)
    }

    pub fn is_prepared(&self) -> bool {
        self.shared.stack.get().is_some()
    }

    pub fn schema(&self) -> Result<Arc<Schema>, StackError> {
        Ok(Arc::clone(&self.shared.stack()?.schema))
    }

    /// Backing file of the open store, `None` for in-memory stores.
    pub fn store_path(&self) -> Result<Option<PathBuf>, StackError> {
        Ok(self.shared.stack()?.store_path.clone())
    }

    /// Registers an observer notified after every save reaches the store.
    pub fn add_change_observer(&self, observer: Arc<dyn ChangeObserver>) -> Result<(), StackError> {
        self.shared.stack()?.read.add_observer(observer);
        Ok(())
    }

    pub fn make_request(&self) -> RequestScope {
        RequestScope::new(Arc::downgrade(&self.shared), false)
    }

    pub fn make_transaction(&self) -> Transaction {
        Transaction::new(
            RequestScope::new(Arc::downgrade(&self.shared), true),
            Arc::clone(&self.shared.registry),
            self.shared.config.slow_transaction_threshold(),
        )
    }

    /// Transactions run but not yet completed.
    pub fn in_flight_transactions(&self) -> usize {
        self.shared.registry.len()
    }

    pub fn transaction_phase(&self, id: TransactionId) -> Option<TransactionPhase> {
        self.shared.registry.phase(id)
    }

    /// Deletes every object of every entity in one transaction.
    pub fn delete_all_data<F>(&self, completion: F)
    where
        F: FnOnce(Option<StackError>) + Send + 'static,
    {
        let engine = Arc::downgrade(&self.shared);
        let mut transaction = self.make_transaction();
        transaction.transaction_block(move |scope, observer| {
            let schema = match engine.upgrade().map(|shared| shared.stack()) {
                Some(Ok(stack)) => Arc::clone(&stack.schema),
                Some(Err(e)) => return observer.on_abort(e),
                None => return observer.on_abort(AbortReason::unspecified()),
            };
            for entity in schema.entity_names() {
                let records = match scope.fetch_records(&Query::new(entity)).into_result() {
                    Ok(records) => records,
                    Err(e) => return observer.on_abort(e),
                };
                for record in &records {
                    if let Some(e) = scope.delete_record(record) {
                        return observer.on_abort(e);
                    }
                }
            }
            observer.on_success();
        });
        transaction.run(completion);
    }

    /// Best-effort removal of the store file and its side files.
    pub fn remove_backing_files(&self) -> Vec<PathBuf> {
        let path = match self.shared.stack() {
            Ok(stack) => stack.store_path.clone(),
            Err(_) => self.resolve_store_path(),
        };
        let Some(path) = path else {
            return Vec::new();
        };
        let removed = remove_backing_files(&path);
        tracing::info!(path = %path.display(), removed = removed.len(), "removed backing files");
        removed
    }

    fn resolve_store_path(&self) -> Option<PathBuf> {
        let config = &self.shared.config;
        let file_name = config.file_name()?;
        match self
            .shared
            .location
            .resolve(&file_name, config.shared_group.as_deref())
        {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "cannot resolve store path");
                None
            }
        }
    }
}
