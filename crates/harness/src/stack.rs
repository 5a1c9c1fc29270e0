use std::path::Path;

use tempfile::TempDir;
use tierstore_engine::{
    Engine, RequestScope, StackConfig, StackError, StaticSchemaProvider, TransactionObserver,
};
use tierstore_storage::{DirectoryLocation, StoreKind};

use crate::models::{BLOG, blog_schema};

/// A prepared engine over the blog schema, in its own temp directory.
pub struct TestStack {
    dir: TempDir,
    config: StackConfig,
    pub engine: Engine,
}

impl TestStack {
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        Self::with_kind(StoreKind::Sqlite)
    }

    pub fn with_kind(kind: StoreKind) -> Result<Self, Box<dyn std::error::Error>> {
        crate::init_tracing();
        let dir = tempfile::tempdir()?;
        let config = StackConfig::new(BLOG).with_store_kind(kind);
        let engine = Self::engine_in(dir.path(), config.clone());
        engine.prepare()?;
        Ok(Self {
            dir,
            config,
            engine,
        })
    }

    /// An unprepared engine storing its files under `dir`.
    pub fn engine_in(dir: &Path, config: StackConfig) -> Engine {
        Engine::new(
            config,
            StaticSchemaProvider::from(blog_schema()),
            DirectoryLocation::new(dir),
        )
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Drops the engine and prepares a fresh one over the same files.
    pub fn reopen(&mut self) -> Result<(), StackError> {
        self.engine = Self::engine_in(self.dir.path(), self.config.clone());
        self.engine.prepare()
    }

    pub fn request(&self) -> RequestScope {
        self.engine.make_request()
    }

    /// Runs `body` as a transaction and waits for its outcome.
    pub fn run_transaction<F>(&self, body: F) -> Option<StackError>
    where
        F: FnOnce(&RequestScope, &TransactionObserver) + Send + 'static,
    {
        let mut transaction = self.engine.make_transaction();
        transaction.transaction_block(body);
        transaction.run_and_wait()
    }
}
