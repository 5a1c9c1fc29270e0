use std::sync::{Arc, Weak};

use tierstore_core::{Model, ObjectId, Query, Record};

use crate::context::WorkContext;
use crate::error::{EngineError, StackError};
use crate::result::FetchResult;
use crate::{ContextStack, EngineShared};

/// Handle for CRUD against an engine.
///
/// A scope holds the engine weakly: once the engine is dropped every
/// operation fails with `InvalidState`. Transactional scopes write to the
/// transaction context and never save on their own.
#[derive(Clone)]
pub struct RequestScope {
    engine: Weak<EngineShared>,
    transactional: bool,
}

impl RequestScope {
    pub(crate) fn new(engine: Weak<EngineShared>, transactional: bool) -> Self {
        Self {
            engine,
            transactional,
        }
    }

    pub fn is_transactional(&self) -> bool {
        self.transactional
    }

    fn stack(&self) -> Result<Arc<ContextStack>, StackError> {
        self.engine
            .upgrade()
            .ok_or_else(|| StackError::invalid("engine has been dropped"))?
            .stack()
    }

    /// The context this scope writes to.
    pub(crate) fn target_context(&self) -> Result<Arc<WorkContext>, StackError> {
        Ok(Arc::clone(self.stack()?.target(self.transactional)))
    }

    // =========================================================================
    // Reads
    // =========================================================================

    pub fn fetch_all<M: Model>(&self) -> FetchResult<M> {
        self.fetch(&Query::of::<M>())
    }

    /// The object with the same identity as `model`, as the read context sees it.
    pub fn fetch_by_identity<M: Model>(&self, model: &M) -> FetchResult<M> {
        self.fetch_by_id(model.id())
    }

    pub fn fetch_by_id<M: Model>(&self, id: ObjectId) -> FetchResult<M> {
        self.try_fetch_by_id(id).into()
    }

    fn try_fetch_by_id<M: Model>(&self, id: ObjectId) -> Result<Vec<M>, StackError> {
        let stack = self.stack()?;
        match stack.read.object_with_id(id).map_err(StackError::system)? {
            Some(record) => Ok(vec![typed(record)?]),
            None => Ok(Vec::new()),
        }
    }

    pub fn fetch<M: Model>(&self, query: &Query) -> FetchResult<M> {
        if query.entity != M::ENTITY {
            return FetchResult::failed(StackError::invalid(format!(
                "query over {} cannot produce {}",
                query.entity,
                M::ENTITY
            )));
        }
        self.fetch_records(query).map(M::from_record)
    }

    pub fn fetch_records(&self, query: &Query) -> FetchResult<Record> {
        self.try_fetch_records(query).into()
    }

    fn try_fetch_records(&self, query: &Query) -> Result<Vec<Record>, StackError> {
        let stack = self.stack()?;
        stack
            .schema
            .require_entity(&query.entity)
            .map_err(|e| StackError::invalid(e.to_string()))?;
        stack.read.fetch(query).map_err(StackError::system)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts a new object initialized by `initializer`.
    ///
    /// Outside a transaction the object is saved immediately and returned as
    /// re-resolved in the read context.
    pub fn create<M, F>(&self, initializer: F) -> FetchResult<M>
    where
        M: Model,
        F: FnOnce(&mut M, &RequestScope),
    {
        self.try_create(initializer).map(|model| vec![model]).into()
    }

    fn try_create<M, F>(&self, initializer: F) -> Result<M, StackError>
    where
        M: Model,
        F: FnOnce(&mut M, &RequestScope),
    {
        let stack = self.stack()?;
        let entity = stack
            .schema
            .require_entity(M::ENTITY)
            .map_err(|e| StackError::invalid(e.to_string()))?;
        let context = stack.target(self.transactional);

        context.perform(|| {
            let mut model = M::from_record(entity.new_record());
            initializer(&mut model, self);
            let record = model.into_record();
            let id = record.id();
            context.insert(record.clone());

            if self.transactional {
                return Ok(M::from_record(record));
            }
            auto_save(context, Some(id))?;
            resolve_in_read(&stack, id)
        })
    }

    /// Re-resolves `model` in the write context and applies `mutator` to it.
    pub fn update<M, F>(&self, model: &M, mutator: F) -> FetchResult<M>
    where
        M: Model,
        F: FnOnce(&mut M, &RequestScope),
    {
        self.try_update(model.id(), mutator)
            .map(|model| vec![model])
            .into()
    }

    fn try_update<M, F>(&self, id: ObjectId, mutator: F) -> Result<M, StackError>
    where
        M: Model,
        F: FnOnce(&mut M, &RequestScope),
    {
        let stack = self.stack()?;
        let context = stack.target(self.transactional);

        context.perform(|| {
            let record = context
                .object_with_id(id)
                .map_err(StackError::system)?
                .ok_or_else(|| StackError::system(EngineError::ObjectNotFound(id)))?;
            let mut model: M = typed(record.clone())?;
            mutator(&mut model, self);
            // A write to the same object from inside the mutator would be lost.
            if context.object_with_id(id).map_err(StackError::system)?.as_ref() != Some(&record) {
                return Err(StackError::invalid("object changed while the mutator ran"));
            }
            let record = model.into_record();
            if record.id() != id || record.entity() != M::ENTITY {
                return Err(StackError::invalid("mutator replaced the object identity"));
            }
            context.update(record.clone()).map_err(StackError::system)?;

            if self.transactional {
                return Ok(M::from_record(record));
            }
            auto_save(context, Some(id))?;
            resolve_in_read(&stack, id)
        })
    }

    pub fn delete<M: Model>(&self, model: &M) -> Option<StackError> {
        self.delete_record(model.as_record())
    }

    pub fn delete_record(&self, record: &Record) -> Option<StackError> {
        self.try_delete(record.id()).err()
    }

    fn try_delete(&self, id: ObjectId) -> Result<(), StackError> {
        let stack = self.stack()?;
        let context = stack.target(self.transactional);

        context.perform(|| {
            context.delete(id).map_err(StackError::system)?;
            if !self.transactional {
                auto_save(context, None)?;
            }
            Ok(())
        })
    }

    pub fn delete_all<M: Model>(&self) -> Option<StackError> {
        self.delete_all_of(M::ENTITY)
    }

    /// Deletes every persisted object of `entity`.
    pub fn delete_all_of(&self, entity: &str) -> Option<StackError> {
        self.try_delete_all(entity).err()
    }

    fn try_delete_all(&self, entity: &str) -> Result<(), StackError> {
        let records = self.try_fetch_records(&Query::new(entity))?;
        let stack = self.stack()?;
        let context = stack.target(self.transactional);

        context.perform(|| {
            for record in &records {
                if let Err(e) = context.delete(record.id()) {
                    if !self.transactional {
                        context.rollback();
                    }
                    return Err(StackError::system(e));
                }
            }
            if !self.transactional {
                auto_save(context, None)?;
            }
            Ok(())
        })
    }
}

fn typed<M: Model>(record: Record) -> Result<M, StackError> {
    if record.entity() != M::ENTITY {
        return Err(StackError::invalid(format!(
            "object {} is a {}, not a {}",
            record.id(),
            record.entity(),
            M::ENTITY
        )));
    }
    Ok(M::from_record(record))
}

/// Saves a standalone write. On failure the pending changes are rolled back.
fn auto_save(context: &WorkContext, refresh: Option<ObjectId>) -> Result<(), StackError> {
    match context.save() {
        Ok(()) => {
            match refresh {
                Some(id) => context.refresh_object(id),
                None => context.refresh_all(),
            }
            Ok(())
        }
        Err(e) => {
            tracing::debug!(context = %context.role(), error = %e, "save failed, rolling back");
            context.rollback();
            Err(StackError::system(e))
        }
    }
}

fn resolve_in_read<M: Model>(stack: &ContextStack, id: ObjectId) -> Result<M, StackError> {
    let record = stack
        .read
        .object_with_id(id)
        .map_err(StackError::system)?
        .ok_or_else(|| StackError::system(EngineError::ObjectNotFound(id)))?;
    typed(record)
}
