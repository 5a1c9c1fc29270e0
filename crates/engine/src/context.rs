use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tierstore_core::{FieldValue, ObjectId, Predicate, Query, Record, Schema};
use tierstore_storage::{BackingStore, ChangeSet};

use crate::error::EngineError;
use crate::observer::ChangeObserver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextRole {
    Read,
    Write,
    TransactionWrite,
}

impl ContextRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::TransactionWrite => "transaction_write",
        }
    }
}

impl fmt::Display for ContextRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

enum Upstream {
    Store(Mutex<Box<dyn BackingStore>>),
    Parent(Arc<WorkContext>),
}

/// Objects registered in one context, and which of them are pending.
#[derive(Default)]
struct ContextState {
    objects: HashMap<ObjectId, Record>,
    inserted: BTreeSet<ObjectId>,
    updated: BTreeSet<ObjectId>,
    deleted: BTreeMap<ObjectId, Record>,
}

impl ContextState {
    fn is_dirty(&self, id: &ObjectId) -> bool {
        self.inserted.contains(id) || self.updated.contains(id) || self.deleted.contains_key(id)
    }

    fn has_changes(&self) -> bool {
        !(self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty())
    }

    fn change_set(&self) -> ChangeSet {
        let collect = |ids: &BTreeSet<ObjectId>| -> Vec<Record> {
            ids.iter().filter_map(|id| self.objects.get(id).cloned()).collect()
        };
        ChangeSet {
            inserted: collect(&self.inserted),
            updated: collect(&self.updated),
            deleted: self.deleted.values().cloned().collect(),
        }
    }

    fn evict_committed(&mut self, changes: &ChangeSet) {
        for record in changes.inserted.iter().chain(&changes.updated) {
            if !self.is_dirty(&record.id()) {
                self.objects.remove(&record.id());
            }
        }
        for id in changes.deleted_ids() {
            self.objects.remove(&id);
        }
    }

    fn clear_pending(&mut self) {
        self.inserted.clear();
        self.updated.clear();
        self.deleted.clear();
    }
}

/// A unit of work over either the backing store or a parent context.
///
/// Every operation runs under the context's own re-entrant lock, so a
/// context is serial with respect to itself while callbacks running inside
/// `perform` may call back into it. Locks are always taken child first.
pub struct WorkContext {
    role: ContextRole,
    schema: Arc<Schema>,
    upstream: Upstream,
    state: ReentrantMutex<RefCell<ContextState>>,
    observers: RwLock<Vec<Arc<dyn ChangeObserver>>>,
}

impl WorkContext {
    /// A context attached directly to the backing store.
    pub fn root(role: ContextRole, schema: Arc<Schema>, store: Box<dyn BackingStore>) -> Arc<Self> {
        Arc::new(Self::with_upstream(role, schema, Upstream::Store(Mutex::new(store))))
    }

    /// A context whose saves land in `parent`.
    pub fn child(role: ContextRole, parent: &Arc<WorkContext>) -> Arc<Self> {
        let schema = Arc::clone(&parent.schema);
        Arc::new(Self::with_upstream(role, schema, Upstream::Parent(Arc::clone(parent))))
    }

    fn with_upstream(role: ContextRole, schema: Arc<Schema>, upstream: Upstream) -> Self {
        Self {
            role,
            schema,
            upstream,
            state: ReentrantMutex::new(RefCell::new(ContextState::default())),
            observers: RwLock::new(Vec::new()),
        }
    }

    pub fn role(&self) -> ContextRole {
        self.role
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn parent(&self) -> Option<&Arc<WorkContext>> {
        match &self.upstream {
            Upstream::Parent(parent) => Some(parent),
            Upstream::Store(_) => None,
        }
    }

    /// Runs `f` on this context's serial queue.
    pub fn perform<R>(&self, f: impl FnOnce() -> R) -> R {
        let _serial = self.state.lock();
        f()
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut ContextState) -> R) -> R {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    pub fn has_changes(&self) -> bool {
        self.with_state(|state| state.has_changes())
    }

    pub fn registered_count(&self) -> usize {
        self.with_state(|state| state.objects.len())
    }

    pub fn add_observer(&self, observer: Arc<dyn ChangeObserver>) {
        self.observers.write().push(observer);
    }

    /// Resolves an object through this context, faulting it in from upstream.
    ///
    /// Child contexts register what they fault in until refreshed. The root
    /// only holds pending objects and reads everything else from the store.
    pub fn object_with_id(&self, id: ObjectId) -> Result<Option<Record>, EngineError> {
        self.resolve(id, true)
    }

    fn resolve(&self, id: ObjectId, register: bool) -> Result<Option<Record>, EngineError> {
        self.perform(|| {
            let local = self.with_state(|state| {
                if state.deleted.contains_key(&id) {
                    Some(None)
                } else {
                    state.objects.get(&id).cloned().map(Some)
                }
            });
            if let Some(hit) = local {
                return Ok(hit);
            }

            let loaded = match &self.upstream {
                Upstream::Store(store) => store.lock().load(id)?,
                Upstream::Parent(parent) => parent.resolve(id, register)?,
            };
            if let (Upstream::Parent(_), Some(record), true) = (&self.upstream, &loaded, register) {
                self.with_state(|state| {
                    state.objects.insert(id, record.clone());
                });
            }
            Ok(loaded)
        })
    }

    /// Records of `query.entity` as this context sees them, pending changes included.
    pub fn fetch(&self, query: &Query) -> Result<Vec<Record>, EngineError> {
        self.perform(|| {
            let upstream = match &self.upstream {
                Upstream::Store(store) => store.lock().load_entity(&query.entity)?,
                Upstream::Parent(parent) => parent.fetch(&Query::new(query.entity.clone()))?,
            };
            let visible = self.with_state(|state| {
                let mut visible: Vec<Record> = upstream
                    .into_iter()
                    .filter(|record| !state.deleted.contains_key(&record.id()))
                    .map(|record| match state.objects.get(&record.id()) {
                        Some(local) if state.updated.contains(&record.id()) => local.clone(),
                        _ => record,
                    })
                    .collect();
                visible.extend(
                    state
                        .inserted
                        .iter()
                        .filter_map(|id| state.objects.get(id))
                        .filter(|record| record.entity() == query.entity)
                        .cloned(),
                );
                visible
            });
            Ok(query.apply(visible))
        })
    }

    pub fn insert(&self, record: Record) {
        self.with_state(|state| {
            let id = record.id();
            state.objects.insert(id, record);
            state.inserted.insert(id);
        });
    }

    pub fn update(&self, record: Record) -> Result<(), EngineError> {
        self.with_state(|state| {
            let id = record.id();
            if state.deleted.contains_key(&id) {
                return Err(EngineError::ObjectNotFound(id));
            }
            if !state.inserted.contains(&id) {
                state.updated.insert(id);
            }
            state.objects.insert(id, record);
            Ok(())
        })
    }

    /// Marks an object deleted and nullifies every reference to it visible in
    /// this context. Deleting an already deleted object is a no-op.
    ///
    /// Nullifying a required reference makes the next save fail validation.
    pub fn delete(&self, id: ObjectId) -> Result<(), EngineError> {
        self.perform(|| {
            if self.with_state(|state| state.deleted.contains_key(&id)) {
                return Ok(());
            }
            let record = self
                .object_with_id(id)?
                .ok_or(EngineError::ObjectNotFound(id))?;
            let entity = record.entity().to_string();
            self.with_state(|state| {
                state.objects.remove(&id);
                state.updated.remove(&id);
                if !state.inserted.remove(&id) {
                    state.deleted.insert(id, record);
                }
            });
            self.nullify_references_to(id, &entity)
        })
    }

    fn nullify_references_to(&self, id: ObjectId, entity: &str) -> Result<(), EngineError> {
        for (source, attribute) in self.schema.inbound_references(entity) {
            let referrers = self.fetch(&Query::new(source).filter(Predicate::eq(attribute, id)))?;
            for mut referrer in referrers {
                referrer.set(attribute, FieldValue::Null);
                self.update(referrer)?;
            }
        }
        Ok(())
    }

    /// Pushes pending changes one level up. Nothing is cleared on failure.
    pub fn save(&self) -> Result<(), EngineError> {
        self.perform(|| {
            let changes = self.with_state(|state| state.change_set());
            if changes.is_empty() {
                return Ok(());
            }
            for record in changes.inserted.iter().chain(&changes.updated) {
                self.schema.validate(record)?;
                self.schema.validate_references(record, |target| {
                    Ok::<_, EngineError>(
                        self.resolve(target, false)?
                            .map(|found| found.entity().to_string()),
                    )
                })?;
            }

            match &self.upstream {
                Upstream::Parent(parent) => parent.absorb(&changes, self.role)?,
                Upstream::Store(_) => self.absorb(&changes, self.role)?,
            }
            self.with_state(|state| {
                state.clear_pending();
                if matches!(self.upstream, Upstream::Store(_)) {
                    state.evict_committed(&changes);
                }
            });
            tracing::debug!(context = %self.role, changes = changes.len(), "context saved");
            Ok(())
        })
    }

    /// Commits a child's change set to the store, then merges it here.
    fn absorb(&self, changes: &ChangeSet, origin: ContextRole) -> Result<(), EngineError> {
        let Upstream::Store(store) = &self.upstream else {
            return Err(EngineError::NotRoot(self.role));
        };
        self.perform(|| {
            store.lock().commit(changes)?;
            self.with_state(|state| state.evict_committed(changes));
            Ok::<(), EngineError>(())
        })?;

        let observers = self.observers.read().clone();
        for observer in observers {
            observer.context_did_save(origin, changes);
        }
        Ok(())
    }

    /// Discards pending changes.
    pub fn rollback(&self) {
        self.with_state(|state| {
            let pending: Vec<ObjectId> = state.inserted.iter().chain(&state.updated).copied().collect();
            for id in pending {
                state.objects.remove(&id);
            }
            state.clear_pending();
        });
        tracing::debug!(context = %self.role, "context rolled back");
    }

    /// Drops the cached copy of a clean object so the next read faults it in again.
    pub fn refresh_object(&self, id: ObjectId) {
        self.with_state(|state| {
            if !state.is_dirty(&id) {
                state.objects.remove(&id);
            }
        });
    }

    pub fn refresh_all(&self) {
        self.with_state(|state| {
            let ContextState {
                objects,
                inserted,
                updated,
                deleted,
            } = state;
            objects.retain(|id, _| inserted.contains(id) || updated.contains(id) || deleted.contains_key(id));
        });
    }
}
