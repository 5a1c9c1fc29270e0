use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tierstore_core::TransactionId;

use crate::error::{AbortReason, StackError};
use crate::queue::{callback_queue, transaction_queue};
use crate::request::RequestScope;

type TransactionBody = Box<dyn FnOnce(&RequestScope, &TransactionObserver) + Send + 'static>;
type Completion = Box<dyn FnOnce(Option<StackError>) + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Created,
    BodyAttached,
    Running,
    Committed,
    Aborted,
}

impl TransactionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::BodyAttached => "body_attached",
            Self::Running => "running",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        }
    }
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transactions that have been run but whose completion has not returned yet.
#[derive(Debug, Default)]
pub(crate) struct TransactionRegistry {
    in_flight: Mutex<HashMap<TransactionId, TransactionPhase>>,
}

impl TransactionRegistry {
    fn register(&self, id: TransactionId) {
        self.in_flight.lock().insert(id, TransactionPhase::Running);
    }

    fn set_phase(&self, id: TransactionId, phase: TransactionPhase) {
        if let Some(entry) = self.in_flight.lock().get_mut(&id) {
            *entry = phase;
        }
    }

    fn remove(&self, id: TransactionId) {
        self.in_flight.lock().remove(&id);
    }

    pub(crate) fn phase(&self, id: TransactionId) -> Option<TransactionPhase> {
        self.in_flight.lock().get(&id).copied()
    }

    pub(crate) fn len(&self) -> usize {
        self.in_flight.lock().len()
    }
}

/// One-shot latch guarding the commit protocol.
#[derive(Debug, Default)]
pub(crate) struct CommitGate {
    completed: AtomicBool,
}

impl CommitGate {
    fn complete(&self, id: TransactionId, operation: &str) {
        if self.completed.swap(true, Ordering::SeqCst) {
            panic!("transaction {id}: completion invoked twice ({operation})");
        }
    }

    fn ensure_completed(&self, id: TransactionId) {
        if !self.completed.load(Ordering::SeqCst) {
            panic!("transaction {id}: body returned without calling on_success or on_abort");
        }
    }
}

/// A body of writes applied atomically to the transaction context.
///
/// Bodies of all transactions in the process run one at a time, in the order
/// they were run. The body must call exactly one of
/// [`TransactionObserver::on_success`] or [`TransactionObserver::on_abort`];
/// anything else is a programming error that terminates the process.
pub struct Transaction {
    id: TransactionId,
    scope: RequestScope,
    body: Option<TransactionBody>,
    registry: Arc<TransactionRegistry>,
    slow_after: Duration,
}

impl Transaction {
    pub(crate) fn new(scope: RequestScope, registry: Arc<TransactionRegistry>, slow_after: Duration) -> Self {
        Self {
            id: TransactionId::new(),
            scope,
            body: None,
            registry,
            slow_after,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn phase(&self) -> TransactionPhase {
        if self.body.is_some() {
            TransactionPhase::BodyAttached
        } else {
            TransactionPhase::Created
        }
    }

    /// Attaches the body, replacing any previous one.
    pub fn transaction_block<F>(&mut self, body: F)
    where
        F: FnOnce(&RequestScope, &TransactionObserver) + Send + 'static,
    {
        self.body = Some(Box::new(body));
    }

    /// Schedules the body on the transaction queue. `completion` runs exactly
    /// once, on the callback queue.
    pub fn run<F>(self, completion: F)
    where
        F: FnOnce(Option<StackError>) + Send + 'static,
    {
        let Transaction {
            id,
            scope,
            body,
            registry,
            slow_after,
        } = self;
        let completion: Completion = Box::new(completion);

        let Some(body) = body else {
            tracing::warn!(transaction = %id, "run called without a transaction body");
            deliver(Box::new(move || {
                completion(Some(StackError::invalid("transaction has no body")))
            }));
            return;
        };

        registry.register(id);
        let queued_registry = Arc::clone(&registry);
        let job = Box::new(move || execute(id, scope, body, completion, queued_registry, slow_after));
        if transaction_queue().submit(job).is_err() {
            tracing::error!(transaction = %id, "transaction queue is gone");
            registry.remove(id);
        }
    }

    /// Runs the transaction and blocks until its completion.
    ///
    /// Refuses to wait from the transaction or callback queue, where waiting
    /// would deadlock.
    pub fn run_and_wait(self) -> Option<StackError> {
        if transaction_queue().is_current() || callback_queue().is_current() {
            return Some(StackError::invalid(
                "run_and_wait called from the queue it would wait on",
            ));
        }
        let (sender, receiver) = crossbeam_channel::bounded(1);
        self.run(move |outcome| {
            let _ = sender.send(outcome);
        });
        receiver
            .recv()
            .unwrap_or_else(|_| Some(StackError::invalid("transaction completion was dropped")))
    }
}

fn execute(
    id: TransactionId,
    scope: RequestScope,
    body: TransactionBody,
    completion: Completion,
    registry: Arc<TransactionRegistry>,
    slow_after: Duration,
) {
    tracing::debug!(transaction = %id, "transaction body started");
    let observer = TransactionObserver {
        id,
        scope: scope.clone(),
        gate: CommitGate::default(),
        completion: Mutex::new(Some(completion)),
        registry,
    };

    let started = Instant::now();
    body(&scope, &observer);
    observer.gate.ensure_completed(id);

    let elapsed = started.elapsed();
    if elapsed > slow_after {
        tracing::warn!(
            transaction = %id,
            elapsed_ms = elapsed.as_millis() as u64,
            "slow transaction body"
        );
    }
}

fn deliver(job: Box<dyn FnOnce() + Send + 'static>) {
    if callback_queue().submit(job).is_err() {
        tracing::error!("callback queue is gone, completion dropped");
    }
}

/// Handed to a transaction body to commit or abort it.
pub struct TransactionObserver {
    id: TransactionId,
    scope: RequestScope,
    gate: CommitGate,
    completion: Mutex<Option<Completion>>,
    registry: Arc<TransactionRegistry>,
}

impl TransactionObserver {
    pub fn transaction_id(&self) -> TransactionId {
        self.id
    }

    /// Saves the transaction context. A failed save is rolled back and
    /// reported as a system error.
    pub fn on_success(&self) {
        self.gate.complete(self.id, "on_success");
        let outcome = match self.scope.target_context() {
            Err(e) => Some(e),
            Ok(context) => context.perform(|| match context.save() {
                Ok(()) => {
                    context.refresh_all();
                    None
                }
                Err(e) => {
                    context.rollback();
                    context.refresh_all();
                    Some(StackError::system(e))
                }
            }),
        };
        let phase = match outcome {
            None => TransactionPhase::Committed,
            Some(_) => TransactionPhase::Aborted,
        };
        self.finish(outcome, phase);
    }

    /// Discards every change the body made.
    pub fn on_abort(&self, reason: impl Into<AbortReason>) {
        self.gate.complete(self.id, "on_abort");
        let reason = reason.into();
        let outcome = match self.scope.target_context() {
            Err(e) => e,
            Ok(context) => {
                context.perform(|| {
                    context.rollback();
                    context.refresh_all();
                });
                tracing::debug!(transaction = %self.id, %reason, "transaction aborted");
                StackError::Custom(reason)
            }
        };
        self.finish(Some(outcome), TransactionPhase::Aborted);
    }

    fn finish(&self, outcome: Option<StackError>, phase: TransactionPhase) {
        self.registry.set_phase(self.id, phase);
        tracing::debug!(transaction = %self.id, %phase, "transaction finished");
        let Some(completion) = self.completion.lock().take() else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        let id = self.id;
        deliver(Box::new(move || {
            completion(outcome);
            registry.remove(id);
        }));
    }
}
