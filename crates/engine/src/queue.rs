use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;
use std::thread;

use crossbeam_channel::{Sender, unbounded};

pub(crate) type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PanicPolicy {
    /// A panicking job takes the process down.
    Abort,
    /// A panicking job is logged and the queue keeps running.
    Log,
}

thread_local! {
    static CURRENT_QUEUE: Cell<Option<&'static str>> = const { Cell::new(None) };
}

/// FIFO of jobs drained by one dedicated worker thread.
pub(crate) struct SerialQueue {
    label: &'static str,
    sender: Sender<Job>,
}

impl SerialQueue {
    pub(crate) fn spawn(label: &'static str, policy: PanicPolicy) -> Self {
        let (sender, receiver) = unbounded::<Job>();
        thread::spawn(move || {
            CURRENT_QUEUE.with(|current| current.set(Some(label)));
            for job in receiver.iter() {
                let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) else {
                    continue;
                };
                let message = panic_message(payload.as_ref());
                match policy {
                    PanicPolicy::Abort => {
                        tracing::error!(queue = label, %message, "fatal error on serial queue");
                        std::process::abort();
                    }
                    PanicPolicy::Log => {
                        tracing::error!(queue = label, %message, "job panicked");
                    }
                }
            }
        });
        Self { label, sender }
    }

    /// Hands the job back if the worker is gone.
    pub(crate) fn submit(&self, job: Job) -> Result<(), Job> {
        self.sender.send(job).map_err(|e| e.into_inner())
    }

    /// Whether the calling thread is this queue's worker.
    pub(crate) fn is_current(&self) -> bool {
        CURRENT_QUEUE.with(|current| current.get() == Some(self.label))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

static TRANSACTION_QUEUE: OnceLock<SerialQueue> = OnceLock::new();
static CALLBACK_QUEUE: OnceLock<SerialQueue> = OnceLock::new();

/// The process-wide queue every transaction body runs on, one at a time.
pub(crate) fn transaction_queue() -> &'static SerialQueue {
    TRANSACTION_QUEUE.get_or_init(|| SerialQueue::spawn("tierstore-transactions", PanicPolicy::Abort))
}

/// The fixed context transaction completions are delivered on.
pub(crate) fn callback_queue() -> &'static SerialQueue {
    CALLBACK_QUEUE.get_or_init(|| SerialQueue::spawn("tierstore-callbacks", PanicPolicy::Log))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn jobs_run_in_submission_order_on_the_worker() {
        let queue = SerialQueue::spawn("test-queue", PanicPolicy::Log);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);

        for i in 0..20 {
            let seen = Arc::clone(&seen);
            queue
                .submit(Box::new(move || seen.lock().unwrap().push(i)))
                .ok()
                .unwrap();
        }
        let on_worker = Arc::new(Mutex::new(false));
        let flag = Arc::clone(&on_worker);
        queue
            .submit(Box::new(move || {
                *flag.lock().unwrap() = CURRENT_QUEUE.with(|c| c.get()) == Some("test-queue");
                done_tx.send(()).unwrap();
            }))
            .ok()
            .unwrap();

        done_rx.recv().unwrap();
        assert_eq!(*seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
        assert!(*on_worker.lock().unwrap());
        assert!(!queue.is_current());
    }

    #[test]
    fn logged_panics_do_not_stop_the_queue() {
        let queue = SerialQueue::spawn("test-panics", PanicPolicy::Log);
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        queue.submit(Box::new(|| panic!("boom"))).ok().unwrap();
        queue
            .submit(Box::new(move || done_tx.send(()).unwrap()))
            .ok()
            .unwrap();
        done_rx.recv().unwrap();
    }
}
