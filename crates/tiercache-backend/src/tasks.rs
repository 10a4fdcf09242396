//! Background task scheduler.
//!
//! Executes enqueued asynchronous units of work on a single dedicated
//! consumer task, preserving submission order per scheduler. Outstanding work
//! is tracked so callers can wait for a drain; task failures are counted and
//! logged rather than surfaced to the (long gone) original caller.
//!
//! Once enqueued, a unit of work always runs to completion or failure —
//! dropping the caller's future does not retract it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::sync::Notify;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::warn;

use crate::BackendResult;
use crate::error::BackendError;

type BackgroundTask = Pin<Box<dyn Future<Output = BackendResult<()>> + Send + 'static>>;

/// A FIFO scheduler for fire-and-forget asynchronous work.
///
/// Must be created within a tokio runtime: the consumer task is spawned at
/// construction.
pub struct TaskScheduler {
    label: String,
    sender: parking_lot::Mutex<Option<UnboundedSender<BackgroundTask>>>,
    worker: parking_lot::Mutex<Option<JoinHandle<()>>>,
    pending: Arc<AtomicUsize>,
    exceptions: Arc<AtomicU64>,
    drained: Arc<Notify>,
}

impl TaskScheduler {
    /// Creates a scheduler and spawns its consumer task.
    #[must_use]
    pub fn new(label: impl Into<String>) -> Self {
        let label = label.into();
        let (sender, receiver) = mpsc::unbounded_channel();
        let pending = Arc::new(AtomicUsize::new(0));
        let exceptions = Arc::new(AtomicU64::new(0));
        let drained = Arc::new(Notify::new());
        let worker = tokio::spawn(consume(
            receiver,
            pending.clone(),
            exceptions.clone(),
            drained.clone(),
            label.clone(),
        ));
        Self {
            label,
            sender: parking_lot::Mutex::new(Some(sender)),
            worker: parking_lot::Mutex::new(Some(worker)),
            pending,
            exceptions,
            drained,
        }
    }

    /// Enqueues a unit of work and returns immediately.
    ///
    /// # Errors
    ///
    /// Fails with an invalid-operation error after [`shutdown`](Self::shutdown).
    pub fn enqueue<F>(&self, task: F) -> BackendResult<()>
    where
        F: Future<Output = BackendResult<()>> + Send + 'static,
    {
        let guard = self.sender.lock();
        let Some(sender) = guard.as_ref() else {
            return Err(BackendError::invalid_operation(format!(
                "task scheduler `{}` is shut down",
                self.label
            )));
        };
        self.pending.fetch_add(1, Ordering::SeqCst);
        if sender.send(Box::pin(task)).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            return Err(BackendError::assertion_failed(format!(
                "task scheduler `{}` consumer is gone",
                self.label
            )));
        }
        Ok(())
    }

    /// Number of tasks enqueued but not yet finished.
    #[must_use]
    pub fn pending_tasks(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Number of tasks that finished with an error.
    #[must_use]
    pub fn background_task_exceptions(&self) -> u64 {
        self.exceptions.load(Ordering::SeqCst)
    }

    /// Completes when all work enqueued as of the call has finished.
    ///
    /// Work enqueued while waiting also delays completion; the only
    /// guarantee is that the snapshot observed at call time has drained.
    pub async fn wait_until_drained(&self) {
        loop {
            let notified = self.drained.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stops intake, drains outstanding work and joins the consumer.
    pub async fn shutdown(&self) {
        let sender = self.sender.lock().take();
        drop(sender);
        self.wait_until_drained().await;
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(error) = worker.await {
                warn!(scheduler = %self.label, %error, "background task consumer panicked");
            }
        }
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("label", &self.label)
            .field("pending", &self.pending_tasks())
            .field("exceptions", &self.background_task_exceptions())
            .finish()
    }
}

async fn consume(
    mut receiver: UnboundedReceiver<BackgroundTask>,
    pending: Arc<AtomicUsize>,
    exceptions: Arc<AtomicU64>,
    drained: Arc<Notify>,
    label: String,
) {
    while let Some(task) = receiver.recv().await {
        if let Err(error) = task.await {
            exceptions.fetch_add(1, Ordering::SeqCst);
            warn!(scheduler = %label, %error, "background task failed");
        }
        if pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            drained.notify_waiters();
        }
    }
}
