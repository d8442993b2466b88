//! Serial task queue for slow session work
//!
//! One worker task runs submitted futures one at a time in submission order.
//! Delayed entries wait in a heap ordered by due time, ties broken by
//! submission order, and join the queue when due.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant};

/// Executor errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutorError {
    /// The worker has shut down
    #[error("executor closed")]
    Closed,

    /// Blocking wait requested from inside the runtime
    #[error("blocking wait from inside the runtime would deadlock")]
    WouldDeadlock,

    /// The task was dropped before producing a result
    #[error("task dropped before completing")]
    Dropped,

    /// No tokio runtime to spawn the worker on
    #[error("no tokio runtime available")]
    NoRuntime,
}

type Task = BoxFuture<'static, ()>;

enum Submission {
    Now(Task),
    After(Instant, Task),
}

struct Delayed {
    due: Instant,
    seq: u64,
    task: Task,
}

impl PartialEq for Delayed {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for Delayed {}

impl PartialOrd for Delayed {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Delayed {
    // Reversed so the max-heap pops the earliest entry
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .due
            .cmp(&self.due)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Handle to a single-worker FIFO queue
#[derive(Debug)]
pub struct TaskExecutor {
    tx: mpsc::UnboundedSender<Submission>,
    worker: JoinHandle<()>,
}

impl TaskExecutor {
    /// Spawn the worker on the current runtime
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::NoRuntime` outside a tokio runtime.
    pub fn new() -> Result<Self, ExecutorError> {
        let handle = Handle::try_current().map_err(|_| ExecutorError::NoRuntime)?;
        Ok(Self::with_handle(&handle))
    }

    /// Spawn the worker on `handle`
    #[must_use]
    pub fn with_handle(handle: &Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let worker = handle.spawn(run_worker(rx));
        Self { tx, worker }
    }

    /// Queue `task` and return immediately
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::Closed` if the worker has stopped.
    pub fn wake<F>(&self, task: F) -> Result<(), ExecutorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx
            .send(Submission::Now(task.boxed()))
            .map_err(|_| ExecutorError::Closed)
    }

    /// Queue `task` to run once `delay` has passed
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::Closed` if the worker has stopped.
    pub fn wake_after<F>(&self, delay: Duration, task: F) -> Result<(), ExecutorError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tx
            .send(Submission::After(Instant::now() + delay, task.boxed()))
            .map_err(|_| ExecutorError::Closed)
    }

    /// Queue `task` and await its result
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::Closed` if the worker has stopped, or
    /// `ExecutorError::Dropped` if the task panicked or was discarded.
    pub async fn wake_and_await<F, T>(&self, task: F) -> Result<T, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let rx = self.submit_with_reply(task)?;
        rx.await.map_err(|_| ExecutorError::Dropped)
    }

    /// Queue `task` and block the calling thread until it finishes
    ///
    /// Only for threads outside the runtime.
    ///
    /// # Errors
    ///
    /// Returns `ExecutorError::WouldDeadlock` when called from inside a tokio
    /// runtime, otherwise the same errors as [`wake_and_await`](Self::wake_and_await).
    pub fn wake_and_wait<F, T>(&self, task: F) -> Result<T, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if Handle::try_current().is_ok() {
            return Err(ExecutorError::WouldDeadlock);
        }
        let rx = self.submit_with_reply(task)?;
        rx.blocking_recv().map_err(|_| ExecutorError::Dropped)
    }

    /// Whether the worker is still accepting tasks
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Stop accepting tasks and wait for queued immediate tasks to finish
    ///
    /// Delayed tasks that are not yet due are discarded.
    pub async fn shutdown(self) {
        drop(self.tx);
        if let Err(e) = self.worker.await {
            tracing::error!("Executor worker failed: {}", e);
        }
    }

    fn submit_with_reply<F, T>(&self, task: F) -> Result<oneshot::Receiver<T>, ExecutorError>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.wake(async move {
            let value = task.await;
            // the caller may have stopped waiting
            let _ = reply_tx.send(value);
        })?;
        Ok(reply_rx)
    }
}

async fn run_worker(mut rx: mpsc::UnboundedReceiver<Submission>) {
    let mut delayed = BinaryHeap::new();
    let mut seq = 0u64;

    loop {
        let next_due = delayed.peek().map(|entry: &Delayed| entry.due);

        tokio::select! {
            biased;

            () = async {
                match next_due {
                    Some(due) => tokio::time::sleep_until(due).await,
                    None => std::future::pending().await,
                }
            } => {
                if let Some(entry) = delayed.pop() {
                    run_task(entry.task).await;
                }
            }

            submission = rx.recv() => match submission {
                Some(Submission::Now(task)) => run_task(task).await,
                Some(Submission::After(due, task)) => {
                    delayed.push(Delayed { due, seq, task });
                    seq += 1;
                }
                None => break,
            },
        }
    }

    if !delayed.is_empty() {
        tracing::debug!(pending = delayed.len(), "Executor stopped with delayed tasks");
    }
}

async fn run_task(task: Task) {
    if AssertUnwindSafe(task).catch_unwind().await.is_err() {
        tracing::error!("Executor task panicked");
    }
}
