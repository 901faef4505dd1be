//! Owner and lifecycle manager for a set of named workers.

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use crossbeam_channel::{bounded, Receiver};
use thiserror::Error;
use tracing::info;

use crate::task::{panic_message, CancelToken, Task};
use crate::worker::Worker;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("worker '{0}' already exists")]
    WorkerExists(String),
    #[error("no such worker '{0}'")]
    NoSuchWorker(String),
}

/// Result of a future-returning submission.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Value(T),
    /// The task panicked; carries the panic message.
    Panicked(String),
    /// The cancel token was set before dispatch, or the task was dropped
    /// unrun during shutdown.
    Cancelled,
}

/// Single-shot handle for the outcome of one submitted task.
pub struct TaskFuture<T> {
    task_id: u64,
    rx: Receiver<TaskOutcome<T>>,
}

impl<T> TaskFuture<T> {
    pub fn task_id(&self) -> u64 {
        self.task_id
    }

    /// Block until the task resolves. A task discarded without running (for
    /// example during shutdown) resolves to [`TaskOutcome::Cancelled`].
    pub fn wait(self) -> TaskOutcome<T> {
        self.rx.recv().unwrap_or(TaskOutcome::Cancelled)
    }
}

/// Maps worker ids to workers under a readers-writer lock: lookups take the
/// read side, create/start/shutdown take the write side.
///
/// Workers know nothing about the scheduler beyond their own id; the
/// dependency runs strictly scheduler → worker.
pub struct Scheduler {
    workers: RwLock<BTreeMap<String, Arc<Worker>>>,
    shut_down: AtomicBool,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            workers: RwLock::new(BTreeMap::new()),
            shut_down: AtomicBool::new(false),
        }
    }

    /// Register a worker under a unique id.
    pub fn create_worker(&self, id: &str) -> Result<(), SchedulerError> {
        let mut map = self
            .workers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(id) {
            return Err(SchedulerError::WorkerExists(id.to_string()));
        }
        map.insert(id.to_string(), Worker::new(id));
        Ok(())
    }

    /// Replace the current worker set with `prefix_0 .. prefix_{count-1}`.
    pub fn create_workers(&self, prefix: &str, count: usize) -> Result<(), SchedulerError> {
        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        for i in 0..count {
            self.create_worker(&format!("{prefix}_{i}"))?;
        }
        Ok(())
    }

    /// Start every registered worker's thread.
    pub fn start(&self) {
        let map = self.workers.read().unwrap_or_else(PoisonError::into_inner);
        for worker in map.values() {
            worker.start();
        }
    }

    fn worker(&self, id: &str) -> Result<Arc<Worker>, SchedulerError> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| SchedulerError::NoSuchWorker(id.to_string()))
    }

    /// Fire-and-forget submission to a named worker. Returns the task id.
    pub fn submit_to<F>(&self, worker_id: &str, func: F, desc: &str) -> Result<u64, SchedulerError>
    where
        F: FnOnce(&CancelToken) + Send + 'static,
    {
        let worker = self.worker(worker_id)?;
        let task = Task::new(Box::new(func), desc);
        let task_id = task.id;
        worker.post_task(task);
        Ok(task_id)
    }

    /// Submission whose result is observable through a [`TaskFuture`].
    pub fn submit_with_future<T, F>(
        &self,
        worker_id: &str,
        func: F,
    ) -> Result<TaskFuture<T>, SchedulerError>
    where
        T: Send + 'static,
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        let (tx, rx) = bounded(1);
        let task_id = self.submit_to(
            worker_id,
            move |token| {
                if token.is_cancelled() {
                    let _ = tx.send(TaskOutcome::Cancelled);
                    return;
                }
                match catch_unwind(AssertUnwindSafe(|| func(token))) {
                    Ok(value) => {
                        let _ = tx.send(TaskOutcome::Value(value));
                    }
                    Err(payload) => {
                        let _ = tx.send(TaskOutcome::Panicked(
                            panic_message(payload.as_ref()).to_string(),
                        ));
                    }
                }
            },
            "future task",
        )?;
        Ok(TaskFuture { task_id, rx })
    }

    /// Cancel a not-yet-finished task on a named worker. Returns whether a
    /// live token was found.
    pub fn cancel(&self, worker_id: &str, task_id: u64) -> Result<bool, SchedulerError> {
        Ok(self.worker(worker_id)?.cancel(task_id))
    }

    pub fn worker_ids(&self) -> Vec<String> {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    pub fn has_worker(&self, id: &str) -> bool {
        self.workers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Stop every worker, join their threads, and clear the map. Idempotent.
    /// Pending tasks run to completion; there is no mid-task preemption.
    pub fn shutdown(&self) {
        let workers: Vec<Arc<Worker>> = {
            let map = self
                .workers
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if self.shut_down.swap(true, Ordering::SeqCst) {
                return;
            }
            for worker in map.values() {
                worker.post_stop();
            }
            map.values().cloned().collect()
        };

        // Join outside the lock; workers may still be draining.
        for worker in &workers {
            worker.join();
        }

        self.workers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        info!(count = workers.len(), "scheduler shut down");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
