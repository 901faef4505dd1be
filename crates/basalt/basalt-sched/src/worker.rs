//! Named single-thread FIFO task executor.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use tracing::{debug, error};

use crate::task::{panic_message, CancelToken, Task};

struct WorkerState {
    queue: VecDeque<Task>,
    stop: bool,
    pending: HashSet<u64>,
    running: HashSet<u64>,
    /// Tokens of tasks that have not finished yet, for cancel-by-id.
    tokens: HashMap<u64, CancelToken>,
}

/// One worker owns one OS thread and a FIFO of tasks.
///
/// The queue state lives under one mutex; the thread handle lives under a
/// separate one so `join()` never blocks `post_task()` callers while the
/// thread winds down.
pub struct Worker {
    id: String,
    state: Mutex<WorkerState>,
    cv: Condvar,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    pub fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            state: Mutex::new(WorkerState {
                queue: VecDeque::new(),
                stop: false,
                pending: HashSet::new(),
                running: HashSet::new(),
                tokens: HashMap::new(),
            }),
            cv: Condvar::new(),
            thread: Mutex::new(None),
        })
    }

    fn lock(&self) -> MutexGuard<'_, WorkerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Spawn the worker thread. A second call while the thread is alive is a
    /// no-op.
    pub fn start(self: &Arc<Self>) {
        let mut slot = self.thread.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        let me = Arc::clone(self);
        match std::thread::Builder::new()
            .name(self.id.clone())
            .spawn(move || me.run())
        {
            Ok(handle) => *slot = Some(handle),
            Err(e) => error!(worker = %self.id, error = %e, "failed to spawn worker thread"),
        }
    }

    fn run(&self) {
        loop {
            let task = {
                let mut state = self.lock();
                loop {
                    if state.stop && state.queue.is_empty() {
                        return;
                    }
                    if let Some(task) = state.queue.pop_front() {
                        state.pending.remove(&task.id);
                        state.running.insert(task.id);
                        break task;
                    }
                    state = self
                        .cv
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            };

            let task_id = task.id;
            if task.token.is_cancelled() {
                debug!(worker = %self.id, task = task_id, "task cancelled before dispatch");
            } else if let Err(payload) = catch_unwind(AssertUnwindSafe(|| task.run())) {
                // A failing task must not take the worker down with it.
                error!(
                    worker = %self.id,
                    task = task_id,
                    panic = panic_message(payload.as_ref()),
                    "task panicked"
                );
            }

            let mut state = self.lock();
            state.running.remove(&task_id);
            state.tokens.remove(&task_id);
        }
    }

    /// Append a task and wake the worker.
    pub fn post_task(&self, task: Task) {
        {
            let mut state = self.lock();
            state.pending.insert(task.id);
            state.tokens.insert(task.id, task.token.clone());
            state.queue.push_back(task);
        }
        self.cv.notify_one();
    }

    /// Set the cancel token of a queued or running task. Returns `false`
    /// when the task already finished (or never belonged to this worker).
    /// Cancellation is cooperative: a queued task is skipped at dispatch, a
    /// running one only stops if it polls its token.
    pub fn cancel(&self, task_id: u64) -> bool {
        match self.lock().tokens.get(&task_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Ask the worker to drain its queue and exit.
    pub fn post_stop(&self) {
        self.lock().stop = true;
        self.cv.notify_one();
    }

    /// Join the worker thread. The handle is moved out under its own mutex
    /// first, so the (possibly long) join itself holds no lock.
    pub fn join(&self) {
        let handle = self
            .thread
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!(worker = %self.id, "worker thread terminated by panic");
            }
        }
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    pub fn running_count(&self) -> usize {
        self.lock().running.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[test]
    fn executes_tasks_in_submission_order() {
        let worker = Worker::new("order_test");
        let log = Arc::new(Mutex::new(Vec::new()));
        for i in 0..16u32 {
            let log = Arc::clone(&log);
            worker.post_task(Task::new(
                Box::new(move |_| log.lock().expect("log").push(i)),
                "record",
            ));
        }
        worker.start();
        worker.post_stop();
        worker.join();

        let seen = log.lock().expect("log").clone();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
    }

    #[test]
    fn cancelled_task_is_skipped() {
        let worker = Worker::new("cancel_test");
        let ran = Arc::new(AtomicU32::new(0));
        let ran2 = Arc::clone(&ran);
        let task = Task::new(
            Box::new(move |_| {
                ran2.fetch_add(1, Ordering::SeqCst);
            }),
            "should not run",
        );
        task.token.cancel();
        worker.post_task(task);
        worker.start();
        worker.post_stop();
        worker.join();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panicking_task_does_not_kill_the_worker() {
        let worker = Worker::new("panic_test");
        worker.start();
        worker.post_task(Task::new(Box::new(|_| panic!("boom")), "explodes"));

        let ran = Arc::new(AtomicU32::new(0));
        let ran2 = Arc::clone(&ran);
        worker.post_task(Task::new(
            Box::new(move |_| {
                ran2.fetch_add(1, Ordering::SeqCst);
            }),
            "survivor",
        ));

        worker.post_stop();
        worker.join();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stop_drains_pending_tasks_first() {
        let worker = Worker::new("drain_test");
        let count = Arc::new(AtomicU32::new(0));
        for _ in 0..8 {
            let count = Arc::clone(&count);
            worker.post_task(Task::new(
                Box::new(move |_| {
                    std::thread::sleep(Duration::from_millis(1));
                    count.fetch_add(1, Ordering::SeqCst);
                }),
                "unit",
            ));
        }
        worker.post_stop();
        worker.start();
        worker.join();
        assert_eq!(count.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn double_start_is_harmless() {
        let worker = Worker::new("double_start");
        worker.start();
        worker.start();
        worker.post_stop();
        worker.join();
    }
}
