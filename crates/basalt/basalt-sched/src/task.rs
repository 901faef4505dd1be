//! Cancel tokens and the unit of work dispatched to workers.

use std::any::Any;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Shared cooperative cancellation flag.
///
/// Setting the token never preempts a running task; it only prevents future
/// entry (checked at dispatch) and can be polled by long-running functions at
/// their own checkpoints.
#[derive(Clone, Default)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

pub type TaskFn = Box<dyn FnOnce(&CancelToken) + Send + 'static>;

/// One unit of work bound to a worker's FIFO.
pub struct Task {
    pub id: u64,
    pub token: CancelToken,
    pub desc: String,
    func: TaskFn,
}

impl Task {
    pub fn new(func: TaskFn, desc: &str) -> Self {
        Self {
            id: next_task_id(),
            token: CancelToken::new(),
            desc: desc.to_string(),
            func,
        }
    }

    pub(crate) fn run(self) {
        (self.func)(&self.token);
    }
}

/// Process-unique task id, starting at 1.
fn next_task_id() -> u64 {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

/// Best-effort extraction of a panic payload message.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("opaque panic payload")
}
