//! `basalt-sched`: in-process execution plumbing shared by the exchange
//! processes.
//!
//! Two pieces live here:
//!
//! - [`BlockingQueue`], the bounded hand-off queue between the network
//!   ingress and the protocol dispatcher;
//! - the worker/scheduler core: named single-thread FIFO executors
//!   ([`Worker`]) owned and coordinated by a [`Scheduler`], with cooperative
//!   cancellation and single-shot result futures.

mod queue;
mod scheduler;
mod task;
mod worker;

pub use queue::{BlockingQueue, QueueError};
pub use scheduler::{Scheduler, SchedulerError, TaskFuture, TaskOutcome};
pub use task::{CancelToken, Task, TaskFn};
pub use worker::Worker;
