//! Single-threaded executor abstraction and executor groups.
//!
//! An [`EventExecutor`] is a FIFO task queue drained by exactly one thread.
//! State confined to an executor (sessions, per-executor queues) is only ever
//! touched from tasks submitted to it, which is what makes the lock-free
//! paths in the scheduler sound.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::{CoreError, CoreResult};
use crate::executor_id::current_executor_id;

/// A unit of work submitted to an executor.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// A single-threaded event loop.
///
/// Tasks submitted through [`execute`](Self::execute) run in submission order.
/// Tasks submitted through [`schedule`](Self::schedule) run no earlier than
/// `delay` after submission, in deadline order.
pub trait EventExecutor: Send + Sync + fmt::Debug {
    /// Index of this executor within its group.
    fn id(&self) -> usize;

    /// Run `task` as soon as possible on this executor.
    fn execute(&self, task: Task);

    /// Run `task` on this executor after `delay`.
    fn schedule(&self, delay: Duration, task: Task);

    /// Whether the calling thread is this executor's thread.
    fn in_event_loop(&self) -> bool {
        current_executor_id() == Some(self.id())
    }
}

/// A fixed group of executors sharing one clock.
///
/// Cloning is cheap and every clone shares the round-robin cursor, so
/// [`next`](Self::next) spreads work across the group regardless of which
/// component holds the handle.
#[derive(Clone)]
pub struct EventLoops {
    executors: Arc<[Arc<dyn EventExecutor>]>,
    clock: Arc<dyn Clock>,
    next: Arc<AtomicUsize>,
}

impl EventLoops {
    /// Bundle executors and their clock.
    ///
    /// Executor `i` must report `id() == i`.
    pub fn new(executors: Vec<Arc<dyn EventExecutor>>, clock: Arc<dyn Clock>) -> CoreResult<Self> {
        if executors.is_empty() {
            return Err(CoreError::EmptyGroup);
        }
        debug_assert!(
            executors.iter().enumerate().all(|(i, e)| e.id() == i),
            "executor ids must match their position in the group"
        );
        Ok(Self {
            executors: executors.into(),
            clock,
            next: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Number of executors in the group.
    pub fn len(&self) -> usize {
        self.executors.len()
    }

    /// Always false; a group holds at least one executor.
    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }

    /// Executor at `index`, wrapping around the group size.
    pub fn executor(&self, index: usize) -> &Arc<dyn EventExecutor> {
        &self.executors[index % self.executors.len()]
    }

    /// Next executor in round-robin order.
    pub fn next(&self) -> &Arc<dyn EventExecutor> {
        let i = self.next.fetch_add(1, Ordering::Relaxed);
        self.executor(i)
    }

    /// Executor the calling thread belongs to, if any.
    pub fn current(&self) -> Option<&Arc<dyn EventExecutor>> {
        current_executor_id().and_then(|id| self.executors.get(id))
    }

    /// All executors, in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn EventExecutor>> {
        self.executors.iter()
    }

    /// The shared clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Shorthand for `self.clock().now()`.
    pub fn now(&self) -> Duration {
        self.clock.now()
    }
}

impl fmt::Debug for EventLoops {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventLoops")
            .field("executors", &self.executors.len())
            .field("clock", &self.clock)
            .finish()
    }
}
