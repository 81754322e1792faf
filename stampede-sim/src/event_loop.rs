//! Virtual-time executors sharing one event queue.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use stampede_core::{
    current_executor_id, set_current_executor_id, Clock, EventExecutor, EventLoops, Task,
};

use crate::queue::{ScheduledTask, TaskQueue};

#[derive(Debug, Default)]
struct SimInner {
    now: Duration,
    queue: TaskQueue,
    next_sequence: u64,
    tasks_executed: u64,
}

impl SimInner {
    fn push(&mut self, time: Duration, executor: usize, task: Task) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.queue
            .schedule(ScheduledTask::new(time, sequence, executor, task));
    }
}

type Shared = Arc<Mutex<SimInner>>;

/// One lane of a [`SimEventLoopGroup`].
pub struct SimExecutor {
    id: usize,
    inner: Shared,
}

impl fmt::Debug for SimExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimExecutor").field("id", &self.id).finish()
    }
}

impl EventExecutor for SimExecutor {
    fn id(&self) -> usize {
        self.id
    }

    fn execute(&self, task: Task) {
        let mut inner = self.inner.lock();
        let now = inner.now;
        inner.push(now, self.id, task);
    }

    fn schedule(&self, delay: Duration, task: Task) {
        let mut inner = self.inner.lock();
        let at = inner.now + delay;
        inner.push(at, self.id, task);
    }
}

/// Virtual clock of a [`SimEventLoopGroup`].
pub struct SimClock {
    inner: Shared,
}

impl fmt::Debug for SimClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimClock").field("now", &self.now()).finish()
    }
}

impl Clock for SimClock {
    fn now(&self) -> Duration {
        self.inner.lock().now
    }
}

/// Deterministic executor group driven by the caller.
///
/// Tasks run on the calling thread, one at a time, in deadline order. While a
/// task runs, [`current_executor_id`] reports the lane it was submitted to,
/// so affinity-aware code behaves as it would on a real event loop thread.
pub struct SimEventLoopGroup {
    inner: Shared,
    loops: EventLoops,
}

impl SimEventLoopGroup {
    /// Create a group with `executors` lanes (at least one).
    pub fn new(executors: usize) -> Self {
        let inner: Shared = Arc::new(Mutex::new(SimInner::default()));
        let lanes: Vec<Arc<dyn EventExecutor>> = (0..executors.max(1))
            .map(|id| {
                Arc::new(SimExecutor {
                    id,
                    inner: inner.clone(),
                }) as Arc<dyn EventExecutor>
            })
            .collect();
        let clock: Arc<dyn Clock> = Arc::new(SimClock {
            inner: inner.clone(),
        });
        let loops = match EventLoops::new(lanes, clock) {
            Ok(loops) => loops,
            Err(_) => unreachable!("at least one lane is always created"),
        };
        Self { inner, loops }
    }

    /// Handle to the simulated executors.
    pub fn loops(&self) -> EventLoops {
        self.loops.clone()
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.inner.lock().now
    }

    /// Number of queued tasks.
    pub fn pending(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Total number of tasks executed so far.
    pub fn tasks_executed(&self) -> u64 {
        self.inner.lock().tasks_executed
    }

    /// Deadline of the earliest queued task.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.inner.lock().queue.next_deadline()
    }

    /// Run the earliest task, advancing time to its deadline if needed.
    ///
    /// Returns `false` when the queue is empty.
    pub fn step(&self) -> bool {
        let next = {
            let mut inner = self.inner.lock();
            let task = inner.queue.pop_earliest();
            if let Some(ref t) = task {
                inner.now = inner.now.max(t.time());
                inner.tasks_executed += 1;
            }
            task
        };
        match next {
            Some(task) => {
                Self::run_task(task);
                true
            }
            None => false,
        }
    }

    /// Run every task that is due at the current time, including tasks those
    /// tasks submit for immediate execution. Returns the number of tasks run.
    pub fn run_ready(&self) -> usize {
        let now = self.now();
        self.run_due(now)
    }

    /// Advance time by `duration`, running every task whose deadline falls in
    /// the window in deadline order. Returns the number of tasks run.
    pub fn advance(&self, duration: Duration) -> usize {
        let target = self.now() + duration;
        self.advance_to(target)
    }

    /// Advance time to `target` (no-op for a target in the past).
    pub fn advance_to(&self, target: Duration) -> usize {
        let ran = self.run_due(target);
        let mut inner = self.inner.lock();
        inner.now = inner.now.max(target);
        ran
    }

    /// Run tasks until the queue is empty or `max_tasks` ran.
    pub fn run_until_idle(&self, max_tasks: usize) -> usize {
        let mut ran = 0;
        while ran < max_tasks && self.step() {
            ran += 1;
        }
        if ran == max_tasks {
            tracing::warn!("Simulation stopped after {} tasks with work pending", ran);
        }
        ran
    }

    /// Move time forward without running anything, as if every executor was
    /// starved of CPU for `duration`. Queued tasks become late.
    pub fn stall(&self, duration: Duration) {
        let mut inner = self.inner.lock();
        inner.now += duration;
        tracing::debug!("Simulated stall of {:?}, now {:?}", duration, inner.now);
    }

    fn run_due(&self, limit: Duration) -> usize {
        let mut ran = 0;
        loop {
            let next = {
                let mut inner = self.inner.lock();
                let task = inner.queue.pop_due(limit);
                if let Some(ref t) = task {
                    inner.now = inner.now.max(t.time());
                    inner.tasks_executed += 1;
                }
                task
            };
            match next {
                Some(task) => {
                    Self::run_task(task);
                    ran += 1;
                }
                None => return ran,
            }
        }
    }

    fn run_task(task: ScheduledTask) {
        let previous = current_executor_id();
        set_current_executor_id(Some(task.executor()));
        (task.into_task())();
        set_current_executor_id(previous);
    }
}

impl fmt::Debug for SimEventLoopGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("SimEventLoopGroup")
            .field("executors", &self.loops.len())
            .field("now", &inner.now)
            .field("pending", &inner.queue.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_execute_runs_at_current_time() {
        let sim = SimEventLoopGroup::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        sim.loops().executor(0).execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(sim.pending(), 1);
        assert_eq!(sim.run_ready(), 1);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(sim.now(), Duration::ZERO);
    }

    #[test]
    fn test_schedule_waits_for_virtual_time() {
        let sim = SimEventLoopGroup::new(1);
        let loops = sim.loops();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        let clock = loops.clock().clone();
        loops.executor(0).schedule(
            Duration::from_millis(50),
            Box::new(move || s.lock().push(clock.now())),
        );

        assert_eq!(sim.advance(Duration::from_millis(49)), 0);
        assert_eq!(sim.advance(Duration::from_millis(1)), 1);
        assert_eq!(*seen.lock(), vec![Duration::from_millis(50)]);
    }

    #[test]
    fn test_tasks_see_their_lane_id() {
        let sim = SimEventLoopGroup::new(3);
        let loops = sim.loops();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for executor in loops.iter() {
            let s = seen.clone();
            executor.execute(Box::new(move || s.lock().push(current_executor_id())));
        }
        sim.run_ready();
        assert_eq!(*seen.lock(), vec![Some(0), Some(1), Some(2)]);
        assert_eq!(current_executor_id(), None);
    }

    #[test]
    fn test_chained_immediate_tasks_run_in_one_pass() {
        let sim = SimEventLoopGroup::new(1);
        let loops = sim.loops();
        let counter = Arc::new(AtomicUsize::new(0));
        let c = counter.clone();
        let inner_loops = loops.clone();
        loops.executor(0).execute(Box::new(move || {
            c.fetch_add(1, Ordering::SeqCst);
            let c2 = c.clone();
            inner_loops.executor(0).execute(Box::new(move || {
                c2.fetch_add(1, Ordering::SeqCst);
            }));
        }));
        assert_eq!(sim.run_ready(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stall_makes_tasks_late() {
        let sim = SimEventLoopGroup::new(1);
        let loops = sim.loops();
        let ran_at = Arc::new(Mutex::new(None));
        let r = ran_at.clone();
        let clock = loops.clock().clone();
        loops.executor(0).schedule(
            Duration::from_millis(10),
            Box::new(move || *r.lock() = Some(clock.now())),
        );
        sim.stall(Duration::from_millis(100));
        sim.run_ready();
        assert_eq!(*ran_at.lock(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn test_run_until_idle_bounds_work() {
        let sim = SimEventLoopGroup::new(1);
        let loops = sim.loops();
        for i in 0..5 {
            loops
                .executor(0)
                .schedule(Duration::from_millis(i), Box::new(|| {}));
        }
        assert_eq!(sim.run_until_idle(3), 3);
        assert_eq!(sim.run_until_idle(10), 2);
        assert_eq!(sim.tasks_executed(), 5);
        assert_eq!(sim.next_deadline(), None);
    }
}
