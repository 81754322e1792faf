use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::fmt;
use std::time::Duration;

use stampede_core::Task;

/// A task waiting in the virtual-time queue.
pub(crate) struct ScheduledTask {
    time: Duration,
    sequence: u64,
    executor: usize,
    task: Task,
}

impl ScheduledTask {
    pub(crate) fn new(time: Duration, sequence: u64, executor: usize, task: Task) -> Self {
        Self {
            time,
            sequence,
            executor,
            task,
        }
    }

    pub(crate) fn time(&self) -> Duration {
        self.time
    }

    pub(crate) fn executor(&self) -> usize {
        self.executor
    }

    pub(crate) fn into_task(self) -> Task {
        self.task
    }
}

impl fmt::Debug for ScheduledTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledTask")
            .field("time", &self.time)
            .field("sequence", &self.sequence)
            .field("executor", &self.executor)
            .finish()
    }
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.sequence == other.sequence
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap; reverse so the earliest deadline pops first,
        // then the lowest sequence number for FIFO order at equal deadlines.
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.sequence.cmp(&self.sequence),
            ordering => ordering,
        }
    }
}

/// Deadline-ordered task queue.
#[derive(Debug, Default)]
pub(crate) struct TaskQueue {
    heap: BinaryHeap<ScheduledTask>,
}

impl TaskQueue {
    pub(crate) fn schedule(&mut self, task: ScheduledTask) {
        self.heap.push(task);
    }

    /// Pop the earliest task if its deadline is at or before `limit`.
    pub(crate) fn pop_due(&mut self, limit: Duration) -> Option<ScheduledTask> {
        if self.heap.peek()?.time() <= limit {
            self.heap.pop()
        } else {
            None
        }
    }

    pub(crate) fn pop_earliest(&mut self) -> Option<ScheduledTask> {
        self.heap.pop()
    }

    pub(crate) fn next_deadline(&self) -> Option<Duration> {
        self.heap.peek().map(ScheduledTask::time)
    }

    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }
}
