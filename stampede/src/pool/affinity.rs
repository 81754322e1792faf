use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use crossbeam_utils::CachePadded;
use stampede_core::{current_executor_id, random_index};

use super::{SessionPool, UsageStats};
use crate::error::SchedulerResult;
use crate::session::{Session, SessionFactory};

/// One lock-free queue per executor, with work stealing.
///
/// A session lives in the queue of the executor it is bound to. Callers on an
/// executor thread poll their own queue first; everyone else, and local
/// misses, scan all queues starting at a random offset.
#[derive(Debug)]
pub struct AffinityPool {
    factory: Arc<SessionFactory>,
    queues: Vec<CachePadded<SegQueue<Session>>>,
    reserved: AtomicUsize,
    usage: UsageStats,
}

impl AffinityPool {
    /// Empty pool with one queue per executor of the factory's group.
    pub fn new(factory: Arc<SessionFactory>) -> Self {
        let queues = (0..factory.loops().len())
            .map(|_| CachePadded::new(SegQueue::new()))
            .collect();
        Self {
            factory,
            queues,
            reserved: AtomicUsize::new(0),
            usage: UsageStats::default(),
        }
    }

    /// Idle sessions in the queue of `executor`.
    pub fn idle_on(&self, executor: usize) -> usize {
        self.queues.get(executor).map_or(0, |q| q.len())
    }

    fn steal(&self, skip: Option<usize>) -> Option<Session> {
        let n = self.queues.len();
        let offset = random_index(n);
        (0..n)
            .map(|i| (offset + i) % n)
            .filter(|&i| Some(i) != skip)
            .find_map(|i| self.queues[i].pop())
    }
}

impl SessionPool for AffinityPool {
    fn reserve(&self, capacity: usize) -> SchedulerResult<()> {
        let current = self.reserved.load(Ordering::Acquire);
        let n = self.queues.len();
        for i in current..capacity {
            let session = self.factory.create_on(i % n)?;
            self.queues[session.executor_id()].push(session);
        }
        if capacity > current {
            self.reserved.store(capacity, Ordering::Release);
            tracing::debug!(
                "Affinity pool for `{}` reserved {} sessions over {} executors",
                self.factory.group(),
                capacity,
                n
            );
        }
        Ok(())
    }

    fn acquire(&self) -> Option<Session> {
        let local = current_executor_id().filter(|&id| id < self.queues.len());
        let session = local
            .and_then(|id| self.queues[id].pop())
            .or_else(|| self.steal(local))?;
        self.usage.increment();
        Some(session)
    }

    fn release(&self, session: Session) {
        self.usage.decrement();
        self.queues[session.executor_id() % self.queues.len()].push(session);
    }

    fn usage(&self) -> &UsageStats {
        &self.usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenario::Scenario;
    use crate::stats::StatisticsRegistry;
    use stampede_core::set_current_executor_id;
    use stampede_sim::SimEventLoopGroup;

    fn pool(executors: usize) -> (SimEventLoopGroup, AffinityPool) {
        let sim = SimEventLoopGroup::new(executors);
        let scenario = Scenario::builder().build().expect("empty scenario");
        let factory = Arc::new(SessionFactory::new(
            "main",
            scenario,
            sim.loops(),
            Arc::new(StatisticsRegistry::default()),
            Arc::new(AtomicUsize::new(0)),
        ));
        (sim, AffinityPool::new(factory))
    }

    #[test]
    fn test_reserve_spreads_round_robin() {
        let (_sim, pool) = pool(3);
        pool.reserve(7).expect("reserve");
        assert_eq!(pool.idle_on(0), 3);
        assert_eq!(pool.idle_on(1), 2);
        assert_eq!(pool.idle_on(2), 2);
    }

    #[test]
    fn test_local_queue_first_and_executor_never_changes() {
        let (_sim, pool) = pool(3);
        pool.reserve(6).expect("reserve");

        set_current_executor_id(Some(1));
        for _ in 0..50 {
            let session = pool.acquire().expect("local session");
            assert_eq!(session.executor_id(), 1);
            pool.release(session);
        }
        assert_eq!(pool.idle_on(1), 2);
        set_current_executor_id(None);
    }

    #[test]
    fn test_steals_and_returns_home() {
        let (_sim, pool) = pool(2);
        pool.reserve(2).expect("reserve");

        set_current_executor_id(Some(0));
        let local = pool.acquire().expect("local");
        let stolen = pool.acquire().expect("stolen from executor 1");
        assert_eq!(local.executor_id(), 0);
        assert_eq!(stolen.executor_id(), 1);
        assert!(pool.acquire().is_none());

        pool.release(stolen);
        pool.release(local);
        assert_eq!(pool.idle_on(0), 1);
        assert_eq!(pool.idle_on(1), 1);
        set_current_executor_id(None);
    }

    #[test]
    fn test_acquire_off_executor_scans_all_queues() {
        let (_sim, pool) = pool(4);
        pool.reserve(4).expect("reserve");
        let mut executors: Vec<usize> = (0..4)
            .map(|_| pool.acquire().expect("session").executor_id())
            .collect();
        executors.sort_unstable();
        assert_eq!(executors, vec![0, 1, 2, 3]);
        assert_eq!(pool.max_used(), 4);
    }
}
