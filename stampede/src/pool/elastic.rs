use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;

use super::{DepletionPolicy, SessionPool, UsageStats};
use crate::error::SchedulerResult;
use crate::session::{Session, SessionFactory};

/// Bounded primary queue with a lock-free overflow.
///
/// `reserve(n)` pre-fills the primary queue with `n` sessions. Returns go to
/// the primary queue while it has room and to the overflow otherwise, which
/// only happens after the depletion policy allocated extra sessions.
#[derive(Debug)]
pub struct ElasticPool {
    factory: Arc<SessionFactory>,
    depletion: DepletionPolicy,
    capacity: AtomicUsize,
    primary: Mutex<VecDeque<Session>>,
    overflow: SegQueue<Session>,
    usage: UsageStats,
}

impl ElasticPool {
    /// Empty pool; call [`reserve`](SessionPool::reserve) to fill it.
    pub fn new(factory: Arc<SessionFactory>, depletion: DepletionPolicy) -> Self {
        Self {
            factory,
            depletion,
            capacity: AtomicUsize::new(0),
            primary: Mutex::new(VecDeque::new()),
            overflow: SegQueue::new(),
            usage: UsageStats::default(),
        }
    }

    /// Sessions currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.primary.lock().len() + self.overflow.len()
    }
}

impl SessionPool for ElasticPool {
    fn reserve(&self, capacity: usize) -> SchedulerResult<()> {
        let current = self.capacity.load(Ordering::Acquire);
        if capacity <= current {
            return Ok(());
        }
        let mut fresh = Vec::with_capacity(capacity - current);
        for _ in current..capacity {
            fresh.push(self.factory.create()?);
        }
        let mut primary = self.primary.lock();
        primary.reserve(fresh.len());
        primary.extend(fresh);
        self.capacity.store(capacity, Ordering::Release);
        tracing::debug!(
            "Elastic pool for `{}` reserved {} sessions",
            self.factory.group(),
            capacity
        );
        Ok(())
    }

    fn acquire(&self) -> Option<Session> {
        let session = self
            .primary
            .lock()
            .pop_front()
            .or_else(|| self.overflow.pop())
            .or_else(|| match self.depletion {
                DepletionPolicy::Fail => None,
                DepletionPolicy::Allocate => match self.factory.create() {
                    Ok(session) => {
                        tracing::debug!(
                            "Elastic pool for `{}` allocated session {} on depletion",
                            self.factory.group(),
                            session.id()
                        );
                        Some(session)
                    }
                    Err(err) => {
                        tracing::warn!("Elastic pool failed to allocate a session: {}", err);
                        None
                    }
                },
            })?;
        self.usage.increment();
        Some(session)
    }

    fn release(&self, session: Session) {
        self.usage.decrement();
        let capacity = self.capacity.load(Ordering::Acquire);
        let mut primary = self.primary.lock();
        if primary.len() < capacity {
            primary.push_back(session);
        } else {
            drop(primary);
            self.overflow.push(session);
        }
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
    use stampede_sim::SimEventLoopGroup;

    fn pool(policy: DepletionPolicy) -> (SimEventLoopGroup, ElasticPool) {
        let sim = SimEventLoopGroup::new(2);
        let scenario = Scenario::builder().build().expect("empty scenario");
        let factory = Arc::new(SessionFactory::new(
            "main",
            scenario,
            sim.loops(),
            Arc::new(StatisticsRegistry::default()),
            Arc::new(AtomicUsize::new(0)),
        ));
        (sim, ElasticPool::new(factory, policy))
    }

    #[test]
    fn test_fail_policy_returns_none_when_depleted() {
        let (_sim, pool) = pool(DepletionPolicy::Fail);
        pool.reserve(2).expect("reserve");

        let a = pool.acquire().expect("first");
        let b = pool.acquire().expect("second");
        assert!(pool.acquire().is_none());
        assert_eq!(pool.usage().used(), 2);

        pool.release(a);
        pool.release(b);
        assert_eq!(pool.idle(), 2);
        assert_eq!(pool.max_used(), 2);
    }

    #[test]
    fn test_allocate_policy_grows_into_overflow() {
        let (_sim, pool) = pool(DepletionPolicy::Allocate);
        pool.reserve(1).expect("reserve");

        let a = pool.acquire().expect("reserved");
        let b = pool.acquire().expect("allocated");
        assert_ne!(a, b);

        pool.release(a);
        pool.release(b);
        // One returns to the primary queue, the extra one overflows.
        assert_eq!(pool.primary.lock().len(), 1);
        assert_eq!(pool.overflow.len(), 1);
        assert!(pool.acquire().is_some());
        assert!(pool.acquire().is_some());
    }

    #[test]
    fn test_reserve_is_incremental() {
        let (_sim, pool) = pool(DepletionPolicy::Fail);
        pool.reserve(3).expect("reserve");
        pool.reserve(2).expect("smaller reserve is a no-op");
        assert_eq!(pool.idle(), 3);
        pool.reserve(5).expect("grow");
        assert_eq!(pool.idle(), 5);
        assert_eq!(pool.factory.created(), 5);
    }

    #[test]
    fn test_reset_stats() {
        let (_sim, pool) = pool(DepletionPolicy::Fail);
        pool.reserve(2).expect("reserve");
        let a = pool.acquire().expect("first");
        let _b = pool.acquire().expect("second");
        pool.release(a);
        pool.reset_stats();
        assert_eq!(pool.min_used(), 1);
        assert_eq!(pool.max_used(), 1);
    }
}
