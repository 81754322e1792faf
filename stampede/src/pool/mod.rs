//! Session pools.
//!
//! Two strategies share the [`SessionPool`] contract:
//!
//! - [`ElasticPool`]: a bounded, lock-guarded primary queue plus a lock-free
//!   overflow queue, with a configurable [`DepletionPolicy`].
//! - [`AffinityPool`]: one lock-free queue per executor. Acquisition prefers
//!   the caller's own queue and steals from the others otherwise; a session
//!   always returns to the queue of the executor it is bound to.
//!
//! Both track how many sessions are out of the pool with [`UsageStats`].

mod affinity;
mod elastic;
mod usage;

pub use affinity::AffinityPool;
pub use elastic::ElasticPool;
pub use usage::UsageStats;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::SchedulerResult;
use crate::session::{Session, SessionFactory};

/// A pool of reusable sessions.
pub trait SessionPool: Send + Sync + fmt::Debug {
    /// Make sure at least `capacity` sessions exist.
    fn reserve(&self, capacity: usize) -> SchedulerResult<()>;

    /// Take a session, or `None` when the pool is exhausted.
    fn acquire(&self) -> Option<Session>;

    /// Return a session taken with [`acquire`](Self::acquire).
    fn release(&self, session: Session);

    /// Usage counters.
    fn usage(&self) -> &UsageStats;

    /// Fewest sessions out of the pool since the last reset.
    fn min_used(&self) -> usize {
        self.usage().min_used()
    }

    /// Most sessions out of the pool since the last reset.
    fn max_used(&self) -> usize {
        self.usage().max_used()
    }

    /// Restart min/max tracking from the current usage.
    fn reset_stats(&self) {
        self.usage().reset()
    }
}

/// What an elastic pool does when both of its queues are empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DepletionPolicy {
    /// Return `None`, signalling backpressure to the phase.
    #[default]
    Fail,
    /// Create an extra session on the spot.
    Allocate,
}

/// Pool strategy of a benchmark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PoolKind {
    /// [`ElasticPool`].
    #[default]
    Elastic,
    /// [`AffinityPool`].
    Affinity,
}

/// Build a pool of `kind` backed by `factory`.
pub fn build_pool(
    kind: PoolKind,
    depletion: DepletionPolicy,
    factory: Arc<SessionFactory>,
) -> Arc<dyn SessionPool> {
    match kind {
        PoolKind::Elastic => Arc::new(ElasticPool::new(factory, depletion)),
        PoolKind::Affinity => Arc::new(AffinityPool::new(factory)),
    }
}
