//! Resource groups: the sessions, pool and statistics shared by every phase
//! declaring the same `sharedResources` key.

use std::fmt;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

use stampede_core::EventLoops;

use crate::config::PoolConfig;
use crate::pool::{build_pool, SessionPool};
use crate::scenario::Scenario;
use crate::session::{Session, SessionFactory};
use crate::stats::StatisticsRegistry;

/// Sessions, pool and statistics of one resource group.
pub struct SharedResources {
    key: String,
    factory: Arc<SessionFactory>,
    pool: Arc<dyn SessionPool>,
    statistics: Arc<StatisticsRegistry>,
}

impl SharedResources {
    /// Create an empty group; sessions are created by reserving the pool.
    pub fn new(
        key: impl Into<String>,
        scenario: Arc<Scenario>,
        loops: EventLoops,
        statistics: Arc<StatisticsRegistry>,
        pool: &PoolConfig,
        ids: Arc<AtomicUsize>,
    ) -> Arc<Self> {
        let key = key.into();
        let factory = Arc::new(SessionFactory::new(
            key.as_str(),
            scenario,
            loops,
            statistics.clone(),
            ids,
        ));
        let pool = build_pool(pool.kind, pool.depletion, factory.clone());
        Arc::new(Self {
            key,
            factory,
            pool,
            statistics,
        })
    }

    /// Group key.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// The group's session pool.
    pub fn pool(&self) -> &Arc<dyn SessionPool> {
        &self.pool
    }

    /// The group's session factory.
    pub fn factory(&self) -> &Arc<SessionFactory> {
        &self.factory
    }

    /// Scenario every session of the group runs.
    pub fn scenario(&self) -> &Arc<Scenario> {
        self.factory.scenario()
    }

    /// Statistics shared by the group's phases.
    pub fn statistics(&self) -> &Arc<StatisticsRegistry> {
        &self.statistics
    }

    /// Every session the group created, pooled or not.
    pub fn sessions(&self) -> Vec<Session> {
        self.factory.sessions()
    }
}

impl fmt::Debug for SharedResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResources")
            .field("key", &self.key)
            .field("sessions", &self.factory.created())
            .field("pool", &self.pool)
            .finish()
    }
}
