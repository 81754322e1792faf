use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use stampede_core::SeededRandom;

use crate::config::ModelConfig;
use crate::rate::RateGenerator;

/// Session creation strategy of a running phase.
#[derive(Debug)]
pub(crate) enum Model {
    AtOnce { users: usize },
    Always { users: usize },
    Sequentially { repeats: usize, completions: AtomicUsize },
    Noop,
    Open(OpenModel),
}

impl Model {
    /// Build the runtime model for `config`.
    ///
    /// `duration` is the ramp length of a rate ramp.
    pub(crate) fn from_config(
        config: &ModelConfig,
        duration: Option<Duration>,
        random: SeededRandom,
    ) -> Self {
        let ramp = duration.unwrap_or_default();
        match *config {
            ModelConfig::AtOnce { users } => Model::AtOnce { users },
            ModelConfig::Always { users } => Model::Always { users },
            ModelConfig::Sequentially { repeats } => Model::Sequentially {
                repeats,
                completions: AtomicUsize::new(0),
            },
            ModelConfig::Noop => Model::Noop,
            ModelConfig::ConstantRate {
                users_per_sec,
                variance,
                ..
            } => {
                let generator = if variance {
                    RateGenerator::poisson_constant(users_per_sec, random)
                } else {
                    RateGenerator::constant(users_per_sec)
                };
                Model::Open(OpenModel::new(generator, config.max_sessions()))
            }
            ModelConfig::RampRate {
                initial_users_per_sec,
                target_users_per_sec,
                variance,
                ..
            } => {
                let generator = if variance {
                    RateGenerator::poisson_ramp(
                        initial_users_per_sec,
                        target_users_per_sec,
                        ramp,
                        random,
                    )
                } else {
                    RateGenerator::ramp(initial_users_per_sec, target_users_per_sec, ramp)
                };
                Model::Open(OpenModel::new(generator, config.max_sessions()))
            }
        }
    }

    pub(crate) fn open(&self) -> Option<&OpenModel> {
        match self {
            Model::Open(open) => Some(open),
            _ => None,
        }
    }
}

/// State of a rate-driven phase.
#[derive(Debug)]
pub(crate) struct OpenModel {
    generator: Mutex<RateGenerator>,
    max_sessions: usize,
    next_fire_ns: AtomicU64,
    /// Intended start times of arrivals that found no session, oldest first.
    /// Its length is the throttled-user count.
    deferred: Mutex<VecDeque<Duration>>,
    throttled: AtomicUsize,
    peak_throttled: AtomicUsize,
}

impl OpenModel {
    fn new(generator: RateGenerator, max_sessions: usize) -> Self {
        Self {
            generator: Mutex::new(generator),
            max_sessions,
            next_fire_ns: AtomicU64::new(0),
            deferred: Mutex::new(VecDeque::new()),
            throttled: AtomicUsize::new(0),
            peak_throttled: AtomicUsize::new(0),
        }
    }

    pub(crate) fn max_sessions(&self) -> usize {
        self.max_sessions
    }

    /// Draw the next fire time and remember it.
    pub(crate) fn advance_fire_time(&self) -> u64 {
        let next = self.generator.lock().next_fire_time_ns();
        self.next_fire_ns.store(next, Ordering::Release);
        next
    }

    pub(crate) fn next_fire_ns(&self) -> u64 {
        self.next_fire_ns.load(Ordering::Acquire)
    }

    /// Record an arrival that could not get a session.
    pub(crate) fn throttle(&self, intended_start: Duration) {
        let mut deferred = self.deferred.lock();
        deferred.push_back(intended_start);
        let throttled = self.throttled.fetch_add(1, Ordering::AcqRel) + 1;
        self.peak_throttled.fetch_max(throttled, Ordering::AcqRel);
    }

    /// Claim the oldest deferred arrival.
    pub(crate) fn take_throttled(&self) -> Option<Duration> {
        let mut deferred = self.deferred.lock();
        let intended = deferred.pop_front()?;
        self.throttled.fetch_sub(1, Ordering::AcqRel);
        Some(intended)
    }

    pub(crate) fn throttled(&self) -> usize {
        self.throttled.load(Ordering::Acquire)
    }

    pub(crate) fn peak_throttled(&self) -> usize {
        self.peak_throttled.load(Ordering::Acquire)
    }
}
