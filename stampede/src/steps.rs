//! Built-in steps.
//!
//! Scenario steps are usually closures (see [`Step`]); the steps here cover
//! scheduling behavior that needs session state across invocations.

use std::time::Duration;

use crate::error::SchedulerResult;
use crate::sequence::Step;
use crate::session::SessionCore;

fn nanos(d: Duration) -> i64 {
    i64::try_from(d.as_nanos()).unwrap_or(i64::MAX)
}

/// Block the sequence for a fixed time without holding a thread.
///
/// The deadline lives in a sequence-scoped variable, so concurrent instances
/// of one sequence wait independently.
#[derive(Debug, Clone)]
pub struct ThinkTime {
    var: String,
    duration: Duration,
}

impl ThinkTime {
    /// Wait `duration`, keeping the deadline in variable `var`.
    pub fn new(var: impl Into<String>, duration: Duration) -> Self {
        Self {
            var: var.into(),
            duration,
        }
    }

    /// Configured wait.
    pub fn duration(&self) -> Duration {
        self.duration
    }
}

impl Step for ThinkTime {
    fn reserve(&self, session: &mut SessionCore) -> SchedulerResult<()> {
        session.declare_sequence_int(&self.var)
    }

    fn invoke(&self, session: &mut SessionCore) -> SchedulerResult<bool> {
        let now = nanos(session.now());
        if !session.is_set(&self.var)? {
            session.set_int(&self.var, now.saturating_add(nanos(self.duration)))?;
            if let Some(handle) = session.session() {
                session
                    .executor()
                    .schedule(self.duration, Box::new(move || handle.proceed()));
            }
            return Ok(false);
        }
        if now < session.get_int(&self.var)? {
            // Woken early by another sequence.
            return Ok(false);
        }
        session.unset(&self.var)?;
        Ok(true)
    }
}

/// Enable another sequence of the scenario at its lowest free index.
#[derive(Debug, Clone)]
pub struct StartSequence {
    name: String,
}

impl StartSequence {
    /// Start the sequence called `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Step for StartSequence {
    fn invoke(&self, session: &mut SessionCore) -> SchedulerResult<bool> {
        if !session.start_sequence(&self.name)? {
            tracing::debug!("Session {}: sequence `{}` not started", session.id(), self.name);
        }
        Ok(true)
    }
}
