//! Sequence templates and their pooled runtime instances.

use std::fmt;
use std::sync::Arc;

use crate::error::SchedulerResult;
use crate::session::SessionCore;

/// One unit of scenario behavior.
///
/// `invoke` returns `Ok(true)` when the step completed and the sequence may
/// advance, or `Ok(false)` when it is blocked. A blocked step is invoked again
/// the next time the session runs, which only happens after someone calls
/// [`Session::proceed`](crate::session::Session::proceed).
pub trait Step: Send + Sync {
    /// Try to make progress.
    fn invoke(&self, session: &mut SessionCore) -> SchedulerResult<bool>;

    /// Declare the variables and resources this step needs.
    ///
    /// Called once per session at construction, with the owning sequence
    /// current at index 0.
    fn reserve(&self, _session: &mut SessionCore) -> SchedulerResult<()> {
        Ok(())
    }
}

impl<F> Step for F
where
    F: Fn(&mut SessionCore) -> SchedulerResult<bool> + Send + Sync,
{
    fn invoke(&self, session: &mut SessionCore) -> SchedulerResult<bool> {
        self(session)
    }
}

/// Immutable, shared list of steps.
pub struct SequenceTemplate {
    phase: String,
    name: String,
    id: usize,
    concurrency: usize,
    steps: Vec<Arc<dyn Step>>,
}

impl SequenceTemplate {
    pub(crate) fn new(
        phase: String,
        name: String,
        id: usize,
        concurrency: usize,
        steps: Vec<Arc<dyn Step>>,
    ) -> Self {
        Self {
            phase,
            name,
            id,
            concurrency: concurrency.max(1),
            steps,
        }
    }

    /// Name of the phase that declared this sequence.
    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// Sequence name, unique within its scenario.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Position of this template within its scenario.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Maximum number of simultaneously enabled instances per session.
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[Arc<dyn Step>] {
        &self.steps
    }
}

impl fmt::Debug for SequenceTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SequenceTemplate")
            .field("phase", &self.phase)
            .field("name", &self.name)
            .field("id", &self.id)
            .field("concurrency", &self.concurrency)
            .field("steps", &self.steps.len())
            .finish()
    }
}

/// A template bound to one concurrency slot of one session.
#[derive(Debug)]
pub struct SequenceInstance {
    template: Option<Arc<SequenceTemplate>>,
    index: usize,
    cursor: usize,
    completed: bool,
}

impl SequenceInstance {
    fn empty() -> Self {
        Self {
            template: None,
            index: 0,
            cursor: 0,
            completed: false,
        }
    }

    fn bind(&mut self, template: Arc<SequenceTemplate>, index: usize) {
        self.template = Some(template);
        self.index = index;
        self.cursor = 0;
        self.completed = false;
    }

    fn clear(&mut self) {
        self.template = None;
        self.index = 0;
        self.cursor = 0;
        self.completed = false;
    }

    /// Bound template, `None` while the instance sits in the pool.
    pub fn template(&self) -> Option<&Arc<SequenceTemplate>> {
        self.template.as_ref()
    }

    /// Concurrency slot this instance occupies.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Index of the next step to invoke.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether every step completed.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub(crate) fn mark_completed(&mut self) {
        self.completed = true;
    }

    /// Invoke steps from the cursor until one blocks or the sequence ends.
    ///
    /// Returns `true` if at least one step advanced or the sequence completed.
    pub(crate) fn progress(&mut self, session: &mut SessionCore) -> SchedulerResult<bool> {
        let Some(template) = self.template.clone() else {
            return Ok(false);
        };
        let mut progressed = false;
        while !self.completed {
            let Some(step) = template.steps.get(self.cursor) else {
                self.completed = true;
                break;
            };
            if !step.invoke(session)? {
                break;
            }
            self.cursor += 1;
            progressed = true;
            if session.take_completion_request() {
                self.completed = true;
            }
        }
        if self.cursor >= template.steps.len() {
            self.completed = true;
        }
        Ok(progressed || self.completed)
    }
}

/// Bounded free list of sequence instances plus per-template slot tracking.
#[derive(Debug)]
pub(crate) struct SequencePool {
    free: Vec<SequenceInstance>,
    /// `in_use[template][index]`.
    in_use: Vec<Vec<bool>>,
}

impl SequencePool {
    pub(crate) fn new(capacity: usize, templates: &[Arc<SequenceTemplate>]) -> Self {
        Self {
            free: (0..capacity).map(|_| SequenceInstance::empty()).collect(),
            in_use: templates
                .iter()
                .map(|t| vec![false; t.concurrency()])
                .collect(),
        }
    }

    /// Lowest index of `template` that is not currently enabled.
    pub(crate) fn free_index(&self, template: &SequenceTemplate) -> Option<usize> {
        self.in_use
            .get(template.id())?
            .iter()
            .position(|used| !used)
    }

    /// Bind a pooled instance to `template` at `index`.
    ///
    /// Logs a warning and returns `None` if the pool is empty or the index is
    /// out of range or already taken.
    pub(crate) fn acquire(
        &mut self,
        template: &Arc<SequenceTemplate>,
        index: usize,
    ) -> Option<SequenceInstance> {
        let Some(slot) = self
            .in_use
            .get_mut(template.id())
            .and_then(|slots| slots.get_mut(index))
        else {
            tracing::warn!(
                "Dropping activation of sequence `{}`: index {} exceeds concurrency {}",
                template.name(),
                index,
                template.concurrency()
            );
            return None;
        };
        if *slot {
            tracing::warn!(
                "Dropping activation of sequence `{}`: index {} is already running",
                template.name(),
                index
            );
            return None;
        }
        let Some(mut instance) = self.free.pop() else {
            tracing::warn!(
                "Dropping activation of sequence `{}`: too many concurrent sequences",
                template.name()
            );
            return None;
        };
        *slot = true;
        instance.bind(template.clone(), index);
        Some(instance)
    }

    pub(crate) fn release(&mut self, mut instance: SequenceInstance) {
        if let Some(template) = instance.template.as_ref() {
            if let Some(slot) = self
                .in_use
                .get_mut(template.id())
                .and_then(|slots| slots.get_mut(instance.index))
            {
                *slot = false;
            }
        }
        instance.clear();
        self.free.push(instance);
    }

    pub(crate) fn available(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(id: usize, concurrency: usize) -> Arc<SequenceTemplate> {
        Arc::new(SequenceTemplate::new(
            "phase".to_string(),
            format!("seq-{id}"),
            id,
            concurrency,
            Vec::new(),
        ))
    }

    #[test]
    fn test_indices_are_exclusive() {
        let t = template(0, 2);
        let mut pool = SequencePool::new(4, std::slice::from_ref(&t));

        assert_eq!(pool.free_index(&t), Some(0));
        let first = pool.acquire(&t, 0).expect("slot 0 free");
        assert_eq!(pool.free_index(&t), Some(1));
        assert!(pool.acquire(&t, 0).is_none());
        let second = pool.acquire(&t, 1).expect("slot 1 free");
        assert_eq!(pool.free_index(&t), None);
        assert!(pool.acquire(&t, 2).is_none());

        pool.release(first);
        assert_eq!(pool.free_index(&t), Some(0));
        pool.release(second);
        assert_eq!(pool.available(), 4);
    }

    #[test]
    fn test_pool_capacity_bounds_activations() {
        let a = template(0, 1);
        let b = template(1, 1);
        let mut pool = SequencePool::new(1, &[a.clone(), b.clone()]);
        let held = pool.acquire(&a, 0).expect("capacity 1");
        assert!(pool.acquire(&b, 0).is_none());
        pool.release(held);
        assert!(pool.acquire(&b, 0).is_some());
    }

    #[test]
    fn test_concurrency_is_at_least_one() {
        assert_eq!(template(0, 0).concurrency(), 1);
    }
}
