//! Scenarios: the sequences a session runs.

use std::fmt;
use std::sync::Arc;

use crate::error::{SchedulerError, SchedulerResult};
use crate::sequence::{SequenceTemplate, Step};
use crate::session::SessionCore;

/// Scenario-level hook that declares session state at construction.
pub trait ResourceUtilizer: Send + Sync {
    /// Declare variables or resources on a freshly created session.
    fn reserve(&self, session: &mut SessionCore) -> SchedulerResult<()>;
}

impl<F> ResourceUtilizer for F
where
    F: Fn(&mut SessionCore) -> SchedulerResult<()> + Send + Sync,
{
    fn reserve(&self, session: &mut SessionCore) -> SchedulerResult<()> {
        self(session)
    }
}

/// Immutable description of what every session of a resource group does.
#[derive(Default)]
pub struct Scenario {
    sequences: Vec<Arc<SequenceTemplate>>,
    initial: Vec<usize>,
    max_sequences: usize,
    utilizers: Vec<Arc<dyn ResourceUtilizer>>,
}

impl Scenario {
    /// Start building a scenario.
    pub fn builder() -> ScenarioBuilder {
        ScenarioBuilder::default()
    }

    /// All sequence templates, indexed by id.
    pub fn sequences(&self) -> &[Arc<SequenceTemplate>] {
        &self.sequences
    }

    /// Templates started at index 0 when a session starts.
    pub fn initial_sequences(&self) -> impl Iterator<Item = &Arc<SequenceTemplate>> {
        self.initial.iter().filter_map(|id| self.sequences.get(*id))
    }

    /// Look up a template by name.
    pub fn sequence(&self, name: &str) -> SchedulerResult<&Arc<SequenceTemplate>> {
        self.sequences
            .iter()
            .find(|s| s.name() == name)
            .ok_or_else(|| SchedulerError::UnknownSequence(name.to_string()))
    }

    /// Upper bound on simultaneously enabled instances per session.
    pub fn max_sequences(&self) -> usize {
        self.max_sequences
    }

    pub(crate) fn utilizers(&self) -> &[Arc<dyn ResourceUtilizer>] {
        &self.utilizers
    }
}

impl fmt::Debug for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scenario")
            .field("sequences", &self.sequences)
            .field("initial", &self.initial)
            .field("max_sequences", &self.max_sequences)
            .finish()
    }
}

/// Builder for one sequence of a [`Scenario`].
pub struct SequenceBuilder {
    name: String,
    concurrency: usize,
    steps: Vec<Arc<dyn Step>>,
}

impl SequenceBuilder {
    /// New sequence with concurrency 1 and no steps.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            concurrency: 1,
            steps: Vec::new(),
        }
    }

    /// Allow up to `concurrency` simultaneous instances per session.
    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Append a step.
    pub fn step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Append a shared step.
    pub fn shared_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }
}

/// Builder for [`Scenario`].
#[derive(Default)]
pub struct ScenarioBuilder {
    phase: String,
    sequences: Vec<(SequenceBuilder, bool)>,
    max_sequences: Option<usize>,
    utilizers: Vec<Arc<dyn ResourceUtilizer>>,
}

impl ScenarioBuilder {
    /// Name of the phase that owns the scenario, recorded on every template.
    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phase = phase.into();
        self
    }

    /// Add a sequence started automatically with every session.
    pub fn initial(mut self, sequence: SequenceBuilder) -> Self {
        self.sequences.push((sequence, true));
        self
    }

    /// Add a sequence that steps start on demand.
    pub fn sequence(mut self, sequence: SequenceBuilder) -> Self {
        self.sequences.push((sequence, false));
        self
    }

    /// Cap the number of simultaneously enabled instances per session.
    ///
    /// Defaults to the sum of all sequence concurrencies.
    pub fn max_sequences(mut self, max: usize) -> Self {
        self.max_sequences = Some(max);
        self
    }

    /// Run `utilizer` once on every new session.
    pub fn utilizer(mut self, utilizer: impl ResourceUtilizer + 'static) -> Self {
        self.utilizers.push(Arc::new(utilizer));
        self
    }

    /// Assign template ids and build.
    pub fn build(self) -> SchedulerResult<Arc<Scenario>> {
        let mut sequences = Vec::with_capacity(self.sequences.len());
        let mut initial = Vec::new();
        for (id, (builder, is_initial)) in self.sequences.into_iter().enumerate() {
            if sequences
                .iter()
                .any(|s: &Arc<SequenceTemplate>| s.name() == builder.name)
            {
                return Err(SchedulerError::InvalidDefinition(format!(
                    "sequence `{}` is declared twice",
                    builder.name
                )));
            }
            if is_initial {
                initial.push(id);
            }
            sequences.push(Arc::new(SequenceTemplate::new(
                self.phase.clone(),
                builder.name,
                id,
                builder.concurrency,
                builder.steps,
            )));
        }
        let max_sequences = self
            .max_sequences
            .unwrap_or_else(|| sequences.iter().map(|s| s.concurrency()).sum());
        Ok(Arc::new(Scenario {
            sequences,
            initial,
            max_sequences,
            utilizers: self.utilizers,
        }))
    }
}
