//! Named per-session resources.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;

use crate::error::{SchedulerError, SchedulerResult};

/// State owned by a session for integrating steps with external work, such as
/// a pending request or an open connection slot.
pub trait SessionResource: Send + 'static {
    /// Called whenever the session is reset after a run.
    fn on_session_reset(&mut self) {}

    /// Called when a terminating or failing session abandons outstanding work.
    fn cancel(&mut self) {}
}

struct ResourceSlot {
    value: Box<dyn Any + Send>,
    reset: fn(&mut (dyn Any + Send)),
    cancel: fn(&mut (dyn Any + Send)),
}

impl ResourceSlot {
    fn new<R: SessionResource>(resource: R) -> Self {
        Self {
            value: Box::new(resource),
            reset: |value| {
                if let Some(resource) = value.downcast_mut::<R>() {
                    resource.on_session_reset();
                }
            },
            cancel: |value| {
                if let Some(resource) = value.downcast_mut::<R>() {
                    resource.cancel();
                }
            },
        }
    }
}

/// The resources declared on one session.
#[derive(Default)]
pub struct Resources {
    names: HashMap<String, usize>,
    slots: Vec<ResourceSlot>,
}

impl Resources {
    pub(crate) fn declare<R: SessionResource>(
        &mut self,
        name: &str,
        resource: R,
    ) -> SchedulerResult<()> {
        if self.names.contains_key(name) {
            return Err(SchedulerError::DuplicateDeclaration(name.to_string()));
        }
        self.names.insert(name.to_string(), self.slots.len());
        self.slots.push(ResourceSlot::new(resource));
        Ok(())
    }

    /// Whether a resource with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.names.contains_key(name)
    }

    /// Number of declared resources.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub(crate) fn get<R: SessionResource>(&self, name: &str) -> SchedulerResult<&R> {
        self.names
            .get(name)
            .and_then(|&i| self.slots[i].value.downcast_ref::<R>())
            .ok_or_else(|| SchedulerError::UnknownResource(name.to_string()))
    }

    pub(crate) fn get_mut<R: SessionResource>(&mut self, name: &str) -> SchedulerResult<&mut R> {
        let index = *self
            .names
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownResource(name.to_string()))?;
        self.slots[index]
            .value
            .downcast_mut::<R>()
            .ok_or_else(|| SchedulerError::UnknownResource(name.to_string()))
    }

    pub(crate) fn reset(&mut self) {
        for slot in &mut self.slots {
            (slot.reset)(slot.value.as_mut());
        }
    }

    pub(crate) fn cancel_all(&mut self) {
        for slot in &mut self.slots {
            (slot.cancel)(slot.value.as_mut());
        }
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names.keys()).finish()
    }
}
