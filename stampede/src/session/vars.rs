//! Declared session variables.
//!
//! Variables are declared once while a session is built and live for the
//! whole session lifetime. Each slot carries its own "set" state; resetting a
//! session clears the state of every slot without releasing its storage.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::{SchedulerError, SchedulerResult};

/// Storage kind of a declared variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// One integer per session.
    Int,
    /// One JSON value per session.
    Object,
    /// One integer per concurrency slot of the owning sequence.
    SequenceInt,
    /// One JSON value per concurrency slot of the owning sequence.
    SequenceObject,
}

impl VarKind {
    fn type_name(self) -> &'static str {
        match self {
            VarKind::Int | VarKind::SequenceInt => "integer",
            VarKind::Object | VarKind::SequenceObject => "object",
        }
    }

    /// Whether the variable is indexed by the current sequence.
    pub fn is_sequence_scoped(self) -> bool {
        matches!(self, VarKind::SequenceInt | VarKind::SequenceObject)
    }
}

#[derive(Debug)]
enum Slot {
    Int(Option<i64>),
    Object(Option<Value>),
    SequenceInt(Vec<Option<i64>>),
    SequenceObject(Vec<Option<Value>>),
}

impl Slot {
    fn kind(&self) -> VarKind {
        match self {
            Slot::Int(_) => VarKind::Int,
            Slot::Object(_) => VarKind::Object,
            Slot::SequenceInt(_) => VarKind::SequenceInt,
            Slot::SequenceObject(_) => VarKind::SequenceObject,
        }
    }

    fn unset(&mut self) {
        match self {
            Slot::Int(v) => *v = None,
            Slot::Object(v) => *v = None,
            Slot::SequenceInt(slots) => slots.iter_mut().for_each(|v| *v = None),
            Slot::SequenceObject(slots) => slots.iter_mut().for_each(|v| *v = None),
        }
    }
}

fn indexed<'a, T>(
    slots: &'a mut [Option<T>],
    name: &str,
    index: Option<usize>,
) -> SchedulerResult<&'a mut Option<T>> {
    let index = index.ok_or_else(|| SchedulerError::NoCurrentSequence(name.to_string()))?;
    slots.get_mut(index).ok_or_else(|| SchedulerError::IndexOutOfRange {
        name: name.to_string(),
        index,
    })
}

/// The variables declared on one session.
///
/// Accessors take the current sequence index; it is ignored for scalar
/// variables and required for sequence-scoped ones.
#[derive(Debug, Default)]
pub struct Vars {
    names: HashMap<String, usize>,
    slots: Vec<Slot>,
}

impl Vars {
    fn declare(&mut self, name: &str, slot: Slot) -> SchedulerResult<()> {
        if let Some(&existing) = self.names.get(name) {
            let same = match (&self.slots[existing], &slot) {
                (Slot::SequenceInt(a), Slot::SequenceInt(b)) => a.len() == b.len(),
                (Slot::SequenceObject(a), Slot::SequenceObject(b)) => a.len() == b.len(),
                (a, b) => a.kind() == b.kind(),
            };
            return if same {
                Ok(())
            } else {
                Err(SchedulerError::DuplicateDeclaration(name.to_string()))
            };
        }
        self.names.insert(name.to_string(), self.slots.len());
        self.slots.push(slot);
        Ok(())
    }

    pub(crate) fn declare_int(&mut self, name: &str) -> SchedulerResult<()> {
        self.declare(name, Slot::Int(None))
    }

    pub(crate) fn declare_object(&mut self, name: &str) -> SchedulerResult<()> {
        self.declare(name, Slot::Object(None))
    }

    pub(crate) fn declare_sequence_int(
        &mut self,
        name: &str,
        concurrency: usize,
    ) -> SchedulerResult<()> {
        self.declare(name, Slot::SequenceInt(vec![None; concurrency]))
    }

    pub(crate) fn declare_sequence_object(
        &mut self,
        name: &str,
        concurrency: usize,
    ) -> SchedulerResult<()> {
        self.declare(name, Slot::SequenceObject(vec![None; concurrency]))
    }

    fn slot_mut(&mut self, name: &str) -> SchedulerResult<&mut Slot> {
        let index = *self
            .names
            .get(name)
            .ok_or_else(|| SchedulerError::UnknownVariable(name.to_string()))?;
        Ok(&mut self.slots[index])
    }

    fn mismatch(name: &str, expected: &'static str, slot: &Slot) -> SchedulerError {
        SchedulerError::TypeMismatch {
            name: name.to_string(),
            expected,
            actual: slot.kind().type_name(),
        }
    }

    /// Kind of a declared variable.
    pub fn kind(&self, name: &str) -> Option<VarKind> {
        self.names.get(name).map(|&i| self.slots[i].kind())
    }

    /// Number of declared variables.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether nothing was declared.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Names of all declared variables.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.keys().map(String::as_str)
    }

    pub(crate) fn set_int(
        &mut self,
        name: &str,
        index: Option<usize>,
        value: i64,
    ) -> SchedulerResult<()> {
        match self.slot_mut(name)? {
            Slot::Int(v) => *v = Some(value),
            Slot::SequenceInt(slots) => *indexed(slots, name, index)? = Some(value),
            other => return Err(Self::mismatch(name, "integer", other)),
        }
        Ok(())
    }

    pub(crate) fn get_int(&mut self, name: &str, index: Option<usize>) -> SchedulerResult<i64> {
        let value = match self.slot_mut(name)? {
            Slot::Int(v) => *v,
            Slot::SequenceInt(slots) => *indexed(slots, name, index)?,
            other => return Err(Self::mismatch(name, "integer", other)),
        };
        value.ok_or_else(|| SchedulerError::VariableNotSet(name.to_string()))
    }

    pub(crate) fn set_object(
        &mut self,
        name: &str,
        index: Option<usize>,
        value: Value,
    ) -> SchedulerResult<()> {
        match self.slot_mut(name)? {
            Slot::Object(v) => *v = Some(value),
            Slot::SequenceObject(slots) => *indexed(slots, name, index)? = Some(value),
            other => return Err(Self::mismatch(name, "object", other)),
        }
        Ok(())
    }

    pub(crate) fn get_object(
        &mut self,
        name: &str,
        index: Option<usize>,
    ) -> SchedulerResult<&Value> {
        let value = match self.slot_mut(name)? {
            Slot::Object(v) => v.as_ref(),
            Slot::SequenceObject(slots) => indexed(slots, name, index)?.as_ref(),
            other => {
                let kind = other.kind().type_name();
                return Err(SchedulerError::TypeMismatch {
                    name: name.to_string(),
                    expected: "object",
                    actual: kind,
                });
            }
        };
        value.ok_or_else(|| SchedulerError::VariableNotSet(name.to_string()))
    }

    pub(crate) fn is_set(&mut self, name: &str, index: Option<usize>) -> SchedulerResult<bool> {
        Ok(match self.slot_mut(name)? {
            Slot::Int(v) => v.is_some(),
            Slot::Object(v) => v.is_some(),
            Slot::SequenceInt(slots) => indexed(slots, name, index)?.is_some(),
            Slot::SequenceObject(slots) => indexed(slots, name, index)?.is_some(),
        })
    }

    pub(crate) fn unset(&mut self, name: &str, index: Option<usize>) -> SchedulerResult<()> {
        match self.slot_mut(name)? {
            Slot::Int(v) => *v = None,
            Slot::Object(v) => *v = None,
            Slot::SequenceInt(slots) => *indexed(slots, name, index)? = None,
            Slot::SequenceObject(slots) => *indexed(slots, name, index)? = None,
        }
        Ok(())
    }

    /// Whether any slot of any variable is set.
    pub fn any_set(&self) -> bool {
        self.slots.iter().any(|slot| match slot {
            Slot::Int(v) => v.is_some(),
            Slot::Object(v) => v.is_some(),
            Slot::SequenceInt(slots) => slots.iter().any(Option::is_some),
            Slot::SequenceObject(slots) => slots.iter().any(Option::is_some),
        })
    }

    /// Unset every slot, keeping the storage.
    pub(crate) fn reset(&mut self) {
        for slot in &mut self.slots {
            slot.unset();
        }
    }
}
