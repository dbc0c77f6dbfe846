//! Object runtime: schema-aware mutable instances.
//!
//! An instance holds a value map keyed by the descriptor's field names.
//! Writes build a candidate next state, validate the whole object, and
//! commit only when it is valid, all under the instance's write lock.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AccessError, ConstraintKind, ValidationError, Violation};
use crate::types::{json_type_name, DescriptorSet, TypeDescriptor};
use crate::validator;

/// Persisted identity of an instance: its type plus a storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Identity {
    pub type_uri: String,
    pub key: String,
}

impl Identity {
    pub fn new(type_uri: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            type_uri: type_uri.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

#[derive(Debug)]
struct State {
    value: Value,
    dirty: bool,
    identity: Option<Identity>,
}

/// A value bound to its compiled descriptor.
#[derive(Debug)]
pub struct ObjectInstance {
    types: Arc<DescriptorSet>,
    descriptor: Arc<TypeDescriptor>,
    state: RwLock<State>,
}

impl ObjectInstance {
    /// Build an instance from the descriptor's defaults overlaid with
    /// `initial`.
    ///
    /// Defaults are deep-copied, so no two instances share mutable state.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` when `initial` is not an object or the
    /// combined value violates the descriptor (e.g. a required field has
    /// no default and was not supplied).
    pub fn create(
        types: Arc<DescriptorSet>,
        descriptor: Arc<TypeDescriptor>,
        initial: Option<Value>,
    ) -> Result<Self, ValidationError> {
        let mut values = descriptor.defaults();
        match initial {
            None => {}
            Some(Value::Object(supplied)) => values.extend(supplied),
            Some(other) => {
                return Err(ValidationError {
                    violations: vec![Violation::new(
                        &[],
                        ConstraintKind::Type,
                        format!(
                            "expected object {}, got {}",
                            descriptor.name,
                            json_type_name(&other)
                        ),
                    )],
                })
            }
        }

        let value = Value::Object(values);
        ValidationError::check(validator::validate(&types, &descriptor, &value))?;
        Ok(Self {
            types,
            descriptor,
            state: RwLock::new(State {
                value,
                dirty: false,
                identity: None,
            }),
        })
    }

    /// Attach a persisted identity.
    pub fn with_identity(self, identity: Identity) -> Self {
        self.state.write().identity = Some(identity);
        self
    }

    pub fn descriptor(&self) -> &Arc<TypeDescriptor> {
        &self.descriptor
    }

    pub fn types(&self) -> &Arc<DescriptorSet> {
        &self.types
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.read().identity.clone()
    }

    /// True when the value changed since it was created, loaded or saved.
    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Snapshot of the current value.
    pub fn value(&self) -> Value {
        self.state.read().value.clone()
    }

    /// Current value of `field`, or `None` when it is unset.
    ///
    /// # Errors
    ///
    /// `AccessError::UnknownField` when `field` is neither declared nor a
    /// key currently held on the instance.
    pub fn get(&self, field: &str) -> Result<Option<Value>, AccessError> {
        let state = self.state.read();
        match state.value.get(field) {
            Some(value) => Ok(Some(value.clone())),
            None if self.descriptor.has_field(field) => Ok(None),
            None => Err(AccessError::UnknownField {
                type_name: self.descriptor.name.clone(),
                field: field.to_string(),
            }),
        }
    }

    /// Replace `field`, committing only if the whole object stays valid.
    ///
    /// On failure the instance is unchanged.
    pub fn set(&self, field: &str, value: Value) -> Result<(), AccessError> {
        self.check_writable(field)?;
        self.commit(|map| {
            map.insert(field.to_string(), value);
        })
    }

    /// Unset `field`, returning its previous value. Same rules as [`set`](Self::set).
    pub fn remove(&self, field: &str) -> Result<Option<Value>, AccessError> {
        self.check_writable(field)?;
        let mut previous = None;
        self.commit(|map| previous = map.shift_remove(field))?;
        Ok(previous)
    }

    /// Violations of the current value; empty for every committed state.
    pub fn validate(&self) -> Vec<Violation> {
        let state = self.state.read();
        validator::validate(&self.types, &self.descriptor, &state.value)
    }

    /// Run `persist` on the current value while holding the write lock,
    /// and clear `dirty` if it succeeds.
    ///
    /// Holding the lock keeps a concurrent `set` from slipping in between
    /// persisting and clearing the flag.
    pub(crate) fn persist_with<E>(
        &self,
        persist: impl FnOnce(&Value, Option<&Identity>) -> Result<(), E>,
    ) -> Result<(), E> {
        let mut state = self.state.write();
        persist(&state.value, state.identity.as_ref())?;
        state.dirty = false;
        Ok(())
    }

    pub(crate) fn mark_dirty(&self) {
        self.state.write().dirty = true;
    }

    fn check_known(&self, field: &str) -> Result<(), AccessError> {
        if self.descriptor.has_field(field) || self.descriptor.allows_extra() {
            Ok(())
        } else {
            Err(AccessError::UnknownField {
                type_name: self.descriptor.name.clone(),
                field: field.to_string(),
            })
        }
    }

    fn check_writable(&self, field: &str) -> Result<(), AccessError> {
        self.check_known(field)?;
        match self.descriptor.field(field) {
            Some(f) if f.read_only => Err(AccessError::ReadOnlyField {
                type_name: self.descriptor.name.clone(),
                field: field.to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn commit(&self, change: impl FnOnce(&mut Map<String, Value>)) -> Result<(), AccessError> {
        let mut state = self.state.write();
        let mut next = state.value.clone();
        if let Value::Object(map) = &mut next {
            change(map);
        }
        ValidationError::check(validator::validate(&self.types, &self.descriptor, &next))?;
        state.value = next;
        state.dirty = true;
        Ok(())
    }
}
