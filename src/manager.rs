//! Object manager: identity, caching and the load/save lifecycle.
//!
//! The cache maps each [`Identity`] to either a finished instance or an
//! in-flight load. The first caller for an uncached identity performs the
//! load; everyone arriving meanwhile waits on the same slot and receives
//! the same result, success or failure. Instances stay cached until
//! released, cleared, or the manager is dropped.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};
use serde_json::{Map, Value};

use crate::document::DocumentCodec;
use crate::error::{LoadError, SaveError, StorageError, ValidationError};
use crate::instance::{Identity, ObjectInstance};
use crate::storage::Storage;
use crate::types::{DescriptorSet, TypeDescriptor};
use crate::validator::{self, canonical};

/// Options for an [`ObjectManager`].
#[derive(Debug, Clone, Default)]
pub struct ManagerOptions {
    /// Leave fields equal to their compiled default out of saved documents.
    /// They are filled back in on load.
    pub omit_defaults: bool,
}

impl ManagerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn omit_defaults(mut self, omit: bool) -> Self {
        self.omit_defaults = omit;
        self
    }
}

/// Result of [`ObjectManager::load_all`]: a failed key does not stop the
/// batch.
#[derive(Debug, Default)]
pub struct BatchLoad {
    pub loaded: Vec<Arc<ObjectInstance>>,
    pub failed: Vec<LoadError>,
}

#[derive(Clone)]
enum Slot {
    Loading(Arc<InFlight>),
    Ready(Arc<ObjectInstance>),
}

type LoadResult = Result<Arc<ObjectInstance>, LoadError>;

/// A load in progress; waiters block until the leader publishes.
struct InFlight {
    result: Mutex<Option<LoadResult>>,
    done: Condvar,
}

impl InFlight {
    fn new() -> Self {
        Self {
            result: Mutex::new(None),
            done: Condvar::new(),
        }
    }

    fn wait(&self) -> LoadResult {
        let mut result = self.result.lock();
        loop {
            if let Some(published) = result.as_ref() {
                return published.clone();
            }
            self.done.wait(&mut result);
        }
    }

    fn publish(&self, outcome: LoadResult) {
        *self.result.lock() = Some(outcome);
        self.done.notify_all();
    }
}

/// Publishes the leader's outcome and settles the cache slot.
///
/// If the leader unwinds before finishing, dropping the guard frees the
/// slot and wakes every waiter with [`LoadError::Aborted`], so later
/// callers start a fresh load instead of waiting forever.
struct LoadGuard<'m> {
    cache: &'m Mutex<HashMap<Identity, Slot>>,
    identity: &'m Identity,
    flight: Arc<InFlight>,
    finished: bool,
}

impl LoadGuard<'_> {
    fn finish(mut self, outcome: LoadResult) -> LoadResult {
        self.settle(outcome.clone());
        self.finished = true;
        outcome
    }

    fn settle(&self, outcome: LoadResult) {
        {
            let mut cache = self.cache.lock();
            let ours = matches!(
                cache.get(self.identity),
                Some(Slot::Loading(f)) if Arc::ptr_eq(f, &self.flight)
            );
            if ours {
                match &outcome {
                    Ok(instance) => {
                        cache.insert(self.identity.clone(), Slot::Ready(Arc::clone(instance)));
                    }
                    Err(_) => {
                        cache.remove(self.identity);
                    }
                }
            }
        }
        self.flight.publish(outcome);
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!(identity = %self.identity, "load abandoned; releasing waiters");
            self.settle(Err(LoadError::Aborted {
                identity: self.identity.to_string(),
            }));
        }
    }
}

/// Owns the identity-keyed instance cache and talks to storage.
pub struct ObjectManager {
    types: Arc<DescriptorSet>,
    storage: Arc<dyn Storage>,
    codec: Arc<dyn DocumentCodec>,
    options: ManagerOptions,
    cache: Mutex<HashMap<Identity, Slot>>,
}

impl ObjectManager {
    pub fn new(
        types: Arc<DescriptorSet>,
        storage: Arc<dyn Storage>,
        codec: Arc<dyn DocumentCodec>,
    ) -> Self {
        Self::with_options(types, storage, codec, ManagerOptions::default())
    }

    pub fn with_options(
        types: Arc<DescriptorSet>,
        storage: Arc<dyn Storage>,
        codec: Arc<dyn DocumentCodec>,
        options: ManagerOptions,
    ) -> Self {
        Self {
            types,
            storage,
            codec,
            options,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn types(&self) -> &Arc<DescriptorSet> {
        &self.types
    }

    /// Load the instance stored under `identity`, or return the cached one.
    ///
    /// Concurrent calls for the same uncached identity share one storage
    /// read, parse and validation; all of them receive the same instance
    /// or the same error.
    ///
    /// # Errors
    ///
    /// `LoadError::Storage`/`Parse` when the bytes cannot be read or
    /// parsed, `LoadError::Invalid` when the document fails validation,
    /// `LoadError::UnknownType` when the identity names no compiled type.
    pub fn load(&self, identity: &Identity) -> Result<Arc<ObjectInstance>, LoadError> {
        let flight = {
            let mut cache = self.cache.lock();
            match cache.get(identity).cloned() {
                Some(Slot::Ready(instance)) => {
                    tracing::debug!(%identity, "cache hit");
                    return Ok(instance);
                }
                Some(Slot::Loading(flight)) => {
                    drop(cache);
                    tracing::debug!(%identity, "joining in-flight load");
                    return flight.wait();
                }
                None => {
                    let flight = Arc::new(InFlight::new());
                    cache.insert(identity.clone(), Slot::Loading(Arc::clone(&flight)));
                    flight
                }
            }
        };

        let guard = LoadGuard {
            cache: &self.cache,
            identity,
            flight,
            finished: false,
        };
        let outcome = self.materialize(identity).map(Arc::new);
        guard.finish(outcome)
    }

    fn materialize(&self, identity: &Identity) -> Result<ObjectInstance, LoadError> {
        let descriptor = self
            .types
            .get(&identity.type_uri)
            .cloned()
            .ok_or_else(|| LoadError::UnknownType {
                identity: identity.to_string(),
                type_uri: identity.type_uri.clone(),
            })?;
        let bytes = self
            .storage
            .read_bytes(&identity.key)
            .map_err(|source| LoadError::Storage {
                identity: identity.to_string(),
                source: Arc::new(source),
            })?;
        let document = self
            .codec
            .parse_document(&bytes)
            .map_err(|source| LoadError::Parse {
                identity: identity.to_string(),
                source: Arc::new(source),
            })?;
        let instance = ObjectInstance::create(Arc::clone(&self.types), descriptor, Some(document))
            .map_err(|source| LoadError::Invalid {
                identity: identity.to_string(),
                source,
            })?;
        tracing::debug!(%identity, "loaded instance");
        Ok(instance.with_identity(identity.clone()))
    }

    /// Validate and write `instance` under its identity, then clear `dirty`.
    ///
    /// On failure nothing is marked clean and the instance is untouched.
    ///
    /// # Errors
    ///
    /// `SaveError::NoIdentity` for an instance never given an identity,
    /// `SaveError::Invalid` if its value fails validation, and
    /// `SaveError::Serialize`/`Storage` for encoding or write failures.
    pub fn save(&self, instance: &ObjectInstance) -> Result<(), SaveError> {
        let descriptor = instance.descriptor();
        instance.persist_with(|value, identity| {
            let identity = identity.ok_or_else(|| SaveError::NoIdentity {
                type_name: descriptor.name.clone(),
            })?;
            ValidationError::check(validator::validate(instance.types(), descriptor, value))
                .map_err(|source| SaveError::Invalid {
                    identity: identity.to_string(),
                    source,
                })?;

            let document = self.document_for(descriptor, value);
            let bytes = self
                .codec
                .serialize_document(&document)
                .map_err(|source| SaveError::Serialize {
                    identity: identity.to_string(),
                    source,
                })?;
            self.storage
                .write_bytes(&identity.key, &bytes)
                .map_err(|source| SaveError::Storage {
                    identity: identity.to_string(),
                    source,
                })?;
            tracing::debug!(%identity, "saved instance");
            Ok(())
        })
    }

    /// The persisted form: not-serialized fields dropped, defaults
    /// optionally omitted.
    fn document_for(&self, descriptor: &TypeDescriptor, value: &Value) -> Value {
        let Some(map) = value.as_object() else {
            return value.clone();
        };
        let kept: Map<String, Value> = map
            .iter()
            .filter(|(name, field_value)| match descriptor.field(name) {
                None => true,
                Some(field) if !field.serialized => false,
                Some(field) => !(self.options.omit_defaults
                    && field
                        .default
                        .as_ref()
                        .is_some_and(|d| canonical(d) == canonical(field_value))),
            })
            .map(|(name, field_value)| (name.clone(), field_value.clone()))
            .collect();
        Value::Object(kept)
    }

    /// Create a fresh instance from defaults under a new identity.
    ///
    /// The instance is cached and starts dirty, since nothing is stored yet.
    pub fn create_new(
        &self,
        descriptor: &Arc<TypeDescriptor>,
    ) -> Result<Arc<ObjectInstance>, ValidationError> {
        self.create_new_with(descriptor, None)
    }

    /// Like [`create_new`](Self::create_new), overlaying `initial` on the defaults.
    pub fn create_new_with(
        &self,
        descriptor: &Arc<TypeDescriptor>,
        initial: Option<Value>,
    ) -> Result<Arc<ObjectInstance>, ValidationError> {
        let key = format!(
            "{}/{}.{}",
            crate::codegen::snake_case(&descriptor.name),
            uuid::Uuid::new_v4(),
            self.codec.extension()
        );
        let identity = Identity::new(descriptor.uri.clone(), key);
        let instance =
            ObjectInstance::create(Arc::clone(&self.types), Arc::clone(descriptor), initial)?
                .with_identity(identity.clone());
        instance.mark_dirty();

        let instance = Arc::new(instance);
        self.cache
            .lock()
            .insert(identity.clone(), Slot::Ready(Arc::clone(&instance)));
        tracing::debug!(%identity, "created instance");
        Ok(instance)
    }

    /// Drop the loaded instance for `identity`. Returns whether one existed.
    ///
    /// Callers still holding the instance keep it; the next `load` reads
    /// it from storage again. A load still in flight is left alone and
    /// `false` is returned.
    pub fn release(&self, identity: &Identity) -> bool {
        let mut cache = self.cache.lock();
        match cache.get(identity) {
            Some(Slot::Ready(_)) => {
                cache.remove(identity);
                true
            }
            Some(Slot::Loading(_)) => {
                tracing::debug!(%identity, "release skipped; load in flight");
                false
            }
            None => false,
        }
    }

    /// Drop every loaded instance. Loads in flight keep their slots.
    pub fn clear(&self) {
        self.cache
            .lock()
            .retain(|_, slot| matches!(slot, Slot::Loading(_)));
    }

    /// The cached instance for `identity`, without touching storage.
    pub fn cached(&self, identity: &Identity) -> Option<Arc<ObjectInstance>> {
        match self.cache.lock().get(identity) {
            Some(Slot::Ready(instance)) => Some(Arc::clone(instance)),
            _ => None,
        }
    }

    /// Number of loaded instances in the cache.
    pub fn len(&self) -> usize {
        self.cache
            .lock()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Cached instances whose fields equal every entry of `criteria`,
    /// ordered by identity.
    pub fn query(&self, criteria: &Map<String, Value>) -> Vec<Arc<ObjectInstance>> {
        let mut ready: Vec<(Identity, Arc<ObjectInstance>)> = self
            .cache
            .lock()
            .iter()
            .filter_map(|(identity, slot)| match slot {
                Slot::Ready(instance) => Some((identity.clone(), Arc::clone(instance))),
                Slot::Loading(_) => None,
            })
            .collect();
        ready.sort_by(|a, b| a.0.cmp(&b.0));

        ready
            .into_iter()
            .map(|(_, instance)| instance)
            .filter(|instance| {
                let value = instance.value();
                criteria.iter().all(|(name, expected)| {
                    value
                        .get(name)
                        .is_some_and(|actual| canonical(actual) == canonical(expected))
                })
            })
            .collect()
    }

    /// First match of [`query`](Self::query).
    pub fn pick_first(&self, criteria: &Map<String, Value>) -> Option<Arc<ObjectInstance>> {
        self.query(criteria).into_iter().next()
    }

    /// Load every stored key under `prefix` as `type_uri`.
    ///
    /// Keys that fail to load are logged and collected in
    /// [`BatchLoad::failed`]; only a failure to list keys aborts.
    pub fn load_all(&self, type_uri: &str, prefix: &str) -> Result<BatchLoad, StorageError> {
        let mut batch = BatchLoad::default();
        for key in self.storage.list(prefix)? {
            let identity = Identity::new(type_uri, key);
            match self.load(&identity) {
                Ok(instance) => batch.loaded.push(instance),
                Err(e) => {
                    tracing::warn!(%identity, error = %e, "skipping object that failed to load");
                    batch.failed.push(e);
                }
            }
        }
        Ok(batch)
    }
}

impl std::fmt::Debug for ObjectManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectManager")
            .field("types", &self.types.len())
            .field("cached", &self.len())
            .field("options", &self.options)
            .finish()
    }
}

impl Drop for ObjectManager {
    fn drop(&mut self) {
        let entries = self.cache.get_mut().len();
        self.cache.get_mut().clear();
        tracing::debug!(entries, "object manager torn down");
    }
}
