//! Instance storage
//!
//! Uses DashMap for lock-free concurrent reads once initialization is done.
//! Every realized bean is held as a type-erased [`Instance`].

use crate::definition::DefinitionId;
use crate::key::TypeKey;
use ahash::RandomState;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::hash::Hash;
use std::sync::Arc;

/// A type-erased bean.
///
/// The payload is always an `Arc<T>` (boxed once more behind `dyn Any`), which is
/// what lets unsized types such as `dyn Trait` round-trip through storage.
#[derive(Clone)]
pub struct Instance {
    value: Arc<dyn Any + Send + Sync>,
    key: TypeKey,
}

impl Instance {
    /// Erase an `Arc<T>`
    #[inline]
    pub fn of<T: ?Sized + Send + Sync + 'static>(instance: Arc<T>) -> Self {
        Self {
            value: Arc::new(instance) as Arc<dyn Any + Send + Sync>,
            key: TypeKey::of::<T>(),
        }
    }

    /// Type of the payload
    #[inline]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Recover the `Arc<T>`, or `None` if the payload is another type
    #[inline]
    pub fn downcast<T: ?Sized + 'static>(&self) -> Option<Arc<T>> {
        self.value.downcast_ref::<Arc<T>>().cloned()
    }

    /// Whether both handles erase the same stored value
    #[inline]
    pub fn ptr_eq(&self, other: &Instance) -> bool {
        Arc::ptr_eq(&self.value, &other.value)
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance").field("type", &self.key).finish()
    }
}

/// Thread-safe keyed storage for realized instances.
///
/// Uses `DashMap` with `ahash` for concurrent reads after initialization.
pub struct InstanceStorage<K: Eq + Hash> {
    instances: DashMap<K, Instance, RandomState>,
}

impl<K: Eq + Hash> InstanceStorage<K> {
    /// Create new empty storage.
    ///
    /// Uses 8 shards: registries in a plugin host rarely hold more than a few
    /// hundred beans.
    #[inline]
    pub fn new() -> Self {
        Self {
            instances: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
        }
    }

    /// Look up an instance
    #[inline]
    pub fn get(&self, key: &K) -> Option<Instance> {
        self.instances.get(key).map(|r| r.value().clone())
    }

    /// Insert unless present; returns whichever instance ends up stored.
    ///
    /// The entry lock is held only for the insert itself, never while building.
    #[inline]
    pub fn get_or_insert(&self, key: K, instance: Instance) -> Instance {
        self.instances.entry(key).or_insert(instance).value().clone()
    }

    /// Check if an instance exists
    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.instances.contains_key(key)
    }

    /// Remove an instance
    #[inline]
    pub fn remove(&self, key: &K) -> bool {
        self.instances.remove(key).is_some()
    }

    /// Keep only the entries for which `keep` returns true
    pub fn retain(&self, mut keep: impl FnMut(&K, &Instance) -> bool) {
        self.instances.retain(|key, instance| keep(key, instance));
    }

    /// Number of stored instances
    #[inline]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Drop every instance
    #[inline]
    pub fn clear(&self) {
        self.instances.clear();
    }
}

impl<K: Eq + Hash> Default for InstanceStorage<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash> std::fmt::Debug for InstanceStorage<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceStorage").field("count", &self.len()).finish()
    }
}

/// Realized beans keyed by bean-definition identity.
///
/// The raw instance is cached once per definition, no matter how many requested
/// types the definition is registered under. The per-requested-type view (the
/// coerced `Arc<dyn Trait>`, possibly proxied) is cached next to it so repeated
/// lookups return the same handle.
#[derive(Debug, Default)]
pub struct BeanInstanceRegistry {
    instances: InstanceStorage<DefinitionId>,
    views: InstanceStorage<(DefinitionId, TypeId)>,
}

impl BeanInstanceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw instance for a definition
    #[inline]
    pub fn get(&self, id: DefinitionId) -> Option<Instance> {
        self.instances.get(&id)
    }

    /// Cache the raw instance; the first stored instance wins
    #[inline]
    pub fn insert(&self, id: DefinitionId, instance: Instance) -> Instance {
        self.instances.get_or_insert(id, instance)
    }

    /// Whether a definition has been instantiated
    #[inline]
    pub fn contains(&self, id: DefinitionId) -> bool {
        self.instances.contains(&id)
    }

    /// Cached view of a definition as `requested`
    #[inline]
    pub fn view(&self, id: DefinitionId, requested: &TypeKey) -> Option<Instance> {
        self.views.get(&(id, requested.id()))
    }

    /// Cache a view; the first stored view wins
    #[inline]
    pub fn insert_view(&self, id: DefinitionId, requested: &TypeKey, view: Instance) -> Instance {
        self.views.get_or_insert((id, requested.id()), view)
    }

    /// Drop a definition's raw instance and every view of it
    pub fn remove(&self, id: DefinitionId) -> bool {
        self.views.retain(|&(view, _), _| view != id);
        self.instances.remove(&id)
    }

    /// Drop whichever definition holds `instance` as its raw instance
    pub fn evict(&self, instance: &Instance) -> Option<DefinitionId> {
        let mut evicted = None;
        self.instances.retain(|id, stored| {
            let matches = stored.ptr_eq(instance);
            if matches {
                evicted = Some(*id);
            }
            !matches
        });
        let id = evicted?;
        self.views.retain(|&(view, _), _| view != id);
        Some(id)
    }

    /// Number of instantiated definitions
    #[inline]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    /// Check if nothing has been instantiated
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }

    /// Drop every instance and view
    pub fn clear(&self) {
        self.views.clear();
        self.instances.clear();
    }
}
