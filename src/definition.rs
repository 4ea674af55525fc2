//! Bean definitions
//!
//! A [`BeanDefinition`] is the recipe for one singleton: how to produce it,
//! under which qualifier, whether it is primary, and which requested types it
//! can be seen through. The [`BeanDefinitionRegistry`] maps each requested type
//! to an insertion-ordered list of definitions and performs qualifier/primary
//! selection at lookup time.

use crate::factory::{BeanSource, Binding, FactoryFn};
use crate::key::{Dependency, TypeKey};
use crate::metadata::{BeanMethod, Introspect, TypeDescriptor};
use crate::storage::Instance;
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Callback run against a realized bean on `Context::reload`
type ReloadFn = Arc<dyn Fn(&Instance) -> Result<()> + Send + Sync>;

/// Unique identifier of a bean definition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DefinitionId(u64);

impl DefinitionId {
    /// Allocate a fresh id; ids grow in allocation order
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    #[inline]
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// =============================================================================
// BeanDefinition
// =============================================================================

/// Recipe for one singleton bean.
///
/// # Example
///
/// ```rust
/// use bean_context::BeanDefinition;
/// use std::sync::Arc;
///
/// trait Greeter: Send + Sync {}
/// struct English;
/// impl Greeter for English {}
///
/// let definition = BeanDefinition::instance(Arc::new(English))
///     .named("english")
///     .primary()
///     .implements(|e: Arc<English>| e as Arc<dyn Greeter>);
///
/// assert_eq!(definition.qualifier(), Some("english"));
/// assert!(definition.is_primary());
/// ```
#[derive(Clone)]
pub struct BeanDefinition {
    id: DefinitionId,
    produces: TypeKey,
    implementation: Option<TypeKey>,
    qualifier: Option<String>,
    primary: bool,
    source: BeanSource,
    bindings: Vec<Binding>,
    reload: Option<ReloadFn>,
}

impl BeanDefinition {
    fn with_source(produces: TypeKey, implementation: Option<TypeKey>, source: BeanSource) -> Self {
        Self {
            id: DefinitionId::next(),
            produces,
            implementation,
            qualifier: None,
            primary: false,
            source,
            bindings: Vec::new(),
            reload: None,
        }
    }

    /// A pre-built instance
    pub fn instance<T: ?Sized + Send + Sync + 'static>(instance: Arc<T>) -> Self {
        let key = TypeKey::of::<T>();
        Self::with_source(key, Some(key), BeanSource::Instance(Instance::of(instance)))
    }

    /// A type built from its own descriptor
    pub fn component<T: Introspect>() -> Self {
        Self::from_descriptor(T::describe())
    }

    /// A type built from `descriptor`; interfaces become proxy-only beans
    pub fn from_descriptor(descriptor: TypeDescriptor) -> Self {
        let key = descriptor.key();
        let qualifier = descriptor.qualifier().map(str::to_owned);
        let primary = descriptor.is_primary();
        let bindings = descriptor.bindings().to_vec();
        let descriptor = Arc::new(descriptor);
        let source = if descriptor.is_interface() {
            BeanSource::Proxy(descriptor)
        } else {
            BeanSource::Type(descriptor)
        };

        Self {
            qualifier,
            primary,
            bindings,
            ..Self::with_source(key, Some(key), source)
        }
    }

    /// A bean produced by a factory closure
    pub fn factory<T, F>(factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&mut crate::BeanResolver<'_>) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let key = TypeKey::of::<T>();
        Self::with_source(key, Some(key), BeanSource::factory(factory))
    }

    /// A bean produced by a bean method on the configuration class `declaring`.
    ///
    /// The configuration instance is resolved through the active resolver, so
    /// the method runs lazily and only once the definition is first resolved.
    pub fn from_bean_method(declaring: TypeKey, method_name: &'static str, method: &BeanMethod) -> Self {
        let produces = method.returns();
        let qualifier = method.qualifier().map(str::to_owned);
        let primary = method.is_primary();
        let method = method.clone();
        let configuration = Dependency::on_key(declaring);

        let factory: FactoryFn = Arc::new(move |resolver| {
            let instance = resolver.resolve(&configuration)?.ok_or_else(|| DiError::UnresolvableDependency {
                type_name: produces.name(),
                dependency: configuration.to_string(),
            })?;

            #[cfg(feature = "logging")]
            debug!(
                target: "bean_context",
                configuration = declaring.name(),
                method = method_name,
                "Running bean method"
            );
            #[cfg(not(feature = "logging"))]
            let _ = method_name;

            method.invoke(&instance, resolver)
        });

        Self {
            qualifier,
            primary,
            ..Self::with_source(produces, Some(produces), BeanSource::Factory(factory))
        }
    }

    /// Set the qualifier
    pub fn named(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Mark as the default for unqualified lookups
    pub fn primary(mut self) -> Self {
        self.primary = true;
        self
    }

    /// Set the primary flag explicitly
    pub fn with_primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }

    /// Declare that the bean can also be seen as `R`
    pub fn implements<R, T, F>(mut self, coerce: F) -> Self
    where
        R: ?Sized + Send + Sync + 'static,
        T: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<R> + Send + Sync + 'static,
    {
        let binding = Binding::new::<R, T, F>(coerce);
        self.bindings.retain(|b| b.requested() != binding.requested());
        self.bindings.push(binding);
        self
    }

    /// Callback invoked with the realized bean on every context reload
    pub fn on_reload<T, F>(mut self, callback: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&T) -> Result<()> + Send + Sync + 'static,
    {
        self.reload = Some(Arc::new(move |instance| {
            let bean = instance.downcast::<T>().ok_or(DiError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: instance.key().name(),
            })?;
            callback(&*bean)
        }));
        self
    }

    /// Definition identity
    #[inline]
    pub fn id(&self) -> DefinitionId {
        self.id
    }

    /// Type of the raw instance this definition produces
    #[inline]
    pub fn produces(&self) -> TypeKey {
        self.produces
    }

    /// Implementation type, used for duplicate detection
    #[inline]
    pub fn implementation(&self) -> Option<TypeKey> {
        self.implementation
    }

    /// Qualifier, if any
    #[inline]
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// Whether this is the primary definition for its requested types
    #[inline]
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// How the instance is produced
    #[inline]
    pub fn source(&self) -> &BeanSource {
        &self.source
    }

    /// Requested types (other than the produced type) this definition satisfies
    #[inline]
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Every requested type this definition can be registered under
    pub fn requested_types(&self) -> Vec<TypeKey> {
        std::iter::once(self.produces)
            .chain(self.bindings.iter().map(Binding::requested))
            .collect()
    }

    /// Binding that views this definition's instance as `requested`
    pub fn binding_for(&self, requested: &TypeKey) -> Option<Binding> {
        if *requested == self.produces {
            return Some(Binding::identity_of(self.produces));
        }
        self.bindings.iter().find(|b| b.requested() == *requested).cloned()
    }

    /// Whether a reload callback is set
    #[inline]
    pub fn has_reload(&self) -> bool {
        self.reload.is_some()
    }

    /// Run the reload callback, if any, against the realized bean
    pub fn reload(&self, instance: &Instance) -> Result<()> {
        match &self.reload {
            Some(callback) => callback(instance),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for BeanDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanDefinition")
            .field("id", &self.id)
            .field("produces", &self.produces)
            .field("qualifier", &self.qualifier)
            .field("primary", &self.primary)
            .field("source", &self.source)
            .field("bindings", &self.bindings)
            .finish()
    }
}

// =============================================================================
// BeanDefinitionRegistry
// =============================================================================

/// A definition as registered under one requested type.
#[derive(Clone, Debug)]
pub struct DefinitionEntry {
    requested: TypeKey,
    definition: Arc<BeanDefinition>,
    binding: Binding,
}

impl DefinitionEntry {
    /// Requested type this entry was registered under
    #[inline]
    pub fn requested(&self) -> TypeKey {
        self.requested
    }

    /// The shared definition
    #[inline]
    pub fn definition(&self) -> &Arc<BeanDefinition> {
        &self.definition
    }

    /// How the raw instance is viewed as the requested type
    #[inline]
    pub fn binding(&self) -> &Binding {
        &self.binding
    }
}

/// Catalog of bean definitions by requested type.
///
/// Per-type lists keep insertion order and are never reordered; qualifier and
/// primary selection happens in [`lookup`](Self::lookup).
pub struct BeanDefinitionRegistry {
    definitions: DashMap<TypeId, Vec<DefinitionEntry>, RandomState>,
}

impl BeanDefinitionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            definitions: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
        }
    }

    /// Register `definition` under `requested`.
    ///
    /// Fails with `DuplicateDefinition` if a definition with the same
    /// implementation and qualifier is already registered under `requested`,
    /// and with `TypeMismatch` if the definition cannot be seen as `requested`.
    pub fn register(&self, requested: TypeKey, definition: Arc<BeanDefinition>) -> Result<()> {
        let binding = definition.binding_for(&requested).ok_or(DiError::TypeMismatch {
            expected: requested.name(),
            actual: definition.produces().name(),
        })?;

        let mut entries = self.definitions.entry(requested.id()).or_default();
        if let Some(err) = duplicate_of(&entries, &requested, &definition) {
            return Err(err);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            requested = requested.name(),
            definition = %definition.id,
            qualifier = ?definition.qualifier,
            primary = definition.primary,
            "Registered bean definition"
        );

        entries.push(DefinitionEntry {
            requested,
            definition,
            binding,
        });
        Ok(())
    }

    /// Register under the produced type and every bound requested type.
    ///
    /// Every requested type is checked before any entry is added, so a
    /// rejected definition leaves the registry untouched.
    pub fn register_all(&self, definition: Arc<BeanDefinition>) -> Result<()> {
        let mut requested_types: Vec<TypeKey> = Vec::new();
        for requested in definition.requested_types() {
            if !requested_types.contains(&requested) {
                requested_types.push(requested);
            }
        }

        for requested in &requested_types {
            if definition.binding_for(requested).is_none() {
                return Err(DiError::TypeMismatch {
                    expected: requested.name(),
                    actual: definition.produces().name(),
                });
            }
            if let Some(entries) = self.definitions.get(&requested.id()) {
                if let Some(err) = duplicate_of(&entries, requested, &definition) {
                    return Err(err);
                }
            }
        }

        for requested in requested_types {
            self.register(requested, Arc::clone(&definition))?;
        }
        Ok(())
    }

    /// Definitions registered for `requested`, in registration order
    pub fn get_definitions(&self, requested: &TypeKey) -> Vec<Arc<BeanDefinition>> {
        self.definitions
            .get(&requested.id())
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.definition)).collect())
            .unwrap_or_default()
    }

    /// Entries registered for `requested`, in registration order
    pub fn entries(&self, requested: &TypeKey) -> Vec<DefinitionEntry> {
        self.definitions
            .get(&requested.id())
            .map(|entries| entries.value().clone())
            .unwrap_or_default()
    }

    /// Select the definition for a lookup.
    ///
    /// - With a qualifier: the entry with exactly that qualifier.
    /// - Without: the only entry, else the single primary entry.
    /// - Several candidates and no single primary: `Ambiguous`.
    /// - Nothing registered (or no qualifier match): `Ok(None)`.
    pub fn lookup(&self, requested: &TypeKey, qualifier: Option<&str>) -> Result<Option<DefinitionEntry>> {
        let Some(entries) = self.definitions.get(&requested.id()) else {
            return Ok(None);
        };

        if let Some(wanted) = qualifier {
            return Ok(entries.iter().find(|e| e.definition.qualifier() == Some(wanted)).cloned());
        }

        match entries.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only.clone())),
            many => {
                let mut primaries = many.iter().filter(|e| e.definition.primary);
                match (primaries.next(), primaries.next()) {
                    (Some(primary), None) => {
                        #[cfg(feature = "logging")]
                        trace!(
                            target: "bean_context",
                            requested = requested.name(),
                            definition = %primary.definition.id,
                            "Selected primary definition"
                        );
                        Ok(Some(primary.clone()))
                    }
                    _ => Err(DiError::Ambiguous {
                        type_name: requested.name(),
                        candidates: many.iter().map(describe_candidate).collect(),
                    }),
                }
            }
        }
    }

    /// Whether anything is registered for `requested`
    #[inline]
    pub fn contains(&self, requested: &TypeKey) -> bool {
        self.definitions.get(&requested.id()).is_some_and(|e| !e.is_empty())
    }

    /// Every distinct definition, ordered by id (registration order)
    pub fn all(&self) -> Vec<Arc<BeanDefinition>> {
        let mut all: Vec<Arc<BeanDefinition>> = self
            .definitions
            .iter()
            .flat_map(|entries| entries.value().iter().map(|e| Arc::clone(&e.definition)).collect::<Vec<_>>())
            .collect();
        all.sort_by_key(|d| d.id);
        all.dedup_by_key(|d| d.id);
        all
    }

    /// Number of distinct definitions
    pub fn len(&self) -> usize {
        self.all().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.definitions.iter().all(|e| e.value().is_empty())
    }

    /// Drop every definition
    pub fn clear(&self) {
        self.definitions.clear();
    }
}

fn duplicate_of(entries: &[DefinitionEntry], requested: &TypeKey, definition: &BeanDefinition) -> Option<DiError> {
    entries
        .iter()
        .any(|e| e.definition.implementation == definition.implementation && e.definition.qualifier == definition.qualifier)
        .then(|| DiError::DuplicateDefinition {
            requested: requested.name(),
            implementation: definition.implementation.unwrap_or(definition.produces).name(),
            qualifier: definition.qualifier.clone(),
        })
}

fn describe_candidate(entry: &DefinitionEntry) -> String {
    let implementation = entry
        .definition
        .implementation
        .unwrap_or(entry.definition.produces)
        .short_name();
    match &entry.definition.qualifier {
        Some(q) => format!("{implementation} \"{q}\""),
        None => implementation.to_owned(),
    }
}

impl Default for BeanDefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BeanDefinitionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanDefinitionRegistry")
            .field("requested_types", &self.definitions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    trait Service: Send + Sync {
        fn name(&self) -> &str;
    }

    struct Impl(&'static str);

    impl Service for Impl {
        fn name(&self) -> &str {
            self.0
        }
    }

    trait Auditable: Send + Sync {}
    impl Auditable for Impl {}

    fn service(name: &'static str) -> BeanDefinition {
        BeanDefinition::instance(Arc::new(Impl(name))).implements(|i: Arc<Impl>| i as Arc<dyn Service>)
    }

    #[test]
    fn test_ids_are_unique_and_ordered() {
        let a = DefinitionId::next();
        let b = DefinitionId::next();
        assert!(a < b);
    }

    #[test]
    fn test_single_definition_lookup() {
        let registry = BeanDefinitionRegistry::new();
        let key = TypeKey::of::<dyn Service>();
        registry.register(key, Arc::new(service("only"))).unwrap();

        let entry = registry.lookup(&key, None).unwrap().unwrap();
        assert_eq!(entry.requested(), key);
        assert!(!entry.binding().is_identity());
    }

    #[test]
    fn test_missing_lookup_is_none() {
        let registry = BeanDefinitionRegistry::new();
        assert!(registry.lookup(&TypeKey::of::<dyn Service>(), None).unwrap().is_none());
        assert!(registry.get_definitions(&TypeKey::of::<dyn Service>()).is_empty());
    }

    #[test]
    fn test_qualifier_and_primary_resolution() {
        let registry = BeanDefinitionRegistry::new();
        let key = TypeKey::of::<dyn Service>();
        registry.register(key, Arc::new(service("x").named("x"))).unwrap();
        registry.register(key, Arc::new(service("y").named("y"))).unwrap();

        let err = registry.lookup(&key, None).unwrap_err();
        assert!(matches!(err, DiError::Ambiguous { .. }));
        assert!(err.to_string().contains("\"x\""));

        let y = registry.lookup(&key, Some("y")).unwrap().unwrap();
        assert_eq!(y.definition().qualifier(), Some("y"));
        assert!(registry.lookup(&key, Some("z")).unwrap().is_none());

        registry.register(key, Arc::new(service("z").named("z").primary())).unwrap();
        let z = registry.lookup(&key, None).unwrap().unwrap();
        assert_eq!(z.definition().qualifier(), Some("z"));
    }

    #[test]
    fn test_two_primaries_are_ambiguous() {
        let registry = BeanDefinitionRegistry::new();
        let key = TypeKey::of::<dyn Service>();
        registry.register(key, Arc::new(service("a").named("a").primary())).unwrap();
        registry.register(key, Arc::new(service("b").named("b").primary())).unwrap();
        assert!(registry.lookup(&key, None).is_err());
    }

    #[test]
    fn test_duplicate_rejected_per_requested_type() {
        let registry = BeanDefinitionRegistry::new();
        let definition = Arc::new(
            service("shared")
                .named("main")
                .implements(|i: Arc<Impl>| i as Arc<dyn Auditable>),
        );

        registry.register(TypeKey::of::<dyn Service>(), Arc::clone(&definition)).unwrap();
        registry.register(TypeKey::of::<dyn Auditable>(), Arc::clone(&definition)).unwrap();

        let err = registry
            .register(TypeKey::of::<dyn Service>(), Arc::new(service("again").named("main")))
            .unwrap_err();
        assert!(matches!(err, DiError::DuplicateDefinition { .. }));
        assert!(err.is_configuration_error());

        // Same definition under two requested types is still one definition
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_rejected_register_all_leaves_no_entries() {
        let registry = BeanDefinitionRegistry::new();
        registry
            .register(TypeKey::of::<dyn Service>(), Arc::new(service("first")))
            .unwrap();

        let err = registry.register_all(Arc::new(service("second"))).unwrap_err();
        assert!(matches!(err, DiError::DuplicateDefinition { .. }));
        assert!(registry.get_definitions(&TypeKey::of::<Impl>()).is_empty());
        assert_eq!(registry.get_definitions(&TypeKey::of::<dyn Service>()).len(), 1);
    }

    #[test]
    fn test_register_rejects_unbound_type() {
        let registry = BeanDefinitionRegistry::new();
        let definition = Arc::new(BeanDefinition::instance(Arc::new(Impl("plain"))));
        let err = registry.register(TypeKey::of::<dyn Service>(), definition).unwrap_err();
        assert!(matches!(err, DiError::TypeMismatch { .. }));
    }

    #[test]
    fn test_insertion_order_preserved() {
        let registry = BeanDefinitionRegistry::new();
        let key = TypeKey::of::<dyn Service>();
        for name in ["c", "a", "b"] {
            registry.register(key, Arc::new(service(name).named(name))).unwrap();
        }
        let order: Vec<_> = registry
            .get_definitions(&key)
            .iter()
            .map(|d| d.qualifier().unwrap().to_owned())
            .collect();
        assert_eq!(order, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_register_all_covers_bindings() {
        let registry = BeanDefinitionRegistry::new();
        registry.register_all(Arc::new(service("all"))).unwrap();

        assert!(registry.contains(&TypeKey::of::<Impl>()));
        assert!(registry.contains(&TypeKey::of::<dyn Service>()));
        assert_eq!(registry.all().len(), 1);

        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_reload_callback() {
        use std::sync::atomic::AtomicUsize;
        static RELOADS: AtomicUsize = AtomicUsize::new(0);

        let definition = BeanDefinition::instance(Arc::new(Impl("r"))).on_reload(|_bean: &Impl| {
            RELOADS.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let BeanSource::Instance(instance) = definition.source() else {
            panic!("expected instance source");
        };

        assert!(definition.has_reload());
        definition.reload(instance).unwrap();
        assert_eq!(RELOADS.load(Ordering::SeqCst), 1);
    }
}
