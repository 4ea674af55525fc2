//! Type-keyed dependency container
//!
//! The `Container` maps requested types to an implementation (a pre-built
//! instance or a described type) and realizes singletons on demand, resolving
//! constructor parameters recursively with one [`ResolutionPath`] per top-level
//! call. Qualifier-aware lookups live one layer up, in [`Context`](crate::Context).

use crate::factory::Binding;
use crate::key::{Dependency, TypeKey};
use crate::metadata::{self, Introspect, TypeDescriptor};
use crate::path::ResolutionPath;
use crate::proxy::{HandlerRegistry, ProxyGenerator};
use crate::resolver::{BeanResolver, DependencySource};
use crate::storage::{Instance, InstanceStorage};
use crate::{DiError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::TypeId;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// What a requested type is bound to.
#[derive(Clone)]
enum ContainerBinding {
    Instance(Instance),
    Type {
        descriptor: Arc<TypeDescriptor>,
        binding: Binding,
    },
}

/// Dependency injection container.
///
/// Cheap to clone; clones share registrations and singletons.
///
/// # Examples
///
/// ```rust
/// use bean_context::{Container, Introspect, TypeDescriptor};
/// use std::sync::Arc;
///
/// struct Logger;
/// struct Repository { logger: Arc<Logger> }
///
/// impl Introspect for Repository {
///     fn describe() -> TypeDescriptor {
///         TypeDescriptor::builder::<Repository>()
///             .constructor(|logger: Arc<Logger>| Repository { logger })
///             .build()
///     }
/// }
///
/// let container = Container::new();
/// container.register_instance(Arc::new(Logger));
/// container.register::<Repository>().unwrap();
///
/// let repo = container.resolve::<Repository>().unwrap().unwrap();
/// let logger = container.resolve::<Logger>().unwrap().unwrap();
/// assert!(Arc::ptr_eq(&repo.logger, &logger));
/// ```
#[derive(Clone)]
pub struct Container {
    /// Requested type -> implementation
    bindings: Arc<DashMap<TypeId, ContainerBinding, RandomState>>,
    /// Raw singletons, keyed by implementation type
    singletons: Arc<InstanceStorage<TypeId>>,
    /// Singletons as seen through each requested type
    views: Arc<InstanceStorage<TypeId>>,
    /// Interface proxies
    proxies: Arc<ProxyGenerator>,
}

impl Container {
    /// Create an empty container with its own handler registry
    pub fn new() -> Self {
        Self::with_handlers(Arc::new(HandlerRegistry::new()))
    }

    /// Create an empty container whose proxies dispatch to `handlers`
    pub fn with_handlers(handlers: Arc<HandlerRegistry>) -> Self {
        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            handlers = handlers.len(),
            "Creating new container"
        );

        Self {
            bindings: Arc::new(DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8)),
            singletons: Arc::new(InstanceStorage::new()),
            views: Arc::new(InstanceStorage::new()),
            proxies: Arc::new(ProxyGenerator::new(handlers)),
        }
    }

    // =========================================================================
    // Registration Methods
    // =========================================================================

    /// Register a pre-built singleton under `T`
    pub fn register_instance<T: ?Sized + Send + Sync + 'static>(&self, instance: Arc<T>) {
        let key = TypeKey::of::<T>();

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            service = key.name(),
            kind = "instance",
            "Registering singleton instance"
        );

        let instance = Instance::of(instance);
        self.singletons.remove(&key.id());
        self.singletons.get_or_insert(key.id(), instance.clone());
        self.bindings.insert(key.id(), ContainerBinding::Instance(instance));
        self.views.remove(&key.id());
    }

    /// Bind `requested` to the type described by `descriptor`
    pub fn register_type(&self, requested: TypeKey, descriptor: Arc<TypeDescriptor>) -> Result<()> {
        descriptor.validate()?;

        let binding = if requested == descriptor.key() {
            Binding::identity_of(requested)
        } else {
            descriptor
                .bindings()
                .iter()
                .find(|b| b.requested() == requested)
                .cloned()
                .ok_or(DiError::TypeMismatch {
                    expected: requested.name(),
                    actual: descriptor.key().name(),
                })?
        };

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            requested = requested.name(),
            implementation = descriptor.key().name(),
            "Registering type binding"
        );

        self.bindings
            .insert(requested.id(), ContainerBinding::Type { descriptor, binding });
        self.views.remove(&requested.id());
        Ok(())
    }

    /// Register `T` under itself and every interface it declares
    pub fn register<T: Introspect>(&self) -> Result<()> {
        let descriptor = Arc::new(T::describe());
        self.register_type(descriptor.key(), Arc::clone(&descriptor))?;
        for binding in descriptor.bindings() {
            self.register_type(binding.requested(), Arc::clone(&descriptor))?;
        }
        Ok(())
    }

    /// Register an interface.
    ///
    /// Concrete types later requested through it may be proxied; if nothing
    /// else is bound to it, resolving it yields a target-less proxy.
    pub fn register_interface<T: ?Sized + Introspect>(&self) -> Result<()> {
        let descriptor = Arc::new(T::describe());
        descriptor.validate()?;
        if !descriptor.is_interface() {
            return Err(DiError::malformed(descriptor.key().name(), "not an interface"));
        }

        self.proxies.register_interface(Arc::clone(&descriptor));
        let key = descriptor.key();
        self.bindings.entry(key.id()).or_insert_with(|| ContainerBinding::Type {
            binding: Binding::identity_of(key),
            descriptor,
        });
        Ok(())
    }

    // =========================================================================
    // Resolution Methods
    // =========================================================================

    /// Resolve `T`; `Ok(None)` if nothing is registered for it
    pub fn resolve<T: ?Sized + 'static>(&self) -> Result<Option<Arc<T>>> {
        let key = TypeKey::of::<T>();
        let mut path = ResolutionPath::new();
        match self.resolve_key(&key, &mut path)? {
            Some(instance) => instance.downcast::<T>().map(Some).ok_or(DiError::TypeMismatch {
                expected: key.name(),
                actual: instance.key().name(),
            }),
            None => Ok(None),
        }
    }

    /// Resolve `T`, treating absence as `NotFound`
    pub fn get<T: ?Sized + 'static>(&self) -> Result<Arc<T>> {
        self.resolve::<T>()?.ok_or_else(|| DiError::not_found::<T>(None))
    }

    /// Resolve a requested type within an ongoing resolution
    pub fn resolve_key(&self, requested: &TypeKey, path: &mut ResolutionPath) -> Result<Option<Instance>> {
        let Some(binding) = self.bindings.get(&requested.id()).map(|b| b.value().clone()) else {
            #[cfg(feature = "logging")]
            trace!(
                target: "bean_context",
                service = requested.name(),
                "No binding registered"
            );
            return Ok(None);
        };

        if let Some(view) = self.views.get(&requested.id()) {
            return Ok(Some(view));
        }

        let view = match binding {
            ContainerBinding::Instance(instance) => instance,
            ContainerBinding::Type { descriptor, binding } => {
                let raw = self.singleton(&descriptor, path)?;
                let view = binding.apply(&raw)?;
                self.proxies
                    .wrap_if_intercepted(requested, descriptor.key(), Some(&*descriptor), view)?
            }
        };

        Ok(Some(self.views.get_or_insert(requested.id(), view)))
    }

    /// Raw singleton for `descriptor`, building it on first use
    fn singleton(&self, descriptor: &Arc<TypeDescriptor>, path: &mut ResolutionPath) -> Result<Instance> {
        let key = descriptor.key();
        if let Some(existing) = self.singletons.get(&key.id()) {
            return Ok(existing);
        }

        if descriptor.is_interface() {
            let proxy = self.proxies.create_proxy(descriptor, None, None)?;
            return Ok(self.singletons.get_or_insert(key.id(), proxy));
        }

        path.enter(key)?;
        let built = self.build(descriptor, path);
        path.exit();
        built
    }

    fn build(&self, descriptor: &TypeDescriptor, path: &mut ResolutionPath) -> Result<Instance> {
        let key = descriptor.key();

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            service = key.name(),
            depth = path.depth(),
            "Creating singleton"
        );

        let raw = metadata::instantiate(descriptor, &mut BeanResolver::new(self, path, key))?;

        // Cached before member injection so field cycles find it
        let raw = self.singletons.get_or_insert(key.id(), raw);
        let checkpoint = path.checkpoint();
        path.record(raw.clone());

        if let Err(err) = metadata::inject_members(descriptor, &raw, &mut BeanResolver::new(self, path, key)) {
            for built in path.rollback(checkpoint) {
                self.evict(&built);
            }
            return Err(err);
        }
        Ok(raw)
    }

    /// Forget a half-built singleton and every cached view of it
    fn evict(&self, raw: &Instance) {
        let implementation = raw.key();

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            service = implementation.name(),
            "Evicting singleton after failed injection"
        );

        self.singletons.remove(&implementation.id());
        for binding in self.bindings.iter() {
            if let ContainerBinding::Type { descriptor, .. } = binding.value() {
                if descriptor.key() == implementation {
                    self.views.remove(binding.key());
                }
            }
        }
    }

    // =========================================================================
    // Query Methods
    // =========================================================================

    /// Whether anything is bound to `T`
    #[inline]
    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.bindings.contains_key(&TypeId::of::<T>())
    }

    /// Number of bound requested types
    #[inline]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Number of realized singletons
    #[inline]
    pub fn singleton_count(&self) -> usize {
        self.singletons.len()
    }

    /// Proxy generator (and through it, the handler registry)
    #[inline]
    pub fn proxies(&self) -> &ProxyGenerator {
        &self.proxies
    }

    /// Drop every binding and singleton
    pub fn clear(&self) {
        #[cfg(feature = "logging")]
        let count = self.bindings.len();

        self.views.clear();
        self.singletons.clear();
        self.bindings.clear();
        self.proxies.clear();

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            services_removed = count,
            "Container cleared"
        );
    }
}

impl DependencySource for Container {
    /// Qualifiers are ignored; the container is type-keyed
    fn resolve_dependency(&self, dependency: &Dependency, path: &mut ResolutionPath) -> Result<Option<Instance>> {
        self.resolve_key(&dependency.key, path)
    }
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("bindings", &self.bindings.len())
            .field("singletons", &self.singletons.len())
            .field("proxies", &self.proxies)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::{Arguments, FnHandler, HandlerScope, Proxy};
    use crate::resolver::Inject;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug)]
    struct Logger;

    #[derive(Debug)]
    struct Repository {
        logger: Arc<Logger>,
    }

    impl Introspect for Repository {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::builder::<Repository>()
                .constructor(|logger: Arc<Logger>| Repository { logger })
                .build()
        }
    }

    struct Service {
        repository: Arc<Repository>,
    }

    impl Introspect for Service {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::builder::<Service>()
                .constructor(|repository: Arc<Repository>| Service { repository })
                .build()
        }
    }

    #[test]
    fn test_absent_type_resolves_to_none() {
        let container = Container::new();
        assert!(container.resolve::<Logger>().unwrap().is_none());
        assert!(matches!(container.get::<Logger>(), Err(DiError::NotFound { .. })));
    }

    #[test]
    fn test_singleton_property() {
        let container = Container::new();
        container.register_instance(Arc::new(Logger));
        container.register::<Repository>().unwrap();
        container.register::<Service>().unwrap();

        let a = container.get::<Service>().unwrap();
        let b = container.get::<Service>().unwrap();
        assert!(Arc::ptr_eq(&a, &b));

        let repo = container.get::<Repository>().unwrap();
        assert!(Arc::ptr_eq(&a.repository, &repo));
        assert!(Arc::ptr_eq(&repo.logger, &container.get::<Logger>().unwrap()));
    }

    #[test]
    fn test_missing_constructor_dependency() {
        let container = Container::new();
        container.register::<Repository>().unwrap();
        let err = container.resolve::<Repository>().unwrap_err();
        assert!(matches!(err, DiError::UnresolvableDependency { .. }));
    }

    #[derive(Debug)]
    struct Chicken {
        _egg: Arc<Egg>,
    }

    #[derive(Debug)]
    struct Egg {
        _chicken: Arc<Chicken>,
    }

    impl Introspect for Chicken {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::builder::<Chicken>()
                .constructor(|egg: Arc<Egg>| Chicken { _egg: egg })
                .build()
        }
    }

    impl Introspect for Egg {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::builder::<Egg>()
                .constructor(|chicken: Arc<Chicken>| Egg { _chicken: chicken })
                .build()
        }
    }

    #[test]
    fn test_constructor_cycle_detected() {
        let container = Container::new();
        container.register::<Chicken>().unwrap();
        container.register::<Egg>().unwrap();

        match container.resolve::<Chicken>().unwrap_err() {
            DiError::CircularDependency { cycle, .. } => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.iter().any(|n| n.ends_with("Chicken")));
                assert!(cycle.iter().any(|n| n.ends_with("Egg")));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    struct Left {
        right: Inject<Right>,
    }

    struct Right {
        left: Inject<Left>,
    }

    impl Introspect for Left {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::builder::<Left>()
                .constructor(|()| Left { right: Inject::new() })
                .field("right", |l: &Left| &l.right)
                .build()
        }
    }

    impl Introspect for Right {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::builder::<Right>()
                .constructor(|()| Right { left: Inject::new() })
                .field("left", |r: &Right| &r.left)
                .build()
        }
    }

    #[test]
    fn test_field_cycle_resolves() {
        let container = Container::new();
        container.register::<Left>().unwrap();
        container.register::<Right>().unwrap();

        let left = container.get::<Left>().unwrap();
        let right = left.right.get().unwrap();
        assert!(Arc::ptr_eq(&right.left.get().unwrap(), &left));
    }

    #[derive(Debug)]
    struct Outer {
        inner: Inject<Inner>,
        logger: Inject<Logger>,
    }

    #[derive(Debug)]
    struct Inner {
        outer: Inject<Outer>,
    }

    impl Introspect for Outer {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::builder::<Outer>()
                .constructor(|()| Outer {
                    inner: Inject::new(),
                    logger: Inject::new(),
                })
                .field("inner", |o: &Outer| &o.inner)
                .field("logger", |o: &Outer| &o.logger)
                .build()
        }
    }

    impl Introspect for Inner {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::builder::<Inner>()
                .constructor(|()| Inner { outer: Inject::new() })
                .field("outer", |i: &Inner| &i.outer)
                .build()
        }
    }

    #[test]
    fn test_failed_injection_evicts_half_built_beans() {
        let container = Container::new();
        container.register::<Outer>().unwrap();
        container.register::<Inner>().unwrap();

        let err = container.resolve::<Outer>().unwrap_err();
        assert!(matches!(err, DiError::UnresolvableDependency { .. }));
        assert_eq!(container.singleton_count(), 0);
        assert!(matches!(
            container.resolve::<Outer>(),
            Err(DiError::UnresolvableDependency { .. })
        ));

        container.register_instance(Arc::new(Logger));
        let outer = container.get::<Outer>().unwrap();
        assert!(outer.logger.is_injected());
        let inner = outer.inner.require().unwrap();
        assert!(Arc::ptr_eq(&inner.outer.require().unwrap(), &outer));
        assert!(Arc::ptr_eq(&container.get::<Inner>().unwrap(), &inner));
    }

    trait Greeter: Send + Sync {
        fn greet(&self) -> Result<String>;
    }

    impl Greeter for Proxy<dyn Greeter> {
        fn greet(&self) -> Result<String> {
            self.invoke("greet", Arguments::new(), |real, _| real.greet())
        }
    }

    impl Introspect for dyn Greeter {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::interface::<dyn Greeter>()
                .proxy(|p| Arc::new(p) as Arc<dyn Greeter>)
                .build()
        }
    }

    struct Polite;

    impl Greeter for Polite {
        fn greet(&self) -> Result<String> {
            Ok("Good day".into())
        }
    }

    impl Introspect for Polite {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::builder::<Polite>()
                .constructor(|()| Polite)
                .implements(|p: Arc<Polite>| p as Arc<dyn Greeter>)
                .build()
        }
    }

    #[test]
    fn test_interface_binding_shares_raw_singleton() {
        static BUILT: AtomicUsize = AtomicUsize::new(0);

        struct Counted;
        impl Introspect for Counted {
            fn describe() -> TypeDescriptor {
                TypeDescriptor::builder::<Counted>()
                    .constructor(|()| {
                        BUILT.fetch_add(1, Ordering::SeqCst);
                        Counted
                    })
                    .implements(|c: Arc<Counted>| c as Arc<dyn std::any::Any + Send + Sync>)
                    .build()
            }
        }

        let container = Container::new();
        container.register::<Counted>().unwrap();
        container.get::<Counted>().unwrap();
        container.get::<dyn std::any::Any + Send + Sync>().unwrap();
        assert_eq!(BUILT.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_interface_without_implementation_is_proxy() {
        let container = Container::new();
        container.register_interface::<dyn Greeter>().unwrap();
        container.proxies().handlers().register(
            "canned",
            HandlerScope::target::<dyn Greeter>(),
            Arc::new(FnHandler::new(|_inv| Ok(Box::new(String::from("canned"))))),
        );

        let greeter = container.get::<dyn Greeter>().unwrap();
        assert_eq!(greeter.greet().unwrap(), "canned");
    }

    #[test]
    fn test_intercepted_implementation_is_wrapped() {
        let container = Container::new();
        container.register_interface::<dyn Greeter>().unwrap();
        container.register::<Polite>().unwrap();
        container.proxies().handlers().register(
            "exclaim",
            HandlerScope::target::<Polite>(),
            Arc::new(FnHandler::new(|inv| {
                let text = inv.proceed()?.downcast::<String>().map_err(|_| "not a string")?;
                Ok(Box::new(format!("{text}!")))
            })),
        );

        let greeter = container.get::<dyn Greeter>().unwrap();
        assert_eq!(greeter.greet().unwrap(), "Good day!");
        // Requested directly, the concrete type is not proxied
        assert_eq!(container.get::<Polite>().unwrap().greet().unwrap(), "Good day");
    }

    #[test]
    fn test_clear() {
        let container = Container::new();
        container.register_instance(Arc::new(Logger));
        assert!(container.contains::<Logger>());
        container.clear();
        assert!(container.is_empty());
        assert_eq!(container.singleton_count(), 0);
    }
}
