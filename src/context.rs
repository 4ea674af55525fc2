//! Bean context and its lifecycle
//!
//! A [`Context`] owns the definition and instance registries, the handler
//! registry and discovery state, and drives them through a fixed sequence of
//! phases:
//!
//! ```text
//! CREATED -> REGISTER_CORE -> SCAN -> MODULES -> DEFINITIONS_READY
//!         -> INSTANTIATE -> READY -> RUNNING -> DESTROY -> CLEARED
//! ```
//!
//! Phases never repeat or skip. Bean registration is only accepted before
//! `INSTANTIATE`.
//!
//! # Example
//!
//! ```rust
//! use bean_context::{BeanDefinition, Context, Introspect, TypeDescriptor};
//! use std::sync::Arc;
//!
//! struct Logger;
//! struct Repository { logger: Arc<Logger> }
//!
//! impl Introspect for Repository {
//!     fn describe() -> TypeDescriptor {
//!         TypeDescriptor::builder::<Repository>()
//!             .constructor(|logger: Arc<Logger>| Repository { logger })
//!             .build()
//!     }
//! }
//!
//! let context = Context::builder()
//!     .name("demo")
//!     .core_singleton(Arc::new(Logger))
//!     .use_inventory(false)
//!     .build();
//! context.register_component::<Repository>().unwrap();
//! context.init().unwrap();
//!
//! let repo = context.require_bean::<Repository>().unwrap();
//! assert!(Arc::ptr_eq(&repo.logger, &context.require_bean::<Logger>().unwrap()));
//! ```

use crate::configuration::ConfigurationProxy;
use crate::definition::{BeanDefinition, BeanDefinitionRegistry, DefinitionEntry};
use crate::discovery::ComponentDiscovery;
use crate::factory::BeanSource;
use crate::key::{Dependency, TypeKey};
use crate::marker;
use crate::metadata::{self, Introspect, TypeDescriptor};
use crate::path::ResolutionPath;
use crate::provider::ComponentRegistration;
use crate::proxy::{HandlerRegistry, ProxyGenerator};
use crate::resolver::{BeanResolver, DependencySource};
use crate::storage::{BeanInstanceRegistry, Instance};
use crate::{DiError, Result};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

#[cfg(feature = "logging")]
use tracing::{debug, trace, warn};

// =============================================================================
// Phase
// =============================================================================

/// Lifecycle phase of a [`Context`], in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Phase {
    /// Built, not yet initialized
    Created = 0,
    /// Host-provided singletons are registered
    RegisterCore,
    /// Core namespaces are scanned
    Scan,
    /// Sub-modules are initialized
    Modules,
    /// Definitions-ready listeners run
    DefinitionsReady,
    /// Every definition is instantiated
    Instantiate,
    /// Context-ready listeners run
    Ready,
    /// Steady state
    Running,
    /// Tear-down in progress
    Destroy,
    /// Everything released
    Cleared,
}

impl Phase {
    const ALL: [Phase; 10] = [
        Phase::Created,
        Phase::RegisterCore,
        Phase::Scan,
        Phase::Modules,
        Phase::DefinitionsReady,
        Phase::Instantiate,
        Phase::Ready,
        Phase::Running,
        Phase::Destroy,
        Phase::Cleared,
    ];

    fn from_u8(value: u8) -> Phase {
        Self::ALL.get(value as usize).copied().unwrap_or(Phase::Cleared)
    }

    /// Upper-case phase name
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Created => "CREATED",
            Phase::RegisterCore => "REGISTER_CORE",
            Phase::Scan => "SCAN",
            Phase::Modules => "MODULES",
            Phase::DefinitionsReady => "DEFINITIONS_READY",
            Phase::Instantiate => "INSTANTIATE",
            Phase::Ready => "READY",
            Phase::Running => "RUNNING",
            Phase::Destroy => "DESTROY",
            Phase::Cleared => "CLEARED",
        }
    }

    /// Whether beans may still be registered
    #[inline]
    pub fn accepts_registrations(&self) -> bool {
        *self < Phase::Instantiate
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Listeners and modules
// =============================================================================

/// Bean notified once every definition is registered, before instantiation.
///
/// Register implementations under `dyn DefinitionsReadyListener`. They may
/// still register further beans through the context.
pub trait DefinitionsReadyListener: Send + Sync {
    /// Lower runs first
    fn order(&self) -> i32 {
        0
    }

    /// Inspect the registry; `context` accepts further registrations
    fn on_bean_definitions_ready(&self, registry: &BeanDefinitionRegistry, context: &Context) -> Result<()>;
}

/// Bean notified once every bean has been instantiated.
///
/// Register implementations under `dyn ContextReadyListener`.
pub trait ContextReadyListener: Send + Sync {
    /// Lower runs first
    fn order(&self) -> i32 {
        0
    }

    /// Called during the `READY` phase
    fn on_context_ready(&self, context: &Context) -> Result<()>;
}

type ModuleInit = Arc<dyn Fn(&Context) -> Result<()> + Send + Sync>;

/// An optional sub-module initialized during the `MODULES` phase.
///
/// A module whose required type has no definition is skipped, as is a module
/// whose scan or init hook fails.
#[derive(Clone)]
pub struct Module {
    name: String,
    namespace: Option<String>,
    requires: Option<TypeKey>,
    init: Option<ModuleInit>,
}

impl Module {
    /// A module with nothing to do yet
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: None,
            requires: None,
            init: None,
        }
    }

    /// Namespace scanned before the init hook
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Skip the module unless a definition for `T` exists
    pub fn requires<T: ?Sized + 'static>(mut self) -> Self {
        self.requires = Some(TypeKey::of::<T>());
        self
    }

    /// Hook run after the module's namespace is scanned
    pub fn on_init<F>(mut self, init: F) -> Self
    where
        F: Fn(&Context) -> Result<()> + Send + Sync + 'static,
    {
        self.init = Some(Arc::new(init));
        self
    }

    /// Module name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("namespace", &self.namespace)
            .field("requires", &self.requires)
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Configuration for a [`Context`].
#[derive(Debug)]
pub struct ContextBuilder {
    name: String,
    namespaces: Vec<String>,
    core: Vec<BeanDefinition>,
    components: Vec<ComponentRegistration>,
    modules: Vec<Module>,
    use_inventory: bool,
}

impl ContextBuilder {
    fn new() -> Self {
        Self {
            name: "context".to_owned(),
            namespaces: Vec::new(),
            core: Vec::new(),
            components: Vec::new(),
            modules: Vec::new(),
            use_inventory: true,
        }
    }

    /// Name used in logs
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Core namespace scanned during `SCAN`; failures there are fatal
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespaces.push(namespace.into());
        self
    }

    /// Several core namespaces
    pub fn namespaces<I, S>(mut self, namespaces: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.namespaces.extend(namespaces.into_iter().map(Into::into));
        self
    }

    /// Host-provided singleton registered during `REGISTER_CORE`
    pub fn core_singleton<T: ?Sized + Send + Sync + 'static>(self, instance: Arc<T>) -> Self {
        self.core_bean(BeanDefinition::instance(instance))
    }

    /// Host-provided definition registered during `REGISTER_CORE`
    pub fn core_bean(mut self, definition: BeanDefinition) -> Self {
        self.core.push(definition);
        self
    }

    /// Explicit registration visible to namespace scans
    pub fn component(mut self, registration: ComponentRegistration) -> Self {
        self.components.push(registration);
        self
    }

    /// Sub-module, initialized in the order added
    pub fn module(mut self, module: Module) -> Self {
        self.modules.push(module);
        self
    }

    /// Whether scans also see `component!` registrations (default: true)
    pub fn use_inventory(mut self, enabled: bool) -> Self {
        self.use_inventory = enabled;
        self
    }

    /// Create the context in the `CREATED` phase
    pub fn build(self) -> Context {
        let handlers = Arc::new(HandlerRegistry::new());
        let discovery = ComponentDiscovery::new(self.use_inventory);
        for registration in self.components {
            discovery.add(registration);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            context = %self.name,
            namespaces = ?self.namespaces,
            modules = self.modules.len(),
            "Creating bean context"
        );

        Context {
            inner: Arc::new(ContextInner {
                name: self.name,
                phase: AtomicU8::new(Phase::Created as u8),
                definitions: BeanDefinitionRegistry::new(),
                instances: BeanInstanceRegistry::new(),
                proxies: ProxyGenerator::new(Arc::clone(&handlers)),
                handlers,
                discovery,
                namespaces: self.namespaces,
                core: Mutex::new(self.core),
                modules: Mutex::new(self.modules),
            }),
        }
    }
}

// =============================================================================
// Context
// =============================================================================

struct ContextInner {
    name: String,
    phase: AtomicU8,
    definitions: BeanDefinitionRegistry,
    instances: BeanInstanceRegistry,
    handlers: Arc<HandlerRegistry>,
    proxies: ProxyGenerator,
    discovery: ComponentDiscovery,
    namespaces: Vec<String>,
    core: Mutex<Vec<BeanDefinition>>,
    modules: Mutex<Vec<Module>>,
}

/// Bean definitions, realized beans and their lifecycle.
///
/// Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Start configuring a context
    pub fn builder() -> ContextBuilder {
        ContextBuilder::new()
    }

    /// Context name
    #[inline]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Current phase
    #[inline]
    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.inner.phase.load(Ordering::Acquire))
    }

    /// Definition registry
    #[inline]
    pub fn definitions(&self) -> &BeanDefinitionRegistry {
        &self.inner.definitions
    }

    /// Method handlers used by this context's proxies
    #[inline]
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.inner.handlers
    }

    /// Proxy generator
    #[inline]
    pub fn proxies(&self) -> &ProxyGenerator {
        &self.inner.proxies
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Run every phase up to `RUNNING`.
    ///
    /// Fails with `InvalidTransition` if the context was already initialized.
    pub fn init(&self) -> Result<()> {
        self.advance(Phase::Created, Phase::RegisterCore)?;
        self.register_core()?;

        self.advance(Phase::RegisterCore, Phase::Scan)?;
        for namespace in &self.inner.namespaces {
            self.scan_namespace(namespace)?;
        }

        self.advance(Phase::Scan, Phase::Modules)?;
        self.init_modules();

        self.advance(Phase::Modules, Phase::DefinitionsReady)?;
        self.notify_definitions_ready()?;

        self.advance(Phase::DefinitionsReady, Phase::Instantiate)?;
        self.instantiate_all()?;

        self.advance(Phase::Instantiate, Phase::Ready)?;
        self.notify_context_ready()?;

        self.advance(Phase::Ready, Phase::Running)?;

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            context = %self.inner.name,
            definitions = self.inner.definitions.len(),
            beans = self.inner.instances.len(),
            handlers = self.inner.handlers.len(),
            "Context running"
        );

        Ok(())
    }

    /// Run reload callbacks of every instantiated bean, in definition order
    pub fn reload(&self) -> Result<()> {
        let phase = self.phase();
        if phase != Phase::Running {
            return Err(DiError::phase_violation("reload", phase));
        }

        for definition in self.inner.definitions.all() {
            if !definition.has_reload() {
                continue;
            }
            if let Some(instance) = self.inner.instances.get(definition.id()) {
                #[cfg(feature = "logging")]
                trace!(
                    target: "bean_context",
                    definition = %definition.id(),
                    service = definition.produces().name(),
                    "Reloading bean"
                );
                definition.reload(&instance)?;
            }
        }
        Ok(())
    }

    /// Tear down: release every bean, definition and handler
    pub fn destroy(&self) -> Result<()> {
        self.advance(Phase::Running, Phase::Destroy)?;

        #[cfg(feature = "logging")]
        let beans = self.inner.instances.len();

        self.inner.instances.clear();
        self.inner.definitions.clear();
        self.inner.handlers.clear();
        self.inner.proxies.clear();
        self.inner.discovery.clear();

        self.advance(Phase::Destroy, Phase::Cleared)?;

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            context = %self.inner.name,
            beans_released = beans,
            "Context destroyed"
        );

        Ok(())
    }

    fn advance(&self, from: Phase, to: Phase) -> Result<()> {
        self.inner
            .phase
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|current| DiError::InvalidTransition {
                current: Phase::from_u8(current),
                target: to,
            })?;

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            context = %self.inner.name,
            phase = %to,
            "Entering phase"
        );

        Ok(())
    }

    fn register_core(&self) -> Result<()> {
        let core = std::mem::take(&mut *self.inner.core.lock().unwrap_or_else(PoisonError::into_inner));
        for definition in core {
            self.register_bean(definition)?;
        }
        Ok(())
    }

    fn init_modules(&self) {
        let modules = std::mem::take(&mut *self.inner.modules.lock().unwrap_or_else(PoisonError::into_inner));
        for module in modules {
            if let Some(required) = &module.requires {
                if !self.inner.definitions.contains(required) {
                    #[cfg(feature = "logging")]
                    debug!(
                        target: "bean_context",
                        module = %module.name,
                        requires = required.name(),
                        "Skipping module: required type not present"
                    );
                    continue;
                }
            }

            let outcome = module
                .namespace
                .as_deref()
                .map_or(Ok(0), |ns| self.scan_namespace(ns))
                .and_then(|_| module.init.as_ref().map_or(Ok(()), |init| init(self)));

            match outcome {
                Ok(()) => {
                    #[cfg(feature = "logging")]
                    debug!(
                        target: "bean_context",
                        module = %module.name,
                        "Module initialized"
                    );
                }
                Err(_error) => {
                    #[cfg(feature = "logging")]
                    warn!(
                        target: "bean_context",
                        module = %module.name,
                        error = %_error,
                        "Skipping module: initialization failed"
                    );
                }
            }
        }
    }

    fn notify_definitions_ready(&self) -> Result<()> {
        let mut listeners = self.get_beans::<dyn DefinitionsReadyListener>()?;
        listeners.sort_by_key(|l| l.order());
        for listener in listeners {
            listener.on_bean_definitions_ready(&self.inner.definitions, self)?;
        }
        Ok(())
    }

    fn instantiate_all(&self) -> Result<()> {
        for definition in self.inner.definitions.all() {
            let mut path = ResolutionPath::new();
            self.instantiate(&definition, &mut path)?;
        }
        Ok(())
    }

    fn notify_context_ready(&self) -> Result<()> {
        let mut listeners = self.get_beans::<dyn ContextReadyListener>()?;
        listeners.sort_by_key(|l| l.order());
        for listener in listeners {
            listener.on_context_ready(self)?;
        }
        Ok(())
    }

    // =========================================================================
    // Registration
    // =========================================================================

    fn check_registration(&self, operation: &'static str) -> Result<()> {
        let phase = self.phase();
        if phase.accepts_registrations() {
            Ok(())
        } else {
            Err(DiError::phase_violation(operation, phase))
        }
    }

    /// Register a definition under its produced type and every bound type
    pub fn register_bean(&self, definition: BeanDefinition) -> Result<Arc<BeanDefinition>> {
        self.check_registration("register bean")?;
        let definition = Arc::new(definition);
        self.inner.definitions.register_all(Arc::clone(&definition))?;
        if let BeanSource::Proxy(descriptor) = definition.source() {
            self.inner.proxies.register_interface(Arc::clone(descriptor));
        }
        Ok(definition)
    }

    /// Register an existing definition under one more requested type
    pub fn register_bean_as<R: ?Sized + 'static>(&self, definition: &Arc<BeanDefinition>) -> Result<()> {
        self.check_registration("register bean")?;
        self.inner.definitions.register(TypeKey::of::<R>(), Arc::clone(definition))
    }

    /// Register a pre-built singleton
    pub fn register_instance<T: ?Sized + Send + Sync + 'static>(&self, instance: Arc<T>) -> Result<Arc<BeanDefinition>> {
        self.register_bean(BeanDefinition::instance(instance))
    }

    /// Register a described type; interfaces also become proxyable
    pub fn register_component<T: ?Sized + Introspect>(&self) -> Result<Arc<BeanDefinition>> {
        let descriptor = T::describe();
        descriptor.validate()?;
        self.register_descriptor(descriptor)
    }

    fn register_descriptor(&self, descriptor: TypeDescriptor) -> Result<Arc<BeanDefinition>> {
        if descriptor.is_interface() && !descriptor.has_proxy() {
            return Err(DiError::malformed(
                descriptor.key().name(),
                "interface bean declares no proxy constructor",
            ));
        }
        self.register_bean(BeanDefinition::from_descriptor(descriptor))
    }

    /// Discover `namespace` and register what it contains
    pub fn scan(&self, namespace: &str) -> Result<usize> {
        self.check_registration("scan")?;
        self.scan_namespace(namespace)
    }

    fn scan_namespace(&self, namespace: &str) -> Result<usize> {
        let found = self.inner.discovery.discover(namespace)?;
        let mut registered = 0;

        for interface in found.interfaces {
            let is_bean = interface.has_marker(&marker::COMPONENT);
            self.inner.proxies.register_interface(Arc::new(interface.clone()));
            if is_bean {
                self.register_descriptor(interface)?;
                registered += 1;
            }
        }

        for component in found.components {
            self.register_descriptor(component)?;
            registered += 1;
        }

        for method in &found.bean_methods {
            if let Some(bean) = method.bean_method() {
                self.register_bean(BeanDefinition::from_bean_method(
                    method.declaring_type(),
                    method.name(),
                    bean,
                ))?;
                registered += 1;
            }
        }

        for method in &found.handlers {
            if let Some(handler) = method.handler_method() {
                self.inner
                    .handlers
                    .register(method.identity(), handler.scope().clone(), handler.create());
            }
        }

        Ok(registered)
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Bean for `T`; `Ok(None)` if nothing is defined, `Ambiguous` if several
    /// are and none is primary
    pub fn get_bean<T: ?Sized + 'static>(&self) -> Result<Option<Arc<T>>> {
        self.lookup::<T>(None)
    }

    /// Bean for `T` with the given qualifier
    pub fn get_bean_named<T: ?Sized + 'static>(&self, qualifier: &str) -> Result<Option<Arc<T>>> {
        self.lookup::<T>(Some(qualifier))
    }

    /// Like [`get_bean`](Self::get_bean), with absence as `NotFound`
    pub fn require_bean<T: ?Sized + 'static>(&self) -> Result<Arc<T>> {
        self.get_bean::<T>()?.ok_or_else(|| DiError::not_found::<T>(None))
    }

    /// Like [`get_bean_named`](Self::get_bean_named), with absence as `NotFound`
    pub fn require_bean_named<T: ?Sized + 'static>(&self, qualifier: &str) -> Result<Arc<T>> {
        self.get_bean_named::<T>(qualifier)?
            .ok_or_else(|| DiError::not_found::<T>(Some(qualifier)))
    }

    /// Every bean registered for `T`, in registration order
    pub fn get_beans<T: ?Sized + 'static>(&self) -> Result<Vec<Arc<T>>> {
        let key = TypeKey::of::<T>();
        self.inner
            .definitions
            .entries(&key)
            .iter()
            .map(|entry| {
                let mut path = ResolutionPath::new();
                let instance = self.resolve_entry(entry, &mut path)?;
                downcast::<T>(&key, &instance)
            })
            .collect()
    }

    /// Whether a definition exists for `T`
    pub fn contains_bean<T: ?Sized + 'static>(&self) -> bool {
        self.inner.definitions.contains(&TypeKey::of::<T>())
    }

    /// Configuration class `C`, with bean-method calls routed to the cached beans
    pub fn configuration<C: Introspect + Send + Sync>(&self) -> Result<ConfigurationProxy<C>> {
        let configuration = self.require_bean::<C>()?;
        Ok(ConfigurationProxy::new(configuration, Arc::new(C::describe()), self.clone()))
    }

    fn lookup<T: ?Sized + 'static>(&self, qualifier: Option<&str>) -> Result<Option<Arc<T>>> {
        let key = TypeKey::of::<T>();
        let Some(entry) = self.inner.definitions.lookup(&key, qualifier)? else {
            #[cfg(feature = "logging")]
            trace!(
                target: "bean_context",
                service = key.name(),
                qualifier,
                "No bean definition"
            );
            return Ok(None);
        };

        let mut path = ResolutionPath::new();
        let instance = self.resolve_entry(&entry, &mut path)?;
        downcast::<T>(&key, &instance).map(Some)
    }

    /// The definition seen as the entry's requested type, cached per definition
    fn resolve_entry(&self, entry: &DefinitionEntry, path: &mut ResolutionPath) -> Result<Instance> {
        let definition = entry.definition();
        let requested = entry.requested();
        if let Some(view) = self.inner.instances.view(definition.id(), &requested) {
            return Ok(view);
        }

        let raw = self.instantiate(definition, path)?;
        let view = entry.binding().apply(&raw)?;
        let view = match definition.source() {
            BeanSource::Proxy(_) => view,
            source => self.inner.proxies.wrap_if_intercepted(
                &requested,
                definition.produces(),
                source.descriptor().map(|d| &**d),
                view,
            )?,
        };
        Ok(self.inner.instances.insert_view(definition.id(), &requested, view))
    }

    /// Raw instance for a definition, created at most once
    fn instantiate(&self, definition: &BeanDefinition, path: &mut ResolutionPath) -> Result<Instance> {
        let id = definition.id();
        if let Some(existing) = self.inner.instances.get(id) {
            return Ok(existing);
        }

        match definition.source() {
            BeanSource::Instance(instance) => Ok(self.inner.instances.insert(id, instance.clone())),
            BeanSource::Proxy(descriptor) => {
                let proxy = self.inner.proxies.create_proxy(descriptor, None, None)?;
                Ok(self.inner.instances.insert(id, proxy))
            }
            BeanSource::Type(descriptor) => {
                path.enter(descriptor.key())?;
                let built = self.build(definition, descriptor, path);
                path.exit();
                built
            }
            BeanSource::Factory(factory) => {
                path.enter(definition.produces())?;
                let built = {
                    let mut resolver = BeanResolver::new(self, path, definition.produces());
                    factory(&mut resolver).map(|raw| self.inner.instances.insert(id, raw))
                };
                if let Ok(raw) = &built {
                    path.record(raw.clone());
                }
                path.exit();
                built
            }
        }
    }

    fn build(&self, definition: &BeanDefinition, descriptor: &TypeDescriptor, path: &mut ResolutionPath) -> Result<Instance> {
        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            definition = %definition.id(),
            service = descriptor.key().name(),
            qualifier = ?definition.qualifier(),
            depth = path.depth(),
            "Creating bean"
        );

        let key = descriptor.key();
        let raw = metadata::instantiate(descriptor, &mut BeanResolver::new(self, path, key))?;

        // Cached before member injection so field cycles find it
        let raw = self.inner.instances.insert(definition.id(), raw);
        let checkpoint = path.checkpoint();
        path.record(raw.clone());

        if let Err(err) = metadata::inject_members(descriptor, &raw, &mut BeanResolver::new(self, path, key)) {
            for built in path.rollback(checkpoint) {
                let _evicted = self.inner.instances.evict(&built);

                #[cfg(feature = "logging")]
                debug!(
                    target: "bean_context",
                    definition = ?_evicted,
                    service = built.key().name(),
                    "Evicting bean after failed injection"
                );
            }
            return Err(err);
        }
        Ok(raw)
    }
}

fn downcast<T: ?Sized + 'static>(key: &TypeKey, instance: &Instance) -> Result<Arc<T>> {
    instance.downcast::<T>().ok_or(DiError::TypeMismatch {
        expected: key.name(),
        actual: instance.key().name(),
    })
}

impl DependencySource for Context {
    fn resolve_dependency(&self, dependency: &Dependency, path: &mut ResolutionPath) -> Result<Option<Instance>> {
        match self
            .inner
            .definitions
            .lookup(&dependency.key, dependency.qualifier.as_deref())?
        {
            Some(entry) => self.resolve_entry(&entry, path).map(Some),
            None => Ok(None),
        }
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.inner.name)
            .field("phase", &self.phase())
            .field("definitions", &self.inner.definitions)
            .field("instances", &self.inner.instances)
            .field("handlers", &self.inner.handlers)
            .finish()
    }
}
