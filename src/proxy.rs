//! Method interception
//!
//! Rust cannot subclass at runtime, so interception happens at the interface
//! seam: a `dyn Trait` interface is implemented once for [`Proxy<dyn Trait>`],
//! with every method delegating to [`Proxy::invoke`]. The proxy routes each
//! call through the matching [`MethodHandler`]s, in registration order, before
//! falling through to the real implementation (if there is one).
//!
//! # Example
//!
//! ```rust
//! use bean_context::proxy::{Arguments, FnHandler, HandlerRegistry, HandlerScope, Proxy, ProxyParts, ProxyTarget};
//! use bean_context::{Result, TypeDescriptor};
//! use std::sync::Arc;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self, name: &str) -> Result<String>;
//! }
//!
//! impl Greeter for Proxy<dyn Greeter> {
//!     fn greet(&self, name: &str) -> Result<String> {
//!         self.invoke("greet", Arguments::new().with(name.to_owned()), |real, _| real.greet(name))
//!     }
//! }
//!
//! let interface = TypeDescriptor::interface::<dyn Greeter>()
//!     .proxy(|p| Arc::new(p) as Arc<dyn Greeter>)
//!     .build();
//!
//! let handlers = Arc::new(HandlerRegistry::new());
//! handlers.register(
//!     "hello",
//!     HandlerScope::target::<dyn Greeter>(),
//!     Arc::new(FnHandler::new(|inv| {
//!         let name: &String = inv.args().get(0).expect("name");
//!         Ok(Box::new(format!("hello {name}")))
//!     })),
//! );
//!
//! let parts = ProxyParts::new(ProxyTarget::for_interface(&interface), None, handlers);
//! let proxy = Proxy::<dyn Greeter>::from_parts(parts).unwrap();
//! assert_eq!(proxy.greet("world").unwrap(), "hello world");
//! ```

use crate::key::TypeKey;
use crate::marker::{self, Marker};
use crate::metadata::{MethodDescriptor, TypeDescriptor};
use crate::storage::Instance;
use crate::{DiError, HandlerError, Result};
use ahash::RandomState;
use dashmap::DashMap;
use std::any::{Any, TypeId};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// Type-erased method return value
pub type Value = Box<dyn Any + Send>;

/// Failure of the real implementation on its way back through the chain
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct ImplementationError(DiError);

// =============================================================================
// Arguments
// =============================================================================

/// Owned, type-erased argument list of an intercepted call.
#[derive(Default)]
pub struct Arguments {
    values: Vec<Box<dyn Any + Send + Sync>>,
}

impl Arguments {
    /// No arguments
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an argument
    pub fn with<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.values.push(Box::new(value));
        self
    }

    /// Argument `index`, if present and of type `T`
    pub fn get<T: Any>(&self, index: usize) -> Option<&T> {
        self.values.get(index).and_then(|v| v.downcast_ref::<T>())
    }

    /// Number of arguments
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Check if empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl std::fmt::Debug for Arguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Arguments").field("len", &self.values.len()).finish()
    }
}

// =============================================================================
// ProxyTarget
// =============================================================================

/// What a proxy stands for: the implementation type (or the interface itself
/// when there is none), the interfaces it satisfies, its class markers and the
/// methods declared on either side.
#[derive(Debug, Clone)]
pub struct ProxyTarget {
    type_key: TypeKey,
    interface: TypeKey,
    interfaces: Vec<TypeKey>,
    class_markers: Vec<Marker>,
    methods: Vec<MethodDescriptor>,
}

impl ProxyTarget {
    /// A target-less proxy for `interface`
    pub fn for_interface(interface: &TypeDescriptor) -> Self {
        Self {
            type_key: interface.key(),
            interface: interface.key(),
            interfaces: vec![interface.key()],
            class_markers: interface.markers().to_vec(),
            methods: interface.methods().to_vec(),
        }
    }

    /// Add the implementation seen through the interface
    pub fn with_implementation(mut self, key: TypeKey, descriptor: Option<&TypeDescriptor>) -> Self {
        self.type_key = key;
        if let Some(descriptor) = descriptor {
            for binding in descriptor.bindings() {
                if !self.interfaces.contains(&binding.requested()) {
                    self.interfaces.push(binding.requested());
                }
            }
            for m in descriptor.markers() {
                if !self.class_markers.contains(m) {
                    self.class_markers.push(*m);
                }
            }
            for method in descriptor.methods() {
                match self.methods.iter_mut().find(|m| m.name() == method.name()) {
                    Some(existing) => *existing = method.merged_with(existing),
                    None => self.methods.push(method.clone()),
                }
            }
        }
        self
    }

    /// Implementation type, or the interface for target-less proxies
    #[inline]
    pub fn type_key(&self) -> TypeKey {
        self.type_key
    }

    /// Interface the proxy implements
    #[inline]
    pub fn interface(&self) -> TypeKey {
        self.interface
    }

    /// Whether the target can be seen as `key`
    pub fn is_assignable_to(&self, key: &TypeKey) -> bool {
        self.type_key == *key || self.interfaces.contains(key)
    }

    /// Class-level markers of the target
    #[inline]
    pub fn class_markers(&self) -> &[Marker] {
        &self.class_markers
    }

    /// Whether the target's class carries `wanted`
    #[inline]
    pub fn has_class_marker(&self, wanted: &Marker) -> bool {
        marker::carries(&self.class_markers, wanted)
    }

    /// Descriptor for `name`; undeclared methods get a marker-less descriptor
    pub fn method(&self, name: &'static str) -> MethodDescriptor {
        self.methods
            .iter()
            .find(|m| m.name() == name)
            .cloned()
            .unwrap_or_else(|| MethodDescriptor::new(name, self.interface, &[]))
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Which invocations a handler is offered.
///
/// All three filters are optional; those that are set must all match.
#[derive(Debug, Clone, Default)]
pub struct HandlerScope {
    target_type: Option<TypeKey>,
    class_marker: Option<Marker>,
    method_marker: Option<Marker>,
}

impl HandlerScope {
    /// Match every invocation
    pub fn any() -> Self {
        Self::default()
    }

    /// Match targets assignable to `T`
    pub fn target<T: ?Sized + 'static>() -> Self {
        Self {
            target_type: Some(TypeKey::of::<T>()),
            ..Self::default()
        }
    }

    /// Also require a class marker on the target
    pub fn with_class_marker(mut self, marker: Marker) -> Self {
        self.class_marker = Some(marker);
        self
    }

    /// Also require a marker on the invoked method
    pub fn with_method_marker(mut self, marker: Marker) -> Self {
        self.method_marker = Some(marker);
        self
    }

    /// Whether the type and class filters match `target`
    pub fn matches_target(&self, target: &ProxyTarget) -> bool {
        self.target_type.is_none_or(|t| target.is_assignable_to(&t))
            && self.class_marker.is_none_or(|m| target.has_class_marker(&m))
    }

    /// Whether all filters match this invocation
    pub fn matches(&self, target: &ProxyTarget, method: &MethodDescriptor) -> bool {
        self.matches_target(target) && self.method_marker.is_none_or(|m| method.has_marker(&m))
    }
}

/// Interceptor offered proxied calls matching its [`HandlerScope`].
pub trait MethodHandler: Send + Sync {
    /// Final say on whether to handle this call
    fn can_handle(&self, _target: &ProxyTarget, _method: &MethodDescriptor, _args: &Arguments) -> bool {
        true
    }

    /// Handle the call; call [`Invocation::proceed`] to continue the chain
    fn handle(&self, invocation: Invocation<'_>) -> std::result::Result<Value, HandlerError>;
}

/// One intercepted call, positioned at some point of the handler chain.
pub struct Invocation<'a> {
    target: &'a ProxyTarget,
    method: &'a MethodDescriptor,
    args: &'a Arguments,
    chain: &'a [Arc<dyn MethodHandler>],
    real: &'a mut dyn FnMut() -> std::result::Result<Value, HandlerError>,
    has_real: bool,
}

impl<'a> Invocation<'a> {
    /// Proxied target
    #[inline]
    pub fn target(&self) -> &ProxyTarget {
        self.target
    }

    /// Invoked method
    #[inline]
    pub fn method(&self) -> &MethodDescriptor {
        self.method
    }

    /// Call arguments
    #[inline]
    pub fn args(&self) -> &Arguments {
        self.args
    }

    /// Whether a real implementation sits at the end of the chain
    #[inline]
    pub fn has_implementation(&self) -> bool {
        self.has_real
    }

    /// Continue with the next handler, or the real implementation
    pub fn proceed(self) -> std::result::Result<Value, HandlerError> {
        let chain = self.chain;
        match chain.split_first() {
            Some((next, rest)) => next.handle(Invocation { chain: rest, ..self }),
            None => (self.real)(),
        }
    }
}

/// Adapts a closure into a [`MethodHandler`].
pub struct FnHandler<F> {
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Invocation<'_>) -> std::result::Result<Value, HandlerError> + Send + Sync,
{
    /// Wrap `handler`
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

impl<F> MethodHandler for FnHandler<F>
where
    F: Fn(Invocation<'_>) -> std::result::Result<Value, HandlerError> + Send + Sync,
{
    fn handle(&self, invocation: Invocation<'_>) -> std::result::Result<Value, HandlerError> {
        (self.handler)(invocation)
    }
}

/// A transactional or resource boundary around a call.
pub trait Boundary: Send + Sync {
    /// Open the boundary before the call
    fn begin(&self, method: &MethodDescriptor) -> std::result::Result<(), HandlerError>;

    /// Close the boundary after a successful call
    fn commit(&self, method: &MethodDescriptor) -> std::result::Result<(), HandlerError>;

    /// Undo after a failed call
    fn rollback(&self, method: &MethodDescriptor, error: &HandlerError);
}

/// Runs the rest of the chain inside a [`Boundary`].
pub struct BoundaryHandler<B> {
    boundary: B,
}

impl<B: Boundary> BoundaryHandler<B> {
    /// Wrap `boundary`
    pub fn new(boundary: B) -> Self {
        Self { boundary }
    }

    /// Methods marked transactional, on any target
    pub fn scope() -> HandlerScope {
        HandlerScope::any().with_method_marker(marker::TRANSACTIONAL)
    }
}

impl<B: Boundary> MethodHandler for BoundaryHandler<B> {
    fn handle(&self, invocation: Invocation<'_>) -> std::result::Result<Value, HandlerError> {
        let method = invocation.method().clone();
        self.boundary.begin(&method)?;
        match invocation.proceed() {
            Ok(value) => {
                self.boundary.commit(&method)?;
                Ok(value)
            }
            Err(error) => {
                self.boundary.rollback(&method, &error);
                Err(error)
            }
        }
    }
}

struct RegisteredHandler {
    name: String,
    scope: HandlerScope,
    handler: Arc<dyn MethodHandler>,
}

/// Method handlers owned by one context.
///
/// Written while definitions are discovered and read by every proxied call
/// afterwards.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<Vec<RegisteredHandler>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler; handlers are tried in registration order
    pub fn register(&self, name: impl Into<String>, scope: HandlerScope, handler: Arc<dyn MethodHandler>) {
        let name = name.into();

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            handler = %name,
            scope = ?scope,
            "Registered method handler"
        );

        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RegisteredHandler { name, scope, handler });
    }

    /// Handlers offered this call, in registration order
    pub fn matching(&self, target: &ProxyTarget, method: &MethodDescriptor, args: &Arguments) -> Vec<Arc<dyn MethodHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|h| h.scope.matches(target, method) && h.handler.can_handle(target, method, args))
            .map(|h| Arc::clone(&h.handler))
            .collect()
    }

    /// Whether any handler could intercept some call on `target`
    pub fn may_intercept(&self, target: &ProxyTarget) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|h| h.scope.matches_target(target))
    }

    /// Names of registered handlers, in order
    pub fn names(&self) -> Vec<String> {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|h| h.name.clone())
            .collect()
    }

    /// Number of handlers
    pub fn len(&self) -> usize {
        self.handlers.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every handler
    pub fn clear(&self) {
        self.handlers.write().unwrap_or_else(PoisonError::into_inner).clear();
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").field("handlers", &self.names()).finish()
    }
}

// =============================================================================
// Proxy
// =============================================================================

/// Everything needed to build a proxy, independent of its static type.
pub struct ProxyParts {
    info: ProxyTarget,
    target: Option<Instance>,
    handlers: Arc<HandlerRegistry>,
}

impl ProxyParts {
    /// `target` must already be viewed as the proxied interface
    pub fn new(info: ProxyTarget, target: Option<Instance>, handlers: Arc<HandlerRegistry>) -> Self {
        Self { info, target, handlers }
    }
}

/// Intercepting wrapper around an optional real implementation.
///
/// Equality, hashing and formatting use the proxy's own identity, never the
/// target's.
pub struct Proxy<T: ?Sized> {
    id: u64,
    target: Option<Arc<T>>,
    info: Arc<ProxyTarget>,
    handlers: Arc<HandlerRegistry>,
}

impl<T: ?Sized + 'static> Proxy<T> {
    /// Assemble a proxy; fails if the target is not a `T`
    pub fn from_parts(parts: ProxyParts) -> Result<Self> {
        static NEXT_ID: AtomicU64 = AtomicU64::new(1);

        let target = match parts.target {
            Some(instance) => Some(instance.downcast::<T>().ok_or(DiError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: instance.key().name(),
            })?),
            None => None,
        };

        Ok(Self {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            target,
            info: Arc::new(parts.info),
            handlers: parts.handlers,
        })
    }

    /// Route a call through matching handlers, then `real`.
    ///
    /// Errors raised by the real implementation (or by a missing one) pass
    /// through unchanged. Anything a handler raises itself, including a
    /// [`DiError`], comes back as `HandlerFailed` carrying the method's identity.
    pub fn invoke<R, F>(&self, method: &'static str, args: Arguments, real: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce(&T, &Arguments) -> Result<R>,
    {
        let descriptor = self.info.method(method);
        let chain = self.handlers.matching(&self.info, &descriptor, &args);

        if chain.is_empty() {
            return match self.target.as_deref() {
                Some(target) => real(target, &args),
                None => Err(DiError::NoImplementation {
                    method: descriptor.identity(),
                }),
            };
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "bean_context",
            method = %descriptor.identity(),
            handlers = chain.len(),
            "Dispatching proxied call"
        );

        let target = self.target.as_deref();
        let identity = descriptor.identity();
        let mut real = Some(real);
        let mut call_real = || -> std::result::Result<Value, HandlerError> {
            let real = real
                .take()
                .ok_or_else(|| ImplementationError(DiError::Internal(format!("{identity} proceeded twice"))))?;
            match target {
                Some(target) => real(target, &args)
                    .map(|value| Box::new(value) as Value)
                    .map_err(|err| ImplementationError(err).into()),
                None => Err(ImplementationError(DiError::NoImplementation {
                    method: identity.clone(),
                })
                .into()),
            }
        };

        let invocation = Invocation {
            target: &self.info,
            method: &descriptor,
            args: &args,
            chain: &chain,
            real: &mut call_real,
            has_real: self.target.is_some(),
        };

        let value = invocation.proceed().map_err(|source| match source.downcast::<ImplementationError>() {
            Ok(error) => error.0,
            Err(source) => DiError::HandlerFailed {
                method: descriptor.identity(),
                source,
            },
        })?;

        value.downcast::<R>().map(|r| *r).map_err(|_| DiError::ReturnTypeMismatch {
            method: descriptor.identity(),
            expected: std::any::type_name::<R>(),
        })
    }

    /// Real implementation, if any
    #[inline]
    pub fn target(&self) -> Option<&Arc<T>> {
        self.target.as_ref()
    }

    /// What the proxy stands for
    #[inline]
    pub fn info(&self) -> &ProxyTarget {
        &self.info
    }

    /// Unique proxy id
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl<T: ?Sized> PartialEq for Proxy<T> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<T: ?Sized> Eq for Proxy<T> {}

impl<T: ?Sized> Hash for Proxy<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<T: ?Sized> std::fmt::Display for Proxy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}$Proxy@{}", self.info.interface.short_name(), self.id)
    }
}

impl<T: ?Sized> std::fmt::Debug for Proxy<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("id", &self.id)
            .field("type", &self.info.type_key)
            .field("interface", &self.info.interface)
            .field("has_target", &self.target.is_some())
            .finish()
    }
}

// =============================================================================
// ProxyGenerator
// =============================================================================

/// Builds proxies for interfaces that declare a proxy constructor.
pub struct ProxyGenerator {
    handlers: Arc<HandlerRegistry>,
    interfaces: DashMap<TypeId, Arc<TypeDescriptor>, RandomState>,
}

impl ProxyGenerator {
    /// Create a generator dispatching to `handlers`
    pub fn new(handlers: Arc<HandlerRegistry>) -> Self {
        Self {
            handlers,
            interfaces: DashMap::with_capacity_and_hasher_and_shard_amount(0, RandomState::new(), 8),
        }
    }

    /// Handler registry used by generated proxies
    #[inline]
    pub fn handlers(&self) -> &Arc<HandlerRegistry> {
        &self.handlers
    }

    /// Remember an interface so concrete beans requested through it can be wrapped
    pub fn register_interface(&self, descriptor: Arc<TypeDescriptor>) {
        if descriptor.is_interface() && descriptor.has_proxy() {
            self.interfaces.insert(descriptor.key().id(), descriptor);
        }
    }

    /// Descriptor of a registered interface
    pub fn interface(&self, key: &TypeKey) -> Option<Arc<TypeDescriptor>> {
        self.interfaces.get(&key.id()).map(|d| Arc::clone(d.value()))
    }

    /// Build a proxy for `interface`.
    ///
    /// Without a target the proxy is the only instance and every call must be
    /// answered by a handler.
    pub fn create_proxy(
        &self,
        interface: &TypeDescriptor,
        implementation: Option<(TypeKey, Option<&TypeDescriptor>)>,
        target: Option<Instance>,
    ) -> Result<Instance> {
        let proxy = interface.proxy_fn().ok_or_else(|| {
            DiError::malformed(interface.key().name(), "interface declares no proxy constructor")
        })?;

        let mut info = ProxyTarget::for_interface(interface);
        if let Some((key, descriptor)) = implementation {
            info = info.with_implementation(key, descriptor);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            interface = interface.key().name(),
            implementation = info.type_key().name(),
            has_target = target.is_some(),
            "Creating proxy"
        );

        proxy(ProxyParts::new(info, target, Arc::clone(&self.handlers)))
    }

    /// Wrap `view` in a proxy if `requested` is a proxyable interface and some
    /// handler targets the implementation; otherwise return `view` unchanged.
    pub fn wrap_if_intercepted(
        &self,
        requested: &TypeKey,
        implementation: TypeKey,
        descriptor: Option<&TypeDescriptor>,
        view: Instance,
    ) -> Result<Instance> {
        let Some(interface) = self.interface(requested) else {
            return Ok(view);
        };
        if implementation == interface.key() {
            return Ok(view);
        }

        let info = ProxyTarget::for_interface(&interface).with_implementation(implementation, descriptor);
        if !self.handlers.may_intercept(&info) {
            return Ok(view);
        }
        self.create_proxy(&interface, Some((implementation, descriptor)), Some(view))
    }

    /// Forget every interface
    pub fn clear(&self) {
        self.interfaces.clear();
    }
}

impl std::fmt::Debug for ProxyGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyGenerator")
            .field("interfaces", &self.interfaces.len())
            .field("handlers", &self.handlers.len())
            .finish()
    }
}
