//! Type metadata
//!
//! Rust has no runtime reflection, so every injectable type describes itself
//! through [`Introspect::describe`], returning a [`TypeDescriptor`]: its
//! constructors, injectable members, the interfaces it satisfies, its markers
//! and declared methods. The descriptor is either written by hand with
//! [`TypeDescriptor::builder`] or generated by `#[derive(Component)]`.
//!
//! # Example
//!
//! ```rust
//! use bean_context::{Inject, Introspect, TypeDescriptor, marker};
//! use std::sync::Arc;
//!
//! struct Logger;
//! struct Clock;
//!
//! struct Repository {
//!     logger: Arc<Logger>,
//!     clock: Inject<Clock>,
//! }
//!
//! impl Introspect for Repository {
//!     fn describe() -> TypeDescriptor {
//!         TypeDescriptor::builder::<Repository>()
//!             .marker(marker::COMPONENT)
//!             .constructor(|logger: Arc<Logger>| Repository {
//!                 logger,
//!                 clock: Inject::new(),
//!             })
//!             .field("clock", |r: &Repository| &r.clock)
//!             .build()
//!     }
//! }
//!
//! let descriptor = Repository::describe();
//! assert_eq!(descriptor.constructors().len(), 1);
//! assert_eq!(descriptor.members().len(), 1);
//! ```

use crate::factory::Binding;
use crate::key::{Dependency, TypeKey};
use crate::marker::{self, Marker};
use crate::proxy::{HandlerScope, MethodHandler, Proxy, ProxyParts};
use crate::resolver::{BeanResolver, Dependencies, Inject};
use crate::storage::Instance;
use crate::{DiError, Result};
use std::marker::PhantomData;
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Types that can describe their own injection metadata.
pub trait Introspect: 'static {
    /// Build the descriptor for `Self`
    fn describe() -> TypeDescriptor;
}

/// Type-erased constructor body
type BuildFn = Arc<dyn Fn(&mut BeanResolver<'_>) -> Result<Instance> + Send + Sync>;

/// Type-erased member injection body
type InjectFn = Arc<dyn Fn(&Instance, &mut BeanResolver<'_>) -> Result<()> + Send + Sync>;

/// Type-erased bean-factory method body
type BeanMethodFn = Arc<dyn Fn(&Instance, &mut BeanResolver<'_>) -> Result<Instance> + Send + Sync>;

/// Type-erased handler constructor
type HandlerFactoryFn = Arc<dyn Fn() -> Arc<dyn MethodHandler> + Send + Sync>;

/// Type-erased proxy constructor
pub(crate) type ProxyFn = Arc<dyn Fn(ProxyParts) -> Result<Instance> + Send + Sync>;

/// Whether a type can be instantiated directly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// Has constructors
    Concrete,
    /// `dyn Trait`; resolved via a definition factory or a proxy
    Interface,
}

// =============================================================================
// Constructors and members
// =============================================================================

/// One constructor of a concrete type.
#[derive(Clone)]
pub struct ConstructorDescriptor {
    params: Vec<Dependency>,
    injectable: bool,
    build: BuildFn,
}

impl ConstructorDescriptor {
    /// Parameters in declaration order
    #[inline]
    pub fn params(&self) -> &[Dependency] {
        &self.params
    }

    /// Number of parameters
    #[inline]
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Whether the constructor carries the injectable marker
    #[inline]
    pub fn is_injectable(&self) -> bool {
        self.injectable
    }

    /// Run the constructor, resolving parameters through `resolver`
    #[inline]
    pub fn invoke(&self, resolver: &mut BeanResolver<'_>) -> Result<Instance> {
        (self.build)(resolver)
    }
}

impl std::fmt::Debug for ConstructorDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConstructorDescriptor")
            .field("params", &self.params)
            .field("injectable", &self.injectable)
            .finish()
    }
}

/// Field or setter injection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    /// An [`Inject`] slot
    Field,
    /// A single-argument `&self` setter
    Setter,
}

/// An injectable field or setter.
#[derive(Clone)]
pub struct MemberDescriptor {
    name: &'static str,
    kind: MemberKind,
    dependency: Dependency,
    inject: InjectFn,
}

impl MemberDescriptor {
    /// Member name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Field or setter
    #[inline]
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    /// The dependency injected into this member
    #[inline]
    pub fn dependency(&self) -> &Dependency {
        &self.dependency
    }

    /// Resolve the dependency and inject it into `instance`
    #[inline]
    pub fn inject(&self, instance: &Instance, resolver: &mut BeanResolver<'_>) -> Result<()> {
        (self.inject)(instance, resolver)
    }
}

impl std::fmt::Debug for MemberDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemberDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("dependency", &self.dependency)
            .finish()
    }
}

// =============================================================================
// Methods
// =============================================================================

/// A bean-factory method on a configuration class.
#[derive(Clone)]
pub struct BeanMethod {
    returns: TypeKey,
    qualifier: Option<String>,
    primary: bool,
    params: Vec<Dependency>,
    invoke: BeanMethodFn,
}

impl BeanMethod {
    /// Type the method produces
    #[inline]
    pub fn returns(&self) -> TypeKey {
        self.returns
    }

    /// Explicit qualifier, if one was given
    #[inline]
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// Whether the produced bean is primary
    #[inline]
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Parameters resolved from the context
    #[inline]
    pub fn params(&self) -> &[Dependency] {
        &self.params
    }

    /// Call the method on a configuration instance
    #[inline]
    pub fn invoke(&self, configuration: &Instance, resolver: &mut BeanResolver<'_>) -> Result<Instance> {
        (self.invoke)(configuration, resolver)
    }
}

/// A method registered as a global method handler.
#[derive(Clone)]
pub struct HandlerMethod {
    scope: HandlerScope,
    create: HandlerFactoryFn,
}

impl HandlerMethod {
    /// Which invocations the handler is offered
    #[inline]
    pub fn scope(&self) -> &HandlerScope {
        &self.scope
    }

    /// Create the handler
    #[inline]
    pub fn create(&self) -> Arc<dyn MethodHandler> {
        (self.create)()
    }
}

#[derive(Clone)]
pub(crate) enum MethodBody {
    Plain,
    BeanFactory(BeanMethod),
    Handler(HandlerMethod),
}

/// A declared method and the markers it carries.
#[derive(Clone)]
pub struct MethodDescriptor {
    name: &'static str,
    declaring_type: TypeKey,
    markers: Vec<Marker>,
    pub(crate) body: MethodBody,
}

impl MethodDescriptor {
    /// A method with markers and no special role
    pub fn new(name: &'static str, declaring_type: TypeKey, markers: &[Marker]) -> Self {
        Self {
            name,
            declaring_type,
            markers: markers.to_vec(),
            body: MethodBody::Plain,
        }
    }

    /// Method name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type declaring the method
    #[inline]
    pub fn declaring_type(&self) -> TypeKey {
        self.declaring_type
    }

    /// Markers on the method
    #[inline]
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Whether the method carries `wanted`, directly or via meta-markers
    #[inline]
    pub fn has_marker(&self, wanted: &Marker) -> bool {
        marker::carries(&self.markers, wanted)
    }

    /// `Type::method`, for diagnostics
    pub fn identity(&self) -> String {
        format!("{}::{}", self.declaring_type.short_name(), self.name)
    }

    /// Bean-factory body, if this is a bean method
    pub fn bean_method(&self) -> Option<&BeanMethod> {
        match &self.body {
            MethodBody::BeanFactory(m) => Some(m),
            _ => None,
        }
    }

    /// Handler body, if this is a handler method
    pub fn handler_method(&self) -> Option<&HandlerMethod> {
        match &self.body {
            MethodBody::Handler(h) => Some(h),
            _ => None,
        }
    }

    /// Copy with extra markers merged in.
    ///
    /// A bean or handler body on either side survives over a plain one.
    pub(crate) fn merged_with(&self, other: &MethodDescriptor) -> MethodDescriptor {
        let mut merged = self.clone();
        for m in &other.markers {
            if !merged.markers.contains(m) {
                merged.markers.push(*m);
            }
        }
        if matches!(merged.body, MethodBody::Plain) {
            merged.body = other.body.clone();
        }
        merged
    }
}

impl std::fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let role = match &self.body {
            MethodBody::Plain => "plain",
            MethodBody::BeanFactory(_) => "bean",
            MethodBody::Handler(_) => "handler",
        };
        f.debug_struct("MethodDescriptor")
            .field("name", &self.identity())
            .field("markers", &self.markers)
            .field("role", &role)
            .finish()
    }
}

// =============================================================================
// TypeDescriptor
// =============================================================================

/// Everything the container knows about one type.
#[derive(Clone)]
pub struct TypeDescriptor {
    key: TypeKey,
    kind: TypeKind,
    markers: Vec<Marker>,
    qualifier: Option<String>,
    primary: bool,
    constructors: Vec<ConstructorDescriptor>,
    members: Vec<MemberDescriptor>,
    bindings: Vec<Binding>,
    methods: Vec<MethodDescriptor>,
    proxy: Option<ProxyFn>,
}

impl TypeDescriptor {
    /// Start describing a concrete type
    pub fn builder<T: Send + Sync + 'static>() -> DescriptorBuilder<T> {
        DescriptorBuilder::new(TypeKind::Concrete)
    }

    /// Start describing an interface (`dyn Trait`)
    pub fn interface<T: ?Sized + Send + Sync + 'static>() -> DescriptorBuilder<T> {
        DescriptorBuilder::new(TypeKind::Interface)
    }

    /// Type described
    #[inline]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// Concrete or interface
    #[inline]
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Whether this describes an interface
    #[inline]
    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    /// Class-level markers
    #[inline]
    pub fn markers(&self) -> &[Marker] {
        &self.markers
    }

    /// Whether the type carries `wanted`, directly or via meta-markers
    #[inline]
    pub fn has_marker(&self, wanted: &Marker) -> bool {
        marker::carries(&self.markers, wanted)
    }

    /// Default qualifier for definitions built from this type
    #[inline]
    pub fn qualifier(&self) -> Option<&str> {
        self.qualifier.as_deref()
    }

    /// Whether definitions built from this type are primary by default
    #[inline]
    pub fn is_primary(&self) -> bool {
        self.primary
    }

    /// Constructors in declaration order
    #[inline]
    pub fn constructors(&self) -> &[ConstructorDescriptor] {
        &self.constructors
    }

    /// Injectable members in declaration order
    #[inline]
    pub fn members(&self) -> &[MemberDescriptor] {
        &self.members
    }

    /// Requested types (other than itself) this type satisfies
    #[inline]
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    /// Whether instances can be seen as `key`
    pub fn is_assignable_to(&self, key: &TypeKey) -> bool {
        self.key == *key || self.bindings.iter().any(|b| b.requested() == *key)
    }

    /// Declared methods
    #[inline]
    pub fn methods(&self) -> &[MethodDescriptor] {
        &self.methods
    }

    /// Look up a declared method by name
    pub fn method(&self, name: &str) -> Option<&MethodDescriptor> {
        self.methods.iter().find(|m| m.name == name)
    }

    /// Whether a proxy constructor is registered
    #[inline]
    pub fn has_proxy(&self) -> bool {
        self.proxy.is_some()
    }

    pub(crate) fn proxy_fn(&self) -> Option<&ProxyFn> {
        self.proxy.as_ref()
    }

    /// Check the metadata is usable.
    ///
    /// Rejects concrete types with no constructor, interfaces with constructors,
    /// handler-marked methods without a handler body, and bean-marked methods
    /// without a factory body or outside a configuration class.
    pub fn validate(&self) -> Result<()> {
        let name = self.key.name();
        match self.kind {
            TypeKind::Concrete if self.constructors.is_empty() => {
                return Err(DiError::malformed(name, "concrete type declares no constructor"));
            }
            TypeKind::Interface if !self.constructors.is_empty() => {
                return Err(DiError::malformed(name, "interface declares a constructor"));
            }
            _ => {}
        }

        for method in &self.methods {
            let is_handler = method.has_marker(&marker::METHOD_HANDLER);
            let is_bean = method.has_marker(&marker::BEAN);
            match &method.body {
                MethodBody::Handler(_) if is_handler => {}
                MethodBody::BeanFactory(_) if is_bean => {
                    if !self.has_marker(&marker::CONFIGURATION) {
                        return Err(DiError::malformed(
                            name,
                            format!("bean method `{}` outside a configuration class", method.name),
                        ));
                    }
                }
                MethodBody::Plain if is_handler => {
                    return Err(DiError::malformed(
                        name,
                        format!("method `{}` is marked as a handler but has no handler signature", method.name),
                    ));
                }
                MethodBody::Plain if is_bean => {
                    return Err(DiError::malformed(
                        name,
                        format!("method `{}` is marked as a bean method but produces nothing", method.name),
                    ));
                }
                MethodBody::Plain => {}
                _ => {
                    return Err(DiError::malformed(
                        name,
                        format!("method `{}` lost its role marker", method.name),
                    ));
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .field("markers", &self.markers)
            .field("constructors", &self.constructors.len())
            .field("members", &self.members.len())
            .field("bindings", &self.bindings)
            .field("methods", &self.methods)
            .finish()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Fluent builder for a [`TypeDescriptor`].
pub struct DescriptorBuilder<T: ?Sized> {
    descriptor: TypeDescriptor,
    _type: PhantomData<fn(&T)>,
}

impl<T: ?Sized + Send + Sync + 'static> DescriptorBuilder<T> {
    fn new(kind: TypeKind) -> Self {
        Self {
            descriptor: TypeDescriptor {
                key: TypeKey::of::<T>(),
                kind,
                markers: Vec::new(),
                qualifier: None,
                primary: false,
                constructors: Vec::new(),
                members: Vec::new(),
                bindings: Vec::new(),
                methods: Vec::new(),
                proxy: None,
            },
            _type: PhantomData,
        }
    }

    /// Attach a class-level marker
    pub fn marker(mut self, marker: Marker) -> Self {
        if !self.descriptor.markers.contains(&marker) {
            self.descriptor.markers.push(marker);
        }
        self
    }

    /// Default qualifier for definitions of this type
    pub fn qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.descriptor.qualifier = Some(qualifier.into());
        self
    }

    /// Mark definitions of this type primary by default
    pub fn primary(mut self) -> Self {
        self.descriptor.primary = true;
        self
    }

    /// Declare that instances also satisfy requested type `R`
    pub fn implements<R, F>(mut self, coerce: F) -> Self
    where
        R: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<R> + Send + Sync + 'static,
    {
        self.descriptor.bindings.push(Binding::new::<R, T, F>(coerce));
        self
    }

    /// Declare a method and its markers
    pub fn method(mut self, name: &'static str, markers: &[Marker]) -> Self {
        let method = MethodDescriptor::new(name, self.descriptor.key, markers);
        self.push_method(method);
        self
    }

    /// Declare a bean-factory method; the qualifier defaults to the method name
    pub fn bean_method<R, D, F>(self, name: &'static str, method: F) -> Self
    where
        R: ?Sized + Send + Sync + 'static,
        D: Dependencies + 'static,
        F: Fn(&T, D) -> Arc<R> + Send + Sync + 'static,
    {
        self.bean_method_with(name, None, false, method)
    }

    /// Declare a bean-factory method with an explicit qualifier and primary flag
    pub fn bean_method_with<R, D, F>(
        mut self,
        name: &'static str,
        qualifier: Option<&str>,
        primary: bool,
        method: F,
    ) -> Self
    where
        R: ?Sized + Send + Sync + 'static,
        D: Dependencies + 'static,
        F: Fn(&T, D) -> Arc<R> + Send + Sync + 'static,
    {
        let declaring = self.descriptor.key;
        let invoke: BeanMethodFn = Arc::new(move |configuration, resolver| {
            let target = configuration.downcast::<T>().ok_or(DiError::TypeMismatch {
                expected: declaring.name(),
                actual: configuration.key().name(),
            })?;
            let deps = D::resolve(resolver)?;

            #[cfg(feature = "logging")]
            trace!(
                target: "bean_context",
                configuration = declaring.name(),
                method = name,
                "Invoking bean method"
            );

            Ok(Instance::of(method(&*target, deps)))
        });

        let mut descriptor = MethodDescriptor::new(name, declaring, &[marker::BEAN]);
        descriptor.body = MethodBody::BeanFactory(BeanMethod {
            returns: TypeKey::of::<R>(),
            qualifier: Some(qualifier.unwrap_or(name).to_owned()),
            primary,
            params: D::dependencies(),
            invoke,
        });
        self.push_method(descriptor);
        self
    }

    /// Declare a handler method; the handler is created once at discovery
    pub fn handler_method<F>(mut self, name: &'static str, scope: HandlerScope, create: F) -> Self
    where
        F: Fn() -> Arc<dyn MethodHandler> + Send + Sync + 'static,
    {
        let mut descriptor = MethodDescriptor::new(name, self.descriptor.key, &[marker::METHOD_HANDLER]);
        descriptor.body = MethodBody::Handler(HandlerMethod {
            scope,
            create: Arc::new(create),
        });
        self.push_method(descriptor);
        self
    }

    /// Register the delegating wrapper used to proxy this interface
    pub fn proxy<F>(mut self, wrap: F) -> Self
    where
        F: Fn(Proxy<T>) -> Arc<T> + Send + Sync + 'static,
    {
        self.descriptor.proxy = Some(Arc::new(move |parts: ProxyParts| {
            let proxy = Proxy::<T>::from_parts(parts)?;
            Ok(Instance::of(wrap(proxy)))
        }));
        self
    }

    /// Finish
    pub fn build(self) -> TypeDescriptor {
        self.descriptor
    }

    fn push_method(&mut self, method: MethodDescriptor) {
        match self.descriptor.methods.iter_mut().find(|m| m.name == method.name) {
            Some(existing) => {
                let merged = method.merged_with(existing);
                *existing = merged;
            }
            None => self.descriptor.methods.push(method),
        }
    }
}

impl<T: Send + Sync + 'static> DescriptorBuilder<T> {
    /// Add a constructor taking `D`
    pub fn constructor<D, F>(self, constructor: F) -> Self
    where
        D: Dependencies + 'static,
        F: Fn(D) -> T + Send + Sync + 'static,
    {
        self.push_constructor::<D, F>(false, constructor)
    }

    /// Add a constructor carrying the injectable marker
    pub fn injectable_constructor<D, F>(self, constructor: F) -> Self
    where
        D: Dependencies + 'static,
        F: Fn(D) -> T + Send + Sync + 'static,
    {
        self.push_constructor::<D, F>(true, constructor)
    }

    /// Add a constructor with an explicit parameter list (qualifiers, optionals)
    pub fn constructor_with<F>(mut self, params: Vec<Dependency>, injectable: bool, constructor: F) -> Self
    where
        F: Fn(&mut BeanResolver<'_>) -> Result<T> + Send + Sync + 'static,
    {
        self.descriptor.constructors.push(ConstructorDescriptor {
            params,
            injectable,
            build: Arc::new(move |resolver| constructor(resolver).map(|t| Instance::of(Arc::new(t)))),
        });
        self
    }

    /// Inject an [`Inject`] field after construction
    pub fn field<D, F>(mut self, name: &'static str, slot: F) -> Self
    where
        D: ?Sized + Send + Sync + 'static,
        F: Fn(&T) -> &Inject<D> + Send + Sync + 'static,
    {
        let dependency = Dependency::on::<D>();
        let inject = self.member_injector::<D, _>(dependency.clone(), move |this, value| {
            slot(this).set(value);
        });
        self.descriptor.members.push(MemberDescriptor {
            name,
            kind: MemberKind::Field,
            dependency,
            inject,
        });
        self
    }

    /// Inject through a single-argument setter after construction
    pub fn setter<D, F>(mut self, name: &'static str, setter: F) -> Self
    where
        D: ?Sized + Send + Sync + 'static,
        F: Fn(&T, Arc<D>) + Send + Sync + 'static,
    {
        let dependency = Dependency::on::<D>();
        let inject = self.member_injector::<D, _>(dependency.clone(), setter);
        self.descriptor.members.push(MemberDescriptor {
            name,
            kind: MemberKind::Setter,
            dependency,
            inject,
        });
        self
    }

    fn push_constructor<D, F>(mut self, injectable: bool, constructor: F) -> Self
    where
        D: Dependencies + 'static,
        F: Fn(D) -> T + Send + Sync + 'static,
    {
        self.descriptor.constructors.push(ConstructorDescriptor {
            params: D::dependencies(),
            injectable,
            build: Arc::new(move |resolver| {
                let deps = D::resolve(resolver)?;
                Ok(Instance::of(Arc::new(constructor(deps))))
            }),
        });
        self
    }

    fn member_injector<D, F>(&self, dependency: Dependency, apply: F) -> InjectFn
    where
        D: ?Sized + Send + Sync + 'static,
        F: Fn(&T, Arc<D>) + Send + Sync + 'static,
    {
        let owner = self.descriptor.key;
        Arc::new(move |instance, resolver| {
            let this = instance.downcast::<T>().ok_or(DiError::TypeMismatch {
                expected: owner.name(),
                actual: instance.key().name(),
            })?;
            if let Some(value) = resolver.resolve_typed::<D>(&dependency)? {
                apply(&*this, value);
            }
            Ok(())
        })
    }
}

// =============================================================================
// Resolution algorithm
// =============================================================================

/// Select the constructor used to build a type.
///
/// 1. Exactly one injectable constructor: use it.
/// 2. Otherwise the constructor with the most parameters, first declared on ties.
/// 3. Interfaces have no constructor.
pub fn resolve_constructor(descriptor: &TypeDescriptor) -> Result<&ConstructorDescriptor> {
    let no_constructor = || DiError::NoConstructor {
        type_name: descriptor.key.name(),
    };
    if descriptor.is_interface() {
        return Err(no_constructor());
    }

    let mut injectable = descriptor.constructors.iter().filter(|c| c.injectable);
    if let (Some(only), None) = (injectable.next(), injectable.next()) {
        return Ok(only);
    }

    // max_by_key keeps the last maximum, so fold to keep the first one
    descriptor
        .constructors
        .iter()
        .fold(None::<&ConstructorDescriptor>, |best, c| match best {
            Some(b) if b.arity() >= c.arity() => Some(b),
            _ => Some(c),
        })
        .ok_or_else(no_constructor)
}

/// Injectable fields and setters, in declaration order
#[inline]
pub fn resolve_injectable_members(descriptor: &TypeDescriptor) -> &[MemberDescriptor] {
    &descriptor.members
}

/// Build a raw instance through the selected constructor
pub(crate) fn instantiate(descriptor: &TypeDescriptor, resolver: &mut BeanResolver<'_>) -> Result<Instance> {
    let constructor = resolve_constructor(descriptor)?;

    #[cfg(feature = "logging")]
    trace!(
        target: "bean_context",
        service = descriptor.key.name(),
        arity = constructor.arity(),
        injectable = constructor.injectable,
        "Invoking constructor"
    );

    constructor.invoke(resolver)
}

/// Run field and setter injection on an already shared instance
pub(crate) fn inject_members(
    descriptor: &TypeDescriptor,
    instance: &Instance,
    resolver: &mut BeanResolver<'_>,
) -> Result<()> {
    for member in resolve_injectable_members(descriptor) {
        #[cfg(feature = "logging")]
        trace!(
            target: "bean_context",
            service = descriptor.key.name(),
            member = member.name,
            "Injecting member"
        );

        member.inject(instance, resolver)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ResolutionPath;
    use crate::resolver::DependencySource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Logger;
    struct Clock;

    struct Repository {
        logger: Option<Arc<Logger>>,
        clock: Inject<Clock>,
        ctor: &'static str,
    }

    struct Source;

    impl DependencySource for Source {
        fn resolve_dependency(&self, dep: &Dependency, _: &mut ResolutionPath) -> Result<Option<Instance>> {
            if dep.key == TypeKey::of::<Logger>() {
                Ok(Some(Instance::of(Arc::new(Logger))))
            } else if dep.key == TypeKey::of::<Clock>() {
                Ok(Some(Instance::of(Arc::new(Clock))))
            } else {
                Ok(None)
            }
        }
    }

    fn repository(logger: Option<Arc<Logger>>, ctor: &'static str) -> Repository {
        Repository {
            logger,
            clock: Inject::new(),
            ctor,
        }
    }

    fn build(descriptor: &TypeDescriptor) -> Arc<Repository> {
        let mut path = ResolutionPath::new();
        let mut resolver = BeanResolver::new(&Source, &mut path, descriptor.key());
        let instance = instantiate(descriptor, &mut resolver).unwrap();
        inject_members(descriptor, &instance, &mut resolver).unwrap();
        instance.downcast::<Repository>().unwrap()
    }

    #[test]
    fn test_greediest_constructor_wins() {
        let descriptor = TypeDescriptor::builder::<Repository>()
            .constructor(|()| repository(None, "empty"))
            .constructor(|logger: Arc<Logger>| repository(Some(logger), "logger"))
            .build();

        let repo = build(&descriptor);
        assert_eq!(repo.ctor, "logger");
        assert!(repo.logger.is_some());
    }

    #[test]
    fn test_ties_pick_first_declared() {
        let descriptor = TypeDescriptor::builder::<Repository>()
            .constructor(|logger: Arc<Logger>| repository(Some(logger), "first"))
            .constructor(|_clock: Arc<Clock>| repository(None, "second"))
            .build();

        assert_eq!(build(&descriptor).ctor, "first");
    }

    #[test]
    fn test_single_injectable_constructor_wins() {
        let descriptor = TypeDescriptor::builder::<Repository>()
            .constructor(|(logger, _clock): (Arc<Logger>, Arc<Clock>)| repository(Some(logger), "wide"))
            .injectable_constructor(|()| repository(None, "marked"))
            .build();

        assert_eq!(build(&descriptor).ctor, "marked");
    }

    #[test]
    fn test_two_injectable_constructors_fall_back_to_arity() {
        let descriptor = TypeDescriptor::builder::<Repository>()
            .injectable_constructor(|()| repository(None, "narrow"))
            .injectable_constructor(|logger: Arc<Logger>| repository(Some(logger), "wide"))
            .build();

        assert_eq!(build(&descriptor).ctor, "wide");
    }

    #[test]
    fn test_interface_has_no_constructor() {
        trait Store: Send + Sync {}
        let descriptor = TypeDescriptor::interface::<dyn Store>().build();
        assert!(matches!(
            resolve_constructor(&descriptor),
            Err(DiError::NoConstructor { .. })
        ));
    }

    #[test]
    fn test_field_and_setter_injection_run_in_order() {
        static SETTER_CALLS: AtomicUsize = AtomicUsize::new(0);

        let descriptor = TypeDescriptor::builder::<Repository>()
            .constructor(|()| repository(None, "empty"))
            .field("clock", |r: &Repository| &r.clock)
            .setter("set_logger", |_r: &Repository, _logger: Arc<Logger>| {
                SETTER_CALLS.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        let names: Vec<_> = resolve_injectable_members(&descriptor).iter().map(|m| m.name()).collect();
        assert_eq!(names, vec!["clock", "set_logger"]);
        assert_eq!(descriptor.members()[1].kind(), MemberKind::Setter);

        let repo = build(&descriptor);
        assert!(repo.clock.is_injected());
        assert_eq!(SETTER_CALLS.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_validate_rejects_missing_constructor() {
        let descriptor = TypeDescriptor::builder::<Repository>().build();
        assert!(matches!(descriptor.validate(), Err(DiError::MalformedMetadata { .. })));
    }

    #[test]
    fn test_validate_rejects_handler_marker_without_handler() {
        let descriptor = TypeDescriptor::builder::<Repository>()
            .constructor(|()| repository(None, "empty"))
            .method("audit", &[marker::METHOD_HANDLER])
            .build();
        let err = descriptor.validate().unwrap_err();
        assert!(err.to_string().contains("audit"));
    }

    #[test]
    fn test_validate_rejects_bean_method_outside_configuration() {
        let descriptor = TypeDescriptor::builder::<Repository>()
            .constructor(|()| repository(None, "empty"))
            .bean_method("clock", |_r: &Repository, ()| Arc::new(Clock))
            .build();
        assert!(descriptor.validate().is_err());

        let configuration = TypeDescriptor::builder::<Repository>()
            .marker(marker::CONFIGURATION)
            .constructor(|()| repository(None, "empty"))
            .bean_method("clock", |_r: &Repository, ()| Arc::new(Clock))
            .build();
        assert!(configuration.validate().is_ok());
        let method = configuration.method("clock").unwrap();
        assert_eq!(method.bean_method().unwrap().qualifier(), Some("clock"));
    }

    #[test]
    fn test_method_markers_merge() {
        const AUDITED: Marker = Marker::new("Audited");

        let descriptor = TypeDescriptor::builder::<Repository>()
            .constructor(|()| repository(None, "empty"))
            .method("save", &[AUDITED])
            .method("save", &[marker::TRANSACTIONAL])
            .build();

        let save = descriptor.method("save").unwrap();
        assert!(save.has_marker(&AUDITED));
        assert!(save.has_marker(&marker::TRANSACTIONAL));
        assert_eq!(descriptor.methods().len(), 1);
        assert_eq!(save.identity(), "Repository::save");
    }

    #[test]
    fn test_markers_added_after_bean_method_keep_its_body() {
        const CACHED: Marker = Marker::new("Cached");

        let descriptor = TypeDescriptor::builder::<Repository>()
            .marker(marker::CONFIGURATION)
            .constructor(|()| repository(None, "empty"))
            .bean_method("clock", |_r: &Repository, ()| Arc::new(Clock))
            .method("clock", &[CACHED])
            .build();

        assert!(descriptor.validate().is_ok());
        let clock = descriptor.method("clock").unwrap();
        assert!(clock.bean_method().is_some());
        assert!(clock.has_marker(&CACHED));
        assert!(clock.has_marker(&marker::BEAN));
    }
}
