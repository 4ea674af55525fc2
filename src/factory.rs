//! Bean sources and requested-type bindings
//!
//! A [`BeanSource`] says how a definition produces its raw instance. A
//! [`Binding`] says how that raw instance is seen through one requested type,
//! e.g. coercing `Arc<SqlRepository>` into `Arc<dyn Repository>`.

use crate::key::TypeKey;
use crate::metadata::TypeDescriptor;
use crate::resolver::BeanResolver;
use crate::storage::Instance;
use crate::{DiError, Result};
use std::sync::Arc;

#[cfg(feature = "logging")]
use tracing::trace;

/// Type-erased factory function
pub type FactoryFn = Arc<dyn Fn(&mut BeanResolver<'_>) -> Result<Instance> + Send + Sync>;

/// Type-erased coercion from a raw instance to a requested type
type CastFn = Arc<dyn Fn(&Instance) -> Option<Instance> + Send + Sync>;

// =============================================================================
// BeanSource
// =============================================================================

/// How a bean definition produces its instance.
#[derive(Clone)]
pub enum BeanSource {
    /// Pre-built instance supplied by the host
    Instance(Instance),
    /// Concrete type built through its descriptor (constructor + member injection)
    Type(Arc<TypeDescriptor>),
    /// Factory function, e.g. a configuration-class bean method
    Factory(FactoryFn),
    /// Interface with no implementation; the proxy is the only instance
    Proxy(Arc<TypeDescriptor>),
}

impl BeanSource {
    /// Wrap a factory closure returning `Arc<T>`
    pub fn factory<T, F>(factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&mut BeanResolver<'_>) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        BeanSource::Factory(Arc::new(move |resolver| {
            #[cfg(feature = "logging")]
            trace!(
                target: "bean_context",
                service = std::any::type_name::<T>(),
                "Invoking bean factory"
            );

            factory(resolver).map(Instance::of)
        }))
    }

    /// Descriptor backing this source, if any
    pub fn descriptor(&self) -> Option<&Arc<TypeDescriptor>> {
        match self {
            BeanSource::Type(d) | BeanSource::Proxy(d) => Some(d),
            BeanSource::Instance(_) | BeanSource::Factory(_) => None,
        }
    }

    /// Short label for diagnostics
    pub fn kind(&self) -> &'static str {
        match self {
            BeanSource::Instance(_) => "instance",
            BeanSource::Type(_) => "type",
            BeanSource::Factory(_) => "factory",
            BeanSource::Proxy(_) => "proxy",
        }
    }
}

impl std::fmt::Debug for BeanSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BeanSource::Instance(i) => f.debug_tuple("Instance").field(&i.key()).finish(),
            BeanSource::Type(d) => f.debug_tuple("Type").field(&d.key()).finish(),
            BeanSource::Factory(_) => f.write_str("Factory"),
            BeanSource::Proxy(d) => f.debug_tuple("Proxy").field(&d.key()).finish(),
        }
    }
}

// =============================================================================
// Binding
// =============================================================================

/// View of a raw instance through one requested type.
#[derive(Clone)]
pub struct Binding {
    requested: TypeKey,
    source: TypeKey,
    cast: CastFn,
}

impl Binding {
    /// Bind `T` instances to requested type `R` through `coerce`.
    ///
    /// ```rust
    /// use bean_context::Binding;
    /// use std::sync::Arc;
    ///
    /// trait Repository: Send + Sync {}
    /// struct SqlRepository;
    /// impl Repository for SqlRepository {}
    ///
    /// let binding = Binding::new(|r: Arc<SqlRepository>| r as Arc<dyn Repository>);
    /// assert_eq!(binding.requested().name(), std::any::type_name::<dyn Repository>());
    /// ```
    pub fn new<R, T, F>(coerce: F) -> Self
    where
        R: ?Sized + Send + Sync + 'static,
        T: ?Sized + Send + Sync + 'static,
        F: Fn(Arc<T>) -> Arc<R> + Send + Sync + 'static,
    {
        Self {
            requested: TypeKey::of::<R>(),
            source: TypeKey::of::<T>(),
            cast: Arc::new(move |instance| instance.downcast::<T>().map(|t| Instance::of(coerce(t)))),
        }
    }

    /// Bind `T` instances to `T` itself
    pub fn identity<T: ?Sized + Send + Sync + 'static>() -> Self {
        Self::identity_of(TypeKey::of::<T>())
    }

    /// Identity binding for an already computed key
    pub(crate) fn identity_of(key: TypeKey) -> Self {
        Self {
            requested: key,
            source: key,
            cast: Arc::new(|instance| Some(instance.clone())),
        }
    }

    /// Requested type this binding serves
    #[inline]
    pub fn requested(&self) -> TypeKey {
        self.requested
    }

    /// Raw instance type this binding accepts
    #[inline]
    pub fn source(&self) -> TypeKey {
        self.source
    }

    /// Whether this is the identity binding
    #[inline]
    pub fn is_identity(&self) -> bool {
        self.requested == self.source
    }

    /// Coerce a raw instance to the requested type
    pub fn apply(&self, instance: &Instance) -> Result<Instance> {
        (self.cast)(instance).ok_or(DiError::TypeMismatch {
            expected: self.source.name(),
            actual: instance.key().name(),
        })
    }
}

impl std::fmt::Debug for Binding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Binding")
            .field("requested", &self.requested)
            .field("source", &self.source)
            .finish()
    }
}
