//! Dependency resolution handles
//!
//! Constructors, setters and bean-factory methods never see the container
//! directly. They receive a [`BeanResolver`], which carries the active
//! [`ResolutionPath`] so nested lookups stay inside one cycle-checked graph walk.
//!
//! # Supported Dependency Types
//!
//! - `()` - No dependencies
//! - `Arc<T>` - Single required dependency (`T` may be `dyn Trait`)
//! - `(Arc<A>, Arc<B>, ...)` - Multiple dependencies (tuples up to 8)
//! - `Option<Arc<T>>` - Optional dependency

use crate::key::{Dependency, TypeKey};
use crate::path::ResolutionPath;
use crate::storage::Instance;
use crate::{DiError, Result};
use once_cell::sync::OnceCell;
use std::sync::Arc;

/// Anything that can look up a dependency while a graph is being built.
///
/// Implemented by [`Container`](crate::Container) (type-keyed) and
/// [`Context`](crate::Context) (definition-keyed, qualifier aware).
pub trait DependencySource: Send + Sync {
    /// Resolve `dependency`, returning `None` when nothing is registered for it.
    fn resolve_dependency(
        &self,
        dependency: &Dependency,
        path: &mut ResolutionPath,
    ) -> Result<Option<Instance>>;
}

/// Resolution handle passed to constructors, setters and factories.
pub struct BeanResolver<'a> {
    source: &'a dyn DependencySource,
    path: &'a mut ResolutionPath,
    requester: TypeKey,
}

impl<'a> BeanResolver<'a> {
    /// Create a resolver building `requester`
    pub fn new(source: &'a dyn DependencySource, path: &'a mut ResolutionPath, requester: TypeKey) -> Self {
        Self {
            source,
            path,
            requester,
        }
    }

    /// Type whose dependencies are being resolved
    #[inline]
    pub fn requester(&self) -> TypeKey {
        self.requester
    }

    /// Types currently being built
    #[inline]
    pub fn path(&self) -> &ResolutionPath {
        &*self.path
    }

    /// Resolve a dependency; a missing required dependency is an error.
    pub fn resolve(&mut self, dependency: &Dependency) -> Result<Option<Instance>> {
        match self.source.resolve_dependency(dependency, self.path)? {
            Some(instance) => Ok(Some(instance)),
            None if dependency.optional => Ok(None),
            None => Err(DiError::UnresolvableDependency {
                type_name: self.requester.name(),
                dependency: dependency.to_string(),
            }),
        }
    }

    /// Resolve a dependency and downcast it
    pub fn resolve_typed<T: ?Sized + 'static>(&mut self, dependency: &Dependency) -> Result<Option<Arc<T>>> {
        match self.resolve(dependency)? {
            Some(instance) => instance.downcast::<T>().map(Some).ok_or(DiError::TypeMismatch {
                expected: std::any::type_name::<T>(),
                actual: instance.key().name(),
            }),
            None => Ok(None),
        }
    }

    /// Required unqualified dependency
    #[inline]
    pub fn get<T: ?Sized + 'static>(&mut self) -> Result<Arc<T>> {
        self.required(&Dependency::on::<T>())
    }

    /// Required qualified dependency
    #[inline]
    pub fn get_named<T: ?Sized + 'static>(&mut self, qualifier: &str) -> Result<Arc<T>> {
        self.required(&Dependency::on::<T>().named(qualifier))
    }

    /// Optional unqualified dependency
    #[inline]
    pub fn try_get<T: ?Sized + 'static>(&mut self) -> Result<Option<Arc<T>>> {
        self.resolve_typed(&Dependency::on::<T>().optional())
    }

    fn required<T: ?Sized + 'static>(&mut self, dependency: &Dependency) -> Result<Arc<T>> {
        self.resolve_typed::<T>(dependency)?.ok_or_else(|| DiError::UnresolvableDependency {
            type_name: self.requester.name(),
            dependency: dependency.to_string(),
        })
    }
}

impl std::fmt::Debug for BeanResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BeanResolver")
            .field("requester", &self.requester)
            .field("depth", &self.path.depth())
            .finish()
    }
}

// =============================================================================
// Dependencies Trait - Constructor parameter lists
// =============================================================================

/// A constructor or factory parameter list.
pub trait Dependencies: Sized {
    /// Declared parameters, in order
    fn dependencies() -> Vec<Dependency>;

    /// Resolve every parameter
    fn resolve(resolver: &mut BeanResolver<'_>) -> Result<Self>;
}

// No dependencies
impl Dependencies for () {
    #[inline]
    fn dependencies() -> Vec<Dependency> {
        Vec::new()
    }

    #[inline]
    fn resolve(_resolver: &mut BeanResolver<'_>) -> Result<Self> {
        Ok(())
    }
}

// Single dependency
impl<T: ?Sized + 'static> Dependencies for Arc<T> {
    #[inline]
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::on::<T>()]
    }

    #[inline]
    fn resolve(resolver: &mut BeanResolver<'_>) -> Result<Self> {
        resolver.get::<T>()
    }
}

// Optional dependency
impl<T: ?Sized + 'static> Dependencies for Option<Arc<T>> {
    #[inline]
    fn dependencies() -> Vec<Dependency> {
        vec![Dependency::on::<T>().optional()]
    }

    #[inline]
    fn resolve(resolver: &mut BeanResolver<'_>) -> Result<Self> {
        resolver.try_get::<T>()
    }
}

// Tuple implementations (1-8 elements)
macro_rules! impl_dependencies_tuple {
    ($($T:ident),+) => {
        impl<$($T: ?Sized + 'static),+> Dependencies for ($(Arc<$T>,)+) {
            #[inline]
            fn dependencies() -> Vec<Dependency> {
                vec![$(Dependency::on::<$T>()),+]
            }

            #[inline]
            fn resolve(resolver: &mut BeanResolver<'_>) -> Result<Self> {
                Ok(($(resolver.get::<$T>()?,)+))
            }
        }
    };
}

impl_dependencies_tuple!(A);
impl_dependencies_tuple!(A, B);
impl_dependencies_tuple!(A, B, C);
impl_dependencies_tuple!(A, B, C, D);
impl_dependencies_tuple!(A, B, C, D, E);
impl_dependencies_tuple!(A, B, C, D, E, F);
impl_dependencies_tuple!(A, B, C, D, E, F, G);
impl_dependencies_tuple!(A, B, C, D, E, F, G, H);

// =============================================================================
// Inject - Late-bound field slot
// =============================================================================

/// A field filled after construction by member injection.
///
/// Field injection happens once the owning bean is already shared, so the slot
/// is write-once and lock-free to read.
pub struct Inject<T: ?Sized> {
    slot: OnceCell<Arc<T>>,
}

impl<T: ?Sized> Inject<T> {
    /// An empty slot
    pub const fn new() -> Self {
        Self {
            slot: OnceCell::new(),
        }
    }

    /// The injected value, if injection has run
    #[inline]
    pub fn get(&self) -> Option<Arc<T>> {
        self.slot.get().cloned()
    }

    /// Fill the slot; returns `false` if it was already filled
    #[inline]
    pub fn set(&self, value: Arc<T>) -> bool {
        self.slot.set(value).is_ok()
    }

    /// Whether the slot has been filled
    #[inline]
    pub fn is_injected(&self) -> bool {
        self.slot.get().is_some()
    }
}

impl<T: ?Sized + 'static> Inject<T> {
    /// The injected value, or `NotFound` if injection has not run
    pub fn require(&self) -> Result<Arc<T>> {
        self.get().ok_or_else(|| DiError::not_found::<T>(None))
    }
}

impl<T: ?Sized> Default for Inject<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: ?Sized> std::fmt::Debug for Inject<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inject")
            .field("injected", &self.is_injected())
            .finish()
    }
}
