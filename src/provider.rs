//! Component registrations
//!
//! Each discoverable type contributes one [`ComponentRegistration`]: the
//! namespace (module path) it lives in and the function describing it.
//! Registrations are collected at link time with `inventory`, so a component
//! declared anywhere in the final binary is visible to discovery without a
//! central list.
//!
//! # Example
//!
//! ```rust
//! use bean_context::{component, marker, Introspect, TypeDescriptor};
//!
//! struct Clock;
//!
//! impl Introspect for Clock {
//!     fn describe() -> TypeDescriptor {
//!         TypeDescriptor::builder::<Clock>()
//!             .marker(marker::COMPONENT)
//!             .constructor(|()| Clock)
//!             .build()
//!     }
//! }
//!
//! component!(Clock);
//! ```

use crate::metadata::{Introspect, TypeDescriptor};

/// A discoverable type and the namespace it belongs to.
#[derive(Clone, Copy)]
pub struct ComponentRegistration {
    namespace: &'static str,
    describe: fn() -> TypeDescriptor,
}

impl ComponentRegistration {
    /// Create a registration; usable in `inventory::submit!`
    pub const fn new(namespace: &'static str, describe: fn() -> TypeDescriptor) -> Self {
        Self { namespace, describe }
    }

    /// Registration for `T` in `namespace`
    pub fn of<T: ?Sized + Introspect>(namespace: &'static str) -> Self {
        Self::new(namespace, T::describe)
    }

    /// Namespace the type was registered in
    #[inline]
    pub fn namespace(&self) -> &'static str {
        self.namespace
    }

    /// Build the type's descriptor
    #[inline]
    pub fn describe(&self) -> TypeDescriptor {
        (self.describe)()
    }

    /// Whether this registration lies in `scope` or one of its sub-namespaces
    #[inline]
    pub fn is_in(&self, scope: &str) -> bool {
        namespace_contains(scope, self.namespace)
    }
}

impl std::fmt::Debug for ComponentRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistration")
            .field("namespace", &self.namespace)
            .finish()
    }
}

inventory::collect!(ComponentRegistration);

/// Every registration linked into the binary.
///
/// Link order is not meaningful, so results are sorted by namespace.
pub fn registered_components() -> Vec<&'static ComponentRegistration> {
    let mut all: Vec<&'static ComponentRegistration> = inventory::iter::<ComponentRegistration>.into_iter().collect();
    all.sort_by_key(|r| r.namespace);
    all
}

/// `namespace` equals `scope` or is nested below it (`scope::...`)
pub fn namespace_contains(scope: &str, namespace: &str) -> bool {
    namespace
        .strip_prefix(scope)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

/// Register a type for discovery in the current module's namespace.
///
/// ```rust,ignore
/// component!(MyService);
/// component!(dyn MyRepository);
/// component!(MyService, namespace = "my_app::services");
/// ```
#[macro_export]
macro_rules! component {
    ($type:ty) => {
        $crate::inventory::submit! {
            $crate::ComponentRegistration::new(
                module_path!(),
                <$type as $crate::Introspect>::describe,
            )
        }
    };
    ($type:ty, namespace = $ns:expr) => {
        $crate::inventory::submit! {
            $crate::ComponentRegistration::new(
                $ns,
                <$type as $crate::Introspect>::describe,
            )
        }
    };
}
