//! Component discovery
//!
//! Scans a namespace for registered types and sorts what it finds into
//! components, proxyable interfaces, lazily-resolved bean methods (from
//! configuration classes) and method handlers. Scanning is cumulative:
//! scanning a namespace twice, or a type reachable from two scanned
//! namespaces, yields it only once.

use crate::marker;
use crate::metadata::{MethodDescriptor, TypeDescriptor};
use crate::provider::{self, ComponentRegistration};
use crate::Result;
use ahash::RandomState;
use dashmap::DashSet;
use std::any::TypeId;
use std::sync::{PoisonError, RwLock};

#[cfg(feature = "logging")]
use tracing::{debug, trace};

/// What one scan found.
#[derive(Debug, Default)]
pub struct Discovered {
    /// Concrete types carrying a component marker (directly or via meta-markers)
    pub components: Vec<TypeDescriptor>,
    /// Interfaces; proxy-only beans when they carry a component marker
    pub interfaces: Vec<TypeDescriptor>,
    /// Bean-factory methods of configuration classes
    pub bean_methods: Vec<MethodDescriptor>,
    /// Methods registering a method handler
    pub handlers: Vec<MethodDescriptor>,
}

impl Discovered {
    /// Whether nothing was found
    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
            && self.interfaces.is_empty()
            && self.bean_methods.is_empty()
            && self.handlers.is_empty()
    }
}

/// Namespace-scoped discovery over explicit and link-time registrations.
pub struct ComponentDiscovery {
    local: RwLock<Vec<ComponentRegistration>>,
    use_inventory: bool,
    scanned: DashSet<String, RandomState>,
    seen: DashSet<TypeId, RandomState>,
}

impl ComponentDiscovery {
    /// Create a discovery over explicit registrations, plus `inventory` ones if asked
    pub fn new(use_inventory: bool) -> Self {
        Self {
            local: RwLock::new(Vec::new()),
            use_inventory,
            scanned: DashSet::with_hasher(RandomState::new()),
            seen: DashSet::with_hasher(RandomState::new()),
        }
    }

    /// Add an explicit registration
    pub fn add(&self, registration: ComponentRegistration) {
        self.local
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(registration);
    }

    /// Whether `namespace` was already scanned
    pub fn is_scanned(&self, namespace: &str) -> bool {
        self.scanned.contains(namespace)
    }

    /// Scan `namespace` and everything below it.
    ///
    /// Already scanned namespaces and already seen types contribute nothing.
    /// Fails on the first type with malformed metadata, in which case neither
    /// the namespace nor any of its types count as scanned.
    pub fn discover(&self, namespace: &str) -> Result<Discovered> {
        let mut found = Discovered::default();
        if self.scanned.contains(namespace) {
            #[cfg(feature = "logging")]
            trace!(
                target: "bean_context",
                namespace,
                "Namespace already scanned"
            );
            return Ok(found);
        }

        let mut described = Vec::new();
        for registration in self.candidates(namespace) {
            let descriptor = registration.describe();
            descriptor.validate()?;
            described.push((registration, descriptor));
        }

        if !self.scanned.insert(namespace.to_owned()) {
            return Ok(found);
        }
        for (registration, descriptor) in described {
            if !self.seen.insert(descriptor.key().id()) {
                continue;
            }

            #[cfg(feature = "logging")]
            trace!(
                target: "bean_context",
                namespace = registration.namespace(),
                service = descriptor.key().name(),
                markers = ?descriptor.markers(),
                "Discovered type"
            );
            #[cfg(not(feature = "logging"))]
            let _ = registration;

            classify(descriptor, &mut found);
        }

        #[cfg(feature = "logging")]
        debug!(
            target: "bean_context",
            namespace,
            components = found.components.len(),
            interfaces = found.interfaces.len(),
            bean_methods = found.bean_methods.len(),
            handlers = found.handlers.len(),
            "Namespace scanned"
        );

        Ok(found)
    }

    /// Forget scanned namespaces, seen types and explicit registrations
    pub fn clear(&self) {
        self.scanned.clear();
        self.seen.clear();
        self.local.write().unwrap_or_else(PoisonError::into_inner).clear();
    }

    fn candidates(&self, namespace: &str) -> Vec<ComponentRegistration> {
        let mut candidates: Vec<ComponentRegistration> = self
            .local
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.is_in(namespace))
            .copied()
            .collect();

        if self.use_inventory {
            candidates.extend(
                provider::registered_components()
                    .into_iter()
                    .filter(|r| r.is_in(namespace))
                    .copied(),
            );
        }
        candidates
    }
}

impl std::fmt::Debug for ComponentDiscovery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentDiscovery")
            .field("use_inventory", &self.use_inventory)
            .field("scanned", &self.scanned.len())
            .field("seen", &self.seen.len())
            .finish()
    }
}

fn classify(descriptor: TypeDescriptor, found: &mut Discovered) {
    for method in descriptor.methods() {
        if method.handler_method().is_some() {
            found.handlers.push(method.clone());
        } else if method.bean_method().is_some() && descriptor.has_marker(&marker::CONFIGURATION) {
            found.bean_methods.push(method.clone());
        }
    }

    if descriptor.is_interface() {
        found.interfaces.push(descriptor);
    } else if descriptor.has_marker(&marker::COMPONENT) {
        found.components.push(descriptor);
    }
}
