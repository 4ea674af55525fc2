//! Declarative markers
//!
//! Markers stand in for annotations. A marker may itself be tagged with other
//! markers (meta-markers), so a custom `SERVICE` marker tagged with
//! [`COMPONENT`] makes every type carrying it a component.

use std::fmt;

/// A named marker attached to a type, constructor or method.
#[derive(Clone, Copy)]
pub struct Marker {
    name: &'static str,
    meta: &'static [Marker],
}

impl Marker {
    /// A plain marker
    pub const fn new(name: &'static str) -> Self {
        Self { name, meta: &[] }
    }

    /// A marker tagged with other markers
    pub const fn tagged(name: &'static str, meta: &'static [Marker]) -> Self {
        Self { name, meta }
    }

    /// Marker name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Markers this marker is tagged with
    #[inline]
    pub fn meta(&self) -> &'static [Marker] {
        self.meta
    }

    /// True if this marker is `other`, or is tagged with it at any depth
    pub fn is(&self, other: &Marker) -> bool {
        self == other || self.meta.iter().any(|m| m.is(other))
    }
}

impl PartialEq for Marker {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Marker {}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)
    }
}

impl fmt::Display for Marker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.name)
    }
}

/// True if any marker in `markers` is (or is tagged with) `wanted`
pub fn carries(markers: &[Marker], wanted: &Marker) -> bool {
    markers.iter().any(|m| m.is(wanted))
}

/// Managed component; discovered and registered as a bean
pub const COMPONENT: Marker = Marker::new("Component");

/// Service-layer component
pub const SERVICE: Marker = Marker::tagged("Service", &[COMPONENT]);

/// Configuration class whose bean-factory methods define beans
pub const CONFIGURATION: Marker = Marker::tagged("Configuration", &[COMPONENT]);

/// Bean-factory method on a configuration class
pub const BEAN: Marker = Marker::new("Bean");

/// Method registered as a global method handler
pub const METHOD_HANDLER: Marker = Marker::new("MethodHandler");

/// Injectable constructor, field or setter
pub const INJECT: Marker = Marker::new("Inject");

/// Method wrapped in a transactional/resource boundary
pub const TRANSACTIONAL: Marker = Marker::new("Transactional");
