//! Error types for bean resolution and context lifecycle

use crate::context::Phase;
use thiserror::Error;

/// Error raised by a method handler or a proxied implementation.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur while registering, discovering or resolving beans
#[derive(Error, Debug)]
pub enum DiError {
    /// A bean was required but no definition exists for it
    #[error("Bean not found: {type_name}{}", qualifier_suffix(.qualifier))]
    NotFound {
        type_name: &'static str,
        qualifier: Option<String>,
    },

    /// Circular dependency detected during resolution
    #[error("Circular dependency detected while resolving {type_name}: {}", .cycle.join(" -> "))]
    CircularDependency {
        type_name: &'static str,
        cycle: Vec<&'static str>,
    },

    /// Several definitions match an unqualified lookup and none (or more than one) is primary
    #[error("Ambiguous bean lookup for {type_name}: candidates [{}]", .candidates.join(", "))]
    Ambiguous {
        type_name: &'static str,
        candidates: Vec<String>,
    },

    /// The same implementation and qualifier were registered twice for one requested type
    #[error("Duplicate bean definition for {requested}: {implementation}{}", qualifier_suffix(.qualifier))]
    DuplicateDefinition {
        requested: &'static str,
        implementation: &'static str,
        qualifier: Option<String>,
    },

    /// An operation was attempted in a lifecycle phase that forbids it
    #[error("Cannot {operation} during phase {phase}")]
    PhaseViolation {
        operation: &'static str,
        phase: Phase,
    },

    /// The context has already left the phase a transition expected
    #[error("Context cannot move to {target}: currently in {current}")]
    InvalidTransition { current: Phase, target: Phase },

    /// A constructor or member dependency could not be satisfied
    #[error("Cannot resolve dependency {dependency} of {type_name}")]
    UnresolvableDependency {
        type_name: &'static str,
        dependency: String,
    },

    /// A concrete type declares no constructor
    #[error("No constructor available for {type_name}")]
    NoConstructor { type_name: &'static str },

    /// A constructor, factory or injection callback failed
    #[error("Failed to create bean {type_name}: {reason}")]
    CreationFailed {
        type_name: &'static str,
        reason: String,
    },

    /// An instance did not hold the type a binding expected
    #[error("Type mismatch: expected {expected}, found {actual}")]
    TypeMismatch {
        expected: &'static str,
        actual: &'static str,
    },

    /// Declarative metadata on a discovered type is unusable
    #[error("Malformed metadata on {type_name}: {reason}")]
    MalformedMetadata {
        type_name: &'static str,
        reason: String,
    },

    /// A target-less proxy method was called and no handler produced a result
    #[error("No handler or implementation for {method}")]
    NoImplementation { method: String },

    /// A handler returned a value of the wrong type for the invoked method
    #[error("Handler returned the wrong type for {method}: expected {expected}")]
    ReturnTypeMismatch {
        method: String,
        expected: &'static str,
    },

    /// A method handler (or the real implementation behind a proxy) failed
    #[error("Invocation of {method} failed: {source}")]
    HandlerFailed {
        method: String,
        #[source]
        source: HandlerError,
    },

    /// Internal error
    #[error("Internal DI error: {0}")]
    Internal(String),
}

fn qualifier_suffix(qualifier: &Option<String>) -> String {
    match qualifier {
        Some(name) => format!(" (qualifier \"{name}\")"),
        None => String::new(),
    }
}

impl DiError {
    /// Create a NotFound error for a type
    #[inline]
    pub fn not_found<T: ?Sized + 'static>(qualifier: Option<&str>) -> Self {
        Self::NotFound {
            type_name: std::any::type_name::<T>(),
            qualifier: qualifier.map(str::to_owned),
        }
    }

    /// Create a CreationFailed error
    #[inline]
    pub fn creation_failed<T: ?Sized + 'static>(reason: impl Into<String>) -> Self {
        Self::CreationFailed {
            type_name: std::any::type_name::<T>(),
            reason: reason.into(),
        }
    }

    /// Create a MalformedMetadata error
    #[inline]
    pub fn malformed(type_name: &'static str, reason: impl Into<String>) -> Self {
        Self::MalformedMetadata {
            type_name,
            reason: reason.into(),
        }
    }

    /// Create a PhaseViolation error
    #[inline]
    pub fn phase_violation(operation: &'static str, phase: Phase) -> Self {
        Self::PhaseViolation { operation, phase }
    }

    /// Whether this error is a configuration error (fatal, never retried)
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            Self::DuplicateDefinition { .. }
                | Self::Ambiguous { .. }
                | Self::PhaseViolation { .. }
                | Self::InvalidTransition { .. }
        )
    }

    /// Whether this error was raised while building the object graph
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Self::CircularDependency { .. }
                | Self::UnresolvableDependency { .. }
                | Self::NoConstructor { .. }
                | Self::CreationFailed { .. }
                | Self::TypeMismatch { .. }
        )
    }
}

/// Result type alias for DI operations
pub type Result<T> = std::result::Result<T, DiError>;
