//! Resolution path tracking
//!
//! A [`ResolutionPath`] is created per top-level resolve call and threaded through
//! every nested resolution, so cycle detection spans the whole object graph
//! without any global or thread-local state.

use crate::key::TypeKey;
use crate::storage::Instance;
use crate::{DiError, Result};

#[cfg(feature = "logging")]
use tracing::trace;

/// Ordered stack of the types currently being built.
///
/// Also records every raw instance cached during the walk, so a bean whose
/// member injection fails can be evicted together with whatever was built
/// on top of it.
#[derive(Debug, Default, Clone)]
pub struct ResolutionPath {
    stack: Vec<TypeKey>,
    cached: Vec<Instance>,
}

impl ResolutionPath {
    /// Create an empty path for a new top-level resolution
    #[inline]
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            cached: Vec::new(),
        }
    }

    /// Push `key`, failing with the cycle if it is already being built.
    ///
    /// The reported cycle runs from the first occurrence of `key` to the end of
    /// the path and closes with `key` again.
    pub fn enter(&mut self, key: TypeKey) -> Result<()> {
        if let Some(pos) = self.stack.iter().position(|k| *k == key) {
            let mut cycle: Vec<&'static str> = self.stack[pos..].iter().map(|k| k.name()).collect();
            cycle.push(key.name());
            return Err(DiError::CircularDependency {
                type_name: key.name(),
                cycle,
            });
        }

        #[cfg(feature = "logging")]
        trace!(
            target: "bean_context",
            service = key.name(),
            depth = self.stack.len(),
            "Entering resolution"
        );

        self.stack.push(key);
        Ok(())
    }

    /// Pop the most recently entered type
    #[inline]
    pub fn exit(&mut self) {
        self.stack.pop();
    }

    /// Whether `key` is currently being built
    #[inline]
    pub fn contains(&self, key: &TypeKey) -> bool {
        self.stack.contains(key)
    }

    /// Current nesting depth
    #[inline]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Whether nothing is being built
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }

    /// Types on the path, outermost first
    pub fn keys(&self) -> &[TypeKey] {
        &self.stack
    }

    /// Note a raw instance cached while this path was active
    #[inline]
    pub fn record(&mut self, instance: Instance) {
        self.cached.push(instance);
    }

    /// Position to roll back to
    #[inline]
    pub fn checkpoint(&self) -> usize {
        self.cached.len()
    }

    /// Instances cached since `checkpoint`, removed from the record
    pub fn rollback(&mut self, checkpoint: usize) -> Vec<Instance> {
        self.cached.split_off(checkpoint.min(self.cached.len()))
    }
}
