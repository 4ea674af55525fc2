//! Configuration class access
//!
//! Bean methods of a configuration class are registered as lazily-resolved
//! definitions. Calling one through a [`ConfigurationProxy`] returns the
//! context's cached bean instead of running the method again.

use crate::context::Context;
use crate::key::TypeKey;
use crate::metadata::TypeDescriptor;
use crate::{DiError, Result};
use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A configuration bean whose bean methods route through the context.
pub struct ConfigurationProxy<C> {
    configuration: Arc<C>,
    descriptor: Arc<TypeDescriptor>,
    context: Context,
}

impl<C: Send + Sync + 'static> ConfigurationProxy<C> {
    pub(crate) fn new(configuration: Arc<C>, descriptor: Arc<TypeDescriptor>, context: Context) -> Self {
        Self {
            configuration,
            descriptor,
            context,
        }
    }

    /// The bean produced by bean method `method`.
    ///
    /// Every call returns the same instance; the method body runs at most
    /// once per context.
    pub fn bean<R: ?Sized + 'static>(&self, method: &'static str) -> Result<Arc<R>> {
        let bean = self
            .descriptor
            .method(method)
            .and_then(|m| m.bean_method())
            .ok_or_else(|| DiError::NoImplementation {
                method: format!("{}::{}", self.descriptor.key().short_name(), method),
            })?;

        let expected = TypeKey::of::<R>();
        if bean.returns() != expected {
            return Err(DiError::TypeMismatch {
                expected: expected.name(),
                actual: bean.returns().name(),
            });
        }

        match bean.qualifier() {
            Some(qualifier) => self.context.require_bean_named::<R>(qualifier),
            None => self.context.require_bean::<R>(),
        }
    }

    /// The configuration instance itself
    #[inline]
    pub fn instance(&self) -> &Arc<C> {
        &self.configuration
    }
}

impl<C> Deref for ConfigurationProxy<C> {
    type Target = C;

    fn deref(&self) -> &C {
        &self.configuration
    }
}

impl<C> fmt::Debug for ConfigurationProxy<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigurationProxy")
            .field("type", &self.descriptor.key().name())
            .field("context", &self.context.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::marker;
    use crate::metadata::Introspect;
    use crate::provider::ComponentRegistration;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    struct Pool {
        size: usize,
    }

    struct Settings {
        size: usize,
    }

    impl Introspect for Settings {
        fn describe() -> TypeDescriptor {
            TypeDescriptor::builder::<Settings>()
                .marker(marker::CONFIGURATION)
                .constructor(|()| Settings { size: 4 })
                .bean_method("pool", |s: &Settings, ()| {
                    CALLS.fetch_add(1, Ordering::SeqCst);
                    Arc::new(Pool { size: s.size })
                })
                .build()
        }
    }

    #[test]
    fn test_bean_method_runs_once() {
        let ctx = Context::builder()
            .use_inventory(false)
            .namespace("config")
            .component(ComponentRegistration::of::<Settings>("config"))
            .build();
        ctx.init().unwrap();

        let settings = ctx.configuration::<Settings>().unwrap();
        assert_eq!(settings.size, 4);

        let first = settings.bean::<Pool>("pool").unwrap();
        let second = settings.bean::<Pool>("pool").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&first, &ctx.require_bean::<Pool>().unwrap()));
        assert_eq!(first.size, 4);
        assert_eq!(CALLS.load(Ordering::SeqCst), 1);

        assert!(matches!(settings.bean::<Pool>("missing"), Err(DiError::NoImplementation { .. })));
        assert!(matches!(settings.bean::<Settings>("pool"), Err(DiError::TypeMismatch { .. })));
    }
}
