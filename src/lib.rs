//! # Bean Context - Bean Definitions, Lifecycle and Interception
//!
//! A dependency-injection runtime for plugin hosts: types describe their own
//! injection metadata, are discovered by namespace, registered as bean
//! definitions and realized as singletons by a [`Context`] that walks a fixed
//! sequence of lifecycle phases.
//!
//! ## Features
//!
//! - **Self-describing types** - [`Introspect`] builds a [`TypeDescriptor`] with
//!   constructors, injectable members, interfaces and markers
//! - **Discovery** - `component!` registers types at link time; scans pick up
//!   everything in a namespace, including meta-marked components
//! - **Qualifiers and primaries** - several definitions per type, resolved
//!   by name or by a primary flag
//! - **Cycle detection** - constructor cycles fail with the full path; field
//!   cycles resolve
//! - **Interception** - interface proxies route calls through ordered
//!   [`MethodHandler`](proxy::MethodHandler)s
//! - **Observable** - optional tracing integration with JSON or pretty output
//!
//! ## Quick Start
//!
//! ```rust
//! use bean_context::{marker, BeanDefinition, Context, Introspect, TypeDescriptor};
//! use std::sync::Arc;
//!
//! trait Store: Send + Sync {
//!     fn name(&self) -> &str;
//! }
//!
//! struct MemoryStore;
//! impl Store for MemoryStore {
//!     fn name(&self) -> &str { "memory" }
//! }
//!
//! struct Service { store: Arc<dyn Store> }
//!
//! impl Introspect for Service {
//!     fn describe() -> TypeDescriptor {
//!         TypeDescriptor::builder::<Service>()
//!             .marker(marker::SERVICE)
//!             .constructor(|store: Arc<dyn Store>| Service { store })
//!             .build()
//!     }
//! }
//!
//! let context = Context::builder().use_inventory(false).build();
//! context
//!     .register_bean(
//!         BeanDefinition::instance(Arc::new(MemoryStore))
//!             .implements(|s: Arc<MemoryStore>| s as Arc<dyn Store>),
//!     )
//!     .unwrap();
//! context.register_component::<Service>().unwrap();
//! context.init().unwrap();
//!
//! let service = context.require_bean::<Service>().unwrap();
//! assert_eq!(service.store.name(), "memory");
//! ```
//!
//! ## Layers
//!
//! - [`Container`] - a plain type-keyed container without qualifiers or phases
//! - [`BeanDefinitionRegistry`] / [`BeanInstanceRegistry`] - definitions and
//!   their realized instances
//! - [`Context`] - the lifecycle driving both

mod configuration;
mod container;
mod context;
mod definition;
mod discovery;
mod error;
mod factory;
mod key;
#[cfg(feature = "logging")]
pub mod logging;
pub mod marker;
mod metadata;
mod path;
mod provider;
pub mod proxy;
mod resolver;
mod storage;

pub use configuration::*;
pub use container::*;
pub use context::*;
pub use definition::*;
pub use discovery::*;
pub use error::*;
pub use factory::*;
pub use key::*;
pub use metadata::*;
pub use path::*;
pub use provider::*;
pub use resolver::*;
pub use storage::*;

#[cfg(feature = "derive")]
pub use bean_context_derive::Component;

// Used by `component!`
#[doc(hidden)]
pub use inventory;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::marker::{self, Marker};
    pub use crate::proxy::{Arguments, HandlerScope, MethodHandler, Proxy};
    pub use crate::{
        BeanDefinition, BeanResolver, Binding, Context, ContextReadyListener, DefinitionsReadyListener, DiError,
        Inject, Introspect, Module, Phase, Result, TypeDescriptor, component,
    };
    pub use std::sync::Arc;

    #[cfg(feature = "derive")]
    pub use crate::Component;
}
