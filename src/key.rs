//! Type keys and dependency descriptors
//!
//! A [`TypeKey`] identifies a requested or implementation type at runtime. It
//! works for unsized types too, so `dyn Trait` interfaces are first-class keys.

use std::any::TypeId;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Runtime identity of a type: its `TypeId` plus a readable name.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    /// Key for `T` (sized or not)
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// The underlying `TypeId`
    #[inline]
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Fully qualified type name
    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Last path segment of the type name, for compact diagnostics
    pub fn short_name(&self) -> &'static str {
        let base = self.name.split('<').next().unwrap_or(self.name);
        match base.rfind("::") {
            Some(pos) => &self.name[pos + 2..],
            None => self.name,
        }
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// One dependency of a constructor, member or factory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dependency {
    /// Requested type
    pub key: TypeKey,
    /// Qualifier narrowing the lookup
    pub qualifier: Option<String>,
    /// Absence resolves to `None` instead of failing
    pub optional: bool,
}

impl Dependency {
    /// Required, unqualified dependency on `T`
    #[inline]
    pub fn on<T: ?Sized + 'static>() -> Self {
        Self {
            key: TypeKey::of::<T>(),
            qualifier: None,
            optional: false,
        }
    }

    /// Required dependency on an already computed key
    #[inline]
    pub fn on_key(key: TypeKey) -> Self {
        Self {
            key,
            qualifier: None,
            optional: false,
        }
    }

    /// Narrow the lookup to a qualifier
    pub fn named(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// Mark the dependency optional
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

impl fmt::Display for Dependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.key)?;
        if let Some(q) = &self.qualifier {
            write!(f, " \"{q}\"")?;
        }
        if self.optional {
            f.write_str(" (optional)")?;
        }
        Ok(())
    }
}
