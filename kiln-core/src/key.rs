//! Type and dependency identification keys.
//!
//! [`TypeKey`] identifies a managed type. [`DependencyKey`] describes
//! what an injection point requires: a [`TypeId`] plus an optional
//! placeholder name for points that ask for a named value.

use std::any::{TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};

use kiln_support::rendering::shorten_type_name;

/// Identity of a managed type.
///
/// Equality and hashing use the [`TypeId`] only; the name is kept for
/// messages.
#[derive(Clone, Copy)]
pub struct TypeKey {
    type_id: TypeId,
    type_name: &'static str,
}

impl TypeKey {
    /// Creates a key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
        }
    }

    /// Returns the [`TypeId`] of this type.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the fully qualified type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the type name without module paths.
    pub fn short_name(&self) -> String {
        shorten_type_name(self.type_name)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.type_name)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.type_name)
    }
}

/// Describes the value an injection point requires.
///
/// # Examples
/// ```
/// use kiln_core::key::DependencyKey;
///
/// let key = DependencyKey::of::<String>();
/// assert_eq!(key.type_name(), "alloc::string::String");
/// assert_eq!(key.name(), None);
///
/// // Named placeholder value
/// let key = DependencyKey::named::<String>("database_url");
/// assert_eq!(key.name(), Some("database_url"));
/// ```
#[derive(Clone)]
pub struct DependencyKey {
    type_id: TypeId,
    type_name: &'static str,
    name: Option<&'static str>,
}

impl DependencyKey {
    /// Creates a key for type `T`.
    #[inline]
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: None,
        }
    }

    /// Creates a key for a named placeholder value of type `T`.
    ///
    /// ```
    /// use kiln_core::key::DependencyKey;
    ///
    /// let primary = DependencyKey::named::<String>("primary_db");
    /// let replica = DependencyKey::named::<String>("replica_db");
    /// assert_ne!(primary, replica);
    /// ```
    #[inline]
    pub fn named<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            name: Some(name),
        }
    }

    /// Returns the [`TypeId`] of the required value.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Returns the human-readable type name.
    #[inline]
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Returns the placeholder name, if any.
    #[inline]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }
}

impl PartialEq for DependencyKey {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.name == other.name
    }
}

impl Eq for DependencyKey {}

impl Hash for DependencyKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
        self.name.hash(state);
    }
}

impl fmt::Debug for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "DependencyKey({}, name={:?})", self.type_name, name),
            None => write!(f, "DependencyKey({})", self.type_name),
        }
    }
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name {
            Some(name) => write!(f, "{} (name={:?})", self.type_name, name),
            None => write!(f, "{}", self.type_name),
        }
    }
}
