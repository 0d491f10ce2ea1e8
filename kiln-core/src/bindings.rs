//! Bindings: a map-backed [`Resolver`].
//!
//! Maps each [`DependencyKey`] to a factory. Three kinds of binding are
//! supported:
//! - [`BindingKind::Value`]: a prepared value, cloned per resolve
//! - [`BindingKind::Lazy`]: built once on first resolve, cloned afterwards
//! - [`BindingKind::Fresh`]: built on every resolve
//!
//! ```
//! use kiln_core::bindings::Bindings;
//!
//! let bindings = Bindings::builder()
//!     .value(8080u16)
//!     .named_value("greeting", String::from("hello"))
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(bindings.len(), 2);
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use tracing::{debug, trace};

use crate::context::{InitializationContext, Resolver};
use crate::error::{AlreadyBoundError, BoxError, KilnError, Result};
use crate::key::DependencyKey;
use crate::member::Value;
use crate::point::InjectionPoint;

/// Type-erased factory behind one binding.
///
/// Receives the [`InitializationContext`] of the instance being built.
pub type BindingFn =
    Arc<dyn Fn(&InitializationContext) -> std::result::Result<Value, BoxError> + Send + Sync>;

/// How a binding produces its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKind {
    Value,
    Lazy,
    Fresh,
}

impl fmt::Display for BindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindingKind::Value => write!(f, "value"),
            BindingKind::Lazy => write!(f, "lazy"),
            BindingKind::Fresh => write!(f, "fresh"),
        }
    }
}

#[derive(Clone)]
pub(crate) struct Binding {
    pub key: DependencyKey,
    pub kind: BindingKind,
    pub factory: BindingFn,
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("key", &self.key)
            .field("kind", &self.kind)
            .finish()
    }
}

// ============================================================
// BindingsBuilder
// ============================================================

/// Collects bindings for [`Bindings`].
///
/// Duplicate keys are remembered and reported by
/// [`build`](BindingsBuilder::build) unless overriding is allowed.
#[derive(Debug, Default)]
pub struct BindingsBuilder {
    bindings: HashMap<DependencyKey, Binding>,
    duplicates: Vec<DependencyKey>,
    allow_override: bool,
}

impl BindingsBuilder {
    /// Allow later bindings to replace earlier ones for the same key.
    pub fn allow_override(mut self, allow: bool) -> Self {
        self.allow_override = allow;
        self
    }

    // ── Values ──

    /// Binds a prepared value; each resolve receives a clone.
    ///
    /// Use `Arc<T>` for cheap sharing.
    pub fn value<T: Clone + Send + Sync + 'static>(self, value: T) -> Self {
        self.value_for(DependencyKey::of::<T>(), value)
    }

    /// Binds a prepared value under a placeholder name.
    pub fn named_value<T: Clone + Send + Sync + 'static>(self, name: &'static str, value: T) -> Self {
        self.value_for(DependencyKey::named::<T>(name), value)
    }

    fn value_for<T: Clone + Send + Sync + 'static>(mut self, key: DependencyKey, value: T) -> Self {
        self.insert(
            key,
            BindingKind::Value,
            Arc::new(move |_: &InitializationContext| -> std::result::Result<Value, BoxError> {
                Ok(Box::new(value.clone()))
            }),
        );
        self
    }

    // ── Factories ──

    /// Binds a factory run once, on first resolve.
    ///
    /// A failing factory is retried on the next resolve.
    pub fn lazy<T, F>(mut self, factory: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&InitializationContext) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        let cell: Arc<OnceCell<T>> = Arc::new(OnceCell::new());
        self.insert(
            DependencyKey::of::<T>(),
            BindingKind::Lazy,
            Arc::new(move |context: &InitializationContext| -> std::result::Result<Value, BoxError> {
                let value = cell.get_or_try_init(|| factory(context))?;
                Ok(Box::new(value.clone()))
            }),
        );
        self
    }

    /// Binds a factory run on every resolve.
    pub fn fresh<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&InitializationContext) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.insert(
            DependencyKey::of::<T>(),
            BindingKind::Fresh,
            Arc::new(move |context: &InitializationContext| -> std::result::Result<Value, BoxError> {
                Ok(Box::new(factory(context)?))
            }),
        );
        self
    }

    /// Binds an already type-erased factory.
    pub fn raw(mut self, key: DependencyKey, kind: BindingKind, factory: BindingFn) -> Self {
        self.insert(key, kind, factory);
        self
    }

    pub(crate) fn insert(&mut self, key: DependencyKey, kind: BindingKind, factory: BindingFn) {
        if !self.allow_override && self.bindings.contains_key(&key) {
            self.duplicates.push(key);
            return;
        }

        debug!(key = %key, kind = %kind, "Bound dependency");
        self.bindings.insert(key.clone(), Binding { key, kind, factory });
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Freezes the bindings.
    ///
    /// # Errors
    /// [`KilnError::AlreadyBound`] for the first key bound twice without
    /// [`allow_override`](Self::allow_override).
    pub fn build(self) -> Result<Bindings> {
        if let Some(key) = self.duplicates.into_iter().next() {
            return Err(KilnError::AlreadyBound(AlreadyBoundError { key }));
        }
        Ok(Bindings {
            bindings: self.bindings,
        })
    }
}

// ============================================================
// Bindings
// ============================================================

/// Immutable map from [`DependencyKey`] to value factories.
pub struct Bindings {
    bindings: HashMap<DependencyKey, Binding>,
}

impl Bindings {
    pub fn builder() -> BindingsBuilder {
        BindingsBuilder::default()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn contains(&self, key: &DependencyKey) -> bool {
        self.bindings.contains_key(key)
    }

    pub fn kind(&self, key: &DependencyKey) -> Option<BindingKind> {
        self.bindings.get(key).map(|b| b.kind)
    }

    /// Every bound key.
    pub fn keys(&self) -> Vec<DependencyKey> {
        self.bindings.keys().cloned().collect()
    }

    /// Resolves `key` directly, outside of any injection point.
    pub fn get<T: Any>(&self, context: &InitializationContext) -> Option<T> {
        let binding = self.bindings.get(&DependencyKey::of::<T>())?;
        let value = (binding.factory)(context).ok()?;
        value.downcast::<T>().ok().map(|boxed| *boxed)
    }
}

impl Resolver for Bindings {
    fn resolve(
        &self,
        point: &InjectionPoint,
        context: &InitializationContext,
    ) -> std::result::Result<Option<Value>, BoxError> {
        let Some(binding) = self.bindings.get(point.key()) else {
            trace!(point = %point, "No binding");
            return Ok(None);
        };
        (binding.factory)(context).map(Some)
    }

    fn available_keys(&self) -> Option<Vec<DependencyKey>> {
        Some(self.keys())
    }
}

impl fmt::Debug for Bindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bindings")
            .field("bound", &self.bindings.len())
            .finish()
    }
}
