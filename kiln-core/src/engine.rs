//! # The Engine
//!
//! Assembles a metadata model, a resolver and target settings, then
//! hands out one shared [`InjectionTarget`] per managed type.
//!
//! # Architecture
//! ```text
//! EngineBuilder  ──build()──>  Engine
//!   declare()                    │
//!   value() / lazy() / fresh()   │ injection_target::<T>()   (cached)
//!   resolver()                   ▼
//!   add_provider()           InjectionTarget ──> produce / inject / post_construct / pre_destroy
//! ```
//!
//! # Examples
//! ```rust
//! use kiln_core::prelude::*;
//!
//! #[derive(Default)]
//! struct Greeter {
//!     greeting: String,
//!     ready: bool,
//! }
//!
//! let engine = Engine::builder()
//!     .declare(
//!         TypeDeclaration::builder::<Greeter>()
//!             .default_constructor()
//!             .inject_field("greeting", |g: &mut Greeter, v: String| g.greeting = v)
//!             .post_construct("ready", |g| {
//!                 g.ready = !g.greeting.is_empty();
//!                 Ok(())
//!             })
//!             .build(),
//!     )
//!     .value(String::from("hello"))
//!     .build()
//!     .expect("Failed to build engine");
//!
//! let greeter: Greeter = engine.create().expect("Failed to create");
//! assert_eq!(greeter.greeting, "hello");
//! assert!(greeter.ready);
//! ```

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info, instrument};

use crate::bindings::{BindingFn, BindingKind, Bindings, BindingsBuilder};
use crate::context::{InitializationContext, InjectionContextFactory, Resolver};
use crate::error::{BoxError, Result};
use crate::key::{DependencyKey, TypeKey};
use crate::member::Value;
use crate::metadata::{MetadataModel, MetadataModelBuilder, TypeDeclaration};
use crate::point::InjectionPoint;
use crate::provider::{Provider, ProviderRegistry};
use crate::settings::{TargetSettings, TeardownPolicy};
use crate::target::{InjectionTarget, TeardownReport};
use crate::validation::validate_points;

// ============================================================
// EngineBuilder
// ============================================================

/// Builds an [`Engine`].
///
/// Declarations, bindings and providers are collected here; the model
/// and bindings are validated by [`build()`](EngineBuilder::build).
#[derive(Default)]
pub struct EngineBuilder {
    model: MetadataModelBuilder,
    bindings: BindingsBuilder,
    resolver: Option<Arc<dyn Resolver>>,
    settings: TargetSettings,
}

impl EngineBuilder {
    fn new() -> Self {
        Self::default()
    }

    // ── Metadata ──

    /// Adds a managed type.
    pub fn declare(mut self, declaration: TypeDeclaration) -> Self {
        self.model.push(declaration);
        self
    }

    // ── Bindings ──

    /// Allow later bindings to replace earlier ones.
    pub fn allow_override(mut self, allow: bool) -> Self {
        self.bindings = self.bindings.allow_override(allow);
        self
    }

    /// Binds a prepared value, cloned per resolve.
    pub fn value<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.bindings = self.bindings.value(value);
        self
    }

    /// Binds a prepared value under a placeholder name.
    pub fn named_value<T: Clone + Send + Sync + 'static>(mut self, name: &'static str, value: T) -> Self {
        self.bindings = self.bindings.named_value(name, value);
        self
    }

    /// Binds a factory run once, on first resolve.
    pub fn lazy<T, F>(mut self, factory: F) -> Self
    where
        T: Clone + Send + Sync + 'static,
        F: Fn(&InitializationContext) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.bindings = self.bindings.lazy(factory);
        self
    }

    /// Binds a factory run on every resolve.
    pub fn fresh<T, F>(mut self, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&InitializationContext) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.bindings = self.bindings.fresh(factory);
        self
    }

    /// Consults `resolver` before the builder's own bindings.
    pub fn resolver(mut self, resolver: impl Resolver + 'static) -> Self {
        self.resolver = Some(Arc::new(resolver));
        self
    }

    // ── Settings ──

    pub fn settings(mut self, settings: TargetSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn teardown_policy(mut self, policy: TeardownPolicy) -> Self {
        self.settings.teardown = policy;
        self
    }

    // ── Provider modules ──

    /// Add a [`Provider`] module.
    pub fn add_provider(mut self, provider: &dyn Provider) -> Self {
        provider.register(&mut self);
        debug!(provider = provider.name(), "Registered provider");
        self
    }

    // ── Build ──

    /// Builds the engine.
    ///
    /// # Errors
    /// [`KilnError::MetadataUnavailable`](crate::error::KilnError::MetadataUnavailable)
    /// for an invalid model and
    /// [`KilnError::AlreadyBound`](crate::error::KilnError::AlreadyBound)
    /// for duplicate bindings.
    #[instrument(skip(self), name = "engine_build")]
    pub fn build(self) -> Result<Engine> {
        info!(
            declared = self.model.len(),
            bound = self.bindings.len(),
            custom_resolver = self.resolver.is_some(),
            "Building engine"
        );

        let model = Arc::new(self.model.build()?);
        let bindings = self.bindings.build()?;

        let resolver: Arc<dyn Resolver> = match self.resolver {
            Some(primary) => Arc::new(Layered {
                primary,
                fallback: bindings,
            }),
            None => Arc::new(bindings),
        };

        info!("Engine built successfully ✓");
        Ok(Engine {
            factory: InjectionContextFactory::new(resolver, Arc::clone(&model)),
            model,
            settings: self.settings,
            targets: DashMap::new(),
        })
    }
}

impl ProviderRegistry for EngineBuilder {
    fn declare_type(&mut self, declaration: TypeDeclaration) {
        self.model.push(declaration);
    }

    fn bind(&mut self, key: DependencyKey, kind: BindingKind, factory: BindingFn) {
        self.bindings.insert(key, kind, factory);
    }
}

impl fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("declared", &self.model.len())
            .field("bound", &self.bindings.len())
            .field("settings", &self.settings)
            .finish()
    }
}

// ═══════════════════════════════════════════
// Engine
// ═══════════════════════════════════════════

/// Immutable, thread-safe owner of the model, resolver and targets.
///
/// Created by [`EngineBuilder::build()`].
pub struct Engine {
    model: Arc<MetadataModel>,
    factory: InjectionContextFactory,
    settings: TargetSettings,
    targets: DashMap<TypeId, Arc<InjectionTarget>>,
}

impl Engine {
    /// Create a new builder.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn model(&self) -> &Arc<MetadataModel> {
        &self.model
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        self.factory.resolver()
    }

    pub fn settings(&self) -> &TargetSettings {
        &self.settings
    }

    /// The target for `T`, built on first request and shared afterwards.
    ///
    /// # Errors
    /// [`KilnError::MetadataUnavailable`](crate::error::KilnError::MetadataUnavailable)
    /// if `T` is undeclared or has no constructor.
    pub fn injection_target<T: Any>(&self) -> Result<Arc<InjectionTarget>> {
        let type_id = TypeId::of::<T>();
        if let Some(target) = self.targets.get(&type_id) {
            return Ok(Arc::clone(target.value()));
        }

        let managed = self.model.managed_type_of::<T>()?;
        let target = Arc::new(InjectionTarget::new(
            managed,
            self.factory.clone(),
            self.settings.clone(),
        )?);
        debug!(managed = %TypeKey::of::<T>(), "Cached injection target");

        Ok(Arc::clone(self.targets.entry(type_id).or_insert(target).value()))
    }

    /// A fresh context for building one `T`.
    pub fn new_context<T: Any>(&self) -> InitializationContext {
        InitializationContext::for_type::<T>()
    }

    /// Checks that the resolver can satisfy every injection point of `T`.
    ///
    /// Resolvers that cannot enumerate their keys pass unchecked.
    pub fn validate<T: Any>(&self) -> Result<()> {
        let target = self.injection_target::<T>()?;
        let Some(available) = self.resolver().available_keys() else {
            debug!(managed = %TypeKey::of::<T>(), "Resolver cannot list its keys; skipping validation");
            return Ok(());
        };
        validate_points(TypeKey::of::<T>(), target.injection_points(), available)
    }

    /// Produces, injects and initialises a `T`.
    pub fn create<T: Any>(&self) -> Result<T> {
        let target = self.injection_target::<T>()?;
        target.create_as::<T>(&self.new_context::<T>())
    }

    /// Runs `T`'s pre-destroy hooks on `instance`, then drops it.
    pub fn destroy<T: Any>(&self, mut instance: T) -> Result<TeardownReport> {
        let target = self.injection_target::<T>()?;
        target.pre_destroy(&mut instance)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("declared", &self.model.len())
            .field("targets", &self.targets.len())
            .field("settings", &self.settings)
            .finish()
    }
}

// ═══════════════════════════════════════════
// Layered resolver (internal)
// ═══════════════════════════════════════════

/// Tries a custom resolver first, then the builder's bindings.
struct Layered {
    primary: Arc<dyn Resolver>,
    fallback: Bindings,
}

impl Resolver for Layered {
    fn resolve(
        &self,
        point: &InjectionPoint,
        context: &InitializationContext,
    ) -> std::result::Result<Option<Value>, BoxError> {
        match self.primary.resolve(point, context)? {
            Some(value) => Ok(Some(value)),
            None => self.fallback.resolve(point, context),
        }
    }

    fn available_keys(&self) -> Option<Vec<DependencyKey>> {
        let mut keys = self.primary.available_keys()?;
        keys.extend(self.fallback.keys());
        Some(keys)
    }
}

// ═══════════════════════════════════════════
// Prelude
// ═══════════════════════════════════════════

pub mod prelude {
    pub use super::{Engine, EngineBuilder};
    pub use crate::bindings::{Bindings, BindingsBuilder};
    pub use crate::context::{InitializationContext, Resolver};
    pub use crate::error::{BoxError, KilnError, Result};
    pub use crate::key::{DependencyKey, TypeKey};
    pub use crate::member::{Arguments, Marker};
    pub use crate::metadata::{MetadataModel, MethodSpec, TypeDeclaration};
    pub use crate::phase::Phase;
    pub use crate::provider::Provider;
    pub use crate::settings::{TargetSettings, TeardownPolicy};
    pub use crate::target::{InjectionTarget, TeardownReport};
}

// ═══════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════
