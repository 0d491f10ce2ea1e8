//! Provider trait: a module of related declarations and bindings.
//!
//! Providers group the types and values of one area of an application
//! so the engine can be assembled from independent pieces.
//!
//! # Examples
//! ```rust
//! use kiln_core::prelude::*;
//! use kiln_core::member::Value;
//! use kiln_core::provider::{Provider, ProviderRegistry};
//!
//! #[derive(Default)]
//! struct Pool {
//!     url: String,
//! }
//!
//! struct StorageProvider;
//!
//! impl Provider for StorageProvider {
//!     fn register(&self, registry: &mut dyn ProviderRegistry) {
//!         registry.declare_type(
//!             TypeDeclaration::builder::<Pool>()
//!                 .default_constructor()
//!                 .inject_field("url", |p: &mut Pool, v: String| p.url = v)
//!                 .build(),
//!         );
//!         registry.bind_value(
//!             DependencyKey::of::<String>(),
//!             Box::new(|| -> Value { Box::new(String::from("postgres://localhost")) }),
//!         );
//!     }
//! }
//!
//! let engine = Engine::builder().add_provider(&StorageProvider).build().unwrap();
//! let pool: Pool = engine.create::<Pool>().unwrap();
//! assert_eq!(pool.url, "postgres://localhost");
//! ```

use std::sync::Arc;

use crate::bindings::{BindingFn, BindingKind};
use crate::context::InitializationContext;
use crate::error::BoxError;
use crate::key::DependencyKey;
use crate::member::Value;
use crate::metadata::TypeDeclaration;

/// A module that contributes declarations and bindings to an engine.
pub trait Provider: Send + Sync {
    /// Called once while the engine is being assembled.
    fn register(&self, registry: &mut dyn ProviderRegistry);

    /// Human-readable name for log output.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// The side of the engine builder that providers see.
pub trait ProviderRegistry {
    /// Adds a type to the metadata model.
    fn declare_type(&mut self, declaration: TypeDeclaration);

    /// Adds a binding to the engine's bindings.
    fn bind(&mut self, key: DependencyKey, kind: BindingKind, factory: BindingFn);

    /// Binds a value produced by `make` on every resolve.
    fn bind_value(&mut self, key: DependencyKey, make: Box<dyn Fn() -> Value + Send + Sync>) {
        self.bind(
            key,
            BindingKind::Value,
            Arc::new(move |_: &InitializationContext| -> Result<Value, BoxError> { Ok(make()) }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Mock registry for testing providers
    #[derive(Default)]
    struct MockRegistry {
        declared: Vec<&'static str>,
        bound: Vec<(DependencyKey, BindingKind)>,
    }

    impl ProviderRegistry for MockRegistry {
        fn declare_type(&mut self, declaration: TypeDeclaration) {
            self.declared.push(declaration.key().type_name());
        }

        fn bind(&mut self, key: DependencyKey, kind: BindingKind, _factory: BindingFn) {
            self.bound.push((key, kind));
        }
    }

    #[derive(Default)]
    struct Mailer;

    struct MailProvider;

    impl Provider for MailProvider {
        fn register(&self, registry: &mut dyn ProviderRegistry) {
            registry.declare_type(TypeDeclaration::builder::<Mailer>().default_constructor().build());
            registry.bind(
                DependencyKey::named::<String>("smtp_host"),
                BindingKind::Lazy,
                Arc::new(|_: &InitializationContext| -> Result<Value, BoxError> {
                    Ok(Box::new(String::from("localhost")))
                }),
            );
            registry.bind_value(DependencyKey::of::<u16>(), Box::new(|| -> Value { Box::new(25u16) }));
        }
    }

    #[test]
    fn provider_declares_and_binds() {
        let mut registry = MockRegistry::default();
        MailProvider.register(&mut registry);

        assert_eq!(registry.declared.len(), 1);
        assert!(registry.declared[0].contains("Mailer"));
        assert_eq!(registry.bound.len(), 2);
        assert_eq!(registry.bound[1], (DependencyKey::of::<u16>(), BindingKind::Value));
    }

    #[test]
    fn provider_has_name() {
        assert!(MailProvider.name().contains("MailProvider"));
    }
}
