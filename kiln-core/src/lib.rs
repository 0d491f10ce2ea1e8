//! Core lifecycle engine for Kiln.
//!
//! Describes managed types with an explicit [`MetadataModel`], computes
//! their injection points, and drives instances through
//! produce → inject → post-construct → pre-destroy with an
//! [`InjectionTarget`].

pub mod bindings;
pub mod context;
pub mod engine;
pub mod error;
pub mod key;
pub mod member;
pub mod metadata;
pub mod phase;
pub mod point;
pub mod provider;
pub mod settings;
pub mod target;
pub mod validation;

pub use engine::prelude;
pub use engine::{Engine, EngineBuilder};
pub use error::{KilnError, Result};
pub use key::{DependencyKey, TypeKey};
pub use metadata::{MetadataModel, TypeDeclaration};
pub use phase::Phase;
pub use target::InjectionTarget;
