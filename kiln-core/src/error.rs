//! Error types for Kiln operations.
//!
//! Every error names the member, injection point or type involved so a
//! failure can be traced back to the declaration that caused it.

use std::fmt;

use crate::key::{DependencyKey, TypeKey};
use crate::member::MemberId;
use crate::phase::Phase;
use crate::point::InjectionPoint;
use crate::target::TeardownReport;

/// Boxed cause carried by failures raised inside user-supplied code.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for all Kiln operations.
#[derive(Debug, thiserror::Error)]
pub enum KilnError {
    /// A type could not be described (setup-time failure).
    #[error("{}", .0)]
    MetadataUnavailable(MetadataUnavailableError),

    /// The resolver could not supply a value for an injection point.
    #[error(transparent)]
    UnresolvedDependency(UnresolvedDependencyError),

    /// A constructor, field setter or method failed.
    #[error("Failed to invoke {member} during {phase} on {instance}: {source}")]
    TargetInvocation {
        member: MemberId,
        /// Runtime type of the instance (the managed type for constructors)
        instance: &'static str,
        phase: Phase,
        #[source]
        source: BoxError,
    },

    /// One or more pre-destroy hooks failed.
    #[error("{}", .0)]
    TeardownFailed(TeardownReport),

    /// A binding for the same key already exists.
    #[error("{}", .0)]
    AlreadyBound(AlreadyBoundError),

    /// Injection points that no binding can satisfy.
    #[error("{}", .0)]
    UnsatisfiedPoints(UnsatisfiedPointsError),

    /// An instance does not fit the managed type: a produced instance
    /// asked for as another type, or an unrelated instance handed to
    /// `inject`.
    #[error("Type mismatch: {expected} is not compatible with {managed}")]
    TypeMismatch {
        managed: TypeKey,
        expected: &'static str,
    },
}

impl KilnError {
    pub(crate) fn metadata(type_name: &'static str, reason: impl Into<String>) -> Self {
        KilnError::MetadataUnavailable(MetadataUnavailableError {
            type_name,
            reason: reason.into(),
        })
    }

    /// Returns the member this error is about, if any.
    pub fn member(&self) -> Option<&MemberId> {
        match self {
            KilnError::UnresolvedDependency(e) => Some(e.point.owner()),
            KilnError::TargetInvocation { member, .. } => Some(member),
            _ => None,
        }
    }
}

/// Error when a type cannot be introspected.
#[derive(Debug)]
pub struct MetadataUnavailableError {
    pub type_name: &'static str,
    pub reason: String,
}

impl fmt::Display for MetadataUnavailableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Metadata unavailable for {}: {}", self.type_name, self.reason)?;
        write!(
            f,
            "\n  Hint: Declare the type with TypeDeclaration::builder::<{}>() before building the model",
            self.type_name
        )
    }
}

/// Error when an injection point cannot be satisfied.
#[derive(Debug)]
pub struct UnresolvedDependencyError {
    /// The point that could not be satisfied
    pub point: InjectionPoint,
    /// Failure reported by the resolver, if it raised one
    pub source: Option<BoxError>,
}

impl fmt::Display for UnresolvedDependencyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unresolved dependency: {}", self.point)?;
        write!(f, "\n  Required by: {}", self.point.owner())?;
        if let Some(ref source) = self.source {
            write!(f, "\n  Cause: {source}")?;
        }
        write!(f, "\n  Hint: Bind a value for {}", self.point.key())
    }
}

impl std::error::Error for UnresolvedDependencyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn std::error::Error + 'static))
    }
}

/// Error when trying to bind a key that already exists.
#[derive(Debug)]
pub struct AlreadyBoundError {
    pub key: DependencyKey,
}

impl fmt::Display for AlreadyBoundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dependency already bound: {}", self.key)?;
        write!(
            f,
            "\n  Hint: Enable allow_override(true) to replace an existing binding"
        )
    }
}

/// A point that failed validation, with near-miss keys.
#[derive(Debug)]
pub struct MissingPoint {
    pub point: InjectionPoint,
    pub suggestions: Vec<DependencyKey>,
}

/// Error listing every injection point without a binding.
#[derive(Debug)]
pub struct UnsatisfiedPointsError {
    pub target: TypeKey,
    pub missing: Vec<MissingPoint>,
}

impl fmt::Display for UnsatisfiedPointsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} injection point(s) of {} cannot be satisfied:",
            self.missing.len(),
            self.target
        )?;
        for missing in &self.missing {
            write!(f, "\n  - {}", missing.point)?;
            if !missing.suggestions.is_empty() {
                write!(f, "\n    Did you mean one of:")?;
                for suggestion in &missing.suggestions {
                    write!(f, "\n      - {suggestion}")?;
                }
            }
        }
        Ok(())
    }
}

/// Convenient Result type for Kiln operations.
pub type Result<T> = std::result::Result<T, KilnError>;
