//! Lifecycle phases of a managed instance.
//!
//! The engine does not track which phase an instance is in; callers
//! drive the phases in order. [`Phase`] labels errors and log spans so
//! a failure says where in the lifecycle it happened.
//!
//! # Ordering
//! Phases have a natural ordering:
//! `Produce < Inject < PostConstruct < PreDestroy`.
use std::fmt;

/// One step in the lifecycle of a managed instance.
///
/// # Examples
/// ```
/// use kiln_core::phase::Phase;
///
/// assert!(Phase::Produce < Phase::Inject);
/// assert_eq!(Phase::PostConstruct.to_string(), "post-construct");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// The constructor is resolved and invoked.
    Produce,

    /// Fields are assigned and injectable methods are invoked.
    Inject,

    /// Post-construct hooks run; the instance becomes usable afterwards.
    PostConstruct,

    /// Pre-destroy hooks release what the instance holds.
    PreDestroy,
}

impl Phase {
    #[inline]
    fn ordinal(&self) -> u8 {
        match self {
            Phase::Produce => 0,
            Phase::Inject => 1,
            Phase::PostConstruct => 2,
            Phase::PreDestroy => 3,
        }
    }
}

impl PartialOrd for Phase {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Phase {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.ordinal().cmp(&other.ordinal())
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Produce => write!(f, "produce"),
            Phase::Inject => write!(f, "inject"),
            Phase::PostConstruct => write!(f, "post-construct"),
            Phase::PreDestroy => write!(f, "pre-destroy"),
        }
    }
}
