//! Per-target behaviour switches.

use serde::{Deserialize, Serialize};

/// How `pre_destroy` reacts to a failing hook.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeardownPolicy {
    /// Run every hook, then report all failures together.
    #[default]
    BestEffort,

    /// Stop at the first failing hook; the rest are reported as skipped.
    FailFast,
}

/// Settings shared by every target an engine builds.
///
/// Deserializable so hosts can keep it in their own config files:
///
/// ```toml
/// teardown = "fail_fast"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetSettings {
    pub teardown: TeardownPolicy,
}

impl TargetSettings {
    pub fn with_teardown(mut self, teardown: TeardownPolicy) -> Self {
        self.teardown = teardown;
        self
    }
}
