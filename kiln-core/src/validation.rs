//! Injection point validation.
//!
//! Checks, before the first `produce`, that every injection point of a
//! target has a binding. All unsatisfied points are reported at once,
//! each with "did you mean" suggestions drawn from the bound keys.

use std::collections::HashSet;

use kiln_support::rendering::{shorten_type_name, suggest_similar};
use tracing::{debug, instrument, warn};

use crate::error::{KilnError, MissingPoint, Result, UnsatisfiedPointsError};
use crate::key::{DependencyKey, TypeKey};
use crate::point::InjectionPoints;

const MAX_SUGGESTIONS: usize = 5;

/// Validates injection points against a set of available keys.
pub struct PointValidator {
    available: Vec<DependencyKey>,
    index: HashSet<DependencyKey>,
}

impl PointValidator {
    pub fn new(available: impl IntoIterator<Item = DependencyKey>) -> Self {
        let mut available: Vec<DependencyKey> = available.into_iter().collect();
        available.sort_by_key(|k| k.to_string());
        let index = available.iter().cloned().collect();
        Self { available, index }
    }

    /// Returns `Ok(())` if every point of `target` has a binding.
    ///
    /// # Errors
    /// [`KilnError::UnsatisfiedPoints`] listing each unbound point.
    #[instrument(skip_all, fields(target = %target), name = "point_validation")]
    pub fn validate(&self, target: TypeKey, points: &InjectionPoints) -> Result<()> {
        let missing: Vec<MissingPoint> = points
            .iter()
            .filter(|point| !self.index.contains(point.key()))
            .map(|point| MissingPoint {
                point: point.clone(),
                suggestions: self.find_similar_keys(point.key()),
            })
            .collect();

        if missing.is_empty() {
            debug!(points = points.len(), "Injection points validated ✓");
            return Ok(());
        }

        warn!(missing = missing.len(), "Unsatisfied injection points");
        Err(KilnError::UnsatisfiedPoints(UnsatisfiedPointsError {
            target,
            missing,
        }))
    }

    /// Bound keys related to `target`: the same type under another
    /// name, the same name with another type, or a similar type name.
    fn find_similar_keys(&self, target: &DependencyKey) -> Vec<DependencyKey> {
        let names: Vec<&str> = self.available.iter().map(DependencyKey::type_name).collect();
        let similar_names = suggest_similar(target.type_name(), &names, MAX_SUGGESTIONS);
        let target_short = shorten_type_name(target.type_name()).to_lowercase();

        let mut suggestions: Vec<DependencyKey> = Vec::new();
        for key in &self.available {
            let related = key.type_id() == target.type_id()
                || (key.name().is_some() && key.name() == target.name())
                || similar_names.iter().any(|name| name == key.type_name())
                || levenshtein_close(&target_short, &shorten_type_name(key.type_name()).to_lowercase());

            if related && key != target && !suggestions.contains(key) {
                suggestions.push(key.clone());
            }
        }
        suggestions.truncate(MAX_SUGGESTIONS);
        suggestions
    }
}

/// Checks `points` of `target` against `available` keys.
pub fn validate_points(
    target: TypeKey,
    points: &InjectionPoints,
    available: impl IntoIterator<Item = DependencyKey>,
) -> Result<()> {
    PointValidator::new(available).validate(target, points)
}

/// Quick "close enough" check between two names.
///
/// Not a full Levenshtein: counts positional matches and accepts at
/// least 60% agreement when lengths differ by three or less.
fn levenshtein_close(a: &str, b: &str) -> bool {
    let len_diff = a.len().abs_diff(b.len());
    if len_diff > 3 {
        return false;
    }

    let common: usize = a
        .chars()
        .zip(b.chars())
        .filter(|(ca, cb)| ca == cb)
        .count();

    let max_len = a.len().max(b.len());
    if max_len == 0 {
        return true;
    }

    common * 100 / max_len >= 60
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataModel, TypeDeclaration};

    #[derive(Default)]
    struct ConnectionPool;

    #[derive(Default)]
    struct Repository {
        url: String,
        retries: u32,
    }

    fn points() -> InjectionPoints {
        let declaration = TypeDeclaration::builder::<Repository>()
            .constructor([DependencyKey::of::<ConnectionPool>()], |_| Ok(Repository::default()))
            .inject_named_field("url", "db_url", |r: &mut Repository, v: String| r.url = v)
            .inject_field("retries", |r: &mut Repository, v: u32| r.retries = v)
            .build();
        let model = MetadataModel::builder().declare(declaration).build().unwrap();
        InjectionPoints::for_managed_type(&model.managed_type_of::<Repository>().unwrap())
    }

    #[test]
    fn all_points_bound() {
        let available = vec![
            DependencyKey::of::<ConnectionPool>(),
            DependencyKey::named::<String>("db_url"),
            DependencyKey::of::<u32>(),
        ];
        assert!(validate_points(TypeKey::of::<Repository>(), &points(), available).is_ok());
    }

    #[test]
    fn reports_every_missing_point() {
        let available = vec![
            DependencyKey::of::<ConnectionPool>(),
            DependencyKey::named::<String>("database_url"),
        ];
        let result = validate_points(TypeKey::of::<Repository>(), &points(), available);

        match result {
            Err(KilnError::UnsatisfiedPoints(e)) => {
                assert_eq!(e.missing.len(), 2);
                assert_eq!(e.missing[0].point.owner().name(), "url");
                assert_eq!(
                    e.missing[0].suggestions,
                    vec![DependencyKey::named::<String>("database_url")]
                );
                assert_eq!(e.missing[1].point.key(), &DependencyKey::of::<u32>());

                let msg = e.to_string();
                assert!(msg.contains("2 injection point(s)"));
                assert!(msg.contains("Did you mean"));
            }
            other => panic!("Expected UnsatisfiedPoints, got: {other:?}"),
        }
    }

    #[test]
    fn similar_type_names_are_suggested() {
        struct ConnectionPools;
        let available = vec![DependencyKey::of::<ConnectionPools>()];
        let validator = PointValidator::new(available);

        let suggestions = validator.find_similar_keys(&DependencyKey::of::<ConnectionPool>());
        assert_eq!(suggestions, vec![DependencyKey::of::<ConnectionPools>()]);
    }

    #[test]
    fn levenshtein_close_check() {
        assert!(levenshtein_close("userservice", "userservise"));
        assert!(levenshtein_close("database", "databse"));
        assert!(!levenshtein_close("database", "logger"));
    }
}
