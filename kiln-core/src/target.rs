//! # InjectionTarget
//!
//! Drives one managed type through its lifecycle:
//!
//! ```text
//! produce() ──> inject() ──> post_construct() ── ... ── pre_destroy()
//!  constructor   fields,       hooks, in order           hooks, in order
//!                methods
//! ```
//!
//! Everything the target needs is computed when it is created: the
//! injection points, the constructor, and both hook lists. A target is
//! immutable afterwards and may be shared between threads; each call
//! works on the instance handed to it.

use std::any::{Any, type_name};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use kiln_support::rendering::{OutcomeEntry, render_outcomes};
use tracing::{debug, instrument, trace, warn};

use crate::context::{InitializationContext, InjectionContextFactory};
use crate::error::{KilnError, Result};
use crate::key::TypeKey;
use crate::member::{Arguments, ConstructorDescriptor, Instance, MemberId, MethodDescriptor};
use crate::metadata::ManagedType;
use crate::phase::Phase;
use crate::point::{InjectionPoint, InjectionPoints};
use crate::settings::{TargetSettings, TeardownPolicy};

/// Lifecycle driver for one managed type.
pub struct InjectionTarget {
    managed: Arc<ManagedType>,
    factory: InjectionContextFactory,
    points: InjectionPoints,
    constructor: Arc<ConstructorDescriptor>,
    post_construct: Vec<Arc<MethodDescriptor>>,
    pre_destroy: Vec<Arc<MethodDescriptor>>,
    settings: TargetSettings,
}

impl InjectionTarget {
    /// Prepares a target for `managed`.
    ///
    /// # Errors
    /// [`KilnError::MetadataUnavailable`] if the type declares no
    /// constructor.
    pub fn new(
        managed: Arc<ManagedType>,
        factory: InjectionContextFactory,
        settings: TargetSettings,
    ) -> Result<Self> {
        let key = managed.key();
        let constructor = managed
            .constructor()
            .cloned()
            .ok_or_else(|| KilnError::metadata(key.type_name(), "no constructor declared"))?;

        let points = InjectionPoints::for_managed_type(&managed);
        let post_construct: Vec<_> = managed.post_construct_methods().cloned().collect();
        let pre_destroy: Vec<_> = managed.pre_destroy_methods().cloned().collect();

        debug!(
            managed = %key,
            points = points.len(),
            post_construct = post_construct.len(),
            pre_destroy = pre_destroy.len(),
            "Prepared injection target"
        );

        Ok(Self {
            managed,
            factory,
            points,
            constructor,
            post_construct,
            pre_destroy,
            settings,
        })
    }

    #[inline]
    pub fn managed_type(&self) -> &Arc<ManagedType> {
        &self.managed
    }

    pub fn settings(&self) -> &TargetSettings {
        &self.settings
    }

    /// Every injection point of the managed type.
    pub fn injection_points(&self) -> &InjectionPoints {
        &self.points
    }

    /// Post-construct hooks, in the order they run.
    pub fn post_construct_hooks(&self) -> &[Arc<MethodDescriptor>] {
        &self.post_construct
    }

    /// Pre-destroy hooks, in the order they run.
    pub fn pre_destroy_hooks(&self) -> &[Arc<MethodDescriptor>] {
        &self.pre_destroy
    }

    // ── Produce ──

    /// Resolves the constructor's points and invokes it exactly once.
    ///
    /// No instance exists if any point fails to resolve.
    #[instrument(skip_all, fields(managed = %self.managed.key(), context = context.id()))]
    pub fn produce(&self, context: &InitializationContext) -> Result<Instance> {
        let points: Vec<&InjectionPoint> = self.points.for_member(self.constructor.id()).collect();
        let instance = self
            .factory
            .for_constructor(&self.constructor, points)
            .invoke(context)?;

        debug!("Produced instance");
        Ok(instance)
    }

    /// [`produce`](Self::produce) and downcast to `T`.
    pub fn produce_as<T: Any>(&self, context: &InitializationContext) -> Result<T> {
        let instance = self.produce(context)?;
        self.downcast(instance)
    }

    // ── Inject ──

    /// Injects fields, then methods, into `instance`.
    ///
    /// `instance` may be the managed type or any declared subtype. Only
    /// members whose declaring type is assignable from the runtime type
    /// take part. Each method runs at most once per call, after override
    /// dispatch. Mutations made before a failure are kept.
    ///
    /// # Errors
    /// - [`KilnError::MetadataUnavailable`] if the runtime type was never
    ///   declared.
    /// - [`KilnError::TypeMismatch`] if it is declared but is neither the
    ///   managed type nor one of its subtypes.
    #[instrument(skip_all, fields(managed = %self.managed.key(), context = context.id()))]
    pub fn inject(&self, instance: &mut dyn Any, context: &InitializationContext) -> Result<()> {
        let model = self.factory.model();
        let runtime = (*instance).type_id();
        let runtime_type = model.managed_type(runtime)?;
        if !runtime_type.is_subtype_of(self.managed.key()) {
            return Err(KilnError::TypeMismatch {
                managed: self.managed.key(),
                expected: runtime_type.key().type_name(),
            });
        }

        for point in &self.points {
            let Some(field) = point.member().as_field() else {
                continue;
            };
            if !model.is_assignable(field.id().declaring().type_id(), runtime) {
                trace!(member = %field.id(), "Field not visible on runtime type");
                continue;
            }
            self.factory
                .for_field(field, point, &mut *instance)
                .invoke(context)?;
        }

        let mut invoked: HashSet<MemberId> = HashSet::new();

        for point in &self.points {
            let Some(method) = point.member().as_method() else {
                continue;
            };
            if method.is_producer() || method.is_disposer() {
                continue;
            }
            if !model.is_assignable(method.id().declaring().type_id(), runtime) {
                continue;
            }
            let dispatched = model.dispatch(method, runtime);
            if !invoked.insert(dispatched.id().clone()) {
                continue;
            }
            // An override without the inject marker withdraws the method.
            if !dispatched.is_injectable() || dispatched.is_producer() || dispatched.is_disposer() {
                trace!(member = %dispatched.id(), "Override is not injectable");
                continue;
            }

            let owned: Vec<&InjectionPoint> = self.points.for_member(method.id()).collect();
            self.factory
                .for_method(method, owned, &mut *instance)
                .invoke(context)?;
        }

        // Zero-argument inject methods own no points; take them from the
        // runtime type so subtype additions are included.
        for method in runtime_type.methods() {
            let eligible = method.is_injectable()
                && method.parameters().is_empty()
                && !method.is_producer()
                && !method.is_disposer();
            if !eligible || !invoked.insert(method.id().clone()) {
                continue;
            }
            self.factory
                .for_method(method, Vec::new(), &mut *instance)
                .invoke(context)?;
        }

        debug!(methods = invoked.len(), "Injected instance");
        Ok(())
    }

    // ── Lifecycle hooks ──

    /// Runs every post-construct hook in order, stopping at the first
    /// failure.
    #[instrument(skip_all, fields(managed = %self.managed.key()))]
    pub fn post_construct(&self, instance: &mut dyn Any) -> Result<()> {
        for hook in &self.post_construct {
            self.run_hook(hook, &mut *instance, Phase::PostConstruct)?;
        }
        Ok(())
    }

    /// Runs the pre-destroy hooks in order.
    ///
    /// With [`TeardownPolicy::BestEffort`] every hook runs; with
    /// [`TeardownPolicy::FailFast`] the first failure stops the rest.
    ///
    /// # Errors
    /// [`KilnError::TeardownFailed`] carrying the full report if any hook
    /// failed.
    #[instrument(skip_all, fields(managed = %self.managed.key(), policy = ?self.settings.teardown))]
    pub fn pre_destroy(&self, instance: &mut dyn Any) -> Result<TeardownReport> {
        let mut report = TeardownReport::new(self.managed.key());
        let mut hooks = self.pre_destroy.iter();

        for hook in hooks.by_ref() {
            let result = self.run_hook(hook, &mut *instance, Phase::PreDestroy);
            let failed = result.is_err();
            if let Err(ref e) = result {
                warn!(hook = %hook.id(), error = %e, "Pre-destroy hook failed");
            }
            report.outcomes.push(HookOutcome {
                hook: hook.id().clone(),
                result,
            });

            if failed && self.settings.teardown == TeardownPolicy::FailFast {
                break;
            }
        }
        report.skipped.extend(hooks.map(|hook| hook.id().clone()));

        if report.has_failures() {
            return Err(KilnError::TeardownFailed(report));
        }
        Ok(report)
    }

    fn run_hook(&self, hook: &Arc<MethodDescriptor>, instance: &mut dyn Any, phase: Phase) -> Result<()> {
        let model = self.factory.model();
        let runtime = (*instance).type_id();
        let target = model.dispatch(hook, runtime);

        trace!(hook = %target.id(), %phase, "Running lifecycle hook");
        model
            .invoke_method(&target, instance, &mut Arguments::default())
            .map_err(|source| KilnError::TargetInvocation {
                member: target.id().clone(),
                instance: model.type_name(runtime),
                phase,
                source,
            })
    }

    // ── Whole lifecycle ──

    /// Produces, injects and initialises a new instance.
    pub fn create(&self, context: &InitializationContext) -> Result<Instance> {
        let mut instance = self.produce(context)?;
        self.inject(&mut *instance, context)?;
        self.post_construct(&mut *instance)?;
        Ok(instance)
    }

    /// [`create`](Self::create) and downcast to `T`.
    pub fn create_as<T: Any>(&self, context: &InitializationContext) -> Result<T> {
        let instance = self.create(context)?;
        self.downcast(instance)
    }

    /// Runs the pre-destroy hooks, then drops the instance.
    pub fn destroy(&self, mut instance: Instance) -> Result<TeardownReport> {
        self.pre_destroy(&mut *instance)
    }

    fn downcast<T: Any>(&self, instance: Instance) -> Result<T> {
        instance
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| KilnError::TypeMismatch {
                managed: self.managed.key(),
                expected: type_name::<T>(),
            })
    }
}

impl fmt::Debug for InjectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionTarget")
            .field("managed", &self.managed.key())
            .field("points", &self.points.len())
            .field("post_construct", &self.post_construct.len())
            .field("pre_destroy", &self.pre_destroy.len())
            .field("settings", &self.settings)
            .finish()
    }
}

// ═══════════════════════════════════════════
// TeardownReport
// ═══════════════════════════════════════════

/// Result of one pre-destroy hook.
#[derive(Debug)]
pub struct HookOutcome {
    pub hook: MemberId,
    pub result: Result<()>,
}

/// What happened during `pre_destroy`.
#[derive(Debug)]
pub struct TeardownReport {
    target: TypeKey,
    outcomes: Vec<HookOutcome>,
    skipped: Vec<MemberId>,
}

impl TeardownReport {
    fn new(target: TypeKey) -> Self {
        Self {
            target,
            outcomes: Vec::new(),
            skipped: Vec::new(),
        }
    }

    pub fn target(&self) -> TypeKey {
        self.target
    }

    /// One entry per hook that ran, in run order.
    pub fn outcomes(&self) -> &[HookOutcome] {
        &self.outcomes
    }

    /// Hooks not run because an earlier one failed under fail-fast.
    pub fn skipped(&self) -> &[MemberId] {
        &self.skipped
    }

    pub fn failures(&self) -> impl Iterator<Item = (&MemberId, &KilnError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (&o.hook, e)))
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

impl fmt::Display for TeardownReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let failed = self.failures().count();
        write!(
            f,
            "Teardown of {} failed: {failed} of {} hook(s) raised an error",
            self.target,
            self.outcomes.len() + self.skipped.len()
        )?;

        let mut entries: Vec<OutcomeEntry> = self
            .outcomes
            .iter()
            .map(|outcome| OutcomeEntry {
                status: if outcome.result.is_ok() { "ok" } else { "failed" }.to_string(),
                member: outcome.hook.to_string(),
                cause: outcome.result.as_ref().err().map(|e| match e {
                    KilnError::TargetInvocation { source, .. } => source.to_string(),
                    other => other.to_string(),
                }),
            })
            .collect();
        entries.extend(self.skipped.iter().map(|hook| OutcomeEntry {
            status: "skipped".to_string(),
            member: hook.to_string(),
            cause: None,
        }));

        write!(f, "\n{}", render_outcomes(&entries).trim_end())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Resolver;
    use crate::error::BoxError;
    use crate::key::DependencyKey;
    use crate::member::Value;
    use crate::metadata::{MetadataModel, TypeDeclaration};

    #[derive(Default)]
    struct Cache {
        capacity: usize,
        log: Vec<&'static str>,
    }

    fn resolver() -> Arc<dyn Resolver> {
        Arc::new(|point: &InjectionPoint, _: &InitializationContext| {
            if *point.key() == DependencyKey::of::<usize>() {
                Ok::<Option<Value>, BoxError>(Some(Box::new(64usize)))
            } else {
                Ok(None)
            }
        })
    }

    fn target(declaration: TypeDeclaration, settings: TargetSettings) -> InjectionTarget {
        let model = Arc::new(MetadataModel::builder().declare(declaration).build().unwrap());
        let managed = model.managed_type_of::<Cache>().unwrap();
        InjectionTarget::new(managed, InjectionContextFactory::new(resolver(), model), settings).unwrap()
    }

    fn cache_declaration() -> TypeDeclaration {
        TypeDeclaration::builder::<Cache>()
            .default_constructor()
            .inject_field("capacity", |c: &mut Cache, v: usize| c.capacity = v)
            .post_construct("warm", |c| {
                c.log.push("warm");
                Ok(())
            })
            .pre_destroy("flush", |c| {
                c.log.push("flush");
                Err("disk full".into())
            })
            .pre_destroy("close", |c| {
                c.log.push("close");
                Ok(())
            })
            .build()
    }

    #[test]
    fn create_runs_the_full_lifecycle() {
        let target = target(cache_declaration(), TargetSettings::default());
        let cache: Cache = target.create_as(&InitializationContext::new()).unwrap();

        assert_eq!(cache.capacity, 64);
        assert_eq!(cache.log, vec!["warm"]);
    }

    #[test]
    fn missing_constructor_is_metadata_error() {
        let declaration = TypeDeclaration::builder::<Cache>().build();
        let model = Arc::new(MetadataModel::builder().declare(declaration).build().unwrap());
        let managed = model.managed_type_of::<Cache>().unwrap();

        let result = InjectionTarget::new(
            managed,
            InjectionContextFactory::new(resolver(), model),
            TargetSettings::default(),
        );
        assert!(matches!(result, Err(KilnError::MetadataUnavailable(_))));
    }

    #[test]
    fn best_effort_teardown_runs_every_hook() {
        let target = target(cache_declaration(), TargetSettings::default());
        let mut cache = Cache::default();

        let err = target.pre_destroy(&mut cache).unwrap_err();
        assert_eq!(cache.log, vec!["flush", "close"]);

        match err {
            KilnError::TeardownFailed(report) => {
                assert_eq!(report.outcomes().len(), 2);
                assert!(report.skipped().is_empty());
                let failed: Vec<String> = report.failures().map(|(id, _)| id.to_string()).collect();
                assert_eq!(failed, vec!["Cache::flush"]);

                let rendered = report.to_string();
                assert!(rendered.contains("[failed] Cache::flush  (cause: disk full)"));
                assert!(rendered.contains("[ok    ] Cache::close"));
            }
            other => panic!("Expected TeardownFailed, got: {other:?}"),
        }
    }

    #[test]
    fn fail_fast_teardown_skips_remaining_hooks() {
        let settings = TargetSettings::default().with_teardown(TeardownPolicy::FailFast);
        let target = target(cache_declaration(), settings);
        let mut cache = Cache::default();

        match target.pre_destroy(&mut cache) {
            Err(KilnError::TeardownFailed(report)) => {
                assert_eq!(report.outcomes().len(), 1);
                let skipped: Vec<String> = report.skipped().iter().map(|id| id.to_string()).collect();
                assert_eq!(skipped, vec!["Cache::close"]);
            }
            other => panic!("Expected TeardownFailed, got: {other:?}"),
        }
        assert_eq!(cache.log, vec!["flush"]);
    }

    #[test]
    fn clean_teardown_returns_report() {
        let declaration = TypeDeclaration::builder::<Cache>()
            .default_constructor()
            .pre_destroy("close", |_| Ok(()))
            .build();
        let target = target(declaration, TargetSettings::default());

        let report = target.destroy(Box::new(Cache::default())).unwrap();
        assert!(!report.has_failures());
        assert_eq!(report.outcomes().len(), 1);
    }

    #[test]
    fn produce_as_wrong_type_is_mismatch() {
        let target = target(cache_declaration(), TargetSettings::default());
        let result = target.produce_as::<String>(&InitializationContext::new());

        match result {
            Err(KilnError::TypeMismatch { managed, expected }) => {
                assert_eq!(managed, TypeKey::of::<Cache>());
                assert!(expected.contains("String"));
            }
            other => panic!("Expected TypeMismatch, got: {:?}", other.map(|_| ())),
        }
    }
}
