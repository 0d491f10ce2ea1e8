//! Resolution contract and bound injection contexts.
//!
//! The [`Resolver`] decides which value satisfies an injection point.
//! The [`InjectionContextFactory`] binds a member, the points it owns and
//! (for fields and methods) the target instance into a short-lived
//! context; invoking that context resolves every point first and only
//! then performs the construct / set / call.
//!
//! ```text
//! InjectionContextFactory ──for_constructor()──> ConstructorContext ──invoke()──> Instance
//!                         ──for_field()────────> FieldContext       ──invoke()──> ()
//!                         ──for_method()───────> MethodContext      ──invoke()──> ()
//! ```

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::trace;

use crate::error::{BoxError, KilnError, Result, UnresolvedDependencyError};
use crate::key::{DependencyKey, TypeKey};
use crate::member::{
    Arguments, ConstructorDescriptor, FieldDescriptor, Instance, MemberId, MethodDescriptor, Value,
};
use crate::metadata::MetadataModel;
use crate::phase::Phase;
use crate::point::InjectionPoint;

static NEXT_CONTEXT_ID: AtomicU64 = AtomicU64::new(1);

/// Correlates the calls that build one instance.
///
/// Opaque to the engine: it is handed to the [`Resolver`] untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitializationContext {
    id: u64,
    managed: Option<TypeKey>,
}

impl InitializationContext {
    /// Creates a context with a fresh id.
    pub fn new() -> Self {
        Self {
            id: NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed),
            managed: None,
        }
    }

    /// Creates a context for building an instance of `T`.
    pub fn for_type<T: ?Sized + 'static>() -> Self {
        Self::for_key(TypeKey::of::<T>())
    }

    pub fn for_key(managed: TypeKey) -> Self {
        Self {
            managed: Some(managed),
            ..Self::new()
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The managed type this context was created for, if recorded.
    #[inline]
    pub fn managed(&self) -> Option<TypeKey> {
        self.managed
    }
}

impl Default for InitializationContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Decides which value satisfies an injection point.
///
/// Return `Ok(None)` when nothing satisfies the point and `Err` when the
/// lookup itself failed; both surface as
/// [`KilnError::UnresolvedDependency`].
///
/// Closures with the matching signature are resolvers too:
///
/// ```
/// use kiln_core::context::Resolver;
/// use kiln_core::member::Value;
///
/// let resolver = |_: &kiln_core::point::InjectionPoint, _: &kiln_core::context::InitializationContext| {
///     Ok::<Option<Value>, kiln_core::error::BoxError>(Some(Box::new(42u32)))
/// };
/// fn accepts(_: &dyn Resolver) {}
/// accepts(&resolver);
/// ```
pub trait Resolver: Send + Sync {
    fn resolve(
        &self,
        point: &InjectionPoint,
        context: &InitializationContext,
    ) -> std::result::Result<Option<Value>, BoxError>;

    /// Every key this resolver can satisfy, if it can enumerate them.
    ///
    /// Used to validate injection points before first use.
    fn available_keys(&self) -> Option<Vec<DependencyKey>> {
        None
    }
}

impl<F> Resolver for F
where
    F: Fn(&InjectionPoint, &InitializationContext) -> std::result::Result<Option<Value>, BoxError>
        + Send
        + Sync,
{
    fn resolve(
        &self,
        point: &InjectionPoint,
        context: &InitializationContext,
    ) -> std::result::Result<Option<Value>, BoxError> {
        self(point, context)
    }
}

// ═══════════════════════════════════════════
// InjectionContextFactory
// ═══════════════════════════════════════════

/// Builds bound contexts for constructors, fields and methods.
#[derive(Clone)]
pub struct InjectionContextFactory {
    resolver: Arc<dyn Resolver>,
    model: Arc<MetadataModel>,
}

impl InjectionContextFactory {
    pub fn new(resolver: Arc<dyn Resolver>, model: Arc<MetadataModel>) -> Self {
        Self { resolver, model }
    }

    pub fn model(&self) -> &Arc<MetadataModel> {
        &self.model
    }

    pub fn resolver(&self) -> &Arc<dyn Resolver> {
        &self.resolver
    }

    /// Binds `constructor` to the points it owns.
    pub fn for_constructor<'a>(
        &'a self,
        constructor: &'a ConstructorDescriptor,
        points: Vec<&'a InjectionPoint>,
    ) -> ConstructorContext<'a> {
        ConstructorContext {
            factory: self,
            constructor,
            points,
        }
    }

    /// Binds `field` of `instance` to its point.
    pub fn for_field<'a>(
        &'a self,
        field: &'a FieldDescriptor,
        point: &'a InjectionPoint,
        instance: &'a mut dyn Any,
    ) -> FieldContext<'a> {
        FieldContext {
            factory: self,
            field,
            point,
            instance,
        }
    }

    /// Binds `method` of `instance` to the points it owns.
    pub fn for_method<'a>(
        &'a self,
        method: &'a Arc<MethodDescriptor>,
        points: Vec<&'a InjectionPoint>,
        instance: &'a mut dyn Any,
    ) -> MethodContext<'a> {
        MethodContext {
            factory: self,
            method,
            points,
            instance,
        }
    }

    fn resolve(&self, point: &InjectionPoint, context: &InitializationContext) -> Result<Value> {
        match self.resolver.resolve(point, context) {
            Ok(Some(value)) => {
                trace!(point = %point, context = context.id(), "Resolved injection point");
                Ok(value)
            }
            Ok(None) => Err(KilnError::UnresolvedDependency(UnresolvedDependencyError {
                point: point.clone(),
                source: None,
            })),
            Err(source) => Err(KilnError::UnresolvedDependency(UnresolvedDependencyError {
                point: point.clone(),
                source: Some(source),
            })),
        }
    }

    fn arguments(
        &self,
        arity: usize,
        points: &[&InjectionPoint],
        context: &InitializationContext,
    ) -> Result<Arguments> {
        let mut arguments = Arguments::with_len(arity);
        for point in points {
            if let Some(position) = point.position() {
                arguments.set(position, self.resolve(point, context)?);
            }
        }
        Ok(arguments)
    }
}

impl fmt::Debug for InjectionContextFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InjectionContextFactory")
            .field("model", &self.model)
            .finish()
    }
}

// ═══════════════════════════════════════════
// Bound contexts
// ═══════════════════════════════════════════

/// A constructor call waiting for its arguments.
pub struct ConstructorContext<'a> {
    factory: &'a InjectionContextFactory,
    constructor: &'a ConstructorDescriptor,
    points: Vec<&'a InjectionPoint>,
}

impl ConstructorContext<'_> {
    pub fn member(&self) -> &MemberId {
        self.constructor.id()
    }

    pub fn points(&self) -> &[&InjectionPoint] {
        &self.points
    }

    /// Resolves every point, then calls the constructor.
    ///
    /// Nothing is constructed if any point fails to resolve.
    pub fn invoke(self, context: &InitializationContext) -> Result<Instance> {
        let member = self.constructor.id();
        let mut arguments =
            self.factory
                .arguments(self.constructor.parameters().len(), &self.points, context)?;

        trace!(member = %member, context = context.id(), "Invoking constructor");
        self.constructor
            .construct(&mut arguments)
            .map_err(|source| KilnError::TargetInvocation {
                member: member.clone(),
                instance: member.declaring().type_name(),
                phase: Phase::Produce,
                source,
            })
    }
}

/// A field assignment waiting for its value.
pub struct FieldContext<'a> {
    factory: &'a InjectionContextFactory,
    field: &'a FieldDescriptor,
    point: &'a InjectionPoint,
    instance: &'a mut dyn Any,
}

impl FieldContext<'_> {
    pub fn member(&self) -> &MemberId {
        self.field.id()
    }

    /// Resolves the point and assigns it into the instance.
    pub fn invoke(self, context: &InitializationContext) -> Result<()> {
        let value = self.factory.resolve(self.point, context)?;
        let model = &self.factory.model;
        let runtime = (*self.instance).type_id();

        trace!(member = %self.field.id(), context = context.id(), "Setting field");
        model
            .set_field(self.field, self.instance, value)
            .map_err(|source| KilnError::TargetInvocation {
                member: self.field.id().clone(),
                instance: model.type_name(runtime),
                phase: Phase::Inject,
                source,
            })
    }
}

/// A method call waiting for its arguments.
pub struct MethodContext<'a> {
    factory: &'a InjectionContextFactory,
    method: &'a Arc<MethodDescriptor>,
    points: Vec<&'a InjectionPoint>,
    instance: &'a mut dyn Any,
}

impl MethodContext<'_> {
    pub fn member(&self) -> &MemberId {
        self.method.id()
    }

    pub fn points(&self) -> &[&InjectionPoint] {
        &self.points
    }

    /// Resolves every point by parameter position, then calls the
    /// override visible on the instance's runtime type.
    pub fn invoke(self, context: &InitializationContext) -> Result<()> {
        let model = &self.factory.model;
        let runtime = (*self.instance).type_id();
        let target = model.dispatch(self.method, runtime);

        let mut arguments = self.factory.arguments(target.parameters().len(), &self.points, context)?;

        trace!(member = %target.id(), context = context.id(), "Invoking method");
        model
            .invoke_method(&target, self.instance, &mut arguments)
            .map_err(|source| KilnError::TargetInvocation {
                member: target.id().clone(),
                instance: model.type_name(runtime),
                phase: Phase::Inject,
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::TypeDeclaration;
    use crate::point::InjectionPoints;

    #[derive(Default)]
    struct Mailer {
        host: String,
        port: u16,
        retries: u8,
    }

    fn model() -> Arc<MetadataModel> {
        let declaration = TypeDeclaration::builder::<Mailer>()
            .constructor([DependencyKey::of::<String>()], |args| {
                Ok(Mailer {
                    host: args.take(0)?,
                    ..Mailer::default()
                })
            })
            .inject_field("port", |m: &mut Mailer, v: u16| m.port = v)
            .inject_method("tune", [DependencyKey::of::<u8>()], |m, args| {
                m.retries = args.take(0)?;
                Ok(())
            })
            .build();
        Arc::new(MetadataModel::builder().declare(declaration).build().unwrap())
    }

    fn resolver(point: &InjectionPoint, _: &InitializationContext) -> std::result::Result<Option<Value>, BoxError> {
        let key = point.key();
        if *key == DependencyKey::of::<String>() {
            Ok(Some(Box::new(String::from("smtp.local"))))
        } else if *key == DependencyKey::of::<u16>() {
            Ok(Some(Box::new(2525u16)))
        } else if *key == DependencyKey::of::<u8>() {
            Err("retry budget unavailable".into())
        } else {
            Ok(None)
        }
    }

    fn fixture() -> (InjectionContextFactory, InjectionPoints) {
        let model = model();
        let points = InjectionPoints::for_managed_type(&model.managed_type_of::<Mailer>().unwrap());
        (InjectionContextFactory::new(Arc::new(resolver), model), points)
    }

    #[test]
    fn contexts_have_fresh_ids() {
        let a = InitializationContext::new();
        let b = InitializationContext::for_type::<Mailer>();
        assert_ne!(a.id(), b.id());
        assert_eq!(b.managed(), Some(TypeKey::of::<Mailer>()));
    }

    #[test]
    fn constructor_context_builds_instance() {
        let (factory, points) = fixture();
        let managed = factory.model().managed_type_of::<Mailer>().unwrap();
        let constructor = managed.constructor().unwrap();

        let owned: Vec<&InjectionPoint> = points.for_member(constructor.id()).collect();
        let instance = factory
            .for_constructor(constructor, owned)
            .invoke(&InitializationContext::new())
            .unwrap();

        let mailer = instance.downcast::<Mailer>().unwrap();
        assert_eq!(mailer.host, "smtp.local");
    }

    #[test]
    fn field_context_assigns_value() {
        let (factory, points) = fixture();
        let point = points.iter().find(|p| p.is_field()).unwrap();
        let field = point.member().as_field().unwrap();

        let mut mailer = Mailer::default();
        factory
            .for_field(field, point, &mut mailer)
            .invoke(&InitializationContext::new())
            .unwrap();

        assert_eq!(mailer.port, 2525);
    }

    #[test]
    fn resolver_failure_is_unresolved_dependency() {
        let (factory, points) = fixture();
        let point = points.iter().find(|p| p.owner().name() == "tune").unwrap();
        let method = point.member().as_method().unwrap();

        let mut mailer = Mailer::default();
        let err = factory
            .for_method(method, vec![point], &mut mailer)
            .invoke(&InitializationContext::new())
            .unwrap_err();

        match err {
            KilnError::UnresolvedDependency(e) => {
                assert_eq!(e.point.owner().name(), "tune");
                assert!(e.source.is_some());
            }
            other => panic!("Expected UnresolvedDependency, got: {other:?}"),
        }
        assert_eq!(mailer.retries, 0);
    }

    #[test]
    fn missing_value_is_unresolved_dependency() {
        let model = model();
        let points = InjectionPoints::for_managed_type(&model.managed_type_of::<Mailer>().unwrap());
        let nothing = |_: &InjectionPoint, _: &InitializationContext| {
            Ok::<Option<Value>, BoxError>(None)
        };
        let factory = InjectionContextFactory::new(Arc::new(nothing), Arc::clone(&model));

        let managed = model.managed_type_of::<Mailer>().unwrap();
        let constructor = managed.constructor().unwrap();
        let result = factory
            .for_constructor(constructor, points.for_member(constructor.id()).collect())
            .invoke(&InitializationContext::new());

        assert!(matches!(result, Err(KilnError::UnresolvedDependency(_))));
    }

    #[test]
    fn failing_constructor_is_target_invocation() {
        struct Broken;
        let declaration = TypeDeclaration::builder::<Broken>()
            .no_arg_constructor(|| Err("disk full".into()))
            .build();
        let model = Arc::new(MetadataModel::builder().declare(declaration).build().unwrap());
        let factory = InjectionContextFactory::new(Arc::new(resolver), Arc::clone(&model));

        let managed = model.managed_type_of::<Broken>().unwrap();
        let err = factory
            .for_constructor(managed.constructor().unwrap(), vec![])
            .invoke(&InitializationContext::new())
            .unwrap_err();

        match err {
            KilnError::TargetInvocation { member, phase, source, .. } => {
                assert_eq!(member.to_string(), "Broken::new");
                assert_eq!(phase, Phase::Produce);
                assert_eq!(source.to_string(), "disk full");
            }
            other => panic!("Expected TargetInvocation, got: {other:?}"),
        }
    }
}
