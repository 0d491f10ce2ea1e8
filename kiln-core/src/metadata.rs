//! The metadata model: explicit descriptions of managed types.
//!
//! Types are declared once through [`TypeDeclaration::builder`] and
//! collected into an immutable [`MetadataModel`]. The model answers
//! every structural question the engine asks:
//!
//! ```text
//! TypeDeclaration ──declare()──> MetadataModelBuilder ──build()──> MetadataModel
//!                                                                    │
//!                                   managed_type() / is_assignable() │ project() / dispatch()
//!                                                                    ▼
//!                                                              ManagedType (cached)
//! ```
//!
//! Subtyping is explicit: a declaration may `extends::<P>()` another
//! declared type and supplies a projection from `&mut T` to the
//! embedded `&mut P`. Resolved descriptors list inherited members
//! base-first, with same-named methods of a subtype replacing the
//! inherited ones in place.

use std::any::{Any, TypeId, type_name};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use dashmap::DashMap;
use kiln_support::rendering::render_chain;
use tracing::{debug, instrument, trace};

use crate::error::{BoxError, KilnError, Result};
use crate::key::{DependencyKey, TypeKey};
use crate::member::{
    Arguments, ConstructorDescriptor, FieldDescriptor, Instance, InvokeFn, Marker, Member,
    MemberId, MemberKind, MethodDescriptor, Parameter, SetFn, Value,
};

/// Name used in messages for a runtime type the model does not know.
pub const UNDECLARED_TYPE: &str = "<undeclared type>";

pub(crate) type ProjectFn = Arc<dyn Fn(&mut dyn Any) -> Option<&mut dyn Any> + Send + Sync>;

// Pins the closure to a signature whose output borrows from its input.
fn projection<F>(f: F) -> F
where
    F: Fn(&mut dyn Any) -> Option<&mut dyn Any> + Send + Sync + 'static,
{
    f
}

#[derive(Clone)]
struct Parent {
    key: TypeKey,
    project: ProjectFn,
}

// ============================================================
// TypeDeclaration
// ============================================================

/// The declared members of one type, as registered by a builder.
///
/// Only the members the type itself declares are listed here; inherited
/// members are merged in when the model resolves a [`ManagedType`].
pub struct TypeDeclaration {
    key: TypeKey,
    parent: Option<Parent>,
    constructor: Option<Arc<ConstructorDescriptor>>,
    fields: Vec<Arc<FieldDescriptor>>,
    methods: Vec<Arc<MethodDescriptor>>,
    problems: Vec<String>,
}

impl TypeDeclaration {
    /// Starts declaring type `T`.
    ///
    /// # Examples
    /// ```
    /// use kiln_core::metadata::TypeDeclaration;
    /// use kiln_core::key::DependencyKey;
    ///
    /// #[derive(Default)]
    /// struct Greeter {
    ///     greeting: String,
    /// }
    ///
    /// let declaration = TypeDeclaration::builder::<Greeter>()
    ///     .default_constructor()
    ///     .inject_named_field("greeting", "greeting", |g: &mut Greeter, v: String| g.greeting = v)
    ///     .build();
    ///
    /// assert_eq!(declaration.fields().len(), 1);
    /// assert_eq!(declaration.fields()[0].key(), &DependencyKey::named::<String>("greeting"));
    /// ```
    pub fn builder<T: Any + Send + Sync>() -> TypeDeclarationBuilder<T> {
        TypeDeclarationBuilder::new()
    }

    #[inline]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// The declared parent type, if any.
    pub fn parent(&self) -> Option<TypeKey> {
        self.parent.as_ref().map(|p| p.key)
    }

    pub fn constructor(&self) -> Option<&Arc<ConstructorDescriptor>> {
        self.constructor.as_ref()
    }

    pub fn fields(&self) -> &[Arc<FieldDescriptor>] {
        &self.fields
    }

    pub fn methods(&self) -> &[Arc<MethodDescriptor>] {
        &self.methods
    }
}

impl fmt::Debug for TypeDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDeclaration")
            .field("key", &self.key)
            .field("parent", &self.parent())
            .field("constructor", &self.constructor)
            .field("fields", &self.fields)
            .field("methods", &self.methods)
            .finish()
    }
}

/// Describes a method before it is attached to a type.
#[derive(Debug, Clone)]
pub struct MethodSpec {
    name: &'static str,
    markers: Vec<Marker>,
    parameters: Vec<Parameter>,
}

impl MethodSpec {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            markers: Vec::new(),
            parameters: Vec::new(),
        }
    }

    pub fn marker(mut self, marker: Marker) -> Self {
        if !self.markers.contains(&marker) {
            self.markers.push(marker);
        }
        self
    }

    pub fn inject(self) -> Self {
        self.marker(Marker::Inject)
    }

    pub fn produces(self) -> Self {
        self.marker(Marker::Produces)
    }

    pub fn post_construct(self) -> Self {
        self.marker(Marker::PostConstruct)
    }

    pub fn pre_destroy(self) -> Self {
        self.marker(Marker::PreDestroy)
    }

    /// Appends a parameter.
    pub fn param(mut self, key: DependencyKey) -> Self {
        self.parameters.push(Parameter::new(key));
        self
    }

    pub fn params(mut self, keys: impl IntoIterator<Item = DependencyKey>) -> Self {
        self.parameters.extend(keys.into_iter().map(Parameter::new));
        self
    }

    /// Appends the parameter that receives the disposed value.
    pub fn disposes(mut self, key: DependencyKey) -> Self {
        self.parameters.push(Parameter::disposes(key));
        self
    }
}

/// Typed builder for a [`TypeDeclaration`].
///
/// Problems such as duplicate member names are collected and reported
/// as [`KilnError::MetadataUnavailable`] when the model is built.
pub struct TypeDeclarationBuilder<T> {
    declaration: TypeDeclaration,
    field_names: HashSet<&'static str>,
    method_names: HashSet<&'static str>,
    _type: PhantomData<fn() -> T>,
}

impl<T: Any + Send + Sync> TypeDeclarationBuilder<T> {
    fn new() -> Self {
        Self {
            declaration: TypeDeclaration {
                key: TypeKey::of::<T>(),
                parent: None,
                constructor: None,
                fields: Vec::new(),
                methods: Vec::new(),
                problems: Vec::new(),
            },
            field_names: HashSet::new(),
            method_names: HashSet::new(),
            _type: PhantomData,
        }
    }

    fn problem(&mut self, problem: impl Into<String>) {
        self.declaration.problems.push(problem.into());
    }

    // ── Constructor ──

    /// Declares the constructor and its parameters.
    ///
    /// The closure receives resolved values by parameter position.
    pub fn constructor<P, F>(mut self, parameters: impl IntoIterator<Item = P>, construct: F) -> Self
    where
        P: Into<Parameter>,
        F: Fn(&mut Arguments) -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        if self.declaration.constructor.is_some() {
            self.problem("more than one constructor declared");
        }

        let id = MemberId::new(self.declaration.key, MemberKind::Constructor, "new");
        self.declaration.constructor = Some(Arc::new(ConstructorDescriptor {
            id,
            parameters: parameters.into_iter().map(Into::into).collect(),
            construct: Arc::new(
                move |arguments: &mut Arguments| -> std::result::Result<Instance, BoxError> {
                    let instance: Instance = Box::new(construct(arguments)?);
                    Ok(instance)
                },
            ),
        }));
        self
    }

    /// Declares a constructor without parameters.
    pub fn no_arg_constructor<F>(self, construct: F) -> Self
    where
        F: Fn() -> std::result::Result<T, BoxError> + Send + Sync + 'static,
    {
        self.constructor(Vec::<Parameter>::new(), move |_| construct())
    }

    /// Declares `T::default()` as the constructor.
    pub fn default_constructor(self) -> Self
    where
        T: Default,
    {
        self.no_arg_constructor(|| Ok(T::default()))
    }

    // ── Fields ──

    /// Declares an injectable field that requires a `V`.
    pub fn inject_field<V, F>(self, name: &'static str, set: F) -> Self
    where
        V: Any,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.field(name, DependencyKey::of::<V>(), set)
    }

    /// Declares an injectable field that requires the named placeholder
    /// value `placeholder`.
    pub fn inject_named_field<V, F>(self, name: &'static str, placeholder: &'static str, set: F) -> Self
    where
        V: Any,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        self.field(name, DependencyKey::named::<V>(placeholder), set)
    }

    fn field<V, F>(mut self, name: &'static str, key: DependencyKey, set: F) -> Self
    where
        V: Any,
        F: Fn(&mut T, V) + Send + Sync + 'static,
    {
        if !self.field_names.insert(name) {
            self.problem(format!("field `{name}` declared more than once"));
        }

        let setter: SetFn = Arc::new(
            move |part: &mut dyn Any, value: Value| -> std::result::Result<(), BoxError> {
                let target = part
                    .downcast_mut::<T>()
                    .ok_or_else(|| format!("instance is not a {}", type_name::<T>()))?;
                let value = value.downcast::<V>().map_err(|_| {
                    format!("value for field `{name}` is not a {}", type_name::<V>())
                })?;
                set(target, *value);
                Ok(())
            },
        );

        self.declaration.fields.push(Arc::new(FieldDescriptor {
            id: MemberId::new(self.declaration.key, MemberKind::Field, name),
            key,
            markers: vec![Marker::Inject],
            set: setter,
        }));
        self
    }

    // ── Methods ──

    /// Declares a method described by `spec`.
    pub fn method<F>(mut self, spec: MethodSpec, body: F) -> Self
    where
        F: Fn(&mut T, &mut Arguments) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        let MethodSpec {
            name,
            markers,
            parameters,
        } = spec;

        if !self.method_names.insert(name) {
            self.problem(format!("method `{name}` declared more than once"));
        }
        let is_hook = markers.contains(&Marker::PostConstruct) || markers.contains(&Marker::PreDestroy);
        if is_hook && !parameters.is_empty() {
            self.problem(format!("lifecycle hook `{name}` must not take parameters"));
        }

        let invoke: InvokeFn = Arc::new(
            move |part: &mut dyn Any, arguments: &mut Arguments| -> std::result::Result<(), BoxError> {
                let target = part
                    .downcast_mut::<T>()
                    .ok_or_else(|| format!("instance is not a {}", type_name::<T>()))?;
                body(target, arguments)
            },
        );

        self.declaration.methods.push(Arc::new(MethodDescriptor {
            id: MemberId::new(self.declaration.key, MemberKind::Method, name),
            parameters,
            markers,
            invoke,
        }));
        self
    }

    /// Declares an injectable method with the given parameters.
    pub fn inject_method<F>(
        self,
        name: &'static str,
        parameters: impl IntoIterator<Item = DependencyKey>,
        body: F,
    ) -> Self
    where
        F: Fn(&mut T, &mut Arguments) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.method(MethodSpec::new(name).inject().params(parameters), body)
    }

    /// Declares a post-construct hook.
    pub fn post_construct<F>(self, name: &'static str, hook: F) -> Self
    where
        F: Fn(&mut T) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.method(MethodSpec::new(name).post_construct(), move |target, _| hook(target))
    }

    /// Declares a pre-destroy hook.
    pub fn pre_destroy<F>(self, name: &'static str, hook: F) -> Self
    where
        F: Fn(&mut T) -> std::result::Result<(), BoxError> + Send + Sync + 'static,
    {
        self.method(MethodSpec::new(name).pre_destroy(), move |target, _| hook(target))
    }

    // ── Subtyping ──

    /// Declares `T` a subtype of `P`.
    ///
    /// `to_parent` returns the part of `T` that holds `P`'s state; members
    /// declared on `P` operate on that part.
    pub fn extends<P, F>(mut self, to_parent: F) -> Self
    where
        P: Any + Send + Sync,
        F: Fn(&mut T) -> &mut P + Send + Sync + 'static,
    {
        if self.declaration.parent.is_some() {
            self.problem("more than one parent type declared");
        }
        if TypeId::of::<P>() == TypeId::of::<T>() {
            self.problem("a type cannot extend itself");
        }

        let project: ProjectFn = Arc::new(projection(move |part| {
            part.downcast_mut::<T>()
                .map(|target| to_parent(target) as &mut dyn Any)
        }));

        self.declaration.parent = Some(Parent {
            key: TypeKey::of::<P>(),
            project,
        });
        self
    }

    pub fn build(self) -> TypeDeclaration {
        self.declaration
    }
}

// ============================================================
// ManagedType
// ============================================================

/// Resolved structural descriptor of a managed type.
///
/// Lists the type's constructor plus every field and method visible on
/// it, inherited ones included, base-most type first.
pub struct ManagedType {
    key: TypeKey,
    ancestry: Vec<TypeKey>,
    constructor: Option<Arc<ConstructorDescriptor>>,
    fields: Vec<Arc<FieldDescriptor>>,
    methods: Vec<Arc<MethodDescriptor>>,
}

impl ManagedType {
    #[inline]
    pub fn key(&self) -> TypeKey {
        self.key
    }

    /// The type itself followed by its ancestors, nearest first.
    pub fn ancestry(&self) -> &[TypeKey] {
        &self.ancestry
    }

    pub fn constructor(&self) -> Option<&Arc<ConstructorDescriptor>> {
        self.constructor.as_ref()
    }

    pub fn fields(&self) -> &[Arc<FieldDescriptor>] {
        &self.fields
    }

    pub fn methods(&self) -> &[Arc<MethodDescriptor>] {
        &self.methods
    }

    /// The first visible method named `name`, after overrides.
    pub fn method(&self, name: &str) -> Option<&Arc<MethodDescriptor>> {
        self.methods.iter().find(|m| m.id().name() == name)
    }

    /// Returns `true` if `other` is this type or one of its ancestors.
    pub fn is_subtype_of(&self, other: TypeKey) -> bool {
        self.ancestry.contains(&other)
    }

    pub fn post_construct_methods(&self) -> impl Iterator<Item = &Arc<MethodDescriptor>> {
        self.methods.iter().filter(|m| m.is_post_construct())
    }

    pub fn pre_destroy_methods(&self) -> impl Iterator<Item = &Arc<MethodDescriptor>> {
        self.methods.iter().filter(|m| m.is_pre_destroy())
    }

    /// Every member as a [`Member`], constructor first.
    pub fn members(&self) -> Vec<Member> {
        self.constructor
            .iter()
            .cloned()
            .map(Member::Constructor)
            .chain(self.fields.iter().cloned().map(Member::Field))
            .chain(self.methods.iter().cloned().map(Member::Method))
            .collect()
    }
}

impl fmt::Debug for ManagedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManagedType")
            .field("key", &self.key)
            .field("ancestry", &self.ancestry)
            .field("fields", &self.fields.len())
            .field("methods", &self.methods.len())
            .finish()
    }
}

// ============================================================
// MetadataModel
// ============================================================

/// Collects declarations for a [`MetadataModel`].
#[derive(Debug, Default)]
pub struct MetadataModelBuilder {
    declarations: Vec<TypeDeclaration>,
}

impl MetadataModelBuilder {
    pub fn declare(mut self, declaration: TypeDeclaration) -> Self {
        self.push(declaration);
        self
    }

    pub fn push(&mut self, declaration: TypeDeclaration) {
        self.declarations.push(declaration);
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    /// Validates the declarations and freezes them into a model.
    ///
    /// # Errors
    /// [`KilnError::MetadataUnavailable`] for builder problems, duplicate
    /// declarations, undeclared parents and cyclic ancestry.
    #[instrument(skip(self), name = "metadata_build")]
    pub fn build(self) -> Result<MetadataModel> {
        let mut declarations: HashMap<TypeId, Arc<TypeDeclaration>> = HashMap::new();

        for declaration in self.declarations {
            let key = declaration.key;
            if let Some(problem) = declaration.problems.first() {
                return Err(KilnError::metadata(key.type_name(), problem.clone()));
            }
            if declarations.contains_key(&key.type_id()) {
                return Err(KilnError::metadata(key.type_name(), "declared more than once"));
            }

            debug!(
                managed = %key,
                fields = declaration.fields.len(),
                methods = declaration.methods.len(),
                "Declared managed type"
            );
            declarations.insert(key.type_id(), Arc::new(declaration));
        }

        for declaration in declarations.values() {
            let Some(parent) = &declaration.parent else {
                continue;
            };
            if !declarations.contains_key(&parent.key.type_id()) {
                return Err(KilnError::metadata(
                    declaration.key.type_name(),
                    format!("extends {} which is not declared", parent.key),
                ));
            }
        }

        for declaration in declarations.values() {
            let mut chain = vec![declaration.key];
            let mut current = declaration;
            while let Some(parent) = &current.parent {
                let cyclic = chain.contains(&parent.key);
                chain.push(parent.key);
                if cyclic {
                    let names: Vec<String> = chain.iter().map(TypeKey::short_name).collect();
                    return Err(KilnError::metadata(
                        declaration.key.type_name(),
                        format!("cyclic ancestry: {}", render_chain(&names)),
                    ));
                }
                let Some(next) = declarations.get(&parent.key.type_id()) else {
                    break;
                };
                current = next;
            }
        }

        Ok(MetadataModel {
            declarations,
            resolved: DashMap::new(),
        })
    }
}

/// Immutable registry of type declarations.
///
/// Safe to share between threads; resolved descriptors are cached and
/// repeated lookups return the same `Arc`.
pub struct MetadataModel {
    declarations: HashMap<TypeId, Arc<TypeDeclaration>>,
    resolved: DashMap<TypeId, Arc<ManagedType>>,
}

impl MetadataModel {
    pub fn builder() -> MetadataModelBuilder {
        MetadataModelBuilder::default()
    }

    /// Number of declared types.
    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn contains(&self, type_id: TypeId) -> bool {
        self.declarations.contains_key(&type_id)
    }

    /// The declaration registered for `type_id`.
    pub fn declaration(&self, type_id: TypeId) -> Option<&Arc<TypeDeclaration>> {
        self.declarations.get(&type_id)
    }

    /// Name of a declared type, or [`UNDECLARED_TYPE`].
    pub fn type_name(&self, type_id: TypeId) -> &'static str {
        self.declarations
            .get(&type_id)
            .map(|d| d.key.type_name())
            .unwrap_or(UNDECLARED_TYPE)
    }

    /// Resolved descriptor for `T`.
    pub fn managed_type_of<T: Any>(&self) -> Result<Arc<ManagedType>> {
        self.lookup(TypeId::of::<T>(), type_name::<T>())
    }

    /// Resolved descriptor for a runtime type.
    ///
    /// # Errors
    /// [`KilnError::MetadataUnavailable`] if the type was never declared.
    pub fn managed_type(&self, type_id: TypeId) -> Result<Arc<ManagedType>> {
        self.lookup(type_id, UNDECLARED_TYPE)
    }

    fn lookup(&self, type_id: TypeId, type_name: &'static str) -> Result<Arc<ManagedType>> {
        if let Some(cached) = self.resolved.get(&type_id) {
            return Ok(Arc::clone(cached.value()));
        }

        let declaration = self
            .declarations
            .get(&type_id)
            .ok_or_else(|| KilnError::metadata(type_name, "type was never declared"))?;

        let resolved = Arc::new(self.resolve(declaration));
        trace!(managed = %resolved.key, "Resolved managed type");

        Ok(Arc::clone(self.resolved.entry(type_id).or_insert(resolved).value()))
    }

    fn lineage<'a>(&'a self, declaration: &'a TypeDeclaration) -> Vec<&'a TypeDeclaration> {
        let mut lineage = vec![declaration];
        let mut current = declaration;
        while let Some(parent) = &current.parent {
            let Some(next) = self.declarations.get(&parent.key.type_id()) else {
                break;
            };
            lineage.push(next.as_ref());
            current = next.as_ref();
        }
        lineage
    }

    fn resolve(&self, declaration: &TypeDeclaration) -> ManagedType {
        let lineage = self.lineage(declaration);

        let mut fields: Vec<Arc<FieldDescriptor>> = Vec::new();
        let mut methods: Vec<Arc<MethodDescriptor>> = Vec::new();

        for ancestor in lineage.iter().rev() {
            fields.extend(ancestor.fields.iter().cloned());
            for method in &ancestor.methods {
                match methods.iter().position(|m| method.overrides(m)) {
                    Some(index) => methods[index] = Arc::clone(method),
                    None => methods.push(Arc::clone(method)),
                }
            }
        }

        ManagedType {
            key: declaration.key,
            ancestry: lineage.iter().map(|d| d.key).collect(),
            constructor: declaration.constructor.clone(),
            fields,
            methods,
        }
    }

    /// Returns `true` if an instance of `runtime` may be treated as a
    /// `declaring`: the types are equal or `declaring` is an ancestor.
    pub fn is_assignable(&self, declaring: TypeId, runtime: TypeId) -> bool {
        if declaring == runtime {
            return true;
        }

        let mut current = self.declarations.get(&runtime);
        while let Some(declaration) = current {
            let Some(parent) = &declaration.parent else {
                return false;
            };
            if parent.key.type_id() == declaring {
                return true;
            }
            current = self.declarations.get(&parent.key.type_id());
        }
        false
    }

    /// Views `instance` as the part declared by `declaring`.
    ///
    /// Follows the projections from the runtime type up its ancestry.
    /// Returns `None` if `declaring` is not assignable from the runtime
    /// type.
    pub fn project<'a>(&self, instance: &'a mut dyn Any, declaring: TypeId) -> Option<&'a mut dyn Any> {
        let mut current = instance;
        loop {
            let runtime = (*current).type_id();
            if runtime == declaring {
                return Some(current);
            }
            let parent = self.declarations.get(&runtime)?.parent.as_ref()?;
            current = (parent.project)(current)?;
        }
    }

    /// The method that actually runs when `method` is called on an
    /// instance of `runtime`: the nearest override with the same name and
    /// parameters, or `method` itself.
    pub fn dispatch(&self, method: &Arc<MethodDescriptor>, runtime: TypeId) -> Arc<MethodDescriptor> {
        let declaring = method.id().declaring().type_id();
        if declaring == runtime || !self.is_assignable(declaring, runtime) {
            return Arc::clone(method);
        }

        self.managed_type(runtime)
            .ok()
            .and_then(|managed| {
                managed
                    .methods()
                    .iter()
                    .find(|m| m.overrides(method))
                    .cloned()
            })
            .unwrap_or_else(|| Arc::clone(method))
    }

    pub(crate) fn invoke_method(
        &self,
        method: &MethodDescriptor,
        instance: &mut dyn Any,
        arguments: &mut Arguments,
    ) -> std::result::Result<(), BoxError> {
        let declaring = method.id().declaring();
        let part = self
            .project(instance, declaring.type_id())
            .ok_or_else(|| format!("instance cannot be viewed as {}", declaring.type_name()))?;
        method.invoke(part, arguments)
    }

    pub(crate) fn set_field(
        &self,
        field: &FieldDescriptor,
        instance: &mut dyn Any,
        value: Value,
    ) -> std::result::Result<(), BoxError> {
        let declaring = field.id().declaring();
        let part = self
            .project(instance, declaring.type_id())
            .ok_or_else(|| format!("instance cannot be viewed as {}", declaring.type_name()))?;
        field.set(part, value)
    }
}

impl fmt::Debug for MetadataModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataModel")
            .field("declared", &self.declarations.len())
            .field("resolved", &self.resolved.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Base {
        name: String,
        calls: Vec<&'static str>,
    }

    #[derive(Default)]
    struct Derived {
        base: Base,
        extra: u32,
    }

    fn base_declaration() -> TypeDeclaration {
        TypeDeclaration::builder::<Base>()
            .default_constructor()
            .inject_field("name", |b: &mut Base, v: String| b.name = v)
            .inject_method("configure", [DependencyKey::of::<u32>()], |b, _| {
                b.calls.push("Base::configure");
                Ok(())
            })
            .post_construct("open", |b| {
                b.calls.push("Base::open");
                Ok(())
            })
            .build()
    }

    fn derived_declaration() -> TypeDeclaration {
        TypeDeclaration::builder::<Derived>()
            .default_constructor()
            .extends(|d: &mut Derived| &mut d.base)
            .inject_field("extra", |d: &mut Derived, v: u32| d.extra = v)
            .inject_method("configure", [DependencyKey::of::<u32>()], |d, _| {
                d.base.calls.push("Derived::configure");
                Ok(())
            })
            .build()
    }

    fn model() -> MetadataModel {
        MetadataModel::builder()
            .declare(base_declaration())
            .declare(derived_declaration())
            .build()
            .unwrap()
    }

    #[test]
    fn resolved_type_lists_inherited_members_base_first() {
        let model = model();
        let derived = model.managed_type_of::<Derived>().unwrap();

        let fields: Vec<String> = derived.fields().iter().map(|f| f.id().to_string()).collect();
        assert_eq!(fields, vec!["Base::name", "Derived::extra"]);
        assert_eq!(derived.ancestry(), &[TypeKey::of::<Derived>(), TypeKey::of::<Base>()]);
        assert!(derived.is_subtype_of(TypeKey::of::<Base>()));
    }

    #[test]
    fn override_replaces_inherited_method_in_place() {
        let model = model();
        let derived = model.managed_type_of::<Derived>().unwrap();

        let methods: Vec<String> = derived.methods().iter().map(|m| m.id().to_string()).collect();
        assert_eq!(methods, vec!["Derived::configure", "Base::open"]);
    }

    #[test]
    fn lookups_are_cached() {
        let model = model();
        let a = model.managed_type_of::<Derived>().unwrap();
        let b = model.managed_type(TypeId::of::<Derived>()).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn undeclared_type_is_unavailable() {
        let model = model();
        match model.managed_type_of::<String>() {
            Err(KilnError::MetadataUnavailable(e)) => assert!(e.type_name.contains("String")),
            other => panic!("Expected MetadataUnavailable, got: {other:?}"),
        }
    }

    #[test]
    fn assignability_follows_ancestry() {
        let model = model();
        let base = TypeId::of::<Base>();
        let derived = TypeId::of::<Derived>();

        assert!(model.is_assignable(base, derived));
        assert!(model.is_assignable(derived, derived));
        assert!(!model.is_assignable(derived, base));
        assert!(!model.is_assignable(TypeId::of::<String>(), derived));
    }

    #[test]
    fn project_reaches_embedded_parent() {
        let model = model();
        let mut derived = Derived::default();

        let part = model.project(&mut derived, TypeId::of::<Base>()).unwrap();
        part.downcast_mut::<Base>().unwrap().name = "projected".into();

        assert_eq!(derived.base.name, "projected");
        assert!(model.project(&mut Base::default(), TypeId::of::<Derived>()).is_none());
    }

    #[test]
    fn dispatch_picks_override() {
        let model = model();
        let base = model.managed_type_of::<Base>().unwrap();
        let configure = base.method("configure").unwrap();

        let dispatched = model.dispatch(configure, TypeId::of::<Derived>());
        assert_eq!(dispatched.id().declaring(), TypeKey::of::<Derived>());

        let unchanged = model.dispatch(configure, TypeId::of::<Base>());
        assert!(Arc::ptr_eq(&unchanged, configure));
    }

    #[derive(Default)]
    struct Overloading {
        base: Base,
    }

    fn overloading_model() -> MetadataModel {
        MetadataModel::builder()
            .declare(base_declaration())
            .declare(
                TypeDeclaration::builder::<Overloading>()
                    .default_constructor()
                    .extends(|o: &mut Overloading| &mut o.base)
                    .post_construct("configure", |o| {
                        o.base.calls.push("Overloading::configure");
                        Ok(())
                    })
                    .build(),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn overload_keeps_inherited_method_visible() {
        let model = overloading_model();
        let managed = model.managed_type_of::<Overloading>().unwrap();

        let methods: Vec<String> = managed.methods().iter().map(|m| m.id().to_string()).collect();
        assert_eq!(
            methods,
            vec!["Base::configure", "Base::open", "Overloading::configure"]
        );
    }

    #[test]
    fn dispatch_ignores_overload_with_other_parameters() {
        let model = overloading_model();
        let base = model.managed_type_of::<Base>().unwrap();
        let configure = base.method("configure").unwrap();

        let dispatched = model.dispatch(configure, TypeId::of::<Overloading>());
        assert!(Arc::ptr_eq(&dispatched, configure));
    }

    #[test]
    fn undeclared_parent_is_rejected() {
        let result = MetadataModel::builder().declare(derived_declaration()).build();
        match result {
            Err(KilnError::MetadataUnavailable(e)) => assert!(e.reason.contains("not declared")),
            other => panic!("Expected MetadataUnavailable, got: {other:?}"),
        }
    }

    #[test]
    fn duplicate_declaration_is_rejected() {
        let result = MetadataModel::builder()
            .declare(base_declaration())
            .declare(base_declaration())
            .build();
        assert!(matches!(result, Err(KilnError::MetadataUnavailable(_))));
    }

    #[test]
    fn duplicate_member_names_are_rejected() {
        let declaration = TypeDeclaration::builder::<Base>()
            .default_constructor()
            .post_construct("open", |_| Ok(()))
            .pre_destroy("open", |_| Ok(()))
            .build();

        match MetadataModel::builder().declare(declaration).build() {
            Err(KilnError::MetadataUnavailable(e)) => assert!(e.reason.contains("`open`")),
            other => panic!("Expected MetadataUnavailable, got: {other:?}"),
        }
    }

    #[test]
    fn hooks_with_parameters_are_rejected() {
        let declaration = TypeDeclaration::builder::<Base>()
            .method(
                MethodSpec::new("start").post_construct().param(DependencyKey::of::<u8>()),
                |_, _| Ok(()),
            )
            .build();

        assert!(MetadataModel::builder().declare(declaration).build().is_err());
    }

    #[test]
    fn cyclic_ancestry_is_rejected() {
        struct A {
            inner: Option<Box<B>>,
        }
        struct B {
            inner: Option<Box<A>>,
        }

        let a = TypeDeclaration::builder::<A>()
            .extends(|a: &mut A| a.inner.as_deref_mut().expect("never projected"))
            .build();
        let b = TypeDeclaration::builder::<B>()
            .extends(|b: &mut B| b.inner.as_deref_mut().expect("never projected"))
            .build();

        match MetadataModel::builder().declare(a).declare(b).build() {
            Err(KilnError::MetadataUnavailable(e)) => {
                assert!(e.reason.contains("cyclic ancestry"));
                assert!(e.reason.contains("→"));
            }
            other => panic!("Expected MetadataUnavailable, got: {other:?}"),
        }
    }
}
