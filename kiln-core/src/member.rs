//! Member descriptors: constructors, fields and methods.
//!
//! Each descriptor carries a [`MemberId`], its role [`Marker`]s, its
//! parameters and a type-erased operation. The typed closures supplied
//! to [`TypeDeclarationBuilder`](crate::metadata::TypeDeclarationBuilder)
//! are wrapped here so the engine can drive every member kind through
//! the same [`Member`] sum type.

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use crate::error::BoxError;
use crate::key::{DependencyKey, TypeKey};

/// A type-erased value supplied for an injection point.
pub type Value = Box<dyn Any + Send + Sync>;

/// A type-erased managed instance.
pub type Instance = Box<dyn Any + Send + Sync>;

pub(crate) type ConstructFn =
    Arc<dyn Fn(&mut Arguments) -> Result<Instance, BoxError> + Send + Sync>;
pub(crate) type SetFn = Arc<dyn Fn(&mut dyn Any, Value) -> Result<(), BoxError> + Send + Sync>;
pub(crate) type InvokeFn =
    Arc<dyn Fn(&mut dyn Any, &mut Arguments) -> Result<(), BoxError> + Send + Sync>;

/// Which kind of member a descriptor describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    Constructor,
    Field,
    Method,
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKind::Constructor => write!(f, "constructor"),
            MemberKind::Field => write!(f, "field"),
            MemberKind::Method => write!(f, "method"),
        }
    }
}

/// Identity of one member: declaring type, kind and name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MemberId {
    declaring: TypeKey,
    kind: MemberKind,
    name: &'static str,
}

impl MemberId {
    pub(crate) fn new(declaring: TypeKey, kind: MemberKind, name: &'static str) -> Self {
        Self { declaring, kind, name }
    }

    /// The type that declares this member.
    #[inline]
    pub fn declaring(&self) -> TypeKey {
        self.declaring
    }

    #[inline]
    pub fn kind(&self) -> MemberKind {
        self.kind
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{}", self.declaring.short_name(), self.name)
    }
}

/// Role markers attached to members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Marker {
    /// The member receives injected values.
    Inject,
    /// Zero-argument hook run after injection.
    PostConstruct,
    /// Zero-argument hook run before teardown.
    PreDestroy,
    /// The method supplies values for other injection points.
    Produces,
}

/// One declared parameter of a constructor or method.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    key: DependencyKey,
    disposes: bool,
}

impl Parameter {
    pub fn new(key: DependencyKey) -> Self {
        Self { key, disposes: false }
    }

    /// A parameter that receives the value being disposed.
    ///
    /// Its method becomes a disposer and the parameter itself is not an
    /// injection point.
    pub fn disposes(key: DependencyKey) -> Self {
        Self { key, disposes: true }
    }

    #[inline]
    pub fn key(&self) -> &DependencyKey {
        &self.key
    }

    #[inline]
    pub fn is_disposes(&self) -> bool {
        self.disposes
    }
}

impl From<DependencyKey> for Parameter {
    fn from(key: DependencyKey) -> Self {
        Parameter::new(key)
    }
}

/// Errors raised by [`Arguments::take`].
#[derive(Debug, thiserror::Error)]
pub enum ArgumentError {
    #[error("argument #{position} is out of range ({len} parameter(s))")]
    OutOfRange { position: usize, len: usize },

    #[error("argument #{position} was not supplied or was already taken")]
    Missing { position: usize },

    #[error("argument #{position} is not a {expected}")]
    WrongType {
        position: usize,
        expected: &'static str,
    },
}

/// Resolved values for one constructor or method call, by parameter
/// position.
#[derive(Default)]
pub struct Arguments {
    values: Vec<Option<Value>>,
}

impl Arguments {
    pub(crate) fn with_len(len: usize) -> Self {
        Self {
            values: (0..len).map(|_| None).collect(),
        }
    }

    pub(crate) fn set(&mut self, position: usize, value: Value) {
        if position >= self.values.len() {
            self.values.resize_with(position + 1, || None);
        }
        self.values[position] = Some(value);
    }

    /// Number of parameter slots.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns `true` if a value is present at `position`.
    pub fn has(&self, position: usize) -> bool {
        matches!(self.values.get(position), Some(Some(_)))
    }

    /// Takes the value at `position` as a `T`.
    ///
    /// On a type mismatch the value stays in place.
    pub fn take<T: Any>(&mut self, position: usize) -> Result<T, ArgumentError> {
        let len = self.values.len();
        let slot = self
            .values
            .get_mut(position)
            .ok_or(ArgumentError::OutOfRange { position, len })?;
        let value = slot.take().ok_or(ArgumentError::Missing { position })?;

        match value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => {
                *slot = Some(value);
                Err(ArgumentError::WrongType {
                    position,
                    expected: type_name::<T>(),
                })
            }
        }
    }
}

impl fmt::Debug for Arguments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let present: Vec<bool> = self.values.iter().map(Option::is_some).collect();
        f.debug_struct("Arguments").field("present", &present).finish()
    }
}

/// Describes the constructor of a managed type.
pub struct ConstructorDescriptor {
    pub(crate) id: MemberId,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) construct: ConstructFn,
}

impl ConstructorDescriptor {
    #[inline]
    pub fn id(&self) -> &MemberId {
        &self.id
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub(crate) fn construct(&self, arguments: &mut Arguments) -> Result<Instance, BoxError> {
        (self.construct)(arguments)
    }
}

impl fmt::Debug for ConstructorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstructorDescriptor")
            .field("id", &self.id)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Describes a field of a managed type.
pub struct FieldDescriptor {
    pub(crate) id: MemberId,
    pub(crate) key: DependencyKey,
    pub(crate) markers: Vec<Marker>,
    pub(crate) set: SetFn,
}

impl FieldDescriptor {
    #[inline]
    pub fn id(&self) -> &MemberId {
        &self.id
    }

    /// What the field requires.
    pub fn key(&self) -> &DependencyKey {
        &self.key
    }

    pub fn has_marker(&self, marker: Marker) -> bool {
        self.markers.contains(&marker)
    }

    pub fn is_injectable(&self) -> bool {
        self.has_marker(Marker::Inject)
    }

    pub(crate) fn set(&self, part: &mut dyn Any, value: Value) -> Result<(), BoxError> {
        (self.set)(part, value)
    }
}

impl fmt::Debug for FieldDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldDescriptor")
            .field("id", &self.id)
            .field("key", &self.key)
            .field("markers", &self.markers)
            .finish()
    }
}

/// Describes a method of a managed type.
pub struct MethodDescriptor {
    pub(crate) id: MemberId,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) markers: Vec<Marker>,
    pub(crate) invoke: InvokeFn,
}

impl MethodDescriptor {
    #[inline]
    pub fn id(&self) -> &MemberId {
        &self.id
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub fn has_marker(&self, marker: Marker) -> bool {
        self.markers.contains(&marker)
    }

    pub fn is_injectable(&self) -> bool {
        self.has_marker(Marker::Inject)
    }

    /// Returns `true` if this method overrides `other`: same name and
    /// the same parameter list. A same-named method with different
    /// parameters is an overload and leaves `other` visible.
    pub fn overrides(&self, other: &MethodDescriptor) -> bool {
        self.id.name() == other.id.name() && self.parameters == other.parameters
    }

    pub fn is_producer(&self) -> bool {
        self.has_marker(Marker::Produces)
    }

    /// A disposer has a parameter marked `disposes`.
    pub fn is_disposer(&self) -> bool {
        self.parameters.iter().any(Parameter::is_disposes)
    }

    pub fn is_post_construct(&self) -> bool {
        self.has_marker(Marker::PostConstruct)
    }

    pub fn is_pre_destroy(&self) -> bool {
        self.has_marker(Marker::PreDestroy)
    }

    pub(crate) fn invoke(&self, part: &mut dyn Any, arguments: &mut Arguments) -> Result<(), BoxError> {
        (self.invoke)(part, arguments)
    }
}

impl fmt::Debug for MethodDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodDescriptor")
            .field("id", &self.id)
            .field("parameters", &self.parameters)
            .field("markers", &self.markers)
            .finish()
    }
}

/// Any member of a managed type.
#[derive(Debug, Clone)]
pub enum Member {
    Constructor(Arc<ConstructorDescriptor>),
    Field(Arc<FieldDescriptor>),
    Method(Arc<MethodDescriptor>),
}

impl Member {
    pub fn id(&self) -> &MemberId {
        match self {
            Member::Constructor(c) => c.id(),
            Member::Field(f) => f.id(),
            Member::Method(m) => m.id(),
        }
    }

    #[inline]
    pub fn kind(&self) -> MemberKind {
        self.id().kind()
    }

    #[inline]
    pub fn declaring(&self) -> TypeKey {
        self.id().declaring()
    }

    pub fn as_field(&self) -> Option<&Arc<FieldDescriptor>> {
        match self {
            Member::Field(f) => Some(f),
            _ => None,
        }
    }

    pub fn as_method(&self) -> Option<&Arc<MethodDescriptor>> {
        match self {
            Member::Method(m) => Some(m),
            _ => None,
        }
    }
}

impl PartialEq for Member {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Member {}
