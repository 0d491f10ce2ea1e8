//! Injection points and the per-type point registry.
//!
//! An [`InjectionPoint`] is one site that needs an externally supplied
//! value: a constructor parameter, an injectable field, or a parameter
//! of an injectable, producer or disposer method. Each point is tagged
//! with its owning [`Member`].

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::key::DependencyKey;
use crate::member::{Member, MemberId, MemberKind};
use crate::metadata::ManagedType;

/// Where inside its member a point sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Element {
    /// The field itself.
    Field,
    /// A constructor or method parameter.
    Parameter { position: usize },
}

/// One site requiring an externally supplied value.
#[derive(Debug, Clone)]
pub struct InjectionPoint {
    member: Member,
    element: Element,
    key: DependencyKey,
}

impl InjectionPoint {
    pub fn new(member: Member, element: Element, key: DependencyKey) -> Self {
        Self { member, element, key }
    }

    /// The member that owns this point.
    pub fn member(&self) -> &Member {
        &self.member
    }

    #[inline]
    pub fn owner(&self) -> &MemberId {
        self.member.id()
    }

    #[inline]
    pub fn element(&self) -> Element {
        self.element
    }

    /// What the point requires.
    #[inline]
    pub fn key(&self) -> &DependencyKey {
        &self.key
    }

    /// Parameter position, or `None` for field points.
    pub fn position(&self) -> Option<usize> {
        match self.element {
            Element::Parameter { position } => Some(position),
            Element::Field => None,
        }
    }

    pub fn is_field(&self) -> bool {
        matches!(self.element, Element::Field)
    }
}

impl PartialEq for InjectionPoint {
    fn eq(&self, other: &Self) -> bool {
        self.owner() == other.owner() && self.element == other.element && self.key == other.key
    }
}

impl Eq for InjectionPoint {}

impl fmt::Display for InjectionPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.element {
            Element::Field => write!(f, "field {} requires {}", self.owner(), self.key),
            Element::Parameter { position } => write!(
                f,
                "parameter #{position} of {} {} requires {}",
                self.member.kind(),
                self.owner(),
                self.key
            ),
        }
    }
}

/// The immutable set of injection points of one managed type.
///
/// Cheap to clone and safe to share between threads.
#[derive(Debug, Clone)]
pub struct InjectionPoints {
    points: Arc<[InjectionPoint]>,
}

impl InjectionPoints {
    pub fn new(points: Vec<InjectionPoint>) -> Self {
        Self {
            points: points.into(),
        }
    }

    /// Computes the points declared by `managed`, inherited members
    /// included.
    ///
    /// Points are listed constructor first, then fields, then methods,
    /// each in resolved member order.
    pub fn for_managed_type(managed: &ManagedType) -> Self {
        let mut points = Vec::new();

        if let Some(constructor) = managed.constructor() {
            let member = Member::Constructor(Arc::clone(constructor));
            for (position, parameter) in constructor.parameters().iter().enumerate() {
                points.push(InjectionPoint::new(
                    member.clone(),
                    Element::Parameter { position },
                    parameter.key().clone(),
                ));
            }
        }

        for field in managed.fields().iter().filter(|f| f.is_injectable()) {
            points.push(InjectionPoint::new(
                Member::Field(Arc::clone(field)),
                Element::Field,
                field.key().clone(),
            ));
        }

        for method in managed
            .methods()
            .iter()
            .filter(|m| m.is_injectable() || m.is_producer() || m.is_disposer())
        {
            let member = Member::Method(Arc::clone(method));
            for (position, parameter) in method.parameters().iter().enumerate() {
                if parameter.is_disposes() {
                    continue;
                }
                points.push(InjectionPoint::new(
                    member.clone(),
                    Element::Parameter { position },
                    parameter.key().clone(),
                ));
            }
        }

        Self::new(points)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, InjectionPoint> {
        self.points.iter()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// All points owned by `member`.
    pub fn for_member<'a>(&'a self, member: &'a MemberId) -> impl Iterator<Item = &'a InjectionPoint> + 'a {
        self.points.iter().filter(move |p| p.owner() == member)
    }

    /// All points owned by members of `kind`.
    pub fn of_kind(&self, kind: MemberKind) -> impl Iterator<Item = &InjectionPoint> {
        self.points.iter().filter(move |p| p.member.kind() == kind)
    }

    /// Distinct keys required by these points, in first-seen order.
    pub fn keys(&self) -> Vec<DependencyKey> {
        let mut seen = HashSet::new();
        self.points
            .iter()
            .filter(|p| seen.insert(p.key.clone()))
            .map(|p| p.key.clone())
            .collect()
    }
}

impl<'a> IntoIterator for &'a InjectionPoints {
    type Item = &'a InjectionPoint;
    type IntoIter = std::slice::Iter<'a, InjectionPoint>;

    fn into_iter(self) -> Self::IntoIter {
        self.points.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{MetadataModel, MethodSpec, TypeDeclaration};

    #[derive(Default)]
    struct Report {
        title: String,
        pages: u32,
    }

    fn points() -> InjectionPoints {
        let declaration = TypeDeclaration::builder::<Report>()
            .constructor([DependencyKey::of::<String>(), DependencyKey::of::<u32>()], |args| {
                Ok(Report {
                    title: args.take(0)?,
                    pages: args.take(1)?,
                })
            })
            .inject_field("pages", |r: &mut Report, v: u32| r.pages = v)
            .inject_method("retitle", [DependencyKey::named::<String>("title")], |_, _| Ok(()))
            .method(
                MethodSpec::new("export").produces().param(DependencyKey::of::<u8>()),
                |_, _| Ok(()),
            )
            .method(
                MethodSpec::new("release")
                    .disposes(DependencyKey::of::<String>())
                    .param(DependencyKey::of::<u16>()),
                |_, _| Ok(()),
            )
            .post_construct("check", |r| {
                if r.title.is_empty() {
                    return Err("untitled".into());
                }
                Ok(())
            })
            .build();

        let model = MetadataModel::builder().declare(declaration).build().unwrap();
        InjectionPoints::for_managed_type(&model.managed_type_of::<Report>().unwrap())
    }

    #[test]
    fn every_point_has_one_owner() {
        let points = points();
        let owners: Vec<String> = points.iter().map(|p| p.owner().to_string()).collect();
        assert_eq!(
            owners,
            vec![
                "Report::new",
                "Report::new",
                "Report::pages",
                "Report::retitle",
                "Report::export",
                "Report::release",
            ]
        );
    }

    #[test]
    fn disposed_parameter_is_not_a_point() {
        let points = points();
        let release: Vec<&InjectionPoint> = points
            .iter()
            .filter(|p| p.owner().name() == "release")
            .collect();
        assert_eq!(release.len(), 1);
        assert_eq!(release[0].position(), Some(1));
        assert_eq!(release[0].key(), &DependencyKey::of::<u16>());
    }

    #[test]
    fn filter_by_member() {
        let points = points();
        let constructor = points.iter().next().unwrap().owner().clone();
        let positions: Vec<Option<usize>> = points
            .for_member(&constructor)
            .map(InjectionPoint::position)
            .collect();
        assert_eq!(positions, vec![Some(0), Some(1)]);
        assert_eq!(points.of_kind(MemberKind::Field).count(), 1);
    }

    #[test]
    fn keys_are_distinct() {
        let keys = points().keys();
        assert_eq!(keys.iter().filter(|k| **k == DependencyKey::of::<u32>()).count(), 1);
        assert!(keys.contains(&DependencyKey::named::<String>("title")));
    }

    #[test]
    fn point_display() {
        let points = points();
        let field = points.iter().find(|p| p.is_field()).unwrap();
        assert_eq!(field.to_string(), "field Report::pages requires u32");

        let first = points.iter().next().unwrap();
        assert!(first.to_string().starts_with("parameter #0 of constructor Report::new"));
    }
}
