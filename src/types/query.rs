//! Predicates and counting targets for source queries.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::element::{Element, ElementId, ElementKind};
use super::relationship::RelationshipKind;

/// Conjunctive filter over elements.
///
/// Unset fields match anything; an empty `codes` list matches any code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElementPredicate {
    /// Required kind.
    pub kind: Option<ElementKind>,
    /// Required parent.
    pub parent_id: Option<ElementId>,
    /// Required container.
    pub container_id: Option<ElementId>,
    /// Accepted containers. Empty matches any container.
    #[serde(default)]
    pub containers: BTreeSet<ElementId>,
    /// Accepted code values.
    #[serde(default)]
    pub codes: Vec<String>,
}

impl ElementPredicate {
    /// Predicate matching every element.
    pub fn any() -> Self {
        Self::default()
    }

    /// Elements of the given kind.
    pub fn of_kind(kind: ElementKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::default()
        }
    }

    /// Direct children of `parent_id`.
    pub fn children_of(parent_id: ElementId) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::default()
        }
    }

    /// Elements held by the container `container_id`.
    pub fn contained_in(container_id: ElementId) -> Self {
        Self {
            container_id: Some(container_id),
            ..Self::default()
        }
    }

    /// Elements held by any of the given containers.
    pub fn contained_in_any<I>(containers: I) -> Self
    where
        I: IntoIterator<Item = ElementId>,
    {
        Self {
            containers: containers.into_iter().collect(),
            ..Self::default()
        }
    }

    /// Restrict to a kind.
    pub fn with_kind(mut self, kind: ElementKind) -> Self {
        self.kind = Some(kind);
        self
    }

    /// Restrict to a set of code values.
    pub fn with_codes<I, C>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: Into<String>,
    {
        self.codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Check whether an element satisfies the predicate.
    pub fn matches(&self, element: &Element) -> bool {
        self.kind.map_or(true, |kind| element.kind == kind)
            && self.parent_id.map_or(true, |parent| element.parent_id == Some(parent))
            && self.container_id.map_or(true, |container| element.container_id == container)
            && (self.containers.is_empty() || self.containers.contains(&element.container_id))
            && (self.codes.is_empty() || self.codes.iter().any(|code| *code == element.code))
    }
}

/// What to count in a source dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemType {
    /// All elements.
    Elements,
    /// Elements of one kind.
    ElementsOfKind(ElementKind),
    /// Relationships of one kind.
    Relationships(RelationshipKind),
}
