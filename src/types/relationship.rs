//! Relationship types for the combiner.

use serde::{Deserialize, Serialize};
use super::element::ElementId;

/// Kind of relationship between two elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipKind {
    /// One element refers to another. The only kind the combiner copies.
    Reference,
    /// Element grouped by another element.
    Grouping,
    /// Default/unspecified.
    Default,
}

impl RelationshipKind {
    /// Parse relationship kind from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "reference" => Some(Self::Reference),
            "grouping" => Some(Self::Grouping),
            "default" | "" => Some(Self::Default),
            _ => None,
        }
    }
}

impl Default for RelationshipKind {
    fn default() -> Self {
        Self::Default
    }
}

impl std::fmt::Display for RelationshipKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Reference => write!(f, "reference"),
            Self::Grouping => write!(f, "grouping"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Directed relationship between two elements.
///
/// Implements `Ord` for deterministic ordering: (from, to, kind).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Relationship {
    /// Element the relationship starts at.
    pub from: ElementId,
    /// Element the relationship points to.
    pub to: ElementId,
    /// Kind of relationship.
    #[serde(default)]
    pub kind: RelationshipKind,
}

impl Relationship {
    /// Create a new relationship.
    pub fn new(from: ElementId, to: ElementId, kind: RelationshipKind) -> Self {
        Self { from, to, kind }
    }

    /// Create a reference relationship.
    pub fn reference(from: ElementId, to: ElementId) -> Self {
        Self::new(from, to, RelationshipKind::Reference)
    }
}

impl PartialOrd for Relationship {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Relationship {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.from
            .cmp(&other.from)
            .then_with(|| self.to.cmp(&other.to))
            .then_with(|| self.kind.cmp(&other.kind))
    }
}
