//! Exclusion filter: source ids that must never reach the target.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::ElementId;

/// Why a source id was excluded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    /// Category resolved from the configured deny-list at startup.
    DenyList,
    /// Element linked to an excluded category.
    DeniedCategory,
    /// Parent or container of the element was excluded.
    ExcludedAncestor,
    /// Excluded by a classifier for a domain-specific reason.
    Policy,
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DenyList => write!(f, "deny_list"),
            Self::DeniedCategory => write!(f, "denied_category"),
            Self::ExcludedAncestor => write!(f, "excluded_ancestor"),
            Self::Policy => write!(f, "policy"),
        }
    }
}

/// Set of excluded source ids, with the first reason recorded for each.
#[derive(Debug, Clone, Default)]
pub struct ExclusionFilter {
    excluded: BTreeMap<ElementId, ExclusionReason>,
}

impl ExclusionFilter {
    /// Create an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Exclude an id. Returns `false` if it was already excluded.
    pub fn exclude(&mut self, id: ElementId, reason: ExclusionReason) -> bool {
        match self.excluded.entry(id) {
            std::collections::btree_map::Entry::Occupied(_) => false,
            std::collections::btree_map::Entry::Vacant(slot) => {
                slot.insert(reason);
                true
            }
        }
    }

    /// Whether an id is excluded.
    pub fn contains(&self, id: ElementId) -> bool {
        self.excluded.contains_key(&id)
    }

    /// Reason an id was excluded.
    pub fn reason(&self, id: ElementId) -> Option<ExclusionReason> {
        self.excluded.get(&id).copied()
    }

    /// Number of excluded ids.
    pub fn len(&self) -> usize {
        self.excluded.len()
    }

    /// Whether nothing is excluded.
    pub fn is_empty(&self) -> bool {
        self.excluded.is_empty()
    }

    /// Excluded ids in id order.
    pub fn ids(&self) -> impl Iterator<Item = ElementId> + '_ {
        self.excluded.keys().copied()
    }

    /// Count of excluded ids per reason.
    pub fn counts_by_reason(&self) -> BTreeMap<ExclusionReason, usize> {
        let mut counts = BTreeMap::new();
        for reason in self.excluded.values() {
            *counts.entry(*reason).or_insert(0) += 1;
        }
        counts
    }
}
