//! Source-to-target identifier remapping.
//!
//! Each source id maps to at most one target id, and the mapping is
//! write-once. Several source ids may share a target id; this is how merged
//! subtrees end up in one container. The reverse index answers "which source
//! ids were folded into this target id".

use std::collections::{BTreeMap, BTreeSet};

use crate::canonical::canonical_hash_hex;
use crate::error::InvariantViolation;
use crate::types::ElementId;

/// Bidirectional map from source element ids to target element ids.
///
/// Uses BTreeMap/BTreeSet for deterministic iteration and fingerprints.
#[derive(Debug, Clone, Default)]
pub struct IdentifierRemapTable {
    forward: BTreeMap<ElementId, ElementId>,
    reverse: BTreeMap<ElementId, BTreeSet<ElementId>>,
}

impl IdentifierRemapTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `source_id` maps to `target_id`.
    ///
    /// Recording the identical pair twice is a no-op. Remapping a source id
    /// to a different target is an invariant violation and leaves the table
    /// unchanged.
    pub fn record(&mut self, source_id: ElementId, target_id: ElementId) -> Result<(), InvariantViolation> {
        match self.forward.get(&source_id) {
            Some(existing) if *existing == target_id => Ok(()),
            Some(existing) => Err(InvariantViolation::DuplicateRemap {
                source_id,
                existing: *existing,
                requested: target_id,
            }),
            None => {
                self.forward.insert(source_id, target_id);
                self.reverse.entry(target_id).or_default().insert(source_id);
                Ok(())
            }
        }
    }

    /// Target id for a source id, if it has been processed.
    pub fn get(&self, source_id: ElementId) -> Option<ElementId> {
        self.forward.get(&source_id).copied()
    }

    /// Whether a source id has a target counterpart.
    pub fn contains(&self, source_id: ElementId) -> bool {
        self.forward.contains_key(&source_id)
    }

    /// All source ids mapped onto `target_id`, in id order.
    pub fn sources_for(&self, target_id: ElementId) -> Vec<ElementId> {
        self.reverse
            .get(&target_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of remapped source ids.
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Iterate over `(source, target)` pairs in source id order.
    pub fn iter(&self) -> impl Iterator<Item = (ElementId, ElementId)> + '_ {
        self.forward.iter().map(|(s, t)| (*s, *t))
    }

    /// Canonical hash of the whole table.
    ///
    /// Two runs over the same source with the same rules produce the same
    /// fingerprint.
    pub fn fingerprint(&self) -> String {
        canonical_hash_hex(&self.forward)
    }
}
