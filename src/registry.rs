//! Merge-container registry.
//!
//! Maps a group key to the target container created for it. A key's
//! container is created at most once per run: `get_or_create` only runs the
//! factory on the first request for a key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;

use crate::error::InvariantViolation;
use crate::types::ElementId;

/// Key identifying a merge group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupKey(String);

impl GroupKey {
    /// Create a new group key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Get the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for GroupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for GroupKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Lazy get-or-create map from group key to target container id.
#[derive(Debug, Clone, Default)]
pub struct GroupedContainerRegistry {
    containers: BTreeMap<GroupKey, ElementId>,
}

impl GroupedContainerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Container registered for `key`, if any.
    pub fn get(&self, key: &GroupKey) -> Option<ElementId> {
        self.containers.get(key).copied()
    }

    /// Register the container for a new key.
    ///
    /// Fails if the key already has a container.
    pub fn register(&mut self, key: GroupKey, container: ElementId) -> Result<(), InvariantViolation> {
        if let Some(existing) = self.containers.get(&key) {
            return Err(InvariantViolation::DuplicateGroup {
                key,
                existing: *existing,
                requested: container,
            });
        }
        self.containers.insert(key, container);
        Ok(())
    }

    /// Return the container for `key`, creating it with `factory` on first use.
    ///
    /// The factory runs at most once per key. If it fails nothing is
    /// registered and the error is returned unchanged.
    pub async fn get_or_create<F, Fut, E>(&mut self, key: &GroupKey, factory: F) -> Result<ElementId, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<ElementId, E>>,
    {
        if let Some(existing) = self.get(key) {
            return Ok(existing);
        }
        let created = factory().await?;
        self.containers.insert(key.clone(), created);
        Ok(created)
    }

    /// Number of merge groups.
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Whether no group has been created.
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }

    /// Iterate over `(key, container)` pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&GroupKey, ElementId)> + '_ {
        self.containers.iter().map(|(k, v)| (k, *v))
    }
}
