//! Dataset storage backends.
//!
//! A combine run reads from a [`SourceGraph`] and writes to a
//! [`TargetGraph`]. Both traits are async; the combiner awaits every call
//! before issuing the next, so a `commit` is a barrier.

pub mod file;
pub mod memory;

use async_trait::async_trait;

use crate::types::{
    DatasetInfo, Element, ElementId, ElementInsert, ElementPredicate, ItemType, Relationship,
    RelationshipKind,
};

/// Read access to a source dataset.
///
/// Implementations must return elements in enumeration order: categories
/// first, then parents before their children and a partition before the
/// elements it contains. The order must be stable across calls.
#[async_trait]
pub trait SourceGraph: Send + Sync {
    /// Error type for source operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Dataset name and spatial anchor.
    async fn dataset_info(&self) -> Result<DatasetInfo, Self::Error>;

    /// Fetch up to `limit` elements starting at `offset` in enumeration order.
    async fn scan_elements(&self, offset: usize, limit: usize) -> Result<Vec<Element>, Self::Error>;

    /// Fetch an element by id.
    async fn get_element(&self, id: ElementId) -> Result<Option<Element>, Self::Error>;

    /// Fetch several elements, preserving the order of `ids`. Unknown ids are skipped.
    async fn get_elements(&self, ids: &[ElementId]) -> Result<Vec<Element>, Self::Error>;

    /// Ids of the elements matching `predicate`, in enumeration order.
    async fn query_ids(&self, predicate: &ElementPredicate) -> Result<Vec<ElementId>, Self::Error>;

    /// Count elements or relationships.
    async fn count_by_type(&self, item: ItemType) -> Result<u64, Self::Error>;

    /// Fetch up to `limit` relationships of one kind starting at `offset`.
    async fn scan_relationships(
        &self,
        kind: RelationshipKind,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Relationship>, Self::Error>;
}

/// Write access to a target dataset.
#[async_trait]
pub trait TargetGraph: Send + Sync {
    /// Error type for target operations.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Root subject of the target.
    fn root_subject(&self) -> ElementId {
        ElementId::ROOT
    }

    /// Insert an element and return its new id.
    async fn insert_element(&mut self, insert: ElementInsert) -> Result<ElementId, Self::Error>;

    /// Insert a relationship between two target elements.
    async fn insert_relationship(
        &mut self,
        from: ElementId,
        to: ElementId,
        kind: RelationshipKind,
    ) -> Result<(), Self::Error>;

    /// Make every change so far durable.
    async fn commit(&mut self, label: Option<&str>) -> Result<(), Self::Error>;

    /// Whether an element exists in the target (committed or not).
    async fn exists(&self, id: ElementId) -> Result<bool, Self::Error>;
}

pub use file::{FileStoreError, JsonSourceGraph, JsonTargetGraph, SourceDocument, TargetDocument};
pub use memory::{
    CommitRecord, InMemoryError, InMemorySourceGraph, InMemoryTargetGraph, TargetElement, TargetInit,
};
