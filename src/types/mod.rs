//! Core types for the combiner.

pub mod element;
pub mod relationship;
pub mod query;

pub use element::{
    Element, ElementId, ElementKind, ElementInsert, ParseElementIdError,
    SpatialAnchor, Orientation, Cartographic, DatasetInfo,
};
pub use relationship::{Relationship, RelationshipKind};
pub use query::{ElementPredicate, ItemType};
