//! # graph-combiner
//!
//! Checkpointed combination of hierarchical element graphs.
//!
//! The combiner copies a source dataset into a freshly created target:
//!
//! > Which source elements reach the target, under which ids, and in which container?
//!
//! ## Core Contract
//!
//! 1. Every copied element gets a new target id, recorded once in the remap table
//! 2. Elements sharing a merge key end up in one container, created on first use
//! 3. Excluded elements never reach the target; relationships touching them are skipped
//! 4. Relationships are copied only after every element phase has completed
//! 5. Changes are committed at fixed intervals and at every phase boundary
//!
//! ## Architecture
//!
//! ```text
//! SourceGraph → Combiner ──→ TargetGraph (memory or JSON file)
//!                  ↓
//!             Classifier (copy / redirect / exclude)
//!                  ↓
//!    RemapTable · ContainerRegistry · ExclusionFilter · ProcessingPolicy
//! ```
//!
//! ## Phases
//!
//! - Elements: bulk copy in enumeration order, deferring merged subtrees
//! - Partitions: content of each deferred partition, one commit per partition
//! - Relationships: reference relationships with remapped endpoints

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod policy;
pub mod store;
pub mod canonical;
pub mod config;
pub mod error;
pub mod remap;
pub mod registry;
pub mod exclusion;
pub mod classifier;
pub mod progress;
pub mod schema;
pub mod combiner;

// Re-exports
pub use types::{
    Element, ElementId, ElementKind, ElementInsert, ElementPredicate, ItemType,
    Relationship, RelationshipKind, DatasetInfo, SpatialAnchor, Orientation, Cartographic,
};
pub use policy::{ClassificationRules, CodeMatcher, GroupRule, ProcessingPolicy};
pub use store::{
    SourceGraph, TargetGraph, InMemorySourceGraph, InMemoryTargetGraph, InMemoryError,
    JsonSourceGraph, JsonTargetGraph, FileStoreError, SourceDocument, TargetDocument,
    TargetElement, TargetInit, CommitRecord,
};
pub use canonical::{to_canonical_bytes, canonical_hash, canonical_hash_hex};
pub use config::CombinerConfig;
pub use error::{CombineError, CombineFailure, InvariantViolation};
pub use remap::IdentifierRemapTable;
pub use registry::{GroupKey, GroupedContainerRegistry};
pub use exclusion::{ExclusionFilter, ExclusionReason};
pub use classifier::{
    Classifier, ClassificationView, CopyAll, ElementDecision, GroupRequest,
    RelationshipDecision, RuleClassifier,
};
pub use progress::{
    MemorySnapshot, ProgressCategory, ProgressFn, ProgressObservation, ProgressTracker,
};
pub use schema::{NoOpSchemaProcessor, SchemaProcessor, SchemaRefCopier};
pub use combiner::{
    combine, CancellationFlag, Combiner, Phase, PhaseSummary, RelationshipSkip, Summary,
};
