//! Error types for combine runs.

use crate::registry::GroupKey;
use crate::types::ElementId;
use crate::combiner::Phase;

/// Boxed error raised by a collaborator.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Internal consistency violation.
///
/// These indicate a bug in a classifier or in the combiner itself, never a
/// runtime condition to recover from.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// A source id was remapped to two different target ids.
    #[error("Source element {source_id} already remapped to {existing}, refusing {requested}")]
    DuplicateRemap {
        /// Source element being remapped.
        source_id: ElementId,
        /// Target id already on record.
        existing: ElementId,
        /// Target id that was requested.
        requested: ElementId,
    },

    /// A merge container was registered twice for the same key.
    #[error("Merge container for group '{key}' created twice ({existing} and {requested})")]
    DuplicateGroup {
        /// Group key.
        key: GroupKey,
        /// Container already on record.
        existing: ElementId,
        /// Container that was offered.
        requested: ElementId,
    },

    /// A copied element references a source id with no target counterpart.
    #[error("Element {element} references {reference} which has no target counterpart")]
    UnresolvedReference {
        /// Element being copied.
        element: ElementId,
        /// Referenced source id.
        reference: ElementId,
    },

    /// A registered merge container is missing from the target.
    #[error("Merge container {container} for group '{key}' is missing from the target")]
    MissingGroupContainer {
        /// Group key.
        key: GroupKey,
        /// Registered container id.
        container: ElementId,
    },
}

/// Error type for combine runs.
#[derive(Debug, thiserror::Error)]
pub enum CombineError {
    /// Invalid configuration or occupied target path.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Enumeration or query against the source failed.
    #[error("Source read error: {0}")]
    SourceRead(String),

    /// Insert or commit against the target failed.
    #[error("Target write error: {0}")]
    TargetWrite(String),

    /// The schema processor failed. The collaborator's error is kept as-is.
    #[error("Schema processing failed: {0}")]
    SchemaProcessing(#[source] BoxError),

    /// Internal consistency violation.
    #[error("Invariant violation: {0}")]
    Invariant(#[from] InvariantViolation),

    /// The run was cancelled between two items.
    #[error("Run cancelled")]
    Cancelled,
}

impl CombineError {
    /// Create a configuration error.
    pub fn config<E: std::fmt::Display>(e: E) -> Self {
        Self::Configuration(e.to_string())
    }

    /// Create a source read error from any error type.
    pub fn source_read<E: std::error::Error>(e: E) -> Self {
        Self::SourceRead(e.to_string())
    }

    /// Create a target write error from any error type.
    pub fn target_write<E: std::error::Error>(e: E) -> Self {
        Self::TargetWrite(e.to_string())
    }

    /// Wrap a schema processor error without altering it.
    pub fn schema<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Self::SchemaProcessing(Box::new(e))
    }
}

/// A failed run: the first error, with the phase and progress it happened at.
///
/// The target is left at its last completed commit.
#[derive(Debug, thiserror::Error)]
#[error("Combine failed during {phase} phase after {processed} processed items: {error}")]
pub struct CombineFailure {
    /// Phase that was running.
    pub phase: Phase,
    /// Items processed in that phase before the failure.
    pub processed: u64,
    /// The error that aborted the run.
    #[source]
    pub error: CombineError,
}

impl CombineFailure {
    /// Attach phase context to an error.
    pub fn new(phase: Phase, processed: u64, error: CombineError) -> Self {
        Self {
            phase,
            processed,
            error,
        }
    }

    /// Failure before any phase started (configuration, opening datasets).
    pub fn setup(error: CombineError) -> Self {
        Self::new(Phase::Setup, 0, error)
    }

    /// Whether the run was cancelled rather than failing.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.error, CombineError::Cancelled)
    }
}
