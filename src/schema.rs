//! Schema processing hook, run once before any element is copied.

use async_trait::async_trait;

use crate::store::{InMemorySourceGraph, InMemoryTargetGraph, JsonSourceGraph, JsonTargetGraph};

/// One-shot schema replication from source to target.
///
/// Errors are surfaced by the combiner without modification.
#[async_trait]
pub trait SchemaProcessor<S, T>: Send + Sync
where
    S: Sync,
    T: Send,
{
    /// Error type of the processor.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Replicate schemas from `source` into `target`.
    async fn process(&self, source: &S, target: &mut T) -> Result<(), Self::Error>;
}

/// Processor that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpSchemaProcessor;

#[async_trait]
impl<S, T> SchemaProcessor<S, T> for NoOpSchemaProcessor
where
    S: Sync + 'static,
    T: Send + 'static,
{
    type Error = std::convert::Infallible;

    async fn process(&self, _source: &S, _target: &mut T) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Copies the list of schema references from source to target.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaRefCopier;

#[async_trait]
impl SchemaProcessor<InMemorySourceGraph, InMemoryTargetGraph> for SchemaRefCopier {
    type Error = std::convert::Infallible;

    async fn process(&self, source: &InMemorySourceGraph, target: &mut InMemoryTargetGraph) -> Result<(), Self::Error> {
        for schema in source.schemas() {
            target.add_schema(schema.clone());
        }
        tracing::debug!(schemas = source.schemas().len(), "Copied schema references");
        Ok(())
    }
}

#[async_trait]
impl SchemaProcessor<JsonSourceGraph, JsonTargetGraph> for SchemaRefCopier {
    type Error = std::convert::Infallible;

    async fn process(&self, source: &JsonSourceGraph, target: &mut JsonTargetGraph) -> Result<(), Self::Error> {
        for schema in source.graph().schemas() {
            target.add_schema(schema.clone());
        }
        tracing::debug!(schemas = source.graph().schemas().len(), "Copied schema references");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TargetInit;
    use crate::types::DatasetInfo;

    #[tokio::test]
    async fn test_copies_schema_references() {
        let mut source = InMemorySourceGraph::new(DatasetInfo::default());
        source.add_schema("ProcessFunctional");
        source.add_schema("ProcessPhysical");
        let mut target = InMemoryTargetGraph::new(TargetInit {
            name: "t".to_string(),
            anchor: None,
        });

        SchemaRefCopier.process(&source, &mut target).await.unwrap();
        assert_eq!(target.schemas(), ["ProcessFunctional".to_string(), "ProcessPhysical".to_string()]);
        assert!(target.committed_schemas().is_empty());
    }
}
