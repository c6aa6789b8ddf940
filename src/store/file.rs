//! JSON file datasets.
//!
//! A source file is read once into an [`InMemorySourceGraph`]. A target file
//! is written when the target is created and rewritten on every commit by
//! writing a sibling temp file and renaming it over the target, so the file
//! always holds the last committed state.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{
    DatasetInfo, Element, ElementId, ElementInsert, ElementPredicate, ItemType, Relationship,
    RelationshipKind, SpatialAnchor,
};
use super::memory::{CommitRecord, InMemoryError, InMemorySourceGraph, InMemoryTargetGraph, TargetElement, TargetInit};
use super::{SourceGraph, TargetGraph};

/// Error type for file-backed stores.
#[derive(Debug, thiserror::Error)]
pub enum FileStoreError {
    /// Filesystem error.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Malformed document.
    #[error("Invalid dataset document {}: {source}", path.display())]
    Json {
        /// File involved.
        path: PathBuf,
        /// Underlying error.
        source: serde_json::Error,
    },
    /// Error from the in-memory layer.
    #[error(transparent)]
    Memory(#[from] InMemoryError),
    /// Refusing to overwrite an existing target.
    #[error("Target already exists: {}", .0.display())]
    AlreadyExists(PathBuf),
}

impl FileStoreError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn json(path: &Path, source: serde_json::Error) -> Self {
        Self::Json {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// On-disk form of a source dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceDocument {
    /// Dataset name.
    pub name: String,
    /// Spatial anchor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<SpatialAnchor>,
    /// Schema references.
    #[serde(default)]
    pub schemas: Vec<String>,
    /// Elements, in any order.
    #[serde(default)]
    pub elements: Vec<Element>,
    /// Relationships.
    #[serde(default)]
    pub relationships: Vec<Relationship>,
}

/// On-disk form of a target dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetDocument {
    /// Root subject name.
    pub name: String,
    /// Spatial anchor copied from the source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchor: Option<SpatialAnchor>,
    /// Schema references.
    #[serde(default)]
    pub schemas: Vec<String>,
    /// Committed elements in insertion order.
    pub elements: Vec<TargetElement>,
    /// Committed relationships in insertion order.
    #[serde(default)]
    pub relationships: Vec<Relationship>,
    /// Commit log.
    #[serde(default)]
    pub commits: Vec<CommitRecord>,
}

impl TargetDocument {
    /// Read a target file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, FileStoreError> {
        read_json(path.as_ref())
    }

    /// Find elements by code.
    pub fn find_by_code(&self, code: &str) -> Vec<&TargetElement> {
        self.elements.iter().filter(|e| e.element.code == code).collect()
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, FileStoreError> {
    let text = fs::read_to_string(path).map_err(|e| FileStoreError::io(path, e))?;
    serde_json::from_str(&text).map_err(|e| FileStoreError::json(path, e))
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), FileStoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| FileStoreError::json(path, e))?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).map_err(|e| FileStoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| FileStoreError::io(path, e))
}

/// Source dataset loaded from a JSON file.
#[derive(Debug)]
pub struct JsonSourceGraph {
    path: PathBuf,
    inner: InMemorySourceGraph,
}

impl JsonSourceGraph {
    /// Open a source file read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FileStoreError> {
        let path = path.as_ref().to_path_buf();
        let doc: SourceDocument = read_json(&path)?;
        let inner = InMemorySourceGraph::from_parts(
            DatasetInfo {
                name: doc.name,
                anchor: doc.anchor,
            },
            doc.schemas,
            doc.elements,
            doc.relationships,
        );
        tracing::debug!(
            path = %path.display(),
            elements = inner.num_elements(),
            relationships = inner.num_relationships(),
            "Opened source dataset"
        );
        Ok(Self { path, inner })
    }

    /// Write a source document to disk.
    pub fn write(path: impl AsRef<Path>, doc: &SourceDocument) -> Result<(), FileStoreError> {
        write_json_atomic(path.as_ref(), doc)
    }

    /// Path of the source file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The loaded dataset.
    pub fn graph(&self) -> &InMemorySourceGraph {
        &self.inner
    }
}

#[async_trait]
impl SourceGraph for JsonSourceGraph {
    type Error = FileStoreError;

    async fn dataset_info(&self) -> Result<DatasetInfo, Self::Error> {
        Ok(self.inner.dataset_info().await?)
    }

    async fn scan_elements(&self, offset: usize, limit: usize) -> Result<Vec<Element>, Self::Error> {
        Ok(self.inner.scan_elements(offset, limit).await?)
    }

    async fn get_element(&self, id: ElementId) -> Result<Option<Element>, Self::Error> {
        Ok(self.inner.get_element(id).await?)
    }

    async fn get_elements(&self, ids: &[ElementId]) -> Result<Vec<Element>, Self::Error> {
        Ok(self.inner.get_elements(ids).await?)
    }

    async fn query_ids(&self, predicate: &ElementPredicate) -> Result<Vec<ElementId>, Self::Error> {
        Ok(self.inner.query_ids(predicate).await?)
    }

    async fn count_by_type(&self, item: ItemType) -> Result<u64, Self::Error> {
        Ok(self.inner.count_by_type(item).await?)
    }

    async fn scan_relationships(
        &self,
        kind: RelationshipKind,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Relationship>, Self::Error> {
        Ok(self.inner.scan_relationships(kind, offset, limit).await?)
    }
}

/// Target dataset persisted to a JSON file on every commit.
#[derive(Debug)]
pub struct JsonTargetGraph {
    path: PathBuf,
    inner: InMemoryTargetGraph,
}

impl JsonTargetGraph {
    /// Create a new target file. Fails if anything exists at `path`.
    pub fn create(path: impl AsRef<Path>, init: TargetInit) -> Result<Self, FileStoreError> {
        let path = path.as_ref().to_path_buf();
        if path.exists() {
            return Err(FileStoreError::AlreadyExists(path));
        }
        let target = Self {
            path,
            inner: InMemoryTargetGraph::new(init),
        };
        target.persist()?;
        tracing::debug!(path = %target.path.display(), "Created target dataset");
        Ok(target)
    }

    /// Path of the target file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The target, including uncommitted writes.
    pub fn graph(&self) -> &InMemoryTargetGraph {
        &self.inner
    }

    /// Register a schema reference. Becomes durable with the next commit.
    pub fn add_schema(&mut self, schema: impl Into<String>) {
        self.inner.add_schema(schema);
    }

    /// Committed state as a document.
    pub fn to_document(&self) -> TargetDocument {
        let info = self.inner.info();
        TargetDocument {
            name: info.name.clone(),
            anchor: info.anchor.clone(),
            schemas: self.inner.committed_schemas().to_vec(),
            elements: self.inner.committed_elements().to_vec(),
            relationships: self.inner.committed_relationships().to_vec(),
            commits: self.inner.commits().to_vec(),
        }
    }

    fn persist(&self) -> Result<(), FileStoreError> {
        write_json_atomic(&self.path, &self.to_document())
    }
}

#[async_trait]
impl TargetGraph for JsonTargetGraph {
    type Error = FileStoreError;

    async fn insert_element(&mut self, insert: ElementInsert) -> Result<ElementId, Self::Error> {
        Ok(self.inner.insert_element(insert).await?)
    }

    async fn insert_relationship(
        &mut self,
        from: ElementId,
        to: ElementId,
        kind: RelationshipKind,
    ) -> Result<(), Self::Error> {
        Ok(self.inner.insert_relationship(from, to, kind).await?)
    }

    async fn commit(&mut self, label: Option<&str>) -> Result<(), Self::Error> {
        self.inner.commit(label).await?;
        self.persist()
    }

    async fn exists(&self, id: ElementId) -> Result<bool, Self::Error> {
        Ok(self.inner.exists(id).await?)
    }
}
