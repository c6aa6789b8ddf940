//! In-memory source and target datasets.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::sync::OnceLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    DatasetInfo, Element, ElementId, ElementInsert, ElementKind, ElementPredicate, ItemType,
    Relationship, RelationshipKind, SpatialAnchor,
};
use super::{SourceGraph, TargetGraph};

/// First id handed out by a target. Lower ids are reserved.
pub const FIRST_TARGET_ID: u64 = 0x20;

/// Error type for in-memory stores.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InMemoryError {
    /// Referenced element does not exist.
    #[error("Element not found: {0}")]
    ElementNotFound(ElementId),
}

/// In-memory source dataset.
///
/// Uses BTreeMap for deterministic iteration. The enumeration order is
/// computed on first use and reset by every mutation.
#[derive(Debug, Default)]
pub struct InMemorySourceGraph {
    info: DatasetInfo,
    schemas: Vec<String>,
    elements: BTreeMap<ElementId, Element>,
    relationships: BTreeMap<RelationshipKind, Vec<Relationship>>,
    order: OnceLock<Vec<ElementId>>,
}

impl InMemorySourceGraph {
    /// Create an empty dataset.
    pub fn new(info: DatasetInfo) -> Self {
        Self {
            info,
            ..Self::default()
        }
    }

    /// Build a dataset from its parts.
    pub fn from_parts(
        info: DatasetInfo,
        schemas: Vec<String>,
        elements: impl IntoIterator<Item = Element>,
        relationships: impl IntoIterator<Item = Relationship>,
    ) -> Self {
        let mut graph = Self::new(info);
        graph.schemas = schemas;
        for element in elements {
            graph.add_element(element);
        }
        for relationship in relationships {
            graph.add_relationship(relationship);
        }
        graph
    }

    /// Add (or replace) an element.
    pub fn add_element(&mut self, element: Element) {
        self.elements.insert(element.id, element);
        self.order = OnceLock::new();
    }

    /// Add a relationship.
    pub fn add_relationship(&mut self, relationship: Relationship) {
        self.relationships
            .entry(relationship.kind)
            .or_default()
            .push(relationship);
    }

    /// Add a schema reference.
    pub fn add_schema(&mut self, schema: impl Into<String>) {
        self.schemas.push(schema.into());
    }

    /// Dataset metadata.
    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    /// Schema references.
    pub fn schemas(&self) -> &[String] {
        &self.schemas
    }

    /// Get an element.
    pub fn element(&self, id: ElementId) -> Option<&Element> {
        self.elements.get(&id)
    }

    /// Number of elements.
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Number of relationships of all kinds.
    pub fn num_relationships(&self) -> usize {
        self.relationships.values().map(Vec::len).sum()
    }

    /// All relationships, grouped by kind.
    pub fn all_relationships(&self) -> impl Iterator<Item = &Relationship> + '_ {
        self.relationships.values().flatten()
    }

    /// Element ids in enumeration order.
    pub fn enumeration_order(&self) -> &[ElementId] {
        self.order.get_or_init(|| enumeration_order(&self.elements))
    }
}

fn rank(kind: ElementKind) -> u8 {
    match kind {
        ElementKind::Category => 0,
        _ => 1,
    }
}

/// Topological order over parent, container and category links.
///
/// Among ready elements categories go first, then lower ids. Elements caught
/// in a cycle are appended in id order.
fn enumeration_order(elements: &BTreeMap<ElementId, Element>) -> Vec<ElementId> {
    let mut pending: BTreeMap<ElementId, usize> = BTreeMap::new();
    let mut dependents: BTreeMap<ElementId, Vec<ElementId>> = BTreeMap::new();

    for element in elements.values() {
        let mut predecessors = BTreeSet::new();
        for link in [element.parent_id, Some(element.container_id), element.category_id].into_iter().flatten() {
            if link != element.id && elements.contains_key(&link) {
                predecessors.insert(link);
            }
        }
        for predecessor in &predecessors {
            dependents.entry(*predecessor).or_default().push(element.id);
        }
        pending.insert(element.id, predecessors.len());
    }

    let mut ready: BinaryHeap<Reverse<(u8, ElementId)>> = elements
        .values()
        .filter(|e| pending.get(&e.id) == Some(&0))
        .map(|e| Reverse((rank(e.kind), e.id)))
        .collect();

    let mut order = Vec::with_capacity(elements.len());
    while let Some(Reverse((_, id))) = ready.pop() {
        order.push(id);
        let Some(children) = dependents.get(&id) else {
            continue;
        };
        for child in children {
            if let Some(count) = pending.get_mut(child) {
                *count -= 1;
                if *count == 0 {
                    let kind = elements.get(child).map_or(ElementKind::Ordinary, |e| e.kind);
                    ready.push(Reverse((rank(kind), *child)));
                }
            }
        }
    }

    if order.len() < elements.len() {
        let emitted: BTreeSet<ElementId> = order.iter().copied().collect();
        order.extend(elements.keys().copied().filter(|id| !emitted.contains(id)));
    }
    order
}

#[async_trait]
impl SourceGraph for InMemorySourceGraph {
    type Error = InMemoryError;

    async fn dataset_info(&self) -> Result<DatasetInfo, Self::Error> {
        Ok(self.info.clone())
    }

    async fn scan_elements(&self, offset: usize, limit: usize) -> Result<Vec<Element>, Self::Error> {
        Ok(self
            .enumeration_order()
            .iter()
            .skip(offset)
            .take(limit)
            .filter_map(|id| self.elements.get(id).cloned())
            .collect())
    }

    async fn get_element(&self, id: ElementId) -> Result<Option<Element>, Self::Error> {
        Ok(self.elements.get(&id).cloned())
    }

    async fn get_elements(&self, ids: &[ElementId]) -> Result<Vec<Element>, Self::Error> {
        Ok(ids
            .iter()
            .filter_map(|id| self.elements.get(id).cloned())
            .collect())
    }

    async fn query_ids(&self, predicate: &ElementPredicate) -> Result<Vec<ElementId>, Self::Error> {
        Ok(self
            .enumeration_order()
            .iter()
            .filter(|id| self.elements.get(id).map_or(false, |e| predicate.matches(e)))
            .copied()
            .collect())
    }

    async fn count_by_type(&self, item: ItemType) -> Result<u64, Self::Error> {
        let count = match item {
            ItemType::Elements => self.elements.len(),
            ItemType::ElementsOfKind(kind) => self.elements.values().filter(|e| e.kind == kind).count(),
            ItemType::Relationships(kind) => self.relationships.get(&kind).map_or(0, Vec::len),
        };
        Ok(count as u64)
    }

    async fn scan_relationships(
        &self,
        kind: RelationshipKind,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Relationship>, Self::Error> {
        Ok(self
            .relationships
            .get(&kind)
            .map(|all| all.iter().skip(offset).take(limit).cloned().collect())
            .unwrap_or_default())
    }
}

/// Parameters for creating a target dataset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetInit {
    /// Name of the root subject.
    pub name: String,
    /// Spatial anchor copied from the source.
    pub anchor: Option<SpatialAnchor>,
}

/// Element stored in a target, with its import flags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetElement {
    /// The element, with target-side ids.
    pub element: Element,
    /// Whether geometry was simplified on import.
    pub simplify_geometry: bool,
}

/// One durable commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// 1-based commit sequence number.
    pub sequence: u64,
    /// Commit label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Commit time.
    pub committed_at: DateTime<Utc>,
    /// Elements in the target after the commit.
    pub elements: usize,
    /// Relationships in the target after the commit.
    pub relationships: usize,
}

#[derive(Debug, Clone, Copy, Default)]
struct Watermark {
    elements: usize,
    relationships: usize,
    schemas: usize,
}

/// In-memory target dataset.
///
/// Writes are append-only; a commit moves the watermark that delimits the
/// committed view. The root subject is part of the initial committed state.
#[derive(Debug, Clone)]
pub struct InMemoryTargetGraph {
    info: DatasetInfo,
    elements: Vec<TargetElement>,
    index: BTreeMap<ElementId, usize>,
    relationships: Vec<Relationship>,
    schemas: Vec<String>,
    commits: Vec<CommitRecord>,
    committed: Watermark,
    next_id: u64,
}

impl InMemoryTargetGraph {
    /// Create a target holding only its root subject.
    pub fn new(init: TargetInit) -> Self {
        let root = Element::new(ElementId::ROOT, ElementKind::Subject, ElementId::ROOT).with_code(init.name.clone());
        let mut index = BTreeMap::new();
        index.insert(ElementId::ROOT, 0);
        Self {
            info: DatasetInfo {
                name: init.name,
                anchor: init.anchor,
            },
            elements: vec![TargetElement {
                element: root,
                simplify_geometry: true,
            }],
            index,
            relationships: Vec::new(),
            schemas: Vec::new(),
            commits: Vec::new(),
            committed: Watermark {
                elements: 1,
                relationships: 0,
                schemas: 0,
            },
            next_id: FIRST_TARGET_ID,
        }
    }

    /// Dataset metadata.
    pub fn info(&self) -> &DatasetInfo {
        &self.info
    }

    /// Register a schema reference. Becomes durable with the next commit.
    pub fn add_schema(&mut self, schema: impl Into<String>) {
        self.schemas.push(schema.into());
    }

    /// Schema references, committed or not.
    pub fn schemas(&self) -> &[String] {
        &self.schemas
    }

    /// Get an element, committed or not.
    pub fn element(&self, id: ElementId) -> Option<&TargetElement> {
        self.index.get(&id).and_then(|i| self.elements.get(*i))
    }

    /// All elements in insertion order, committed or not.
    pub fn elements(&self) -> &[TargetElement] {
        &self.elements
    }

    /// All relationships in insertion order, committed or not.
    pub fn relationships(&self) -> &[Relationship] {
        &self.relationships
    }

    /// Elements with the given code.
    pub fn find_by_code(&self, code: &str) -> Vec<&TargetElement> {
        self.elements.iter().filter(|e| e.element.code == code).collect()
    }

    /// Elements held by a container.
    pub fn contained_in(&self, container: ElementId) -> Vec<&TargetElement> {
        self.elements
            .iter()
            .filter(|e| e.element.container_id == container && e.element.id != container)
            .collect()
    }

    /// Direct children of an element.
    pub fn children_of(&self, parent: ElementId) -> Vec<&TargetElement> {
        self.elements
            .iter()
            .filter(|e| e.element.parent_id == Some(parent))
            .collect()
    }

    /// Number of elements, including the root subject.
    pub fn num_elements(&self) -> usize {
        self.elements.len()
    }

    /// Commit log.
    pub fn commits(&self) -> &[CommitRecord] {
        &self.commits
    }

    /// Elements as of the last commit.
    pub fn committed_elements(&self) -> &[TargetElement] {
        &self.elements[..self.committed.elements]
    }

    /// Relationships as of the last commit.
    pub fn committed_relationships(&self) -> &[Relationship] {
        &self.relationships[..self.committed.relationships]
    }

    /// Schema references as of the last commit.
    pub fn committed_schemas(&self) -> &[String] {
        &self.schemas[..self.committed.schemas]
    }

    /// Whether there are writes after the last commit.
    pub fn has_uncommitted_changes(&self) -> bool {
        self.elements.len() != self.committed.elements
            || self.relationships.len() != self.committed.relationships
            || self.schemas.len() != self.committed.schemas
    }

    fn require(&self, id: ElementId) -> Result<(), InMemoryError> {
        if self.index.contains_key(&id) {
            Ok(())
        } else {
            Err(InMemoryError::ElementNotFound(id))
        }
    }
}

#[async_trait]
impl TargetGraph for InMemoryTargetGraph {
    type Error = InMemoryError;

    async fn insert_element(&mut self, insert: ElementInsert) -> Result<ElementId, Self::Error> {
        self.require(insert.container_id)?;
        for link in [insert.parent_id, insert.category_id].into_iter().flatten() {
            self.require(link)?;
        }

        let id = ElementId::new(self.next_id);
        self.next_id += 1;

        let element = Element {
            id,
            parent_id: insert.parent_id,
            container_id: insert.container_id,
            kind: insert.kind,
            code: insert.code,
            category_id: insert.category_id,
            properties: insert.properties,
        };
        self.index.insert(id, self.elements.len());
        self.elements.push(TargetElement {
            element,
            simplify_geometry: insert.simplify_geometry,
        });
        Ok(id)
    }

    async fn insert_relationship(
        &mut self,
        from: ElementId,
        to: ElementId,
        kind: RelationshipKind,
    ) -> Result<(), Self::Error> {
        self.require(from)?;
        self.require(to)?;
        self.relationships.push(Relationship::new(from, to, kind));
        Ok(())
    }

    async fn commit(&mut self, label: Option<&str>) -> Result<(), Self::Error> {
        self.committed = Watermark {
            elements: self.elements.len(),
            relationships: self.relationships.len(),
            schemas: self.schemas.len(),
        };
        self.commits.push(CommitRecord {
            sequence: self.commits.len() as u64 + 1,
            label: label.map(str::to_string),
            committed_at: Utc::now(),
            elements: self.elements.len(),
            relationships: self.relationships.len(),
        });
        Ok(())
    }

    async fn exists(&self, id: ElementId) -> Result<bool, Self::Error> {
        Ok(self.index.contains_key(&id))
    }
}
