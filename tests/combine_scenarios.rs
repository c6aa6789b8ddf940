//! Scenario tests for the combiner.
//!
//! These tests run complete combines against in-memory datasets and check
//! merging, exclusion, checkpointing and failure behavior.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use graph_combiner::{
    CancellationFlag, ClassificationRules, ClassificationView, Classifier, CombineError,
    Combiner, CombinerConfig, CopyAll, DatasetInfo, Element, ElementDecision, ElementId,
    ElementInsert, ElementKind, ExclusionReason, InMemoryError, InMemorySourceGraph,
    InMemoryTargetGraph, Phase, ProgressFn, ProgressObservation, Relationship, RelationshipKind,
    RelationshipSkip, RuleClassifier, SchemaProcessor, TargetGraph, TargetInit,
};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn id(value: u64) -> ElementId {
    ElementId::new(value)
}

fn subject(value: u64, parent: ElementId, code: &str) -> Element {
    Element::new(id(value), ElementKind::Subject, ElementId::ROOT)
        .with_parent(parent)
        .with_code(code)
}

fn partition(value: u64, parent: ElementId, code: &str) -> Element {
    Element::new(id(value), ElementKind::Partition, ElementId::ROOT)
        .with_parent(parent)
        .with_code(code)
}

fn category(value: u64, code: &str) -> Element {
    Element::new(id(value), ElementKind::Category, ElementId::ROOT)
        .with_parent(ElementId::ROOT)
        .with_code(code)
}

fn ordinary(value: u64, container: u64, code: &str) -> Element {
    Element::new(id(value), ElementKind::Ordinary, id(container)).with_code(code)
}

fn new_target() -> InMemoryTargetGraph {
    InMemoryTargetGraph::new(TargetInit {
        name: "Combined-Target".to_string(),
        anchor: None,
    })
}

fn build_source(elements: Vec<Element>, relationships: Vec<Relationship>) -> Arc<InMemorySourceGraph> {
    Arc::new(InMemorySourceGraph::from_parts(
        DatasetInfo {
            name: "plant".to_string(),
            anchor: None,
        },
        Vec::new(),
        elements,
        relationships,
    ))
}

/// A plant: a `Physical` subject holding two partitions (one nested one
/// level down), a functional partition, two tag partitions and a denied
/// insulation category.
fn build_plant() -> Arc<InMemorySourceGraph> {
    build_source(
        vec![
            Element::new(ElementId::ROOT, ElementKind::Subject, ElementId::ROOT).with_code("plant"),
            category(0x10, "Piping"),
            category(0x11, "Insulation"),
            subject(0x20, ElementId::ROOT, "Physical"),
            subject(0x21, id(0x20), "Area 51"),
            partition(0x30, id(0x20), "A"),
            partition(0x31, id(0x21), "B"),
            partition(0x32, ElementId::ROOT, "Functional"),
            partition(0x33, ElementId::ROOT, "PDMxPhysical-Tag"),
            partition(0x34, ElementId::ROOT, "PDMxPhysical-Tag"),
            ordinary(0x100, 0x30, "pipe-a").with_category(id(0x10)),
            ordinary(0x101, 0x30, "lagging-a").with_category(id(0x11)),
            ordinary(0x102, 0x31, "pipe-b").with_category(id(0x10)),
            ordinary(0x103, 0x32, "pump"),
            ordinary(0x104, 0x33, "tag-1"),
            ordinary(0x105, 0x34, "tag-2"),
        ],
        vec![
            Relationship::reference(id(0x103), id(0x100)),
            Relationship::reference(id(0x103), id(0x101)),
            Relationship::reference(id(0x104), id(0x102)),
            Relationship::reference(id(0x105), id(0x999)),
            Relationship::new(id(0x103), id(0x102), RelationshipKind::Grouping),
        ],
    )
}

fn plant_combiner() -> Combiner<InMemorySourceGraph, InMemoryTargetGraph, RuleClassifier> {
    let classifier = RuleClassifier::new(&ClassificationRules::physical_models()).unwrap();
    Combiner::new(build_plant(), new_target(), classifier, CombinerConfig::default()).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Merging
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_grouping_ancestor_merges_descendant_partitions() {
    let mut combiner = plant_combiner();
    let summary = combiner.combine().await.unwrap();
    let target = combiner.target();

    let merged = target.find_by_code("Combined Physical");
    assert_eq!(merged.len(), 1);
    let container = merged[0].element.id;
    assert_eq!(merged[0].element.parent_id, Some(target.root_subject()));

    // Content of A and B lands in the one container
    let content: Vec<&str> = target
        .contained_in(container)
        .iter()
        .map(|e| e.element.code.as_str())
        .collect();
    assert_eq!(content, vec!["pipe-a", "pipe-b"]);

    // The ancestor and its nested subject are not copied
    assert!(target.find_by_code("Physical").is_empty());
    assert!(target.find_by_code("Area 51").is_empty());

    assert_eq!(combiner.deferred_partitions(), &[id(0x30), id(0x31)]);
    assert_eq!(summary.deferred_partitions, 2);
}

#[tokio::test]
async fn test_submodels_inside_merged_partition_are_copied() {
    let source = build_source(
        vec![
            subject(0x20, ElementId::ROOT, "Physical"),
            partition(0x30, id(0x20), "A"),
            ordinary(0x40, 0x30, "skid"),
            ordinary(0x50, 0x40, "pump"),
            ordinary(0x60, 0x50, "impeller"),
        ],
        vec![Relationship::reference(id(0x60), id(0x40))],
    );
    let classifier = RuleClassifier::new(&ClassificationRules::physical_models()).unwrap();
    let mut combiner = Combiner::new(source, new_target(), classifier, CombinerConfig::default()).unwrap();
    let summary = combiner.combine().await.unwrap();

    let container = combiner.remaps().get(id(0x30)).unwrap();
    let skid = combiner.remaps().get(id(0x40)).unwrap();
    let pump = combiner.remaps().get(id(0x50)).unwrap();
    let impeller = combiner.remaps().get(id(0x60)).unwrap();

    let target = combiner.target();
    assert_eq!(target.element(skid).unwrap().element.container_id, container);
    assert_eq!(target.element(pump).unwrap().element.container_id, skid);
    assert_eq!(target.element(impeller).unwrap().element.container_id, pump);
    assert_eq!(target.relationships(), &[Relationship::reference(impeller, skid)]);

    // Nested content is left to the partition phase and counted there only
    let elements = summary.phase(Phase::Elements).unwrap();
    assert_eq!(elements.processed, 2);
    assert_eq!(elements.deferred, 3);
    assert_eq!(elements.total, 2);

    let partitions = summary.phase(Phase::Partitions).unwrap();
    assert_eq!(partitions.processed, 3);
    assert_eq!(partitions.total, 3);
}

#[tokio::test]
async fn test_parents_across_merged_partitions_are_resolved() {
    let source = build_source(
        vec![
            subject(0x20, ElementId::ROOT, "Physical"),
            partition(0x30, id(0x20), "A"),
            partition(0x31, id(0x20), "B"),
            // A's pipe hangs off B's rack; B's valve hangs off A's header
            ordinary(0x40, 0x30, "pipe").with_parent(id(0x41)),
            ordinary(0x41, 0x31, "rack"),
            ordinary(0x42, 0x31, "valve").with_parent(id(0x43)),
            ordinary(0x43, 0x30, "header"),
        ],
        Vec::new(),
    );
    let classifier = RuleClassifier::new(&ClassificationRules::physical_models()).unwrap();
    let mut combiner = Combiner::new(source, new_target(), classifier, CombinerConfig::default()).unwrap();
    let summary = combiner.combine().await.unwrap();

    let remaps = combiner.remaps();
    let target = combiner.target();
    let pipe = target.element(remaps.get(id(0x40)).unwrap()).unwrap();
    let valve = target.element(remaps.get(id(0x42)).unwrap()).unwrap();
    assert_eq!(pipe.element.parent_id, remaps.get(id(0x41)));
    assert_eq!(valve.element.parent_id, remaps.get(id(0x43)));
    assert_eq!(target.contained_in(remaps.get(id(0x30)).unwrap()).len(), 4);

    // Each element is visited once even when pulled ahead of its partition
    let partitions = summary.phase(Phase::Partitions).unwrap();
    assert_eq!(partitions.processed, 4);
    assert_eq!(partitions.total, 4);
    assert_eq!(summary.elements_copied, 4);

    // The rack is committed with partition A, ahead of its own partition
    let commits = target.commits();
    assert_eq!(commits[1].label.as_deref(), Some("Finished processing partition 0x30"));
    assert_eq!(commits[1].elements, commits[0].elements + 3);
    assert_eq!(commits[2].elements, commits[1].elements + 1);
}

#[tokio::test]
async fn test_tag_partitions_share_one_container() {
    let mut combiner = plant_combiner();
    combiner.combine().await.unwrap();
    let target = combiner.target();

    let tags = target.find_by_code("PDMxPhysical-Tag");
    assert_eq!(tags.len(), 1);
    let container = tags[0].element.id;

    assert_eq!(combiner.remaps().get(id(0x33)), Some(container));
    assert_eq!(combiner.remaps().get(id(0x34)), Some(container));
    assert_eq!(combiner.remaps().sources_for(container), vec![id(0x33), id(0x34)]);

    // Created on first encounter: before the content of the first tag partition.
    let tag_1 = combiner.remaps().get(id(0x104)).unwrap();
    assert!(container < tag_1);
    assert_eq!(target.contained_in(container).len(), 2);
}

#[tokio::test]
async fn test_each_group_key_creates_one_container() {
    let mut combiner = plant_combiner();
    let summary = combiner.combine().await.unwrap();

    assert_eq!(summary.merged_containers, 2);
    assert_eq!(combiner.groups().len(), 2);
    for (_, container) in combiner.groups().iter() {
        assert!(combiner.target().element(container).is_some());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Exclusion and referential integrity
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_denied_category_excludes_elements_and_skips_relationships() {
    let mut combiner = plant_combiner();
    let summary = combiner.combine().await.unwrap();
    let target = combiner.target();

    assert_eq!(combiner.exclusions().reason(id(0x11)), Some(ExclusionReason::DenyList));
    assert_eq!(combiner.exclusions().reason(id(0x101)), Some(ExclusionReason::DeniedCategory));
    assert!(target.find_by_code("Insulation").is_empty());
    assert!(target.find_by_code("lagging-a").is_empty());

    // pump -> lagging-a is skipped, dangling 0x999 is unmapped, the grouping edge is out of scope
    assert_eq!(summary.relationships_copied, 2);
    assert_eq!(summary.relationship_skips.get(&RelationshipSkip::ExcludedEndpoint), Some(&1));
    assert_eq!(summary.relationship_skips.get(&RelationshipSkip::UnmappedEndpoint), Some(&1));
    assert_eq!(summary.relationships_skipped, 2);
}

#[tokio::test]
async fn test_excluded_ids_never_reach_the_target() {
    let mut combiner = plant_combiner();
    combiner.combine().await.unwrap();

    for excluded in combiner.exclusions().ids() {
        assert!(combiner.remaps().get(excluded).is_none(), "{excluded} was remapped");
    }
}

#[tokio::test]
async fn test_written_relationships_have_mapped_endpoints() {
    let mut combiner = plant_combiner();
    combiner.combine().await.unwrap();
    let target = combiner.target();

    for relationship in target.relationships() {
        assert_eq!(relationship.kind, RelationshipKind::Reference);
        assert!(target.element(relationship.from).is_some());
        assert!(target.element(relationship.to).is_some());
        assert!(!combiner.remaps().sources_for(relationship.from).is_empty());
        assert!(!combiner.remaps().sources_for(relationship.to).is_empty());
    }
}

/// Excludes elements coded `temp`, and everything below them.
struct DropTemporary;

impl Classifier for DropTemporary {
    fn classify_element(&self, element: &Element, _view: &ClassificationView<'_>) -> ElementDecision {
        if element.code == "temp" {
            ElementDecision::Exclude(ExclusionReason::Policy)
        } else {
            ElementDecision::Proceed
        }
    }
}

#[tokio::test]
async fn test_policy_exclusion_propagates_to_children() {
    let source = build_source(
        vec![
            partition(0x20, ElementId::ROOT, "Model"),
            ordinary(0x30, 0x20, "temp"),
            ordinary(0x31, 0x20, "child").with_parent(id(0x30)),
            ordinary(0x32, 0x20, "keep"),
        ],
        vec![Relationship::reference(id(0x32), id(0x31))],
    );
    let mut combiner = Combiner::new(source, new_target(), DropTemporary, CombinerConfig::default()).unwrap();
    let summary = combiner.combine().await.unwrap();

    assert_eq!(combiner.exclusions().reason(id(0x30)), Some(ExclusionReason::Policy));
    assert_eq!(combiner.exclusions().reason(id(0x31)), Some(ExclusionReason::ExcludedAncestor));
    assert_eq!(summary.elements_copied, 2);
    assert_eq!(summary.relationships_copied, 0);
}

// ─────────────────────────────────────────────────────────────────────────────
// Progress and checkpoints
// ─────────────────────────────────────────────────────────────────────────────

fn flat_source(n: u64) -> Arc<InMemorySourceGraph> {
    let mut elements = vec![partition(0x20, ElementId::ROOT, "Model")];
    elements.extend((1..n).map(|i| ordinary(0x1000 + i, 0x20, "item")));
    build_source(elements, Vec::new())
}

#[tokio::test]
async fn test_25000_elements_checkpoint_schedule() {
    let observed = Arc::new(AtomicU64::new(0));
    let counter = observed.clone();
    let observer: ProgressFn = Arc::new(move |_: &ProgressObservation| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let config = CombinerConfig::default().with_intervals(1000, 10_000);
    let mut combiner = Combiner::new(flat_source(25_000), new_target(), CopyAll, config)
        .unwrap()
        .with_observer(observer);
    let summary = combiner.combine().await.unwrap();

    let elements = summary.phase(Phase::Elements).unwrap();
    assert_eq!(elements.processed, 25_000);
    assert_eq!(elements.total, 25_000);
    assert_eq!(elements.observations, 25);
    assert_eq!(elements.interval_commits, 2);
    assert_eq!(elements.boundary_commits, 1);
    assert_eq!(observed.load(Ordering::SeqCst), 25);

    let relationships = summary.phase(Phase::Relationships).unwrap();
    assert_eq!(relationships.boundary_commits, 1);
    assert_eq!(summary.commits, 4);

    let labels: Vec<Option<&str>> = combiner
        .target()
        .commits()
        .iter()
        .map(|c| c.label.as_deref())
        .collect();
    assert_eq!(
        labels,
        vec![
            Some("Processed 10000 elements"),
            Some("Processed 20000 elements"),
            Some("Finished processing elements"),
            Some("Finished processing relationships"),
        ]
    );
}

#[tokio::test]
async fn test_interval_commit_never_splits_an_element() {
    let config = CombinerConfig::default().with_intervals(5, 10);
    let mut combiner = Combiner::new(flat_source(30), new_target(), CopyAll, config).unwrap();
    combiner.combine().await.unwrap();

    // Each interval commit lands between two complete elements.
    let commits = combiner.target().commits();
    assert_eq!(commits[0].elements, 1 + 9);
    assert_eq!(commits[1].elements, 1 + 19);
    assert_eq!(commits[2].elements, 1 + 29);
}

#[tokio::test]
async fn test_remap_fingerprint_is_reproducible() {
    let mut first = plant_combiner();
    let mut second = plant_combiner();
    let a = first.combine().await.unwrap();
    let b = second.combine().await.unwrap();

    assert_ne!(a.run_id, b.run_id);
    assert_eq!(a.remap_fingerprint, b.remap_fingerprint);
    assert_eq!(first.remaps().fingerprint(), a.remap_fingerprint);
}

// ─────────────────────────────────────────────────────────────────────────────
// Failure and cancellation
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
enum FaultError {
    #[error("injected failure on insert {0}")]
    Injected(usize),
    #[error(transparent)]
    Store(#[from] InMemoryError),
}

/// Target that fails on the n-th element insert.
struct FaultyTarget {
    inner: InMemoryTargetGraph,
    fail_on_insert: usize,
    inserts: usize,
}

#[async_trait]
impl TargetGraph for FaultyTarget {
    type Error = FaultError;

    async fn insert_element(&mut self, insert: ElementInsert) -> Result<ElementId, Self::Error> {
        self.inserts += 1;
        if self.inserts == self.fail_on_insert {
            return Err(FaultError::Injected(self.inserts));
        }
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
        Ok(self.inner.commit(label).await?)
    }

    async fn exists(&self, id: ElementId) -> Result<bool, Self::Error> {
        Ok(self.inner.exists(id).await?)
    }
}

#[tokio::test]
async fn test_failure_keeps_last_commit() {
    let target = FaultyTarget {
        inner: new_target(),
        fail_on_insert: 25,
        inserts: 0,
    };
    let config = CombinerConfig::default().with_intervals(10, 10);
    let mut combiner = Combiner::new(flat_source(35), target, CopyAll, config).unwrap();

    let failure = combiner.combine().await.unwrap_err();
    assert_eq!(failure.phase, Phase::Elements);
    assert_eq!(failure.processed, 25);
    assert!(matches!(failure.error, CombineError::TargetWrite(ref message) if message.contains("insert 25")));

    let target = &combiner.target().inner;
    assert_eq!(target.commits().len(), 2);
    // Root plus the 19 elements processed before the second commit
    assert_eq!(target.committed_elements().len(), 20);
    assert!(target.has_uncommitted_changes());
}

#[tokio::test]
async fn test_cancellation_mid_phase_keeps_last_commit() {
    let flag = CancellationFlag::new();
    let trigger = flag.clone();
    let observer: ProgressFn = Arc::new(move |_: &ProgressObservation| trigger.cancel());

    let config = CombinerConfig::default().with_intervals(10, 10);
    let mut combiner = Combiner::new(flat_source(50), new_target(), CopyAll, config)
        .unwrap()
        .with_observer(observer)
        .with_cancellation(flag);

    let failure = combiner.combine().await.unwrap_err();
    assert!(failure.is_cancelled());
    assert_eq!(failure.phase, Phase::Elements);
    assert_eq!(failure.processed, 10);

    let target = combiner.target();
    assert_eq!(target.commits().len(), 1);
    assert_eq!(target.committed_elements().len(), 10);
}

struct RejectingSchema;

#[async_trait]
impl SchemaProcessor<InMemorySourceGraph, InMemoryTargetGraph> for RejectingSchema {
    type Error = std::io::Error;

    async fn process(&self, _source: &InMemorySourceGraph, _target: &mut InMemoryTargetGraph) -> Result<(), Self::Error> {
        Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "schema ProcessPhysical rejected"))
    }
}

#[tokio::test]
async fn test_schema_failure_is_surfaced_unmodified() {
    let mut combiner = plant_combiner().with_schema_processor(RejectingSchema);
    let failure = combiner.combine().await.unwrap_err();

    assert_eq!(failure.phase, Phase::Schema);
    assert_eq!(failure.processed, 0);
    let CombineError::SchemaProcessing(inner) = &failure.error else {
        panic!("expected a schema processing error, got {:?}", failure.error);
    };
    assert_eq!(inner.to_string(), "schema ProcessPhysical rejected");
    assert!(combiner.target().commits().is_empty());
}
