//! Three-phase combine run.
//!
//! The combiner copies a source dataset into a fresh target: elements first,
//! then the content of partitions that were folded into merge containers,
//! then reference relationships. Progress is checkpointed with commits at
//! fixed intervals and at every phase boundary.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::classifier::{
    ClassificationView, Classifier, ElementDecision, GroupRequest, RelationshipDecision, RuleClassifier,
};
use crate::config::CombinerConfig;
use crate::error::{CombineError, CombineFailure, InvariantViolation};
use crate::exclusion::{ExclusionFilter, ExclusionReason};
use crate::policy::ProcessingPolicy;
use crate::progress::{ProgressCategory, ProgressFn, ProgressTracker};
use crate::registry::GroupedContainerRegistry;
use crate::remap::IdentifierRemapTable;
use crate::schema::{NoOpSchemaProcessor, SchemaProcessor, SchemaRefCopier};
use crate::store::{JsonSourceGraph, JsonTargetGraph, SourceGraph, TargetGraph, TargetInit};
use crate::types::{
    Element, ElementId, ElementInsert, ElementKind, ElementPredicate, ItemType, Relationship,
    RelationshipKind,
};

/// Stage of a combine run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    /// Configuration, opening datasets, resolving the deny-list.
    #[default]
    Setup,
    /// Schema processing.
    Schema,
    /// Bulk element copy.
    Elements,
    /// Content of deferred partitions.
    Partitions,
    /// Reference relationships.
    Relationships,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Setup => write!(f, "setup"),
            Self::Schema => write!(f, "schema"),
            Self::Elements => write!(f, "elements"),
            Self::Partitions => write!(f, "partitions"),
            Self::Relationships => write!(f, "relationships"),
        }
    }
}

/// Cooperative cancellation signal, checked before every element and relationship.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    /// Create an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Why a relationship was not written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipSkip {
    /// An endpoint is excluded.
    ExcludedEndpoint,
    /// An endpoint has no target counterpart.
    UnmappedEndpoint,
    /// The classifier left it out.
    Classifier,
    /// The remapped edge was already written.
    Duplicate,
}

/// Counters of one phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseSummary {
    /// The phase.
    pub phase: Phase,
    /// Items processed.
    pub processed: u64,
    /// Items expected, not counting items left for a later phase.
    pub total: u64,
    /// Items left for a later phase without being processed.
    pub deferred: u64,
    /// Progress observations emitted.
    pub observations: u64,
    /// Commits triggered by the commit interval.
    pub interval_commits: u64,
    /// Commits at phase or partition boundaries.
    pub boundary_commits: u64,
}

impl PhaseSummary {
    fn new(phase: Phase, total: u64) -> Self {
        Self {
            phase,
            processed: 0,
            total,
            deferred: 0,
            observations: 0,
            interval_commits: 0,
            boundary_commits: 0,
        }
    }
}

/// Result of a successful run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Summary {
    /// Run identifier, also recorded on the `combine` span.
    pub run_id: Uuid,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Wall-clock duration.
    pub elapsed_ms: u64,
    /// Per-phase counters, in execution order.
    pub phases: Vec<PhaseSummary>,
    /// Elements copied into the target.
    pub elements_copied: u64,
    /// Elements folded into merge containers.
    pub elements_redirected: u64,
    /// Source ids excluded, including the resolved deny-list.
    pub elements_excluded: u64,
    /// Elements dropped because an ancestor was folded into a merge container.
    pub elements_suppressed: u64,
    /// Excluded ids per reason.
    pub exclusions: BTreeMap<ExclusionReason, u64>,
    /// Relationships written.
    pub relationships_copied: u64,
    /// Relationships skipped.
    pub relationships_skipped: u64,
    /// Skipped relationships per reason.
    pub relationship_skips: BTreeMap<RelationshipSkip, u64>,
    /// Merge containers created.
    pub merged_containers: u64,
    /// Partitions processed in the partition phase.
    pub deferred_partitions: u64,
    /// Commits issued.
    pub commits: u64,
    /// Fingerprint of the final remap table.
    pub remap_fingerprint: String,
}

impl Summary {
    /// Counters of one phase.
    pub fn phase(&self, phase: Phase) -> Option<&PhaseSummary> {
        self.phases.iter().find(|p| p.phase == phase)
    }
}

#[derive(Debug, Default)]
struct RunStats {
    elements_copied: u64,
    elements_redirected: u64,
    elements_suppressed: u64,
    relationships_copied: u64,
    relationship_skips: BTreeMap<RelationshipSkip, u64>,
    merged_containers: u64,
    commits: u64,
}

/// State owned by one run. Rebuilt at the start of every `combine` call.
#[derive(Debug)]
struct RunState {
    phase: Phase,
    remaps: IdentifierRemapTable,
    groups: GroupedContainerRegistry,
    exclusions: ExclusionFilter,
    policy: ProcessingPolicy,
    deferred: Vec<ElementId>,
    deferred_set: BTreeSet<ElementId>,
    deferred_content: BTreeSet<ElementId>,
    pending: BTreeSet<ElementId>,
    suppressed: BTreeSet<ElementId>,
    written_edges: BTreeSet<(ElementId, ElementId, RelationshipKind)>,
    progress: ProgressTracker,
    current: Option<(PhaseSummary, ProgressCategory)>,
    phases: Vec<PhaseSummary>,
    stats: RunStats,
}

impl RunState {
    fn new(config: &CombinerConfig, observer: Option<ProgressFn>) -> Result<Self, CombineError> {
        Ok(Self {
            phase: Phase::Setup,
            remaps: IdentifierRemapTable::new(),
            groups: GroupedContainerRegistry::new(),
            exclusions: ExclusionFilter::new(),
            policy: ProcessingPolicy::new(),
            deferred: Vec::new(),
            deferred_set: BTreeSet::new(),
            deferred_content: BTreeSet::new(),
            pending: BTreeSet::new(),
            suppressed: BTreeSet::new(),
            written_edges: BTreeSet::new(),
            progress: ProgressTracker::new(config.report_interval, config.commit_interval)?
                .with_observer(observer),
            current: None,
            phases: Vec::new(),
            stats: RunStats::default(),
        })
    }

    fn processed(&self) -> u64 {
        self.current
            .as_ref()
            .map_or(0, |(_, category)| self.progress.processed(*category))
    }

    fn view(&self) -> ClassificationView<'_> {
        ClassificationView {
            phase: self.phase,
            exclusions: &self.exclusions,
            groups: &self.groups,
            remaps: &self.remaps,
        }
    }
}

/// Copies a source dataset into a target dataset.
///
/// ## Algorithm
///
/// 1. Map the source root subject onto the target root subject and exclude
///    the classifier's deny-list.
/// 2. Run the schema processor once.
/// 3. Elements: visit every element in enumeration order, skipping
///    everything contained, at any depth, in a deferred partition. The classifier decides to copy,
///    redirect into a merge container, or exclude. Redirecting a grouping
///    ancestor remaps all its descendant partitions onto the container and
///    defers them. Commit.
/// 4. Partitions: visit the whole containment subtree of each deferred
///    partition in discovery order. Content of a later partition that an
///    element links to is visited first. Commit after each partition.
/// 5. Relationships: write every reference relationship whose endpoints both
///    have counterparts. Commit.
///
/// Any error aborts the run; the target keeps its last commit.
pub struct Combiner<S, T, C, P = NoOpSchemaProcessor> {
    source: Arc<S>,
    target: T,
    classifier: C,
    schema: P,
    config: CombinerConfig,
    observer: Option<ProgressFn>,
    cancel: Option<CancellationFlag>,
    state: RunState,
}

impl<S, T, C> Combiner<S, T, C, NoOpSchemaProcessor>
where
    S: SourceGraph,
    T: TargetGraph,
    C: Classifier,
{
    /// Create a combiner. Fails if the configuration is invalid.
    pub fn new(source: Arc<S>, target: T, classifier: C, config: CombinerConfig) -> Result<Self, CombineError> {
        config.validate()?;
        let state = RunState::new(&config, None)?;
        Ok(Self {
            source,
            target,
            classifier,
            schema: NoOpSchemaProcessor,
            config,
            observer: None,
            cancel: None,
            state,
        })
    }
}

impl<S, T, C, P> Combiner<S, T, C, P>
where
    S: SourceGraph,
    T: TargetGraph,
    C: Classifier,
    P: SchemaProcessor<S, T>,
{
    /// Replace the schema processor.
    pub fn with_schema_processor<Q: SchemaProcessor<S, T>>(self, schema: Q) -> Combiner<S, T, C, Q> {
        Combiner {
            source: self.source,
            target: self.target,
            classifier: self.classifier,
            schema,
            config: self.config,
            observer: self.observer,
            cancel: self.cancel,
            state: self.state,
        }
    }

    /// Receive every progress observation.
    pub fn with_observer(mut self, observer: ProgressFn) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Stop the run when `flag` is set.
    pub fn with_cancellation(mut self, flag: CancellationFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// The target dataset.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Consume the combiner, returning the target.
    pub fn into_target(self) -> T {
        self.target
    }

    /// Remaps of the last run.
    pub fn remaps(&self) -> &IdentifierRemapTable {
        &self.state.remaps
    }

    /// Exclusions of the last run.
    pub fn exclusions(&self) -> &ExclusionFilter {
        &self.state.exclusions
    }

    /// Merge containers of the last run.
    pub fn groups(&self) -> &GroupedContainerRegistry {
        &self.state.groups
    }

    /// Partitions deferred by the last run, in discovery order.
    pub fn deferred_partitions(&self) -> &[ElementId] {
        &self.state.deferred
    }

    /// Run the combine.
    pub async fn combine(&mut self) -> Result<Summary, CombineFailure> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("combine", %run_id);
        self.run(run_id).instrument(span).await
    }

    async fn run(&mut self, run_id: Uuid) -> Result<Summary, CombineFailure> {
        let started_at = Utc::now();
        let clock = Instant::now();
        self.state = RunState::new(&self.config, self.observer.clone()).map_err(CombineFailure::setup)?;

        tracing::info!(
            config_hash = %self.config.config_hash(),
            report_interval = self.config.report_interval,
            commit_interval = self.config.commit_interval,
            "Starting combine run"
        );

        if let Err(error) = self.execute().await {
            let failure = CombineFailure::new(self.state.phase, self.state.processed(), error);
            if failure.is_cancelled() {
                tracing::warn!(phase = %failure.phase, processed = failure.processed, "Combine run cancelled");
            } else {
                tracing::error!(
                    phase = %failure.phase,
                    processed = failure.processed,
                    error = %failure.error,
                    "Combine run failed"
                );
            }
            return Err(failure);
        }

        let summary = self.summary(run_id, started_at, clock.elapsed().as_millis() as u64);
        tracing::info!(
            elements_copied = summary.elements_copied,
            relationships_copied = summary.relationships_copied,
            commits = summary.commits,
            elapsed_ms = summary.elapsed_ms,
            "Combine run complete"
        );
        Ok(summary)
    }

    async fn execute(&mut self) -> Result<(), CombineError> {
        self.setup().await?;

        self.state.phase = Phase::Schema;
        self.schema
            .process(&*self.source, &mut self.target)
            .await
            .map_err(CombineError::schema)?;

        self.copy_elements().await?;
        self.copy_deferred_partitions().await?;
        self.copy_relationships().await
    }

    async fn setup(&mut self) -> Result<(), CombineError> {
        self.state.phase = Phase::Setup;
        let root = self.target.root_subject();
        self.state.remaps.record(ElementId::ROOT, root)?;

        if let Some(predicate) = self.classifier.deny_list() {
            let denied = self
                .source
                .query_ids(&predicate)
                .await
                .map_err(CombineError::source_read)?;
            for id in &denied {
                self.state.exclusions.exclude(*id, ExclusionReason::DenyList);
            }
            tracing::info!(categories = denied.len(), "Resolved deny-list");
        }
        Ok(())
    }

    // Phases

    async fn copy_elements(&mut self) -> Result<(), CombineError> {
        let total = self
            .source
            .count_by_type(ItemType::Elements)
            .await
            .map_err(CombineError::source_read)?;
        self.begin_phase(Phase::Elements, ProgressCategory::Elements, total);

        let batch_size = self.config.scan_batch_size;
        let mut offset = 0;
        loop {
            let batch = self
                .source
                .scan_elements(offset, batch_size)
                .await
                .map_err(CombineError::source_read)?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len();

            for element in batch {
                if self.state.deferred_set.contains(&element.container_id)
                    || self.state.deferred_content.contains(&element.container_id)
                {
                    self.defer_content(element.id);
                    continue;
                }
                self.visit_element(element, ProgressCategory::Elements).await?;
            }
        }

        self.restore_policy();
        self.commit_boundary("Finished processing elements").await?;
        self.end_phase();
        Ok(())
    }

    async fn copy_deferred_partitions(&mut self) -> Result<(), CombineError> {
        self.state.phase = Phase::Partitions;
        let partitions = self.state.deferred.clone();

        let mut contents = Vec::with_capacity(partitions.len());
        for partition in &partitions {
            let ids = self.partition_content(*partition).await?;
            contents.push((*partition, ids));
        }
        self.state.pending = contents.iter().flat_map(|(_, ids)| ids.iter().copied()).collect();
        let total = self.state.pending.len() as u64;
        self.begin_phase(Phase::Partitions, ProgressCategory::PartitionElements, total);

        let batch_size = self.config.scan_batch_size;
        for (partition, ids) in contents {
            tracing::debug!(partition = %partition, elements = ids.len(), "Processing deferred partition");
            for chunk in ids.chunks(batch_size) {
                let elements = self
                    .source
                    .get_elements(chunk)
                    .await
                    .map_err(CombineError::source_read)?;
                for element in elements {
                    // Already visited on behalf of an earlier partition.
                    if !self.state.pending.remove(&element.id) {
                        continue;
                    }
                    self.visit_with_dependencies(element).await?;
                }
            }
            self.restore_policy();
            self.commit_boundary(&format!("Finished processing partition {partition}")).await?;
        }

        self.state.pending.clear();
        self.end_phase();
        Ok(())
    }

    /// Everything contained in `partition` at any depth, in enumeration order.
    async fn partition_content(&self, partition: ElementId) -> Result<Vec<ElementId>, CombineError> {
        let mut containers = BTreeSet::from([partition]);
        let mut frontier = vec![partition];

        while !frontier.is_empty() {
            let found = self
                .source
                .query_ids(&ElementPredicate::contained_in_any(frontier.iter().copied()))
                .await
                .map_err(CombineError::source_read)?;
            frontier = found.into_iter().filter(|id| containers.insert(*id)).collect();
        }

        let content = self
            .source
            .query_ids(&ElementPredicate::contained_in_any(containers))
            .await
            .map_err(CombineError::source_read)?;
        Ok(content.into_iter().filter(|id| *id != partition).collect())
    }

    /// Visit a partition element after any pending content it links to.
    async fn visit_with_dependencies(&mut self, element: Element) -> Result<(), CombineError> {
        let mut stack = vec![element];

        while let Some(top) = stack.pop() {
            let pending_link = top
                .parent_id
                .into_iter()
                .chain([top.container_id])
                .chain(top.category_id)
                .find(|link| self.state.pending.contains(link));
            let Some(link) = pending_link else {
                self.visit_element(top, ProgressCategory::PartitionElements).await?;
                continue;
            };

            self.state.pending.remove(&link);
            let dependency = self
                .source
                .get_element(link)
                .await
                .map_err(CombineError::source_read)?;
            tracing::debug!(element = %top.id, dependency = %link, "Visiting pending dependency first");
            stack.push(top);
            stack.extend(dependency);
        }
        Ok(())
    }

    async fn copy_relationships(&mut self) -> Result<(), CombineError> {
        let kind = RelationshipKind::Reference;
        let total = self
            .source
            .count_by_type(ItemType::Relationships(kind))
            .await
            .map_err(CombineError::source_read)?;
        self.begin_phase(Phase::Relationships, ProgressCategory::Relationships, total);

        let batch_size = self.config.scan_batch_size;
        let mut offset = 0;
        loop {
            let batch = self
                .source
                .scan_relationships(kind, offset, batch_size)
                .await
                .map_err(CombineError::source_read)?;
            if batch.is_empty() {
                break;
            }
            offset += batch.len();

            for relationship in batch {
                self.visit_relationship(relationship).await?;
            }
        }

        self.commit_boundary("Finished processing relationships").await?;
        self.end_phase();
        Ok(())
    }

    // Elements

    async fn visit_element(&mut self, element: Element, category: ProgressCategory) -> Result<(), CombineError> {
        self.check_cancelled()?;
        self.restore_policy();
        self.tick(category).await?;

        let id = element.id;
        if self.state.remaps.contains(id) || self.state.exclusions.contains(id) || self.state.suppressed.contains(&id) {
            return Ok(());
        }

        let links: Vec<ElementId> = element.parent_id.into_iter().chain([element.container_id]).collect();
        if links.iter().any(|link| self.state.suppressed.contains(link)) {
            self.state.suppressed.insert(id);
            self.state.stats.elements_suppressed += 1;
            return Ok(());
        }
        if links.iter().any(|link| self.state.exclusions.contains(*link)) {
            self.state.exclusions.exclude(id, ExclusionReason::ExcludedAncestor);
            return Ok(());
        }

        let decision = self.classifier.classify_element(&element, &self.state.view());
        match decision {
            ElementDecision::Proceed => self.copy_element(element).await,
            ElementDecision::ProceedUnsimplified => {
                self.state.policy.disable_for_next_element_only(id);
                tracing::info!(target: "graph_combiner::import", element = %id, "Geometry simplification disabled");
                self.copy_element(element).await
            }
            ElementDecision::Redirect(request) => self.redirect(&element, request).await,
            ElementDecision::Exclude(reason) => {
                self.state.exclusions.exclude(id, reason);
                tracing::debug!(element = %id, reason = %reason, "Excluded element");
                Ok(())
            }
        }
    }

    async fn copy_element(&mut self, element: Element) -> Result<(), CombineError> {
        let id = element.id;
        let parent_id = element.parent_id.map(|p| self.resolve(id, p)).transpose()?;
        let container_id = self.resolve(id, element.container_id)?;
        let category_id = element.category_id.map(|c| self.resolve(id, c)).transpose()?;

        let insert = ElementInsert {
            kind: element.kind,
            code: element.code,
            parent_id,
            container_id,
            category_id,
            properties: element.properties,
            simplify_geometry: self.state.policy.simplify_geometry(),
        };
        let new_id = self
            .target
            .insert_element(insert)
            .await
            .map_err(CombineError::target_write)?;
        self.state.remaps.record(id, new_id)?;
        self.state.stats.elements_copied += 1;
        Ok(())
    }

    async fn redirect(&mut self, element: &Element, request: GroupRequest) -> Result<(), CombineError> {
        let parent = element
            .parent_id
            .and_then(|p| self.state.remaps.get(p))
            .unwrap_or_else(|| self.target.root_subject());
        let existing = self.state.groups.get(&request.key);

        let target = &mut self.target;
        let label = request.label.clone();
        let container = self
            .state
            .groups
            .get_or_create(&request.key, move || async move {
                target
                    .insert_element(ElementInsert::merge_container(label, parent))
                    .await
                    .map_err(CombineError::target_write)
            })
            .await?;

        match existing {
            Some(container) => {
                let present = self
                    .target
                    .exists(container)
                    .await
                    .map_err(CombineError::target_write)?;
                if !present {
                    return Err(InvariantViolation::MissingGroupContainer {
                        key: request.key,
                        container,
                    }
                    .into());
                }
            }
            None => {
                self.state.stats.merged_containers += 1;
                tracing::info!(
                    group = %request.key,
                    label = %request.label,
                    container = %container,
                    "Created merge container"
                );
            }
        }

        self.state.stats.elements_redirected += 1;
        if request.descend {
            self.state.suppressed.insert(element.id);
            self.defer_descendant_partitions(element.id, container).await
        } else {
            self.state.remaps.record(element.id, container)?;
            Ok(())
        }
    }

    /// Remap every partition below `ancestor` onto `container` and defer it.
    async fn defer_descendant_partitions(&mut self, ancestor: ElementId, container: ElementId) -> Result<(), CombineError> {
        let mut stack = vec![ancestor];
        let mut visited = BTreeSet::new();

        while let Some(subject) = stack.pop() {
            if !visited.insert(subject) {
                continue;
            }

            let partitions = self
                .source
                .query_ids(&ElementPredicate::children_of(subject).with_kind(ElementKind::Partition))
                .await
                .map_err(CombineError::source_read)?;
            for partition in partitions {
                if self.state.exclusions.contains(partition) {
                    continue;
                }
                self.state.remaps.record(partition, container)?;
                if self.state.deferred_set.insert(partition) {
                    self.state.deferred.push(partition);
                    tracing::debug!(partition = %partition, container = %container, "Deferred partition");
                }
            }

            let mut subjects = self
                .source
                .query_ids(&ElementPredicate::children_of(subject).with_kind(ElementKind::Subject))
                .await
                .map_err(CombineError::source_read)?;
            // Pop in enumeration order.
            subjects.reverse();
            stack.extend(subjects);
        }
        Ok(())
    }

    /// Leave an element for the partition phase.
    fn defer_content(&mut self, id: ElementId) {
        self.state.deferred_content.insert(id);
        self.state.progress.skip(ProgressCategory::Elements);
        if let Some((summary, _)) = self.state.current.as_mut() {
            summary.deferred += 1;
        }
    }

    fn resolve(&self, element: ElementId, reference: ElementId) -> Result<ElementId, InvariantViolation> {
        self.state
            .remaps
            .get(reference)
            .ok_or(InvariantViolation::UnresolvedReference { element, reference })
    }

    // Relationships

    async fn visit_relationship(&mut self, relationship: Relationship) -> Result<(), CombineError> {
        self.check_cancelled()?;
        self.tick(ProgressCategory::Relationships).await?;

        if self.state.exclusions.contains(relationship.from) || self.state.exclusions.contains(relationship.to) {
            self.skip_relationship(&relationship, RelationshipSkip::ExcludedEndpoint);
            return Ok(());
        }
        let (Some(from), Some(to)) = (
            self.state.remaps.get(relationship.from),
            self.state.remaps.get(relationship.to),
        ) else {
            self.skip_relationship(&relationship, RelationshipSkip::UnmappedEndpoint);
            return Ok(());
        };
        if self.classifier.classify_relationship(&relationship, &self.state.view()) == RelationshipDecision::Skip {
            self.skip_relationship(&relationship, RelationshipSkip::Classifier);
            return Ok(());
        }
        if !self.state.written_edges.insert((from, to, relationship.kind)) {
            self.skip_relationship(&relationship, RelationshipSkip::Duplicate);
            return Ok(());
        }

        self.target
            .insert_relationship(from, to, relationship.kind)
            .await
            .map_err(CombineError::target_write)?;
        self.state.stats.relationships_copied += 1;
        Ok(())
    }

    fn skip_relationship(&mut self, relationship: &Relationship, reason: RelationshipSkip) {
        tracing::trace!(from = %relationship.from, to = %relationship.to, ?reason, "Skipped relationship");
        *self.state.stats.relationship_skips.entry(reason).or_insert(0) += 1;
    }

    // Progress and commits

    fn check_cancelled(&self) -> Result<(), CombineError> {
        match &self.cancel {
            Some(flag) if flag.is_cancelled() => Err(CombineError::Cancelled),
            _ => Ok(()),
        }
    }

    fn restore_policy(&mut self) {
        if let Some(element) = self.state.policy.restore() {
            tracing::info!(target: "graph_combiner::import", element = %element, "Geometry simplification re-enabled");
        }
    }

    fn begin_phase(&mut self, phase: Phase, category: ProgressCategory, total: u64) {
        self.state.phase = phase;
        self.state.progress.begin(category, total);
        self.state.current = Some((PhaseSummary::new(phase, total), category));
        tracing::info!(phase = %phase, total, "Starting phase");
    }

    fn end_phase(&mut self) {
        if let Some((mut summary, category)) = self.state.current.take() {
            let counter = self.state.progress.counter(category);
            summary.processed = counter.processed;
            summary.total = counter.total;
            tracing::info!(
                phase = %summary.phase,
                processed = summary.processed,
                total = summary.total,
                "Finished phase"
            );
            self.state.phases.push(summary);
        }
    }

    async fn tick(&mut self, category: ProgressCategory) -> Result<(), CombineError> {
        let tick = self.state.progress.tick(category);
        if let Some((summary, _)) = self.state.current.as_mut() {
            if tick.observation.is_some() {
                summary.observations += 1;
            }
        }
        if tick.commit_due {
            let processed = self.state.progress.processed(category);
            self.commit(&format!("Processed {processed} {category}"), false).await?;
        }
        Ok(())
    }

    async fn commit_boundary(&mut self, label: &str) -> Result<(), CombineError> {
        self.commit(label, true).await
    }

    async fn commit(&mut self, label: &str, boundary: bool) -> Result<(), CombineError> {
        self.target
            .commit(Some(label))
            .await
            .map_err(CombineError::target_write)?;
        self.state.stats.commits += 1;
        if let Some((summary, _)) = self.state.current.as_mut() {
            if boundary {
                summary.boundary_commits += 1;
            } else {
                summary.interval_commits += 1;
            }
        }
        tracing::info!(target: "graph_combiner::progress", label, "Committed changes");
        Ok(())
    }

    fn summary(&self, run_id: Uuid, started_at: DateTime<Utc>, elapsed_ms: u64) -> Summary {
        let stats = &self.state.stats;
        Summary {
            run_id,
            started_at,
            elapsed_ms,
            phases: self.state.phases.clone(),
            elements_copied: stats.elements_copied,
            elements_redirected: stats.elements_redirected,
            elements_excluded: self.state.exclusions.len() as u64,
            elements_suppressed: stats.elements_suppressed,
            exclusions: self
                .state
                .exclusions
                .counts_by_reason()
                .into_iter()
                .map(|(reason, count)| (reason, count as u64))
                .collect(),
            relationships_copied: stats.relationships_copied,
            relationships_skipped: stats.relationship_skips.values().sum(),
            relationship_skips: stats.relationship_skips.clone(),
            merged_containers: stats.merged_containers,
            deferred_partitions: self.state.deferred.len() as u64,
            commits: stats.commits,
            remap_fingerprint: self.state.remaps.fingerprint(),
        }
    }
}

/// Combine the JSON dataset at `source_path` into a new dataset at `target_path`.
///
/// Fails with a configuration error if anything exists at `target_path`.
/// The target's root subject is named after `config.target_root_label` and
/// keeps the source's spatial anchor.
pub async fn combine(
    source_path: impl AsRef<Path>,
    target_path: impl AsRef<Path>,
    config: CombinerConfig,
) -> Result<Summary, CombineFailure> {
    let source_path = source_path.as_ref();
    let target_path = target_path.as_ref();

    config.validate().map_err(CombineFailure::setup)?;
    if target_path.exists() {
        return Err(CombineFailure::setup(CombineError::Configuration(format!(
            "target {} already exists",
            target_path.display()
        ))));
    }

    let source = JsonSourceGraph::open(source_path)
        .map_err(|e| CombineFailure::setup(CombineError::source_read(e)))?;
    let info = source
        .dataset_info()
        .await
        .map_err(|e| CombineFailure::setup(CombineError::source_read(e)))?;
    let target = JsonTargetGraph::create(
        target_path,
        TargetInit {
            name: config.target_root_label.clone(),
            anchor: info.anchor,
        },
    )
    .map_err(|e| CombineFailure::setup(CombineError::target_write(e)))?;
    let classifier = RuleClassifier::new(&config.rules).map_err(CombineFailure::setup)?;

    tracing::info!(
        source = %source_path.display(),
        target = %target_path.display(),
        "Combining datasets"
    );

    let mut combiner = Combiner::new(Arc::new(source), target, classifier, config)
        .map_err(CombineFailure::setup)?
        .with_schema_processor(SchemaRefCopier);
    combiner.combine().await
}
