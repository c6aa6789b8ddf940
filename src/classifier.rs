//! Element and relationship classification.
//!
//! A `Classifier` decides, per element, whether the combiner copies it,
//! redirects it into a merge container, or excludes it. Classifiers only
//! return decisions; the combiner applies every side effect (exclusions,
//! deferrals, container creation, copies). This keeps the rules testable
//! without any store.

use std::collections::BTreeSet;

use crate::combiner::Phase;
use crate::error::CombineError;
use crate::exclusion::{ExclusionFilter, ExclusionReason};
use crate::policy::{ClassificationRules, CodeMatcher, GroupRule};
use crate::registry::{GroupKey, GroupedContainerRegistry};
use crate::remap::IdentifierRemapTable;
use crate::types::{Element, ElementId, ElementKind, ElementPredicate, Relationship};

/// Read-only view of the run state handed to a classifier.
#[derive(Debug, Clone, Copy)]
pub struct ClassificationView<'a> {
    /// Phase being processed.
    pub phase: Phase,
    /// Excluded source ids.
    pub exclusions: &'a ExclusionFilter,
    /// Merge containers created so far.
    pub groups: &'a GroupedContainerRegistry,
    /// Remaps recorded so far.
    pub remaps: &'a IdentifierRemapTable,
}

/// Request to redirect an element into a merge container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRequest {
    /// Merge key; one container exists per key.
    pub key: GroupKey,
    /// Code given to the container when it is created.
    pub label: String,
    /// The element is a grouping ancestor: its descendant partitions merge
    /// into the container and are processed in a later phase.
    pub descend: bool,
}

/// Decision for one element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ElementDecision {
    /// Copy the element.
    Proceed,
    /// Copy the element without simplifying its geometry.
    ProceedUnsimplified,
    /// Fold the element into a merge container.
    Redirect(GroupRequest),
    /// Keep the element out of the target.
    Exclude(ExclusionReason),
}

/// Decision for one relationship whose endpoints both have counterparts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipDecision {
    /// Write the relationship.
    Copy,
    /// Leave it out.
    Skip,
}

/// Strategy deciding how elements and relationships are combined.
pub trait Classifier: Send + Sync {
    /// Categories to exclude before traversal starts, as a source query.
    fn deny_list(&self) -> Option<ElementPredicate> {
        None
    }

    /// Classify one element.
    fn classify_element(&self, element: &Element, view: &ClassificationView<'_>) -> ElementDecision;

    /// Classify one relationship. Endpoint exclusion is handled by the combiner.
    fn classify_relationship(&self, _relationship: &Relationship, _view: &ClassificationView<'_>) -> RelationshipDecision {
        RelationshipDecision::Copy
    }
}

/// Classifier that copies everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct CopyAll;

impl Classifier for CopyAll {
    fn classify_element(&self, _element: &Element, _view: &ClassificationView<'_>) -> ElementDecision {
        ElementDecision::Proceed
    }
}

enum CompiledMatcher {
    Exact(String),
    Pattern(regex_lite::Regex),
}

impl CompiledMatcher {
    fn compile(matcher: &CodeMatcher) -> Result<Self, CombineError> {
        match matcher {
            CodeMatcher::Exact(code) => Ok(Self::Exact(code.clone())),
            CodeMatcher::Pattern(pattern) => regex_lite::Regex::new(pattern)
                .map(Self::Pattern)
                .map_err(|e| CombineError::Configuration(format!("invalid code pattern {pattern:?}: {e}"))),
        }
    }

    fn is_match(&self, code: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == code,
            Self::Pattern(regex) => regex.is_match(code),
        }
    }
}

struct CompiledRule {
    matcher: CompiledMatcher,
    group_key: Option<String>,
    label: Option<String>,
}

impl CompiledRule {
    fn compile(rule: &GroupRule) -> Result<Self, CombineError> {
        Ok(Self {
            matcher: CompiledMatcher::compile(&rule.matcher)?,
            group_key: rule.group_key.clone(),
            label: rule.label.clone(),
        })
    }
}

/// Classifier driven by `ClassificationRules`.
///
/// Checks, in order: link to an excluded category, grouping-ancestor
/// subjects, partition merge groups, geometry overrides. Anything else is
/// copied.
pub struct RuleClassifier {
    ancestors: Vec<CompiledRule>,
    partitions: Vec<CompiledRule>,
    denied_categories: Vec<String>,
    geometry_overrides: BTreeSet<ElementId>,
}

impl RuleClassifier {
    /// Compile the rules. Fails on an invalid code pattern.
    pub fn new(rules: &ClassificationRules) -> Result<Self, CombineError> {
        Ok(Self {
            ancestors: rules
                .grouping_ancestors
                .iter()
                .map(CompiledRule::compile)
                .collect::<Result<_, _>>()?,
            partitions: rules
                .partition_groups
                .iter()
                .map(CompiledRule::compile)
                .collect::<Result<_, _>>()?,
            denied_categories: rules.denied_categories.clone(),
            geometry_overrides: rules.geometry_overrides.iter().copied().collect(),
        })
    }

    fn ancestor_request(&self, element: &Element) -> Option<GroupRequest> {
        let rule = self.ancestors.iter().find(|r| r.matcher.is_match(&element.code))?;
        Some(GroupRequest {
            key: GroupKey::new(
                rule.group_key
                    .clone()
                    .unwrap_or_else(|| format!("ancestor:{}", element.code)),
            ),
            label: rule
                .label
                .clone()
                .unwrap_or_else(|| format!("Combined {}", element.code)),
            descend: true,
        })
    }

    fn partition_request(&self, element: &Element) -> Option<GroupRequest> {
        let rule = self.partitions.iter().find(|r| r.matcher.is_match(&element.code))?;
        Some(GroupRequest {
            key: GroupKey::new(rule.group_key.clone().unwrap_or_else(|| element.code.clone())),
            label: rule.label.clone().unwrap_or_else(|| element.code.clone()),
            descend: false,
        })
    }
}

impl std::fmt::Debug for RuleClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuleClassifier")
            .field("ancestors", &self.ancestors.len())
            .field("partitions", &self.partitions.len())
            .field("denied_categories", &self.denied_categories)
            .field("geometry_overrides", &self.geometry_overrides)
            .finish()
    }
}

impl Classifier for RuleClassifier {
    fn deny_list(&self) -> Option<ElementPredicate> {
        if self.denied_categories.is_empty() {
            return None;
        }
        Some(ElementPredicate::of_kind(ElementKind::Category).with_codes(self.denied_categories.iter().cloned()))
    }

    fn classify_element(&self, element: &Element, view: &ClassificationView<'_>) -> ElementDecision {
        if let Some(category) = element.category_id {
            if view.exclusions.contains(category) {
                return ElementDecision::Exclude(ExclusionReason::DeniedCategory);
            }
        }

        let request = match element.kind {
            ElementKind::Subject => self.ancestor_request(element),
            ElementKind::Partition => self.partition_request(element),
            _ => None,
        };
        if let Some(request) = request {
            return ElementDecision::Redirect(request);
        }

        if self.geometry_overrides.contains(&element.id) {
            return ElementDecision::ProceedUnsimplified;
        }

        ElementDecision::Proceed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        exclusions: ExclusionFilter,
        groups: GroupedContainerRegistry,
        remaps: IdentifierRemapTable,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                exclusions: ExclusionFilter::new(),
                groups: GroupedContainerRegistry::new(),
                remaps: IdentifierRemapTable::new(),
            }
        }

        fn view(&self) -> ClassificationView<'_> {
            ClassificationView {
                phase: Phase::Elements,
                exclusions: &self.exclusions,
                groups: &self.groups,
                remaps: &self.remaps,
            }
        }
    }

    fn subject(id: u64, code: &str) -> Element {
        Element::new(ElementId::new(id), ElementKind::Subject, ElementId::ROOT)
            .with_parent(ElementId::ROOT)
            .with_code(code)
    }

    fn partition(id: u64, code: &str) -> Element {
        Element::new(ElementId::new(id), ElementKind::Partition, ElementId::ROOT)
            .with_parent(ElementId::ROOT)
            .with_code(code)
    }

    #[test]
    fn test_grouping_ancestor_redirects_with_descent() {
        let classifier = RuleClassifier::new(&ClassificationRules::physical_models()).unwrap();
        let fixture = Fixture::new();

        let decision = classifier.classify_element(&subject(0x20, "Physical"), &fixture.view());
        assert_eq!(
            decision,
            ElementDecision::Redirect(GroupRequest {
                key: GroupKey::new("ancestor:Physical"),
                label: "Combined Physical".to_string(),
                descend: true,
            })
        );
    }

    #[test]
    fn test_partition_group_uses_code_as_key_and_label() {
        let classifier = RuleClassifier::new(&ClassificationRules::physical_models()).unwrap();
        let fixture = Fixture::new();

        let decision = classifier.classify_element(&partition(0x30, "Components"), &fixture.view());
        assert_eq!(
            decision,
            ElementDecision::Redirect(GroupRequest {
                key: GroupKey::new("Components"),
                label: "Components".to_string(),
                descend: false,
            })
        );
    }

    #[test]
    fn test_rules_only_apply_to_their_kind() {
        let classifier = RuleClassifier::new(&ClassificationRules::physical_models()).unwrap();
        let fixture = Fixture::new();

        // A partition coded "Physical" is not a grouping ancestor
        assert_eq!(
            classifier.classify_element(&partition(0x30, "Physical"), &fixture.view()),
            ElementDecision::Proceed
        );
        // A subject coded "Components" is not a partition group
        assert_eq!(
            classifier.classify_element(&subject(0x31, "Components"), &fixture.view()),
            ElementDecision::Proceed
        );
    }

    #[test]
    fn test_pattern_rule_with_explicit_key() {
        let rules = ClassificationRules {
            partition_groups: vec![GroupRule::new(CodeMatcher::pattern("^Tags-\\d+$"))
                .with_group_key("tags")
                .with_label("All Tags")],
            ..ClassificationRules::default()
        };
        let classifier = RuleClassifier::new(&rules).unwrap();
        let fixture = Fixture::new();

        let a = classifier.classify_element(&partition(0x30, "Tags-1"), &fixture.view());
        let b = classifier.classify_element(&partition(0x31, "Tags-22"), &fixture.view());
        assert_eq!(a, b);
        assert!(matches!(a, ElementDecision::Redirect(ref r) if r.key.as_str() == "tags" && r.label == "All Tags"));

        assert_eq!(
            classifier.classify_element(&partition(0x32, "Tags-x"), &fixture.view()),
            ElementDecision::Proceed
        );
    }

    #[test]
    fn test_invalid_pattern_is_configuration_error() {
        let rules = ClassificationRules {
            partition_groups: vec![GroupRule::new(CodeMatcher::pattern("(unclosed"))],
            ..ClassificationRules::default()
        };
        assert!(matches!(RuleClassifier::new(&rules), Err(CombineError::Configuration(_))));
    }

    #[test]
    fn test_element_linked_to_excluded_category_is_excluded() {
        let classifier = RuleClassifier::new(&ClassificationRules::default()).unwrap();
        let mut fixture = Fixture::new();
        fixture.exclusions.exclude(ElementId::new(0x50), ExclusionReason::DenyList);

        let element = Element::new(ElementId::new(0x60), ElementKind::Ordinary, ElementId::new(0x30))
            .with_category(ElementId::new(0x50));
        assert_eq!(
            classifier.classify_element(&element, &fixture.view()),
            ElementDecision::Exclude(ExclusionReason::DeniedCategory)
        );
    }

    #[test]
    fn test_geometry_override() {
        let rules = ClassificationRules {
            geometry_overrides: vec![ElementId::new(0x40000009395)],
            ..ClassificationRules::default()
        };
        let classifier = RuleClassifier::new(&rules).unwrap();
        let fixture = Fixture::new();

        let problem = Element::new(ElementId::new(0x40000009395), ElementKind::Ordinary, ElementId::new(0x30));
        let normal = Element::new(ElementId::new(0x40000009396), ElementKind::Ordinary, ElementId::new(0x30));
        assert_eq!(classifier.classify_element(&problem, &fixture.view()), ElementDecision::ProceedUnsimplified);
        assert_eq!(classifier.classify_element(&normal, &fixture.view()), ElementDecision::Proceed);
    }

    #[test]
    fn test_deny_list_predicate() {
        let classifier = RuleClassifier::new(&ClassificationRules::physical_models()).unwrap();
        let predicate = classifier.deny_list().unwrap();
        assert_eq!(predicate.kind, Some(ElementKind::Category));
        assert_eq!(predicate.codes, vec!["Obstruction".to_string(), "Insulation".to_string()]);

        assert!(RuleClassifier::new(&ClassificationRules::default()).unwrap().deny_list().is_none());
    }
}
