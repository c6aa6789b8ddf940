//! Classification rules.
//!
//! Rules are plain data so they can live in a configuration file:
//!
//! ```json
//! {
//!   "grouping_ancestors": [{ "matcher": { "exact": "Physical" } }],
//!   "partition_groups": [{ "matcher": { "pattern": "^PDMx.*-Tag$" }, "group_key": "tags" }],
//!   "denied_categories": ["Obstruction", "Insulation"],
//!   "geometry_overrides": ["0x40000009395"]
//! }
//! ```
//!
//! Matchers are compiled once by `RuleClassifier::new`.

use serde::{Deserialize, Serialize};

use crate::types::ElementId;

/// How a rule matches an element code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CodeMatcher {
    /// Code equals the string.
    Exact(String),
    /// Code matches the regular expression.
    Pattern(String),
}

impl CodeMatcher {
    /// Exact-match helper.
    pub fn exact(code: impl Into<String>) -> Self {
        Self::Exact(code.into())
    }

    /// Pattern-match helper.
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self::Pattern(pattern.into())
    }
}

/// Rule redirecting matching elements into a merge container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRule {
    /// Which codes the rule applies to.
    pub matcher: CodeMatcher,
    /// Merge key. Derived from the element code when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_key: Option<String>,
    /// Code of the merge container. Derived from the element code when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl GroupRule {
    /// Rule with derived key and label.
    pub fn new(matcher: CodeMatcher) -> Self {
        Self {
            matcher,
            group_key: None,
            label: None,
        }
    }

    /// Set an explicit merge key.
    pub fn with_group_key(mut self, key: impl Into<String>) -> Self {
        self.group_key = Some(key.into());
        self
    }

    /// Set an explicit container label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

/// Configured classification rules.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    /// Subjects whose partitions (at any depth) merge into one container.
    pub grouping_ancestors: Vec<GroupRule>,
    /// Partitions merging into a container shared by every partition with the same key.
    pub partition_groups: Vec<GroupRule>,
    /// Category codes whose categories, and every element linked to them, are excluded.
    pub denied_categories: Vec<String>,
    /// Elements imported without geometry simplification.
    pub geometry_overrides: Vec<ElementId>,
}

impl ClassificationRules {
    /// Rules for combining the physical models of a plant dataset.
    ///
    /// The `Physical` subject's partitions merge into `Combined Physical`,
    /// tag and component partitions each merge into one container, and
    /// obstruction/insulation categories are dropped.
    pub fn physical_models() -> Self {
        Self {
            grouping_ancestors: vec![GroupRule::new(CodeMatcher::exact("Physical"))],
            partition_groups: vec![
                GroupRule::new(CodeMatcher::exact("PDMxPhysical-Tag")),
                GroupRule::new(CodeMatcher::exact("Components")),
            ],
            denied_categories: vec!["Obstruction".to_string(), "Insulation".to_string()],
            geometry_overrides: Vec::new(),
        }
    }

    /// Whether no rule is configured.
    pub fn is_empty(&self) -> bool {
        self.grouping_ancestors.is_empty()
            && self.partition_groups.is_empty()
            && self.denied_categories.is_empty()
            && self.geometry_overrides.is_empty()
    }
}
