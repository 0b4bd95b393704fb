use crate::label::Label;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};

/// Rules mapped to the labels they directly depend on (or, for
/// `test_suite` rules, the labels they contain).
pub type RuleGraph = HashMap<RuleInfo, BTreeSet<Label>>;

pub const TEST_SUITE_RULE_TYPE: &str = "test_suite";

/// Description of a single build rule.
///
/// Identity is the label alone: `PartialEq`, `Hash` and `Ord` ignore
/// `rule_type` and `linked_target_labels`, so two values built for the same
/// label compare equal even when the other fields differ. Read those fields
/// from the instance stored in a [`RuleGraph`], which is the first one seen
/// for that label.
#[derive(Debug, Clone)]
pub struct RuleInfo {
    label: Label,
    rule_type: String,
    linked_target_labels: BTreeSet<Label>,
}

impl RuleInfo {
    pub fn new(
        label: Label,
        rule_type: impl Into<String>,
        linked_target_labels: BTreeSet<Label>,
    ) -> Self {
        Self {
            label,
            rule_type: rule_type.into(),
            linked_target_labels,
        }
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    pub fn rule_type(&self) -> &str {
        &self.rule_type
    }

    /// Targets this rule runs against, e.g. the host application of a test.
    pub fn linked_target_labels(&self) -> &BTreeSet<Label> {
        &self.linked_target_labels
    }

    pub fn is_test_suite(&self) -> bool {
        self.rule_type == TEST_SUITE_RULE_TYPE
    }

    /// True for every `*_test` rule class.
    pub fn is_test_rule(&self) -> bool {
        self.rule_type.ends_with("_test")
    }
}

impl PartialEq for RuleInfo {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label
    }
}

impl Eq for RuleInfo {}

impl Hash for RuleInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.label.hash(state);
    }
}

impl PartialOrd for RuleInfo {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RuleInfo {
    fn cmp(&self, other: &Self) -> Ordering {
        self.label.cmp(&other.label)
    }
}

// Sound because Eq/Hash above delegate to the label.
impl Borrow<Label> for RuleInfo {
    fn borrow(&self) -> &Label {
        &self.label
    }
}

/// One rule as reported by a query executor, before any label parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRuleRecord {
    pub label: String,
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub linked_targets: Vec<String>,
}

impl RawRuleRecord {
    pub fn new(label: impl Into<String>, rule_type: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            rule_type: rule_type.into(),
            ..Self::default()
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_linked_targets<I, S>(mut self, linked_targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.linked_targets = linked_targets.into_iter().map(Into::into).collect();
        self
    }
}

/// Serializable view of one graph entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleEntry {
    pub label: Label,
    #[serde(rename = "type")]
    pub rule_type: String,
    pub linked_target_labels: BTreeSet<Label>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependencies: Option<BTreeSet<Label>>,
}

impl RuleEntry {
    pub fn new(info: &RuleInfo, dependencies: Option<&BTreeSet<Label>>) -> Self {
        Self {
            label: info.label.clone(),
            rule_type: info.rule_type.clone(),
            linked_target_labels: info.linked_target_labels.clone(),
            dependencies: dependencies.cloned(),
        }
    }
}

/// Flattens a graph into entries sorted by label.
pub fn rule_entries(graph: &RuleGraph) -> Vec<RuleEntry> {
    let mut entries: Vec<RuleEntry> = graph
        .iter()
        .map(|(info, deps)| RuleEntry::new(info, Some(deps)))
        .collect();
    entries.sort_by(|a, b| a.label.cmp(&b.label));
    entries
}
