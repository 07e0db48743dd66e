use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A named boolean gate in the workflow.
///
/// Each condition is owned by exactly one phase: the handler for that phase
/// is the only writer, the transition engine is the only other reader. The
/// set is closed so a typo cannot silently mis-route a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Condition {
    ProjectBootstrapped,
    SpecComplete,
    ScenariosComplete,
    ImplementationComplete,
    CodeReviewPassed,
    BrowserTestsPassed,
    AutoTestsPassed,
    FinalReviewPassed,
    WorkflowComplete,
}

pub const ALL_CONDITIONS: [Condition; 9] = [
    Condition::ProjectBootstrapped,
    Condition::SpecComplete,
    Condition::ScenariosComplete,
    Condition::ImplementationComplete,
    Condition::CodeReviewPassed,
    Condition::BrowserTestsPassed,
    Condition::AutoTestsPassed,
    Condition::FinalReviewPassed,
    Condition::WorkflowComplete,
];

impl Condition {
    /// The phase whose handler is allowed to set this condition.
    pub fn owner(&self) -> Phase {
        match self {
            Condition::ProjectBootstrapped => Phase::Init,
            Condition::SpecComplete => Phase::Spec,
            Condition::ScenariosComplete => Phase::TestSpec,
            Condition::ImplementationComplete => Phase::Dev,
            Condition::CodeReviewPassed => Phase::ReviewCode,
            Condition::BrowserTestsPassed => Phase::TestBrowser,
            Condition::AutoTestsPassed => Phase::TestAuto,
            Condition::FinalReviewPassed => Phase::ReviewFinal,
            Condition::WorkflowComplete => Phase::Finalize,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Condition::ProjectBootstrapped => "project-bootstrapped",
            Condition::SpecComplete => "spec-complete",
            Condition::ScenariosComplete => "scenarios-complete",
            Condition::ImplementationComplete => "implementation-complete",
            Condition::CodeReviewPassed => "code-review-passed",
            Condition::BrowserTestsPassed => "browser-tests-passed",
            Condition::AutoTestsPassed => "auto-tests-passed",
            Condition::FinalReviewPassed => "final-review-passed",
            Condition::WorkflowComplete => "workflow-complete",
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Partial update to the condition set, produced by a phase handler.
pub type ConditionsDelta = BTreeMap<Condition, bool>;

/// The session's condition map. Unset conditions read as `false`.
///
/// Conditions are set, never toggled: merging the same delta twice yields the
/// same map, which is what makes `advance` retries safe.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionSet {
    values: BTreeMap<Condition, bool>,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_set(&self, condition: Condition) -> bool {
        self.values.get(&condition).copied().unwrap_or(false)
    }

    pub fn set(&mut self, condition: Condition, value: bool) {
        self.values.insert(condition, value);
    }

    /// Apply a handler's delta. Idempotent.
    pub fn merge(&mut self, delta: &ConditionsDelta) {
        for (condition, value) in delta {
            self.values.insert(*condition, *value);
        }
    }

    /// Force a condition back to unearned after a loop-back.
    pub fn clear(&mut self, condition: Condition) {
        self.values.insert(condition, false);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Condition, &bool)> {
        self.values.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_condition_reads_false() {
        let set = ConditionSet::new();
        assert!(!set.is_set(Condition::SpecComplete));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut set = ConditionSet::new();
        let mut delta = ConditionsDelta::new();
        delta.insert(Condition::ImplementationComplete, true);
        delta.insert(Condition::CodeReviewPassed, false);

        set.merge(&delta);
        let first = set.clone();
        set.merge(&delta);

        assert_eq!(set, first);
        assert!(set.is_set(Condition::ImplementationComplete));
        assert!(!set.is_set(Condition::CodeReviewPassed));
    }

    #[test]
    fn test_clear_forces_condition_back_to_false() {
        let mut set = ConditionSet::new();
        set.set(Condition::AutoTestsPassed, true);
        set.clear(Condition::AutoTestsPassed);
        assert!(!set.is_set(Condition::AutoTestsPassed));
    }

    #[test]
    fn test_every_condition_has_a_distinct_owner() {
        let mut owners: Vec<Phase> = ALL_CONDITIONS.iter().map(|c| c.owner()).collect();
        owners.sort_by_key(|p| p.order_index());
        owners.dedup();
        assert_eq!(owners.len(), ALL_CONDITIONS.len());
    }

    #[test]
    fn test_serialization_uses_kebab_case_keys() {
        let mut set = ConditionSet::new();
        set.set(Condition::BrowserTestsPassed, true);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "{\"browser-tests-passed\":true}");

        let back: ConditionSet = serde_json::from_str(&json).unwrap();
        assert_eq!(back, set);
    }
}
