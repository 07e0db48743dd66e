use crate::phase::Phase;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Which earlier body of work a failure report targets.
///
/// Enumerated rather than free-form so routing cannot be derailed by a typo
/// in a handler's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetFix {
    Implementation,
    Tests,
    Scenarios,
}

impl fmt::Display for TargetFix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetFix::Implementation => "implementation",
            TargetFix::Tests => "tests",
            TargetFix::Scenarios => "scenarios",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    Blocker,
    Major,
    Minor,
}

/// One concrete problem found by a review or test phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Short category, e.g. "assertion-failure" or "missing-validation".
    pub kind: String,
    pub severity: Severity,
    /// Where the problem lives (file, test name, scenario id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// Structured failure payload routing correction work backward.
///
/// Produced by the phase that rejected, carried in the session context,
/// consumed exactly once by the phase it routes to, then cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feedback {
    /// The phase that produced this report.
    pub source: Phase,
    pub target_fix: TargetFix,
    pub issues: Vec<Issue>,
}

impl Feedback {
    pub fn new(source: Phase, target_fix: TargetFix) -> Self {
        Self {
            source,
            target_fix,
            issues: Vec::new(),
        }
    }

    pub fn with_issue(mut self, issue: Issue) -> Self {
        self.issues.push(issue);
        self
    }

    /// Reject payloads the engine must not route on: feedback claiming to
    /// come from a phase other than the one that just ran, or carrying no
    /// issues at all.
    pub fn validate(&self, reporting_phase: Phase) -> std::result::Result<(), String> {
        if self.source != reporting_phase {
            return Err(format!(
                "feedback source {} does not match reporting phase {}",
                self.source, reporting_phase
            ));
        }
        if self.issues.is_empty() {
            return Err("feedback carries no issues".to_string());
        }
        Ok(())
    }
}
