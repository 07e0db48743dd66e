use crate::condition::Condition;
use crate::error::ConductError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A stage of the delivery workflow.
///
/// The nominal pipeline runs `init → spec → test-spec → dev → review-code →
/// test-browser → test-auto → review-final → finalize → complete`. `Error` is
/// reachable from any phase on an unrecoverable fault and only leaves via a
/// forced transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Init,
    Spec,
    TestSpec,
    Dev,
    ReviewCode,
    TestBrowser,
    TestAuto,
    ReviewFinal,
    Finalize,
    Complete,
    Error,
}

/// All phases of the nominal pipeline, in order. Excludes `Error`.
pub const NOMINAL_ORDER: [Phase; 10] = [
    Phase::Init,
    Phase::Spec,
    Phase::TestSpec,
    Phase::Dev,
    Phase::ReviewCode,
    Phase::TestBrowser,
    Phase::TestAuto,
    Phase::ReviewFinal,
    Phase::Finalize,
    Phase::Complete,
];

impl Phase {
    /// Position in the nominal pipeline, or `None` for `Error`.
    pub fn order_index(&self) -> Option<usize> {
        NOMINAL_ORDER.iter().position(|p| p == self)
    }

    /// The next phase in the nominal pipeline when this phase's gate opens.
    pub fn successor(&self) -> Option<Phase> {
        let idx = self.order_index()?;
        NOMINAL_ORDER.get(idx + 1).copied()
    }

    /// The boolean gate this phase must earn before it advances.
    ///
    /// `Complete` and `Error` are terminal and own no gate.
    pub fn completion_condition(&self) -> Option<Condition> {
        match self {
            Phase::Init => Some(Condition::ProjectBootstrapped),
            Phase::Spec => Some(Condition::SpecComplete),
            Phase::TestSpec => Some(Condition::ScenariosComplete),
            Phase::Dev => Some(Condition::ImplementationComplete),
            Phase::ReviewCode => Some(Condition::CodeReviewPassed),
            Phase::TestBrowser => Some(Condition::BrowserTestsPassed),
            Phase::TestAuto => Some(Condition::AutoTestsPassed),
            Phase::ReviewFinal => Some(Condition::FinalReviewPassed),
            Phase::Finalize => Some(Condition::WorkflowComplete),
            Phase::Complete | Phase::Error => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Complete | Phase::Error)
    }

    /// True if `self` comes strictly before `other` in the nominal pipeline.
    /// `Error` is ordered after everything.
    pub fn is_earlier_than(&self, other: &Phase) -> bool {
        match (self.order_index(), other.order_index()) {
            (Some(a), Some(b)) => a < b,
            (Some(_), None) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::Init => "init",
            Phase::Spec => "spec",
            Phase::TestSpec => "test-spec",
            Phase::Dev => "dev",
            Phase::ReviewCode => "review-code",
            Phase::TestBrowser => "test-browser",
            Phase::TestAuto => "test-auto",
            Phase::ReviewFinal => "review-final",
            Phase::Finalize => "finalize",
            Phase::Complete => "complete",
            Phase::Error => "error",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = ConductError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "init" => Ok(Phase::Init),
            "spec" => Ok(Phase::Spec),
            "test-spec" => Ok(Phase::TestSpec),
            "dev" => Ok(Phase::Dev),
            "review-code" => Ok(Phase::ReviewCode),
            "test-browser" => Ok(Phase::TestBrowser),
            "test-auto" => Ok(Phase::TestAuto),
            "review-final" => Ok(Phase::ReviewFinal),
            "finalize" => Ok(Phase::Finalize),
            "complete" => Ok(Phase::Complete),
            "error" => Ok(Phase::Error),
            other => Err(ConductError::UnknownPhase(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nominal_order_is_the_documented_pipeline() {
        assert_eq!(NOMINAL_ORDER[0], Phase::Init);
        assert_eq!(NOMINAL_ORDER[9], Phase::Complete);
        assert_eq!(Phase::Dev.order_index(), Some(3));
        assert_eq!(Phase::Error.order_index(), None);
    }

    #[test]
    fn test_successor_chain_covers_the_pipeline() {
        assert_eq!(Phase::Init.successor(), Some(Phase::Spec));
        assert_eq!(Phase::Spec.successor(), Some(Phase::TestSpec));
        assert_eq!(Phase::ReviewCode.successor(), Some(Phase::TestBrowser));
        assert_eq!(Phase::Finalize.successor(), Some(Phase::Complete));
        assert_eq!(Phase::Complete.successor(), None);
        assert_eq!(Phase::Error.successor(), None);
    }

    #[test]
    fn test_every_non_terminal_phase_owns_a_condition() {
        for phase in NOMINAL_ORDER {
            if phase.is_terminal() {
                assert!(phase.completion_condition().is_none());
            } else {
                assert!(phase.completion_condition().is_some(), "{phase} has no gate");
            }
        }
        assert!(Phase::Error.completion_condition().is_none());
    }

    #[test]
    fn test_is_earlier_than() {
        assert!(Phase::Dev.is_earlier_than(&Phase::ReviewCode));
        assert!(!Phase::ReviewCode.is_earlier_than(&Phase::Dev));
        assert!(!Phase::Dev.is_earlier_than(&Phase::Dev));
        assert!(Phase::Complete.is_earlier_than(&Phase::Error));
        assert!(!Phase::Error.is_earlier_than(&Phase::Init));
    }

    #[test]
    fn test_serialization_uses_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Phase::TestBrowser).unwrap(),
            "\"test-browser\""
        );
        assert_eq!(
            serde_json::to_string(&Phase::ReviewFinal).unwrap(),
            "\"review-final\""
        );
        let phase: Phase = serde_json::from_str("\"test-spec\"").unwrap();
        assert_eq!(phase, Phase::TestSpec);
    }

    #[test]
    fn test_from_str_round_trips_display() {
        for phase in NOMINAL_ORDER.iter().chain([Phase::Error].iter()) {
            let parsed: Phase = phase.as_str().parse().unwrap();
            assert_eq!(parsed, *phase);
        }
    }

    #[test]
    fn test_from_str_rejects_unknown_phase() {
        let err = "deploy".parse::<Phase>().unwrap_err();
        assert!(matches!(err, ConductError::UnknownPhase(_)));
    }
}
