//! The phase transition engine.
//!
//! One pure function maps `(current phase, conditions, feedback)` to exactly
//! one next phase. No I/O, no clock, no stored state: the orchestrator can
//! re-evaluate it idempotently after a crash and tests can table-drive it.

use crate::condition::{Condition, ConditionSet, ALL_CONDITIONS};
use crate::feedback::{Feedback, TargetFix};
use crate::phase::Phase;

/// How the engine arrived at the next phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionKind {
    /// The phase's gate opened; move to its successor.
    Advance,
    /// The gate is still closed (or the phase is terminal); run it again.
    Repeat,
    /// A failed gate routed work backward to an earlier phase.
    LoopBack,
}

/// The engine's verdict for one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub next: Phase,
    pub kind: TransitionKind,
    /// Conditions that must be re-earned because of a loop-back. Covers every
    /// condition owned by a phase from the loop-back target through the phase
    /// that failed, so a stale "complete" flag can never mask unfinished work.
    pub cleared: Vec<Condition>,
}

impl Transition {
    fn advance(from: Phase) -> Self {
        // Every non-terminal phase has a successor; terminal phases never
        // reach this constructor.
        let next = from.successor().unwrap_or(from);
        Self {
            next,
            kind: TransitionKind::Advance,
            cleared: Vec::new(),
        }
    }

    fn repeat(phase: Phase) -> Self {
        Self {
            next: phase,
            kind: TransitionKind::Repeat,
            cleared: Vec::new(),
        }
    }

    fn loop_back(from: Phase, to: Phase) -> Self {
        Self {
            next: to,
            kind: TransitionKind::LoopBack,
            cleared: conditions_to_clear(from, to),
        }
    }

    pub fn is_loop_back(&self) -> bool {
        self.kind == TransitionKind::LoopBack
    }
}

/// Conditions owned by phases from `to` through `from`, inclusive.
///
/// The target's own gate is included: routing back to `test-auto` must reset
/// `auto-tests-passed`, not leave it claiming the tests still pass.
fn conditions_to_clear(from: Phase, to: Phase) -> Vec<Condition> {
    let (Some(from_idx), Some(to_idx)) = (from.order_index(), to.order_index()) else {
        return Vec::new();
    };
    ALL_CONDITIONS
        .iter()
        .filter(|c| {
            c.owner()
                .order_index()
                .is_some_and(|idx| idx >= to_idx && idx <= from_idx)
        })
        .copied()
        .collect()
}

/// Whether the phase's owning gate is open.
fn gate_open(phase: Phase, conditions: &ConditionSet) -> bool {
    phase
        .completion_condition()
        .is_some_and(|c| conditions.is_set(c))
}

/// Map the current phase, condition map and pending feedback to the next
/// phase.
///
/// Routing policy on a failed gate: feedback classification wins over the
/// default. A phase only falls back to `dev` when the feedback does not name
/// a more specific earlier phase.
pub fn evaluate(phase: Phase, conditions: &ConditionSet, feedback: Option<&Feedback>) -> Transition {
    if gate_open(phase, conditions) {
        return Transition::advance(phase);
    }

    match phase {
        Phase::ReviewCode => Transition::loop_back(phase, Phase::Dev),

        Phase::TestBrowser => match feedback.map(|f| f.target_fix) {
            Some(TargetFix::Scenarios) => Transition::loop_back(phase, Phase::TestSpec),
            _ => Transition::loop_back(phase, Phase::Dev),
        },

        Phase::TestAuto => match feedback {
            // The test phase reporting that its own test code is at fault:
            // self-correct in place rather than reopening the implementation.
            Some(f) if f.source == Phase::TestAuto && f.target_fix == TargetFix::Tests => {
                Transition::repeat(phase)
            }
            Some(_) => Transition::loop_back(phase, Phase::Dev),
            None => Transition::repeat(phase),
        },

        Phase::ReviewFinal => match feedback.map(|f| f.target_fix) {
            Some(TargetFix::Tests) => Transition::loop_back(phase, Phase::TestAuto),
            Some(_) => Transition::loop_back(phase, Phase::Dev),
            None => Transition::repeat(phase),
        },

        // Phases with no failure routing rule self-loop until their gate
        // opens; terminal phases have no gate and never move on their own.
        Phase::Init
        | Phase::Spec
        | Phase::TestSpec
        | Phase::Dev
        | Phase::Finalize
        | Phase::Complete
        | Phase::Error => Transition::repeat(phase),
    }
}
