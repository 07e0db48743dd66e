//! The orchestrator: the single place session state changes.
//!
//! Every mutation of a session flows through `advance` (or the explicit
//! operator operations `goto_phase` and `finalize`), which keeps `history`
//! and `phase` from ever diverging. Phase-specific work happens in external
//! handlers; this module only merges their results, consults the transition
//! engine and persists.

use crate::archive::ArchiveManager;
use crate::condition::Condition;
use crate::config::Config;
use crate::engine::{self, TransitionKind};
use crate::error::{ConductError, Result};
use crate::handler::HandlerResult;
use crate::phase::Phase;
use crate::project;
use crate::session::{Session, StepOutcome};
use crate::store::SessionStore;
use std::fs;
use std::path::PathBuf;

pub struct Orchestrator {
    store: SessionStore,
    archive: ArchiveManager,
    workspace: PathBuf,
    config: Config,
}

impl Orchestrator {
    pub fn new(config: Config) -> Result<Self> {
        let workspace = std::env::current_dir()?;
        Ok(Self::with_workspace(workspace, config))
    }

    /// Build an orchestrator rooted at an explicit workspace directory.
    pub fn with_workspace(workspace: PathBuf, config: Config) -> Self {
        let base = workspace.join(".conduct");
        let store = SessionStore::with_dir(base.clone())
            .with_retry(config.storage_max_retries, config.storage_backoff_ms);
        let archive = ArchiveManager::with_store(
            SessionStore::with_dir(base)
                .with_retry(config.storage_max_retries, config.storage_backoff_ms),
        )
        .with_prune(config.prune_ephemeral);
        Self {
            store,
            archive,
            workspace,
            config,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    // ------------------------------------------------------------------
    // start
    // ------------------------------------------------------------------

    /// Create a new session for a feature.
    ///
    /// Fails if a non-terminal session is already active: one workspace, one
    /// in-flight run. The bootstrap probe is consulted exactly once here to
    /// decide whether the session opens in `init` or `spec`.
    pub fn start(&self, feature_description: &str) -> Result<Session> {
        if let Some(active) = self.store.load_active()? {
            if !active.is_terminal() {
                return Err(ConductError::SessionInProgress(active.id));
            }
        }

        let initial = if project::is_bootstrapped(&self.workspace, &self.config.bootstrap_marker) {
            Phase::Spec
        } else {
            Phase::Init
        };

        let mut session = Session::new(feature_description, initial);
        fs::create_dir_all(self.store.artifacts_dir(&session.id))?;
        self.store.save(&mut session)?;
        self.store.set_active(&session.id)?;
        Ok(session)
    }

    // ------------------------------------------------------------------
    // advance
    // ------------------------------------------------------------------

    /// Merge a handler's result into the session, route it through the
    /// transition engine, persist, and return the new phase.
    ///
    /// The merge is idempotent (conditions are set, not toggled), so
    /// retrying a failed persist with the same `HandlerResult` is safe. A
    /// concurrent save of the same session surfaces as a conflict; the
    /// caller reloads and re-decides rather than overwriting.
    pub fn advance(&self, session: &mut Session, result: &HandlerResult) -> Result<Phase> {
        if session.is_terminal() {
            return Err(ConductError::Precondition(format!(
                "session {} is already in terminal phase {}",
                session.id, session.phase
            )));
        }

        let phase = session.phase;

        // A handler may only set the conditions its phase owns; anything
        // else is a mis-routed result the engine must not guess about.
        for condition in result.conditions_delta.keys() {
            if condition.owner() != phase {
                return self.fault(
                    session,
                    format!("handler for {} set condition {} owned by {}",
                        phase, condition, condition.owner()),
                );
            }
        }
        if let Some(feedback) = &result.feedback {
            if let Err(msg) = feedback.validate(phase) {
                return self.fault(session, msg);
            }
        }

        session.conditions.merge(&result.conditions_delta);
        for (key, value) in &result.context_delta {
            session.context.extra.insert(key.clone(), value.clone());
        }
        // The feedback slot always reflects the latest handler run: a new
        // payload replaces the old one, no payload clears it. The routed-to
        // phase sees the report in its snapshot exactly once, and its own
        // result erases it.
        session.context.feedback = result.feedback.clone();
        if let Some(step) = &result.step {
            session.step = Some(step.clone());
        }

        let transition = engine::evaluate(phase, &session.conditions, session.context.feedback.as_ref());

        let action = result
            .action
            .clone()
            .unwrap_or_else(|| format!("executed-{}", phase));
        let outcome = match transition.kind {
            TransitionKind::Advance => StepOutcome::Advanced,
            TransitionKind::Repeat => StepOutcome::Repeated,
            TransitionKind::LoopBack => StepOutcome::Rejected,
        };
        let recorded_feedback = if transition.kind == TransitionKind::Advance {
            None
        } else {
            session.context.feedback.clone()
        };
        session.record(phase, &action, outcome, recorded_feedback);

        if transition.is_loop_back() {
            session.loop_count += 1;
            for condition in &transition.cleared {
                session.conditions.clear(*condition);
            }
        }
        if transition.kind == TransitionKind::Advance {
            session.step = None;
        }
        session.phase = transition.next;

        self.store.save(session)?;
        Ok(session.phase)
    }

    /// Route a session to the error phase after a malformed handler result.
    /// The fault is persisted so the operator sees it in `status`; recovery
    /// is an explicit `goto-phase`.
    fn fault(&self, session: &mut Session, reason: String) -> Result<Phase> {
        session.record(session.phase, "invalid-handler-result", StepOutcome::Faulted, None);
        session.phase = Phase::Error;
        self.store.save(session)?;
        Err(ConductError::InvalidTransition(reason))
    }

    // ------------------------------------------------------------------
    // status / sessions / switch / resume
    // ------------------------------------------------------------------

    /// Read-only snapshot of a session: the active one, or any session by
    /// id (archived included).
    pub fn status(&self, id: Option<&str>) -> Result<Session> {
        match id {
            Some(id) => {
                if let Some(session) = self.store.try_load(id)? {
                    return Ok(session);
                }
                self.archive
                    .list()?
                    .into_iter()
                    .find(|s| s.id == id)
                    .ok_or_else(|| ConductError::SessionNotFound(id.to_string()))
            }
            None => self
                .store
                .load_active()?
                .ok_or(ConductError::NoActiveSession),
        }
    }

    pub fn sessions(&self) -> Result<Vec<Session>> {
        self.store.list_sessions()
    }

    pub fn archive_manager(&self) -> &ArchiveManager {
        &self.archive
    }

    /// Make another non-archived session the active one.
    pub fn switch(&self, id: &str) -> Result<Session> {
        if self.store.is_archived(id) {
            return Err(ConductError::SessionArchived(id.to_string()));
        }
        let session = self.store.load(id)?;
        self.store.set_active(id)?;
        Ok(session)
    }

    /// The active session, ready to continue driving.
    pub fn resume(&self) -> Result<Session> {
        let session = self
            .store
            .load_active()?
            .ok_or(ConductError::NoActiveSession)?;
        if session.phase == Phase::Complete {
            return Err(ConductError::Precondition(format!(
                "session {} is already complete",
                session.id
            )));
        }
        Ok(session)
    }

    // ------------------------------------------------------------------
    // goto-phase
    // ------------------------------------------------------------------

    /// Force a session into an arbitrary phase, bypassing the gates.
    ///
    /// This can violate the workflow's invariants, so it demands an explicit
    /// confirmation flag. The forced jump is recorded in history but does
    /// not count as a loop-back.
    pub fn goto_phase(&self, session: &mut Session, target: Phase, confirmed: bool) -> Result<()> {
        if !confirmed {
            return Err(ConductError::Precondition(
                "goto-phase bypasses condition gates; pass --confirm to proceed".to_string(),
            ));
        }
        let from = session.phase;
        session.record(
            from,
            &format!("forced-to-{}", target),
            StepOutcome::Forced,
            None,
        );
        session.phase = target;
        session.step = None;
        self.store.save(session)
    }

    // ------------------------------------------------------------------
    // finalize
    // ------------------------------------------------------------------

    /// Close out a session: verify the tests and the final review passed,
    /// mark the workflow complete, and move everything to cold storage.
    ///
    /// Never silently completes: unmet preconditions fail with the session
    /// untouched. Re-finalizing an archived session is a no-op.
    pub fn finalize(&self, session: &mut Session) -> Result<PathBuf> {
        if self.store.is_archived(&session.id) {
            return Ok(self.store.archived_session_dir(&session.id));
        }

        let tests_passed = session.conditions.is_set(Condition::AutoTestsPassed);
        let review_passed = session.conditions.is_set(Condition::FinalReviewPassed);
        if !tests_passed || !review_passed {
            return Err(ConductError::Precondition(format!(
                "cannot finalize {}: auto-tests-passed={}, final-review-passed={}",
                session.id, tests_passed, review_passed
            )));
        }

        session.conditions.set(Condition::WorkflowComplete, true);
        if session.phase != Phase::Complete {
            session.record(session.phase, "finalized", StepOutcome::Advanced, None);
            session.phase = Phase::Complete;
        }
        self.store.save(session)?;

        self.archive.archive(&session.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ConditionsDelta;
    use crate::feedback::{Feedback, Issue, Severity, TargetFix};
    use tempfile::TempDir;

    fn orchestrator_in(dir: &TempDir) -> Orchestrator {
        let config = Config {
            storage_backoff_ms: 1,
            ..Config::default()
        };
        Orchestrator::with_workspace(dir.path().to_path_buf(), config)
    }

    fn bootstrapped_workspace() -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("specs")).unwrap();
        std::fs::write(dir.path().join("specs").join("seed.md"), "x").unwrap();
        dir
    }

    fn delta(pairs: &[(Condition, bool)]) -> ConditionsDelta {
        pairs.iter().copied().collect()
    }

    fn result_with(pairs: &[(Condition, bool)]) -> HandlerResult {
        HandlerResult {
            conditions_delta: delta(pairs),
            ..HandlerResult::default()
        }
    }

    fn feedback(source: Phase, target_fix: TargetFix) -> Feedback {
        Feedback::new(source, target_fix).with_issue(Issue {
            kind: "failure".into(),
            severity: Severity::Major,
            location: None,
            message: "broken".into(),
            suggestion: None,
        })
    }

    /// Drive a fresh session up to the given phase by simulating passing
    /// handlers.
    fn session_at(orchestrator: &Orchestrator, target: Phase) -> Session {
        let mut session = orchestrator.start("checkout flow").unwrap();
        while session.phase != target {
            let gate = session.phase.completion_condition().unwrap();
            orchestrator
                .advance(&mut session, &result_with(&[(gate, true)]))
                .unwrap();
        }
        session
    }

    #[test]
    fn test_start_opens_in_spec_when_bootstrapped() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let session = orchestrator.start("login").unwrap();
        assert_eq!(session.phase, Phase::Spec);
        assert_eq!(
            orchestrator.store().active_id().unwrap().as_deref(),
            Some(session.id.as_str())
        );
    }

    #[test]
    fn test_start_opens_in_init_when_not_bootstrapped() {
        let dir = TempDir::new().unwrap();
        let orchestrator = orchestrator_in(&dir);
        let session = orchestrator.start("login").unwrap();
        assert_eq!(session.phase, Phase::Init);
    }

    #[test]
    fn test_start_rejects_second_active_session() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        orchestrator.start("first").unwrap();

        let err = orchestrator.start("second").unwrap_err();
        assert!(matches!(err, ConductError::SessionInProgress(_)));
        assert_eq!(orchestrator.sessions().unwrap().len(), 1);
    }

    #[test]
    fn test_advance_moves_through_open_gate() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = orchestrator.start("login").unwrap();

        let next = orchestrator
            .advance(&mut session, &result_with(&[(Condition::SpecComplete, true)]))
            .unwrap();
        assert_eq!(next, Phase::TestSpec);
        assert_eq!(session.history.len(), 1);
        assert_eq!(session.history[0].result, StepOutcome::Advanced);
        assert_eq!(session.loop_count, 0);

        // The persisted copy matches what we hold.
        let stored = orchestrator.store().load(&session.id).unwrap();
        assert_eq!(stored, session);
    }

    #[test]
    fn test_advance_repeats_when_gate_stays_closed() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = orchestrator.start("login").unwrap();

        let next = orchestrator
            .advance(&mut session, &HandlerResult::default())
            .unwrap();
        assert_eq!(next, Phase::Spec);
        assert_eq!(session.history.last().unwrap().result, StepOutcome::Repeated);

        // Repeating with the identical result changes nothing but history.
        let conditions_before = session.conditions.clone();
        let again = orchestrator
            .advance(&mut session, &HandlerResult::default())
            .unwrap();
        assert_eq!(again, Phase::Spec);
        assert_eq!(session.conditions, conditions_before);
    }

    #[test]
    fn test_final_review_rejection_reopens_test_auto() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = session_at(&orchestrator, Phase::ReviewFinal);
        assert!(session.conditions.is_set(Condition::AutoTestsPassed));
        let loops_before = session.loop_count;

        let result = HandlerResult {
            conditions_delta: delta(&[(Condition::FinalReviewPassed, false)]),
            feedback: Some(feedback(Phase::ReviewFinal, TargetFix::Tests)),
            ..HandlerResult::default()
        };
        let next = orchestrator.advance(&mut session, &result).unwrap();

        assert_eq!(next, Phase::TestAuto);
        assert!(!session.conditions.is_set(Condition::AutoTestsPassed));
        assert_eq!(session.loop_count, loops_before + 1);
        let last = session.history.last().unwrap();
        assert_eq!(last.result, StepOutcome::Rejected);
        assert!(last.feedback.is_some());
    }

    #[test]
    fn test_passing_tests_advance_to_final_review() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = session_at(&orchestrator, Phase::TestAuto);
        let loops_before = session.loop_count;

        let next = orchestrator
            .advance(&mut session, &result_with(&[(Condition::AutoTestsPassed, true)]))
            .unwrap();
        assert_eq!(next, Phase::ReviewFinal);
        assert_eq!(session.loop_count, loops_before);
    }

    #[test]
    fn test_finalize_requires_passed_tests_and_review() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = session_at(&orchestrator, Phase::TestAuto);
        let phase_before = session.phase;

        let err = orchestrator.finalize(&mut session).unwrap_err();
        assert_eq!(err.exit_code(), 1);
        assert!(matches!(err, ConductError::Precondition(_)));
        assert_eq!(session.phase, phase_before);
        assert!(!orchestrator.store().is_archived(&session.id));
    }

    #[test]
    fn test_finalize_archives_and_clears_active_pointer() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = session_at(&orchestrator, Phase::Finalize);

        let dest = orchestrator.finalize(&mut session).unwrap();
        assert_eq!(session.phase, Phase::Complete);
        assert!(session.conditions.is_set(Condition::WorkflowComplete));
        assert!(dest.exists());
        assert!(orchestrator.store().active_id().unwrap().is_none());
        assert!(orchestrator.store().is_archived(&session.id));

        // Idempotent: finalizing again is a no-op success.
        let again = orchestrator.finalize(&mut session).unwrap();
        assert_eq!(again, dest);
    }

    #[test]
    fn test_loop_back_feedback_is_consumed_by_next_advance() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = session_at(&orchestrator, Phase::ReviewCode);

        let result = HandlerResult {
            conditions_delta: delta(&[(Condition::CodeReviewPassed, false)]),
            feedback: Some(feedback(Phase::ReviewCode, TargetFix::Implementation)),
            ..HandlerResult::default()
        };
        orchestrator.advance(&mut session, &result).unwrap();
        assert_eq!(session.phase, Phase::Dev);
        // The dev handler sees the payload in its snapshot...
        assert!(session.context.feedback.is_some());

        // ...and its own result clears it.
        orchestrator
            .advance(&mut session, &result_with(&[(Condition::ImplementationComplete, true)]))
            .unwrap();
        assert!(session.context.feedback.is_none());
    }

    #[test]
    fn test_loop_count_always_matches_recorded_rejections() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = session_at(&orchestrator, Phase::ReviewCode);

        // One rejection, then recover and pass.
        let reject = HandlerResult {
            conditions_delta: delta(&[(Condition::CodeReviewPassed, false)]),
            feedback: Some(feedback(Phase::ReviewCode, TargetFix::Implementation)),
            ..HandlerResult::default()
        };
        orchestrator.advance(&mut session, &reject).unwrap();
        orchestrator
            .advance(&mut session, &result_with(&[(Condition::ImplementationComplete, true)]))
            .unwrap();
        orchestrator
            .advance(&mut session, &result_with(&[(Condition::CodeReviewPassed, true)]))
            .unwrap();

        assert_eq!(session.loop_count, 1);
        assert_eq!(session.recorded_rejections(), session.loop_count);
    }

    #[test]
    fn test_handler_setting_unowned_condition_faults_session() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = orchestrator.start("login").unwrap();
        assert_eq!(session.phase, Phase::Spec);

        let err = orchestrator
            .advance(&mut session, &result_with(&[(Condition::CodeReviewPassed, true)]))
            .unwrap_err();
        assert!(matches!(err, ConductError::InvalidTransition(_)));
        assert_eq!(session.phase, Phase::Error);
        assert_eq!(session.history.last().unwrap().result, StepOutcome::Faulted);

        // The fault is durable.
        let stored = orchestrator.store().load(&session.id).unwrap();
        assert_eq!(stored.phase, Phase::Error);
    }

    #[test]
    fn test_feedback_from_wrong_phase_faults_session() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = orchestrator.start("login").unwrap();

        let result = HandlerResult {
            feedback: Some(feedback(Phase::ReviewFinal, TargetFix::Tests)),
            ..HandlerResult::default()
        };
        let err = orchestrator.advance(&mut session, &result).unwrap_err();
        assert!(matches!(err, ConductError::InvalidTransition(_)));
        assert_eq!(session.phase, Phase::Error);
    }

    #[test]
    fn test_goto_phase_requires_confirmation() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = orchestrator.start("login").unwrap();

        let err = orchestrator
            .goto_phase(&mut session, Phase::Dev, false)
            .unwrap_err();
        assert!(matches!(err, ConductError::Precondition(_)));
        assert_eq!(session.phase, Phase::Spec);

        orchestrator
            .goto_phase(&mut session, Phase::Dev, true)
            .unwrap();
        assert_eq!(session.phase, Phase::Dev);
        assert_eq!(session.history.last().unwrap().result, StepOutcome::Forced);
        // A forced jump is not a loop-back.
        assert_eq!(session.loop_count, 0);
    }

    #[test]
    fn test_goto_phase_recovers_a_faulted_session() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = orchestrator.start("login").unwrap();
        let _ = orchestrator.advance(&mut session, &result_with(&[(Condition::CodeReviewPassed, true)]));
        assert_eq!(session.phase, Phase::Error);

        orchestrator
            .goto_phase(&mut session, Phase::Spec, true)
            .unwrap();
        assert_eq!(session.phase, Phase::Spec);

        // The session can run again after recovery.
        let next = orchestrator
            .advance(&mut session, &result_with(&[(Condition::SpecComplete, true)]))
            .unwrap();
        assert_eq!(next, Phase::TestSpec);
    }

    #[test]
    fn test_concurrent_advance_on_stale_snapshot_conflicts() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let session = orchestrator.start("login").unwrap();

        let mut first = orchestrator.store().load(&session.id).unwrap();
        let mut second = orchestrator.store().load(&session.id).unwrap();

        orchestrator
            .advance(&mut first, &result_with(&[(Condition::SpecComplete, true)]))
            .unwrap();

        let err = orchestrator
            .advance(&mut second, &HandlerResult::default())
            .unwrap_err();
        assert!(matches!(err, ConductError::Conflict { .. }));
        assert_eq!(err.exit_code(), 3);
    }

    #[test]
    fn test_switch_changes_active_pointer() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut done = orchestrator.start("first").unwrap();
        orchestrator
            .goto_phase(&mut done, Phase::Complete, true)
            .unwrap();
        let second = orchestrator.start("second").unwrap();

        let switched = orchestrator.switch(&done.id).unwrap();
        assert_eq!(switched.id, done.id);
        assert_eq!(
            orchestrator.store().active_id().unwrap().as_deref(),
            Some(done.id.as_str())
        );

        orchestrator.switch(&second.id).unwrap();
        assert_eq!(
            orchestrator.store().active_id().unwrap().as_deref(),
            Some(second.id.as_str())
        );
    }

    #[test]
    fn test_resume_without_active_session_fails_with_exit_code_2() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let err = orchestrator.resume().unwrap_err();
        assert!(matches!(err, ConductError::NoActiveSession));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_status_finds_archived_sessions_by_id() {
        let dir = bootstrapped_workspace();
        let orchestrator = orchestrator_in(&dir);
        let mut session = session_at(&orchestrator, Phase::Finalize);
        orchestrator.finalize(&mut session).unwrap();

        let snapshot = orchestrator.status(Some(&session.id)).unwrap();
        assert_eq!(snapshot.phase, Phase::Complete);
    }
}
