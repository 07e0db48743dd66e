//! The run-loop driver.
//!
//! Wraps the orchestrator with everything the terminal session needs: the
//! configured handler subprocess, progress display, Ctrl-C handling, and
//! banners between phases. All state mutation still goes through
//! `Orchestrator::advance`.

use crate::config::get_effective_config;
use crate::engine::TransitionKind;
use crate::error::Result;
use crate::handler::{CommandHandler, HandlerResult, PhaseHandler};
use crate::orchestrator::Orchestrator;
use crate::output::{
    print_handler_output, print_info, print_interrupted, print_phase_banner, print_session_started,
    print_transition, print_workflow_complete, BannerColor,
};
use crate::phase::Phase;
use crate::progress::{PhaseSpinner, VerboseTimer};
use crate::session::Session;
use crate::signal::SignalHandler;

pub struct Runner {
    orchestrator: Orchestrator,
    verbose: bool,
    single_step: bool,
}

impl Runner {
    pub fn new() -> Result<Self> {
        let config = get_effective_config()?;
        Ok(Self::with_orchestrator(Orchestrator::new(config)?))
    }

    pub fn with_orchestrator(orchestrator: Orchestrator) -> Self {
        Self {
            orchestrator,
            verbose: false,
            single_step: false,
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Execute a single phase and stop instead of driving to a terminal
    /// state.
    pub fn with_single_step(mut self, single_step: bool) -> Self {
        self.single_step = single_step;
        self
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    /// Create a session for the feature and drive it.
    pub fn start(&self, feature_description: &str) -> Result<()> {
        let session = self.orchestrator.start(feature_description)?;
        print_session_started(&session);
        self.drive(session)
    }

    /// Pick the active session back up after an interruption.
    pub fn resume(&self) -> Result<()> {
        let session = self.orchestrator.resume()?;
        print_info(&format!(
            "Resuming session {} at {}",
            session.id, session.phase
        ));
        self.drive(session)
    }

    fn drive(&self, mut session: Session) -> Result<()> {
        let signal = SignalHandler::new()?;
        let config = self.orchestrator.config();
        let mut handler = CommandHandler::new(&config.handler_command, &config.handler_args);
        self.drive_with(&mut session, &mut handler, &signal)
    }

    /// The loop proper, parameterized over the handler so tests can script
    /// phase results without subprocesses.
    fn drive_with(
        &self,
        session: &mut Session,
        handler: &mut dyn PhaseHandler,
        signal: &SignalHandler,
    ) -> Result<()> {
        while !session.is_terminal() {
            if signal.is_shutdown_requested() {
                print_interrupted();
                return Ok(());
            }

            let phase = session.phase;
            print_phase_banner(&phase.to_string().to_uppercase(), BannerColor::Cyan);

            let result = self.run_handler(session, phase, handler)?;
            let next = self.orchestrator.advance(session, &result)?;

            let kind = if next == phase {
                TransitionKind::Repeat
            } else if next.is_earlier_than(&phase) {
                TransitionKind::LoopBack
            } else {
                TransitionKind::Advance
            };
            print_transition(phase, next, kind);

            if session.phase == Phase::Complete {
                self.orchestrator.finalize(session)?;
                print_workflow_complete(session);
            }

            if self.single_step {
                break;
            }
        }
        Ok(())
    }

    fn run_handler(
        &self,
        session: &Session,
        phase: Phase,
        handler: &mut dyn PhaseHandler,
    ) -> Result<HandlerResult> {
        if self.verbose {
            let mut timer = VerboseTimer::new(phase.as_str());
            let result = handler.execute(session, phase, &mut print_handler_output);
            match &result {
                Ok(_) => timer.finish_success(),
                Err(e) => timer.finish_error(&e.to_string()),
            }
            result
        } else {
            let mut spinner = PhaseSpinner::new(phase.as_str());
            let result = handler.execute(session, phase, &mut |line| spinner.update(line));
            match &result {
                Ok(_) => spinner.finish_success(),
                Err(e) => spinner.finish_error(&e.to_string()),
            }
            result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::error::ConductError;
    use crate::feedback::{Feedback, Issue, Severity, TargetFix};
    use tempfile::TempDir;

    /// Handler that passes every gate it is asked about, optionally
    /// rejecting a phase once with scripted feedback.
    struct ScriptedHandler {
        reject_once: Option<(Phase, Feedback)>,
        rejected: bool,
        executions: Vec<Phase>,
    }

    impl ScriptedHandler {
        fn passing() -> Self {
            Self {
                reject_once: None,
                rejected: false,
                executions: Vec::new(),
            }
        }

        fn rejecting_once(phase: Phase, feedback: Feedback) -> Self {
            Self {
                reject_once: Some((phase, feedback)),
                rejected: false,
                executions: Vec::new(),
            }
        }
    }

    impl PhaseHandler for ScriptedHandler {
        fn execute(
            &mut self,
            _session: &Session,
            phase: Phase,
            on_output: &mut dyn FnMut(&str),
        ) -> Result<HandlerResult> {
            on_output(&format!("executing {}", phase));
            self.executions.push(phase);

            let gate = phase.completion_condition().expect("non-terminal phase");
            if let Some((reject_phase, feedback)) = &self.reject_once {
                if *reject_phase == phase && !self.rejected {
                    self.rejected = true;
                    let mut result = HandlerResult::default();
                    result.conditions_delta.insert(gate, false);
                    result.feedback = Some(feedback.clone());
                    return Ok(result);
                }
            }

            let mut result = HandlerResult::default();
            result.conditions_delta.insert(gate, true);
            Ok(result)
        }
    }

    fn runner_in(dir: &TempDir) -> Runner {
        std::fs::create_dir_all(dir.path().join("specs")).unwrap();
        std::fs::write(dir.path().join("specs").join("seed.md"), "x").unwrap();
        let config = Config {
            storage_backoff_ms: 1,
            ..Config::default()
        };
        Runner::with_orchestrator(Orchestrator::with_workspace(dir.path().to_path_buf(), config))
    }

    #[test]
    fn test_drive_runs_a_clean_session_to_completion() {
        let dir = TempDir::new().unwrap();
        let runner = runner_in(&dir);
        let mut session = runner.orchestrator().start("login form").unwrap();
        let mut handler = ScriptedHandler::passing();

        runner
            .drive_with(&mut session, &mut handler, &SignalHandler::stub(false))
            .unwrap();

        assert_eq!(session.phase, Phase::Complete);
        assert_eq!(session.loop_count, 0);
        assert!(runner.orchestrator().store().is_archived(&session.id));
        // Every phase from spec through finalize executed exactly once.
        assert_eq!(
            handler.executions,
            vec![
                Phase::Spec,
                Phase::TestSpec,
                Phase::Dev,
                Phase::ReviewCode,
                Phase::TestBrowser,
                Phase::TestAuto,
                Phase::ReviewFinal,
                Phase::Finalize,
            ]
        );
    }

    #[test]
    fn test_drive_loops_back_on_rejection_and_still_completes() {
        let dir = TempDir::new().unwrap();
        let runner = runner_in(&dir);
        let mut session = runner.orchestrator().start("login form").unwrap();

        let feedback = Feedback::new(Phase::ReviewCode, TargetFix::Implementation).with_issue(
            Issue {
                kind: "logic-error".into(),
                severity: Severity::Blocker,
                location: Some("src/login.rs".into()),
                message: "missing null check".into(),
                suggestion: None,
            },
        );
        let mut handler = ScriptedHandler::rejecting_once(Phase::ReviewCode, feedback);

        runner
            .drive_with(&mut session, &mut handler, &SignalHandler::stub(false))
            .unwrap();

        assert_eq!(session.phase, Phase::Complete);
        assert_eq!(session.loop_count, 1);
        // Dev and review-code ran twice: once before and once after the
        // rejection.
        let dev_runs = handler.executions.iter().filter(|p| **p == Phase::Dev).count();
        assert_eq!(dev_runs, 2);
    }

    #[test]
    fn test_drive_stops_at_persisted_boundary_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let runner = runner_in(&dir);
        let mut session = runner.orchestrator().start("login form").unwrap();
        let mut handler = ScriptedHandler::passing();

        runner
            .drive_with(&mut session, &mut handler, &SignalHandler::stub(true))
            .unwrap();

        // Nothing executed; the session is still resumable.
        assert!(handler.executions.is_empty());
        assert_eq!(session.phase, Phase::Spec);
        assert!(runner.orchestrator().resume().is_ok());
    }

    #[test]
    fn test_single_step_executes_one_phase_then_stops() {
        let dir = TempDir::new().unwrap();
        let runner = runner_in(&dir).with_single_step(true);
        let mut session = runner.orchestrator().start("login form").unwrap();
        let mut handler = ScriptedHandler::passing();

        runner
            .drive_with(&mut session, &mut handler, &SignalHandler::stub(false))
            .unwrap();

        assert_eq!(handler.executions, vec![Phase::Spec]);
        assert_eq!(session.phase, Phase::TestSpec);
    }

    #[test]
    fn test_drive_surfaces_handler_failure() {
        struct FailingHandler;
        impl PhaseHandler for FailingHandler {
            fn execute(
                &mut self,
                _session: &Session,
                _phase: Phase,
                _on_output: &mut dyn FnMut(&str),
            ) -> Result<HandlerResult> {
                Err(ConductError::Handler("collaborator crashed".into()))
            }
        }

        let dir = TempDir::new().unwrap();
        let runner = runner_in(&dir);
        let mut session = runner.orchestrator().start("login form").unwrap();

        let err = runner
            .drive_with(&mut session, &mut FailingHandler, &SignalHandler::stub(false))
            .unwrap_err();
        assert!(matches!(err, ConductError::Handler(_)));
        // The session was not corrupted by the failure.
        assert_eq!(session.phase, Phase::Spec);
    }
}
