//! conduct CLI entry point.
//!
//! Parses command-line arguments and dispatches to the library. Exit codes:
//! 0 success, 1 precondition not met, 2 no active session, 3 storage error.

use clap::{CommandFactory, Parser, Subcommand};
use conduct::completion::{print_completion_script, ShellType, SUPPORTED_SHELLS};
use conduct::config::get_effective_config;
use conduct::output::{
    print_archive_stats, print_error, print_header, print_info, print_sessions_table,
    print_status, print_timeline,
};
use conduct::{ConductError, Orchestrator, Phase, Result, Runner, Session};

#[derive(Parser)]
#[command(name = "conduct")]
#[command(
    version,
    about = "CLI workflow engine for orchestrating phased feature delivery",
    after_help = "EXAMPLES:
    # Start a new feature workflow and drive it to completion
    conduct start \"Add login form\"

    # Continue an interrupted run
    conduct resume

    # Inspect the active session
    conduct status
    conduct status --timeline

    # List sessions and make another one active
    conduct sessions
    conduct switch 20260805143000-add-login-form

    # Recover a faulted session (bypasses condition gates)
    conduct goto-phase dev --confirm

    # Archive a finished session
    conduct finalize"
)]
struct Cli {
    /// Show full handler output instead of a spinner (useful for debugging)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a new workflow session for a feature
    Start {
        /// What to build, e.g. "Add login form"
        description: String,

        /// Execute only the first phase, then stop
        #[arg(long)]
        step: bool,
    },

    /// Resume the active session after an interruption
    Resume {
        /// Execute only one phase, then stop
        #[arg(long)]
        step: bool,
    },

    /// Show a read-only snapshot of a session
    Status {
        /// Session id (defaults to the active session)
        #[arg(long)]
        id: Option<String>,

        /// Also print the full phase timeline
        #[arg(long)]
        timeline: bool,
    },

    /// List all non-archived sessions plus archive totals
    Sessions,

    /// Make another session the active one
    Switch {
        /// Session id to activate
        id: String,
    },

    /// Force the active session into a phase, bypassing condition gates
    #[command(after_help = "Forcing a phase can violate workflow invariants;
it exists to recover sessions stuck in the error phase. The --confirm flag
is required.")]
    GotoPhase {
        /// Target phase (e.g. dev, test-auto, review-final)
        phase: String,

        /// Acknowledge that gates are being bypassed
        #[arg(long)]
        confirm: bool,
    },

    /// Verify preconditions, mark the workflow complete and archive it
    Finalize,

    /// Output shell completion script to stdout (hidden utility command)
    #[command(hide = true)]
    Completions {
        /// Shell type to generate completions for (bash, zsh, or fish)
        shell: String,
    },
}

fn load_active(orchestrator: &Orchestrator) -> Result<Session> {
    orchestrator
        .store()
        .load_active()?
        .ok_or(ConductError::NoActiveSession)
}

fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Start { description, step } => Runner::new()?
            .with_verbose(cli.verbose)
            .with_single_step(step)
            .start(&description),

        Commands::Resume { step } => Runner::new()?
            .with_verbose(cli.verbose)
            .with_single_step(step)
            .resume(),

        Commands::Status { id, timeline } => {
            let orchestrator = Orchestrator::new(get_effective_config()?)?;
            let session = orchestrator.status(id.as_deref())?;
            print_header();
            print_status(&session);
            if timeline {
                println!();
                print_timeline(&session.history);
            }
            Ok(())
        }

        Commands::Sessions => {
            let orchestrator = Orchestrator::new(get_effective_config()?)?;
            let sessions = orchestrator.sessions()?;
            let active = orchestrator.store().active_id()?;
            print_sessions_table(&sessions, active.as_deref());
            print_archive_stats(&orchestrator.archive_manager().stats()?);
            Ok(())
        }

        Commands::Switch { id } => {
            let orchestrator = Orchestrator::new(get_effective_config()?)?;
            let session = orchestrator.switch(&id)?;
            print_info(&format!("Active session is now {} ({})", session.id, session.phase));
            Ok(())
        }

        Commands::GotoPhase { phase, confirm } => {
            let target: Phase = phase.parse()?;
            let orchestrator = Orchestrator::new(get_effective_config()?)?;
            let mut session = load_active(&orchestrator)?;
            let from = session.phase;
            orchestrator.goto_phase(&mut session, target, confirm)?;
            print_info(&format!("Forced {} from {} to {}", session.id, from, target));
            Ok(())
        }

        Commands::Finalize => {
            let orchestrator = Orchestrator::new(get_effective_config()?)?;
            let mut session = load_active(&orchestrator)?;
            let dest = orchestrator.finalize(&mut session)?;
            print_info(&format!(
                "Session {} archived to {}",
                session.id,
                dest.display()
            ));
            Ok(())
        }

        Commands::Completions { shell } => match ShellType::from_name(&shell) {
            Ok(shell_type) => {
                print_completion_script(&mut Cli::command(), shell_type);
                Ok(())
            }
            Err(e) => {
                print_error(&format!(
                    "{}\nSupported shells: {}",
                    e,
                    SUPPORTED_SHELLS.join(", ")
                ));
                std::process::exit(1);
            }
        },
    }
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        print_error(&e.to_string());
        std::process::exit(e.exit_code());
    }
}
