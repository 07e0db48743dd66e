use crate::archive::ArchiveStats;
use crate::engine::TransitionKind;
use crate::phase::{Phase, NOMINAL_ORDER};
use crate::session::{HistoryRecord, Session, StepOutcome};
use terminal_size::{terminal_size, Width};

// ANSI color codes
pub const RESET: &str = "\x1b[0m";
pub const BOLD: &str = "\x1b[1m";
pub const DIM: &str = "\x1b[2m";
pub const GREEN: &str = "\x1b[32m";
pub const YELLOW: &str = "\x1b[33m";
pub const BLUE: &str = "\x1b[34m";
pub const CYAN: &str = "\x1b[36m";
pub const RED: &str = "\x1b[31m";
pub const GRAY: &str = "\x1b[90m";

// ============================================================================
// Phase banner display
// ============================================================================

/// Color options for phase banners
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BannerColor {
    Cyan,
    Green,
    Red,
    Yellow,
}

impl BannerColor {
    fn ansi_code(&self) -> &'static str {
        match self {
            BannerColor::Cyan => CYAN,
            BannerColor::Green => GREEN,
            BannerColor::Red => RED,
            BannerColor::Yellow => YELLOW,
        }
    }
}

const DEFAULT_TERMINAL_WIDTH: u16 = 80;
const MIN_BANNER_WIDTH: usize = 20;
const MAX_BANNER_WIDTH: usize = 80;

fn get_terminal_width_for_banner() -> usize {
    terminal_size()
        .map(|(Width(w), _)| w as usize)
        .unwrap_or(DEFAULT_TERMINAL_WIDTH as usize)
}

/// Print a color-coded phase banner: `━━━ PHASE ━━━`, sized to the terminal.
pub fn print_phase_banner(phase_name: &str, color: BannerColor) {
    let terminal_width = get_terminal_width_for_banner();
    let banner_width = terminal_width.clamp(MIN_BANNER_WIDTH, MAX_BANNER_WIDTH);

    let phase_with_spaces = format!(" {} ", phase_name);
    let phase_len = phase_with_spaces.chars().count();

    let remaining = banner_width.saturating_sub(phase_len);
    let left_padding = remaining / 2;
    let right_padding = remaining - left_padding;

    let color_code = color.ansi_code();

    println!(
        "{}{BOLD}{}{}{}{}",
        color_code,
        "━".repeat(left_padding),
        phase_with_spaces,
        "━".repeat(right_padding),
        RESET
    );
}

pub fn print_header() {
    println!("{CYAN}{BOLD}");
    println!("+---------------------------------------------------------+");
    println!(
        "|  conduct v{}                                          |",
        env!("CARGO_PKG_VERSION")
    );
    println!("+---------------------------------------------------------+");
    println!("{RESET}");
}

pub fn print_error(msg: &str) {
    println!("{RED}{BOLD}Error:{RESET} {}", msg);
}

pub fn print_warning(msg: &str) {
    println!("{YELLOW}Warning:{RESET} {}", msg);
}

pub fn print_info(msg: &str) {
    println!("{CYAN}Info:{RESET} {}", msg);
}

pub fn print_handler_output(line: &str) {
    println!("{GRAY}{}{RESET}", line);
}

// ============================================================================
// Session rendering
// ============================================================================

fn make_progress_bar(completed: usize, total: usize, width: usize) -> String {
    if total == 0 {
        return " ".repeat(width);
    }
    let filled = (completed * width) / total;
    let empty = width - filled;
    format!(
        "{GREEN}{}{RESET}{GRAY}{}{RESET}",
        "█".repeat(filled),
        "░".repeat(empty)
    )
}

fn phase_color(phase: Phase) -> &'static str {
    match phase {
        Phase::Complete => GREEN,
        Phase::Error => RED,
        _ => YELLOW,
    }
}

pub fn print_status(session: &Session) {
    let position = session.phase.order_index().unwrap_or(0);
    let progress = make_progress_bar(position, NOMINAL_ORDER.len() - 1, 12);

    println!("{BLUE}Session:{RESET}   {}", session.id);
    println!("{BLUE}Feature:{RESET}   {}", session.feature_description);
    println!("{BLUE}Branch:{RESET}    {}", session.branch_name);
    println!(
        "{BLUE}Phase:{RESET}     {}{}{RESET} [{}]",
        phase_color(session.phase),
        session.phase,
        progress
    );
    if let Some(step) = &session.step {
        println!("{BLUE}Step:{RESET}      {}", step);
    }
    println!("{BLUE}Loops:{RESET}     {}", session.loop_count);
    println!(
        "{BLUE}Started:{RESET}   {}",
        session.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!(
        "{BLUE}Updated:{RESET}   {}",
        session.updated_at.format("%Y-%m-%d %H:%M:%S")
    );

    if !session.conditions.is_empty() {
        println!("{BLUE}Conditions:{RESET}");
        for (condition, value) in session.conditions.iter() {
            let (mark, color) = if *value { ("✔", GREEN) } else { ("✘", GRAY) };
            println!("  {}{} {}{}", color, mark, condition, RESET);
        }
    }

    if let Some(feedback) = &session.context.feedback {
        println!(
            "{BLUE}Feedback:{RESET}  from {} targeting {} ({} issues)",
            feedback.source,
            feedback.target_fix,
            feedback.issues.len()
        );
    }
}

fn outcome_color(result: StepOutcome) -> &'static str {
    match result {
        StepOutcome::Advanced => GREEN,
        StepOutcome::Repeated => GRAY,
        StepOutcome::Rejected => YELLOW,
        StepOutcome::Forced => CYAN,
        StepOutcome::Faulted => RED,
    }
}

pub fn print_timeline(history: &[HistoryRecord]) {
    if history.is_empty() {
        println!("{GRAY}(no steps recorded yet){RESET}");
        return;
    }
    println!("{BLUE}Timeline:{RESET}");
    for record in history {
        println!(
            "  {} {}{:?}{RESET} {} ({})",
            record.timestamp.format("%Y-%m-%d %H:%M:%S"),
            outcome_color(record.result),
            record.result,
            record.phase,
            record.action
        );
        if let Some(feedback) = &record.feedback {
            for issue in &feedback.issues {
                println!("      {GRAY}- [{:?}] {}{RESET}", issue.severity, issue.message);
            }
        }
    }
}

pub fn print_sessions_table(sessions: &[Session], active_id: Option<&str>) {
    if sessions.is_empty() {
        println!("{GRAY}No sessions.{RESET}");
        return;
    }
    for session in sessions {
        let marker = if Some(session.id.as_str()) == active_id {
            format!("{CYAN}*{RESET}")
        } else {
            " ".to_string()
        };
        println!(
            "{} {} [{}{}{RESET}] {} ({} loops)",
            marker,
            session.id,
            phase_color(session.phase),
            session.phase,
            session.branch_name,
            session.loop_count
        );
    }
}

pub fn print_archive_stats(stats: &ArchiveStats) {
    println!();
    println!(
        "{BLUE}Archived:{RESET} {} total, {GREEN}{} completed{RESET}, {RED}{} errored{RESET}, {} loop-backs",
        stats.total, stats.completed, stats.errored, stats.total_loop_backs
    );
}

pub fn print_transition(from: Phase, to: Phase, kind: TransitionKind) {
    let label = match kind {
        TransitionKind::Advance => "advance",
        TransitionKind::Repeat => "repeat",
        TransitionKind::LoopBack => "loop-back",
    };
    println!("{CYAN}[{}]{RESET} {} -> {}", label, from, to);
}

pub fn print_session_started(session: &Session) {
    println!();
    println!("{GREEN}{BOLD}Session started{RESET}");
    println!("{BLUE}Id:{RESET}      {}", session.id);
    println!("{BLUE}Branch:{RESET}  {}", session.branch_name);
    println!("{BLUE}Phase:{RESET}   {}", session.phase);
    println!();
}

pub fn print_workflow_complete(session: &Session) {
    println!();
    println!(
        "{GREEN}{BOLD}Workflow complete{RESET} after {} loop-back(s)",
        session.loop_count
    );
    println!();
}

pub fn print_interrupted() {
    println!();
    println!("{YELLOW}Interrupted. Session state is persisted; continue with `conduct resume`.{RESET}");
}
