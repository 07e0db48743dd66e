use crate::output::{DIM, GREEN, RED, RESET};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use terminal_size::{terminal_size, Width};

const SPINNER_CHARS: &str = "⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏";
const DEFAULT_TERMINAL_WIDTH: u16 = 80;
// Spinner (2) + " Running " (9) + " | " (3) + " [HH:MM:SS]" (11) overhead
const SPINNER_OVERHEAD: usize = 25;

fn get_terminal_width() -> usize {
    terminal_size()
        .map(|(Width(w), _)| w as usize)
        .unwrap_or(DEFAULT_TERMINAL_WIDTH as usize)
}

fn format_elapsed(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn truncate_activity(activity: &str, max: usize) -> String {
    let cleaned = activity.trim();
    if cleaned.chars().count() <= max {
        return cleaned.to_string();
    }
    let truncated: String = cleaned.chars().take(max.saturating_sub(1)).collect();
    format!("{}…", truncated)
}

// ============================================================================
// VerboseTimer: elapsed-time heartbeat that lets full output scroll
// ============================================================================

/// Periodically prints an elapsed-time line to stderr while handler output
/// scrolls untruncated. Used in `--verbose` mode.
pub struct VerboseTimer {
    label: String,
    stop_flag: Arc<AtomicBool>,
    timer_thread: Option<JoinHandle<()>>,
    start_time: Instant,
}

impl VerboseTimer {
    pub fn new(label: &str) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let start_time = Instant::now();

        let stop_flag_clone = Arc::clone(&stop_flag);
        let label_owned = label.to_string();

        let timer_thread = thread::spawn(move || {
            let mut last_print = Instant::now();
            while !stop_flag_clone.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_millis(500));
                if stop_flag_clone.load(Ordering::Relaxed) {
                    break;
                }
                if last_print.elapsed().as_secs() >= 10 {
                    eprintln!(
                        "{DIM}[{} elapsed: {}]{RESET}",
                        label_owned,
                        format_elapsed(start_time.elapsed().as_secs())
                    );
                    last_print = Instant::now();
                }
            }
        });

        Self {
            label: label.to_string(),
            stop_flag,
            timer_thread: Some(timer_thread),
            start_time,
        }
    }

    fn stop_timer(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.timer_thread.take() {
            let _ = handle.join();
        }
    }

    pub fn finish_success(&mut self) {
        self.stop_timer();
        let elapsed = self.start_time.elapsed();
        let mins = elapsed.as_secs() / 60;
        let secs = elapsed.as_secs() % 60;
        eprintln!("{GREEN}{} completed in {}m {}s{RESET}", self.label, mins, secs);
    }

    pub fn finish_error(&mut self, error: &str) {
        self.stop_timer();
        eprintln!("{RED}{} failed: {}{RESET}", self.label, error);
    }
}

impl Drop for VerboseTimer {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.timer_thread.take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// PhaseSpinner: single-line preview with spinner animation
// ============================================================================

pub struct PhaseSpinner {
    spinner: Arc<ProgressBar>,
    label: String,
    stop_flag: Arc<AtomicBool>,
    timer_thread: Option<JoinHandle<()>>,
    start_time: Instant,
    last_activity: Arc<Mutex<String>>,
}

impl PhaseSpinner {
    pub fn new(label: &str) -> Self {
        let spinner = Arc::new(ProgressBar::new_spinner());
        spinner.set_style(
            ProgressStyle::default_spinner()
                .tick_chars(SPINNER_CHARS)
                .template("{spinner:.cyan} Running {msg}")
                .expect("invalid template"),
        );
        spinner.set_message(format!("{} | Starting... [00:00:00]", label));
        spinner.enable_steady_tick(Duration::from_millis(80));

        let stop_flag = Arc::new(AtomicBool::new(false));
        let start_time = Instant::now();
        let last_activity = Arc::new(Mutex::new("Starting...".to_string()));

        let spinner_clone = Arc::clone(&spinner);
        let stop_flag_clone = Arc::clone(&stop_flag);
        let last_activity_clone = Arc::clone(&last_activity);
        let label_owned = label.to_string();

        // Timer thread keeps the elapsed display moving even when the
        // handler goes quiet.
        let timer_thread = thread::spawn(move || {
            while !stop_flag_clone.load(Ordering::Relaxed) {
                thread::sleep(Duration::from_secs(1));
                if stop_flag_clone.load(Ordering::Relaxed) {
                    break;
                }
                let time_str = format_elapsed(start_time.elapsed().as_secs());
                let activity = last_activity_clone.lock().unwrap().clone();
                let available =
                    get_terminal_width().saturating_sub(label_owned.len() + SPINNER_OVERHEAD);
                let truncated = truncate_activity(&activity, available.max(20));
                spinner_clone.set_message(format!("{} | {} [{}]", label_owned, truncated, time_str));
            }
        });

        Self {
            spinner,
            label: label.to_string(),
            stop_flag,
            timer_thread: Some(timer_thread),
            start_time,
            last_activity,
        }
    }

    pub fn update(&self, activity: &str) {
        if let Ok(mut guard) = self.last_activity.lock() {
            *guard = activity.to_string();
        }

        let time_str = format_elapsed(self.start_time.elapsed().as_secs());
        let available = get_terminal_width().saturating_sub(self.label.len() + SPINNER_OVERHEAD);
        let truncated = truncate_activity(activity, available.max(20));
        self.spinner
            .set_message(format!("{} | {} [{}]", self.label, truncated, time_str));
    }

    fn stop_timer(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.timer_thread.take() {
            let _ = handle.join();
        }
    }

    pub fn finish_success(&mut self) {
        self.stop_timer();
        let elapsed = self.start_time.elapsed();
        let mins = elapsed.as_secs() / 60;
        let secs = elapsed.as_secs() % 60;
        self.spinner.finish_and_clear();
        println!(
            "{GREEN}\u{2714} {} completed in {}m {}s{RESET}",
            self.label, mins, secs
        );
    }

    pub fn finish_error(&mut self, error: &str) {
        self.stop_timer();
        let available = get_terminal_width().saturating_sub(self.label.chars().count() + 15);
        let truncated = truncate_activity(error, available.max(20));
        self.spinner.finish_and_clear();
        println!("{RED}\u{2718} {} failed: {}{RESET}", self.label, truncated);
    }
}

impl Drop for PhaseSpinner {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.timer_thread.take() {
            let _ = handle.join();
        }
        self.spinner.finish_and_clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "00:00:00");
        assert_eq!(format_elapsed(61), "00:01:01");
        assert_eq!(format_elapsed(3661), "01:01:01");
    }

    #[test]
    fn test_truncate_activity_short_string_unchanged() {
        assert_eq!(truncate_activity("hello", 20), "hello");
    }

    #[test]
    fn test_truncate_activity_long_string_gets_ellipsis() {
        let result = truncate_activity("a long line of handler output", 10);
        assert!(result.chars().count() <= 10);
        assert!(result.ends_with('…'));
    }

    #[test]
    fn test_truncate_activity_trims_whitespace() {
        assert_eq!(truncate_activity("  padded  ", 20), "padded");
    }
}
