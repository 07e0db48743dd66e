//! Ctrl-C handling for the run loop.
//!
//! The driver checks the flag between phase executions, so an interrupt
//! always lands on a durably-persisted session boundary and `resume` can
//! pick up where the run stopped.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{ConductError, Result};

#[derive(Clone)]
pub struct SignalHandler {
    shutdown_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Register the SIGINT handler. Can only be done once per process.
    pub fn new() -> Result<Self> {
        let shutdown_flag = Arc::new(AtomicBool::new(false));
        let flag_clone = Arc::clone(&shutdown_flag);

        ctrlc::set_handler(move || {
            flag_clone.store(true, Ordering::SeqCst);
        })
        .map_err(|e| ConductError::SignalHandler(e.to_string()))?;

        Ok(Self { shutdown_flag })
    }

    /// Non-blocking check, safe from any thread.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_flag.load(Ordering::SeqCst)
    }

    /// A handler with a preset flag and no registered signal, for driving
    /// loops in tests.
    #[cfg(test)]
    pub fn stub(requested: bool) -> Self {
        Self {
            shutdown_flag: Arc::new(AtomicBool::new(requested)),
        }
    }
}
