//! The phase handler boundary.
//!
//! The orchestrator never runs phase-specific work (spec writing, testing,
//! reviewing) itself; it hands the session snapshot to an external
//! collaborator and gets back a structured result. `CommandHandler` is the
//! production implementation: it spawns the configured command, streams the
//! request over stdin and reads the result off stdout.

use crate::condition::ConditionsDelta;
use crate::error::{ConductError, Result};
use crate::feedback::Feedback;
use crate::phase::Phase;
use crate::session::Session;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::io::{BufRead, BufReader, Write};
use std::process::{Command, Stdio};

/// What the orchestrator sends a handler: the full session snapshot plus the
/// phase to execute.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseRequest {
    pub session: Session,
    pub phase: Phase,
}

/// What a handler reports back. The handler never mutates session state
/// directly; everything flows through `Orchestrator::advance`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HandlerResult {
    /// Conditions to set. Values are set, not toggled, so re-applying the
    /// same result is safe.
    #[serde(default)]
    pub conditions_delta: ConditionsDelta,
    /// Opaque context updates merged into the session.
    #[serde(default)]
    pub context_delta: Map<String, Value>,
    /// Failure report, present when the phase rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    /// New sub-step label within the phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    /// Short label of what the handler did, recorded in history.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

/// An external collaborator that executes one phase of the workflow.
pub trait PhaseHandler {
    fn execute(
        &mut self,
        session: &Session,
        phase: Phase,
        on_output: &mut dyn FnMut(&str),
    ) -> Result<HandlerResult>;
}

/// Runs the configured handler command as a subprocess.
///
/// The request JSON goes to the child's stdin, stdout is streamed line by
/// line through `on_output` (feeding the progress display), and the trailing
/// JSON object in the transcript is parsed as the `HandlerResult`.
pub struct CommandHandler {
    command: String,
    args: Vec<String>,
}

impl CommandHandler {
    pub fn new(command: &str, args: &[String]) -> Self {
        Self {
            command: command.to_string(),
            args: args.to_vec(),
        }
    }
}

impl PhaseHandler for CommandHandler {
    fn execute(
        &mut self,
        session: &Session,
        phase: Phase,
        on_output: &mut dyn FnMut(&str),
    ) -> Result<HandlerResult> {
        let request = PhaseRequest {
            session: session.clone(),
            phase,
        };
        let request_json = serde_json::to_string(&request)?;

        let mut child = Command::new(&self.command)
            .args(&self.args)
            .arg(phase.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                ConductError::Handler(format!("failed to spawn {}: {}", self.command, e))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request_json.as_bytes())
                .map_err(|e| ConductError::Handler(format!("failed to write request: {}", e)))?;
        }

        // Take stderr before consuming stdout.
        let stderr = child.stderr.take();

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ConductError::Handler("failed to capture stdout".into()))?;

        let reader = BufReader::new(stdout);
        let mut transcript = String::new();
        for line in reader.lines() {
            let line = line.map_err(|e| ConductError::Handler(format!("read error: {}", e)))?;
            on_output(&line);
            transcript.push_str(&line);
            transcript.push('\n');
        }

        let status = child
            .wait()
            .map_err(|e| ConductError::Handler(format!("wait error: {}", e)))?;

        if !status.success() {
            let stderr_content = stderr
                .map(|s| std::io::read_to_string(s).unwrap_or_default())
                .unwrap_or_default();
            let msg = if stderr_content.is_empty() {
                format!("{} exited with status {}", self.command, status)
            } else {
                format!(
                    "{} exited with status {}: {}",
                    self.command,
                    status,
                    stderr_content.trim()
                )
            };
            return Err(ConductError::Handler(msg));
        }

        let json = extract_json(&transcript).ok_or_else(|| {
            ConductError::MalformedHandlerResult("no JSON object found in handler output".into())
        })?;
        serde_json::from_str(&json)
            .map_err(|e| ConductError::MalformedHandlerResult(format!("parse error: {}", e)))
    }
}

/// Pull the result object out of a handler transcript, tolerating markdown
/// fences and leading narration.
fn extract_json(response: &str) -> Option<String> {
    let trimmed = response.trim();

    if let Some(start) = trimmed.find("```json") {
        let content_start = start + 7;
        if let Some(end) = trimmed[content_start..].find("```") {
            return Some(
                trimmed[content_start..content_start + end]
                    .trim()
                    .to_string(),
            );
        }
    }

    if let Some(start) = trimmed.find('{') {
        if let Some(end) = trimmed.rfind('}') {
            if end > start {
                return Some(trimmed[start..=end].to_string());
            }
        }
    }

    None
}
