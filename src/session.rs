use crate::condition::ConditionSet;
use crate::feedback::Feedback;
use crate::phase::Phase;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Version stamped into every persisted session record so future readers can
/// migrate old documents.
pub const SCHEMA_VERSION: u32 = 1;

const SLUG_MAX_LEN: usize = 40;

/// How one executed step of the workflow ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    /// Gate opened, moved to the successor phase.
    Advanced,
    /// Gate still closed, same phase runs again.
    Repeated,
    /// Gate failed and the session was routed backward.
    Rejected,
    /// An operator bypassed the gates with goto-phase.
    Forced,
    /// A malformed handler result routed the session to the error phase.
    Faulted,
}

/// One entry in a session's append-only timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub timestamp: DateTime<Utc>,
    /// The phase that executed (or, for forced entries, the phase left).
    pub phase: Phase,
    /// Free-form label of what the handler did, e.g. "ran-test-suite".
    pub action: String,
    pub result: StepOutcome,
    /// The failure payload, kept with the rejection that produced it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
}

/// Opaque data passed between phases.
///
/// The engine interprets only the `feedback` slot; everything else rides
/// along untouched (file lists, scores, handler scratch data).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Context {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Feedback>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The persisted record of one workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub feature_id: String,
    pub feature_description: String,
    pub branch_name: String,
    pub phase: Phase,
    /// Sub-step label within the current phase, owned by the phase handler.
    #[serde(default)]
    pub step: Option<String>,
    /// Number of backward transitions taken so far.
    #[serde(default)]
    pub loop_count: u32,
    pub conditions: ConditionSet,
    #[serde(default)]
    pub context: Context,
    pub history: Vec<HistoryRecord>,
    /// Optimistic-concurrency counter, bumped by the store on every write.
    #[serde(default)]
    pub revision: u64,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl Session {
    /// Create a fresh session for a feature. The id is the creation timestamp
    /// plus a slug of the description, which keeps session files sortable and
    /// human-readable.
    pub fn new(feature_description: &str, initial_phase: Phase) -> Self {
        let now = Utc::now();
        let slug = slugify(feature_description);
        let id = format!("{}-{}", now.format("%Y%m%d%H%M%S"), slug);
        let feature_id = format!("{}-{}", slug, &Uuid::new_v4().to_string()[..8]);
        let branch_name = format!("feature/{}", slug);

        Self {
            schema_version: SCHEMA_VERSION,
            id,
            created_at: now,
            updated_at: now,
            feature_id,
            feature_description: feature_description.to_string(),
            branch_name,
            phase: initial_phase,
            step: None,
            loop_count: 0,
            conditions: ConditionSet::new(),
            context: Context::default(),
            history: Vec::new(),
            revision: 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.phase.is_terminal()
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Append a timeline entry. History is append-only; nothing else in the
    /// codebase mutates it.
    pub fn record(
        &mut self,
        phase: Phase,
        action: &str,
        result: StepOutcome,
        feedback: Option<Feedback>,
    ) {
        self.history.push(HistoryRecord {
            timestamp: Utc::now(),
            phase,
            action: action.to_string(),
            result,
            feedback,
        });
        self.touch();
    }

    /// Count of recorded rejections. The session invariant is that this
    /// always equals `loop_count`.
    pub fn recorded_rejections(&self) -> u32 {
        self.history
            .iter()
            .filter(|r| r.result == StepOutcome::Rejected)
            .count() as u32
    }
}

/// Lowercase, alphanumeric-and-dash slug of a feature description.
pub fn slugify(text: &str) -> String {
    let re = Regex::new(r"[^a-z0-9]+").unwrap();
    let slug = re
        .replace_all(&text.to_lowercase(), "-")
        .trim_matches('-')
        .to_string();
    if slug.is_empty() {
        return "feature".to_string();
    }
    let mut truncated: String = slug.chars().take(SLUG_MAX_LEN).collect();
    while truncated.ends_with('-') {
        truncated.pop();
    }
    truncated
}
