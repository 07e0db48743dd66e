use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConductError {
    #[error("Precondition not met: {0}")]
    Precondition(String),

    #[error("Session already in progress: {0}")]
    SessionInProgress(String),

    #[error("No active session")]
    NoActiveSession,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session is archived and immutable: {0}")]
    SessionArchived(String),

    #[error("Concurrent modification of session {id}: expected revision {expected}, found {found}")]
    Conflict {
        id: String,
        expected: u64,
        found: u64,
    },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Phase handler failed: {0}")]
    Handler(String),

    #[error("Malformed handler result: {0}")]
    MalformedHandlerResult(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to register signal handler: {0}")]
    SignalHandler(String),

    #[error("Unknown phase: {0}")]
    UnknownPhase(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConductError {
    /// Process exit code for this error: 1 precondition/fault, 2 no active
    /// session, 3 storage.
    pub fn exit_code(&self) -> i32 {
        match self {
            ConductError::NoActiveSession | ConductError::SessionNotFound(_) => 2,
            ConductError::Conflict { .. }
            | ConductError::Storage(_)
            | ConductError::Io(_)
            | ConductError::Json(_) => 3,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, ConductError>;
