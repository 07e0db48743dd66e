use crate::error::{ConductError, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;

/// The base config directory name under ~/.config/
const CONFIG_DIR_NAME: &str = "conduct";
const GLOBAL_CONFIG_FILENAME: &str = "config.toml";
const PROJECT_CONFIG_FILENAME: &str = "config.toml";

// ============================================================================
// Engine Configuration
// ============================================================================

/// Operator-tunable settings for the workflow engine.
///
/// Missing fields in a config file fall back to defaults, so partial configs
/// work. Unknown keys are rejected to catch typos early.
///
/// # Example
///
/// ```toml
/// # Command invoked to execute a phase (receives the phase name as its
/// # last argument and the session snapshot on stdin)
/// handler_command = "claude"
/// handler_args = ["--print"]
///
/// # Storage retry policy
/// storage_max_retries = 3
/// storage_backoff_ms = 50
///
/// # Whether archival deletes tmp/ artifacts
/// prune_ephemeral = true
///
/// # Workspace path probed to decide init vs spec at session start
/// bootstrap_marker = "specs"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Command run as the phase handler.
    #[serde(default = "default_handler_command")]
    pub handler_command: String,

    /// Extra arguments passed before the phase name.
    #[serde(default)]
    pub handler_args: Vec<String>,

    /// Transient storage failures are retried this many times.
    #[serde(default = "default_storage_max_retries")]
    pub storage_max_retries: u32,

    /// Initial backoff between storage retries; doubles per attempt.
    #[serde(default = "default_storage_backoff_ms")]
    pub storage_backoff_ms: u64,

    /// Whether archival prunes ephemeral artifacts (tmp/ dirs, *.tmp files).
    #[serde(default = "default_true")]
    pub prune_ephemeral: bool,

    /// Path (relative to the workspace) whose presence means the project is
    /// already bootstrapped.
    #[serde(default = "default_bootstrap_marker")]
    pub bootstrap_marker: String,
}

fn default_handler_command() -> String {
    "claude".to_string()
}

fn default_storage_max_retries() -> u32 {
    3
}

fn default_storage_backoff_ms() -> u64 {
    50
}

fn default_true() -> bool {
    true
}

fn default_bootstrap_marker() -> String {
    "specs".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handler_command: default_handler_command(),
            handler_args: Vec::new(),
            storage_max_retries: default_storage_max_retries(),
            storage_backoff_ms: default_storage_backoff_ms(),
            prune_ephemeral: true,
            bootstrap_marker: default_bootstrap_marker(),
        }
    }
}

/// Check a loaded config for nonsense before the engine uses it.
pub fn validate_config(config: &Config) -> Result<()> {
    if config.handler_command.trim().is_empty() {
        return Err(ConductError::Config(
            "handler_command must not be empty".to_string(),
        ));
    }
    if config.storage_backoff_ms == 0 {
        return Err(ConductError::Config(
            "storage_backoff_ms must be at least 1".to_string(),
        ));
    }
    if config.bootstrap_marker.trim().is_empty() {
        return Err(ConductError::Config(
            "bootstrap_marker must not be empty".to_string(),
        ));
    }
    Ok(())
}

// ============================================================================
// Loading
// ============================================================================

fn load_config_file(path: &PathBuf) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&content)
        .map_err(|e| ConductError::Config(format!("{}: {}", path.display(), e)))?;
    Ok(Some(config))
}

pub fn load_global_config() -> Result<Option<Config>> {
    load_config_file(&global_config_path()?)
}

pub fn load_project_config() -> Result<Option<Config>> {
    load_config_file(&project_config_path()?)
}

/// The config used for a run: the project file when it exists, otherwise the
/// global file, otherwise defaults. Always validated.
pub fn get_effective_config() -> Result<Config> {
    let config = match load_project_config()? {
        Some(config) => config,
        None => load_global_config()?.unwrap_or_default(),
    };
    validate_config(&config)?;
    Ok(config)
}

// ============================================================================
// Directory Management
// ============================================================================

/// Get the conduct config directory path (~/.config/conduct/).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ConductError::Config("Could not determine home directory".to_string()))?;
    Ok(home.join(".config").join(CONFIG_DIR_NAME))
}

pub fn global_config_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(GLOBAL_CONFIG_FILENAME))
}

/// Project name used for the per-project config directory: the workspace
/// directory's basename.
pub fn current_project_name() -> Result<String> {
    let cwd = env::current_dir()
        .map_err(|e| ConductError::Config(format!("Could not determine current directory: {}", e)))?;
    cwd.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ConductError::Config("Could not determine project name from path".to_string()))
}

pub fn project_config_dir() -> Result<PathBuf> {
    Ok(config_dir()?.join(current_project_name()?))
}

pub fn project_config_path() -> Result<PathBuf> {
    Ok(project_config_dir()?.join(PROJECT_CONFIG_FILENAME))
}
