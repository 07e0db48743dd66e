use crate::error::{ConductError, Result};
use crate::session::Session;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tempfile::NamedTempFile;

const STATE_DIR: &str = ".conduct";
const SESSIONS_DIR: &str = "sessions";
const ARCHIVE_DIR: &str = "archive";
const ARTIFACTS_DIR: &str = "artifacts";
const ACTIVE_FILE: &str = "active";
const SESSION_FILE_IN_ARCHIVE: &str = "session.json";

const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_BACKOFF_MS: u64 = 50;

/// Durable storage for session records.
///
/// One JSON document per session under `.conduct/sessions/`, a single
/// `active` pointer file naming the in-flight session, and an `archive/`
/// namespace that archived sessions are *moved* into. Every write goes
/// through write-temp-then-rename, so a reader always sees either the last
/// fully-written version or the previous one.
pub struct SessionStore {
    base_dir: PathBuf,
    max_retries: u32,
    backoff: Duration,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_dir(PathBuf::from(STATE_DIR))
    }

    pub fn with_dir(dir: PathBuf) -> Self {
        Self {
            base_dir: dir,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff: Duration::from_millis(DEFAULT_BACKOFF_MS),
        }
    }

    pub fn with_retry(mut self, max_retries: u32, backoff_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.backoff = Duration::from_millis(backoff_ms);
        self
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn sessions_dir(&self) -> PathBuf {
        self.base_dir.join(SESSIONS_DIR)
    }

    fn archive_dir(&self) -> PathBuf {
        self.base_dir.join(ARCHIVE_DIR)
    }

    fn active_file(&self) -> PathBuf {
        self.base_dir.join(ACTIVE_FILE)
    }

    pub fn session_file(&self, id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{}.json", id))
    }

    /// Directory a running session's phase artifacts (specs, reports, logs)
    /// live in.
    pub fn artifacts_dir(&self, id: &str) -> PathBuf {
        self.base_dir.join(ARTIFACTS_DIR).join(id)
    }

    pub fn archived_session_dir(&self, id: &str) -> PathBuf {
        self.archive_dir().join(id)
    }

    fn archived_session_file(&self, id: &str) -> PathBuf {
        self.archived_session_dir(id).join(SESSION_FILE_IN_ARCHIVE)
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.sessions_dir())?;
        fs::create_dir_all(self.archive_dir())?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn is_archived(&self, id: &str) -> bool {
        self.archived_session_file(id).exists()
    }

    /// Load a non-archived session by id.
    pub fn load(&self, id: &str) -> Result<Session> {
        self.try_load(id)?
            .ok_or_else(|| ConductError::SessionNotFound(id.to_string()))
    }

    pub fn try_load(&self, id: &str) -> Result<Option<Session>> {
        let path = self.session_file(id);
        if !path.exists() {
            return Ok(None);
        }
        let content = self.read_with_retries(&path)?;
        let session: Session = serde_json::from_str(&content)
            .map_err(|e| ConductError::Storage(format!("corrupt session file {}: {}", id, e)))?;
        Ok(Some(session))
    }

    pub fn active_id(&self) -> Result<Option<String>> {
        let path = self.active_file();
        if !path.exists() {
            return Ok(None);
        }
        let id = self.read_with_retries(&path)?.trim().to_string();
        if id.is_empty() {
            return Ok(None);
        }
        Ok(Some(id))
    }

    pub fn load_active(&self) -> Result<Option<Session>> {
        match self.active_id()? {
            Some(id) => self.try_load(&id),
            None => Ok(None),
        }
    }

    /// All non-archived sessions, newest first. Unreadable files are skipped
    /// rather than failing the whole listing.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let dir = self.sessions_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().is_some_and(|e| e == "json") {
                if let Ok(content) = fs::read_to_string(&path) {
                    if let Ok(session) = serde_json::from_str::<Session>(&content) {
                        sessions.push(session);
                    }
                }
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    pub fn list_archived(&self) -> Result<Vec<Session>> {
        let dir = self.archive_dir();
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut sessions = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file = entry.path().join(SESSION_FILE_IN_ARCHIVE);
            if let Ok(content) = fs::read_to_string(&file) {
                if let Ok(session) = serde_json::from_str::<Session>(&content) {
                    sessions.push(session);
                }
            }
        }
        sessions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(sessions)
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Persist a session.
    ///
    /// Versioned read-modify-write: the caller's `revision` must match the
    /// on-disk record or the save fails with a conflict, in which case the
    /// caller reloads and re-decides rather than overwriting someone else's
    /// result. On success the revision is bumped and `updated_at` rewritten.
    pub fn save(&self, session: &mut Session) -> Result<()> {
        if self.is_archived(&session.id) {
            return Err(ConductError::SessionArchived(session.id.clone()));
        }
        self.ensure_dirs()?;

        let path = self.session_file(&session.id);
        if path.exists() {
            let content = self.read_with_retries(&path)?;
            let on_disk: Session = serde_json::from_str(&content).map_err(|e| {
                ConductError::Storage(format!("corrupt session file {}: {}", session.id, e))
            })?;
            if on_disk.revision != session.revision {
                return Err(ConductError::Conflict {
                    id: session.id.clone(),
                    expected: session.revision,
                    found: on_disk.revision,
                });
            }
        } else if session.revision != 0 {
            return Err(ConductError::Storage(format!(
                "session file for {} disappeared (revision {})",
                session.id, session.revision
            )));
        }

        session.revision += 1;
        session.touch();
        let content = serde_json::to_string_pretty(&*session)?;
        if let Err(e) = self.write_atomic_with_retries(&path, &content) {
            session.revision -= 1;
            return Err(e);
        }
        Ok(())
    }

    pub fn set_active(&self, id: &str) -> Result<()> {
        self.ensure_dirs()?;
        self.write_atomic_with_retries(&self.active_file(), id)
    }

    pub fn clear_active(&self) -> Result<()> {
        let path = self.active_file();
        if path.exists() {
            self.io_with_retries(|| fs::remove_file(&path))?;
        }
        Ok(())
    }

    /// Move a session into the archive namespace. A move, not a
    /// copy-then-delete: there is no window where the session exists in both
    /// places. Idempotent: archiving an already-archived session is a no-op.
    pub fn archive_session(&self, id: &str) -> Result<PathBuf> {
        let archived_file = self.archived_session_file(id);
        if archived_file.exists() {
            return Ok(self.archived_session_dir(id));
        }

        let source = self.session_file(id);
        if !source.exists() {
            return Err(ConductError::SessionNotFound(id.to_string()));
        }

        let dest_dir = self.archived_session_dir(id);
        fs::create_dir_all(&dest_dir)?;
        self.io_with_retries(|| fs::rename(&source, &archived_file))?;

        let artifacts = self.artifacts_dir(id);
        if artifacts.exists() {
            self.io_with_retries(|| fs::rename(&artifacts, dest_dir.join(ARTIFACTS_DIR)))?;
        }

        if self.active_id()?.as_deref() == Some(id) {
            self.clear_active()?;
        }

        Ok(dest_dir)
    }

    // ------------------------------------------------------------------
    // Retry / atomic-write plumbing
    // ------------------------------------------------------------------

    fn read_with_retries(&self, path: &Path) -> Result<String> {
        self.io_with_retries(|| fs::read_to_string(path))
    }

    fn write_atomic_with_retries(&self, path: &Path, content: &str) -> Result<()> {
        self.io_with_retries(|| write_atomic(path, content))
    }

    /// Run an I/O operation, retrying transient failures with doubling
    /// backoff. Exhausted retries surface as a storage error and the on-disk
    /// state stays at its last fully-committed version.
    fn io_with_retries<T>(&self, mut op: impl FnMut() -> std::io::Result<T>) -> Result<T> {
        let mut delay = self.backoff;
        let mut attempt = 0;
        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(_) if attempt < self.max_retries => {
                    thread::sleep(delay);
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(ConductError::Io(e)),
            }
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Write-temp-then-rename in the target's directory, so the replace is atomic
/// on the same filesystem.
fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;
    let mut temp = NamedTempFile::new_in(parent)?;
    temp.write_all(content.as_bytes())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
