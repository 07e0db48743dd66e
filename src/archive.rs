use crate::error::Result;
use crate::phase::Phase;
use crate::session::Session;
use crate::store::SessionStore;
use std::fs;
use std::path::{Path, PathBuf};

const EPHEMERAL_DIR: &str = "tmp";
const EPHEMERAL_EXT: &str = "tmp";

/// Moves finished sessions into cold storage.
///
/// Archival is a move, never a copy: once it returns, the session is gone
/// from the active namespace, the active pointer no longer names it, and its
/// artifacts live next to the final state snapshot. Ephemeral artifacts
/// (`tmp/` directories, `*.tmp` files) are pruned; specs, review reports and
/// the state snapshot are kept permanently.
pub struct ArchiveManager {
    store: SessionStore,
    prune: bool,
}

impl ArchiveManager {
    pub fn new() -> Self {
        Self::with_store(SessionStore::new())
    }

    pub fn with_store(store: SessionStore) -> Self {
        Self { store, prune: true }
    }

    /// Keep ephemeral artifacts instead of pruning them at archival.
    pub fn with_prune(mut self, prune: bool) -> Self {
        self.prune = prune;
        self
    }

    /// Archive a session. Re-archiving an already-archived session is a
    /// no-op, not an error.
    pub fn archive(&self, id: &str) -> Result<PathBuf> {
        let dest = self.store.archive_session(id)?;
        let artifacts = dest.join("artifacts");
        if self.prune && artifacts.exists() {
            prune_ephemeral(&artifacts)?;
        }
        Ok(dest)
    }

    pub fn list(&self) -> Result<Vec<Session>> {
        self.store.list_archived()
    }

    pub fn stats(&self) -> Result<ArchiveStats> {
        let sessions = self.list()?;
        let total = sessions.len();
        let completed = sessions
            .iter()
            .filter(|s| s.phase == Phase::Complete)
            .count();
        let errored = sessions.iter().filter(|s| s.phase == Phase::Error).count();
        let total_loop_backs: u32 = sessions.iter().map(|s| s.loop_count).sum();

        Ok(ArchiveStats {
            total,
            completed,
            errored,
            total_loop_backs,
        })
    }
}

impl Default for ArchiveManager {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug)]
pub struct ArchiveStats {
    pub total: usize,
    pub completed: usize,
    pub errored: usize,
    pub total_loop_backs: u32,
}

/// Remove temporary artifacts under `dir`: any directory named `tmp` and any
/// file with a `.tmp` extension.
fn prune_ephemeral(dir: &Path) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == EPHEMERAL_DIR) {
                fs::remove_dir_all(&path)?;
            } else {
                prune_ephemeral(&path)?;
            }
        } else if path.extension().is_some_and(|e| e == EPHEMERAL_EXT) {
            fs::remove_file(&path)?;
        }
    }
    Ok(())
}
