//! Project bootstrap probe.
//!
//! "Is the project ready?" is answered outside the engine: the orchestrator
//! consults this predicate exactly once at `start` to decide whether the new
//! session opens in `init` (scaffolding still needed) or jumps straight to
//! `spec`.

use std::fs;
use std::path::Path;

/// True when the workspace carries the bootstrap marker: an existing file, or
/// a directory with at least one entry.
pub fn is_bootstrapped(workspace: &Path, marker: &str) -> bool {
    let path = workspace.join(marker);
    if path.is_file() {
        return true;
    }
    if path.is_dir() {
        return fs::read_dir(&path)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_marker_is_not_bootstrapped() {
        let dir = TempDir::new().unwrap();
        assert!(!is_bootstrapped(dir.path(), "specs"));
    }

    #[test]
    fn test_empty_marker_directory_is_not_bootstrapped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("specs")).unwrap();
        assert!(!is_bootstrapped(dir.path(), "specs"));
    }

    #[test]
    fn test_populated_marker_directory_is_bootstrapped() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("specs")).unwrap();
        fs::write(dir.path().join("specs").join("feature.md"), "spec").unwrap();
        assert!(is_bootstrapped(dir.path(), "specs"));
    }

    #[test]
    fn test_marker_file_is_bootstrapped() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(".project-ready"), "").unwrap();
        assert!(is_bootstrapped(dir.path(), ".project-ready"));
    }
}
