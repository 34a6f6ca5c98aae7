use chrono::Utc;
use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::domain::entities::ChangeKind;

const RETENTION: Duration = Duration::from_secs(5);

/// Remembers application-originated writes so the OS watcher's echo of the
/// same mutation can be dropped.
///
/// Keys are `(kind, physical_path, unix_second)`; a watcher event matching
/// the current or the previous second is considered an echo.
pub struct EchoSuppressor {
    entries: DashMap<(ChangeKind, PathBuf, i64), Instant>,
}

impl EchoSuppressor {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn record(&self, kind: ChangeKind, physical_path: &Path) {
        let second = Utc::now().timestamp();
        self.entries
            .insert((kind, physical_path.to_path_buf(), second), Instant::now());
    }

    pub fn is_suppressed(&self, kind: ChangeKind, physical_path: &Path) -> bool {
        let second = Utc::now().timestamp();
        let current = (kind, physical_path.to_path_buf(), second);
        if self.entries.contains_key(&current) {
            return true;
        }
        let previous = (kind, physical_path.to_path_buf(), second - 1);
        self.entries.contains_key(&previous)
    }

    /// Drop entries older than the retention window; runs on a 5 s timer.
    pub fn prune(&self) {
        let now = Instant::now();
        self.entries
            .retain(|_, recorded| now.duration_since(*recorded) < RETENTION);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for EchoSuppressor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorded_write_suppresses_matching_event() {
        let suppressor = EchoSuppressor::new();
        let path = Path::new("/vault/b.txt");

        suppressor.record(ChangeKind::Modified, path);
        assert!(suppressor.is_suppressed(ChangeKind::Modified, path));

        // A different kind or path is not an echo.
        assert!(!suppressor.is_suppressed(ChangeKind::Deleted, path));
        assert!(!suppressor.is_suppressed(ChangeKind::Modified, Path::new("/vault/c.txt")));
    }

    #[test]
    fn test_prune_keeps_fresh_entries() {
        let suppressor = EchoSuppressor::new();
        suppressor.record(ChangeKind::Created, Path::new("/vault/a.txt"));
        assert_eq!(suppressor.len(), 1);

        suppressor.prune();
        assert_eq!(suppressor.len(), 1, "fresh entries survive pruning");
    }
}
