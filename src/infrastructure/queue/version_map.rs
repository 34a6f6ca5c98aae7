use dashmap::DashMap;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, warn};

/// Persistent map from relative source path to the content hash of the last
/// successfully processed revision.
///
/// Rewrites are atomic: write `versions.json.tmp`, move the current file to
/// `versions.json.bak`, then rename the temp file into place. Startup loads
/// the primary, falls back to the backup, and otherwise starts empty.
pub struct VersionMap {
    entries: DashMap<String, String>,
    file_path: PathBuf,
    dirty: AtomicBool,
}

impl VersionMap {
    pub fn load(file_path: impl Into<PathBuf>) -> Self {
        let file_path = file_path.into();
        let entries = DashMap::new();

        let primary = match read_entries(&file_path) {
            Ok(found) => found,
            Err(e) => {
                warn!(error = %e, "version map unreadable, trying backup");
                None
            }
        };
        let loaded = primary.or_else(|| match read_entries(&backup_path(&file_path)) {
            Ok(Some(map)) => {
                debug!("loaded version map from backup");
                Some(map)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(error = %e, "version map backup unreadable, starting empty");
                None
            }
        });
        for (path, hash) in loaded.unwrap_or_default() {
            entries.insert(path, hash);
        }

        Self {
            entries,
            file_path,
            dirty: AtomicBool::new(false),
        }
    }

    pub fn get(&self, relative_path: &str) -> Option<String> {
        self.entries.get(relative_path).map(|e| e.value().clone())
    }

    pub fn set(&self, relative_path: impl Into<String>, hash: impl Into<String>) {
        self.entries.insert(relative_path.into(), hash.into());
        self.dirty.store(true, Ordering::Release);
    }

    pub fn remove(&self, relative_path: &str) {
        if self.entries.remove(relative_path).is_some() {
            self.dirty.store(true, Ordering::Release);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Serialize to disk with the tmp/bak rename dance. A clean map is a
    /// no-op.
    pub fn persist(&self) -> std::io::Result<()> {
        if !self.dirty.swap(false, Ordering::AcqRel) {
            return Ok(());
        }

        let snapshot: HashMap<String, String> = self
            .entries
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let json = serde_json::to_string_pretty(&snapshot)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        if let Some(parent) = self.file_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp = self.file_path.with_extension("json.tmp");
        std::fs::write(&tmp, json)?;

        if self.file_path.exists() {
            std::fs::rename(&self.file_path, backup_path(&self.file_path))?;
        }
        std::fs::rename(&tmp, &self.file_path)?;

        debug!(entries = self.len(), "persisted version map");
        Ok(())
    }
}

fn backup_path(file_path: &Path) -> PathBuf {
    file_path.with_extension("json.bak")
}

fn read_entries(path: &Path) -> std::io::Result<Option<HashMap<String, String>>> {
    let data = match std::fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };
    let map = serde_json::from_str::<HashMap<String, String>>(&data)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    Ok(Some(map))
}
