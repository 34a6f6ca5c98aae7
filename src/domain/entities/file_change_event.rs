use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    Created,
    Modified,
    Deleted,
    Renamed,
    Copied,
    Moved,
}

impl std::fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeKind::Created => "created",
            ChangeKind::Modified => "modified",
            ChangeKind::Deleted => "deleted",
            ChangeKind::Renamed => "renamed",
            ChangeKind::Copied => "copied",
            ChangeKind::Moved => "moved",
        };
        write!(f, "{}", s)
    }
}

/// Where a change report came from: the OS watcher, or an in-process mutator
/// (the WebDAV handler) telling us about its own write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOrigin {
    WebDav,
    FileSystem,
}

/// Value-type change notification fanned out by the notifier. Subscribers
/// get owned copies; nothing here points back into the notifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileChangeEvent {
    pub kind: ChangeKind,
    pub origin: ChangeOrigin,
    pub relative_path: String,
    pub physical_path: PathBuf,
    pub is_directory: bool,
    pub old_relative_path: Option<String>,
    pub old_physical_path: Option<PathBuf>,
    pub timestamp: DateTime<Utc>,
}

impl FileChangeEvent {
    pub fn new(
        kind: ChangeKind,
        origin: ChangeOrigin,
        relative_path: impl Into<String>,
        physical_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            kind,
            origin,
            relative_path: relative_path.into(),
            physical_path: physical_path.into(),
            is_directory: false,
            old_relative_path: None,
            old_physical_path: None,
            timestamp: Utc::now(),
        }
    }

    pub fn directory(mut self) -> Self {
        self.is_directory = true;
        self
    }

    pub fn with_old_path(
        mut self,
        old_relative: impl Into<String>,
        old_physical: impl Into<PathBuf>,
    ) -> Self {
        self.old_relative_path = Some(old_relative.into());
        self.old_physical_path = Some(old_physical.into());
        self
    }

    /// Removal of content at `relative_path`: a plain delete, or the
    /// source side of a rename/move.
    pub fn removes_content(&self) -> bool {
        self.kind == ChangeKind::Deleted
    }
}
