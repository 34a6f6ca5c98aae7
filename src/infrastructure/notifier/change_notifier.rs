use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::entities::{ChangeKind, ChangeOrigin, FileChangeEvent};

use super::EchoSuppressor;

const CHANNEL_CAPACITY: usize = 1000;
const PRUNE_INTERVAL: Duration = Duration::from_secs(5);

type Observer = Box<dyn Fn(&FileChangeEvent) + Send + Sync>;

struct NotifierState {
    vault_root: PathBuf,
    suppressor: EchoSuppressor,
    observers: RwLock<Vec<Observer>>,
    sender: broadcast::Sender<FileChangeEvent>,
}

impl NotifierState {
    fn dispatch(&self, event: FileChangeEvent) {
        let observers = self.observers.read().expect("observer list poisoned");
        for observer in observers.iter() {
            observer(&event);
        }
        // No receivers is fine; lagging receivers lose the oldest events.
        let _ = self.sender.send(event);
    }

    fn handle_watcher_event(&self, event: notify::Event) {
        let Some(kind) = change_kind_for(&event.kind) else {
            return;
        };

        // A rename reported with both endpoints becomes one event on the
        // destination carrying the old path.
        if matches!(
            event.kind,
            EventKind::Modify(ModifyKind::Name(RenameMode::Both))
        ) && event.paths.len() == 2
        {
            let old = &event.paths[0];
            let new = &event.paths[1];
            let (Some(old_rel), Some(new_rel)) = (
                relative_posix(&self.vault_root, old),
                relative_posix(&self.vault_root, new),
            ) else {
                return;
            };
            if self.suppressor.is_suppressed(ChangeKind::Renamed, new) {
                debug!(path = %new.display(), "suppressed watcher echo");
                return;
            }
            let change = FileChangeEvent::new(
                ChangeKind::Renamed,
                ChangeOrigin::FileSystem,
                new_rel,
                new.clone(),
            )
            .with_old_path(old_rel, old.clone());
            self.dispatch(change);
            return;
        }

        for path in &event.paths {
            let Some(relative) = relative_posix(&self.vault_root, path) else {
                continue;
            };

            let is_directory = path.is_dir();
            // Directory content changes surface as file-level events.
            if is_directory && kind == ChangeKind::Modified {
                continue;
            }

            if self.suppressor.is_suppressed(kind, path) {
                debug!(path = %path.display(), kind = %kind, "suppressed watcher echo");
                continue;
            }

            let mut change =
                FileChangeEvent::new(kind, ChangeOrigin::FileSystem, relative, path.clone());
            if is_directory {
                change = change.directory();
            }
            self.dispatch(change);
        }
    }
}

/// Merges OS watcher events with application-originated change reports into
/// one stream, dropping watcher echoes of the application's own writes.
///
/// Fan-out is twofold: synchronous observer callbacks and a bounded
/// broadcast channel whose slow subscribers lose the oldest events.
pub struct ChangeNotifier {
    state: Arc<NotifierState>,
    watcher: Arc<Mutex<Option<notify::RecommendedWatcher>>>,
    cancel: CancellationToken,
}

impl ChangeNotifier {
    pub fn new(vault_root: impl Into<PathBuf>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            state: Arc::new(NotifierState {
                vault_root: vault_root.into(),
                suppressor: EchoSuppressor::new(),
                observers: RwLock::new(Vec::new()),
                sender,
            }),
            watcher: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
        }
    }

    /// Arm the recursive OS watcher and the suppression prune timer.
    pub fn start(&self) -> Result<(), notify::Error> {
        arm_watcher(&self.state, &self.watcher)?;

        let state = self.state.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(PRUNE_INTERVAL) => state.suppressor.prune(),
                }
            }
        });

        Ok(())
    }

    /// Report an in-process mutation (WebDAV handler or any other caller).
    /// The event is published downstream and the matching watcher echo is
    /// suppressed.
    pub fn notify_application_change(
        &self,
        kind: ChangeKind,
        relative_path: &str,
        physical_path: &Path,
        is_directory: bool,
        old_relative_path: Option<&str>,
        old_physical_path: Option<&Path>,
    ) {
        self.state.suppressor.record(kind, physical_path);
        if let Some(old_physical) = old_physical_path {
            // The source side of a rename echoes as a remove.
            self.state.suppressor.record(ChangeKind::Deleted, old_physical);
        }

        let mut event = FileChangeEvent::new(
            kind,
            ChangeOrigin::WebDav,
            relative_path,
            physical_path.to_path_buf(),
        );
        if is_directory {
            event = event.directory();
        }
        if let (Some(old_rel), Some(old_phys)) = (old_relative_path, old_physical_path) {
            event = event.with_old_path(old_rel, old_phys.to_path_buf());
        }

        self.state.dispatch(event);
    }

    /// Register a synchronous observer callback.
    pub fn add_observer(&self, observer: impl Fn(&FileChangeEvent) + Send + Sync + 'static) {
        self.state
            .observers
            .write()
            .expect("observer list poisoned")
            .push(Box::new(observer));
    }

    /// Subscribe to the bounded async event channel. The stream is lossy
    /// under overflow; subscribers must tolerate gaps.
    pub fn subscribe(&self) -> broadcast::Receiver<FileChangeEvent> {
        self.state.sender.subscribe()
    }

    pub fn vault_root(&self) -> &Path {
        &self.state.vault_root
    }

    /// Stop the watcher and the prune timer. Subscribers see the channel
    /// close once the notifier is dropped.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        if let Ok(mut slot) = self.watcher.lock() {
            slot.take();
        }
    }

    #[cfg(test)]
    pub(crate) fn inject_watcher_event(&self, event: notify::Event) {
        self.state.handle_watcher_event(event);
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn arm_watcher(
    state: &Arc<NotifierState>,
    slot: &Arc<Mutex<Option<notify::RecommendedWatcher>>>,
) -> Result<(), notify::Error> {
    let handler_state = state.clone();
    let rearm_state = state.clone();
    let rearm_slot = slot.clone();
    let handle = tokio::runtime::Handle::current();

    let mut watcher = notify::recommended_watcher(move |result: notify::Result<notify::Event>| {
        match result {
            Ok(event) => handler_state.handle_watcher_event(event),
            Err(error) => {
                // Kernel buffer overflow or similar: drop and re-arm; the
                // queue's hash dedup absorbs whatever was lost.
                warn!(%error, "file watcher error, re-arming");
                let state = rearm_state.clone();
                let slot = rearm_slot.clone();
                handle.spawn(async move {
                    {
                        let mut guard = slot.lock().expect("watcher slot poisoned");
                        guard.take();
                    }
                    if let Err(error) = arm_watcher(&state, &slot) {
                        warn!(%error, "failed to re-arm file watcher");
                    }
                });
            }
        }
    })?;

    watcher.watch(&state.vault_root, RecursiveMode::Recursive)?;
    slot.lock().expect("watcher slot poisoned").replace(watcher);
    Ok(())
}

fn change_kind_for(kind: &EventKind) -> Option<ChangeKind> {
    match kind {
        EventKind::Create(_) => Some(ChangeKind::Created),
        EventKind::Remove(_) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => Some(ChangeKind::Deleted),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => Some(ChangeKind::Created),
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Some(ChangeKind::Renamed),
        EventKind::Modify(_) => Some(ChangeKind::Modified),
        _ => None,
    }
}

/// Relative POSIX-style path under the vault root, or None for paths
/// outside it.
fn relative_posix(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
