use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

use crate::domain::entities::ProcessingTask;

use super::VersionMap;

const PUMP_INTERVAL: Duration = Duration::from_millis(100);
const PERSIST_INTERVAL: Duration = Duration::from_secs(30);

struct PendingChange {
    task: ProcessingTask,
    ready_at: Instant,
}

/// Released on drop, so the per-path lock cannot leak across an error or
/// cancellation exit.
pub struct PathLockGuard {
    semaphore: Arc<Semaphore>,
}

impl Drop for PathLockGuard {
    fn drop(&mut self) {
        self.semaphore.add_permits(1);
    }
}

/// Debounced, lock-mediated work queue with a persistent version map.
///
/// Bursts of changes to one path collapse into the latest task; paths move
/// to the FIFO ready queue once they have been quiet for the debounce
/// delay. Per-path binary semaphores serialize processing of a path across
/// workers.
pub struct ProcessingQueue {
    pending: DashMap<String, PendingChange>,
    ready: Mutex<VecDeque<ProcessingTask>>,
    locks: DashMap<String, Arc<Semaphore>>,
    versions: Arc<VersionMap>,
    debounce_delay: Duration,
}

impl ProcessingQueue {
    pub fn new(versions: Arc<VersionMap>, debounce_delay: Duration) -> Self {
        Self {
            pending: DashMap::new(),
            ready: Mutex::new(VecDeque::new()),
            locks: DashMap::new(),
            versions,
            debounce_delay,
        }
    }

    /// Record a change; a newer change on the same path replaces the older
    /// one and restarts its debounce timer.
    pub fn enqueue_change(&self, task: ProcessingTask) {
        trace!(path = task.relative_path(), "debouncing change");
        self.pending.insert(
            task.relative_path().to_string(),
            PendingChange {
                task,
                ready_at: Instant::now() + self.debounce_delay,
            },
        );
    }

    /// Skip the debounce entirely (version-mismatch re-enqueue).
    pub fn enqueue_direct(&self, task: ProcessingTask) {
        self.ready
            .lock()
            .expect("ready queue poisoned")
            .push_back(task);
    }

    /// Push a failed task back with its retry count bumped.
    pub fn requeue(&self, mut task: ProcessingTask) {
        task.increment_retry();
        self.ready
            .lock()
            .expect("ready queue poisoned")
            .push_back(task);
    }

    pub fn try_dequeue(&self) -> Option<ProcessingTask> {
        self.ready.lock().expect("ready queue poisoned").pop_front()
    }

    /// Move every pending entry whose quiet period has elapsed into the
    /// ready queue. Returns how many moved.
    pub fn pump_pending(&self) -> usize {
        let now = Instant::now();
        let mut due = Vec::new();

        self.pending.retain(|_, change| {
            if change.ready_at <= now {
                due.push(change.task.clone());
                false
            } else {
                true
            }
        });

        let moved = due.len();
        if moved > 0 {
            let mut ready = self.ready.lock().expect("ready queue poisoned");
            for task in due.drain(..) {
                debug!(path = task.relative_path(), "task ready");
                ready.push_back(task);
            }
        }
        moved
    }

    /// Non-blocking per-path lock. The permit returns on guard drop.
    pub fn try_acquire_lock(&self, relative_path: &str) -> Option<PathLockGuard> {
        let semaphore = self
            .locks
            .entry(relative_path.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone();

        match semaphore.clone().try_acquire_owned() {
            Ok(permit) => {
                permit.forget();
                Some(PathLockGuard { semaphore })
            }
            Err(_) => None,
        }
    }

    pub fn get_version(&self, relative_path: &str) -> Option<String> {
        self.versions.get(relative_path)
    }

    pub fn set_version(&self, relative_path: &str, hash: &str) {
        self.versions.set(relative_path, hash);
    }

    pub fn remove_version(&self, relative_path: &str) {
        self.versions.remove(relative_path);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn ready_count(&self) -> usize {
        self.ready.lock().expect("ready queue poisoned").len()
    }

    pub fn has_work(&self) -> bool {
        self.pending_count() > 0 || self.ready_count() > 0
    }

    pub fn persist_versions(&self) -> std::io::Result<()> {
        self.versions.persist()
    }

    /// Background timers: the 100 ms debounce pump and the 30 s version-map
    /// flush. Both stop at cancellation; the final flush happens in
    /// shutdown.
    pub fn spawn_timers(self: &Arc<Self>, cancel: CancellationToken) {
        let queue = self.clone();
        let pump_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = pump_cancel.cancelled() => break,
                    _ = tokio::time::sleep(PUMP_INTERVAL) => {
                        queue.pump_pending();
                    }
                }
            }
        });

        let queue = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(PERSIST_INTERVAL) => {
                        if let Err(e) = queue.persist_versions() {
                            error!(error = %e, "failed to persist version map");
                        }
                    }
                }
            }
        });
    }
}
