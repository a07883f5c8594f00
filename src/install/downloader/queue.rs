//! In-flight download tracking
//!
//! The registry maps a resource id to the pipeline currently installing it. It is
//! the only thing that decides whether a resource is "downloading", and it never
//! holds more than one task per id.

use std::{collections::HashMap, time::Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One running installation pipeline
#[derive(Debug)]
pub struct DownloadTask {
    cancellation_token: CancellationToken,
    handle: JoinHandle<()>,
    started_at: Instant,
}

impl DownloadTask {
    /// Safe to call any number of times, also after the pipeline finished
    pub fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// The pipeline task has exited. A registered task that has exited without
    /// removing itself died early (panicked or was aborted).
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: HashMap<String, DownloadTask>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tasks.contains_key(id)
    }

    /// Start a task for `id` unless one is already running.
    ///
    /// `spawn` receives the new task's cancellation token and returns the handle of
    /// the pipeline it started. Both happen while the caller holds the registry, so
    /// the pipeline cannot finish (and remove itself) before it was registered.
    pub fn start_with<F>(&mut self, id: &str, spawn: F) -> bool
    where
        F: FnOnce(CancellationToken) -> JoinHandle<()>,
    {
        if let Some(existing) = self.tasks.get(id) {
            if !existing.is_finished() {
                debug!(id, "Download already in progress");
                return false;
            }
            warn!(id, "Replacing a download task that exited without finishing");
        }

        let token = CancellationToken::new();
        let handle = spawn(token.clone());
        debug!(id, "Registering download task");
        self.tasks.insert(
            id.to_string(),
            DownloadTask {
                cancellation_token: token,
                handle,
                started_at: Instant::now(),
            },
        );
        true
    }

    /// Drop the entry for `id` once its pipeline is done
    pub fn remove(&mut self, id: &str) -> Option<DownloadTask> {
        let task = self.tasks.remove(id)?;
        info!(
            id,
            elapsed_ms = task.started_at.elapsed().as_millis() as u64,
            cancelled = task.is_cancelled(),
            "Download task finished"
        );
        Some(task)
    }

    /// Signal cancellation for `id`. Returns false if nothing is running for it.
    pub fn cancel(&self, id: &str) -> bool {
        match self.tasks.get(id) {
            Some(task) => {
                info!(id, "Cancelling download");
                task.cancel();
                true
            }
            None => {
                debug!(id, "Attempted to cancel a download that is not running");
                false
            }
        }
    }

    pub fn active_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tasks.keys().cloned().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    /// Start a task that runs until cancelled
    fn start_waiting(registry: &mut TaskRegistry, id: &str) -> Option<CancellationToken> {
        let mut started = None;
        registry.start_with(id, |token| {
            started = Some(token.clone());
            tokio::spawn(async move { token.cancelled().await })
        });
        started
    }

    async fn wait_until_finished(task: &DownloadTask) {
        for _ in 0..100 {
            if task.is_finished() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("task did not finish");
    }

    #[tokio::test]
    async fn test_one_task_per_id() {
        let mut registry = TaskRegistry::new();

        let moons = start_waiting(&mut registry, "moons").unwrap();
        assert!(start_waiting(&mut registry, "moons").is_none());
        let rings = start_waiting(&mut registry, "rings").unwrap();
        assert_eq!(registry.active_ids(), vec!["moons", "rings"]);

        // cancelling one id leaves the others alone
        assert!(registry.cancel("moons"));
        assert!(moons.is_cancelled());
        assert!(!rings.is_cancelled());
        rings.cancel();
    }

    #[tokio::test]
    async fn test_remove_and_cancel_absent() {
        let mut registry = TaskRegistry::new();
        let token = start_waiting(&mut registry, "moons").unwrap();

        let task = registry.remove("moons").expect("task should be registered");
        assert!(registry.remove("moons").is_none());
        assert!(!registry.contains("moons"));
        assert!(registry.active_ids().is_empty());

        assert!(!registry.cancel("moons"));
        // late cancellation after completion is harmless
        task.cancel();
        task.cancel();
        assert!(token.is_cancelled());
        wait_until_finished(&task).await;
    }

    #[tokio::test]
    async fn test_exited_task_is_replaced() {
        let mut registry = TaskRegistry::new();
        registry.start_with("moons", |_| tokio::spawn(async {}));
        wait_until_finished(&registry.tasks["moons"]).await;

        // the first pipeline exited without deregistering, so a new one may start
        let token = start_waiting(&mut registry, "moons").expect("stale entry should be replaced");
        assert!(!registry.tasks["moons"].is_finished());
        assert!(start_waiting(&mut registry, "moons").is_none());
        token.cancel();
    }
}
