use tokio::task::JoinHandle;
use std::collections::HashMap;
use tracing::{info, warn};

/// Task Supervisor - Owns background tasks and stops them on shutdown
///
/// ## Usage
/// ```rust,ignore
/// let mut supervisor = TaskSupervisor::new();
///
/// supervisor.spawn("polling_coordinator", async move {
///     // task logic
/// });
///
/// // Abort everything and wait for it to unwind
/// supervisor.shutdown_all().await;
/// ```
pub struct TaskSupervisor {
    tasks: HashMap<String, JoinHandle<()>>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        TaskSupervisor {
            tasks: HashMap::new(),
        }
    }

    /// Spawn a new background task and register it for supervision.
    /// A task already registered under `name` is aborted first.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F) -> &mut Self
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        if let Some(previous) = self.tasks.remove(&name) {
            warn!("Replacing running task: {}", name);
            previous.abort();
        }

        let handle = tokio::spawn(future);
        info!("Spawned background task: {}", name);
        self.tasks.insert(name, handle);
        self
    }

    pub fn is_running(&self, name: &str) -> bool {
        self.tasks
            .get(name)
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Get count of active tasks
    pub fn active_task_count(&self) -> usize {
        self.tasks.values().filter(|handle| !handle.is_finished()).count()
    }

    /// Abort all tasks and wait until each has unwound.
    pub async fn shutdown_all(&mut self) {
        info!("Shutting down {} background tasks", self.tasks.len());

        for (name, handle) in self.tasks.drain() {
            handle.abort();
            match handle.await {
                Ok(()) => info!("Task {} completed", name),
                Err(e) if e.is_cancelled() => info!("Aborted task: {}", name),
                Err(e) => warn!("Task {} failed: {}", name, e),
            }
        }
    }
}

impl Default for TaskSupervisor {
    fn default() -> Self {
        Self::new()
    }
}
