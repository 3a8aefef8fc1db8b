//! Cancellable background tasks
//!
//! Timers and polling loops are spawned as [`ScheduledTask`]s. A task is a
//! capability: whoever holds it can cancel it, and dropping it cancels it.
//! [`TaskSlot`] and [`TaskRegistry`] own tasks and guarantee that replacing a
//! task always cancels the previous one first, so there is never more than
//! one live task per slot (or per key).

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;

use tokio::task::AbortHandle;

/// Handle to a spawned task that is aborted on `cancel()` or drop.
#[derive(Debug)]
pub struct ScheduledTask {
    name: &'static str,
    handle: AbortHandle,
}

impl ScheduledTask {
    /// Spawn `future` on the current tokio runtime.
    pub fn spawn<F>(name: &'static str, future: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let handle = tokio::spawn(future).abort_handle();
        tracing::trace!(task = name, "Scheduled task spawned");
        Self { name, handle }
    }

    /// Abort the task. Idempotent.
    pub fn cancel(&self) {
        if !self.handle.is_finished() {
            tracing::trace!(task = self.name, "Scheduled task cancelled");
        }
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ScheduledTask {
    fn drop(&mut self) {
        self.cancel();
    }
}

/// Owns at most one task.
#[derive(Debug, Default)]
pub struct TaskSlot {
    task: Option<ScheduledTask>,
}

impl TaskSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `task`, cancelling whatever was there before.
    pub fn replace(&mut self, task: ScheduledTask) {
        if let Some(previous) = self.task.replace(task) {
            previous.cancel();
        }
    }

    /// Cancel the current task, if any. Returns whether one was installed.
    pub fn cancel(&mut self) -> bool {
        match self.task.take() {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    /// Whether a task is installed and still running.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }
}

/// Owns at most one task per key.
#[derive(Debug)]
pub struct TaskRegistry<K> {
    tasks: HashMap<K, ScheduledTask>,
}

impl<K> Default for TaskRegistry<K> {
    fn default() -> Self {
        Self {
            tasks: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> TaskRegistry<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `task` under `key`, cancelling the previous task for that key.
    pub fn insert(&mut self, key: K, task: ScheduledTask) {
        if let Some(previous) = self.tasks.insert(key, task) {
            previous.cancel();
        }
    }

    /// Cancel the task for `key`. Returns whether one was installed.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.tasks.remove(key) {
            Some(task) => {
                task.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self, key: &K) -> bool {
        self.tasks.get(key).is_some_and(|task| !task.is_finished())
    }

    /// Number of installed tasks that are still running.
    pub fn live_count(&self) -> usize {
        self.tasks.values().filter(|task| !task.is_finished()).count()
    }

    pub fn cancel_all(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.cancel();
        }
    }
}
