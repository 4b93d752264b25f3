//! Supervised background tasks.
//!
//! Every detached task the shim starts (stream copies, process waits,
//! reconciliation, sandbox watchers) is spawned into a `TaskSet` owned by
//! the entity that started it, so teardown can join or abort them.

use parking_lot::Mutex;
use std::future::Future;
use tokio::task::JoinSet;

pub struct TaskSet {
    name: &'static str,
    set: Mutex<JoinSet<()>>,
}

impl TaskSet {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            set: Mutex::new(JoinSet::new()),
        }
    }

    /// Spawn a task onto the current runtime and track it.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.set.lock().spawn(task);
    }

    /// Number of tracked tasks, finished or not, since the last join.
    pub fn len(&self) -> usize {
        self.set.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every tracked task to finish.
    ///
    /// Tasks spawned while joining are left in the set for the next join.
    pub async fn join(&self) {
        let mut set = std::mem::take(&mut *self.set.lock());
        while let Some(result) = set.join_next().await {
            if let Err(e) = result
                && e.is_panic()
            {
                tracing::error!(tasks = self.name, error = %e, "supervised task panicked");
            }
        }
    }

    /// Abort every tracked task. Aborted tasks are reaped on the next join.
    pub fn abort(&self) {
        self.set.lock().abort_all();
    }
}

impl std::fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskSet")
            .field("name", &self.name)
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn join_waits_for_all_tasks() {
        let tasks = TaskSet::new("test");
        let done = Arc::new(AtomicUsize::new(0));

        for delay in [5u64, 10, 15] {
            let done = done.clone();
            tasks.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                done.fetch_add(1, Ordering::SeqCst);
            });
        }
        assert_eq!(tasks.len(), 3);

        tasks.join().await;
        assert_eq!(done.load(Ordering::SeqCst), 3);
        assert!(tasks.is_empty());
    }

    #[tokio::test]
    async fn abort_stops_pending_tasks() {
        let tasks = TaskSet::new("test");
        tasks.spawn(std::future::pending());

        tasks.abort();
        tokio::time::timeout(Duration::from_secs(1), tasks.join())
            .await
            .expect("aborted task must be reaped");
    }
}
