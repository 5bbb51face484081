//! Named task tracking for the collector manager
//!
//! Every long-running task the manager spawns is registered here under a
//! name, so shutdown can join them one by one in a fixed order and then make
//! sure nothing was left behind.

use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, warn};

#[derive(Default)]
pub struct TaskSupervisor {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl TaskSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn track(&mut self, name: impl ToString, task: JoinHandle<()>) {
        let name = name.to_string();
        debug!("tracking task '{name}'");
        self.tasks.push((name, task));
    }

    pub fn names(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Wait for the task registered as `name`; `false` if there is none
    pub async fn join(&mut self, name: &str) -> bool {
        let Some(index) = self.tasks.iter().position(|(n, _)| n == name) else {
            return false;
        };
        let (name, task) = self.tasks.remove(index);
        Self::log_outcome(&name, task.await);
        true
    }

    /// Wait for every remaining task, in registration order
    pub async fn join_all(&mut self) {
        // a task stays registered until it has finished
        while let Some((name, task)) = self.tasks.first_mut() {
            let result = task.await;
            Self::log_outcome(name, result);
            self.tasks.remove(0);
        }
    }

    /// `join_all`, aborting whatever has not finished within `grace`
    pub async fn join_all_within(&mut self, grace: Duration) {
        if tokio::time::timeout(grace, self.join_all()).await.is_err() {
            warn!("tasks still running after {grace:?}");
            self.abort_all();
        }
    }

    /// Abort every remaining task without waiting for it to finish cleanly
    pub fn abort_all(&mut self) {
        for (name, task) in self.tasks.drain(..) {
            warn!("aborting task '{name}'");
            task.abort();
        }
    }

    fn log_outcome(name: &str, result: Result<(), JoinError>) {
        match result {
            Ok(()) => debug!("task '{name}' finished"),
            Err(e) if e.is_cancelled() => debug!("task '{name}' was cancelled"),
            Err(e) => error!("task '{name}' panicked: {e}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_join_by_name() {
        let mut supervisor = TaskSupervisor::new();
        supervisor.track("a", tokio::spawn(async {}));
        supervisor.track("b", tokio::spawn(async {}));

        assert!(supervisor.join("b").await);
        assert!(!supervisor.join("b").await);
        assert_eq!(supervisor.names(), vec!["a"]);

        supervisor.join_all().await;
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_task_does_not_poison_join() {
        let mut supervisor = TaskSupervisor::new();
        supervisor.track("boom", tokio::spawn(async { panic!("boom") }));
        supervisor.track("ok", tokio::spawn(async {}));

        supervisor.join_all().await;
        assert_eq!(supervisor.len(), 0);
    }

    #[tokio::test]
    async fn test_join_within_aborts_stuck_tasks() {
        let mut supervisor = TaskSupervisor::new();
        supervisor.track("quick", tokio::spawn(async {}));
        let (_keep, never) = tokio::sync::oneshot::channel::<()>();
        supervisor.track(
            "stuck",
            tokio::spawn(async move {
                let _ = never.await;
            }),
        );

        supervisor.join_all_within(Duration::from_millis(50)).await;
        assert!(supervisor.is_empty());
    }

    #[tokio::test]
    async fn test_abort_all() {
        let mut supervisor = TaskSupervisor::new();
        supervisor.track(
            "forever",
            tokio::spawn(async { tokio::time::sleep(Duration::from_secs(3600)).await }),
        );
        supervisor.abort_all();
        assert!(supervisor.is_empty());
    }
}
