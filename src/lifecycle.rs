//! Start/stop/join for the top-level tasks of a process.
//!
//! Whoever composes a server and its clients owns a `Lifecycle`. Tasks
//! spawned through it are joined by `join`; long-running tasks watch the
//! `Shutdown` handle and return once `stop` is called. Per-connection
//! handler tasks are not tracked here.

use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Receiving side of the stop signal.
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    /// Resolve once `Lifecycle::stop` has been called or the lifecycle is gone.
    pub async fn wait(&mut self) {
        let _ = self.rx.wait_for(|stopped| *stopped).await;
    }
}

/// Outcome of `Lifecycle::join`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct JoinSummary {
    pub finished: usize,
    pub failed: usize,
}

/// Owner of a group of top-level tasks.
pub struct Lifecycle {
    tasks: JoinSet<(&'static str, Result<(), BoxError>)>,
    stop: watch::Sender<bool>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        let (stop, _) = watch::channel(false);
        Self {
            tasks: JoinSet::new(),
            stop,
        }
    }

    /// Handle for tasks that should end when `stop` is called.
    pub fn shutdown(&self) -> Shutdown {
        Shutdown {
            rx: self.stop.subscribe(),
        }
    }

    /// Start a named top-level task.
    pub fn spawn<F>(&mut self, name: &'static str, task: F)
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        debug!(task = name, "Starting task");
        self.tasks.spawn(async move { (name, task.await) });
    }

    /// Signal every `Shutdown` handle.
    pub fn stop(&self) {
        self.stop.send_replace(true);
    }

    /// Wait for every spawned task to finish.
    pub async fn join(&mut self) -> JoinSummary {
        let mut summary = JoinSummary::default();

        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((name, Ok(()))) => {
                    debug!(task = name, "Task finished");
                    summary.finished += 1;
                }
                Ok((name, Err(e))) => {
                    error!(task = name, error = %e, "Task failed");
                    summary.failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Task panicked or was cancelled");
                    summary.failed += 1;
                }
            }
        }

        summary
    }
}
