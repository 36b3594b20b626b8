use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use swarmcron_core::{RunOutcome, TaskSnapshot, TaskState};
use swarmcron_docker::Orchestrator;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{JobError, Result};

/// Follows a freshly triggered run until one of its new tasks finishes.
pub struct CompletionWaiter {
    orchestrator: Arc<dyn Orchestrator>,
    poll_interval: Duration,
}

impl CompletionWaiter {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, poll_interval: Duration) -> Self {
        Self {
            orchestrator,
            poll_interval,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Poll the task list of `service` until a task absent from `baseline`
    /// completes or fails, `timeout` elapses, or `cancel` fires.
    ///
    /// The first new task to reach a final state decides the outcome; sibling
    /// replicas are not waited for. Failed polls are logged and retried on
    /// the next interval.
    pub async fn wait(
        &self,
        service: &str,
        baseline: &[TaskSnapshot],
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome> {
        let deadline = Instant::now() + timeout;
        let known: HashSet<&str> = baseline.iter().map(|t| t.id.as_str()).collect();
        let mut polls = 0u32;

        loop {
            let polled = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                _ = sleep_until(deadline) => break,
                res = self.orchestrator.tasks(service) => res,
            };
            polls += 1;

            match polled {
                Ok(tasks) => {
                    let finished = tasks
                        .into_iter()
                        .filter(|t| !known.contains(t.id.as_str()))
                        .find(|t| t.state.is_terminal());
                    if let Some(task) = finished {
                        return Ok(self.outcome(service, task).await);
                    }
                }
                Err(e) => warn!(service, error = %e, "task poll failed"),
            }

            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(JobError::Cancelled),
                _ = sleep(self.poll_interval.min(deadline - now)) => {}
            }
        }

        info!(service, ?timeout, polls, "no new task finished before the deadline");
        Ok(RunOutcome::TimedOut)
    }

    async fn outcome(&self, service: &str, task: TaskSnapshot) -> RunOutcome {
        if task.state != TaskState::Complete {
            let reason = task.failure_reason();
            info!(service, task = %task.id, state = %task.state, %reason, "task failed");
            return RunOutcome::Failed { reason };
        }

        debug!(service, task = %task.id, "task complete, fetching logs");
        match self.orchestrator.task_logs(&task.id).await {
            Ok(logs) => RunOutcome::Completed { logs },
            Err(e) => {
                warn!(service, task = %task.id, error = %e, "cannot fetch task logs");
                RunOutcome::Completed {
                    logs: String::new(),
                }
            }
        }
    }
}
