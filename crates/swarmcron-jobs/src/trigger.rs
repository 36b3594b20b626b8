use std::sync::Arc;
use std::time::Duration;

use swarmcron_core::{JobSpec, RunOutcome};
use swarmcron_scheduler::ScheduleRegistry;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::TriggerError;
use crate::runner::{JobRunner, RunStart};

/// On-demand runs for the `/event/{service}/{key}` endpoint.
pub struct TriggerService {
    registry: Arc<ScheduleRegistry>,
    runner: Arc<JobRunner>,
}

impl TriggerService {
    pub fn new(registry: Arc<ScheduleRegistry>, runner: Arc<JobRunner>) -> Self {
        Self { registry, runner }
    }

    /// The job's `event.timeout`, capped by the runner's default.
    pub fn effective_timeout(&self, spec: &JobSpec) -> Duration {
        let default = self.runner.default_timeout();
        spec.event_timeout.map_or(default, |t| t.min(default))
    }

    /// Run `service`'s job now and wait for its outcome.
    ///
    /// The key is checked before anything reaches the orchestrator. On
    /// success the task logs are returned. Once the service has been updated
    /// it is scaled down in the background, even when the wait fails or is
    /// cancelled.
    pub async fn trigger(
        &self,
        service: &str,
        key: &str,
        cancel: &CancellationToken,
    ) -> Result<String, TriggerError> {
        let spec = self.registry.get(service).ok_or_else(|| {
            info!(service, "no job for service");
            TriggerError::NotFound(service.to_string())
        })?;
        if !spec.event_enabled {
            info!(service, "event trigger not enabled");
            return Err(TriggerError::EventDisabled(service.to_string()));
        }
        if spec.event_key != key {
            info!(service, "wrong event key");
            return Err(TriggerError::KeyMismatch);
        }

        let (baseline, claim) = match self.runner.run(&spec).await? {
            RunStart::Triggered { baseline, claim } => (baseline, claim),
            RunStart::Skipped => return Err(TriggerError::Skipped(service.to_string())),
        };

        let timeout = self.effective_timeout(&spec);
        let waited = self
            .runner
            .waiter()
            .wait(service, &baseline, timeout, cancel)
            .await;
        self.runner.spawn_scale_down(Arc::clone(&spec), claim);

        match waited? {
            RunOutcome::Completed { logs } => {
                info!(service, "event job completed");
                Ok(logs)
            }
            RunOutcome::Failed { reason } => Err(TriggerError::Failed(reason)),
            RunOutcome::TimedOut => Err(TriggerError::TimedOut),
        }
    }
}
