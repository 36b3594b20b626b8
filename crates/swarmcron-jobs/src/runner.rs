use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use swarmcron_core::{labels::SCALEDOWN, JobSpec, RunOutcome, ServiceMode, TaskSnapshot};
use swarmcron_docker::{Orchestrator, ServiceUpdate};
use swarmcron_scheduler::Runnable;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{JobError, Result};
use crate::waiter::CompletionWaiter;

type RunLocks = DashMap<String, Arc<Mutex<()>>>;

/// How a run request ended before any waiting started.
#[derive(Debug)]
pub enum RunStart {
    /// The service was updated; `baseline` lists the tasks that existed
    /// before, so the waiter can tell the new ones apart.
    Triggered {
        baseline: Vec<TaskSnapshot>,
        claim: RunClaim,
    },
    /// `skip-running` is set and a previous run is still active.
    Skipped,
}

/// Marks a `skip-running` job's run as in progress until dropped.
///
/// Keep it until the run's outcome is known. Jobs that allow overlap get an
/// empty claim.
pub struct RunClaim {
    service: String,
    locks: Arc<RunLocks>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl RunClaim {
    pub fn is_held(&self) -> bool {
        self.guard.is_some()
    }

    fn release(&mut self) {
        if let Some(guard) = self.guard.take() {
            drop(guard);
            self.locks
                .remove_if(&self.service, |_, lock| Arc::strong_count(lock) == 1);
        }
    }
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for RunClaim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunClaim")
            .field("service", &self.service)
            .field("held", &self.is_held())
            .finish()
    }
}

/// Starts job runs against the orchestrator and scales finished ones down.
pub struct JobRunner {
    orchestrator: Arc<dyn Orchestrator>,
    waiter: CompletionWaiter,
    default_timeout: Duration,
    shutdown: CancellationToken,
    /// One lock per service; starts are serialized on it and `skip-running`
    /// runs hold it until their outcome is known.
    locks: Arc<RunLocks>,
}

impl JobRunner {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        poll_interval: Duration,
        default_timeout: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            waiter: CompletionWaiter::new(Arc::clone(&orchestrator), poll_interval),
            orchestrator,
            default_timeout,
            shutdown,
            locks: Arc::new(DashMap::new()),
        }
    }

    pub fn waiter(&self) -> &CompletionWaiter {
        &self.waiter
    }

    /// Upper bound of every wait started by this runner.
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Start one run of `spec`.
    ///
    /// The current tasks are captured before the service is touched. The
    /// update sets the replica count (replicated services only), forces a
    /// fresh set of tasks and clears the scale-down marker.
    ///
    /// With `skip-running`, a run is skipped while another run of the same
    /// service is claimed here or any of its tasks is still active.
    pub async fn run(&self, spec: &JobSpec) -> Result<RunStart> {
        let service = spec.name.as_str();
        let Some(mut claim) = self.claim(spec).await else {
            info!(service, "previous run still in progress, skipping");
            return Ok(RunStart::Skipped);
        };

        let baseline = self.orchestrator.tasks(service).await?;
        if spec.skip_if_running && baseline.iter().any(|t| t.state.is_active()) {
            info!(service, "previous run still active, skipping");
            return Ok(RunStart::Skipped);
        }

        let info = self.orchestrator.service(service).await?;
        let replicas = match info.mode {
            ServiceMode::Replicated { .. } => Some(spec.replicas),
            _ => None,
        };
        let update = ServiceUpdate {
            replicas,
            force: true,
            labels: BTreeMap::from([(SCALEDOWN.to_string(), "false".to_string())]),
            registry_auth: spec.use_registry_auth,
        };
        self.orchestrator.update_service(service, &update).await?;

        info!(
            service,
            image = info.image.as_deref().unwrap_or("-"),
            replicas = ?replicas,
            "job started"
        );
        if !spec.skip_if_running {
            claim.release();
        }
        Ok(RunStart::Triggered { baseline, claim })
    }

    /// Take the service's run lock. `None` means a `skip-running` job found
    /// it taken.
    async fn claim(&self, spec: &JobSpec) -> Option<RunClaim> {
        let lock = Arc::clone(self.locks.entry(spec.name.clone()).or_default().value());
        let guard = if spec.skip_if_running {
            lock.try_lock_owned().ok()?
        } else {
            lock.lock_owned().await
        };
        Some(RunClaim {
            service: spec.name.clone(),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        })
    }

    /// Calendar firing: start the run and follow it to its outcome.
    ///
    /// Nothing is reported upstream; outcomes and errors only reach the log.
    pub async fn run_scheduled(&self, spec: &JobSpec) {
        let (baseline, claim) = match self.run(spec).await {
            Ok(RunStart::Triggered { baseline, claim }) => (baseline, claim),
            Ok(RunStart::Skipped) => return,
            Err(e) => {
                error!(service = %spec.name, error = %e, "cannot start job");
                return;
            }
        };

        let waited = self
            .waiter
            .wait(&spec.name, &baseline, self.default_timeout, &self.shutdown)
            .await;
        match waited {
            Ok(outcome) => {
                log_outcome(&spec.name, &outcome);
                self.finish(spec).await;
            }
            Err(JobError::Cancelled) => debug!(service = %spec.name, "wait cancelled"),
            Err(e) => warn!(service = %spec.name, error = %e, "wait failed"),
        }
        drop(claim);
    }

    /// Scale a finished run down without holding up the caller. The claim
    /// is released once the scale-down is done.
    pub fn spawn_scale_down(self: &Arc<Self>, spec: Arc<JobSpec>, claim: RunClaim) {
        let runner = Arc::clone(self);
        tokio::spawn(async move {
            runner.finish(&spec).await;
            drop(claim);
        });
    }

    async fn finish(&self, spec: &JobSpec) {
        if let Err(e) = self.scale_down(spec).await {
            warn!(service = %spec.name, error = %e, "scale down failed");
        }
    }

    /// Scale a replicated service back to zero once none of its tasks are
    /// active. Returns whether the service was scaled down.
    ///
    /// The `scaledown=true` label makes the resulting service event a no-op
    /// for the reconciler. Global services are left alone.
    pub async fn scale_down(&self, spec: &JobSpec) -> Result<bool> {
        let service = spec.name.as_str();
        let info = self.orchestrator.service(service).await?;
        match info.mode {
            ServiceMode::Replicated { replicas } if replicas > 0 => {}
            _ => return Ok(false),
        }

        let deadline = Instant::now() + self.default_timeout;
        loop {
            let tasks = self.orchestrator.tasks(service).await?;
            if !tasks.iter().any(|t| t.state.is_active()) {
                break;
            }
            let now = Instant::now();
            if now >= deadline {
                warn!(service, "tasks still active, leaving replicas in place");
                return Ok(false);
            }
            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(JobError::Cancelled),
                _ = sleep(self.waiter.poll_interval().min(deadline - now)) => {}
            }
        }

        let update = ServiceUpdate {
            replicas: Some(0),
            force: false,
            labels: BTreeMap::from([(SCALEDOWN.to_string(), "true".to_string())]),
            registry_auth: false,
        };
        self.orchestrator.update_service(service, &update).await?;
        info!(service, "scaled down");
        Ok(true)
    }
}

fn log_outcome(service: &str, outcome: &RunOutcome) {
    match outcome {
        RunOutcome::Completed { logs } => {
            info!(service, bytes = logs.len(), "job completed")
        }
        _ => warn!(service, %outcome, "job did not complete"),
    }
}

/// Calendar entry for one service's job.
pub struct ScheduledJob {
    spec: Arc<JobSpec>,
    runner: Arc<JobRunner>,
}

impl ScheduledJob {
    pub fn new(spec: Arc<JobSpec>, runner: Arc<JobRunner>) -> Self {
        Self { spec, runner }
    }
}

#[async_trait]
impl Runnable for ScheduledJob {
    fn name(&self) -> &str {
        &self.spec.name
    }

    fn skip_if_running(&self) -> bool {
        self.spec.skip_if_running
    }

    async fn run(&self) {
        self.runner.run_scheduled(&self.spec).await;
    }
}
