use std::sync::Arc;

use dashmap::DashMap;
use swarmcron_core::{
    labels::{ENABLE, SCHEDULE},
    parse_labels,
};
use swarmcron_docker::Orchestrator;
use swarmcron_scheduler::ScheduleRegistry;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::Result;
use crate::runner::{JobRunner, ScheduledJob};

/// Drives the schedule registry to match each service's current labels.
pub struct Reconciler {
    orchestrator: Arc<dyn Orchestrator>,
    registry: Arc<ScheduleRegistry>,
    runner: Arc<JobRunner>,
    /// One lock per service being reconciled; entries are dropped when idle.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl Reconciler {
    pub fn new(
        orchestrator: Arc<dyn Orchestrator>,
        registry: Arc<ScheduleRegistry>,
        runner: Arc<JobRunner>,
    ) -> Self {
        Self {
            orchestrator,
            registry,
            runner,
            locks: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<ScheduleRegistry> {
        &self.registry
    }

    /// Bring `service`'s schedule entry in line with its labels.
    ///
    /// Returns whether the registry changed. An enabled service is always
    /// re-registered, even when its labels did not change. Calls for the
    /// same service are serialized; different services proceed in parallel.
    pub async fn reconcile(&self, service: &str) -> Result<bool> {
        let lock = Arc::clone(self.locks.entry(service.to_string()).or_default().value());
        let changed = {
            let _guard = lock.lock().await;
            self.reconcile_locked(service).await
        };
        drop(lock);
        self.locks.remove_if(service, |_, l| Arc::strong_count(l) == 1);
        changed
    }

    async fn reconcile_locked(&self, service: &str) -> Result<bool> {
        let existed = self.registry.contains(service);

        let info = match self.orchestrator.service(service).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => {
                if self.registry.remove(service) {
                    info!(service, "service removed, job dropped");
                    return Ok(true);
                }
                debug!(service, "service does not exist");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let parsed = parse_labels(service, &info.labels);
        if parsed.scale_down {
            debug!(service, "scale down in progress, skipping");
            return Ok(false);
        }

        let spec = Arc::new(parsed.spec);
        if !spec.enabled {
            if self.registry.remove(service) {
                info!(service, "job disabled");
                return Ok(true);
            }
            debug!(service, "job not enabled");
            return Ok(false);
        }

        let job = Arc::new(ScheduledJob::new(Arc::clone(&spec), Arc::clone(&self.runner)));
        let schedule = spec.schedule.clone();
        self.registry.add(spec, job)?;
        if existed {
            debug!(service, %schedule, "job updated");
        } else {
            info!(service, %schedule, "job added");
        }
        Ok(true)
    }

    /// Reconcile every service carrying both the enable and schedule labels.
    ///
    /// Per-service failures are logged and skipped. Returns the number of
    /// services now scheduled.
    pub async fn reconcile_all(&self) -> Result<usize> {
        let services = self.orchestrator.list_services(&[ENABLE, SCHEDULE]).await?;
        debug!(count = services.len(), "labelled services found");

        for svc in &services {
            if let Err(e) = self.reconcile(&svc.name).await {
                error!(service = %svc.name, error = %e, "cannot manage job");
            }
        }
        Ok(self.registry.len())
    }
}
