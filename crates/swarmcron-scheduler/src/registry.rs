use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use swarmcron_core::JobSpec;
use tracing::debug;

use crate::{engine::Runnable, error::Result, types::EntryId, SchedulerEngine};

struct RegisteredJob {
    entry: EntryId,
    spec: Arc<JobSpec>,
}

/// Maps service names to live engine entries.
///
/// A service is present iff it currently has an enabled, validly scheduled
/// job. Every mutation takes the registry lock first and the engine lock
/// second, so a reader never observes an entry without its engine handle.
pub struct ScheduleRegistry {
    engine: Arc<SchedulerEngine>,
    jobs: Mutex<HashMap<String, RegisteredJob>>,
}

impl ScheduleRegistry {
    pub fn new(engine: Arc<SchedulerEngine>) -> Self {
        Self {
            engine,
            jobs: Mutex::new(HashMap::new()),
        }
    }

    pub fn engine(&self) -> &Arc<SchedulerEngine> {
        &self.engine
    }

    /// Schedule `job` for `spec.name`, replacing any entry the service
    /// already had. The old entry is removed before the new one is created;
    /// when creation fails the service is left unscheduled.
    pub fn add(&self, spec: Arc<JobSpec>, job: Arc<dyn Runnable>) -> Result<EntryId> {
        let mut jobs = self.jobs.lock();
        if let Some(old) = jobs.remove(&spec.name) {
            self.engine.remove(old.entry);
            debug!(service = %spec.name, entry = old.entry, "replacing schedule entry");
        }

        let entry = self.engine.add(&spec.schedule, job)?;
        debug!(service = %spec.name, entry, schedule = %spec.schedule, "schedule entry created");
        jobs.insert(spec.name.clone(), RegisteredJob { entry, spec });
        Ok(entry)
    }

    /// Drop the service's entry. Returns whether one existed.
    pub fn remove(&self, service: &str) -> bool {
        let mut jobs = self.jobs.lock();
        match jobs.remove(service) {
            Some(old) => {
                self.engine.remove(old.entry);
                debug!(service, entry = old.entry, "schedule entry removed");
                true
            }
            None => false,
        }
    }

    /// Spec of the currently scheduled job, if any.
    pub fn get(&self, service: &str) -> Option<Arc<JobSpec>> {
        self.jobs.lock().get(service).map(|j| Arc::clone(&j.spec))
    }

    pub fn entry(&self, service: &str) -> Option<EntryId> {
        self.jobs.lock().get(service).map(|j| j.entry)
    }

    pub fn contains(&self, service: &str) -> bool {
        self.jobs.lock().contains_key(service)
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.lock().is_empty()
    }

    /// Scheduled service names, sorted.
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.jobs.lock().keys().cloned().collect();
        names.sort();
        names
    }
}
