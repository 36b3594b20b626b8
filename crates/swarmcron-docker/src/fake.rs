//! Scripted in-memory [`Orchestrator`] for tests.
//!
//! Services, task lists and logs are set up front; every call is counted so
//! tests can assert what the engine did (or did not) ask for.

use std::collections::{BTreeMap, HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;
use swarmcron_core::{ServiceInfo, ServiceMode, TaskSnapshot};
use tokio::sync::mpsc;

use crate::client::{EventMessage, EventStream, Orchestrator, ServiceUpdate};
use crate::error::{OrchestratorError, Result};

#[derive(Default)]
struct FakeState {
    services: HashMap<String, ServiceInfo>,
    tasks: HashMap<String, Vec<TaskSnapshot>>,
    /// Per-service task lists handed out one per `tasks()` call; the last
    /// list repeats once the script is exhausted.
    task_scripts: HashMap<String, VecDeque<Vec<TaskSnapshot>>>,
    logs: HashMap<String, String>,
    fail_tasks: bool,
    updates: Vec<(String, ServiceUpdate)>,
    service_calls: usize,
    task_calls: HashMap<String, usize>,
    log_calls: usize,
    event_tx: Option<(mpsc::Sender<EventMessage>, mpsc::Sender<OrchestratorError>)>,
}

#[derive(Default)]
pub struct FakeOrchestrator {
    state: Mutex<FakeState>,
}

impl FakeOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a replicated service with the given labels.
    pub fn add_service(&self, name: &str, labels: &[(&str, &str)]) {
        let info = ServiceInfo {
            id: format!("id-{name}"),
            name: name.to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            mode: ServiceMode::Replicated { replicas: 0 },
            image: Some("alpine:latest".to_string()),
        };
        self.put_service(info);
    }

    pub fn put_service(&self, info: ServiceInfo) {
        self.state.lock().services.insert(info.name.clone(), info);
    }

    pub fn remove_service(&self, name: &str) {
        self.state.lock().services.remove(name);
    }

    pub fn set_label(&self, service: &str, key: &str, value: &str) {
        if let Some(svc) = self.state.lock().services.get_mut(service) {
            svc.labels.insert(key.to_string(), value.to_string());
        }
    }

    pub fn set_tasks(&self, service: &str, tasks: Vec<TaskSnapshot>) {
        self.state.lock().tasks.insert(service.to_string(), tasks);
    }

    /// Script successive `tasks()` results for `service`.
    pub fn script_tasks(&self, service: &str, polls: Vec<Vec<TaskSnapshot>>) {
        self.state
            .lock()
            .task_scripts
            .insert(service.to_string(), polls.into());
    }

    pub fn set_logs(&self, task_id: &str, logs: &str) {
        self.state
            .lock()
            .logs
            .insert(task_id.to_string(), logs.to_string());
    }

    /// Make every `tasks()` call fail with an API error.
    pub fn fail_tasks(&self, fail: bool) {
        self.state.lock().fail_tasks = fail;
    }

    pub fn updates(&self) -> Vec<(String, ServiceUpdate)> {
        self.state.lock().updates.clone()
    }

    pub fn update_calls(&self) -> usize {
        self.state.lock().updates.len()
    }

    pub fn service_calls(&self) -> usize {
        self.state.lock().service_calls
    }

    pub fn task_calls(&self, service: &str) -> usize {
        self.state
            .lock()
            .task_calls
            .get(service)
            .copied()
            .unwrap_or(0)
    }

    pub fn log_calls(&self) -> usize {
        self.state.lock().log_calls
    }

    /// Deliver an event to the open stream. Returns false if none is open.
    pub async fn push_event(&self, msg: EventMessage) -> bool {
        let tx = self.state.lock().event_tx.as_ref().map(|(tx, _)| tx.clone());
        match tx {
            Some(tx) => tx.send(msg).await.is_ok(),
            None => false,
        }
    }

    /// Break the open stream with `err`.
    pub async fn push_stream_error(&self, err: OrchestratorError) -> bool {
        let tx = self.state.lock().event_tx.as_ref().map(|(_, tx)| tx.clone());
        match tx {
            Some(tx) => tx.send(err).await.is_ok(),
            None => false,
        }
    }
}

#[async_trait]
impl Orchestrator for FakeOrchestrator {
    async fn list_services(&self, label_keys: &[&str]) -> Result<Vec<ServiceInfo>> {
        let state = self.state.lock();
        let mut services: Vec<ServiceInfo> = state
            .services
            .values()
            .filter(|svc| label_keys.iter().all(|k| svc.labels.contains_key(*k)))
            .cloned()
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    async fn service(&self, name: &str) -> Result<ServiceInfo> {
        let mut state = self.state.lock();
        state.service_calls += 1;
        state
            .services
            .get(name)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound {
                kind: "service",
                name: name.to_string(),
            })
    }

    async fn tasks(&self, service: &str) -> Result<Vec<TaskSnapshot>> {
        let mut state = self.state.lock();
        *state.task_calls.entry(service.to_string()).or_default() += 1;
        if state.fail_tasks {
            return Err(OrchestratorError::Api {
                status: 500,
                message: "scripted task failure".to_string(),
            });
        }
        if let Some(script) = state.task_scripts.get_mut(service) {
            let next = if script.len() > 1 {
                script.pop_front()
            } else {
                script.front().cloned()
            };
            if let Some(tasks) = next {
                return Ok(tasks);
            }
        }
        Ok(state.tasks.get(service).cloned().unwrap_or_default())
    }

    async fn task_logs(&self, task_id: &str) -> Result<String> {
        let mut state = self.state.lock();
        state.log_calls += 1;
        state
            .logs
            .get(task_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::NotFound {
                kind: "task",
                name: task_id.to_string(),
            })
    }

    async fn update_service(&self, service: &str, update: &ServiceUpdate) -> Result<()> {
        let mut state = self.state.lock();
        let svc = state
            .services
            .get_mut(service)
            .ok_or_else(|| OrchestratorError::NotFound {
                kind: "service",
                name: service.to_string(),
            })?;
        if let (Some(n), ServiceMode::Replicated { replicas }) = (update.replicas, &mut svc.mode) {
            *replicas = n;
        }
        let labels: &mut BTreeMap<String, String> = &mut svc.labels;
        labels.extend(update.labels.clone());
        state.updates.push((service.to_string(), update.clone()));
        Ok(())
    }

    fn events(&self) -> EventStream {
        let (msg_tx, err_tx, stream) = EventStream::channel(64);
        self.state.lock().event_tx = Some((msg_tx, err_tx));
        stream
    }
}
