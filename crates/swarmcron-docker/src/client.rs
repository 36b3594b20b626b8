use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use swarmcron_core::{ServiceInfo, TaskSnapshot};
use tokio::sync::mpsc;

use crate::error::{OrchestratorError, Result};

/// The narrow slice of the orchestrator API the job engine depends on.
///
/// Implementations must be safe for concurrent use; one instance is shared
/// behind an `Arc` by every job task.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    /// List services carrying every label key in `label_keys`.
    async fn list_services(&self, label_keys: &[&str]) -> Result<Vec<ServiceInfo>>;

    /// Fetch one service by name or ID.
    ///
    /// A service that does not exist yields [`OrchestratorError::NotFound`].
    async fn service(&self, name: &str) -> Result<ServiceInfo>;

    /// Current tasks of a service, in whatever order the orchestrator reports.
    async fn tasks(&self, service: &str) -> Result<Vec<TaskSnapshot>>;

    /// Combined stdout/stderr of one task.
    async fn task_logs(&self, task_id: &str) -> Result<String>;

    /// Apply `update` to the service's current spec.
    async fn update_service(&self, service: &str, update: &ServiceUpdate) -> Result<()>;

    /// Open the cluster event stream, filtered to service events.
    fn events(&self) -> EventStream;
}

/// Changes requested of a service when a job fires or is scaled down.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceUpdate {
    /// New replica count; ignored for non-replicated services.
    pub replicas: Option<u64>,
    /// Bump the task template's force-update counter so fresh tasks start.
    pub force: bool,
    /// Labels to set (existing labels are kept).
    pub labels: BTreeMap<String, String>,
    /// Forward the configured registry credential with the update.
    pub registry_auth: bool,
}

/// One raw cluster event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventMessage {
    /// Object type, e.g. `"service"`.
    pub kind: String,
    /// Action, e.g. `"update"` or `"remove"`.
    pub action: String,
    pub actor_id: String,
    pub attributes: HashMap<String, String>,
}

/// Two inputs of a live event subscription.
///
/// Messages arrive on `messages`; the first error (including end-of-stream)
/// arrives on `errors`, after which no further messages are delivered.
pub struct EventStream {
    pub messages: mpsc::Receiver<EventMessage>,
    pub errors: mpsc::Receiver<OrchestratorError>,
}

impl EventStream {
    /// Create a stream plus the sending halves used by a producer task.
    pub fn channel(
        capacity: usize,
    ) -> (
        mpsc::Sender<EventMessage>,
        mpsc::Sender<OrchestratorError>,
        Self,
    ) {
        let (msg_tx, messages) = mpsc::channel(capacity);
        let (err_tx, errors) = mpsc::channel(1);
        (msg_tx, err_tx, Self { messages, errors })
    }
}
