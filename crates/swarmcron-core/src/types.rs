use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Job definition derived from a service's `swarm.cronjob.*` labels.
///
/// Built once per reconcile and never mutated afterwards: a label change
/// produces a fresh `JobSpec` that replaces the previous one wholesale.
#[derive(Clone, PartialEq, Eq, Serialize)]
pub struct JobSpec {
    /// Orchestrator service name the job drives.
    pub name: String,
    pub enabled: bool,
    /// Raw schedule expression; validated when registered with the scheduler.
    pub schedule: String,
    pub skip_if_running: bool,
    /// Replica count requested when the job fires. Always `>= 1`.
    pub replicas: u64,
    pub event_enabled: bool,
    #[serde(skip_serializing)]
    pub event_key: String,
    /// `event.timeout` label exactly as written.
    pub event_timeout_raw: Option<String>,
    /// Parsed `event.timeout`; `None` when absent or unparseable.
    pub event_timeout: Option<Duration>,
    pub use_registry_auth: bool,
}

impl JobSpec {
    /// Defaults applied before any label is read.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: false,
            schedule: String::new(),
            skip_if_running: false,
            replicas: 1,
            event_enabled: false,
            event_key: String::new(),
            event_timeout_raw: None,
            event_timeout: None,
            use_registry_auth: false,
        }
    }
}

// The event key is a shared secret; keep it out of debug logs.
impl fmt::Debug for JobSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobSpec")
            .field("name", &self.name)
            .field("enabled", &self.enabled)
            .field("schedule", &self.schedule)
            .field("skip_if_running", &self.skip_if_running)
            .field("replicas", &self.replicas)
            .field("event_enabled", &self.event_enabled)
            .field("event_key", &"<redacted>")
            .field("event_timeout", &self.event_timeout)
            .field("use_registry_auth", &self.use_registry_auth)
            .finish()
    }
}

/// Scheduling mode of an orchestrator service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMode {
    Replicated { replicas: u64 },
    Global,
    /// Any other mode (replicated/global jobs); swarmcron leaves it untouched.
    Other(String),
}

/// The subset of a service description the job engine consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceInfo {
    pub id: String,
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub mode: ServiceMode,
    pub image: Option<String>,
}

/// Lifecycle state of a single task, as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    New,
    Allocated,
    Pending,
    Assigned,
    Accepted,
    Preparing,
    Ready,
    Starting,
    Running,
    Complete,
    Shutdown,
    Failed,
    Rejected,
    Remove,
    Orphaned,
    Unknown(String),
}

impl TaskState {
    /// True while the task has not yet reached any final state.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskState::New
                | TaskState::Allocated
                | TaskState::Pending
                | TaskState::Assigned
                | TaskState::Accepted
                | TaskState::Preparing
                | TaskState::Ready
                | TaskState::Starting
                | TaskState::Running
        )
    }

    /// Final states that end a waited run as a failure.
    pub fn is_failure(&self) -> bool {
        matches!(self, TaskState::Failed | TaskState::Rejected)
    }

    pub fn is_terminal(&self) -> bool {
        *self == TaskState::Complete || self.is_failure()
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::New => "new",
            TaskState::Allocated => "allocated",
            TaskState::Pending => "pending",
            TaskState::Assigned => "assigned",
            TaskState::Accepted => "accepted",
            TaskState::Preparing => "preparing",
            TaskState::Ready => "ready",
            TaskState::Starting => "starting",
            TaskState::Running => "running",
            TaskState::Complete => "complete",
            TaskState::Shutdown => "shutdown",
            TaskState::Failed => "failed",
            TaskState::Rejected => "rejected",
            TaskState::Remove => "remove",
            TaskState::Orphaned => "orphaned",
            TaskState::Unknown(other) => other,
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s {
            "new" => TaskState::New,
            "allocated" => TaskState::Allocated,
            "pending" => TaskState::Pending,
            "assigned" => TaskState::Assigned,
            "accepted" => TaskState::Accepted,
            "preparing" => TaskState::Preparing,
            "ready" => TaskState::Ready,
            "starting" => TaskState::Starting,
            "running" => TaskState::Running,
            "complete" => TaskState::Complete,
            "shutdown" => TaskState::Shutdown,
            "failed" => TaskState::Failed,
            "rejected" => TaskState::Rejected,
            "remove" => TaskState::Remove,
            "orphaned" => TaskState::Orphaned,
            other => TaskState::Unknown(other.to_string()),
        })
    }
}

/// Point-in-time view of one task of a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskSnapshot {
    pub id: String,
    pub state: TaskState,
    /// Human-readable status line (e.g. "started").
    pub message: String,
    /// Error reported by the orchestrator, if any.
    pub error: Option<String>,
}

impl TaskSnapshot {
    pub fn new(id: impl Into<String>, state: TaskState) -> Self {
        Self {
            id: id.into(),
            state,
            message: String::new(),
            error: None,
        }
    }

    /// Best available explanation for a failed task.
    pub fn failure_reason(&self) -> String {
        match &self.error {
            Some(err) if !err.is_empty() => err.clone(),
            _ if !self.message.is_empty() => self.message.clone(),
            _ => format!("task {} {}", self.id, self.state),
        }
    }
}

/// Terminal result of waiting on one triggered execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Completed { logs: String },
    Failed { reason: String },
    TimedOut,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunOutcome::Completed { .. } => write!(f, "completed"),
            RunOutcome::Failed { reason } => write!(f, "failed: {reason}"),
            RunOutcome::TimedOut => write!(f, "timed out"),
        }
    }
}

/// Decoded service event: the service it concerns and its update-state
/// transition, when the orchestrator reported one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub service: String,
    pub old_state: Option<String>,
    pub new_state: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_round_trips_docker_names() {
        for name in ["new", "pending", "running", "complete", "failed", "rejected"] {
            let state: TaskState = name.parse().unwrap();
            assert_eq!(state.to_string(), name);
        }
        let odd: TaskState = "paused".parse().unwrap();
        assert_eq!(odd, TaskState::Unknown("paused".to_string()));
    }

    #[test]
    fn terminal_classification() {
        assert!(TaskState::Complete.is_terminal());
        assert!(TaskState::Failed.is_failure());
        assert!(TaskState::Rejected.is_failure());
        assert!(TaskState::Running.is_active());
        assert!(!TaskState::Shutdown.is_active());
        assert!(!TaskState::Shutdown.is_terminal());
    }

    #[test]
    fn failure_reason_prefers_error_text() {
        let mut task = TaskSnapshot::new("t1", TaskState::Failed);
        assert_eq!(task.failure_reason(), "task t1 failed");
        task.message = "started".to_string();
        assert_eq!(task.failure_reason(), "started");
        task.error = Some("task: non-zero exit (1)".to_string());
        assert_eq!(task.failure_reason(), "task: non-zero exit (1)");
    }

    #[test]
    fn debug_output_hides_event_key() {
        let mut spec = JobSpec::new("backup");
        spec.event_key = "s3cret".to_string();
        let dbg = format!("{spec:?}");
        assert!(!dbg.contains("s3cret"));
        assert!(dbg.contains("backup"));
    }
}
