use swarmcron_docker::OrchestratorError;
use swarmcron_scheduler::SchedulerError;
use thiserror::Error;

/// Errors raised by the job engine.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Orchestrator error: {0}")]
    Orchestrator(#[from] OrchestratorError),

    /// The schedule could not be registered.
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// A wait was abandoned through its cancellation token.
    #[error("Wait cancelled")]
    Cancelled,

    /// The cluster event stream broke. Fatal to the listener.
    #[error("Event stream failed: {0}")]
    EventStream(String),
}

pub type Result<T> = std::result::Result<T, JobError>;

/// Why an on-demand run did not produce logs.
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("Job not found for service {0}")]
    NotFound(String),

    #[error("Event trigger is not enabled for service {0}")]
    EventDisabled(String),

    /// Deliberately vague: callers learn nothing about the expected key.
    #[error("Job rejected")]
    KeyMismatch,

    #[error("Job for service {0} is already running")]
    Skipped(String),

    #[error("Job failed: {0}")]
    Failed(String),

    #[error("Job timed out")]
    TimedOut,

    #[error(transparent)]
    Job(#[from] JobError),
}
