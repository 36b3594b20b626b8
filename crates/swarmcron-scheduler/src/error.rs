use thiserror::Error;

/// Errors that can occur within the scheduler subsystem.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The schedule expression cannot be parsed.
    #[error("Invalid schedule {expr:?}: {reason}")]
    InvalidSchedule { expr: String, reason: String },

    /// The schedule parses but never fires again.
    #[error("Schedule {expr:?} has no upcoming run")]
    Exhausted { expr: String },
}

pub type Result<T> = std::result::Result<T, SchedulerError>;
