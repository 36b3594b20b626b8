//! The job lifecycle engine.
//!
//! Cluster events flow through the [`EventListener`] into the
//! [`Reconciler`], which keeps the [`ScheduleRegistry`] in line with each
//! service's labels. Due entries fire a [`ScheduledJob`], which asks the
//! [`JobRunner`] to start a run; the [`CompletionWaiter`] then follows the
//! new task to an outcome. [`TriggerService`] runs a job on demand for the
//! HTTP endpoint.
//!
//! [`ScheduleRegistry`]: swarmcron_scheduler::ScheduleRegistry

pub mod error;
pub mod listener;
pub mod reconcile;
pub mod runner;
pub mod trigger;
pub mod waiter;

pub use error::{JobError, Result, TriggerError};
pub use listener::{decode_event, EventListener};
pub use reconcile::Reconciler;
pub use runner::{JobRunner, RunClaim, RunStart, ScheduledJob};
pub use trigger::TriggerService;
pub use waiter::CompletionWaiter;
