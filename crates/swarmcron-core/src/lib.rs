//! Types shared by every swarmcron crate.
//!
//! Holds the job model derived from service labels ([`JobSpec`]), the
//! orchestrator-facing records ([`ServiceInfo`], [`TaskSnapshot`]), the
//! outcome of a waited run ([`RunOutcome`]) and process configuration.

pub mod config;
pub mod duration;
pub mod error;
pub mod labels;
pub mod types;

pub use error::{CoreError, Result};
pub use labels::{parse_labels, LabelError, LabelParse, LABEL_PREFIX};
pub use types::{
    JobSpec, RunOutcome, ServiceEvent, ServiceInfo, ServiceMode, TaskSnapshot, TaskState,
};
