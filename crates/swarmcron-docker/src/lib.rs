//! Orchestrator access for the job engine.
//!
//! [`Orchestrator`] is the interface the engine consumes. [`DockerClient`]
//! implements it against the Docker Engine API of a swarm manager, over its
//! unix socket or TCP.
//! With the `test-support` feature, [`FakeOrchestrator`] provides a scripted
//! in-memory implementation that also records every call.

pub mod client;
pub mod docker;
pub mod error;
pub mod logs;
pub mod models;
mod transport;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use client::{EventMessage, EventStream, Orchestrator, ServiceUpdate};
pub use docker::DockerClient;
pub use error::{OrchestratorError, Result};

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeOrchestrator;
