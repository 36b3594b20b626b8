use std::sync::Arc;

use swarmcron_core::ServiceEvent;
use swarmcron_docker::{EventMessage, EventStream, Orchestrator};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{JobError, Result};
use crate::reconcile::Reconciler;

/// Decode the actor attributes of a service event.
///
/// `name` is required; the update-state pair is optional.
pub fn decode_event(msg: &EventMessage) -> std::result::Result<ServiceEvent, String> {
    let service = match msg.attributes.get("name") {
        Some(name) if !name.is_empty() => name.clone(),
        _ => return Err(format!("event {} has no service name", msg.action)),
    };
    Ok(ServiceEvent {
        service,
        old_state: msg.attributes.get("updatestate.old").cloned(),
        new_state: msg.attributes.get("updatestate.new").cloned(),
    })
}

/// Feeds every service event of the cluster into the reconciler.
pub struct EventListener {
    orchestrator: Arc<dyn Orchestrator>,
    reconciler: Arc<Reconciler>,
}

impl EventListener {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, reconciler: Arc<Reconciler>) -> Self {
        Self {
            orchestrator,
            reconciler,
        }
    }

    /// Consume the event stream until shutdown.
    ///
    /// Returns `Ok(())` on shutdown. Any stream error, including the stream
    /// ending, returns [`JobError::EventStream`]: events may have been lost,
    /// so the caller must stop rather than resume.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        let EventStream {
            mut messages,
            mut errors,
        } = self.orchestrator.events();
        info!("listening for service events");

        loop {
            tokio::select! {
                err = errors.recv() => {
                    let reason = err.map_or_else(
                        || "error channel closed".to_string(),
                        |e| e.to_string(),
                    );
                    error!(%reason, "event stream failed");
                    return Err(JobError::EventStream(reason));
                }
                msg = messages.recv() => match msg {
                    Some(msg) => self.handle(&msg).await,
                    None => {
                        // The producer reports its error before closing.
                        let reason = errors.try_recv().map_or_else(
                            |_| "event stream closed".to_string(),
                            |e| e.to_string(),
                        );
                        error!(%reason, "event stream failed");
                        return Err(JobError::EventStream(reason));
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("event listener stopped");
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn handle(&self, msg: &EventMessage) {
        let event = match decode_event(msg) {
            Ok(event) => event,
            Err(reason) => {
                warn!(%reason, "cannot decode event");
                return;
            }
        };
        debug!(
            service = %event.service,
            old_state = event.old_state.as_deref().unwrap_or(""),
            new_state = event.new_state.as_deref().unwrap_or(""),
            "service event"
        );

        match self.reconciler.reconcile(&event.service).await {
            Ok(true) => debug!(
                entries = self.reconciler.registry().engine().len(),
                "scheduler entries"
            ),
            Ok(false) => {}
            Err(e) => error!(service = %event.service, error = %e, "cannot manage job"),
        }
    }
}
