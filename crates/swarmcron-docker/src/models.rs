//! Docker Engine API payloads and their mapping onto swarmcron types.
//!
//! Service specs are kept as raw JSON for updates: the engine expects the
//! whole spec back, and round-tripping through a partial struct would drop
//! every field swarmcron does not model.

use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;
use serde_json::Value;
use swarmcron_core::{ServiceInfo, ServiceMode, TaskSnapshot, TaskState};

use crate::client::{EventMessage, ServiceUpdate};
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceResponse {
    #[serde(rename = "ID")]
    pub id: String,
    pub version: ObjectVersion,
    pub spec: Value,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ObjectVersion {
    pub index: u64,
}

/// Typed view over the parts of a service spec swarmcron reads.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct SpecView {
    name: String,
    labels: Option<BTreeMap<String, String>>,
    mode: Option<HashMap<String, Value>>,
    task_template: Option<TaskTemplateView>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct TaskTemplateView {
    container_spec: Option<ContainerSpecView>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ContainerSpecView {
    image: Option<String>,
}

impl ServiceResponse {
    pub fn to_service_info(&self) -> Result<ServiceInfo> {
        let view: SpecView = serde_json::from_value(self.spec.clone())
            .map_err(|e| OrchestratorError::Decode(format!("service spec: {e}")))?;

        let mode = match view.mode {
            None => ServiceMode::Replicated { replicas: 1 },
            Some(mode) => {
                if let Some(replicated) = mode.get("Replicated") {
                    let replicas = replicated
                        .get("Replicas")
                        .and_then(Value::as_u64)
                        .unwrap_or(0);
                    ServiceMode::Replicated { replicas }
                } else if mode.contains_key("Global") {
                    ServiceMode::Global
                } else {
                    let name = mode.keys().next().cloned().unwrap_or_default();
                    ServiceMode::Other(name)
                }
            }
        };

        Ok(ServiceInfo {
            id: self.id.clone(),
            name: view.name,
            labels: view.labels.unwrap_or_default(),
            mode,
            image: view
                .task_template
                .and_then(|t| t.container_spec)
                .and_then(|c| c.image),
        })
    }
}

/// Apply a [`ServiceUpdate`] to a raw service spec in place.
pub fn apply_update(spec: &mut Value, update: &ServiceUpdate) -> Result<()> {
    let root = spec
        .as_object_mut()
        .ok_or_else(|| OrchestratorError::Decode("service spec is not an object".into()))?;

    if let Some(replicas) = update.replicas {
        if let Some(replicated) = root
            .get_mut("Mode")
            .and_then(|m| m.get_mut("Replicated"))
            .and_then(Value::as_object_mut)
        {
            replicated.insert("Replicas".to_string(), Value::from(replicas));
        }
    }

    if update.force {
        let template = root
            .entry("TaskTemplate")
            .or_insert_with(|| Value::Object(Default::default()));
        let template = template
            .as_object_mut()
            .ok_or_else(|| OrchestratorError::Decode("TaskTemplate is not an object".into()))?;
        let current = template
            .get("ForceUpdate")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        template.insert("ForceUpdate".to_string(), Value::from(current + 1));
    }

    if !update.labels.is_empty() {
        let labels = root
            .entry("Labels")
            .or_insert_with(|| Value::Object(Default::default()));
        if labels.is_null() {
            *labels = Value::Object(Default::default());
        }
        let labels = labels
            .as_object_mut()
            .ok_or_else(|| OrchestratorError::Decode("Labels is not an object".into()))?;
        for (k, v) in &update.labels {
            labels.insert(k.clone(), Value::String(v.clone()));
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskResponse {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(default)]
    pub status: TaskStatus,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct TaskStatus {
    pub state: String,
    pub message: String,
    pub err: Option<String>,
}

impl From<TaskResponse> for TaskSnapshot {
    fn from(task: TaskResponse) -> Self {
        let state = task
            .status
            .state
            .parse::<TaskState>()
            .unwrap_or(TaskState::Unknown(task.status.state.clone()));
        TaskSnapshot {
            id: task.id,
            state,
            message: task.status.message,
            error: task.status.err.filter(|e| !e.is_empty()),
        }
    }
}

/// One line of `GET /events`.
#[derive(Debug, Clone, Deserialize)]
pub struct EventResponse {
    #[serde(rename = "Type", default)]
    pub kind: String,
    #[serde(rename = "Action", default)]
    pub action: String,
    #[serde(rename = "Actor", default)]
    pub actor: EventActor,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct EventActor {
    #[serde(rename = "ID")]
    pub id: String,
    pub attributes: HashMap<String, String>,
}

impl From<EventResponse> for EventMessage {
    fn from(ev: EventResponse) -> Self {
        EventMessage {
            kind: ev.kind,
            action: ev.action,
            actor_id: ev.actor.id,
            attributes: ev.actor.attributes,
        }
    }
}

/// Error body returned by the engine on non-2xx responses.
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}

/// `filters=` query value: a JSON object mapping filter name → values.
pub fn filters(pairs: &[(&str, &[&str])]) -> String {
    let map: BTreeMap<&str, &[&str]> = pairs.iter().copied().collect();
    serde_json::to_string(&map).unwrap_or_else(|_| "{}".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(spec: Value) -> ServiceResponse {
        serde_json::from_value(json!({
            "ID": "abc123",
            "Version": { "Index": 42 },
            "Spec": spec,
        }))
        .unwrap()
    }

    #[test]
    fn replicated_service_info() {
        let svc = service(json!({
            "Name": "backup",
            "Labels": { "swarm.cronjob.enable": "true" },
            "Mode": { "Replicated": { "Replicas": 0 } },
            "TaskTemplate": { "ContainerSpec": { "Image": "alpine:3.20" } }
        }));
        let info = svc.to_service_info().unwrap();
        assert_eq!(info.id, "abc123");
        assert_eq!(info.name, "backup");
        assert_eq!(info.mode, ServiceMode::Replicated { replicas: 0 });
        assert_eq!(info.image.as_deref(), Some("alpine:3.20"));
        assert_eq!(info.labels["swarm.cronjob.enable"], "true");
        assert_eq!(svc.version.index, 42);
    }

    #[test]
    fn global_and_job_modes() {
        let global = service(json!({ "Name": "g", "Mode": { "Global": {} } }));
        assert_eq!(global.to_service_info().unwrap().mode, ServiceMode::Global);

        let job = service(json!({ "Name": "j", "Mode": { "ReplicatedJob": {} } }));
        assert_eq!(
            job.to_service_info().unwrap().mode,
            ServiceMode::Other("ReplicatedJob".to_string())
        );
    }

    #[test]
    fn null_labels_are_empty() {
        let svc = service(json!({ "Name": "x", "Labels": null }));
        assert!(svc.to_service_info().unwrap().labels.is_empty());
    }

    #[test]
    fn update_scales_forces_and_labels() {
        let mut spec = json!({
            "Name": "backup",
            "Labels": { "keep": "me" },
            "Mode": { "Replicated": { "Replicas": 0 } },
            "TaskTemplate": { "ForceUpdate": 4, "ContainerSpec": { "Image": "alpine" } }
        });
        let update = ServiceUpdate {
            replicas: Some(2),
            force: true,
            labels: [("swarm.cronjob.scaledown".to_string(), "false".to_string())].into(),
            registry_auth: false,
        };
        apply_update(&mut spec, &update).unwrap();

        assert_eq!(spec["Mode"]["Replicated"]["Replicas"], 2);
        assert_eq!(spec["TaskTemplate"]["ForceUpdate"], 5);
        assert_eq!(spec["TaskTemplate"]["ContainerSpec"]["Image"], "alpine");
        assert_eq!(spec["Labels"]["keep"], "me");
        assert_eq!(spec["Labels"]["swarm.cronjob.scaledown"], "false");
    }

    #[test]
    fn update_leaves_global_mode_alone() {
        let mut spec = json!({ "Name": "g", "Mode": { "Global": {} }, "Labels": null });
        let update = ServiceUpdate {
            replicas: Some(3),
            force: true,
            ..Default::default()
        };
        apply_update(&mut spec, &update).unwrap();
        assert_eq!(spec["Mode"], json!({ "Global": {} }));
        assert_eq!(spec["TaskTemplate"]["ForceUpdate"], 1);
        assert!(spec["Labels"].is_null());
    }

    #[test]
    fn task_status_mapping() {
        let task: TaskResponse = serde_json::from_value(json!({
            "ID": "t1",
            "Status": { "State": "failed", "Message": "started", "Err": "task: non-zero exit (2)" }
        }))
        .unwrap();
        let snap = TaskSnapshot::from(task);
        assert_eq!(snap.state, TaskState::Failed);
        assert_eq!(snap.error.as_deref(), Some("task: non-zero exit (2)"));
    }

    #[test]
    fn event_line_decodes() {
        let ev: EventResponse = serde_json::from_str(
            r#"{"Type":"service","Action":"update","Actor":{"ID":"s1","Attributes":{"name":"backup","updatestate.new":"updating"}},"time":1700000000}"#,
        )
        .unwrap();
        let msg = EventMessage::from(ev);
        assert_eq!(msg.kind, "service");
        assert_eq!(msg.attributes["name"], "backup");
    }

    #[test]
    fn filters_encode_as_json() {
        let keys: &[&str] = &["a", "b"];
        assert_eq!(filters(&[("label", keys)]), r#"{"label":["a","b"]}"#);
    }
}
