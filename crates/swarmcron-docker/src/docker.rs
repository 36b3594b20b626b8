use async_trait::async_trait;
use serde::de::DeserializeOwned;
use swarmcron_core::{ServiceInfo, TaskSnapshot};
use tracing::{debug, warn};

use crate::client::{EventStream, Orchestrator, ServiceUpdate};
use crate::error::{OrchestratorError, Result};
use crate::logs::decode_log_stream;
use crate::models::{
    apply_update, filters, ErrorResponse, EventResponse, ServiceResponse, TaskResponse,
};
use crate::transport::{ApiRequest, ApiResponse, Transport};

const EVENT_BUFFER: usize = 256;

/// Docker Engine API client for a swarm manager.
///
/// Reaches the engine through its unix socket (`unix:///var/run/docker.sock`)
/// or over TCP (`tcp://host:2375`, `http://`, `https://`).
#[derive(Clone)]
#[cfg_attr(test, derive(Debug))]
pub struct DockerClient {
    transport: Transport,
    registry_auth: Option<String>,
}

impl DockerClient {
    pub fn new(host: &str, registry_auth: Option<String>) -> Result<Self> {
        Ok(Self {
            transport: Transport::from_host(host)?,
            registry_auth,
        })
    }

    /// Engine address as shown in logs.
    pub fn endpoint(&self) -> String {
        self.transport.endpoint()
    }

    /// `GET /version`: the engine version string.
    pub async fn ping(&self) -> Result<String> {
        #[derive(serde::Deserialize)]
        #[serde(rename_all = "PascalCase")]
        struct Version {
            version: String,
        }
        let v: Version = self
            .get_json(ApiRequest::get("/version"), "engine", "version")
            .await?;
        Ok(v.version)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        req: ApiRequest,
        kind: &'static str,
        name: &str,
    ) -> Result<T> {
        let resp = self.transport.send(req).await?;
        let body = check(resp, kind, name).await?.bytes().await?;
        serde_json::from_slice(&body)
            .map_err(|e| OrchestratorError::Decode(format!("{kind} {name}: {e}")))
    }

    async fn inspect(&self, name: &str) -> Result<ServiceResponse> {
        self.get_json(ApiRequest::get(format!("/services/{name}")), "service", name)
            .await
    }
}

#[async_trait]
impl Orchestrator for DockerClient {
    async fn list_services(&self, label_keys: &[&str]) -> Result<Vec<ServiceInfo>> {
        let req = ApiRequest::get("/services")
            .query(&[("filters", filters(&[("label", label_keys)]))]);
        let services: Vec<ServiceResponse> = self.get_json(req, "services", "*").await?;
        services.iter().map(ServiceResponse::to_service_info).collect()
    }

    async fn service(&self, name: &str) -> Result<ServiceInfo> {
        self.inspect(name).await?.to_service_info()
    }

    async fn tasks(&self, service: &str) -> Result<Vec<TaskSnapshot>> {
        let names: &[&str] = &[service];
        let req = ApiRequest::get("/tasks").query(&[("filters", filters(&[("service", names)]))]);
        let tasks: Vec<TaskResponse> = self.get_json(req, "tasks", service).await?;
        Ok(tasks.into_iter().map(TaskSnapshot::from).collect())
    }

    async fn task_logs(&self, task_id: &str) -> Result<String> {
        let req = ApiRequest::get(format!("/tasks/{task_id}/logs")).query(&[
            ("stdout", "true".to_string()),
            ("stderr", "true".to_string()),
            ("details", "true".to_string()),
        ]);
        let resp = self.transport.send(req).await?;
        let body = check(resp, "task", task_id).await?.bytes().await?;
        Ok(decode_log_stream(&body))
    }

    async fn update_service(&self, service: &str, update: &ServiceUpdate) -> Result<()> {
        let current = self.inspect(service).await?;
        let mut spec = current.spec;
        apply_update(&mut spec, update)?;

        let mut req = ApiRequest::post(format!("/services/{}/update", current.id))
            .query(&[("version", current.version.index.to_string())])
            .json(&spec)?;
        if update.registry_auth {
            match &self.registry_auth {
                Some(auth) => req = req.header("X-Registry-Auth", auth),
                None => warn!(
                    service,
                    "registry auth requested but no docker.registry_auth is configured"
                ),
            }
        }

        let resp = check(self.transport.send(req).await?, "service", service).await?;

        #[derive(serde::Deserialize, Default)]
        #[serde(rename_all = "PascalCase", default)]
        struct UpdateResponse {
            warnings: Option<Vec<String>>,
        }
        let body: UpdateResponse = match resp.bytes().await {
            Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
            Err(_) => UpdateResponse::default(),
        };
        for warning in body.warnings.unwrap_or_default() {
            warn!(service, %warning, "service update warning");
        }
        debug!(service, version = current.version.index, "service updated");
        Ok(())
    }

    fn events(&self) -> EventStream {
        let (msg_tx, err_tx, stream) = EventStream::channel(EVENT_BUFFER);
        let transport = self.transport.clone();
        let req = ApiRequest::get("/events")
            .query(&[("filters", filters(&[("type", &["service"][..])]))]);

        tokio::spawn(async move {
            let resp = match transport.send(req).await {
                Ok(resp) => resp,
                Err(e) => {
                    let _ = err_tx.send(e).await;
                    return;
                }
            };
            let mut resp = match check(resp, "events", "*").await {
                Ok(resp) => resp,
                Err(e) => {
                    let _ = err_tx.send(e).await;
                    return;
                }
            };

            let mut line_buf: Vec<u8> = Vec::new();
            loop {
                let chunk = match resp.chunk().await {
                    Ok(Some(c)) => c,
                    Ok(None) => break,
                    Err(e) => {
                        let _ = err_tx.send(OrchestratorError::Stream(e.to_string())).await;
                        return;
                    }
                };
                line_buf.extend_from_slice(&chunk);

                // The engine writes one JSON document per line.
                while let Some(pos) = line_buf.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = line_buf.drain(..=pos).collect();
                    let line = String::from_utf8_lossy(&line);
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<EventResponse>(line) {
                        Ok(ev) => {
                            if msg_tx.send(ev.into()).await.is_err() {
                                return; // listener gone
                            }
                        }
                        Err(e) => warn!(error = %e, "skipping undecodable event line"),
                    }
                }
            }
            let _ = err_tx
                .send(OrchestratorError::Stream("event stream closed by engine".into()))
                .await;
        });

        stream
    }
}

/// Map non-success responses onto [`OrchestratorError`].
async fn check(resp: ApiResponse, kind: &'static str, name: &str) -> Result<ApiResponse> {
    if resp.is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    if status == 404 {
        return Err(OrchestratorError::NotFound {
            kind,
            name: name.to_string(),
        });
    }
    let text = String::from_utf8_lossy(&resp.bytes().await.unwrap_or_default()).into_owned();
    let message = serde_json::from_str::<ErrorResponse>(&text)
        .map(|e| e.message)
        .unwrap_or(text);
    Err(OrchestratorError::Api { status, message })
}
