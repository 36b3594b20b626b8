//! Byte-level access to the Engine API over TCP or a unix socket.
//!
//! reqwest serves `http://` endpoints. A unix socket is spoken to through
//! hyper directly, one HTTP/1.1 connection per request.

use hyper::body::Bytes;
use serde::Serialize;

use crate::error::{OrchestratorError, Result};

/// Engine API version every request is pinned to (Docker 20.10+).
pub(crate) const API_VERSION: &str = "v1.41";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verb {
    Get,
    Post,
}

/// One Engine API call, relative to the versioned API root.
#[derive(Debug)]
pub(crate) struct ApiRequest {
    verb: Verb,
    path: String,
    query: Vec<(String, String)>,
    headers: Vec<(&'static str, String)>,
    json: Option<Vec<u8>>,
}

impl ApiRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Verb::Get, path.into())
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Verb::Post, path.into())
    }

    fn new(verb: Verb, path: String) -> Self {
        Self {
            verb,
            path,
            query: Vec::new(),
            headers: Vec::new(),
            json: None,
        }
    }

    pub fn query(mut self, pairs: &[(&str, String)]) -> Self {
        self.query
            .extend(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())));
        self
    }

    pub fn header(mut self, name: &'static str, value: &str) -> Self {
        self.headers.push((name, value.to_string()));
        self
    }

    pub fn json<T: Serialize>(mut self, body: &T) -> Result<Self> {
        let bytes =
            serde_json::to_vec(body).map_err(|e| OrchestratorError::Decode(e.to_string()))?;
        self.json = Some(bytes);
        Ok(self)
    }

    /// Versioned path plus encoded query, e.g. `/v1.41/tasks?filters=...`.
    pub fn target(&self) -> Result<String> {
        let mut url = reqwest::Url::parse("http://docker")
            .map_err(|e| OrchestratorError::InvalidHost(e.to_string()))?;
        url.set_path(&format!("/{API_VERSION}{}", self.path));
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_string(),
        })
    }
}

/// Status plus a body that is read chunk by chunk.
pub(crate) struct ApiResponse {
    status: u16,
    body: ResponseBody,
}

enum ResponseBody {
    Http(reqwest::Response),
    #[cfg(unix)]
    Socket(hyper::body::Incoming),
}

impl ApiResponse {
    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Next piece of the body; `None` once it is complete.
    pub async fn chunk(&mut self) -> Result<Option<Bytes>> {
        match &mut self.body {
            ResponseBody::Http(resp) => Ok(resp.chunk().await?),
            #[cfg(unix)]
            ResponseBody::Socket(body) => {
                use http_body_util::BodyExt;

                while let Some(frame) = body.frame().await {
                    let frame = frame.map_err(socket_err)?;
                    // Trailers carry no payload.
                    if let Ok(data) = frame.into_data() {
                        return Ok(Some(data));
                    }
                }
                Ok(None)
            }
        }
    }

    /// The whole body.
    pub async fn bytes(mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.chunk().await? {
            buf.extend_from_slice(&chunk);
        }
        Ok(buf)
    }
}

/// Where the engine listens.
#[derive(Clone)]
#[cfg_attr(test, derive(Debug))]
pub(crate) enum Transport {
    Http {
        client: reqwest::Client,
        base_url: String,
    },
    #[cfg(unix)]
    Unix { path: std::path::PathBuf },
}

impl Transport {
    /// Accept `unix://`, `tcp://`, `http://` and `https://` hosts. A bare
    /// `host:port` is taken as plain HTTP.
    pub fn from_host(host: &str) -> Result<Self> {
        let host = host.trim();
        if let Some(path) = host.strip_prefix("unix://") {
            return unix_transport(host, path);
        }

        let host = host.trim_end_matches('/');
        let base_url = if let Some(rest) = host.strip_prefix("tcp://") {
            format!("http://{rest}")
        } else if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else if host.is_empty() || host.contains("://") {
            return Err(OrchestratorError::InvalidHost(host.to_string()));
        } else {
            format!("http://{host}")
        };
        Ok(Transport::Http {
            client: reqwest::Client::new(),
            base_url,
        })
    }

    /// Endpoint as shown in logs.
    pub fn endpoint(&self) -> String {
        match self {
            Transport::Http { base_url, .. } => base_url.clone(),
            #[cfg(unix)]
            Transport::Unix { path } => format!("unix://{}", path.display()),
        }
    }

    pub async fn send(&self, req: ApiRequest) -> Result<ApiResponse> {
        let target = req.target()?;
        match self {
            Transport::Http { client, base_url } => {
                let url = format!("{base_url}{target}");
                let mut builder = match req.verb {
                    Verb::Get => client.get(url),
                    Verb::Post => client.post(url),
                };
                for (name, value) in &req.headers {
                    builder = builder.header(*name, value.as_str());
                }
                if let Some(body) = req.json {
                    builder = builder
                        .header(reqwest::header::CONTENT_TYPE, "application/json")
                        .body(body);
                }
                let resp = builder.send().await?;
                Ok(ApiResponse {
                    status: resp.status().as_u16(),
                    body: ResponseBody::Http(resp),
                })
            }
            #[cfg(unix)]
            Transport::Unix { path } => send_unix(path, &target, req).await,
        }
    }
}

#[cfg(unix)]
fn unix_transport(host: &str, path: &str) -> Result<Transport> {
    if path.is_empty() {
        return Err(OrchestratorError::InvalidHost(host.to_string()));
    }
    Ok(Transport::Unix { path: path.into() })
}

#[cfg(not(unix))]
fn unix_transport(host: &str, _path: &str) -> Result<Transport> {
    Err(OrchestratorError::InvalidHost(host.to_string()))
}

#[cfg(unix)]
async fn send_unix(path: &std::path::Path, target: &str, req: ApiRequest) -> Result<ApiResponse> {
    use http_body_util::Full;
    use hyper::header::{CONTENT_TYPE, HOST};
    use hyper_util::rt::TokioIo;
    use tokio::net::UnixStream;
    use tracing::debug;

    let stream = UnixStream::connect(path)
        .await
        .map_err(|e| OrchestratorError::Socket(format!("{}: {e}", path.display())))?;
    let (mut sender, conn) =
        hyper::client::conn::http1::handshake::<_, Full<Bytes>>(TokioIo::new(stream))
            .await
            .map_err(socket_err)?;
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "docker socket connection ended");
        }
    });

    let method = match req.verb {
        Verb::Get => hyper::Method::GET,
        Verb::Post => hyper::Method::POST,
    };
    let mut builder = hyper::Request::builder()
        .method(method)
        .uri(target)
        .header(HOST, "docker");
    for (name, value) in &req.headers {
        builder = builder.header(*name, value.as_str());
    }
    let body = match req.json {
        Some(json) => {
            builder = builder.header(CONTENT_TYPE, "application/json");
            Full::new(Bytes::from(json))
        }
        None => Full::new(Bytes::new()),
    };
    let request = builder.body(body).map_err(socket_err)?;

    let resp = sender
        .send_request(request)
        .await
        .map_err(socket_err)?;
    Ok(ApiResponse {
        status: resp.status().as_u16(),
        body: ResponseBody::Socket(resp.into_body()),
    })
}

#[cfg(unix)]
fn socket_err(e: impl std::fmt::Display) -> OrchestratorError {
    OrchestratorError::Socket(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(host: &str) -> String {
        Transport::from_host(host).unwrap().endpoint()
    }

    #[test]
    fn tcp_hosts_become_http() {
        assert_eq!(endpoint("tcp://manager:2375"), "http://manager:2375");
        assert_eq!(endpoint("http://localhost:2375/"), "http://localhost:2375");
        assert_eq!(endpoint("https://docker:2376"), "https://docker:2376");
        assert_eq!(endpoint("10.0.0.5:2375"), "http://10.0.0.5:2375");
    }

    #[cfg(unix)]
    #[test]
    fn unix_socket_host() {
        assert_eq!(
            endpoint("unix:///var/run/docker.sock"),
            "unix:///var/run/docker.sock"
        );
    }

    #[test]
    fn unusable_hosts_rejected() {
        for host in ["", "unix://", "npipe:////./pipe/docker_engine", "ssh://node"] {
            assert!(
                matches!(
                    Transport::from_host(host),
                    Err(OrchestratorError::InvalidHost(_))
                ),
                "{host:?}"
            );
        }
    }

    #[test]
    fn targets_are_versioned_and_encoded() {
        let req = ApiRequest::get("/tasks").query(&[("filters", r#"{"service":["a b"]}"#.into())]);
        assert_eq!(
            req.target().unwrap(),
            "/v1.41/tasks?filters=%7B%22service%22%3A%5B%22a+b%22%5D%7D"
        );
        assert_eq!(ApiRequest::get("/version").target().unwrap(), "/v1.41/version");
    }
}
