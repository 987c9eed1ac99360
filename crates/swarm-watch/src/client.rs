//! Control-plane client over a plain hyper HTTP/1 connection.

use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HOST, USER_AGENT};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper_util::rt::TokioIo;
use tracing::debug;

use swarm_core::{PeerId, Stage};

use crate::error::{WatchError, WatchResult};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Talks to the control plane served at a job's parent endpoint.
#[derive(Debug, Clone)]
pub struct StageClient {
    endpoint: PeerId,
    timeout: Duration,
}

impl StageClient {
    pub fn new(endpoint: PeerId) -> Self {
        Self {
            endpoint,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn endpoint(&self) -> &PeerId {
        &self.endpoint
    }

    /// GET /stage. `None` when nothing has been pushed yet.
    pub async fn fetch_stage(&self) -> WatchResult<Option<Stage>> {
        let (status, body) = self.request(Method::GET, "/stage", Bytes::new()).await?;
        match status {
            StatusCode::OK => Ok(Some(serde_json::from_slice(&body)?)),
            StatusCode::NOT_FOUND => Ok(None),
            other => Err(self.status_error(other, &body)),
        }
    }

    /// PUT /stage.
    pub async fn push_stage(&self, stage: &Stage) -> WatchResult<()> {
        let payload = Bytes::from(serde_json::to_vec(stage)?);
        let (status, body) = self.request(Method::PUT, "/stage", payload).await?;
        if status.is_success() {
            Ok(())
        } else {
            Err(self.status_error(status, &body))
        }
    }

    /// GET /healthz.
    pub async fn healthy(&self) -> bool {
        matches!(
            self.request(Method::GET, "/healthz", Bytes::new()).await,
            Ok((status, _)) if status.is_success()
        )
    }

    async fn request(&self, method: Method, path: &str, payload: Bytes) -> WatchResult<(StatusCode, Bytes)> {
        let address = self.endpoint.to_string();

        let exchange = async {
            let stream = tokio::net::TcpStream::connect(&address)
                .await
                .map_err(|e| self.unreachable(e))?;

            let io = TokioIo::new(stream);
            let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
                .await
                .map_err(|e| self.unreachable(e))?;

            // Drive the connection in the background.
            tokio::spawn(async move {
                if let Err(e) = conn.await {
                    debug!(error = %e, "control plane connection closed");
                }
            });

            let req = http::Request::builder()
                .method(method)
                .uri(path)
                .header(HOST, &address)
                .header(USER_AGENT, "swarm-watch/0.1")
                .header(CONTENT_TYPE, "application/json")
                .body(Full::new(payload))
                .map_err(|e| self.unreachable(e))?;

            let resp = sender.send_request(req).await.map_err(|e| self.unreachable(e))?;
            let status = resp.status();
            let body = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| self.unreachable(e))?
                .to_bytes();

            debug!(%address, %path, %status, "control plane request finished");
            Ok::<_, WatchError>((status, body))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(WatchError::Unreachable {
                endpoint: address,
                reason: format!("no answer within {:?}", self.timeout),
            }),
        }
    }

    fn unreachable(&self, e: impl std::fmt::Display) -> WatchError {
        WatchError::Unreachable {
            endpoint: self.endpoint.to_string(),
            reason: e.to_string(),
        }
    }

    fn status_error(&self, status: StatusCode, body: &[u8]) -> WatchError {
        WatchError::Status {
            endpoint: self.endpoint.to_string(),
            status: status.as_u16(),
            body: String::from_utf8_lossy(body).into_owned(),
        }
    }
}
