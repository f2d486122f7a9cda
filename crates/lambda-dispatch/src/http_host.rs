//! HTTP implementation of [`HostClient`].

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::{Method, StatusCode, header};
use http_body_util::{BodyExt, Full};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use lambda_core::protocol::{ErrorBody, ErrorKind, HEALTH_PATH, LOAD_PATH, LoadRequest, RUN_PATH};
use lambda_runtime::ServiceAddress;
use serde_json::Value;
use tracing::debug;

use crate::error::HostError;
use crate::host::{HostClient, RunOutcome};

/// Talks to runners over plain HTTP/1.1 with a pooled connector.
#[derive(Clone)]
pub struct HttpHostClient {
    client: Client<HttpConnector, Full<Bytes>>,
}

impl Default for HttpHostClient {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpHostClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    /// One request/response exchange, bounded by `timeout` end to end.
    async fn send(
        &self,
        method: Method,
        address: &ServiceAddress,
        path: &str,
        body: Option<Vec<u8>>,
        timeout: Duration,
    ) -> Result<(StatusCode, Bytes), HostError> {
        let uri = format!("{}{path}", address.base_url());
        let transport = |message: String| HostError::Transport {
            address: address.to_string(),
            message,
        };

        let mut builder = http::Request::builder().method(method).uri(&uri);
        if body.is_some() {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
        }
        let req = builder
            .body(Full::new(body.map(Bytes::from).unwrap_or_default()))
            .map_err(|e| transport(e.to_string()))?;

        let exchange = async {
            let resp = self
                .client
                .request(req)
                .await
                .map_err(|e| transport(e.to_string()))?;
            let status = resp.status();
            let bytes = resp
                .into_body()
                .collect()
                .await
                .map_err(|e| transport(e.to_string()))?
                .to_bytes();
            Ok::<_, HostError>((status, bytes))
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => {
                if let Ok((status, _)) = &result {
                    debug!(%uri, %status, "runner answered");
                }
                result
            }
            Err(_) => Err(HostError::Timeout {
                address: address.to_string(),
                timeout,
            }),
        }
    }
}

#[async_trait]
impl HostClient for HttpHostClient {
    async fn probe(&self, address: &ServiceAddress, timeout: Duration) -> bool {
        match self.send(Method::GET, address, HEALTH_PATH, None, timeout).await {
            Ok((status, _)) if status.is_success() => true,
            Ok((status, _)) => {
                debug!(%address, %status, "health check answered non-2xx");
                false
            }
            Err(e) => {
                debug!(%address, error = %e, "health check failed");
                false
            }
        }
    }

    async fn load(
        &self,
        address: &ServiceAddress,
        code: &str,
        timeout: Duration,
    ) -> Result<(), HostError> {
        let body = serde_json::to_vec(&LoadRequest {
            code: code.to_string(),
        })
        .map_err(|e| HostError::Decode(e.to_string()))?;
        let (status, bytes) = self
            .send(Method::POST, address, LOAD_PATH, Some(body), timeout)
            .await?;
        decode_load_response(status, &bytes)
    }

    async fn run(
        &self,
        address: &ServiceAddress,
        input: &Value,
        timeout: Duration,
    ) -> Result<RunOutcome, HostError> {
        let body = serde_json::to_vec(input).map_err(|e| HostError::Decode(e.to_string()))?;
        let (status, bytes) = self
            .send(Method::POST, address, RUN_PATH, Some(body), timeout)
            .await?;
        decode_run_response(status, &bytes)
    }
}

fn decode_load_response(status: StatusCode, bytes: &[u8]) -> Result<(), HostError> {
    if status.is_success() {
        return Ok(());
    }
    match serde_json::from_slice::<ErrorBody>(bytes) {
        Ok(body) if matches!(body.kind, ErrorKind::LoadFailed | ErrorKind::InvalidRequest) => {
            Err(HostError::Rejected(body.detail))
        }
        Ok(body) => Err(HostError::Status {
            status: status.as_u16(),
            detail: body.detail,
        }),
        Err(_) => Err(undecoded_status(status, bytes)),
    }
}

fn decode_run_response(status: StatusCode, bytes: &[u8]) -> Result<RunOutcome, HostError> {
    if status.is_success() {
        return serde_json::from_slice(bytes)
            .map(RunOutcome::Completed)
            .map_err(|e| HostError::Decode(e.to_string()));
    }
    match serde_json::from_slice::<ErrorBody>(bytes) {
        Ok(ErrorBody {
            kind: ErrorKind::UserCode,
            detail,
        }) => Ok(RunOutcome::UserError(detail)),
        Ok(ErrorBody {
            kind: ErrorKind::NotLoaded,
            ..
        }) => Ok(RunOutcome::NotLoaded),
        Ok(body) => Err(HostError::Status {
            status: status.as_u16(),
            detail: body.detail,
        }),
        Err(_) => Err(undecoded_status(status, bytes)),
    }
}

fn undecoded_status(status: StatusCode, bytes: &[u8]) -> HostError {
    HostError::Status {
        status: status.as_u16(),
        detail: String::from_utf8_lossy(bytes).into_owned(),
    }
}
