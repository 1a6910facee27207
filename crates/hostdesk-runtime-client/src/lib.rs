//! Native transport for the hostdesk client: reqwest dispatcher, JSON file
//! store and tokio-backed timer/spawner.

use std::time::Duration;

use async_trait::async_trait;
use hostdesk_client_core::dispatch::{decode_host_info, decode_response};
use hostdesk_client_core::{
    ClientConfig, Dispatcher, HostInfoSnapshot, HostInfoSource, OperationName, RequestEnvelope,
    ResponseEnvelope, TransportError,
};
use reqwest::StatusCode;
use uuid::Uuid;

mod file_store;
mod tokio_runtime;

pub use file_store::FileStore;
pub use tokio_runtime::{TokioSpawner, TokioTimer};

pub const MIN_TIMEOUT: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct HttpDispatcher {
    base_url: String,
    api_prefix: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl HttpDispatcher {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let base_url = normalize_base_url(&config.base_url)?;
        Ok(Self {
            base_url,
            api_prefix: config.api_prefix.trim_end_matches('/').to_string(),
            timeout: config.request_timeout.max(MIN_TIMEOUT),
            http: reqwest::Client::new(),
        })
    }

    #[must_use]
    pub fn endpoint(&self, path: &str) -> Option<String> {
        let trimmed = path.trim().trim_start_matches('/');
        if trimmed.is_empty() {
            return None;
        }
        Some(format!("{}{}/{}", self.base_url, self.api_prefix, trimmed))
    }

    fn endpoint_for(&self, path: &str) -> Result<String, TransportError> {
        self.endpoint(path)
            .ok_or_else(|| TransportError::InvalidEndpoint(path.to_string()))
    }
}

#[async_trait(?Send)]
impl Dispatcher for HttpDispatcher {
    async fn send(
        &self,
        envelope: &RequestEnvelope,
        operation: &OperationName,
    ) -> Result<ResponseEnvelope, TransportError> {
        let url = self.endpoint_for(operation.as_str())?;
        let request_id = format!("req_{}", Uuid::new_v4().simple());
        tracing::debug!(operation = %operation, url = %url, request_id = %request_id, "dispatching request");
        let response = self
            .http
            .post(url.as_str())
            .header("x-request-id", request_id)
            .timeout(self.timeout)
            .json(envelope)
            .send()
            .await
            .map_err(|error| TransportError::Request {
                message: error.to_string(),
            })?;
        let (status, body) = read_body(response).await?;
        decode_response(status.as_u16(), &body)
    }
}

#[async_trait(?Send)]
impl HostInfoSource for HttpDispatcher {
    async fn fetch_host_info(&self) -> Result<HostInfoSnapshot, TransportError> {
        let url = self.endpoint_for(hostdesk_client_core::dispatch::HOST_INFO)?;
        let response = self
            .http
            .get(url.as_str())
            .header("x-request-id", format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| TransportError::Request {
                message: error.to_string(),
            })?;
        let (status, body) = read_body(response).await?;
        decode_host_info(status.as_u16(), &body)
    }
}

fn normalize_base_url(base_url: &str) -> Result<String, TransportError> {
    let trimmed = base_url.trim();
    if trimmed.is_empty() {
        return Err(TransportError::InvalidEndpoint(
            "base url is required outside the browser".to_string(),
        ));
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

async fn read_body(response: reqwest::Response) -> Result<(StatusCode, String), TransportError> {
    let status = response.status();
    let bytes = response
        .bytes()
        .await
        .map_err(|error| TransportError::Read {
            message: error.to_string(),
        })?;
    Ok((status, String::from_utf8_lossy(&bytes).into_owned()))
}
