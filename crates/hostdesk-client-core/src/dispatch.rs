//! Transport seams: request dispatch, host-info fetch, timers and local task spawning.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;

use crate::wire::{HostInfoSnapshot, RequestEnvelope, ResponseEnvelope};

pub const SIMPLE_REQUEST: &str = "simpleRequest";
pub const TABLE_REQUEST: &str = "FDBRequest";
pub const SET_OP_MODE: &str = "setOpMode";
pub const HOST_INFO: &str = "hostInfo";

/// Server operation a request body is posted to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationName {
    SimpleRequest,
    TableRequest,
    SetOpMode,
    Other(String),
}

impl OperationName {
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        match raw {
            SIMPLE_REQUEST => Self::SimpleRequest,
            TABLE_REQUEST => Self::TableRequest,
            SET_OP_MODE => Self::SetOpMode,
            other => Self::Other(other.to_string()),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::SimpleRequest => SIMPLE_REQUEST,
            Self::TableRequest => TABLE_REQUEST,
            Self::SetOpMode => SET_OP_MODE,
            Self::Other(raw) => raw.as_str(),
        }
    }
}

impl fmt::Display for OperationName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("transport_invalid_endpoint:{0}")]
    InvalidEndpoint(String),
    #[error("transport_encode_failed:{message}")]
    Encode { message: String },
    #[error("transport_request_failed:{message}")]
    Request { message: String },
    #[error("transport_http_{status}:{body}")]
    Http { status: u16, body: String },
    #[error("transport_read_failed:{message}")]
    Read { message: String },
    #[error("transport_decode_failed:{message}")]
    Decode { message: String },
}

/// Sends one request per call. Application `error` statuses come back as `Ok`.
#[async_trait(?Send)]
pub trait Dispatcher {
    async fn send(
        &self,
        envelope: &RequestEnvelope,
        operation: &OperationName,
    ) -> Result<ResponseEnvelope, TransportError>;

    /// Sends to the operation implied by the envelope's shape.
    async fn dispatch(&self, envelope: &RequestEnvelope) -> Result<ResponseEnvelope, TransportError> {
        let operation = envelope.operation();
        self.send(envelope, &operation).await
    }
}

#[async_trait(?Send)]
pub trait HostInfoSource {
    async fn fetch_host_info(&self) -> Result<HostInfoSnapshot, TransportError>;
}

#[async_trait(?Send)]
pub trait Timer {
    async fn sleep(&self, duration: Duration);
}

pub trait LocalSpawner {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>);
}

pub fn encode_body(envelope: &RequestEnvelope) -> Result<String, TransportError> {
    serde_json::to_string(envelope).map_err(|error| TransportError::Encode {
        message: error.to_string(),
    })
}

/// Maps an HTTP status and body text onto the response contract shared by
/// the native and browser dispatchers.
pub fn decode_response(status: u16, body: &str) -> Result<ResponseEnvelope, TransportError> {
    check_status(status, body)?;
    ResponseEnvelope::from_body(body).map_err(|error| TransportError::Decode {
        message: error.to_string(),
    })
}

pub fn decode_host_info(status: u16, body: &str) -> Result<HostInfoSnapshot, TransportError> {
    check_status(status, body)?;
    serde_json::from_str(body).map_err(|error| TransportError::Decode {
        message: error.to_string(),
    })
}

fn check_status(status: u16, body: &str) -> Result<(), TransportError> {
    if (200..300).contains(&status) {
        return Ok(());
    }
    let body = body.trim();
    Err(TransportError::Http {
        status,
        body: if body.is_empty() {
            "empty response body".to_string()
        } else {
            body.to_string()
        },
    })
}
