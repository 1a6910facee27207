//! Browser bindings: `localStorage`, fetch via gloo-net, gloo timers and
//! `spawn_local` on the page's event loop.

use std::time::Duration;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use gloo_net::http::{Request, Response};

use crate::config::ClientConfig;
use crate::dispatch::{
    Dispatcher, HostInfoSource, LocalSpawner, OperationName, Timer, TransportError,
    decode_host_info, decode_response, encode_body,
};
use crate::storage::{KeyValueStore, StorageError};
use crate::wire::{HostInfoSnapshot, RequestEnvelope, ResponseEnvelope};

#[derive(Debug, Default, Clone, Copy)]
pub struct LocalStorageStore;

impl LocalStorageStore {
    fn storage() -> Result<web_sys::Storage, StorageError> {
        let Some(window) = web_sys::window() else {
            return Err(StorageError::Unavailable("no window".to_string()));
        };
        window
            .local_storage()
            .map_err(|_| StorageError::Unavailable("failed to access local storage".to_string()))?
            .ok_or_else(|| StorageError::Unavailable("local storage is disabled".to_string()))
    }
}

impl KeyValueStore for LocalStorageStore {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        Self::storage()?
            .get_item(key)
            .map_err(|_| StorageError::Read {
                key: key.to_string(),
                message: "local storage read rejected".to_string(),
            })
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        Self::storage()?
            .set_item(key, value)
            .map_err(|_| StorageError::Write {
                key: key.to_string(),
                message: "local storage write rejected".to_string(),
            })
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        Self::storage()?
            .remove_item(key)
            .map_err(|_| StorageError::Write {
                key: key.to_string(),
                message: "local storage remove rejected".to_string(),
            })
    }
}

#[derive(Debug, Clone)]
pub struct GlooDispatcher {
    config: ClientConfig,
}

impl GlooDispatcher {
    pub fn new(config: ClientConfig) -> Self {
        Self { config }
    }
}

fn map_network_error(error: gloo_net::Error) -> TransportError {
    TransportError::Request {
        message: error.to_string(),
    }
}

async fn read_text(response: Response) -> Result<(u16, String), TransportError> {
    let status = response.status();
    let raw = response
        .text()
        .await
        .map_err(|error| TransportError::Read {
            message: error.to_string(),
        })?;
    Ok((status, raw))
}

#[async_trait(?Send)]
impl Dispatcher for GlooDispatcher {
    async fn send(
        &self,
        envelope: &RequestEnvelope,
        operation: &OperationName,
    ) -> Result<ResponseEnvelope, TransportError> {
        let path = self.config.endpoint(operation.as_str());
        let body = encode_body(envelope)?;
        let request = Request::post(&path)
            .header("content-type", "application/json")
            .body(body)
            .map_err(|error| TransportError::Encode {
                message: error.to_string(),
            })?;
        let response = request.send().await.map_err(map_network_error)?;
        let (status, raw) = read_text(response).await?;
        decode_response(status, &raw)
    }
}

#[async_trait(?Send)]
impl HostInfoSource for GlooDispatcher {
    async fn fetch_host_info(&self) -> Result<HostInfoSnapshot, TransportError> {
        let response = Request::get(&self.config.host_info_endpoint())
            .send()
            .await
            .map_err(map_network_error)?;
        let (status, raw) = read_text(response).await?;
        decode_host_info(status, &raw)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct GlooTimer;

#[async_trait(?Send)]
impl Timer for GlooTimer {
    async fn sleep(&self, duration: Duration) {
        gloo_timers::future::sleep(duration).await;
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WasmSpawner;

impl LocalSpawner for WasmSpawner {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        wasm_bindgen_futures::spawn_local(task);
    }
}
