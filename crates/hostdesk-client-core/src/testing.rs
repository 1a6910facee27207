use std::cell::RefCell;
use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::LocalBoxFuture;

use crate::dispatch::{
    Dispatcher, HostInfoSource, LocalSpawner, OperationName, Timer, TransportError,
};
use crate::wire::{HostInfoSnapshot, RequestEnvelope, ResponseEnvelope};

type Handler =
    Box<dyn Fn(&OperationName, &RequestEnvelope) -> Result<ResponseEnvelope, TransportError>>;

/// Answers synchronously from a handler and records every call.
pub struct ScriptedDispatcher {
    handler: Handler,
    calls: RefCell<Vec<(OperationName, RequestEnvelope)>>,
}

impl ScriptedDispatcher {
    pub fn new(
        handler: impl Fn(&OperationName, &RequestEnvelope) -> Result<ResponseEnvelope, TransportError>
        + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            calls: RefCell::new(Vec::new()),
        }
    }

    pub fn always_ok() -> Self {
        Self::new(|_, _| Ok(ResponseEnvelope::ok(None)))
    }

    pub fn calls(&self) -> Vec<(OperationName, RequestEnvelope)> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.borrow().len()
    }

    pub fn simple_requests(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|(_, envelope)| match envelope {
                RequestEnvelope::Simple(request) => Some(request.request.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait(?Send)]
impl Dispatcher for ScriptedDispatcher {
    async fn send(
        &self,
        envelope: &RequestEnvelope,
        operation: &OperationName,
    ) -> Result<ResponseEnvelope, TransportError> {
        self.calls
            .borrow_mut()
            .push((operation.clone(), envelope.clone()));
        (self.handler)(operation, envelope)
    }
}

/// Runs tasks in place; suitable for futures that resolve without waiting.
pub struct ImmediateSpawner;

impl LocalSpawner for ImmediateSpawner {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        let _ = task.now_or_never();
    }
}

/// Holds tasks until `run_pending`, so tests can interleave completions.
#[derive(Default)]
pub struct QueuedSpawner {
    tasks: RefCell<VecDeque<LocalBoxFuture<'static, ()>>>,
}

impl QueuedSpawner {
    pub fn pending(&self) -> usize {
        self.tasks.borrow().len()
    }

    pub fn run_next(&self) -> bool {
        let task = self.tasks.borrow_mut().pop_front();
        match task {
            Some(task) => {
                let _ = task.now_or_never();
                true
            }
            None => false,
        }
    }

    pub fn run_pending(&self) {
        while self.run_next() {}
    }
}

impl LocalSpawner for QueuedSpawner {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        self.tasks.borrow_mut().push_back(task);
    }
}

pub struct ScriptedHostInfo {
    snapshots: RefCell<VecDeque<Result<HostInfoSnapshot, TransportError>>>,
    fetches: RefCell<usize>,
}

impl ScriptedHostInfo {
    pub fn new(snapshots: Vec<Result<HostInfoSnapshot, TransportError>>) -> Self {
        Self {
            snapshots: RefCell::new(snapshots.into()),
            fetches: RefCell::new(0),
        }
    }

    pub fn fetches(&self) -> usize {
        *self.fetches.borrow()
    }
}

#[async_trait(?Send)]
impl HostInfoSource for ScriptedHostInfo {
    async fn fetch_host_info(&self) -> Result<HostInfoSnapshot, TransportError> {
        *self.fetches.borrow_mut() += 1;
        self.snapshots
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Request {
                message: "script exhausted".to_string(),
            }))
    }
}

pub struct TokioTestTimer;

#[async_trait(?Send)]
impl Timer for TokioTestTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}
