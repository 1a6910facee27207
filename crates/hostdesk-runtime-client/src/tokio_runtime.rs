use std::time::Duration;

use async_trait::async_trait;
use futures::future::LocalBoxFuture;
use hostdesk_client_core::{LocalSpawner, Timer};

#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

#[async_trait(?Send)]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Spawns onto the current `tokio::task::LocalSet`; must be used from inside one.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSpawner;

impl LocalSpawner for TokioSpawner {
    fn spawn_local(&self, task: LocalBoxFuture<'static, ()>) {
        drop(tokio::task::spawn_local(task));
    }
}
