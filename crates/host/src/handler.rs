//! Dispatch for the JSON-lines host protocol.
//!
//! Each stdin line is one event tagged by `"event"`; each produces exactly
//! one stdout line (a result or an error).

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Value, json};
use swcache_client::fetch::Network;
use swcache_client::{FetchDecision, PageEvent, PageSignal, Request, ServiceWorker, SyncHandle};
use swcache_core::{ClientMessage, WorkerMessage};

use crate::error::HostError;

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Inbound {
    Fetch {
        url: String,
        #[serde(default = "default_method")]
        method: String,
        #[serde(default)]
        accept: Option<String>,
    },
    Message {
        data: Value,
    },
    Page {
        signal: PageSignal,
        #[serde(default)]
        path: Option<String>,
    },
    Inventory,
    Clear,
}

fn default_method() -> String {
    "GET".to_string()
}

pub struct Host {
    worker: ServiceWorker,
    network: Arc<dyn Network>,
    sync: SyncHandle,
    current_path: String,
}

impl Host {
    pub fn new(worker: ServiceWorker, network: Arc<dyn Network>, sync: SyncHandle, path: impl Into<String>) -> Self {
        Self { worker, network, sync, current_path: path.into() }
    }

    /// Handle one raw stdin line. Blank lines produce no output.
    pub async fn handle_raw(&mut self, raw: Vec<u8>) -> Option<Value> {
        match String::from_utf8(raw) {
            Ok(line) if line.trim().is_empty() => None,
            Ok(line) => Some(self.handle_line(&line).await),
            Err(e) => {
                let e = HostError::InvalidInput(format!("line is not valid UTF-8: {e}"));
                tracing::warn!(code = e.code(), error = %e, "rejected input");
                Some(e.to_json())
            }
        }
    }

    /// Handle one input line. Errors are rendered, never returned.
    pub async fn handle_line(&mut self, line: &str) -> Value {
        match self.dispatch(line).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(code = e.code(), error = %e, "rejected input");
                e.to_json()
            }
        }
    }

    /// Pass a worker broadcast on to the coordinator and render it.
    pub async fn on_worker_message(&self, message: WorkerMessage) -> Value {
        let rendered = json!({ "event": "worker", "data": message });
        if let Err(e) = self.sync.send(PageEvent::Worker(message)).await {
            tracing::warn!(error = %e, "coordinator did not take worker message");
        }
        rendered
    }

    /// Wait for background cache writes, then stop the coordinator.
    pub async fn shutdown(self) {
        self.worker.settle().await;
        self.sync.shutdown().await;
    }

    async fn dispatch(&mut self, line: &str) -> Result<Value, HostError> {
        let inbound: Inbound = serde_json::from_str(line).map_err(|e| HostError::InvalidInput(e.to_string()))?;

        match inbound {
            Inbound::Fetch { url, method, accept } => self.fetch(&url, &method, accept).await,
            Inbound::Message { data } => {
                let kind = data.get("type").cloned().unwrap_or(Value::Null);
                let message = ClientMessage::from_json(&data.to_string())?;
                self.worker.handle_message(message).await?;
                Ok(json!({ "event": "message", "type": kind, "ok": true }))
            }
            Inbound::Page { signal, path } => {
                if let Some(path) = path
                    && path != self.current_path
                {
                    self.sync.send(PageEvent::Navigate(path.clone())).await?;
                    self.current_path = path;
                }
                self.sync.send(PageEvent::Signal(signal)).await?;
                Ok(json!({ "event": "page", "signal": signal, "path": self.current_path }))
            }
            Inbound::Inventory => {
                let buckets = self.worker.db().inventory().await?;
                Ok(json!({ "event": "inventory", "buckets": buckets }))
            }
            Inbound::Clear => {
                let deleted = self.worker.db().clear_all().await?;
                tracing::info!(deleted, "cleared all buckets");
                Ok(json!({ "event": "clear", "deleted": deleted }))
            }
        }
    }

    async fn fetch(&self, url: &str, method: &str, accept: Option<String>) -> Result<Value, HostError> {
        let url = self.worker.scope().resolve(url).map_err(swcache_core::Error::from)?;
        let mut request = Request::get(url).with_method(method)?;
        request.accept = accept;

        match self.worker.handle_fetch(request.clone()).await {
            FetchDecision::Respond(response) => Ok(json!({
                "event": "fetch",
                "url": request.url.as_str(),
                "status": response.status(),
                "source": response.source,
                "content_type": response.response.content_type(),
                "bytes": response.body().len(),
            })),
            FetchDecision::Passthrough(reason) => {
                let response = self.network.fetch(&request).await?;
                Ok(json!({
                    "event": "fetch",
                    "url": request.url.as_str(),
                    "status": response.status.as_u16(),
                    "source": { "kind": "passthrough", "reason": reason },
                    "content_type": response.content_type,
                    "bytes": response.bytes.len(),
                }))
            }
        }
    }
}
