//! In-memory network for tests.
//!
//! Routes are keyed by URL path (plus `?query` when present). Unknown paths
//! fail like an unreachable server, so an unscripted request is never a
//! silent success.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use swcache_core::Error;

use crate::fetch::{FetchResponse, Network, Request};

#[derive(Debug, Clone)]
enum Route {
    Respond { status: u16, content_type: String, body: Vec<u8>, delay: Option<Duration> },
    Fail,
}

/// A scripted [`Network`] that records every call.
#[derive(Debug, Default)]
pub struct ScriptedNetwork {
    routes: Mutex<HashMap<String, Route>>,
    calls: Mutex<Vec<String>>,
    offline: Mutex<bool>,
}

fn route_key(url: &url::Url) -> String {
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

impl ScriptedNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `path` with this response (replacing any previous script).
    pub fn respond(&self, path: &str, status: u16, content_type: &str, body: impl Into<Vec<u8>>) {
        self.set(path, Route::Respond { status, content_type: content_type.into(), body: body.into(), delay: None });
    }

    /// Answer `path` only after `delay`.
    pub fn respond_after(&self, path: &str, delay: Duration, status: u16, content_type: &str, body: impl Into<Vec<u8>>) {
        self.set(
            path,
            Route::Respond { status, content_type: content_type.into(), body: body.into(), delay: Some(delay) },
        );
    }

    /// Make `path` fail with a network error.
    pub fn fail(&self, path: &str) {
        self.set(path, Route::Fail);
    }

    /// Fail every request regardless of its script.
    pub fn set_offline(&self, offline: bool) {
        *self.offline.lock().unwrap_or_else(|e| e.into_inner()) = offline;
    }

    /// Every request seen so far, as `"METHOD path"`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// How many requests (any method) hit `path`.
    pub fn calls_to(&self, path: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split_once(' ').is_some_and(|(_, p)| p == path))
            .count()
    }

    fn set(&self, path: &str, route: Route) {
        self.routes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(path.to_string(), route);
    }
}

#[async_trait]
impl Network for ScriptedNetwork {
    async fn fetch(&self, request: &Request) -> Result<FetchResponse, Error> {
        let key = route_key(&request.url);
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(format!("{} {}", request.method, key));

        let offline = *self.offline.lock().unwrap_or_else(|e| e.into_inner());
        let route = self.routes.lock().unwrap_or_else(|e| e.into_inner()).get(&key).cloned();

        match (offline, route) {
            (false, Some(Route::Respond { status, content_type, body, delay })) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let status = StatusCode::from_u16(status).map_err(|e| Error::HttpError(e.to_string()))?;
                Ok(FetchResponse::synthetic(request.url.clone(), status, &content_type, body))
            }
            _ => Err(Error::Network(format!("{}: connection refused", request.url))),
        }
    }
}
