//! swcache host entry point.
//!
//! Boots the worker (install, then activate) and the sync coordinator, then
//! speaks a JSON-lines protocol: events on stdin, results on stdout.
//! Logging goes to stderr to keep stdout machine-readable.

use std::sync::Arc;

use anyhow::Result;
use serde_json::{Value, json};
use swcache_client::fetch::{FetchClient, FetchConfig, Network};
use swcache_client::{ServiceWorker, SyncCoordinator};
use swcache_core::{AppConfig, CacheDb};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

mod error;
mod handler;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    tracing::info!("Starting swcache host on stdio");

    let config = AppConfig::load()?;
    let db = CacheDb::open(&config.db_path).await?;
    let network: Arc<dyn Network> = Arc::new(FetchClient::new(FetchConfig::from_app(&config))?);

    let worker = ServiceWorker::new(db.clone(), network.clone(), config.clone())?;
    let state = worker.run_lifecycle().await?;
    tracing::info!(?state, origin = %config.origin, "worker ready");

    let coordinator = SyncCoordinator::new(db.clone(), network.clone(), &config)?;
    let mut sync_events = coordinator.subscribe();
    let sync = coordinator.spawn("/", true);
    let mut worker_messages = worker.subscribe();
    let mut host = handler::Host::new(worker, network, sync, "/");

    let (out, out_rx) = mpsc::unbounded_channel::<Value>();
    let writer = tokio::spawn(write_lines(out_rx));

    let sync_out = out.clone();
    let forward = tokio::spawn(async move {
        loop {
            match sync_events.recv().await {
                Ok(event) => {
                    let _ = sync_out.send(json!({ "event": "sync", "data": event }));
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "sync events dropped"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).split(b'\n');
    loop {
        tokio::select! {
            line = lines.next_segment() => match line {
                Ok(Some(raw)) => {
                    if let Some(reply) = host.handle_raw(raw).await
                        && out.send(reply).is_err()
                    {
                        break;
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "stdin read failed");
                    break;
                }
            },
            message = worker_messages.recv() => match message {
                Ok(message) => {
                    let rendered = host.on_worker_message(message).await;
                    if out.send(rendered).is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "worker messages dropped"),
                Err(RecvError::Closed) => break,
            },
        }
    }

    tracing::info!("input closed, shutting down");
    host.shutdown().await;
    forward.await?;
    drop(out);
    writer.await??;
    db.close().await?;

    Ok(())
}

async fn write_lines(mut rx: mpsc::UnboundedReceiver<Value>) -> std::io::Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(value) = rx.recv().await {
        let mut line = value.to_string();
        line.push('\n');
        stdout.write_all(line.as_bytes()).await?;
        stdout.flush().await?;
    }
    Ok(())
}
