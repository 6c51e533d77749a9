//! The foreground sync coordinator task.
//!
//! Page signals and worker messages come in through [`SyncHandle::send`];
//! everything the page would show (progress, indicator state, pass results)
//! goes out on a broadcast channel.

use std::sync::Arc;

use serde::Serialize;
use swcache_core::{AppConfig, CacheDb, Error, SyncConfig, WorkerMessage};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::machine::{SyncAction, SyncMachine};
use super::pass::{PassReport, SyncPassRunner};
use super::trigger::{PageContext, PageSignal, SyncTrigger, is_content_stale};
use crate::fetch::Network;

const INBOX_CAPACITY: usize = 64;
const EVENTS_CAPACITY: usize = 128;

/// Input to the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent {
    Signal(PageSignal),
    /// The page navigated to this path (a new page load).
    Navigate(String),
    /// A message posted by the worker.
    Worker(WorkerMessage),
}

/// The transient status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Hidden,
    Updating,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncEvent {
    Triggered { reason: SyncTrigger },
    PassStarted { reasons: Vec<SyncTrigger> },
    Progress { progress: f64 },
    PassCompleted { report: PassReport },
    PassFailed { code: String, message: String },
    Status { status: SyncStatus },
}

pub struct SyncCoordinator {
    db: CacheDb,
    runner: SyncPassRunner,
    config: SyncConfig,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
    pub fn new(db: CacheDb, network: Arc<dyn Network>, config: &AppConfig) -> Result<Self, Error> {
        let runner = SyncPassRunner::new(db.clone(), network, config)?;
        let (events, _) = broadcast::channel(EVENTS_CAPACITY);
        Ok(Self { db, runner, config: config.sync.clone(), events })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Start the coordinator for a page at `path`.
    pub fn spawn(self, path: impl Into<String>, online: bool) -> SyncHandle {
        let (inbox, rx) = mpsc::channel(INBOX_CAPACITY);
        let events = self.events.clone();
        let page = PageContext::new(path, online);
        let task = tokio::spawn(self.run(rx, page));
        SyncHandle { inbox, events, task }
    }

    async fn run(self, mut inbox: mpsc::Receiver<PageEvent>, page: PageContext) {
        let mut state = LoopState {
            machine: SyncMachine::new(self.config.debounce()),
            last_sync: self.load_last_sync().await,
            page,
            stale_check: None,
            dismiss_at: None,
            pass: None,
        };

        self.schedule_stale_check(&mut state);

        let period = self.config.periodic_interval();
        let mut periodic = tokio::time::interval_at(Instant::now() + period, period);
        periodic.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(page = %state.page.path, online = state.page.online, last_sync = ?state.last_sync, "sync coordinator started");

        loop {
            tokio::select! {
                event = inbox.recv() => match event {
                    Some(event) => self.on_event(&mut state, event),
                    None => break,
                },
                _ = periodic.tick() => {
                    if let Some(reason) = state.page.on_tick() {
                        self.trigger(&mut state, reason);
                    }
                },
                _ = sleep_until(state.stale_check) => {
                    state.stale_check = None;
                    if state.page.online {
                        self.trigger(&mut state, SyncTrigger::StaleContent);
                    }
                },
                _ = sleep_until(state.machine.deadline()) => {
                    let action = state.machine.debounce_elapsed(Instant::now(), state.page.online);
                    self.apply(&mut state, action);
                },
                outcome = join_pass(&mut state.pass) => {
                    state.pass = None;
                    self.on_pass_done(&mut state, outcome);
                },
                _ = sleep_until(state.dismiss_at) => {
                    state.dismiss_at = None;
                    self.emit(SyncEvent::Status { status: SyncStatus::Hidden });
                },
            }
        }

        if let Some(pass) = state.pass.take() {
            let _ = pass.await;
        }
        tracing::info!("sync coordinator stopped");
    }

    fn on_event(&self, state: &mut LoopState, event: PageEvent) {
        match event {
            PageEvent::Signal(signal) => {
                let reason = state.page.on_signal(
                    signal,
                    state.last_sync,
                    now_millis(),
                    self.config.activity_min_interval(),
                );
                if signal == PageSignal::Offline {
                    state.machine.go_offline();
                    state.dismiss_at = None;
                    self.emit(SyncEvent::Status { status: SyncStatus::Hidden });
                }
                if let Some(reason) = reason {
                    self.trigger(state, reason);
                }
            }
            PageEvent::Navigate(path) => {
                tracing::debug!(path = %path, "page navigated");
                state.page.navigate(path);
                self.schedule_stale_check(state);
            }
            PageEvent::Worker(WorkerMessage::SyncProgress { progress }) => {
                self.emit(SyncEvent::Progress { progress });
            }
            PageEvent::Worker(WorkerMessage::CacheUpdated { timestamp }) => {
                tracing::info!(timestamp, "worker reported cache update");
                self.emit(SyncEvent::Status { status: SyncStatus::Updated });
                state.dismiss_at = Some(Instant::now() + self.config.indicator_dismiss());
            }
        }
    }

    /// Page-load check: arm a `StaleContent` trigger if the cache is too old.
    fn schedule_stale_check(&self, state: &mut LoopState) {
        if state.page.online && is_content_stale(state.last_sync, now_millis(), self.config.stale_threshold()) {
            state.stale_check = Some(Instant::now() + self.config.initial_check_delay());
        }
    }

    fn trigger(&self, state: &mut LoopState, reason: SyncTrigger) {
        tracing::debug!(reason = reason.as_str(), "sync triggered");
        self.emit(SyncEvent::Triggered { reason });
        let action = state.machine.trigger(reason, Instant::now());
        self.apply(state, action);
    }

    fn apply(&self, state: &mut LoopState, action: SyncAction) {
        let SyncAction::StartPass(reasons) = action else {
            // Timers are re-read from the machine on every loop turn.
            return;
        };

        let tags: Vec<&str> = reasons.iter().map(SyncTrigger::as_str).collect();
        tracing::info!(reasons = ?tags, page = %state.page.path, "starting sync pass");
        self.emit(SyncEvent::PassStarted { reasons });
        self.emit(SyncEvent::Status { status: SyncStatus::Updating });
        state.dismiss_at = None;

        let runner = self.runner.clone();
        let events = self.events.clone();
        let page = runner.scope().site_relative(&state.page.path).to_string();
        state.pass = Some(tokio::spawn(async move {
            runner
                .run(&page, |progress| {
                    let _ = events.send(SyncEvent::Progress { progress });
                })
                .await
        }));
    }

    fn on_pass_done(&self, state: &mut LoopState, outcome: Result<Result<PassReport, Error>, tokio::task::JoinError>) {
        match outcome {
            Ok(Ok(report)) => {
                state.last_sync = Some(report.completed_at);
                self.emit(SyncEvent::PassCompleted { report });
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "sync failed");
                self.emit(SyncEvent::PassFailed { code: e.code().to_string(), message: e.to_string() });
            }
            Err(e) => {
                tracing::error!(error = %e, "sync pass panicked");
                self.emit(SyncEvent::PassFailed { code: "INTERNAL".into(), message: e.to_string() });
            }
        }
        state.dismiss_at = Some(Instant::now() + self.config.indicator_dismiss());

        let action = state.machine.pass_finished(Instant::now());
        self.apply(state, action);
    }

    async fn load_last_sync(&self) -> Option<i64> {
        match self.db.last_sync_millis().await {
            Ok(last) => last,
            Err(e) => {
                tracing::warn!(error = %e, "cannot read last sync time");
                None
            }
        }
    }

    fn emit(&self, event: SyncEvent) {
        let _ = self.events.send(event);
    }
}

struct LoopState {
    machine: SyncMachine,
    last_sync: Option<i64>,
    page: PageContext,
    stale_check: Option<Instant>,
    dismiss_at: Option<Instant>,
    pass: Option<JoinHandle<Result<PassReport, Error>>>,
}

/// Handle to a running coordinator.
pub struct SyncHandle {
    inbox: mpsc::Sender<PageEvent>,
    events: broadcast::Sender<SyncEvent>,
    task: JoinHandle<()>,
}

impl SyncHandle {
    pub async fn send(&self, event: PageEvent) -> Result<(), Error> {
        self.inbox
            .send(event)
            .await
            .map_err(|_| Error::InvalidInput("sync coordinator has stopped".into()))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Stop accepting events and wait for a running pass to finish.
    pub async fn shutdown(self) {
        drop(self.inbox);
        if let Err(e) = self.task.await {
            tracing::error!(error = %e, "sync coordinator task failed");
        }
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn join_pass(
    pass: &mut Option<JoinHandle<Result<PassReport, Error>>>,
) -> Result<Result<PassReport, Error>, tokio::task::JoinError> {
    match pass {
        Some(handle) => handle.await,
        None => std::future::pending().await,
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
