//! Work that outlives the event that started it.
//!
//! Background refreshes and write-behind cache puts are tracked here so the
//! host can wait for them (the equivalent of extending an event's lifetime)
//! and tests can observe their effects deterministically.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::task::JoinSet;

#[derive(Clone, Default)]
pub struct Background {
    tasks: Arc<Mutex<JoinSet<()>>>,
}

impl Background {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` without making the caller wait for it.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                tracing::warn!(error = %e, "background task panicked");
            }
        }
        tasks.spawn(task);
    }

    /// Tasks not yet reaped. Finished-but-unreaped tasks are counted too.
    pub fn pending(&self) -> usize {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Wait until every background task, including ones spawned meanwhile, has finished.
    pub async fn settle(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(|e| e.into_inner()));
            if batch.is_empty() {
                return;
            }
            while let Some(finished) = batch.join_next().await {
                if let Err(e) = finished {
                    tracing::warn!(error = %e, "background task panicked");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_settle_waits_for_nested_tasks() {
        let background = Background::new();
        let counter = Arc::new(AtomicUsize::new(0));

        let inner_bg = background.clone();
        let inner_counter = counter.clone();
        background.spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            inner_counter.fetch_add(1, Ordering::SeqCst);
            let c = inner_counter.clone();
            inner_bg.spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                c.fetch_add(1, Ordering::SeqCst);
            });
        });

        background.settle().await;
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(background.pending(), 0);
    }

    #[tokio::test]
    async fn test_settle_with_nothing_pending() {
        Background::new().settle().await;
    }
}
