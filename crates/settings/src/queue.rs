use std::sync::Arc;

use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::model::Settings;
use crate::store::SettingsStore;

/// Progress of the write queue as seen by a view.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistStatus {
    /// Generation of the newest snapshot handed to the queue.
    pub submitted: u64,
    /// Generation of the newest snapshot the writer finished with.
    pub settled: u64,
    /// Error reported by the most recently settled save.
    pub failure: Option<String>,
}

impl PersistStatus {
    pub fn is_idle(&self) -> bool {
        self.settled >= self.submitted
    }

    pub fn has_failed(&self) -> bool {
        self.failure.is_some()
    }
}

#[derive(Debug, Clone)]
struct Pending {
    generation: u64,
    settings: Settings,
}

#[derive(Debug, Clone, Default)]
struct Settled {
    generation: u64,
    failure: Option<String>,
}

/// Single-slot write queue: one writer task, at most one save in flight,
/// and a newer snapshot replaces whatever is still waiting.
#[derive(Debug)]
pub(crate) struct WriteQueue {
    pending: watch::Sender<Option<Pending>>,
    settled: watch::Receiver<Settled>,
    generation: u64,
}

impl WriteQueue {
    /// Starts the writer on the current Tokio runtime.
    pub(crate) fn spawn(store: Arc<dyn SettingsStore>) -> Result<Self, TryCurrentError> {
        let runtime = Handle::try_current()?;
        let (pending_tx, pending_rx) = watch::channel(None);
        let (settled_tx, settled_rx) = watch::channel(Settled::default());
        runtime.spawn(run_writer(store, pending_rx, settled_tx));
        Ok(Self {
            pending: pending_tx,
            settled: settled_rx,
            generation: 0,
        })
    }

    pub(crate) fn submit(&mut self, settings: Settings) -> u64 {
        self.generation += 1;
        let generation = self.generation;
        self.pending.send_replace(Some(Pending {
            generation,
            settings,
        }));
        generation
    }

    pub(crate) fn status(&self) -> PersistStatus {
        let settled = self.settled.borrow();
        PersistStatus {
            submitted: self.generation,
            settled: settled.generation,
            failure: settled.failure.clone(),
        }
    }

    /// Waits until everything submitted so far has been settled and returns
    /// the failure of the last settled save, if any.
    pub(crate) async fn flush(&self) -> Result<(), String> {
        let target = self.generation;
        let mut settled = self.settled.clone();
        let reached = settled
            .wait_for(|state| state.generation >= target)
            .await
            .map_err(|_| "settings writer stopped before saving".to_string())?;
        match &reached.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

async fn run_writer(
    store: Arc<dyn SettingsStore>,
    mut pending: watch::Receiver<Option<Pending>>,
    settled: watch::Sender<Settled>,
) {
    // Still yields the last unseen snapshot after the sender is dropped.
    while pending.changed().await.is_ok() {
        let next = pending.borrow_and_update().clone();
        let Some(next) = next else {
            continue;
        };
        let failure = match store.save(&next.settings).await {
            Ok(()) => {
                debug!(generation = next.generation, "settings persisted");
                None
            }
            Err(err) => {
                warn!(generation = next.generation, error = %err, "failed to persist settings");
                Some(err.to_string())
            }
        };
        settled.send_replace(Settled {
            generation: next.generation,
            failure,
        });
    }
    debug!("settings write queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::CustomFunction;
    use crate::store::MemoryStore;

    #[test]
    fn spawning_outside_a_runtime_is_an_error() {
        assert!(WriteQueue::spawn(Arc::new(MemoryStore::default())).is_err());
    }

    #[tokio::test]
    async fn flush_without_submissions_returns_immediately() {
        let queue = WriteQueue::spawn(Arc::new(MemoryStore::default())).unwrap();
        queue.flush().await.unwrap();
        assert!(queue.status().is_idle());
    }

    #[tokio::test]
    async fn queued_snapshots_coalesce_into_the_latest() {
        let store = Arc::new(MemoryStore::default());
        let mut queue = WriteQueue::spawn(store.clone()).unwrap();

        for idx in 0..4 {
            let functions = (0..=idx)
                .map(|n| CustomFunction::new(format!("f{n}"), "x"))
                .collect();
            queue.submit(Settings::new(functions, false));
        }
        queue.flush().await.unwrap();

        let status = queue.status();
        assert_eq!(status.submitted, 4);
        assert_eq!(status.settled, 4);
        assert_eq!(store.snapshot().unwrap().custom_functions.len(), 4);
        // Nothing ran between submissions on this runtime, so one save covered all four.
        assert_eq!(store.save_count().unwrap(), 1);
    }

    #[tokio::test]
    async fn dropping_the_queue_still_writes_the_pending_snapshot() {
        let store = Arc::new(MemoryStore::default());
        {
            let mut queue = WriteQueue::spawn(store.clone()).unwrap();
            queue.submit(Settings::new(Vec::new(), true));
        }
        for _ in 0..16 {
            if store.save_count().unwrap() == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(store.snapshot().unwrap().highlight_text);
    }
}
