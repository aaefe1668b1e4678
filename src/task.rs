//! Batch bookkeeping shared by the orchestrator and the filename correlator.

use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::config::BatchOptions;
use crate::error::{Error, Result};

/// Outcome of one progress acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Pending { processed: usize, total: usize },
    Retired,
}

/// One download batch: its images, its frozen options and a progress ledger.
///
/// The ledger expects one acknowledgment per image plus one for the trailing
/// manifest. When the count reaches that total the task retires; after that
/// it refuses further acknowledgments.
#[derive(Debug)]
pub struct Task {
    images: Vec<String>,
    options: BatchOptions,
    processed: Mutex<usize>,
    retired_tx: watch::Sender<bool>,
}

impl Task {
    pub fn new(images: Vec<String>, options: BatchOptions) -> Self {
        let (retired_tx, _) = watch::channel(false);
        Self {
            images,
            options,
            processed: Mutex::new(0),
            retired_tx,
        }
    }

    pub fn images(&self) -> &[String] {
        &self.images
    }

    pub fn options(&self) -> &BatchOptions {
        &self.options
    }

    /// Image events plus the manifest event.
    pub fn total_events(&self) -> usize {
        self.images.len() + 1
    }

    pub fn processed(&self) -> usize {
        *self.lock()
    }

    pub fn is_retired(&self) -> bool {
        *self.retired_tx.borrow()
    }

    /// Acknowledge one event.
    pub fn advance(&self) -> Option<Advance> {
        self.advance_with(|_| ()).map(|(_, advance)| advance)
    }

    /// Runs `f` with the count of events acknowledged so far, then
    /// acknowledges one more, atomically. `None` once retired.
    pub fn advance_with<T>(&self, f: impl FnOnce(usize) -> T) -> Option<(T, Advance)> {
        let mut processed = self.lock();
        let total = self.total_events();
        if *processed >= total {
            return None;
        }
        let value = f(*processed);
        *processed += 1;
        let advance = if *processed == total {
            self.retired_tx.send_replace(true);
            Advance::Retired
        } else {
            Advance::Pending {
                processed: *processed,
                total,
            }
        };
        Some((value, advance))
    }

    /// Resolves once every expected event has been acknowledged.
    pub async fn retired(&self) {
        let mut rx = self.retired_tx.subscribe();
        // the sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|retired| *retired).await;
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.processed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Single-slot reference to the batch in flight.
///
/// Cloned into the orchestrator and the correlator; only one task may be
/// installed at a time.
#[derive(Debug, Clone, Default)]
pub struct CurrentBatch {
    slot: Arc<Mutex<Option<Arc<Task>>>>,
}

impl CurrentBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, task: Arc<Task>) -> Result<()> {
        let mut slot = self.lock();
        if let Some(active) = slot.as_ref().filter(|t| !t.is_retired()) {
            return Err(Error::AlreadyActive {
                outstanding: active.total_events() - active.processed(),
            });
        }
        *slot = Some(task);
        Ok(())
    }

    /// The live task, if any. A retired task is never returned.
    pub fn current(&self) -> Option<Arc<Task>> {
        self.lock().as_ref().filter(|t| !t.is_retired()).cloned()
    }

    pub fn is_busy(&self) -> bool {
        self.current().is_some()
    }

    /// Empties the slot if it still holds `task`.
    pub fn clear(&self, task: &Arc<Task>) {
        let mut slot = self.lock();
        if slot.as_ref().is_some_and(|t| Arc::ptr_eq(t, task)) {
            *slot = None;
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Arc<Task>>> {
        self.slot
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
