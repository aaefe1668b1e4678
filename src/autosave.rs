//! Periodic harvesting of whatever the watched page currently shows.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::{BatchOptions, Options};
use crate::dedup::DedupTracker;
use crate::error::Error;
use crate::filter::filter_images;
use crate::orchestrator::{BatchReport, Orchestrator};
use crate::platform::DownloadPlatform;
use crate::probe::ImageProber;
use crate::scanner::{ImageSource, PageImages};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Scanning,
    Filtering,
    Downloading,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum CycleOutcome {
    Disabled,
    /// Another cycle, or a manual batch, was still running.
    Busy,
    ScanFailed,
    NothingNew,
    Saved(BatchReport),
}

/// Puts the phase back to `Idle` however the cycle ends.
struct Cycle<'a> {
    phase: &'a Mutex<Phase>,
}

impl Cycle<'_> {
    fn enter(&self, next: Phase) {
        *lock(self.phase) = next;
    }
}

impl Drop for Cycle<'_> {
    fn drop(&mut self) {
        *lock(self.phase) = Phase::Idle;
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub struct AutoSave<D, P> {
    orchestrator: Arc<Orchestrator<D>>,
    prober: Arc<P>,
    options: Options,
    dedup: Mutex<DedupTracker>,
    phase: Mutex<Phase>,
}

impl<D, P> AutoSave<D, P>
where
    D: DownloadPlatform + 'static,
    P: ImageProber + 'static,
{
    pub fn new(orchestrator: Arc<Orchestrator<D>>, prober: Arc<P>, options: Options) -> Self {
        Self {
            orchestrator,
            prober,
            options,
            dedup: Mutex::new(DedupTracker::new()),
            phase: Mutex::new(Phase::Idle),
        }
    }

    pub fn phase(&self) -> Phase {
        *lock(&self.phase)
    }

    /// Claims the idle state for one cycle, entering `first`.
    fn begin(&self, first: Phase) -> Option<Cycle<'_>> {
        let mut phase = lock(&self.phase);
        if *phase != Phase::Idle || self.orchestrator.is_busy() {
            return None;
        }
        *phase = first;
        Some(Cycle { phase: &self.phase })
    }

    /// One timer tick: scan `source`, then process what it returned.
    pub async fn tick<S: ImageSource + ?Sized>(&self, source: &S) -> CycleOutcome {
        if !self.options.enable_auto_save {
            return CycleOutcome::Disabled;
        }
        let Some(cycle) = self.begin(Phase::Scanning) else {
            debug!("auto-save tick ignored, cycle in progress");
            return CycleOutcome::Busy;
        };
        match source.scan().await {
            Ok(images) => self.process(cycle, images).await,
            Err(e) => {
                warn!(error = %e, "page scan failed");
                CycleOutcome::ScanFailed
            }
        }
    }

    /// Images pushed in from outside (a `sendImages` message).
    pub async fn on_images(&self, images: PageImages) -> CycleOutcome {
        if !self.options.enable_auto_save {
            return CycleOutcome::Disabled;
        }
        let Some(cycle) = self.begin(Phase::Filtering) else {
            debug!("images ignored, cycle in progress");
            return CycleOutcome::Busy;
        };
        self.process(cycle, images).await
    }

    async fn process(&self, cycle: Cycle<'_>, images: PageImages) -> CycleOutcome {
        cycle.enter(Phase::Filtering);
        let fresh: Vec<String> = {
            let dedup = lock(&self.dedup);
            images
                .candidates(self.options.only_images_from_links)
                .iter()
                .filter(|url| dedup.should_process(url))
                .cloned()
                .collect()
        };
        if fresh.is_empty() {
            return CycleOutcome::NothingNew;
        }

        let accepted = filter_images(fresh, &self.options, self.prober.as_ref()).await;
        {
            let mut dedup = lock(&self.dedup);
            for url in &accepted {
                dedup.mark_processed(url);
            }
            debug!(tracked = dedup.len(), "dedup set updated");
        }
        if accepted.is_empty() {
            return CycleOutcome::NothingNew;
        }

        cycle.enter(Phase::Downloading);
        info!(images = accepted.len(), "auto-saving");
        let options = BatchOptions {
            folder_name: self.options.folder_name.clone(),
            new_file_name: String::new(),
        };
        match self.orchestrator.start_batch(accepted.clone(), options).await {
            Ok(report) => CycleOutcome::Saved(report),
            Err(e) => {
                match e {
                    Error::AlreadyActive { .. } => {
                        warn!("a manual batch started meanwhile, auto-save batch dropped")
                    }
                    e => warn!(error = %e, "auto-save batch failed"),
                }
                // nothing was handed over, so a later cycle must see these again
                let mut dedup = lock(&self.dedup);
                for url in &accepted {
                    dedup.forget(url);
                }
                CycleOutcome::Busy
            }
        }
    }

    /// Fires `tick` every `auto_save_interval_ms` until Ctrl-C. Each tick runs
    /// on its own task, so a slow cycle makes later ticks no-ops.
    pub async fn run<S>(self: Arc<Self>, source: Arc<S>)
    where
        S: ImageSource + 'static,
    {
        let period = Duration::from_millis(self.options.auto_save_interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(?period, "auto-save running");

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("auto-save stopped");
                    return;
                }
                _ = ticker.tick() => {
                    let this = Arc::clone(&self);
                    let source = Arc::clone(&source);
                    tokio::spawn(async move {
                        let outcome = this.tick(source.as_ref()).await;
                        if let CycleOutcome::Saved(report) = outcome {
                            info!(?report, "auto-save cycle finished");
                        }
                    });
                }
            }
        }
    }
}
