//! Answers the platform's "name this file" events.
//!
//! Events arrive on their own channel, decoupled from the orchestrator's
//! await chain, so the correlator can run while the orchestrator is parked
//! on a later download. It reads the current-batch slot and the task's own
//! ledger and holds no other state; handling one event is safe from any
//! task at any time.

use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::config::BatchOptions;
use crate::platform::{DownloadItem, FilenameSuggestion, NamingRequest};
use crate::task::{Advance, CurrentBatch};
use crate::utils::now_millis;

/// Name the platform gives inline payloads that carry no filename.
pub const UNTITLED_PLACEHOLDER: &str = "Без названия";

pub struct FilenameCorrelator {
    batch: CurrentBatch,
}

impl FilenameCorrelator {
    pub fn new(batch: CurrentBatch) -> Self {
        Self { batch }
    }

    /// Serves naming events until every sender is gone.
    pub async fn run(self, mut events: mpsc::Receiver<NamingRequest>) {
        while let Some(event) = events.recv().await {
            let suggestion = self.suggest(&event.item);
            trace!(id = %event.id, ?suggestion, "naming event");
            if event.reply.send(suggestion).is_err() {
                debug!(id = %event.id, "download went away before it was named");
            }
        }
    }

    /// Computes the name for `item` and acknowledges one event on the live
    /// task. `None` (platform default) when no batch is live.
    pub fn suggest(&self, item: &DownloadItem) -> Option<FilenameSuggestion> {
        let task = self.batch.current()?;
        let total_images = task.images().len();
        let (filename, advance) = task.advance_with(|processed| {
            compute_filename(
                &item.filename,
                task.options(),
                processed + 1,
                total_images,
                now_millis(),
            )
        })?;
        if advance == Advance::Retired {
            debug!(images = total_images, "batch fully named");
        }
        Some(FilenameSuggestion { filename })
    }
}

/// Destination name for the `sequence`-th (1-based) file of a batch of
/// `total_images`.
pub fn compute_filename(
    default_name: &str,
    options: &BatchOptions,
    sequence: usize,
    total_images: usize,
    now_ms: i64,
) -> String {
    let mut name = String::new();

    if !options.folder_name.is_empty() {
        name.push_str(&options.folder_name);
        name.push('/');
    }

    if !options.new_file_name.is_empty() {
        let width = total_images.to_string().len();
        name.push_str(&format!(
            "{}{:0width$}",
            options.new_file_name,
            sequence,
            width = width
        ));
        match extension(default_name) {
            Some(ext) => {
                name.push('.');
                name.push_str(ext);
            }
            None => warn!(default_name, "no extension to carry over"),
        }
    } else if is_untitled_csv(default_name) {
        name.push_str(&format!("{}.csv", now_ms));
    } else {
        name.push_str(default_name);
    }

    normalize_slashes(&name)
}

fn is_untitled_csv(name: &str) -> bool {
    name.strip_suffix(".csv") == Some(UNTITLED_PLACEHOLDER)
}

fn extension(filename: &str) -> Option<&str> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext)
        .filter(|ext| !ext.is_empty())
}

/// Backslashes become `/`, runs of `/` collapse to one.
pub fn normalize_slashes(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars().map(|c| if c == '\\' { '/' } else { c }) {
        if c == '/' && out.ends_with('/') {
            continue;
        }
        out.push(c);
    }
    out
}
