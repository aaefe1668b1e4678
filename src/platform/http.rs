use anyhow::{anyhow, Context};
use futures::future::BoxFuture;
use futures::StreamExt;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use reqwest::{header, Client, Response};
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{
    DataUri, DownloadId, DownloadItem, DownloadPlatform, DownloadRequest, FilenameSuggestion,
    NamingRequest, Referer,
};
use crate::correlator::UNTITLED_PLACEHOLDER;
use crate::error::Result;
use crate::utils::{
    fallback_filename, filename_from_url, get_unique_filepath, relative_destination, short_url,
};

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Where the bytes of an accepted download come from.
enum Source {
    Http(Response),
    Inline(DataUri),
}

impl Source {
    fn default_name(&self, url: &str) -> String {
        match self {
            Source::Http(response) => filename_from_url(response.url().as_str())
                .or_else(|| filename_from_url(url))
                .unwrap_or_else(fallback_filename),
            Source::Inline(data) => format!("{}.{}", UNTITLED_PLACEHOLDER, data.extension()),
        }
    }
}

/// Saves files under `output_dir` over HTTP(S), or straight from `data:` URLs.
pub struct HttpPlatform {
    client: Client,
    output_dir: PathBuf,
    multi_progress: MultiProgress,
    rate_limiter: Option<Arc<Limiter>>,
    referer: Referer,
    naming_tx: mpsc::Sender<NamingRequest>,
    next_id: AtomicU64,
    transfers: Mutex<Vec<JoinHandle<()>>>,
}

impl HttpPlatform {
    pub fn new(
        client: Client,
        output_dir: PathBuf,
        rate_limit_bytes_per_sec: Option<u32>,
        referer: Referer,
        naming_tx: mpsc::Sender<NamingRequest>,
    ) -> Self {
        let multi_progress = MultiProgress::new();
        multi_progress.set_draw_target(ProgressDrawTarget::stderr_with_hz(5));

        let rate_limiter = rate_limit_bytes_per_sec
            .and_then(NonZeroU32::new)
            .map(|limit| Arc::new(RateLimiter::direct(Quota::per_second(limit))));

        Self {
            client,
            output_dir,
            multi_progress,
            rate_limiter,
            referer,
            naming_tx,
            next_id: AtomicU64::new(0),
            transfers: Mutex::new(Vec::new()),
        }
    }

    /// Waits for every spawned transfer, including ones started meanwhile.
    pub async fn wait_idle(&self) {
        loop {
            let handles = match self.transfers.lock() {
                Ok(mut guard) => std::mem::take(&mut *guard),
                Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                if let Err(e) = handle.await {
                    warn!(error = %e, "transfer task panicked");
                }
            }
        }
    }

    async fn open(&self, url: &str) -> Result<Source> {
        if DataUri::is_data_uri(url) {
            return Ok(Source::Inline(DataUri::parse(url)?));
        }
        let mut request = self.client.get(url);
        if let Some(referer) = self.referer.get() {
            request = request.header(header::REFERER, referer);
        }
        let response = request.send().await?.error_for_status()?;
        Ok(Source::Http(response))
    }

    fn track(&self, handle: JoinHandle<()>) {
        match self.transfers.lock() {
            Ok(mut guard) => guard.push(handle),
            Err(poisoned) => poisoned.into_inner().push(handle),
        }
    }
}

impl DownloadPlatform for HttpPlatform {
    fn download(&self, request: DownloadRequest) -> BoxFuture<'_, Option<DownloadId>> {
        Box::pin(async move {
            let source = match self.open(&request.url).await {
                Ok(source) => source,
                Err(e) => {
                    warn!(url = short_url(&request.url), error = %e, "download refused");
                    return None;
                }
            };

            let id = DownloadId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
            let default_name = request
                .filename
                .clone()
                .unwrap_or_else(|| source.default_name(&request.url));

            let (reply, answer) = oneshot::channel();
            let event = NamingRequest {
                id,
                item: DownloadItem {
                    filename: default_name.clone(),
                },
                reply,
            };
            if self.naming_tx.send(event).await.is_err() {
                debug!(%id, "no naming listener, keeping default name");
            }

            let transfer = Transfer {
                id,
                output_dir: self.output_dir.clone(),
                multi_progress: self.multi_progress.clone(),
                rate_limiter: self.rate_limiter.clone(),
            };
            self.track(tokio::spawn(transfer.run(source, default_name, answer)));
            debug!(%id, url = short_url(&request.url), "download accepted");
            Some(id)
        })
    }
}

struct Transfer {
    id: DownloadId,
    output_dir: PathBuf,
    multi_progress: MultiProgress,
    rate_limiter: Option<Arc<Limiter>>,
}

impl Transfer {
    async fn run(
        self,
        source: Source,
        default_name: String,
        answer: oneshot::Receiver<Option<FilenameSuggestion>>,
    ) {
        let name = match answer.await {
            Ok(Some(suggestion)) => suggestion.filename,
            _ => default_name,
        };
        match self.save(source, &name).await {
            Ok(path) => info!(id = %self.id, path = %path.display(), "saved"),
            Err(e) => warn!(id = %self.id, name = %name, error = %e, "transfer failed"),
        }
    }

    async fn save(&self, source: Source, name: &str) -> anyhow::Result<PathBuf> {
        let target = relative_destination(&self.output_dir, name)
            .or_else(|| relative_destination(&self.output_dir, &fallback_filename()))
            .ok_or_else(|| anyhow!("no usable filename in {:?}", name))?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .context("Failed to create destination directory")?;
        }
        let filepath = get_unique_filepath(target);
        let part_filepath = part_path(&filepath);

        match source {
            Source::Inline(data) => {
                fs::write(&part_filepath, &data.bytes)
                    .await
                    .context("Failed to write inline payload")?;
            }
            Source::Http(response) => self.stream(response, &filepath, &part_filepath).await?,
        }

        fs::rename(&part_filepath, &filepath)
            .await
            .context("Failed to rename partial file")?;
        Ok(filepath)
    }

    async fn stream(&self, response: Response, filepath: &Path, part_filepath: &Path) -> anyhow::Result<()> {
        let pb = self
            .multi_progress
            .add(ProgressBar::new(response.content_length().unwrap_or(0)));
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes:>12}/{total_bytes:<12} {bytes_per_sec:>12} {msg}")?
                .progress_chars("=>-"),
        );
        let label = filepath
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        pb.set_message(format!("Downloading {}", label));

        let mut file = File::create(part_filepath)
            .await
            .context("Failed to open partial file")?;
        let mut stream = response.bytes_stream();

        while let Some(item) = stream.next().await {
            let chunk = item.context("Error while downloading chunk")?;
            if chunk.is_empty() {
                continue;
            }
            if let Some(limiter) = &self.rate_limiter {
                if let Some(n) = NonZeroU32::new(chunk.len() as u32) {
                    // a chunk larger than the per-second quota can never be admitted
                    if limiter.until_n_ready(n).await.is_err() {
                        limiter.until_ready().await;
                    }
                }
            }
            file.write_all(&chunk)
                .await
                .context("Error while writing to file")?;
            pb.inc(chunk.len() as u64);
        }

        file.flush().await.context("Failed to flush file")?;
        pb.finish_with_message(format!("Completed   {}", label));
        Ok(())
    }
}

fn part_path(filepath: &Path) -> PathBuf {
    let mut part = filepath.as_os_str().to_owned();
    part.push(".part");
    PathBuf::from(part)
}
