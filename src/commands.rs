use anyhow::{bail, Context, Result};
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use url::Url;

use crate::autosave::AutoSave;
use crate::config::Options;
use crate::dedup::DedupTracker;
use crate::correlator::FilenameCorrelator;
use crate::filter::filter_images;
use crate::messages::{Message, Reply};
use crate::orchestrator::{BatchReport, Orchestrator};
use crate::platform::{HttpPlatform, Referer};
use crate::probe::HttpProber;
use crate::scanner::{ImageSource, PageImages, PageScanner};
use crate::task::CurrentBatch;

/// Everything a run needs besides its inputs.
#[derive(Debug, Clone)]
pub struct Settings {
    pub download_dir: PathBuf,
    pub options: Options,
    pub rate_limit: Option<u32>,
    pub referer: Option<String>,
    pub probe_timeout: Duration,
}

/// Wired-up platform, orchestrator and prober, with the correlator running.
struct Session {
    platform: Arc<HttpPlatform>,
    orchestrator: Arc<Orchestrator<HttpPlatform>>,
    prober: Arc<HttpProber>,
    referer: Referer,
}

fn build_client() -> Client {
    Client::builder()
        .user_agent(concat!("imgrab/", env!("CARGO_PKG_VERSION")))
        .connect_timeout(Duration::from_secs(10))
        .build()
        .unwrap_or_else(|_| Client::new())
}

impl Session {
    async fn start(settings: &Settings, referer: Option<String>) -> Result<Self> {
        if !settings.download_dir.exists() {
            fs::create_dir_all(&settings.download_dir)
                .await
                .context("Failed to create download directory")?;
        }

        let client = build_client();
        let (naming_tx, naming_rx) = mpsc::channel(64);
        let batch = CurrentBatch::new();
        tokio::spawn(FilenameCorrelator::new(batch.clone()).run(naming_rx));

        let referer = Referer::new(referer);
        let platform = Arc::new(HttpPlatform::new(
            client.clone(),
            settings.download_dir.clone(),
            settings.rate_limit,
            referer.clone(),
            naming_tx,
        ));
        let orchestrator = Arc::new(Orchestrator::new(Arc::clone(&platform), batch));
        let prober = Arc::new(
            HttpProber::new(client, referer.clone()).with_timeout(settings.probe_timeout),
        );

        Ok(Self {
            platform,
            orchestrator,
            prober,
            referer,
        })
    }

    async fn finish(&self) {
        self.platform.wait_idle().await;
    }
}

fn print_report(report: &BatchReport, download_dir: &Path) {
    println!(
        "Saved {}/{} images to {:?} (manifest: {} rows{})",
        report.requested - report.failed,
        report.requested,
        download_dir,
        report.manifest_rows,
        if report.manifest_saved { "" } else { ", not saved" }
    );
}

/// One URL per line; blank lines and `#` comments are skipped.
pub async fn read_tasks_file(input: &Path) -> Result<Vec<String>> {
    let file = fs::File::open(input)
        .await
        .with_context(|| format!("Failed to open tasks file: {:?}", input))?;
    let mut lines = BufReader::new(file).lines();
    let mut urls = Vec::new();
    while let Some(line) = lines.next_line().await? {
        let raw = line.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        urls.push(raw.to_string());
    }
    Ok(urls)
}

/// Keeps the first URL of each dedup key, in page order.
fn unique_by_key(urls: &[String]) -> Vec<String> {
    let mut seen = DedupTracker::new();
    urls.iter()
        .filter(|url| {
            let fresh = seen.should_process(url);
            if fresh {
                seen.mark_processed(url);
            }
            fresh
        })
        .cloned()
        .collect()
}

/// Download an explicit list as a single batch.
pub async fn run_batch(urls: Vec<String>, settings: &Settings) -> Result<()> {
    if urls.is_empty() {
        bail!("Nothing to download");
    }
    let session = Session::start(settings, settings.referer.clone()).await?;
    let report = session
        .orchestrator
        .start_batch(urls, settings.options.batch_options())
        .await?;
    session.finish().await;
    print_report(&report, &settings.download_dir);
    Ok(())
}

/// Scan `page` once, filter its images and download the survivors.
pub async fn run_page(page: Url, settings: &Settings) -> Result<()> {
    let client = build_client();
    let scanner = PageScanner::new(client, page);
    let referer = settings.referer.clone().or_else(|| Some(scanner.origin()));
    let session = Session::start(settings, referer).await?;

    let images = scanner.scan().await?;
    let candidates = unique_by_key(images.candidates(settings.options.only_images_from_links));
    let total = candidates.len();
    let accepted = filter_images(candidates, &settings.options, session.prober.as_ref()).await;
    println!("{} of {} images passed the filters", accepted.len(), total);
    if accepted.is_empty() {
        return Ok(());
    }

    let report = session
        .orchestrator
        .start_batch(accepted, settings.options.batch_options())
        .await?;
    session.finish().await;
    print_report(&report, &settings.download_dir);
    Ok(())
}

/// Auto-save loop over `page` until Ctrl-C (or SIGTERM in daemon mode).
pub async fn run_watch(page: Url, settings: &Settings, daemon: bool) -> Result<()> {
    let mut options = settings.options.clone();
    if !options.enable_auto_save {
        info!("enabling auto-save for watch mode");
        options.enable_auto_save = true;
    }

    let scanner = Arc::new(PageScanner::new(build_client(), page));
    let referer = settings.referer.clone().or_else(|| Some(scanner.origin()));
    let session = Session::start(settings, referer).await?;

    let autosave = Arc::new(AutoSave::new(
        Arc::clone(&session.orchestrator),
        Arc::clone(&session.prober),
        options,
    ));
    autosave.run(scanner).await;
    session.finish().await;

    #[cfg(unix)]
    if daemon {
        crate::daemon::cleanup_pid_file(&settings.download_dir);
    }
    #[cfg(not(unix))]
    let _ = daemon;
    Ok(())
}

/// Serve JSON messages from stdin, one per line, replying on stdout.
pub async fn run_listen(settings: &Settings) -> Result<()> {
    let session = Session::start(settings, settings.referer.clone()).await?;
    let autosave = Arc::new(AutoSave::new(
        Arc::clone(&session.orchestrator),
        Arc::clone(&session.prober),
        settings.options.clone(),
    ));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut handlers = Vec::new();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let message = match Message::parse(&line) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "unreadable message skipped");
                continue;
            }
        };

        let orchestrator = Arc::clone(&session.orchestrator);
        let autosave = Arc::clone(&autosave);
        match message {
            Message::DownloadImages {
                images_to_download,
                options,
            } => handlers.push(tokio::spawn(async move {
                let reply = match orchestrator.start_batch(images_to_download, options).await {
                    Ok(report) => Reply::BatchDone { report },
                    Err(e) => Reply::Error {
                        message: e.to_string(),
                    },
                };
                emit(&reply);
            })),
            Message::SendImages {
                all_images,
                linked_images,
            } => handlers.push(tokio::spawn(async move {
                let result = autosave
                    .on_images(PageImages::from((all_images, linked_images)))
                    .await;
                emit(&Reply::AutoSave { result });
            })),
            // applied in line so every later message already sees the new origin
            Message::SetActiveTabOrigin { origin } => emit(&set_origin(&session.referer, &origin)),
        }
    }

    for handler in handlers {
        if let Err(e) = handler.await {
            warn!(error = %e, "message handler panicked");
        }
    }
    session.finish().await;
    Ok(())
}

/// An empty origin stops sending a Referer.
fn set_origin(referer: &Referer, origin: &str) -> Reply {
    let origin = origin.trim();
    if origin.is_empty() {
        referer.set(None);
    } else {
        referer.set(Some(origin.to_string()));
    }
    info!(origin, "referer updated");
    Reply::RefererSet {
        referer: origin.to_string(),
    }
}

fn emit(reply: &Reply) {
    match serde_json::to_string(reply) {
        Ok(line) => println!("{}", line),
        Err(e) => warn!(error = %e, "could not encode reply"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn tasks_file_skips_blanks_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("urls.txt");
        std::fs::write(
            &path,
            "https://x/a.jpg\n\n  # gallery two\n  https://x/b.jpg  \n",
        )
        .unwrap();
        let urls = read_tasks_file(&path).await.unwrap();
        assert_eq!(urls, ["https://x/a.jpg", "https://x/b.jpg"]);
    }

    #[test]
    fn page_candidates_collapse_query_variants() {
        let urls: Vec<String> = [
            "https://x/a.jpg?w=200",
            "https://x/b.jpg",
            "https://x/a.jpg?w=800",
            "https://x/a.jpg",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        assert_eq!(unique_by_key(&urls), ["https://x/a.jpg?w=200", "https://x/b.jpg"]);
    }

    #[test]
    fn active_tab_origin_updates_shared_referer() {
        let referer = Referer::new(Some("https://old.example".into()));
        let prober_side = referer.clone();

        let reply = set_origin(&referer, " https://gallery.example ");
        assert_eq!(prober_side.get().as_deref(), Some("https://gallery.example"));
        assert_eq!(
            serde_json::to_string(&reply).unwrap(),
            r#"{"type":"refererSet","referer":"https://gallery.example"}"#
        );

        set_origin(&referer, "");
        assert_eq!(prober_side.get(), None);
    }

    #[tokio::test]
    async fn missing_tasks_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(read_tasks_file(&dir.path().join("nope.txt")).await.is_err());
    }

    #[tokio::test]
    async fn inline_batch_writes_files_and_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            download_dir: dir.path().to_path_buf(),
            options: Options {
                folder_name: "set".into(),
                new_file_name: "pic".into(),
                ..Options::default()
            },
            rate_limit: None,
            referer: None,
            probe_timeout: Duration::from_secs(1),
        };
        let urls = vec![
            "data:text/plain,one".to_string(),
            "data:text/plain,two".to_string(),
        ];
        run_batch(urls, &settings).await.unwrap();

        let set = dir.path().join("set");
        assert_eq!(std::fs::read_to_string(set.join("pic1.txt")).unwrap(), "one");
        assert_eq!(std::fs::read_to_string(set.join("pic2.txt")).unwrap(), "two");
        // inline sources are not listed, so the manifest is empty
        assert_eq!(std::fs::read_to_string(set.join("pic3.csv")).unwrap(), "");
    }

    #[tokio::test]
    async fn empty_batch_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            download_dir: dir.path().to_path_buf(),
            options: Options::default(),
            rate_limit: None,
            referer: None,
            probe_timeout: Duration::from_secs(1),
        };
        assert!(run_batch(Vec::new(), &settings).await.is_err());
    }
}
