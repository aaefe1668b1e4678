use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::BatchOptions;
use crate::error::Result;
use crate::manifest::{manifest_filename, Manifest, ManifestRow};
use crate::platform::{DownloadId, DownloadPlatform, DownloadRequest};
use crate::task::{CurrentBatch, Task};
use crate::utils::{now_millis, short_url};

/// Summary returned once a batch has retired.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub requested: usize,
    pub failed: usize,
    pub manifest_rows: usize,
    pub manifest_saved: bool,
}

/// Runs batches one image at a time and ends each with a CSV manifest.
pub struct Orchestrator<D> {
    platform: Arc<D>,
    batch: CurrentBatch,
}

impl<D: DownloadPlatform> Orchestrator<D> {
    pub fn new(platform: Arc<D>, batch: CurrentBatch) -> Self {
        Self { platform, batch }
    }

    pub fn is_busy(&self) -> bool {
        self.batch.is_busy()
    }

    /// Downloads `urls` in order, then the manifest, and resolves when the
    /// task has seen one acknowledgment per image plus one for the manifest.
    ///
    /// Accepted downloads are acknowledged by the naming side; refused ones
    /// are acknowledged here. Fails only when another batch is still live.
    pub async fn start_batch(&self, urls: Vec<String>, options: BatchOptions) -> Result<BatchReport> {
        let task = Arc::new(Task::new(urls, options));
        self.batch.install(Arc::clone(&task))?;
        info!(images = task.images().len(), "batch started");

        let mut manifest = Manifest::default();
        let mut failed = 0;

        for url in task.images() {
            match self.platform.download(DownloadRequest::new(url.as_str())).await {
                Some(id) => debug!(%id, url = short_url(url), "image accepted"),
                None => {
                    warn!(url = short_url(url), "image download failed, skipping");
                    failed += 1;
                    task.advance();
                }
            }
            if let Some(row) = ManifestRow::for_source(url) {
                manifest.push(row);
            }
        }

        let manifest_id = self.download_manifest(&manifest).await;
        if manifest_id.is_none() {
            warn!("manifest download failed");
            task.advance();
        }

        task.retired().await;
        self.batch.clear(&task);

        let report = BatchReport {
            requested: task.images().len(),
            failed,
            manifest_rows: manifest.len(),
            manifest_saved: manifest_id.is_some(),
        };
        info!(?report, "batch retired");
        Ok(report)
    }

    async fn download_manifest(&self, manifest: &Manifest) -> Option<DownloadId> {
        let request =
            DownloadRequest::with_filename(manifest.to_data_uri(), manifest_filename(now_millis()));
        self.platform.download(request).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::correlator::{FilenameCorrelator, UNTITLED_PLACEHOLDER};
    use crate::platform::{DataUri, DownloadItem, FilenameSuggestion, NamingRequest};
    use futures::future::BoxFuture;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::{mpsc, oneshot};

    /// In-memory platform: records requests, refuses listed URLs, and raises
    /// naming events through the same channel the real platform uses.
    pub(crate) struct FakePlatform {
        refuse: HashSet<String>,
        refuse_inline: bool,
        /// Name reported for inline payloads that arrive without a filename.
        manifest_default: Option<String>,
        next_id: AtomicU64,
        naming_tx: mpsc::Sender<NamingRequest>,
        pub(crate) requests: Mutex<Vec<DownloadRequest>>,
        pub(crate) saved: Arc<Mutex<Vec<(String, String)>>>,
    }

    impl FakePlatform {
        pub(crate) fn new(naming_tx: mpsc::Sender<NamingRequest>) -> Self {
            Self {
                refuse: HashSet::new(),
                refuse_inline: false,
                manifest_default: None,
                next_id: AtomicU64::new(0),
                naming_tx,
                requests: Mutex::new(Vec::new()),
                saved: Arc::new(Mutex::new(Vec::new())),
            }
        }

        pub(crate) fn refusing(mut self, urls: &[&str]) -> Self {
            self.refuse = urls.iter().map(|u| u.to_string()).collect();
            self
        }

        fn default_name(&self, request: &DownloadRequest) -> String {
            if DataUri::is_data_uri(&request.url) {
                if let Some(name) = &self.manifest_default {
                    return name.clone();
                }
            }
            request
                .filename
                .clone()
                .unwrap_or_else(|| request.url.rsplit('/').next().unwrap_or("").to_string())
        }
    }

    impl DownloadPlatform for FakePlatform {
        fn download(&self, request: DownloadRequest) -> BoxFuture<'_, Option<DownloadId>> {
            Box::pin(async move {
                self.requests.lock().unwrap().push(request.clone());
                let inline = DataUri::is_data_uri(&request.url);
                if self.refuse.contains(&request.url) || (inline && self.refuse_inline) {
                    return None;
                }
                let id = DownloadId(self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
                let default_name = self.default_name(&request);
                let (reply, answer) = oneshot::channel();
                self.naming_tx
                    .send(NamingRequest {
                        id,
                        item: DownloadItem {
                            filename: default_name.clone(),
                        },
                        reply,
                    })
                    .await
                    .ok()?;
                let saved = Arc::clone(&self.saved);
                let url = request.url.clone();
                tokio::spawn(async move {
                    // naming lands after the orchestrator has moved on
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    let name = match answer.await {
                        Ok(Some(FilenameSuggestion { filename })) => filename,
                        _ => default_name,
                    };
                    saved.lock().unwrap().push((name, url));
                });
                Some(id)
            })
        }
    }

    pub(crate) fn harness(
        build: impl FnOnce(FakePlatform) -> FakePlatform,
    ) -> (Orchestrator<FakePlatform>, Arc<FakePlatform>, CurrentBatch) {
        let (tx, rx) = mpsc::channel(16);
        let batch = CurrentBatch::new();
        tokio::spawn(FilenameCorrelator::new(batch.clone()).run(rx));
        let platform = Arc::new(build(FakePlatform::new(tx)));
        (
            Orchestrator::new(Arc::clone(&platform), batch.clone()),
            platform,
            batch,
        )
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    async fn settle(platform: &FakePlatform, expected: usize) -> Vec<(String, String)> {
        for _ in 0..100 {
            if platform.saved.lock().unwrap().len() >= expected {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        platform.saved.lock().unwrap().clone()
    }

    fn name_for(saved: &[(String, String)], url: &str) -> String {
        saved
            .iter()
            .find(|(_, u)| u == url)
            .map(|(n, _)| n.clone())
            .unwrap_or_else(|| panic!("{} was not saved", url))
    }

    #[tokio::test]
    async fn sequential_downloads_then_manifest() {
        let (orchestrator, platform, batch) = harness(|p| p);
        let report = orchestrator
            .start_batch(
                urls(&["https://x.com/a.jpg", "https://x.com/b.jpg"]),
                BatchOptions::default(),
            )
            .await
            .unwrap();

        assert_eq!(
            report,
            BatchReport {
                requested: 2,
                failed: 0,
                manifest_rows: 2,
                manifest_saved: true
            }
        );
        assert!(!batch.is_busy());

        let requests = platform.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0], DownloadRequest::new("https://x.com/a.jpg"));
        assert_eq!(requests[1], DownloadRequest::new("https://x.com/b.jpg"));
        let manifest = &requests[2];
        let csv = String::from_utf8(DataUri::parse(&manifest.url).unwrap().bytes).unwrap();
        assert_eq!(
            csv,
            "\"a.jpg\";\"https://x.com/a.jpg\";\n\"b.jpg\";\"https://x.com/b.jpg\";"
        );
        let name = manifest.filename.as_deref().unwrap();
        assert!(name.ends_with(".csv"));
        assert!(name.trim_end_matches(".csv").parse::<i64>().is_ok());

        let saved = settle(&platform, 3).await;
        assert_eq!(name_for(&saved, "https://x.com/a.jpg"), "a.jpg");
        assert_eq!(name_for(&saved, "https://x.com/b.jpg"), "b.jpg");
        assert_eq!(name_for(&saved, &manifest.url), name);
    }

    #[tokio::test]
    async fn untitled_manifest_gets_timestamp_name() {
        let untitled = format!("{}.csv", UNTITLED_PLACEHOLDER);
        let (orchestrator, platform, _) = harness(|mut p| {
            p.manifest_default = Some(untitled.clone());
            p
        });
        orchestrator
            .start_batch(urls(&["https://x.com/a.jpg"]), BatchOptions::default())
            .await
            .unwrap();
        let saved = settle(&platform, 2).await;
        let manifest_url = platform.requests.lock().unwrap()[1].url.clone();
        let manifest_name = name_for(&saved, &manifest_url);
        assert_ne!(manifest_name, untitled);
        assert!(manifest_name.trim_end_matches(".csv").parse::<i64>().is_ok());
    }

    #[tokio::test]
    async fn failures_still_retire_after_n_plus_one() {
        let (orchestrator, platform, batch) =
            harness(|p| p.refusing(&["https://x.com/bad1.jpg", "https://x.com/bad2.jpg"]));
        let report = tokio::time::timeout(
            Duration::from_secs(2),
            orchestrator.start_batch(
                urls(&[
                    "https://x.com/bad1.jpg",
                    "https://x.com/ok.jpg",
                    "https://x.com/bad2.jpg",
                ]),
                BatchOptions::default(),
            ),
        )
        .await
        .expect("batch retires")
        .unwrap();

        assert_eq!(report.failed, 2);
        // failed images are still listed in the manifest
        assert_eq!(report.manifest_rows, 3);
        assert!(!batch.is_busy());
        assert_eq!(settle(&platform, 2).await.len(), 2);
    }

    #[tokio::test]
    async fn refused_manifest_still_counts() {
        let (orchestrator, _, batch) = harness(|mut p| {
            p.refuse_inline = true;
            p
        });
        let report = tokio::time::timeout(
            Duration::from_secs(2),
            orchestrator.start_batch(urls(&["https://x.com/a.jpg"]), BatchOptions::default()),
        )
        .await
        .expect("batch retires")
        .unwrap();
        assert!(!report.manifest_saved);
        assert!(!batch.is_busy());
    }

    #[tokio::test]
    async fn template_names_follow_sequence() {
        let (orchestrator, platform, _) = harness(|p| p);
        let list: Vec<String> = (1..=12).map(|i| format!("https://x.com/{}.jpg", i)).collect();
        orchestrator
            .start_batch(
                list,
                BatchOptions {
                    folder_name: "set".into(),
                    new_file_name: "pic".into(),
                },
            )
            .await
            .unwrap();

        let saved = settle(&platform, 13).await;
        assert_eq!(name_for(&saved, "https://x.com/1.jpg"), "set/pic01.jpg");
        assert_eq!(name_for(&saved, "https://x.com/9.jpg"), "set/pic09.jpg");
        assert_eq!(name_for(&saved, "https://x.com/12.jpg"), "set/pic12.jpg");
        let manifest_url = platform.requests.lock().unwrap()[12].url.clone();
        assert_eq!(name_for(&saved, &manifest_url), "set/pic13.csv");
    }

    #[tokio::test]
    async fn second_batch_is_rejected_while_first_is_live() {
        let (orchestrator, _, batch) = harness(|p| p);
        let stuck = Arc::new(Task::new(urls(&["https://x.com/a.jpg"]), BatchOptions::default()));
        batch.install(Arc::clone(&stuck)).unwrap();

        let err = orchestrator
            .start_batch(urls(&["https://x.com/b.jpg"]), BatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::Error::AlreadyActive { .. }));
        assert!(orchestrator.is_busy());
    }

    #[tokio::test]
    async fn inline_images_are_downloaded_but_not_listed() {
        let (orchestrator, _, _) = harness(|p| p);
        let report = orchestrator
            .start_batch(
                urls(&["data:image/png;base64,AAAA", "https://x.com/a.png"]),
                BatchOptions::default(),
            )
            .await
            .unwrap();
        assert_eq!(report.manifest_rows, 1);
        assert_eq!(report.failed, 0);
    }
}
