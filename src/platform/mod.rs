//! The download subsystem the orchestrator drives.
//!
//! A platform accepts one-file download requests and, for every request it
//! accepts, later raises exactly one naming event on the naming channel.
//! The event arrives on whatever task consumes that channel, not on the
//! caller's await chain.

mod data_uri;
mod http;

pub use data_uri::DataUri;
pub use http::HttpPlatform;

use futures::future::BoxFuture;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::oneshot;

/// Referer sent with image requests; shared so it can change while running.
#[derive(Debug, Clone, Default)]
pub struct Referer(Arc<RwLock<Option<String>>>);

impl Referer {
    pub fn new(value: Option<String>) -> Self {
        Self(Arc::new(RwLock::new(value)))
    }

    pub fn get(&self) -> Option<String> {
        match self.0.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, value: Option<String>) {
        match self.0.write() {
            Ok(mut guard) => *guard = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

/// Opaque identifier of an accepted download.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DownloadId(pub u64);

impl fmt::Display for DownloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    /// Suggested name; the platform picks one when absent.
    pub filename: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: None,
        }
    }

    pub fn with_filename(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: Some(filename.into()),
        }
    }
}

/// What the platform is about to save, as seen by the naming listener.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadItem {
    /// The platform's default name for the file.
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilenameSuggestion {
    /// Relative path under the download directory, `/`-separated.
    pub filename: String,
}

/// "Name this file" event. Replying `None`, or dropping `reply`, keeps the
/// platform default.
#[derive(Debug)]
pub struct NamingRequest {
    pub id: DownloadId,
    pub item: DownloadItem,
    pub reply: oneshot::Sender<Option<FilenameSuggestion>>,
}

pub trait DownloadPlatform: Send + Sync {
    /// Start a single-file download. `None` means the request was refused
    /// or could not be started; no naming event follows in that case.
    fn download(&self, request: DownloadRequest) -> BoxFuture<'_, Option<DownloadId>>;
}
