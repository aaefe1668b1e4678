use futures::future::BoxFuture;
use futures::StreamExt;
use image::ImageReader;
use reqwest::{header, Client};
use std::io::Cursor;
use std::time::Duration;
use tracing::{debug, trace};

use crate::platform::{DataUri, Referer};
use crate::utils::short_url;

/// Hard ceiling on a single probe.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// Bytes read before giving up on finding a decodable header.
pub const HEADER_BUDGET: usize = 256 * 1024;

/// Enough leading bytes for every enabled format's signature.
const SIGNATURE_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Finds the natural pixel size of an image. `None` when it cannot be
/// loaded, is not an image, or takes longer than the prober's timeout.
pub trait ImageProber: Send + Sync {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Option<Dimensions>>;
}

pub fn dimensions_from_bytes(bytes: &[u8]) -> Option<Dimensions> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()?;
    Some(Dimensions { width, height })
}

/// Fetches images just far enough to decode their header.
pub struct HttpProber {
    client: Client,
    timeout: Duration,
    referer: Referer,
}

impl HttpProber {
    pub fn new(client: Client, referer: Referer) -> Self {
        Self {
            client,
            timeout: PROBE_TIMEOUT,
            referer,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn load(&self, url: &str) -> Option<Dimensions> {
        if DataUri::is_data_uri(url) {
            let data = DataUri::parse(url).ok()?;
            return dimensions_from_bytes(&data.bytes);
        }

        let mut request = self.client.get(url);
        if let Some(referer) = self.referer.get() {
            request = request.header(header::REFERER, referer);
        }
        let response = request.send().await.ok()?.error_for_status().ok()?;

        let mut buffer = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            buffer.extend_from_slice(&chunk.ok()?);
            if buffer.len() < SIGNATURE_LEN {
                continue;
            }
            if image::guess_format(&buffer).is_err() {
                debug!(url = short_url(url), "not an image");
                return None;
            }
            if let Some(dims) = dimensions_from_bytes(&buffer) {
                trace!(url = short_url(url), bytes = buffer.len(), "header decoded");
                return Some(dims);
            }
            if buffer.len() >= HEADER_BUDGET {
                debug!(url = short_url(url), bytes = buffer.len(), "no header within budget");
                return None;
            }
        }
        dimensions_from_bytes(&buffer)
    }
}

impl ImageProber for HttpProber {
    fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Option<Dimensions>> {
        Box::pin(async move {
            // dropping the load future on timeout closes its connection and timer
            match tokio::time::timeout(self.timeout, self.load(url)).await {
                Ok(dims) => dims,
                Err(_) => {
                    debug!(url = short_url(url), "probe timed out");
                    None
                }
            }
        })
    }
}
