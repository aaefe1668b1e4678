//! Collects candidate image URLs from an HTML page.

use futures::future::BoxFuture;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::debug;
use url::Url;

use crate::error::{Error, Result};

const IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "bmp", "svg", "avif", "tif", "tiff", "ico",
];

const IMAGE_ATTRS: &[&str] = &["src", "data-src", "data-original", "data-lazy-src"];

/// Images found on one page, in document order without repeats.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PageImages {
    pub all_images: Vec<String>,
    /// Images that are link targets, or sit inside a link to an image.
    pub linked_images: Vec<String>,
}

impl PageImages {
    pub fn candidates(&self, links_only: bool) -> &[String] {
        if links_only {
            &self.linked_images
        } else {
            &self.all_images
        }
    }
}

pub trait ImageSource: Send + Sync {
    fn scan(&self) -> BoxFuture<'_, Result<PageImages>>;
}

/// Fetches a page and lists its images.
pub struct PageScanner {
    client: Client,
    page: Url,
}

impl PageScanner {
    pub fn new(client: Client, page: Url) -> Self {
        Self { client, page }
    }

    /// `scheme://host[:port]` of the page, sent as the Referer for its images.
    pub fn origin(&self) -> String {
        self.page.origin().ascii_serialization()
    }
}

impl ImageSource for PageScanner {
    fn scan(&self) -> BoxFuture<'_, Result<PageImages>> {
        Box::pin(async move {
            let response = self.client.get(self.page.clone()).send().await?;
            if !response.status().is_success() {
                return Err(Error::Scan {
                    url: self.page.to_string(),
                    reason: format!("HTTP {}", response.status()),
                });
            }
            // relative links resolve against the final URL after redirects
            let base = response.url().clone();
            let html = response.text().await?;
            let images = extract_images(&html, &base);
            debug!(
                page = %self.page,
                all = images.all_images.len(),
                linked = images.linked_images.len(),
                "page scanned"
            );
            Ok(images)
        })
    }
}

#[derive(Default)]
struct Ordered {
    seen: HashSet<String>,
    items: Vec<String>,
}

impl Ordered {
    fn push(&mut self, url: String) {
        if self.seen.insert(url.clone()) {
            self.items.push(url);
        }
    }
}

pub fn extract_images(html: &str, base: &Url) -> PageImages {
    let document = Html::parse_document(html);
    let selector_img = Selector::parse("img").expect("img selector");
    let selector_anchor = Selector::parse("a[href]").expect("anchor selector");

    let mut all = Ordered::default();
    let mut linked = Ordered::default();

    for img in document.select(&selector_img) {
        for src in image_sources(&img, base) {
            all.push(src);
        }
    }

    for anchor in document.select(&selector_anchor) {
        let Some(href) = anchor.value().attr("href").and_then(|h| resolve(base, h)) else {
            continue;
        };
        if looks_like_image_url(&href) {
            linked.push(href);
        }
        for img in anchor.select(&selector_img) {
            for src in image_sources(&img, base) {
                linked.push(src);
            }
        }
    }

    PageImages {
        all_images: all.items,
        linked_images: linked.items,
    }
}

fn image_sources(img: &ElementRef<'_>, base: &Url) -> Vec<String> {
    let element = img.value();
    let mut out: Vec<String> = IMAGE_ATTRS
        .iter()
        .filter_map(|attr| element.attr(attr))
        .filter_map(|raw| resolve(base, raw))
        .collect();
    if let Some(first) = element
        .attr("srcset")
        .and_then(|set| set.split(',').next())
        .and_then(|candidate| candidate.split_whitespace().next())
        .and_then(|raw| resolve(base, raw))
    {
        out.push(first);
    }
    out
}

fn resolve(base: &Url, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return None;
    }
    let url = base.join(raw).ok()?;
    match url.scheme() {
        "http" | "https" | "data" => Some(url.to_string()),
        _ => None,
    }
}

fn looks_like_image_url(url: &str) -> bool {
    let Ok(parsed) = Url::parse(url) else {
        return false;
    };
    if parsed.scheme() == "data" {
        return parsed.path().starts_with("image/");
    }
    parsed
        .path()
        .rsplit_once('.')
        .map(|(_, ext)| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
