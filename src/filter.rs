//! URL-pattern and pixel-size filtering of candidate images.

use futures::future::join_all;
use regex::Regex;
use tracing::debug;

use crate::cli::FilterMode;
use crate::config::Options;
use crate::probe::{Dimensions, ImageProber};

/// `normal` mode: every whitespace-separated term must be a substring of
/// `url`, except `-term`, which must not be. A bare `-` is ignored.
pub fn matches_terms(url: &str, filter: &str) -> bool {
    filter.split_whitespace().all(|term| match term.strip_prefix('-') {
        Some("") => true,
        Some(excluded) => !url.contains(excluded),
        None => url.contains(term),
    })
}

/// Turns a wildcard filter into a regex.
///
/// Regex metacharacters other than `?`, `*` and `+` are escaped; then only
/// the first of `?`, `*` or `+` gets a `.` in front of it. Later ones keep
/// their regex meaning.
pub fn wildcard_to_regex(filter: &str) -> String {
    let mut out = String::with_capacity(filter.len() * 2);
    let mut rewritten = false;
    for c in filter.chars() {
        match c {
            '.' | '^' | '$' | '[' | ']' | '\\' | '(' | ')' | '{' | '}' | '|' | '-' => {
                out.push('\\');
                out.push(c);
            }
            '?' | '*' | '+' if !rewritten => {
                rewritten = true;
                out.push('.');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Applies the URL stage, keeping order. An empty filter passes everything;
/// a pattern that does not compile passes nothing.
pub fn filter_urls(urls: Vec<String>, filter: &str, mode: FilterMode) -> Vec<String> {
    if filter.is_empty() {
        return urls;
    }
    match mode {
        FilterMode::Normal => urls
            .into_iter()
            .filter(|url| matches_terms(url, filter))
            .collect(),
        FilterMode::Wildcard => filter_by_pattern(urls, &wildcard_to_regex(filter)),
        FilterMode::Regex => filter_by_pattern(urls, filter),
    }
}

fn filter_by_pattern(urls: Vec<String>, pattern: &str) -> Vec<String> {
    match Regex::new(pattern) {
        Ok(re) => urls.into_iter().filter(|url| re.is_match(url)).collect(),
        Err(e) => {
            debug!(pattern, error = %e, "invalid url filter, rejecting all");
            Vec::new()
        }
    }
}

/// Checks probed dimensions against the enabled bounds. Unprobeable images fail.
pub fn dimensions_pass(dims: Option<Dimensions>, options: &Options) -> bool {
    let Some(Dimensions { width, height }) = dims else {
        return false;
    };
    (!options.filter_min_width_enabled || options.filter_min_width <= width)
        && (!options.filter_max_width_enabled || width <= options.filter_max_width)
        && (!options.filter_min_height_enabled || options.filter_min_height <= height)
        && (!options.filter_max_height_enabled || height <= options.filter_max_height)
}

/// Full pipeline: URL stage, then every survivor probed concurrently and
/// checked against the size bounds. Order is preserved.
pub async fn filter_images<P>(urls: Vec<String>, options: &Options, prober: &P) -> Vec<String>
where
    P: ImageProber + ?Sized,
{
    let candidates = filter_urls(urls, &options.filter_url, options.filter_url_mode);
    let probes = join_all(candidates.iter().map(|url| prober.probe(url))).await;

    let accepted: Vec<String> = candidates
        .into_iter()
        .zip(probes)
        .filter(|(_, dims)| dimensions_pass(*dims, options))
        .map(|(url, _)| url)
        .collect();
    debug!(accepted = accepted.len(), "filter pipeline done");
    accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers from a fixed table; unknown URLs fail to load.
    struct TableProber {
        sizes: HashMap<String, Dimensions>,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    impl TableProber {
        fn new(entries: &[(&str, u32, u32)]) -> Self {
            let sizes = entries
                .iter()
                .map(|(u, w, h)| (u.to_string(), Dimensions { width: *w, height: *h }))
                .collect();
            Self {
                sizes,
                in_flight: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
            }
        }
    }

    impl ImageProber for TableProber {
        fn probe<'a>(&'a self, url: &'a str) -> BoxFuture<'a, Option<Dimensions>> {
            Box::pin(async move {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                self.sizes.get(url).copied()
            })
        }
    }

    fn urls(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn normal_mode_positive_and_negative_terms() {
        let out = filter_urls(
            urls(&["a-cat.png", "cat-thumb.png", "dog.png"]),
            "cat -thumb",
            FilterMode::Normal,
        );
        assert_eq!(out, ["a-cat.png"]);
    }

    #[test]
    fn normal_mode_edge_terms() {
        let all = urls(&["a.png", "b.jpg"]);
        assert_eq!(filter_urls(all.clone(), "", FilterMode::Normal), all);
        assert_eq!(filter_urls(all.clone(), "   ", FilterMode::Normal), all);
        assert_eq!(filter_urls(all.clone(), "- png", FilterMode::Normal), ["a.png"]);
        assert_eq!(filter_urls(all, "-png  -jpg", FilterMode::Normal), Vec::<String>::new());
    }

    #[test]
    fn wildcard_rewrites_only_first_special() {
        assert_eq!(wildcard_to_regex("img*v2?"), "img.*v2?");
        assert_eq!(wildcard_to_regex("a?b*c+"), "a.?b*c+");
        assert_eq!(wildcard_to_regex("x.png|y-z"), r"x\.png\|y\-z");

        let out = filter_urls(
            urls(&["img123v2?ok", "image.png", "imgv"]),
            "img*v2?",
            FilterMode::Wildcard,
        );
        // the trailing `?` stays a quantifier, so "imgv" needs no "2"
        assert_eq!(out, ["img123v2?ok", "imgv"]);
    }

    #[test]
    fn wildcard_dot_is_literal() {
        let out = filter_urls(
            urls(&["https://x/a.png", "https://x/apng"]),
            "*a.png",
            FilterMode::Wildcard,
        );
        assert_eq!(out, ["https://x/a.png"]);
    }

    #[test]
    fn regex_mode_and_malformed_pattern() {
        let all = urls(&["https://x/a1.png", "https://x/b.gif"]);
        assert_eq!(
            filter_urls(all.clone(), r"\d\.png$", FilterMode::Regex),
            ["https://x/a1.png"]
        );
        assert!(filter_urls(all, "(unclosed", FilterMode::Regex).is_empty());
    }

    #[test]
    fn bounds_only_apply_when_enabled() {
        let small = Some(Dimensions {
            width: 50,
            height: 50,
        });
        let mut options = Options {
            filter_min_width: 100,
            ..Options::default()
        };
        assert!(dimensions_pass(small, &options));
        options.filter_min_width_enabled = true;
        assert!(!dimensions_pass(small, &options));

        options.filter_min_width_enabled = false;
        options.filter_max_height = 40;
        options.filter_max_height_enabled = true;
        assert!(!dimensions_pass(small, &options));
        assert!(!dimensions_pass(None, &Options::default()));
    }

    #[test]
    fn inverted_bounds_reject_everything() {
        let options = Options {
            filter_min_width: 500,
            filter_min_width_enabled: true,
            filter_max_width: 100,
            filter_max_width_enabled: true,
            ..Options::default()
        };
        for w in [50, 100, 300, 500, 900] {
            let dims = Some(Dimensions { width: w, height: 1 });
            assert!(!dimensions_pass(dims, &options));
        }
    }

    #[tokio::test]
    async fn pipeline_probes_concurrently_and_keeps_order() {
        let prober = TableProber::new(&[
            ("https://x/big.jpg", 800, 600),
            ("https://x/tiny.jpg", 16, 16),
            ("https://x/big-thumb.jpg", 800, 600),
            ("https://x/also-big.jpg", 1024, 768),
        ]);
        let options = Options {
            filter_url: "-thumb".into(),
            filter_min_width: 100,
            filter_min_width_enabled: true,
            ..Options::default()
        };
        let input = urls(&[
            "https://x/big.jpg",
            "https://x/tiny.jpg",
            "https://x/broken.jpg",
            "https://x/big-thumb.jpg",
            "https://x/also-big.jpg",
        ]);

        let out = filter_images(input, &options, &prober).await;
        assert_eq!(out, ["https://x/big.jpg", "https://x/also-big.jpg"]);
        // thumb was removed by the url stage; the other four were probed together
        assert_eq!(prober.peak.load(Ordering::SeqCst), 4);
    }
}
