use std::collections::HashSet;

/// Strips the query string: everything from the first `?` on.
pub fn dedup_key(url: &str) -> &str {
    match url.split_once('?') {
        Some((key, _)) => key,
        None => url,
    }
}

/// URLs already handed to a batch during this process' lifetime.
///
/// Keys are never evicted. Not synchronized; owners wrap it in a lock.
#[derive(Debug, Default)]
pub struct DedupTracker {
    seen: HashSet<String>,
}

impl DedupTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_process(&self, url: &str) -> bool {
        !self.seen.contains(dedup_key(url))
    }

    pub fn mark_processed(&mut self, url: &str) {
        self.seen.insert(dedup_key(url).to_string());
    }

    /// Undoes `mark_processed` for a URL that never reached a batch.
    pub fn forget(&mut self, url: &str) {
        self.seen.remove(dedup_key(url));
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }
}
