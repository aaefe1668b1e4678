use percent_encoding::percent_decode_str;
use std::path::{Component, Path, PathBuf};
use url::Url;

/// Last non-empty path segment of `url_str`, percent-decoded.
pub fn filename_from_url(url_str: &str) -> Option<String> {
    let url = Url::parse(url_str).ok()?;
    let segment = url.path_segments()?.last()?;
    if segment.is_empty() {
        return None;
    }
    let decoded = percent_decode_str(segment).decode_utf8_lossy().into_owned();
    Some(decoded)
}

pub fn fallback_filename() -> String {
    format!("download_{}", uuid::Uuid::new_v4())
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(
        |c: char| c.is_control() || matches!(c, '<' | '>' | ':' | '"' | '|' | '?' | '*' | '\\'),
        "_",
    )
}

/// Turns a `/`-separated relative name into a path under `dir`.
///
/// Each component is sanitized; `.`, `..`, empty and root components are
/// dropped so the result never escapes `dir`.
pub fn relative_destination(dir: &Path, name: &str) -> Option<PathBuf> {
    let mut path = dir.to_path_buf();
    let mut pushed = false;
    for part in name.split('/') {
        let clean = sanitize_filename(part.trim());
        if clean.is_empty() {
            continue;
        }
        match Path::new(&clean).components().next() {
            Some(Component::Normal(_)) => {
                path.push(&clean);
                pushed = true;
            }
            _ => continue,
        }
    }
    pushed.then_some(path)
}

/// `path` itself if free, otherwise `stem_1.ext`, `stem_2.ext`, ...
pub fn get_unique_filepath(path: PathBuf) -> PathBuf {
    if !path.exists() {
        return path;
    }
    let dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().into_owned())
        .unwrap_or_default();

    let mut counter = 1;
    loop {
        let candidate = if extension.is_empty() {
            dir.join(format!("{}_{}", stem, counter))
        } else {
            dir.join(format!("{}_{}.{}", stem, counter, extension))
        };
        if !candidate.exists() {
            return candidate;
        }
        counter += 1;
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Shortens data URIs for log lines.
pub fn short_url(url: &str) -> &str {
    match url.char_indices().nth(96) {
        Some((idx, _)) => &url[..idx],
        None => url,
    }
}
