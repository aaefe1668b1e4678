//! The CSV that trails every batch: one `"<filename>";"<source>";` line per image.

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use regex::Regex;
use std::sync::OnceLock;

use crate::platform::DataUri;

/// Characters `encodeURIComponent` leaves alone.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

const UNKNOWN_FILENAME: &str = "unknown";

fn path_tail() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^\\]+/([^/?]+)").expect("static regex"))
}

/// Last path component before the query string, or `"unknown"`.
pub fn display_filename(url: &str) -> String {
    path_tail()
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_FILENAME.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestRow {
    pub filename: String,
    pub source: String,
}

impl ManifestRow {
    /// `None` for inline payloads, which have no meaningful source to record.
    pub fn for_source(url: &str) -> Option<Self> {
        if DataUri::is_data_uri(url) || url.contains(";base64") {
            return None;
        }
        Some(Self {
            filename: display_filename(url),
            source: url.to_string(),
        })
    }

    fn to_line(&self) -> String {
        format!("\"{}\";\"{}\";", self.filename, self.source)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    rows: Vec<ManifestRow>,
}

impl Manifest {
    pub fn push(&mut self, row: ManifestRow) {
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Rows joined with `\n`, no header, no trailing newline.
    pub fn to_csv(&self) -> String {
        self.rows
            .iter()
            .map(ManifestRow::to_line)
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn to_data_uri(&self) -> String {
        format!(
            "data:text/csv;charset=UTF-8,{}",
            utf8_percent_encode(&self.to_csv(), COMPONENT)
        )
    }
}

pub fn manifest_filename(epoch_ms: i64) -> String {
    format!("{}.csv", epoch_ms)
}
