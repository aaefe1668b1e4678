use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use percent_encoding::percent_decode_str;

use crate::error::{Error, Result};

/// A decoded `data:` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataUri {
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl DataUri {
    pub fn is_data_uri(url: &str) -> bool {
        url.get(..5)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
    }

    /// Parses `data:[<mime>][;param]*[;base64],<payload>`.
    pub fn parse(uri: &str) -> Result<Self> {
        if !Self::is_data_uri(uri) {
            return Err(Error::DataUri("missing data: scheme".into()));
        }
        let (meta, payload) = uri[5..]
            .split_once(',')
            .ok_or_else(|| Error::DataUri("missing ',' separator".into()))?;

        let mut params = meta.split(';');
        let mime = match params.next().map(str::trim) {
            Some(m) if !m.is_empty() => m.to_ascii_lowercase(),
            _ => "text/plain".to_string(),
        };
        let base64 = params.any(|p| p.trim().eq_ignore_ascii_case("base64"));

        let bytes = if base64 {
            let text = percent_decode_str(payload)
                .decode_utf8()
                .map_err(|e| Error::DataUri(e.to_string()))?;
            let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
            STANDARD
                .decode(compact)
                .map_err(|e| Error::DataUri(e.to_string()))?
        } else {
            percent_decode_str(payload).collect()
        };

        Ok(Self { mime, bytes })
    }

    /// File extension for the payload's MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime.as_str() {
            "text/csv" => "csv",
            "text/plain" => "txt",
            "text/html" => "html",
            "image/png" => "png",
            "image/jpeg" | "image/jpg" => "jpg",
            "image/gif" => "gif",
            "image/webp" => "webp",
            "image/bmp" => "bmp",
            "image/svg+xml" => "svg",
            _ => "bin",
        }
    }
}
