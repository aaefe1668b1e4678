use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("a batch is already in progress ({outstanding} event(s) outstanding)")]
    AlreadyActive { outstanding: usize },

    #[error("config error: {0}")]
    Config(String),

    #[error("scan of {url} failed: {reason}")]
    Scan { url: String, reason: String },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("malformed data URI: {0}")]
    DataUri(String),
}

pub type Result<T> = std::result::Result<T, Error>;
