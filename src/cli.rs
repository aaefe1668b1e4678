use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// How `filter_url` is interpreted.
#[derive(ValueEnum, Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    /// Whitespace-separated terms, `-term` excludes.
    #[default]
    Normal,
    /// `*` and `?` globbing.
    Wildcard,
    /// Raw regular expression.
    Regex,
}
