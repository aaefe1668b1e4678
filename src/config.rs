use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::cli::FilterMode;
use crate::error::{Error, Result};

/// Harvest options, persisted as `~/.config/imgrab/config.toml`.
///
/// Key names match the ones the browser side stores, so a dumped options
/// object can be pasted in as-is. Every `*_enabled` flag (and the two
/// mode flags) accepts either a TOML boolean or a string; only `"true"`
/// switches it on. Size bounds accept an integer or a numeric string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Sub-folder (relative to the download dir) that batch files land in.
    pub folder_name: String,
    /// Filename template; files become `<template><number>.<ext>` when set.
    pub new_file_name: String,
    pub filter_url: String,
    pub filter_url_mode: FilterMode,
    #[serde(deserialize_with = "pixels")]
    pub filter_min_width: u32,
    #[serde(deserialize_with = "flag")]
    pub filter_min_width_enabled: bool,
    #[serde(deserialize_with = "pixels")]
    pub filter_max_width: u32,
    #[serde(deserialize_with = "flag")]
    pub filter_max_width_enabled: bool,
    #[serde(deserialize_with = "pixels")]
    pub filter_min_height: u32,
    #[serde(deserialize_with = "flag")]
    pub filter_min_height_enabled: bool,
    #[serde(deserialize_with = "pixels")]
    pub filter_max_height: u32,
    #[serde(deserialize_with = "flag")]
    pub filter_max_height_enabled: bool,
    /// Auto-save only considers images wrapped in (or pointed to by) links.
    #[serde(deserialize_with = "flag")]
    pub only_images_from_links: bool,
    #[serde(deserialize_with = "flag")]
    pub enable_auto_save: bool,
    /// Period of the auto-save trigger.
    pub auto_save_interval_ms: u64,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            folder_name: String::new(),
            new_file_name: String::new(),
            filter_url: String::new(),
            filter_url_mode: FilterMode::Normal,
            filter_min_width: 0,
            filter_min_width_enabled: false,
            filter_max_width: 3000,
            filter_max_width_enabled: false,
            filter_min_height: 0,
            filter_min_height_enabled: false,
            filter_max_height: 3000,
            filter_max_height_enabled: false,
            only_images_from_links: false,
            enable_auto_save: false,
            auto_save_interval_ms: 1000,
        }
    }
}

impl Options {
    /// Snapshot handed to a batch; later edits to `self` never reach it.
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            folder_name: self.folder_name.clone(),
            new_file_name: self.new_file_name.clone(),
        }
    }
}

/// Naming options frozen into a task when its batch is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    pub folder_name: String,
    pub new_file_name: String,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FlagRepr {
    Bool(bool),
    Text(String),
}

fn flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match FlagRepr::deserialize(deserializer)? {
        FlagRepr::Bool(b) => b,
        FlagRepr::Text(s) => s == "true",
    })
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PixelsRepr {
    Number(u32),
    Text(String),
}

/// Form inputs are stored as text; an empty one counts as 0.
fn pixels<'de, D>(deserializer: D) -> std::result::Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    match PixelsRepr::deserialize(deserializer)? {
        PixelsRepr::Number(n) => Ok(n),
        PixelsRepr::Text(s) if s.trim().is_empty() => Ok(0),
        PixelsRepr::Text(s) => s
            .trim()
            .parse()
            .map_err(|_| serde::de::Error::custom(format!("invalid pixel size {:?}", s))),
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs =
        xdg::BaseDirectories::with_prefix("imgrab").map_err(|e| Error::Config(e.to_string()))?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load options from `path` (or the XDG default), writing a default file if none exists.
pub fn load_or_init(path: Option<&Path>) -> Result<Options> {
    let path = match path {
        Some(p) => p.to_path_buf(),
        None => config_path()?,
    };

    if !path.exists() {
        let options = Options::default();
        let toml = toml::to_string_pretty(&options).map_err(|e| Error::Config(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(options);
    }

    let data = fs::read_to_string(&path)?;
    let options: Options = toml::from_str(&data)?;
    tracing::debug!(path = %path.display(), "loaded options");
    Ok(options)
}
