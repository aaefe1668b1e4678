mod autosave;
mod cli;
mod commands;
mod config;
mod correlator;
mod daemon;
mod dedup;
mod error;
mod filter;
mod logging;
mod manifest;
mod messages;
mod orchestrator;
mod platform;
mod probe;
mod scanner;
mod task;
mod utils;

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::cli::FilterMode;
use crate::commands::Settings;
use crate::config::Options;

#[derive(Parser, Debug)]
#[command(author, version, about = "Bulk-harvest images from the web", long_about = None)]
struct Args {
    /// Image URLs to download as one batch
    #[arg(index = 1)]
    urls: Vec<String>,

    /// File with image URLs (one per line), appended to the batch
    #[arg(short = 't', long = "tasks-file")]
    tasks_file: Option<PathBuf>,

    /// Scan this page for images and download the ones passing the filters
    #[arg(short = 'p', long)]
    page: Option<Url>,

    /// Keep re-scanning --page and auto-save new images
    #[arg(short = 'w', long, requires = "page")]
    watch: bool,

    /// Read JSON messages (downloadImages / sendImages) from stdin
    #[arg(short = 'l', long, conflicts_with_all = ["page", "tasks_file"])]
    listen: bool,

    /// Directory to save downloaded files
    #[arg(short = 'd', long = "download-dir", default_value = "downloads")]
    download_dir: PathBuf,

    /// Config file (defaults to ~/.config/imgrab/config.toml)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// Sub-folder for this batch
    #[arg(long)]
    folder: Option<String>,

    /// Rename files to <template><number>.<ext>
    #[arg(long)]
    template: Option<String>,

    /// URL filter
    #[arg(short = 'f', long)]
    filter: Option<String>,

    #[arg(long = "filter-mode", value_enum)]
    filter_mode: Option<FilterMode>,

    /// Minimum width in pixels (enables the bound)
    #[arg(long)]
    min_width: Option<u32>,

    #[arg(long)]
    max_width: Option<u32>,

    #[arg(long)]
    min_height: Option<u32>,

    #[arg(long)]
    max_height: Option<u32>,

    /// Only consider images that are link targets
    #[arg(long)]
    links_only: bool,

    /// Auto-save period in milliseconds
    #[arg(long)]
    interval_ms: Option<u64>,

    /// Global rate limit in bytes per second (e.g., 1048576 for 1MB/s)
    #[arg(short = 'r', long)]
    rate_limit: Option<u32>,

    /// Referer sent with every request (defaults to the page origin)
    #[arg(long)]
    referer: Option<String>,

    /// Seconds before an image size probe gives up
    #[arg(long, default_value_t = 10)]
    probe_timeout: u64,

    /// Run the watcher in background (daemon mode) [Unix only]
    #[arg(long, requires = "watch")]
    daemon: bool,

    /// Stop the background watcher [Unix only]
    #[arg(short = 'x', long)]
    stop: bool,
}

impl Args {
    fn apply_overrides(&self, options: &mut Options) {
        if let Some(folder) = &self.folder {
            options.folder_name = folder.clone();
        }
        if let Some(template) = &self.template {
            options.new_file_name = template.clone();
        }
        if let Some(filter) = &self.filter {
            options.filter_url = filter.clone();
        }
        if let Some(mode) = self.filter_mode {
            options.filter_url_mode = mode;
        }
        if let Some(v) = self.min_width {
            options.filter_min_width = v;
            options.filter_min_width_enabled = true;
        }
        if let Some(v) = self.max_width {
            options.filter_max_width = v;
            options.filter_max_width_enabled = true;
        }
        if let Some(v) = self.min_height {
            options.filter_min_height = v;
            options.filter_min_height_enabled = true;
        }
        if let Some(v) = self.max_height {
            options.filter_max_height = v;
            options.filter_max_height_enabled = true;
        }
        if self.links_only {
            options.only_images_from_links = true;
        }
        if let Some(ms) = self.interval_ms {
            options.auto_save_interval_ms = ms;
        }
    }
}

fn main() -> Result<()> {
    let mut args = Args::parse();

    // Resolve paths before daemonizing, which changes the working directory
    if args.download_dir.is_relative() {
        if let Ok(cwd) = std::env::current_dir() {
            args.download_dir = cwd.join(&args.download_dir);
        }
    }
    if let Some(config) = &args.config {
        if let Ok(abs) = std::fs::canonicalize(config) {
            args.config = Some(abs);
        }
    }

    #[cfg(unix)]
    if args.stop {
        return crate::daemon::stop_daemon(&args.download_dir);
    }

    #[cfg(unix)]
    if args.daemon {
        crate::daemon::start_daemon(&args.download_dir)?;
    }

    logging::init_logging(args.daemon);

    let mut options = config::load_or_init(args.config.as_deref())?;
    args.apply_overrides(&mut options);

    let settings = Settings {
        download_dir: args.download_dir.clone(),
        options,
        rate_limit: args.rate_limit,
        referer: args.referer.clone(),
        probe_timeout: Duration::from_secs(args.probe_timeout),
    };

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async {
        if args.listen {
            return commands::run_listen(&settings).await;
        }

        if let Some(page) = args.page.clone() {
            if args.watch {
                return commands::run_watch(page, &settings, args.daemon).await;
            }
            return commands::run_page(page, &settings).await;
        }

        let mut urls = args.urls.clone();
        if let Some(tasks_file) = &args.tasks_file {
            urls.extend(commands::read_tasks_file(tasks_file).await?);
        }
        if urls.is_empty() {
            bail!("No image URLs given (pass URLs, --tasks-file, --page or --listen)");
        }
        commands::run_batch(urls, &settings).await
    })
}
