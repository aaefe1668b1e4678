#[cfg(unix)]
use anyhow::{Context, Result};
#[cfg(unix)]
use daemonize::Daemonize;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;
#[cfg(unix)]
use std::path::{Path, PathBuf};

#[cfg(unix)]
const PID_FILE: &str = "imgrab.pid";
#[cfg(unix)]
const LOG_FILE: &str = "imgrab.log";

#[cfg(unix)]
fn pid_path(download_dir: &Path) -> PathBuf {
    download_dir.join(PID_FILE)
}

/// Detach the watcher. Pid and log files live in the download directory.
#[cfg(unix)]
pub fn start_daemon(download_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(download_dir).context("Failed to create download directory")?;
    let log = std::fs::File::create(download_dir.join(LOG_FILE)).context("Failed to create log file")?;
    let stderr = log.try_clone().context("Failed to clone log file handle")?;

    Daemonize::new()
        .pid_file(pid_path(download_dir))
        .chown_pid_file(true)
        .working_directory(download_dir)
        .stdout(log)
        .stderr(stderr)
        .start()
        .map_err(|e| anyhow::anyhow!("Error starting daemon: {}", e))
}

#[cfg(unix)]
fn daemon_pid(download_dir: &Path) -> Result<Option<i32>> {
    let path = pid_path(download_dir);
    if !path.exists() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    let pid = content
        .trim()
        .parse::<i32>()
        .with_context(|| format!("Bad pid file {}", path.display()))?;
    Ok(Some(pid))
}

#[cfg(unix)]
pub fn stop_daemon(download_dir: &Path) -> Result<()> {
    match daemon_pid(download_dir)? {
        Some(pid) => {
            signal::kill(Pid::from_raw(pid), Signal::SIGTERM)?;
            println!("Stopped watcher (PID: {})", pid);
            cleanup_pid_file(download_dir);
        }
        None => println!("Watcher is not running."),
    }
    Ok(())
}

#[cfg(unix)]
pub fn cleanup_pid_file(download_dir: &Path) {
    let _ = std::fs::remove_file(pid_path(download_dir));
}
