//! Periodic deletion of expired recordings.
//!
//! The sweep runs on a cron schedule (server local time, default daily at
//! midnight) and removes clips older than the retention window.

use crate::recording;
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;

#[derive(Debug, thiserror::Error)]
pub enum RetentionError {
    #[error("Invalid cron expression: {0}")]
    CronParse(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

type Result<T> = std::result::Result<T, RetentionError>;

/// Accept standard 5-field cron by pinning seconds to zero.
pub fn normalize_cron_expr(expr: &str) -> String {
    let trimmed = expr.trim();
    if trimmed.split_whitespace().count() == 5 {
        format!("0 {}", trimmed)
    } else {
        trimmed.to_string()
    }
}

pub fn parse_schedule(expr: &str) -> Result<cron::Schedule> {
    cron::Schedule::from_str(&normalize_cron_expr(expr))
        .map_err(|e| RetentionError::CronParse(format!("{}: {}", expr, e)))
}

/// Next occurrence of `schedule` strictly after `after`.
pub fn next_run_after(schedule: &cron::Schedule, after: DateTime<Local>) -> Option<DateTime<Local>> {
    schedule.after(&after).next()
}

/// Delete clips in `directory` whose creation time is older than `retention`.
/// Returns how many were removed. Files that cannot be inspected are skipped.
pub fn sweep_expired(directory: &Path, extension: &str, retention: Duration) -> Result<usize> {
    let now = SystemTime::now();
    let mut removed = 0;
    for entry in std::fs::read_dir(directory)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some(extension) {
            continue;
        }
        let metadata = match entry.metadata() {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                log::warn!("[Retention] cannot stat {}: {}", path.display(), e);
                continue;
            }
        };
        let age = now
            .duration_since(recording::created_at(&metadata))
            .unwrap_or_default();
        if age <= retention {
            continue;
        }
        match std::fs::remove_file(&path) {
            Ok(()) => {
                log::info!("[Retention] removed {}", path.display());
                removed += 1;
            }
            Err(e) => log::warn!("[Retention] failed to remove {}: {}", path.display(), e),
        }
    }
    Ok(removed)
}

/// Run the sweep on `schedule` until the shutdown signal fires.
pub async fn run(
    directory: PathBuf,
    extension: String,
    retention: Duration,
    schedule: cron::Schedule,
    mut shutdown: watch::Receiver<()>,
) {
    log::info!(
        "[Retention] sweeping {} on '{}' (keep {}h)",
        directory.display(),
        schedule,
        retention.as_secs() / 3600
    );
    loop {
        let Some(next) = next_run_after(&schedule, Local::now()) else {
            log::warn!("[Retention] schedule has no further occurrences, exiting");
            return;
        };
        let wait = (next - Local::now()).to_std().unwrap_or_default();
        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                let dir = directory.clone();
                let ext = extension.clone();
                let result =
                    tokio::task::spawn_blocking(move || sweep_expired(&dir, &ext, retention)).await;
                match result {
                    Ok(Ok(n)) => log::info!("[Retention] sweep done, {} clip(s) removed", n),
                    Ok(Err(e)) => log::error!("[Retention] sweep failed: {}", e),
                    Err(e) => log::error!("[Retention] sweep task panicked: {}", e),
                }
            }
            _ = shutdown.changed() => {
                log::info!("[Retention] shutdown signal received, exiting");
                return;
            }
        }
    }
}
