//! # Backup Scheduler
//!
//! Periodically snapshots the readings database into a local directory and,
//! when a remote target is configured, uploads the snapshot verbatim to an
//! FTP file-drop. Each cycle stands alone: a failed snapshot or upload is
//! logged and skipped, and the next cycle runs at its regular time with no
//! immediate retry and no state carried between cycles. An unset remote
//! target means local snapshots only.

use crate::config::{BackupSettings, RemoteTarget};
use crate::storage::{SensorStore, StorageError};
use chrono::Local;
use std::path::{Path, PathBuf};
use suppaftp::FtpStream;
use thiserror::Error;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const SNAPSHOT_TIME_FORMAT: &str = "%Y%m%d-%H%M%S";

#[derive(Debug, Error)]
pub enum BackupError {
    #[error("snapshot failed: {0}")]
    Snapshot(#[from] StorageError),

    #[error("backup io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("upload failed: {0}")]
    Transfer(#[from] suppaftp::FtpError),

    #[error("backup worker failed: {0}")]
    Task(String),
}

pub struct BackupScheduler {
    store: SensorStore,
    settings: BackupSettings,
}

impl BackupScheduler {
    pub fn new(store: SensorStore, settings: BackupSettings) -> Self {
        Self { store, settings }
    }

    /// Runs one backup cycle per interval until cancelled.
    pub async fn run(self, token: CancellationToken) -> Result<(), BackupError> {
        let mut ticker = tokio::time::interval(self.settings.interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Swallow the immediate first tick; the first cycle runs after one
        // full interval, not at startup.
        ticker.tick().await;

        info!(
            "backup scheduler running every {}s into {}",
            self.settings.interval().as_secs(),
            self.settings.local_dir.display()
        );

        loop {
            tokio::select! {
                _ = token.cancelled() => {
                    info!("backup scheduler stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.cycle().await {
                        Ok(path) => info!("backup cycle complete: {}", path.display()),
                        Err(e) => warn!("backup cycle failed: {}", e),
                    }
                }
            }
        }
    }

    /// One cycle: consistent snapshot into the local directory, then the
    /// optional upload of that exact file under the same name.
    async fn cycle(&self) -> Result<PathBuf, BackupError> {
        tokio::fs::create_dir_all(&self.settings.local_dir).await?;

        let name = self.snapshot_name();
        let path = self.settings.local_dir.join(&name);

        let store = self.store.clone();
        let snapshot_path = path.clone();
        tokio::task::spawn_blocking(move || store.snapshot_to(&snapshot_path))
            .await
            .map_err(|e| BackupError::Task(e.to_string()))??;
        debug!("snapshot written to {}", path.display());

        if let Some(remote) = &self.settings.remote {
            let remote = remote.clone();
            let upload_path = path.clone();
            let object = name.clone();
            tokio::task::spawn_blocking(move || upload(&remote, &upload_path, &object))
                .await
                .map_err(|e| BackupError::Task(e.to_string()))??;
        }

        Ok(path)
    }

    /// `<database stem>-<capture time>.db`, so artifacts sort by capture
    /// time and never collide across cycles.
    fn snapshot_name(&self) -> String {
        let stem = self
            .store
            .path()
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("sensordata");
        format!("{}-{}.db", stem, Local::now().format(SNAPSHOT_TIME_FORMAT))
    }
}

/// Blocking FTP upload: connect, login, optionally change directory, store
/// the file under its snapshot name.
fn upload(target: &RemoteTarget, path: &Path, name: &str) -> Result<(), BackupError> {
    let mut stream = FtpStream::connect((target.host.as_str(), target.port))?;
    stream.login(&target.username, &target.password)?;
    if let Some(directory) = &target.directory {
        stream.cwd(directory)?;
    }
    let mut file = std::fs::File::open(path)?;
    let bytes = stream.put_file(name, &mut file)?;
    stream.quit()?;
    info!("uploaded {} ({} bytes) to {}", name, bytes, target.host);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_name_carries_stem_and_capture_time() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SensorStore::open(dir.path().join("sensordata.db")).expect("open store");
        let scheduler = BackupScheduler::new(store, BackupSettings::default());

        let name = scheduler.snapshot_name();
        assert!(name.starts_with("sensordata-"));
        assert!(name.ends_with(".db"));
        // stem + '-' + YYYYMMDD-HHMMSS + ".db"
        assert_eq!(name.len(), "sensordata-".len() + 15 + ".db".len());
    }

    #[test]
    fn snapshot_name_follows_the_database_file_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SensorStore::open(dir.path().join("night.db")).expect("open store");
        let scheduler = BackupScheduler::new(store, BackupSettings::default());
        assert!(scheduler.snapshot_name().starts_with("night-"));
    }
}
