//! # Persistent Store
//!
//! Append-only SQLite table of ingested readings. The store itself owns
//! nothing but the database path: every operation opens its own connection,
//! runs, and closes it again. That keeps the store freely cloneable across
//! tasks and lets external consumers (the dashboard runs on a plain OS
//! thread) call the read interface without sharing any in-memory state with
//! the pipeline.
//!
//! Writes and the backup snapshot can overlap; a 5 s busy timeout on every
//! connection plus SQLite's own locking make that safe, and
//! [`SensorStore::snapshot_to`] uses the engine's online backup API so a
//! snapshot taken mid-write is still a consistent database.

use crate::reading::{ReadingKind, SensorReading, StoredReading, TIMESTAMP_FORMAT};
use chrono::{Local, NaiveDateTime};
use rusqlite::backup::Backup;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

const BUSY_TIMEOUT_MS: u64 = 5_000;
const BACKUP_PAGES_PER_STEP: std::os::raw::c_int = 64;
const BACKUP_PAUSE_MS: u64 = 50;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database file error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid stored timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),

    #[error(transparent)]
    InvalidKind(#[from] crate::reading::InvalidKindError),
}

/// Most recent single value of one reading kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LatestValue {
    Measurement(f64),
    Timestamp(NaiveDateTime),
}

/// Handle to the readings database.
///
/// Cloning is cheap; clones share nothing but the path.
#[derive(Debug, Clone)]
pub struct SensorStore {
    path: PathBuf,
}

impl SensorStore {
    /// Opens (creating if necessary) the database at `path` and ensures the
    /// readings table exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let store = Self { path };
        let conn = store.connection()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS readings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                temperature REAL NOT NULL,
                humidity REAL NOT NULL,
                loudness REAL NOT NULL,
                light_level REAL NOT NULL
            )",
        )?;
        debug!("sensor store ready at {}", store.path.display());
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn connection(&self) -> Result<Connection, StorageError> {
        let conn = Connection::open(&self.path)?;
        conn.busy_timeout(Duration::from_millis(BUSY_TIMEOUT_MS))?;
        Ok(conn)
    }

    /// Appends one reading and returns its row id.
    ///
    /// Row ids are assigned by SQLite and strictly increase; a failed insert
    /// means the reading is lost, callers log it and move on.
    pub fn insert(
        &self,
        reading: &SensorReading,
        timestamp: NaiveDateTime,
    ) -> Result<i64, StorageError> {
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO readings (timestamp, temperature, humidity, loudness, light_level)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                timestamp.format(TIMESTAMP_FORMAT).to_string(),
                reading.temperature,
                reading.humidity,
                reading.loudness,
                reading.light_level,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent readings, newest first, at most `limit` rows.
    ///
    /// Read-side errors degrade to an empty result with a warning; the
    /// consumers of this interface render "no data" rather than failing.
    pub fn recent(&self, limit: usize) -> Vec<StoredReading> {
        match self.query_recent(limit) {
            Ok(rows) => rows,
            Err(e) => {
                warn!("failed to read recent readings: {}", e);
                Vec::new()
            }
        }
    }

    fn query_recent(&self, limit: usize) -> Result<Vec<StoredReading>, StorageError> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, temperature, humidity, loudness, light_level
             FROM readings ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
            ))
        })?;

        let mut readings = Vec::new();
        for row in rows {
            let (id, timestamp, temperature, humidity, loudness, light_level) = row?;
            readings.push(StoredReading {
                id,
                timestamp: NaiveDateTime::parse_from_str(&timestamp, TIMESTAMP_FORMAT)?,
                reading: SensorReading {
                    temperature,
                    humidity,
                    loudness,
                    light_level,
                },
            });
        }
        Ok(readings)
    }

    /// Most recent single value of the named kind.
    ///
    /// `kind` must be one of the five column names understood by
    /// [`ReadingKind`]; anything else fails with
    /// [`StorageError::InvalidKind`]. An empty table yields `Ok(None)`.
    pub fn latest(&self, kind: &str) -> Result<Option<LatestValue>, StorageError> {
        let kind: ReadingKind = kind.parse()?;
        let conn = self.connection()?;
        // Column name comes from the enum, never from the caller's string.
        let sql = format!(
            "SELECT {} FROM readings ORDER BY timestamp DESC, id DESC LIMIT 1",
            kind.column()
        );

        match kind {
            ReadingKind::Timestamp => {
                let text: Option<String> = conn.query_row(&sql, [], |row| row.get(0)).optional()?;
                match text {
                    Some(text) => Ok(Some(LatestValue::Timestamp(
                        NaiveDateTime::parse_from_str(&text, TIMESTAMP_FORMAT)?,
                    ))),
                    None => Ok(None),
                }
            }
            _ => {
                let value: Option<f64> = conn.query_row(&sql, [], |row| row.get(0)).optional()?;
                Ok(value.map(LatestValue::Measurement))
            }
        }
    }

    /// Writes a consistent copy of the database to `dest` using SQLite's
    /// online backup API, yielding between page batches so concurrent
    /// inserts are not starved.
    pub fn snapshot_to(&self, dest: &Path) -> Result<(), StorageError> {
        let src = self.connection()?;
        let mut dst = Connection::open(dest)?;
        let backup = Backup::new(&src, &mut dst)?;
        backup.run_to_completion(
            BACKUP_PAGES_PER_STEP,
            Duration::from_millis(BACKUP_PAUSE_MS),
            None,
        )?;
        Ok(())
    }

    /// Inserts `count` synthetic readings stamped with the current time.
    ///
    /// Used to pre-populate a fresh database so downstream consumers have
    /// something to show before the first real cycle arrives.
    pub fn seed_random(
        &self,
        count: usize,
        mut sample: impl FnMut() -> SensorReading,
    ) -> Result<usize, StorageError> {
        let mut conn = self.connection()?;
        let tx = conn.transaction()?;
        for _ in 0..count {
            let reading = sample();
            tx.execute(
                "INSERT INTO readings (timestamp, temperature, humidity, loudness, light_level)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Local::now().naive_local().format(TIMESTAMP_FORMAT).to_string(),
                    reading.temperature,
                    reading.humidity,
                    reading.loudness,
                    reading.light_level,
                ],
            )?;
        }
        tx.commit()?;
        Ok(count)
    }
}
