//! Deduplication / tracking store.
//!
//! A SQLite-backed record of "has this exact file content already been
//! processed." Content identity is a SHA-256 checksum, so a file whose
//! bytes change becomes eligible again automatically even though its
//! path was tracked. A path-keyed mtime+size comparison stands in when
//! checksum computation is disabled for performance.
//!
//! Store IO failures fail open: the hot-path methods log and report
//! "untracked" rather than blocking the run.

use anyhow::{Context, Result};
use rusqlite::{Connection, OptionalExtension, params};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};

/// Processing status of a tracked file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "skipped" => Self::Skipped,
            _ => Self::Pending,
        }
    }
}

/// One tracked file.
#[derive(Debug, Clone)]
pub struct ImageRecord {
    pub path: PathBuf,
    pub checksum: Option<String>,
    pub mtime: i64,
    pub size: u64,
    pub status: RecordStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub description: Option<String>,
    pub tags: Option<String>,
}

/// Counts by status, for the run summary.
#[derive(Debug, Clone, Copy, Default)]
pub struct StoreStats {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// SQLite-backed tracking store.
pub struct TrackingStore {
    conn: Connection,
}

impl TrackingStore {
    /// Open (or create) the store at the given path. The parent
    /// directory is created if needed.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open tracking store at {}", path.display()))?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory store, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory store")?;
        let store = Self { conn };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS images (
                path        TEXT PRIMARY KEY,
                checksum    TEXT,
                mtime       INTEGER NOT NULL DEFAULT 0,
                size        INTEGER NOT NULL DEFAULT 0,
                status      TEXT NOT NULL DEFAULT 'pending',
                attempts    INTEGER NOT NULL DEFAULT 0,
                last_error  TEXT,
                description TEXT,
                tags        TEXT,
                updated_at  TEXT
            )",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_images_checksum ON images(checksum)",
            [],
        )?;
        self.conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_images_status ON images(status)",
            [],
        )?;
        Ok(())
    }

    /// Has this exact content already been processed successfully?
    /// Fails open: any store error is logged and reported as untracked.
    pub fn is_tracked(&self, checksum: &str) -> bool {
        let result: rusqlite::Result<Option<String>> = self
            .conn
            .query_row(
                "SELECT path FROM images WHERE checksum = ?1 AND status = 'completed' LIMIT 1",
                params![checksum],
                |row| row.get(0),
            )
            .optional();
        match result {
            Ok(found) => found.is_some(),
            Err(e) => {
                log::warn!("Tracking store lookup failed (treating as untracked): {e}");
                false
            }
        }
    }

    /// Point lookup by path. Fails open to `None`.
    pub fn find_by_path(&self, path: &Path) -> Option<ImageRecord> {
        let result = self
            .conn
            .query_row(
                "SELECT path, checksum, mtime, size, status, attempts, last_error, description, tags
                 FROM images WHERE path = ?1",
                params![path.display().to_string()],
                |row| {
                    Ok(ImageRecord {
                        path: PathBuf::from(row.get::<_, String>(0)?),
                        checksum: row.get(1)?,
                        mtime: row.get(2)?,
                        size: row.get::<_, i64>(3)? as u64,
                        status: RecordStatus::from_str(&row.get::<_, String>(4)?),
                        attempts: row.get::<_, i64>(5)? as u32,
                        last_error: row.get(6)?,
                        description: row.get(7)?,
                        tags: row.get(8)?,
                    })
                },
            )
            .optional();
        match result {
            Ok(record) => record,
            Err(e) => {
                log::warn!("Tracking store lookup failed for {}: {e}", path.display());
                None
            }
        }
    }

    /// Upsert a record. The path is the row key; a changed checksum at
    /// the same path simply replaces the old logical entity.
    pub fn upsert(&self, record: &ImageRecord) {
        let result = self.conn.execute(
            "INSERT INTO images (path, checksum, mtime, size, status, attempts, last_error, description, tags, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(path) DO UPDATE SET
                checksum = excluded.checksum,
                mtime = excluded.mtime,
                size = excluded.size,
                status = excluded.status,
                attempts = excluded.attempts,
                last_error = excluded.last_error,
                description = excluded.description,
                tags = excluded.tags,
                updated_at = excluded.updated_at",
            params![
                record.path.display().to_string(),
                record.checksum,
                record.mtime,
                record.size as i64,
                record.status.as_str(),
                record.attempts as i64,
                record.last_error,
                record.description,
                record.tags,
                chrono::Utc::now().to_rfc3339(),
            ],
        );
        if let Err(e) = result {
            log::warn!(
                "Failed to update tracking store for {}: {e}",
                record.path.display()
            );
        }
    }

    /// Record a failed attempt, bumping the attempt counter.
    pub fn mark_failed(&self, path: &Path, checksum: Option<&str>, error: &str) {
        let previous = self.find_by_path(path);
        let attempts = previous.map(|r| r.attempts).unwrap_or(0) + 1;
        let (mtime, size) = file_stat(path).unwrap_or((0, 0));
        self.upsert(&ImageRecord {
            path: path.to_path_buf(),
            checksum: checksum.map(String::from),
            mtime,
            size,
            status: RecordStatus::Failed,
            attempts,
            last_error: Some(error.to_string()),
            description: None,
            tags: None,
        });
    }

    /// Remove entries whose path no longer exists on disk. Returns the
    /// number of rows dropped.
    pub fn cleanup(&self) -> Result<usize> {
        let mut stmt = self
            .conn
            .prepare("SELECT path FROM images")
            .context("Failed to scan tracking store")?;
        let paths: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .context("Failed to scan tracking store")?
            .filter_map(|r| r.ok())
            .collect();

        let mut removed = 0;
        for path in paths {
            if !Path::new(&path).exists() {
                removed += self
                    .conn
                    .execute("DELETE FROM images WHERE path = ?1", params![path])
                    .context("Failed to delete tracking store row")?;
            }
        }
        log::info!("Tracking store cleanup removed {removed} stale entries");
        Ok(removed)
    }

    /// Counts by status.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM images GROUP BY status")
            .context("Failed to query tracking store stats")?;
        let rows = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as usize))
            })
            .context("Failed to query tracking store stats")?;
        for row in rows.filter_map(|r| r.ok()) {
            stats.total += row.1;
            match RecordStatus::from_str(&row.0) {
                RecordStatus::Completed => stats.completed += row.1,
                RecordStatus::Failed => stats.failed += row.1,
                RecordStatus::Skipped => stats.skipped += row.1,
                _ => {}
            }
        }
        Ok(stats)
    }

    /// Import entries from the legacy append-only `path:checksum` log
    /// format. Imported rows are marked completed. Returns the number of
    /// entries imported.
    pub fn import_legacy_log(&self, log_path: &Path) -> Result<usize> {
        let contents = std::fs::read_to_string(log_path)
            .with_context(|| format!("Failed to read {}", log_path.display()))?;
        let mut imported = 0;
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            // rsplit: paths may themselves contain ':'
            let Some((path, checksum)) = line.rsplit_once(':') else {
                log::warn!("Skipping malformed legacy entry: {line}");
                continue;
            };
            let (mtime, size) = file_stat(Path::new(path)).unwrap_or((0, 0));
            self.upsert(&ImageRecord {
                path: PathBuf::from(path),
                checksum: Some(checksum.to_string()),
                mtime,
                size,
                status: RecordStatus::Completed,
                attempts: 1,
                last_error: None,
                description: None,
                tags: None,
            });
            imported += 1;
        }
        log::info!("Imported {imported} entries from {}", log_path.display());
        Ok(imported)
    }
}

/// SHA-256 content checksum, hex-encoded. Streams the file in 64 KiB
/// chunks.
pub fn content_checksum(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 65536];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// (mtime unix seconds, size in bytes) for a file.
pub fn file_stat(path: &Path) -> std::io::Result<(i64, u64)> {
    let meta = std::fs::metadata(path)?;
    let mtime = filetime::FileTime::from_last_modification_time(&meta).unix_seconds();
    Ok((mtime, meta.len()))
}

/// Whether a path-keyed record still matches the file on disk. Used when
/// checksum computation is disabled.
pub fn stat_matches(record: &ImageRecord, path: &Path) -> bool {
    match file_stat(path) {
        Ok((mtime, size)) => record.mtime == mtime && record.size == size,
        Err(_) => false,
    }
}
