//! Metadata backups: a field-value snapshot of all date/GPS fields taken
//! immediately before any mutating write, plus a full byte-copy of the
//! original file for high-risk formats. Consulted only when verification
//! fails; deleted once a write is verified; retained otherwise for
//! manual recovery.

use anyhow::{Context, Result};
use filetime::FileTime;
use std::path::{Path, PathBuf};

use super::tool::MetadataTool;

/// The date/time fields snapshotted before every EXIF write and
/// re-asserted in the write itself, defending against tools that drop
/// unspecified fields on rewrite.
pub const DATE_FIELDS: &[&str] = &[
    "DateTimeOriginal",
    "CreateDate",
    "ModifyDate",
    "GPSDateStamp",
    "GPSTimeStamp",
    "SubSecTimeOriginal",
    "SubSecTimeDigitized",
    "FileModifyDate",
];

/// Ephemeral backup for a single write operation.
pub struct MetadataBackup {
    source: PathBuf,
    /// Pre-write values of the fields in [`DATE_FIELDS`] that were
    /// present on the file.
    pub dates: Vec<(String, String)>,
    byte_copy: Option<PathBuf>,
    mtime: FileTime,
    atime: FileTime,
}

impl MetadataBackup {
    /// Snapshot the file before mutation. With `full_copy`, the original
    /// bytes are copied into `backup_dir` as well.
    pub fn capture(
        tool: &dyn MetadataTool,
        source: &Path,
        backup_dir: &Path,
        full_copy: bool,
    ) -> Result<Self> {
        let fields = match tool.dump_fields(source) {
            Ok(fields) => fields,
            Err(e) => {
                log::debug!("No readable metadata on {}: {e}", source.display());
                Default::default()
            }
        };
        let dates: Vec<(String, String)> = DATE_FIELDS
            .iter()
            .filter_map(|field| {
                fields
                    .get(*field)
                    .filter(|v| !v.is_empty())
                    .map(|v| (field.to_string(), v.clone()))
            })
            .collect();

        let meta = std::fs::metadata(source)
            .with_context(|| format!("cannot stat {}", source.display()))?;
        let mtime = FileTime::from_last_modification_time(&meta);
        let atime = FileTime::from_last_access_time(&meta);

        let byte_copy = if full_copy {
            std::fs::create_dir_all(backup_dir)
                .with_context(|| format!("cannot create {}", backup_dir.display()))?;
            let name = source
                .file_name()
                .context("source has no file name")?
                .to_string_lossy()
                .into_owned();
            let dest = backup_dir.join(format!("{name}.bak"));
            std::fs::copy(source, &dest)
                .with_context(|| format!("cannot back up {}", source.display()))?;
            log::debug!("Byte-copy backup at {}", dest.display());
            Some(dest)
        } else {
            None
        };

        Ok(Self {
            source: source.to_path_buf(),
            dates,
            byte_copy,
            mtime,
            atime,
        })
    }

    /// Re-write the snapshotted date fields through the tool.
    pub fn restore_fields(&self, tool: &dyn MetadataTool) -> Result<()> {
        if self.dates.is_empty() {
            return Ok(());
        }
        tool.write_fields(&self.source, &self.dates)
            .context("failed to restore snapshotted date fields")
    }

    /// Put the original bytes back and restore OS-level timestamps.
    pub fn restore_bytes(&self) -> Result<()> {
        let copy = self
            .byte_copy
            .as_ref()
            .context("no byte-copy backup was taken")?;
        std::fs::copy(copy, &self.source)
            .with_context(|| format!("failed to restore {}", self.source.display()))?;
        self.restore_times()
    }

    /// Restore the pre-write modify/access times.
    pub fn restore_times(&self) -> Result<()> {
        filetime::set_file_times(&self.source, self.atime, self.mtime)
            .with_context(|| format!("failed to restore times on {}", self.source.display()))
    }

    /// Delete the byte-copy once a write has verified.
    pub fn discard(self) {
        if let Some(copy) = self.byte_copy {
            let _ = std::fs::remove_file(copy);
        }
    }

    /// Path of the byte-copy, if one was taken.
    pub fn byte_copy_path(&self) -> Option<&Path> {
        self.byte_copy.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::testing::FakeTool;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn capture_snapshots_only_present_date_fields() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("photo.jpg");
        fs::write(&file, b"jpeg bytes").unwrap();

        let tool = FakeTool::new();
        tool.seed(&file, &[("DateTimeOriginal", "2022:05:01 10:00:00"), ("Make", "Canon")]);

        let backup =
            MetadataBackup::capture(&tool, &file, &dir.path().join("bak"), false).unwrap();
        assert_eq!(backup.dates.len(), 1);
        assert_eq!(backup.dates[0].0, "DateTimeOriginal");
        assert!(backup.byte_copy_path().is_none());
    }

    #[test]
    fn full_copy_and_restore_bytes() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("photo.jpg");
        fs::write(&file, b"original bytes").unwrap();

        let tool = FakeTool::new();
        let backup =
            MetadataBackup::capture(&tool, &file, &dir.path().join("bak"), true).unwrap();
        assert!(backup.byte_copy_path().unwrap().exists());

        // Simulate corruption, then restore.
        fs::write(&file, b"").unwrap();
        backup.restore_bytes().unwrap();
        assert_eq!(fs::read(&file).unwrap(), b"original bytes");
    }

    #[test]
    fn discard_removes_byte_copy() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("photo.jpg");
        fs::write(&file, b"bytes").unwrap();

        let tool = FakeTool::new();
        let backup =
            MetadataBackup::capture(&tool, &file, &dir.path().join("bak"), true).unwrap();
        let copy = backup.byte_copy_path().unwrap().to_path_buf();
        assert!(copy.exists());
        backup.discard();
        assert!(!copy.exists());
    }

    #[test]
    fn restore_fields_replays_snapshot_through_tool() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("photo.jpg");
        fs::write(&file, b"bytes").unwrap();

        let tool = FakeTool::new();
        tool.seed(&file, &[("CreateDate", "2021:01:01 00:00:00")]);
        let backup =
            MetadataBackup::capture(&tool, &file, &dir.path().join("bak"), false).unwrap();

        // Clobber the field, then restore.
        tool.seed(&file, &[("CreateDate", "1999:09:09 09:09:09")]);
        backup.restore_fields(&tool).unwrap();
        let fields = tool.dump_fields(&file).unwrap();
        assert_eq!(fields.get("CreateDate").unwrap(), "2021:01:01 00:00:00");
    }
}
