//! Metadata write-verify-restore engine.
//!
//! Persists a description and tags into the image's native metadata
//! without losing existing fields. Every mutating write is preceded by a
//! [`MetadataBackup`]; every write is verified by reading the file back;
//! failed verification restores and retries with exponential backoff;
//! corruption restores the original bytes unconditionally. Restore
//! always wins over leaving a half-written file.

use filetime::FileTime;
use std::path::{Path, PathBuf};

use super::backup::MetadataBackup;
use super::png_text;
use super::tool::MetadataTool;
use crate::error::ProcessError;
use crate::retry::RetryPolicy;

/// How a container accepts descriptive metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    /// Chunk-based text fields (PNG tEXt).
    PngText,
    /// EXIF-capable, written through the metadata tool.
    Exif,
    /// No native field support — a PNG companion is written instead and
    /// the original is left untouched.
    Fallback,
}

/// Determine the write strategy for a file from its extension.
pub fn container_for(path: &Path) -> Container {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => Container::PngText,
        "jpg" | "jpeg" | "tif" | "tiff" | "webp" | "heic" | "heif" => Container::Exif,
        _ => Container::Fallback,
    }
}

/// The payload to persist.
pub struct WriteRequest<'a> {
    pub description: &'a str,
    pub tags: &'a [String],
}

/// A verified write.
#[derive(Debug)]
pub struct WriteOutcome {
    /// The attempt number that verified (1 = first try).
    pub attempts: u32,
    /// Set when the fields were written to a companion file instead of
    /// the original.
    pub fallback_path: Option<PathBuf>,
}

/// The engine. One instance per run; stateless across files.
pub struct MetadataWriter<'a> {
    tool: &'a dyn MetadataTool,
    retry: RetryPolicy,
    backup_dir: PathBuf,
    override_mode: bool,
}

impl<'a> MetadataWriter<'a> {
    pub fn new(
        tool: &'a dyn MetadataTool,
        retry: RetryPolicy,
        backup_dir: PathBuf,
        override_mode: bool,
    ) -> Self {
        Self {
            tool,
            retry,
            backup_dir,
            override_mode,
        }
    }

    /// Write and verify, routing by container capability.
    pub fn write(&self, path: &Path, req: &WriteRequest<'_>) -> Result<WriteOutcome, ProcessError> {
        match container_for(path) {
            Container::PngText => self.write_png(path, req).map(|attempts| WriteOutcome {
                attempts,
                fallback_path: None,
            }),
            Container::Exif => self.write_exif(path, req).map(|attempts| WriteOutcome {
                attempts,
                fallback_path: None,
            }),
            Container::Fallback => {
                self.write_fallback(path, req)
                    .map(|(attempts, dest)| WriteOutcome {
                        attempts,
                        fallback_path: Some(dest),
                    })
            }
        }
    }

    /// EXIF-capable containers: snapshot dates, write through the tool
    /// with every snapshotted date re-asserted, verify readback,
    /// restore-and-retry on mismatch.
    fn write_exif(&self, path: &Path, req: &WriteRequest<'_>) -> Result<u32, ProcessError> {
        let backup = MetadataBackup::capture(self.tool, path, &self.backup_dir, true).map_err(
            |e| ProcessError::MetadataVerification {
                attempts: 0,
                detail: format!("backup capture failed, refusing to write: {e}"),
            },
        )?;

        let tags_joined = req.tags.join(", ");
        let mut fields: Vec<(String, String)> = vec![
            ("ImageDescription".into(), req.description.to_string()),
            ("XPComment".into(), req.description.to_string()),
            ("UserComment".into(), req.description.to_string()),
            ("Keywords".into(), tags_joined.clone()),
            ("XPKeywords".into(), tags_joined),
        ];
        // Re-assert every snapshotted date so a tool that rewrites the
        // whole block cannot silently lose them.
        fields.extend(backup.dates.iter().cloned());

        let max = self.retry.max_attempts();
        let mut last_detail = String::from("no write attempted");

        for attempt in 1..=max {
            if attempt > 1 {
                std::thread::sleep(self.retry.delay_before(attempt));
            }

            let tool_result = self.tool.write_fields(path, &fields);

            let intact = std::fs::metadata(path).map(|m| m.len() > 0).unwrap_or(false);
            if !intact {
                log::error!(
                    "{} is missing or empty after write — restoring original bytes",
                    path.display()
                );
                if let Err(e) = backup.restore_bytes() {
                    log::error!("Byte restore failed for {}: {e}", path.display());
                }
                return Err(ProcessError::MetadataCorruption {
                    detail: "output file missing or empty after write".into(),
                });
            }

            if let Err(e) = tool_result {
                last_detail = format!("metadata tool failed: {e}");
                log::warn!("Write attempt {attempt}/{max} on {}: {last_detail}", path.display());
                if let Err(e) = backup.restore_bytes() {
                    log::warn!("Byte restore after tool failure failed: {e}");
                }
                continue;
            }

            let readback = match self.tool.dump_fields(path) {
                Ok(fields) => fields,
                Err(e) => {
                    last_detail = format!("could not re-read metadata: {e}");
                    continue;
                }
            };

            // Date verification is byte-for-byte.
            let mut date_mismatch = None;
            for (field, expected) in &backup.dates {
                if readback.get(field) != Some(expected) {
                    date_mismatch = Some(format!(
                        "{field} was {expected:?} before write, {:?} after",
                        readback.get(field)
                    ));
                    break;
                }
            }
            if let Some(detail) = date_mismatch {
                last_detail = detail;
                log::warn!(
                    "Write attempt {attempt}/{max} on {}: {last_detail}",
                    path.display()
                );
                if let Err(e) = backup.restore_fields(self.tool) {
                    log::warn!("Date field restore failed: {e}");
                }
                continue;
            }

            let description_back = readback
                .get("ImageDescription")
                .or_else(|| readback.get("XPComment"))
                .or_else(|| readback.get("UserComment"));
            let verified = description_back
                .map(|d| description_matches(req.description, d, self.override_mode))
                .unwrap_or(false);
            if !verified {
                last_detail = format!(
                    "description readback {:?} does not correspond to what was written",
                    description_back
                );
                continue;
            }

            normalize_permissions(path);
            if let Err(e) = backup.restore_times() {
                log::warn!("Timestamp restore failed for {}: {e}", path.display());
            }
            backup.discard();
            log::debug!("Metadata verified on {} (attempt {attempt})", path.display());
            return Ok(attempt);
        }

        // Backup is retained on exhaustion for manual recovery.
        if let Some(copy) = backup.byte_copy_path() {
            log::error!(
                "Write to {} exhausted {max} attempts; backup kept at {}",
                path.display(),
                copy.display()
            );
        }
        Err(ProcessError::MetadataVerification {
            attempts: max,
            detail: last_detail,
        })
    }

    /// Text-chunk containers: two named tEXt fields, verified
    /// field-for-field with prefix tolerance.
    fn write_png(&self, path: &Path, req: &WriteRequest<'_>) -> Result<u32, ProcessError> {
        let read_failure = |e: std::io::Error| ProcessError::MetadataVerification {
            attempts: 0,
            detail: format!("cannot read {}: {e}", path.display()),
        };
        let original = std::fs::read(path).map_err(read_failure)?;
        let meta = std::fs::metadata(path).map_err(read_failure)?;
        let mtime = FileTime::from_last_modification_time(&meta);
        let atime = FileTime::from_last_access_time(&meta);

        let tags_joined = req.tags.join(", ");
        let entries = [
            (png_text::DESCRIPTION_KEY, req.description),
            (png_text::TAGS_KEY, tags_joined.as_str()),
        ];

        let max = self.retry.max_attempts();
        let mut last_detail = String::from("no write attempted");

        for attempt in 1..=max {
            if attempt > 1 {
                std::thread::sleep(self.retry.delay_before(attempt));
            }

            let updated = match png_text::set_text_chunks(&original, &entries) {
                Ok(bytes) => bytes,
                // Structural failure — retrying the same bytes cannot help.
                Err(e) => {
                    return Err(ProcessError::MetadataVerification {
                        attempts: attempt,
                        detail: e.to_string(),
                    });
                }
            };

            if let Err(e) = std::fs::write(path, &updated) {
                last_detail = format!("write failed: {e}");
                continue;
            }

            let reread = match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    last_detail = format!("re-read failed: {e}");
                    continue;
                }
            };
            let chunks = png_text::read_text_chunks(&reread).unwrap_or_default();
            let description_ok = chunks
                .get(png_text::DESCRIPTION_KEY)
                .map(|v| text_matches(req.description, v))
                .unwrap_or(false);
            let tags_ok = chunks
                .get(png_text::TAGS_KEY)
                .map(|v| text_matches(&tags_joined, v))
                .unwrap_or(false);

            if description_ok && tags_ok {
                normalize_permissions(path);
                if let Err(e) = filetime::set_file_times(path, atime, mtime) {
                    log::warn!("Timestamp restore failed for {}: {e}", path.display());
                }
                return Ok(attempt);
            }

            last_detail = "text chunk readback mismatch".into();
            log::warn!(
                "Write attempt {attempt}/{max} on {}: {last_detail}",
                path.display()
            );
            let _ = std::fs::write(path, &original);
        }

        let _ = std::fs::write(path, &original);
        let _ = filetime::set_file_times(path, atime, mtime);
        Err(ProcessError::MetadataVerification {
            attempts: max,
            detail: last_detail,
        })
    }

    /// Containers without native field support get a PNG companion with
    /// the same stem; the original is never touched.
    fn write_fallback(
        &self,
        path: &Path,
        req: &WriteRequest<'_>,
    ) -> Result<(u32, PathBuf), ProcessError> {
        let dest = path.with_extension("png");
        let convert_failure = |detail: String| ProcessError::MetadataVerification {
            attempts: 0,
            detail,
        };

        let img = image::ImageReader::open(path)
            .map_err(|e| convert_failure(format!("cannot open {}: {e}", path.display())))?
            .with_guessed_format()
            .map_err(|e| convert_failure(format!("cannot probe {}: {e}", path.display())))?
            .decode()
            .map_err(|e| convert_failure(format!("cannot decode {}: {e}", path.display())))?;
        img.to_rgba8()
            .save_with_format(&dest, image::ImageFormat::Png)
            .map_err(|e| convert_failure(format!("cannot write {}: {e}", dest.display())))?;

        log::info!(
            "{} has no native metadata fields — writing to companion {}",
            path.display(),
            dest.display()
        );
        let attempts = self.write_png(&dest, req)?;
        Ok((attempts, dest))
    }
}

/// Multi-tier description readback match: exact, substring either
/// direction, ≥70% overlap on the first ten words, and — in override
/// mode only — any non-trivial text.
pub(crate) fn description_matches(written: &str, readback: &str, override_mode: bool) -> bool {
    let written = written.trim();
    let readback = readback.trim();
    if readback.is_empty() {
        return written.is_empty();
    }
    if written == readback {
        return true;
    }
    if readback.contains(written) || written.contains(readback) {
        return true;
    }

    let w: Vec<&str> = written.split_whitespace().take(10).collect();
    let r: Vec<&str> = readback.split_whitespace().take(10).collect();
    if !w.is_empty() && !r.is_empty() {
        let n = w.len().min(r.len());
        let matched = (0..n).filter(|&i| w[i] == r[i]).count();
        if matched as f64 / w.len() as f64 >= 0.7 {
            return true;
        }
    }

    override_mode && readback.len() >= 8
}

/// Text-chunk match: exact, prefix either direction, or identical first
/// eight words (tolerates truncation by downstream tools).
pub(crate) fn text_matches(written: &str, readback: &str) -> bool {
    let written = written.trim();
    let readback = readback.trim();
    if readback.is_empty() {
        return written.is_empty();
    }
    if written == readback || written.starts_with(readback) || readback.starts_with(written) {
        return true;
    }
    let w: Vec<&str> = written.split_whitespace().take(8).collect();
    let r: Vec<&str> = readback.split_whitespace().take(8).collect();
    !w.is_empty() && w == r
}

#[cfg(unix)]
fn normalize_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        let mut perms = meta.permissions();
        // Later runs by other users/services must not be blocked.
        perms.set_mode(perms.mode() | 0o066);
        if let Err(e) = std::fs::set_permissions(path, perms) {
            log::warn!("Failed to normalize permissions on {}: {e}", path.display());
        }
    }
}

#[cfg(not(unix))]
fn normalize_permissions(_path: &Path) {}
