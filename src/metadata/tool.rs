//! The metadata CLI tool seam.
//!
//! The write-verify-restore engine talks to the external metadata tool
//! through the [`MetadataTool`] trait so it can be exercised in tests
//! with a fake. The real implementation shells out to `exiftool`.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;
use std::process::Command;

/// Subprocess contract with the metadata tool: dump all fields as JSON,
/// write named fields while preserving all unspecified fields, and
/// extract an embedded preview image. Exit code 0 = accepted; non-zero =
/// failure with stderr as the diagnostic.
pub trait MetadataTool: Send + Sync {
    fn is_available(&self) -> bool;

    /// All of the file's metadata fields as `tag name -> value` strings.
    fn dump_fields(&self, path: &Path) -> Result<BTreeMap<String, String>>;

    /// Write the given `(tag, value)` pairs in one invocation, leaving
    /// every unspecified field untouched.
    fn write_fields(&self, path: &Path, fields: &[(String, String)]) -> Result<()>;

    /// Pull the embedded JPEG preview out of a container.
    fn extract_preview(&self, source: &Path, dest: &Path) -> Result<()>;
}

/// `exiftool` invoked as a subprocess.
pub struct ExifToolCli {
    binary: String,
}

impl ExifToolCli {
    pub fn new() -> Self {
        Self {
            binary: "exiftool".to_string(),
        }
    }

    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Default for ExifToolCli {
    fn default() -> Self {
        Self::new()
    }
}

impl MetadataTool for ExifToolCli {
    fn is_available(&self) -> bool {
        which::which(&self.binary).is_ok()
    }

    fn dump_fields(&self, path: &Path) -> Result<BTreeMap<String, String>> {
        let output = Command::new(&self.binary)
            .arg("-json")
            .arg(path)
            .output()
            .context("failed to spawn exiftool")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("exiftool -json exited with {}: {}", output.status, stderr.trim());
        }

        let parsed: Vec<serde_json::Value> =
            serde_json::from_slice(&output.stdout).context("exiftool emitted invalid JSON")?;
        let object = parsed
            .first()
            .and_then(|v| v.as_object())
            .context("exiftool emitted no metadata object")?;

        let mut fields = BTreeMap::new();
        for (key, value) in object {
            let text = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            fields.insert(key.clone(), text);
        }
        Ok(fields)
    }

    fn write_fields(&self, path: &Path, fields: &[(String, String)]) -> Result<()> {
        let mut cmd = Command::new(&self.binary);
        for (tag, value) in fields {
            cmd.arg(format!("-{tag}={value}"));
        }
        cmd.arg("-overwrite_original").arg("-m").arg(path);

        let output = cmd.output().context("failed to spawn exiftool")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("exiftool write exited with {}: {}", output.status, stderr.trim());
        }
        Ok(())
    }

    fn extract_preview(&self, source: &Path, dest: &Path) -> Result<()> {
        let output = Command::new(&self.binary)
            .arg("-b")
            .arg("-PreviewImage")
            .arg(source)
            .output()
            .context("failed to spawn exiftool")?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("exiftool preview exited with {}: {}", output.status, stderr.trim());
        }
        if output.stdout.is_empty() {
            anyhow::bail!("no embedded preview in {}", source.display());
        }
        std::fs::write(dest, &output.stdout)
            .with_context(|| format!("failed to write preview to {}", dest.display()))?;
        Ok(())
    }
}
