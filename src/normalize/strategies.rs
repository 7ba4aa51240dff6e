//! Concrete conversion strategies, in the order the default chain tries
//! them. All external tools share the `(source, dest)` argument contract;
//! success is "destination exists and is non-empty", which the chain
//! driver checks — exit codes alone are not trusted.

use anyhow::{Context, Result};
use std::path::Path;
use std::process::Command;
use std::sync::OnceLock;

use super::ConversionStrategy;
use crate::metadata::{ExifToolCli, MetadataTool};

/// Availability probe for an external binary, checked once per instance.
struct ToolProbe {
    binary: &'static str,
    cached: OnceLock<bool>,
}

impl ToolProbe {
    const fn new(binary: &'static str) -> Self {
        Self {
            binary,
            cached: OnceLock::new(),
        }
    }

    fn available(&self) -> bool {
        *self
            .cached
            .get_or_init(|| which::which(self.binary).is_ok())
    }
}

fn run_tool(mut cmd: Command) -> Result<()> {
    let output = cmd.output().context("failed to spawn converter")?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        anyhow::bail!("converter exited with {}: {}", output.status, stderr.trim());
    }
    Ok(())
}

/// Strategy 1 — in-process decode via the `image` crate with extended
/// format support (palette GIFs, BMP, TIFF), re-encoded as JPEG.
pub struct ImageCrateDecode;

impl ConversionStrategy for ImageCrateDecode {
    fn name(&self) -> &str {
        "image-decode"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn attempt(&self, source: &Path, dest: &Path) -> Result<()> {
        let img = image::ImageReader::open(source)
            .context("failed to open source")?
            .with_guessed_format()
            .context("failed to probe format")?
            .decode()
            .context("decode failed")?;
        // JPEG has no alpha channel.
        img.to_rgb8()
            .save_with_format(dest, image::ImageFormat::Jpeg)
            .context("failed to encode JPEG")?;
        Ok(())
    }
}

/// Strategy 2 — `heif-convert` (libheif), the dedicated HEIC/HEIF
/// conversion CLI.
pub struct HeifConvert {
    probe: ToolProbe,
}

impl HeifConvert {
    pub fn new() -> Self {
        Self {
            probe: ToolProbe::new("heif-convert"),
        }
    }
}

impl Default for HeifConvert {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionStrategy for HeifConvert {
    fn name(&self) -> &str {
        "heif-convert"
    }

    fn is_available(&self) -> bool {
        self.probe.available()
    }

    fn attempt(&self, source: &Path, dest: &Path) -> Result<()> {
        let mut cmd = Command::new("heif-convert");
        cmd.arg(source).arg(dest);
        run_tool(cmd)
    }
}

/// Strategy 3 — ImageMagick, the general-purpose image-conversion CLI.
/// Prefers the v7 `magick` entry point, falls back to the classic
/// `convert`.
pub struct ImageMagick {
    magick: ToolProbe,
    convert: ToolProbe,
}

impl ImageMagick {
    pub fn new() -> Self {
        Self {
            magick: ToolProbe::new("magick"),
            convert: ToolProbe::new("convert"),
        }
    }

    fn binary(&self) -> Option<&'static str> {
        if self.magick.available() {
            Some("magick")
        } else if self.convert.available() {
            Some("convert")
        } else {
            None
        }
    }
}

impl Default for ImageMagick {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionStrategy for ImageMagick {
    fn name(&self) -> &str {
        "imagemagick"
    }

    fn is_available(&self) -> bool {
        self.binary().is_some()
    }

    fn attempt(&self, source: &Path, dest: &Path) -> Result<()> {
        let binary = self
            .binary()
            .context("neither magick nor convert is installed")?;
        let mut cmd = Command::new(binary);
        cmd.arg(source).arg(dest);
        run_tool(cmd)
    }
}

/// Strategy 4 — pull the embedded JPEG preview out of the container via
/// the metadata tool, rather than fully decoding it.
pub struct ExiftoolPreview {
    tool: ExifToolCli,
}

impl ExiftoolPreview {
    pub fn new() -> Self {
        Self {
            tool: ExifToolCli::new(),
        }
    }
}

impl Default for ExiftoolPreview {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionStrategy for ExiftoolPreview {
    fn name(&self) -> &str {
        "exiftool-preview"
    }

    fn is_available(&self) -> bool {
        self.tool.is_available()
    }

    fn attempt(&self, source: &Path, dest: &Path) -> Result<()> {
        self.tool.extract_preview(source, dest)
    }
}

/// Strategy 5 — `tifig`, a specialized single-purpose HEIC converter.
pub struct Tifig {
    probe: ToolProbe,
}

impl Tifig {
    pub fn new() -> Self {
        Self {
            probe: ToolProbe::new("tifig"),
        }
    }
}

impl Default for Tifig {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionStrategy for Tifig {
    fn name(&self) -> &str {
        "tifig"
    }

    fn is_available(&self) -> bool {
        self.probe.available()
    }

    fn attempt(&self, source: &Path, dest: &Path) -> Result<()> {
        let mut cmd = Command::new("tifig");
        cmd.arg(source).arg(dest);
        run_tool(cmd)
    }
}

/// Strategy 6 — ffmpeg in single-frame mode, a general transcoder that
/// handles many still containers as one-frame videos.
pub struct Ffmpeg {
    probe: ToolProbe,
}

impl Ffmpeg {
    pub fn new() -> Self {
        Self {
            probe: ToolProbe::new("ffmpeg"),
        }
    }
}

impl Default for Ffmpeg {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionStrategy for Ffmpeg {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn is_available(&self) -> bool {
        self.probe.available()
    }

    fn attempt(&self, source: &Path, dest: &Path) -> Result<()> {
        let mut cmd = Command::new("ffmpeg");
        cmd.arg("-y")
            .arg("-i")
            .arg(source)
            .arg("-frames:v")
            .arg("1")
            .arg(dest);
        run_tool(cmd)
    }
}

/// Strategy 7 — `sips`, the macOS-native conversion utility.
pub struct Sips {
    probe: ToolProbe,
}

impl Sips {
    pub fn new() -> Self {
        Self {
            probe: ToolProbe::new("sips"),
        }
    }
}

impl Default for Sips {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversionStrategy for Sips {
    fn name(&self) -> &str {
        "sips"
    }

    fn is_available(&self) -> bool {
        self.probe.available()
    }

    fn attempt(&self, source: &Path, dest: &Path) -> Result<()> {
        let mut cmd = Command::new("sips");
        cmd.arg("-s")
            .arg("format")
            .arg("jpeg")
            .arg(source)
            .arg("--out")
            .arg(dest);
        run_tool(cmd)
    }
}
