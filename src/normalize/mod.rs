//! Format-normalization fallback chain.
//!
//! Given a file that cannot be decoded directly, tries an ordered list
//! of conversion strategies until one yields a valid, decodable image.
//! Strategies are probed for availability (the hosting environment may
//! lack some external tools) and skipped when absent; the first success
//! short-circuits the rest.

mod strategies;

pub use strategies::{
    ExiftoolPreview, Ffmpeg, HeifConvert, ImageCrateDecode, ImageMagick, Sips, Tifig,
};

use anyhow::Result;
use filetime::FileTime;
use std::path::{Path, PathBuf};

/// One conversion method. Implementations are checked for availability
/// before each attempt and must create `dest` on success.
pub trait ConversionStrategy {
    fn name(&self) -> &str;
    fn is_available(&self) -> bool;
    fn attempt(&self, source: &Path, dest: &Path) -> Result<()>;
}

/// Outcome of a normalization pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NormalizeOutcome {
    /// A strategy produced a decodable file at this path.
    Converted(PathBuf),
    /// No strategy succeeded, but a previously-converted same-stem JPEG
    /// sibling exists.
    SiblingJpeg(PathBuf),
    /// The input is below the size threshold — a cloud-storage stub or
    /// corrupted remnant. No strategy was invoked.
    Placeholder,
    /// Every available strategy failed and no sibling exists.
    Exhausted,
}

/// The prioritized strategy chain.
pub struct Normalizer {
    strategies: Vec<Box<dyn ConversionStrategy>>,
    min_file_bytes: u64,
}

impl Normalizer {
    /// The default chain, in fixed priority order.
    pub fn new(min_file_bytes: u64) -> Self {
        Self::with_strategies(
            vec![
                Box::new(ImageCrateDecode),
                Box::new(HeifConvert::new()),
                Box::new(ImageMagick::new()),
                Box::new(ExiftoolPreview::new()),
                Box::new(Tifig::new()),
                Box::new(Ffmpeg::new()),
                Box::new(Sips::new()),
            ],
            min_file_bytes,
        )
    }

    /// A custom chain. Used by tests to exercise ordering with fakes.
    pub fn with_strategies(
        strategies: Vec<Box<dyn ConversionStrategy>>,
        min_file_bytes: u64,
    ) -> Self {
        Self {
            strategies,
            min_file_bytes,
        }
    }

    /// Try to produce a decodable image for `source`.
    pub fn normalize(&self, source: &Path) -> Result<NormalizeOutcome> {
        let meta = std::fs::metadata(source)
            .map_err(|e| anyhow::anyhow!("cannot stat {}: {e}", source.display()))?;

        if meta.len() < self.min_file_bytes {
            log::warn!(
                "{} is only {} bytes — classifying as placeholder/corrupted stub",
                source.display(),
                meta.len()
            );
            return Ok(NormalizeOutcome::Placeholder);
        }

        let mtime = FileTime::from_last_modification_time(&meta);
        let atime = FileTime::from_last_access_time(&meta);
        let dest = conversion_dest(source);

        for strategy in &self.strategies {
            if !strategy.is_available() {
                log::debug!("Strategy {} unavailable, skipping", strategy.name());
                continue;
            }
            log::debug!("Trying {} on {}", strategy.name(), source.display());
            match strategy.attempt(source, &dest) {
                Ok(()) if output_usable(&dest) => {
                    // The converted artifact must not look newer than the
                    // source it came from.
                    if let Err(e) = filetime::set_file_times(&dest, atime, mtime) {
                        log::warn!("Failed to restore timestamps on {}: {e}", dest.display());
                    }
                    log::info!(
                        "{} converted {} -> {}",
                        strategy.name(),
                        source.display(),
                        dest.display()
                    );
                    return Ok(NormalizeOutcome::Converted(dest));
                }
                Ok(()) => {
                    log::debug!("{} produced no usable output", strategy.name());
                    discard_partial(&dest);
                }
                Err(e) => {
                    log::debug!("{} failed: {e}", strategy.name());
                    discard_partial(&dest);
                }
            }
        }

        if let Some(sibling) = find_jpeg_sibling(source) {
            log::info!(
                "Using existing JPEG sibling {} for {}",
                sibling.display(),
                source.display()
            );
            return Ok(NormalizeOutcome::SiblingJpeg(sibling));
        }

        Ok(NormalizeOutcome::Exhausted)
    }
}

/// Can the file be decoded in-process without any conversion?
pub fn decodes_directly(path: &Path) -> bool {
    image::ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .ok()
        .and_then(|r| r.decode().ok())
        .is_some()
}

/// Destination path for a conversion: same stem, `.jpg` extension.
/// A `.jpg` source gets a distinct name so the original is never the
/// conversion target.
fn conversion_dest(source: &Path) -> PathBuf {
    let dest = source.with_extension("jpg");
    if dest == source {
        let stem = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "converted".into());
        source.with_file_name(format!("{stem}_converted.jpg"))
    } else {
        dest
    }
}

fn output_usable(dest: &Path) -> bool {
    std::fs::metadata(dest).map(|m| m.len() > 0).unwrap_or(false)
}

fn discard_partial(dest: &Path) {
    if dest.exists() {
        let _ = std::fs::remove_file(dest);
    }
}

/// A prior run may already have produced a same-stem JPEG next to the
/// source. Case-insensitive on the extension.
fn find_jpeg_sibling(source: &Path) -> Option<PathBuf> {
    let stem = source.file_stem()?;
    let dir = source.parent()?;
    for ext in ["jpg", "jpeg", "JPG", "JPEG"] {
        let candidate = dir.join(format!("{}.{ext}", stem.to_string_lossy()));
        if candidate != source && output_usable(&candidate) {
            return Some(candidate);
        }
    }
    None
}
