//! Cheap in-place metadata check: does the file already carry a
//! non-empty description/comment field? Runs without spawning the
//! metadata tool — EXIF containers are parsed with nom-exif, PNGs by
//! reading their text chunks.

use nom_exif::*;
use std::path::Path;

use super::png_text;
use super::writer::{Container, container_for};

// XP* tag IDs (IFD0)
const TAG_XP_COMMENT: u16 = 0x9C9C;
const TAG_XP_KEYWORDS: u16 = 0x9C9E;

/// Descriptive metadata already present on a file.
#[derive(Debug, Clone, Default)]
pub struct ExistingMetadata {
    pub description: Option<String>,
    pub keywords: Option<String>,
}

/// Read existing descriptive metadata without external tools.
pub fn read_existing(path: &Path) -> ExistingMetadata {
    match container_for(path) {
        Container::PngText => read_png(path),
        Container::Exif => read_exif(path),
        // GIF/BMP descriptions live on the PNG companion a prior run
        // produced.
        Container::Fallback => {
            let companion = path.with_extension("png");
            if companion.exists() {
                read_png(&companion)
            } else {
                ExistingMetadata::default()
            }
        }
    }
}

/// Does the file already carry a non-empty description?
pub fn has_description(path: &Path) -> bool {
    read_existing(path).description.is_some()
}

fn read_png(path: &Path) -> ExistingMetadata {
    let Ok(bytes) = std::fs::read(path) else {
        return ExistingMetadata::default();
    };
    let chunks = png_text::read_text_chunks(&bytes).unwrap_or_default();
    ExistingMetadata {
        description: chunks
            .get(png_text::DESCRIPTION_KEY)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
        keywords: chunks
            .get(png_text::TAGS_KEY)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    }
}

fn read_exif(path: &Path) -> ExistingMetadata {
    let mut parser = MediaParser::new();
    let Ok(ms) = MediaSource::file_path(path) else {
        return ExistingMetadata::default();
    };

    let iter: ExifIter = match parser.parse(ms) {
        Ok(iter) => iter,
        Err(_) => {
            log::debug!("No EXIF data found in {}", path.display());
            return ExistingMetadata::default();
        }
    };
    let exif: Exif = iter.into();

    let mut data = ExistingMetadata::default();

    // ImageDescription is the primary description field.
    if let Some(val) = exif.get(ExifTag::ImageDescription) {
        data.description = entry_to_string(val);
    }

    // UserComment and XPComment are fallbacks.
    if data.description.is_none() {
        if let Some(val) = exif.get(ExifTag::UserComment) {
            data.description = entry_to_string(val);
        }
    }
    if data.description.is_none() {
        if let Some(val) = exif.get_by_ifd_tag_code(0, TAG_XP_COMMENT) {
            data.description = entry_to_string(val);
        }
    }

    if let Some(val) = exif.get_by_ifd_tag_code(0, TAG_XP_KEYWORDS) {
        data.keywords = entry_to_string(val);
    }

    data
}

/// Convert an EntryValue to an Option<String>.
fn entry_to_string(val: &EntryValue) -> Option<String> {
    let s = val.to_string();
    let s = s.trim().trim_matches('"').to_string();
    if s.is_empty() { None } else { Some(s) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::png_text::{DESCRIPTION_KEY, set_text_chunks};
    use std::fs;
    use tempfile::TempDir;

    fn write_png(path: &Path, description: Option<&str>) {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([9, 9, 9]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        let mut data = bytes.into_inner();
        if let Some(desc) = description {
            data = set_text_chunks(&data, &[(DESCRIPTION_KEY, desc)]).unwrap();
        }
        fs::write(path, data).unwrap();
    }

    #[test]
    fn png_without_description_is_undescribed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("plain.png");
        write_png(&path, None);
        assert!(!has_description(&path));
    }

    #[test]
    fn png_with_description_is_described() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tagged.png");
        write_png(&path, Some("a gray square"));
        assert!(has_description(&path));
        assert_eq!(
            read_existing(&path).description.as_deref(),
            Some("a gray square")
        );
    }

    #[test]
    fn fallback_container_checks_png_companion() {
        let dir = TempDir::new().unwrap();
        let gif = dir.path().join("anim.gif");
        fs::write(&gif, b"GIF89a fake").unwrap();
        assert!(!has_description(&gif));

        write_png(&dir.path().join("anim.png"), Some("companion text"));
        assert!(has_description(&gif));
    }

    #[test]
    fn unreadable_file_is_undescribed() {
        assert!(!has_description(Path::new("/nonexistent/photo.jpg")));
    }
}
