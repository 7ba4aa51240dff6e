//! PNG text-chunk access. Description and tags live in two named tEXt
//! chunks (`keyword\0text`), written with chunk-level surgery so every
//! other chunk in the file is preserved byte-for-byte.

use anyhow::{Context, Result};
use img_parts::Bytes;
use img_parts::png::{Png, PngChunk};
use std::collections::BTreeMap;

pub const DESCRIPTION_KEY: &str = "Description";
pub const TAGS_KEY: &str = "Tags";

fn chunk_keyword(chunk: &PngChunk) -> Option<String> {
    let contents = chunk.contents();
    let nul = contents.iter().position(|b| *b == 0)?;
    Some(String::from_utf8_lossy(&contents[..nul]).into_owned())
}

fn chunk_text(chunk: &PngChunk) -> Option<String> {
    let contents = chunk.contents();
    let nul = contents.iter().position(|b| *b == 0)?;
    Some(String::from_utf8_lossy(&contents[nul + 1..]).into_owned())
}

/// All tEXt chunks as a `keyword -> text` map.
pub fn read_text_chunks(bytes: &[u8]) -> Result<BTreeMap<String, String>> {
    let png = Png::from_bytes(Bytes::copy_from_slice(bytes))
        .map_err(|e| anyhow::anyhow!("not a valid PNG: {e}"))?;
    let mut map = BTreeMap::new();
    for chunk in png.chunks() {
        if &chunk.kind() != b"tEXt" {
            continue;
        }
        if let (Some(keyword), Some(text)) = (chunk_keyword(chunk), chunk_text(chunk)) {
            map.insert(keyword, text);
        }
    }
    Ok(map)
}

/// Return a new PNG byte stream with the given `keyword -> text` entries
/// set, replacing same-keyword chunks and preserving everything else.
pub fn set_text_chunks(original: &[u8], entries: &[(&str, &str)]) -> Result<Vec<u8>> {
    let mut png = Png::from_bytes(Bytes::copy_from_slice(original))
        .map_err(|e| anyhow::anyhow!("not a valid PNG: {e}"))?;

    for (keyword, text) in entries {
        png.chunks_mut().retain(|c| {
            !(&c.kind() == b"tEXt" && chunk_keyword(c).as_deref() == Some(*keyword))
        });

        let mut contents = Vec::with_capacity(keyword.len() + 1 + text.len());
        contents.extend_from_slice(keyword.as_bytes());
        contents.push(0);
        contents.extend_from_slice(text.as_bytes());
        let chunk = PngChunk::new(*b"tEXt", Bytes::from(contents));

        // tEXt must sit before IEND when the trailer chunk is tracked.
        let iend = png.chunks().iter().position(|c| &c.kind() == b"IEND");
        match iend {
            Some(pos) => png.chunks_mut().insert(pos, chunk),
            None => png.chunks_mut().push(chunk),
        }
    }

    let encoded = png.encoder().bytes();
    Ok(encoded.to_vec())
}

/// Convenience check used by the dedup pass.
pub fn read_description(bytes: &[u8]) -> Option<String> {
    read_text_chunks(bytes)
        .ok()?
        .remove(DESCRIPTION_KEY)
        .filter(|d| !d.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_png() -> Vec<u8> {
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([1, 2, 3]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn set_and_read_round_trip() {
        let png = sample_png();
        let out = set_text_chunks(
            &png,
            &[(DESCRIPTION_KEY, "a red square"), (TAGS_KEY, "red, square")],
        )
        .unwrap();

        let chunks = read_text_chunks(&out).unwrap();
        assert_eq!(chunks.get(DESCRIPTION_KEY).unwrap(), "a red square");
        assert_eq!(chunks.get(TAGS_KEY).unwrap(), "red, square");

        // The image data survived.
        let decoded = image::load_from_memory(&out).unwrap();
        assert_eq!(decoded.width(), 4);
    }

    #[test]
    fn replacing_a_chunk_does_not_duplicate_it() {
        let png = sample_png();
        let first = set_text_chunks(&png, &[(DESCRIPTION_KEY, "first")]).unwrap();
        let second = set_text_chunks(&first, &[(DESCRIPTION_KEY, "second")]).unwrap();

        let chunks = read_text_chunks(&second).unwrap();
        assert_eq!(chunks.get(DESCRIPTION_KEY).unwrap(), "second");

        let parsed = Png::from_bytes(Bytes::copy_from_slice(&second)).unwrap();
        let text_count = parsed
            .chunks()
            .iter()
            .filter(|c| &c.kind() == b"tEXt")
            .count();
        assert_eq!(text_count, 1);
    }

    #[test]
    fn read_description_ignores_blank() {
        let png = sample_png();
        let out = set_text_chunks(&png, &[(DESCRIPTION_KEY, "   ")]).unwrap();
        assert!(read_description(&out).is_none());

        let out = set_text_chunks(&png, &[(DESCRIPTION_KEY, "real text")]).unwrap();
        assert_eq!(read_description(&out).unwrap(), "real text");
    }

    #[test]
    fn garbage_is_not_a_png() {
        assert!(read_text_chunks(b"definitely not a png").is_err());
    }
}
