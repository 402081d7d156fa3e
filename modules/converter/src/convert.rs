//! TIFF page rendering.
//!
//! Pages are decoded in physical file order; the order of the returned
//! PNGs is the order downstream consumers rely on.

use image::{DynamicImage, ImageBuffer, ImageFormat};
use std::io::Cursor;
use thiserror::Error;
use tiff::decoder::{Decoder, DecodingResult};
use tiff::ColorType;

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("invalid TIFF image: {0}")]
    InvalidImage(String),

    #[error("failed to encode page {page} as PNG: {detail}")]
    EncodeFailure { page: usize, detail: String },
}

/// Decode a (possibly multi-page) TIFF and render each page to PNG.
///
/// # Errors
///
/// `InvalidImage` for empty, truncated or unsupported inputs; these
/// are non-retryable and route the message to the converter DLQ.
pub fn tiff_to_pngs(bytes: &[u8]) -> Result<Vec<Vec<u8>>, ConvertError> {
    if bytes.is_empty() {
        return Err(ConvertError::InvalidImage("empty object".to_string()));
    }

    let mut decoder = Decoder::new(Cursor::new(bytes))
        .map_err(|e| ConvertError::InvalidImage(e.to_string()))?;

    let mut pages = Vec::new();
    loop {
        let page_index = pages.len();
        let page = decode_page(&mut decoder)
            .map_err(|e| ConvertError::InvalidImage(format!("page {}: {}", page_index + 1, e)))?;

        let mut png = Vec::new();
        page.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| ConvertError::EncodeFailure {
                page: page_index + 1,
                detail: e.to_string(),
            })?;
        pages.push(png);

        if !decoder.more_images() {
            break;
        }
        decoder
            .next_image()
            .map_err(|e| ConvertError::InvalidImage(e.to_string()))?;
    }

    Ok(pages)
}

fn decode_page(decoder: &mut Decoder<Cursor<&[u8]>>) -> Result<DynamicImage, String> {
    let (width, height) = decoder.dimensions().map_err(|e| e.to_string())?;
    let color_type = decoder.colortype().map_err(|e| e.to_string())?;
    let data = decoder.read_image().map_err(|e| e.to_string())?;

    let image = match (color_type, data) {
        (ColorType::Gray(8), DecodingResult::U8(buf)) => {
            ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageLuma8)
        }
        (ColorType::Gray(16), DecodingResult::U16(buf)) => {
            ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageLuma16)
        }
        (ColorType::RGB(8), DecodingResult::U8(buf)) => {
            ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageRgb8)
        }
        (ColorType::RGBA(8), DecodingResult::U8(buf)) => {
            ImageBuffer::from_raw(width, height, buf).map(DynamicImage::ImageRgba8)
        }
        (other, _) => {
            return Err(format!("unsupported TIFF color type {:?}", other));
        }
    };

    image.ok_or_else(|| "pixel buffer does not match declared dimensions".to_string())
}

/// `{source_stem}` from an object key: directories and the final
/// extension stripped.
pub fn source_stem(object_name: &str) -> &str {
    let file_name = object_name.rsplit('/').next().unwrap_or(object_name);
    file_name
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(file_name)
}

/// Processed-bucket key for a 1-indexed page.
pub fn page_key(stem: &str, page: usize) -> String {
    format!("{}_page{}.png", stem, page)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::synth_tiff;

    #[test]
    fn single_page_tiff_yields_one_png() {
        let tiff = synth_tiff(&[(40, 30, 200)]);
        let pages = tiff_to_pngs(&tiff).unwrap();
        assert_eq!(pages.len(), 1);

        let decoded = image::load_from_memory(&pages[0]).unwrap();
        assert_eq!(decoded.width(), 40);
        assert_eq!(decoded.height(), 30);
    }

    #[test]
    fn multi_page_tiff_preserves_physical_order() {
        let tiff = synth_tiff(&[(16, 16, 10), (16, 16, 120), (16, 16, 240)]);
        let pages = tiff_to_pngs(&tiff).unwrap();
        assert_eq!(pages.len(), 3);

        for (i, expected_shade) in [10u8, 120, 240].iter().enumerate() {
            let decoded = image::load_from_memory(&pages[i]).unwrap().into_luma8();
            assert_eq!(decoded.get_pixel(0, 0).0[0], *expected_shade);
        }
    }

    #[test]
    fn empty_input_is_invalid() {
        assert!(matches!(
            tiff_to_pngs(&[]),
            Err(ConvertError::InvalidImage(_))
        ));
    }

    #[test]
    fn garbage_input_is_invalid() {
        assert!(matches!(
            tiff_to_pngs(b"not a tiff at all"),
            Err(ConvertError::InvalidImage(_))
        ));
    }

    #[test]
    fn stem_strips_directories_and_extension() {
        assert_eq!(
            source_stem("invoices/2026/01/21/ubereats_INV-UE-123_20260121.tiff"),
            "ubereats_INV-UE-123_20260121"
        );
        assert_eq!(source_stem("plain.tiff"), "plain");
        assert_eq!(source_stem("noextension"), "noextension");
    }

    #[test]
    fn page_keys_are_one_indexed() {
        assert_eq!(page_key("a", 1), "a_page1.png");
        assert_eq!(page_key("a", 12), "a_page12.png");
    }
}
