//! Image encoding: card photo → base64 PNG wrapped in `ImageData`.
//!
//! The reconciliation stage sends the original, unrectified photo so the
//! model can double-check digits the OCR passes disagreed on. Phone photos
//! are often 4000 px or more on the long edge; they are downscaled to
//! `max_image_pixels` first so the request body stays well under provider
//! upload limits.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::imageops::FilterType;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode the card photo as a base64 PNG ready for the vision model.
///
/// PNG keeps digit strokes crisp; JPEG ringing around small print is exactly
/// what makes `0`/`O` and `1`/`I` ambiguous.
pub fn encode_card(img: &DynamicImage, max_pixels: u32) -> Result<ImageData, image::ImageError> {
    let capped = cap_longest_edge(img, max_pixels);
    let mut buf = Vec::new();
    capped.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!(
        "Encoded {}x{} card → {} bytes base64",
        capped.width(),
        capped.height(),
        b64.len()
    );

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Downscale so neither edge exceeds `max_pixels`; smaller images pass through.
fn cap_longest_edge(img: &DynamicImage, max_pixels: u32) -> DynamicImage {
    let longest = img.width().max(img.height());
    if longest <= max_pixels || max_pixels == 0 {
        return img.clone();
    }
    img.resize(max_pixels, max_pixels, FilterType::Triangle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_card(&img, 2000).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        let back = image::load_from_memory(&decoded).unwrap();
        assert_eq!((back.width(), back.height()), (10, 10));
    }

    #[test]
    fn large_image_is_capped_preserving_aspect() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(400, 200, Rgba([0, 0, 0, 255])));
        let data = encode_card(&img, 100).unwrap();
        let back = image::load_from_memory(&STANDARD.decode(&data.data).unwrap()).unwrap();
        assert_eq!(back.width(), 100);
        assert_eq!(back.height(), 50);
    }
}
