//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! VLM APIs accept images as base64 data-URIs embedded in the JSON request
//! body. PNG is chosen over JPEG because it is lossless — crisp text matters
//! far more than file size when the model has to read stamped ICD-10 codes
//! and handwritten observations off a scan. `detail: "high"` instructs
//! GPT-4-class models to use the full image tile budget; without it fine
//! print and small table cells are lost.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a rasterised page as a base64 PNG ready for the model request.
pub fn encode_page(img: &DynamicImage) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded page → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255])));
        let data = encode_page(&img).expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        assert!(!data.data.is_empty());
        // Verify it's valid base64
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert!(!decoded.is_empty());
    }
}
