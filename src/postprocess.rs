//! Fixed image-cleanup utility.
//!
//! Contract relied on by the quality gate: [`process`] always returns a
//! PNG at exactly the requested size class dimensions, two-tone, flattened
//! onto a pure white background. The thresholding math itself is settled
//! and not subject to redesign.

use image::imageops::FilterType;
use image::{GrayImage, Luma, Rgba};

use crate::error::GenerateError;
use crate::model::SizeClass;

/// Pixels darker than this become black; everything else white.
const TONE_THRESHOLD: u8 = 128;
/// Thumbnail width in pixels; height keeps the aspect ratio.
const THUMB_WIDTH: u32 = 512;

/// Clean a raw synthesis result into a print-ready page.
///
/// Decode, flatten alpha onto white, grayscale, resize to the exact target
/// dimensions, threshold to two-tone, remove isolated speckles, encode PNG.
pub fn process(raw: &[u8], size: SizeClass) -> Result<Vec<u8>, GenerateError> {
    let decoded = image::load_from_memory(raw)
        .map_err(|e| GenerateError::Postprocess(format!("decode: {e}")))?;

    // Flatten transparency onto a pure white background before any tone
    // work, otherwise transparent regions threshold to black.
    let rgba = decoded.to_rgba8();
    let mut flat = image::RgbaImage::from_pixel(rgba.width(), rgba.height(), Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut flat, &rgba, 0, 0);

    let gray = image::DynamicImage::ImageRgba8(flat).to_luma8();
    let (w, h) = size.dimensions();
    let resized = image::imageops::resize(&gray, w, h, FilterType::Lanczos3);

    let mut toned = GrayImage::from_fn(w, h, |x, y| {
        if resized.get_pixel(x, y).0[0] < TONE_THRESHOLD {
            Luma([0u8])
        } else {
            Luma([255u8])
        }
    });
    despeckle(&mut toned);

    encode_png(&toned)
}

/// Downscaled preview of a processed page.
pub fn thumbnail(page_png: &[u8]) -> Result<Vec<u8>, GenerateError> {
    let decoded = image::load_from_memory(page_png)
        .map_err(|e| GenerateError::Postprocess(format!("decode: {e}")))?;
    let scale = f64::from(THUMB_WIDTH) / f64::from(decoded.width().max(1));
    let height = ((f64::from(decoded.height()) * scale).round() as u32).max(1);
    let thumb = decoded.resize_exact(THUMB_WIDTH, height, FilterType::Triangle);
    encode_png(&thumb.to_luma8())
}

/// Remove isolated dark pixels with no dark neighbor among the eight
/// surrounding pixels.
fn despeckle(img: &mut GrayImage) {
    let (w, h) = img.dimensions();
    let mut isolated = Vec::new();
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            if img.get_pixel(x, y).0[0] != 0 {
                continue;
            }
            let mut dark_neighbors = 0;
            for dy in -1i64..=1 {
                for dx in -1i64..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = (x as i64 + dx) as u32;
                    let ny = (y as i64 + dy) as u32;
                    if img.get_pixel(nx, ny).0[0] == 0 {
                        dark_neighbors += 1;
                    }
                }
            }
            if dark_neighbors == 0 {
                isolated.push((x, y));
            }
        }
    }
    for (x, y) in isolated {
        img.put_pixel(x, y, Luma([255u8]));
    }
}

fn encode_png(img: &GrayImage) -> Result<Vec<u8>, GenerateError> {
    let mut bytes = Vec::new();
    img.write_to(
        &mut std::io::Cursor::new(&mut bytes),
        image::ImageFormat::Png,
    )
    .map_err(|e| GenerateError::Postprocess(format!("encode: {e}")))?;
    Ok(bytes)
}
