//! Deterministic quality gate for generated pages.
//!
//! A pure function over pixel data: identical input bytes always yield an
//! identical report. Failures are never fatal on their own; they set the
//! needs-review flag and feed the caller's regeneration decision.

use image::GrayImage;
use thiserror::Error;

/// Intensity at or below this counts as near-black.
const NEAR_BLACK_MAX: u8 = 60;
/// Intensity at or above this counts as near-white.
const NEAR_WHITE_MIN: u8 = 200;
/// Fraction of pixels that must fall in the two tone bands.
const BINARY_TONE_RATIO: f64 = 0.90;
/// Mean intensity ceiling below which the page is not blank.
const CONTENT_MEAN_MAX: f64 = 250.0;
/// Mean intensity floor above which the page remains colorable.
const DENSITY_MEAN_MIN: f64 = 120.0;
/// Width in pixels of the protected border band on every edge.
const MARGIN_PX: u32 = 24;
/// Intensity below this counts as a dark pixel inside the margin band.
const MARGIN_DARK_MAX: u8 = 128;

/// Names of the individual checks, in report order.
pub const CHECK_NAMES: [&str; 4] = ["binary_tone", "has_content", "not_over_dense", "margin_safety"];

/// Result of running the gate on one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualityReport {
    pub passed: bool,
    /// Percentage of checks passed, 0-100.
    pub score: u8,
    pub failed_checks: Vec<&'static str>,
}

/// The input bytes could not be decoded as an image.
#[derive(Debug, Error)]
#[error("could not decode image: {0}")]
pub struct QualityInputError(String);

/// Run all checks on the encoded image bytes of one page.
pub fn check(bytes: &[u8]) -> Result<QualityReport, QualityInputError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| QualityInputError(e.to_string()))?
        .to_luma8();
    Ok(check_pixels(&img))
}

/// Run all checks on an already-decoded grayscale bitmap.
pub fn check_pixels(img: &GrayImage) -> QualityReport {
    let checks: [(&'static str, bool); 4] = [
        ("binary_tone", binary_tone(img)),
        ("has_content", has_content(img)),
        ("not_over_dense", not_over_dense(img)),
        ("margin_safety", margin_safety(img)),
    ];

    let failed_checks: Vec<&'static str> = checks
        .iter()
        .filter(|(_, ok)| !ok)
        .map(|(name, _)| *name)
        .collect();
    let passed_count = checks.len() - failed_checks.len();
    let score = (passed_count * 100 / checks.len()) as u8;

    QualityReport {
        passed: failed_checks.is_empty(),
        score,
        failed_checks,
    }
}

fn mean_intensity(img: &GrayImage) -> f64 {
    let total: u64 = img.pixels().map(|p| u64::from(p.0[0])).sum();
    let count = u64::from(img.width()) * u64::from(img.height());
    if count == 0 {
        return 255.0;
    }
    total as f64 / count as f64
}

/// The page must be effectively two-valued: near-black line work on a
/// near-white ground.
fn binary_tone(img: &GrayImage) -> bool {
    let count = u64::from(img.width()) * u64::from(img.height());
    if count == 0 {
        return false;
    }
    let in_band = img
        .pixels()
        .filter(|p| p.0[0] <= NEAR_BLACK_MAX || p.0[0] >= NEAR_WHITE_MIN)
        .count() as u64;
    in_band as f64 / count as f64 >= BINARY_TONE_RATIO
}

/// Not a blank page.
fn has_content(img: &GrayImage) -> bool {
    mean_intensity(img) < CONTENT_MEAN_MAX
}

/// Not mostly black; the page must remain colorable.
fn not_over_dense(img: &GrayImage) -> bool {
    mean_intensity(img) > DENSITY_MEAN_MIN
}

/// A fixed-width band around all four edges must contain no dark pixels.
/// Protects print bleed and trim margins.
fn margin_safety(img: &GrayImage) -> bool {
    let (w, h) = img.dimensions();
    if w <= MARGIN_PX * 2 || h <= MARGIN_PX * 2 {
        // Too small to have a meaningful interior; the whole image is band.
        return img.pixels().all(|p| p.0[0] >= MARGIN_DARK_MAX);
    }
    for (x, y, p) in img.enumerate_pixels() {
        let in_band =
            x < MARGIN_PX || y < MARGIN_PX || x >= w - MARGIN_PX || y >= h - MARGIN_PX;
        if in_band && p.0[0] < MARGIN_DARK_MAX {
            return false;
        }
    }
    true
}
