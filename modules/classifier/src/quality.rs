//! Coarse scan-quality scoring.
//!
//! The score is informational and feeds extraction triage dashboards;
//! it combines a resolution score with a sharpness proxy (mean absolute
//! luma gradient; blurry scans have weak gradients).

use thiserror::Error;

/// Pixel count that earns a full resolution score (~300 DPI letter
/// scans land well above this).
const TARGET_PIXELS: f64 = 1_000_000.0;

/// Mean absolute gradient that earns a full sharpness score.
const TARGET_GRADIENT: f64 = 20.0;

const RESOLUTION_WEIGHT: f64 = 0.6;
const SHARPNESS_WEIGHT: f64 = 0.4;

#[derive(Debug, Error)]
pub enum QualityError {
    #[error("unreadable page image: {0}")]
    UnreadablePage(String),
}

/// Score a rendered page in `[0, 1]` from coarse image properties.
pub fn quality_score(png: &[u8]) -> Result<f64, QualityError> {
    let image = image::load_from_memory(png)
        .map_err(|e| QualityError::UnreadablePage(e.to_string()))?;
    let luma = image.into_luma8();
    let (width, height) = luma.dimensions();

    let resolution = ((width as f64 * height as f64) / TARGET_PIXELS).min(1.0);
    let sharpness = (mean_gradient(&luma) / TARGET_GRADIENT).min(1.0);

    Ok(RESOLUTION_WEIGHT * resolution + SHARPNESS_WEIGHT * sharpness)
}

/// Mean absolute horizontal+vertical neighbor difference over the luma
/// plane.
fn mean_gradient(luma: &image::GrayImage) -> f64 {
    let (width, height) = luma.dimensions();
    if width < 2 || height < 2 {
        return 0.0;
    }

    let mut total: u64 = 0;
    let mut samples: u64 = 0;
    for y in 0..height - 1 {
        for x in 0..width - 1 {
            let here = luma.get_pixel(x, y).0[0] as i32;
            let right = luma.get_pixel(x + 1, y).0[0] as i32;
            let below = luma.get_pixel(x, y + 1).0[0] as i32;
            total += (here - right).unsigned_abs() as u64;
            total += (here - below).unsigned_abs() as u64;
            samples += 2;
        }
    }

    total as f64 / samples as f64
}
