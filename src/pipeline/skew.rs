//! Skew estimation and removal.
//!
//! ## Estimator
//!
//! [`ProjectionProfileEstimator`] binarises a downscaled copy of the page
//! with Otsu's threshold and, for every candidate angle, projects the dark
//! pixels onto the normal of a text line at that angle. When the angle
//! matches the true baseline tilt, each text line collapses into a few
//! bins, so the sum of squared bin counts peaks. With `include_90` the
//! search also covers the window around 90°, which catches pages whose
//! lines run vertically.
//!
//! Angles are in degrees. A positive angle means the content is turned
//! clockwise on screen; removing it rotates counter-clockwise.
//!
//! ## Canvas
//!
//! Straightening by more than 45° swaps the output canvas to
//! `height × width`; anything smaller keeps the input size. Corners
//! uncovered by the rotation are filled with white.

use crate::config::SkewParams;
use crate::error::OrientError;
use crate::raster;
use image::{DynamicImage, GrayImage};
use imageproc::contrast::otsu_level;
use rayon::prelude::*;
use std::borrow::Cow;
use std::fmt;
use tracing::{debug, info};

/// Measures the small-angle tilt of a grayscale page.
pub trait SkewEstimator: Send + Sync {
    /// Skew in degrees inside the window described by `params`.
    fn estimate(&self, gray: &GrayImage, params: &SkewParams) -> Result<f32, OrientError>;
}

/// Projection-profile skew search over a fixed angle grid.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProjectionProfileEstimator;

impl SkewEstimator for ProjectionProfileEstimator {
    fn estimate(&self, gray: &GrayImage, params: &SkewParams) -> Result<f32, OrientError> {
        params.validate()?;

        let small = raster::cap_dimension(Cow::Borrowed(gray), params.max_resolution);
        let dark = dark_pixels(&small);
        if dark.is_empty() {
            debug!("No ink found; treating page as unskewed");
            return Ok(0.0);
        }

        let candidates = candidate_angles(params);
        let (w, h) = small.dimensions();
        let scored: Vec<(f32, u64)> = candidates
            .par_iter()
            .map(|&angle| (angle, profile_score(&dark, w, h, angle)))
            .collect();

        // Sequential pick keeps tie-breaking independent of scheduling.
        let mut best = (0.0f32, 0u64);
        let mut first = true;
        for (angle, score) in scored {
            let better = score > best.1 || (score == best.1 && angle.abs() < best.0.abs());
            if first || better {
                best = (angle, score);
                first = false;
            }
        }
        debug!(
            "Skew search: {} candidates, {} dark pixels on {}x{}, best {:.2}°",
            candidates.len(),
            dark.len(),
            w,
            h,
            best.0
        );
        Ok(best.0)
    }
}

/// Coordinates of pixels at or below the Otsu level. Uniform pages have
/// no ink.
fn dark_pixels(gray: &GrayImage) -> Vec<(f32, f32)> {
    let mut raw = gray.as_raw().iter();
    let Some(&first) = raw.next() else {
        return Vec::new();
    };
    if raw.all(|&p| p == first) {
        return Vec::new();
    }

    let level = otsu_level(gray);
    gray.enumerate_pixels()
        .filter(|(_, _, p)| p.0[0] <= level)
        .map(|(x, y, _)| (x as f32, y as f32))
        .collect()
}

/// Integer multiples of the step inside `[min, max]`, so 0° is hit
/// exactly, plus the same grid shifted by 90° when requested.
fn candidate_angles(params: &SkewParams) -> Vec<f32> {
    // Absorb float noise in min/step so the window ends are not lost.
    let lo = (params.min_degrees / params.step_degrees - 1e-4).ceil() as i64;
    let hi = (params.max_degrees / params.step_degrees + 1e-4).floor() as i64;
    let base: Vec<f32> = (lo..=hi).map(|i| i as f32 * params.step_degrees).collect();
    if params.include_90 {
        let turned: Vec<f32> = base.iter().map(|a| 90.0 + a).collect();
        base.into_iter().chain(turned).collect()
    } else {
        base
    }
}

/// Sum of squared bin counts of `r = −x·sinθ + y·cosθ`.
fn profile_score(dark: &[(f32, f32)], width: u32, height: u32, degrees: f32) -> u64 {
    let (sin, cos) = degrees.to_radians().sin_cos();
    let offset = (width + height) as i64 + 1;
    let mut bins = vec![0u32; 2 * offset as usize + 1];
    for &(x, y) in dark {
        let r = (-x * sin + y * cos).floor() as i64 + offset;
        bins[r as usize] += 1;
    }
    bins.iter().map(|&c| c as u64 * c as u64).sum()
}

// ── Corrector ────────────────────────────────────────────────────────────

/// Result of [`SkewCorrector::straighten`].
#[derive(Debug, Clone)]
pub struct Straightened<'a> {
    /// The input itself when no rotation was needed.
    pub image: Cow<'a, DynamicImage>,
    /// Measured skew in degrees.
    pub angle: f32,
}

/// Estimator plus rotate primitive.
pub struct SkewCorrector {
    estimator: Box<dyn SkewEstimator>,
    params: SkewParams,
}

impl SkewCorrector {
    pub fn new(params: SkewParams) -> Self {
        Self::with_estimator(Box::new(ProjectionProfileEstimator), params)
    }

    pub fn with_estimator(estimator: Box<dyn SkewEstimator>, params: SkewParams) -> Self {
        Self { estimator, params }
    }

    pub fn params(&self) -> &SkewParams {
        &self.params
    }

    /// Measure the skew of `image` in degrees.
    pub fn estimate(&self, image: &DynamicImage) -> Result<f32, OrientError> {
        let gray = raster::to_gray(image);
        self.estimator.estimate(&gray, &self.params)
    }

    /// Measure and remove skew. A zero angle returns the input borrowed.
    pub fn straighten<'a>(&self, image: &'a DynamicImage) -> Result<Straightened<'a>, OrientError> {
        let angle = self.estimate(image)?;
        let image = rotate(image, angle)?;
        if angle != 0.0 {
            info!(
                "Removed {:.2}° skew ({}x{} output)",
                angle,
                image.width(),
                image.height()
            );
        }
        Ok(Straightened { image, angle })
    }
}

impl fmt::Debug for SkewCorrector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SkewCorrector")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

/// Rotate `image` by `−angle` degrees about its centre into a fresh
/// canvas. The canvas is `height × width` when `|angle| > 45`.
pub fn rotate(image: &DynamicImage, angle: f32) -> Result<Cow<'_, DynamicImage>, OrientError> {
    if !angle.is_finite() {
        return Err(OrientError::InvalidConfig(format!(
            "skew angle must be finite, got {angle}"
        )));
    }
    if angle == 0.0 {
        return Ok(Cow::Borrowed(image));
    }
    let (w, h) = (image.width(), image.height());
    let (cw, ch) = if angle.abs() > 45.0 { (h, w) } else { (w, h) };
    let mut canvas = raster::new_canvas(image, cw, ch);
    raster::rotate_into(image, &mut canvas, -angle.to_radians())?;
    Ok(Cow::Owned(canvas))
}
