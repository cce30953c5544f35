//! Result types returned by the pipeline entry points.

use crate::config::CorrectionMode;
use crate::pipeline::classify::Orientation;
use crate::pipeline::vote::OrientationVote;
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::path::PathBuf;

/// A corrected page plus what was done to it.
///
/// `image` borrows the input when no stage changed a pixel; call
/// [`Corrected::into_owned`] when an owned image is needed regardless.
#[derive(Debug, Clone)]
pub struct Corrected<'a> {
    pub image: Cow<'a, DynamicImage>,
    /// Detected orientation before correction. `Deg0` when the call did not
    /// classify (deskew only).
    pub orientation: Orientation,
    /// Measured skew in degrees, when the call straightened the page.
    pub skew_degrees: Option<f32>,
    /// Full vote, when the call classified the page.
    pub vote: Option<OrientationVote>,
}

impl Corrected<'_> {
    /// True when the output shares its pixels with the input.
    pub fn is_unchanged(&self) -> bool {
        matches!(self.image, Cow::Borrowed(_))
    }

    pub fn into_owned(self) -> DynamicImage {
        self.image.into_owned()
    }
}

/// Machine-readable summary of one pipeline call (`--json` output).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionReport {
    pub input: PathBuf,
    /// Written file, absent when the call only detected.
    pub output: Option<PathBuf>,
    pub mode: CorrectionMode,
    /// Clockwise turn of the content before correction, in degrees.
    /// Absent when the call did not classify (deskew only).
    pub orientation_degrees: Option<u32>,
    pub skew_degrees: Option<f32>,
    pub vote: Option<OrientationVote>,
    /// `[width, height]` of the decoded input.
    pub input_dimensions: [u32; 2],
    /// `[width, height]` of the corrected page, when one was produced.
    pub output_dimensions: Option<[u32; 2]>,
    pub duration_ms: u64,
}

impl CorrectionReport {
    /// True when classification ran but no tile was confident enough to vote.
    pub fn is_fallback(&self) -> bool {
        self.vote.as_ref().is_some_and(OrientationVote::is_fallback)
    }

    /// The `Orientation: <degrees>` result line printed by the binaries.
    pub fn orientation_line(&self) -> String {
        match self.orientation_degrees {
            Some(degrees) => format!("Orientation: {degrees}"),
            None => "Orientation: not measured".to_string(),
        }
    }
}
