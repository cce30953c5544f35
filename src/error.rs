//! Error types for the pageorient library.
//!
//! Every failure is fatal to the pipeline call that hit it: there are no
//! retries and no partial results. The variants split into two groups:
//!
//! * **Core errors** raised by the orientation pipeline itself
//!   ([`OrientError::ModelUnavailable`], [`OrientError::InvalidInput`],
//!   [`OrientError::ImageTooSmall`], [`OrientError::InferenceFailed`]).
//! * **I/O errors** raised by the file helpers in [`crate::orient`]
//!   (missing input, decode/encode failures, unwritable output).
//!
//! The library never terminates the process; binaries decide how to report.

use std::path::PathBuf;
use thiserror::Error;

/// All errors returned by the pageorient library.
#[derive(Debug, Error)]
pub enum OrientError {
    // ── Model errors ──────────────────────────────────────────────────────
    /// The classifier was used before loading, after release, or its
    /// weights could not be loaded.
    #[error("Orientation model unavailable: {reason}")]
    ModelUnavailable { reason: String },

    /// A patch of the wrong size reached the classifier.
    ///
    /// Indicates a sampler bug rather than a runtime condition.
    #[error("Invalid classifier input: expected {expected}x{expected} patch, got {width}x{height}")]
    InvalidInput {
        width: u32,
        height: u32,
        expected: u32,
    },

    /// The model backend failed on a structurally valid patch.
    #[error("Orientation model inference failed: {detail}")]
    InferenceFailed { detail: String },

    // ── Image errors ──────────────────────────────────────────────────────
    /// The page interior (after margin exclusion) cannot hold a single tile.
    #[error("Image is too small to analyse ({width}x{height})\nPre-scale the page or skip orientation correction.")]
    ImageTooSmall { width: u32, height: u32 },

    /// Input image was not found at the given path.
    #[error("Image file not found: '{path}'")]
    ImageNotFound { path: PathBuf },

    /// The file exists but could not be decoded as an image.
    #[error("Failed to decode image '{path}': {source}")]
    ImageDecode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// The corrected image could not be encoded.
    #[error("Failed to encode image '{path}': {source}")]
    ImageEncode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    /// Could not create or write the output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder or parameter validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl OrientError {
    /// Shorthand for [`OrientError::ModelUnavailable`].
    pub fn model_unavailable(reason: impl Into<String>) -> Self {
        Self::ModelUnavailable {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`OrientError::InferenceFailed`].
    pub fn inference_failed(detail: impl Into<String>) -> Self {
        Self::InferenceFailed {
            detail: detail.into(),
        }
    }

    /// True for failures tied to a single tile's inference, which the
    /// aggregator may skip under [`crate::config::FailurePolicy::SkipTile`].
    pub fn is_tile_local(&self) -> bool {
        matches!(self, Self::InferenceFailed { .. })
    }
}
