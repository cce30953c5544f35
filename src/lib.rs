//! # pageorient
//!
//! Detect and correct the orientation and skew of scanned document pages.
//!
//! ## Why tiles?
//!
//! A page-level classifier needs a large input and sees mostly blank
//! paper. Instead this crate samples up to a few hundred small, text-dense
//! 32×32 patches, classifies each one with a tiny 4-way model and lets the
//! confident ones vote. The vote is robust to pictures, stamps and margins,
//! and the model stays small enough to run many sessions side by side.
//!
//! ## Pipeline Overview
//!
//! ```text
//! page image
//!  │
//!  ├─ 1. Skew     (optional) projection-profile search, rotate about centre
//!  ├─ 2. Sample   grayscale, cap to 2000 px, top-perplexity 32×32 tiles
//!  ├─ 3. Classify 4 scores per tile, margin confidence
//!  ├─ 4. Vote     tiles above the threshold vote, ties → lowest class
//!  └─ 5. Rotate   lossless quarter turn back to upright
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pageorient::{ModelWeights, OrientConfig, Orienter};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let weights = ModelWeights::from_file("models/orientation.onnx")?;
//!     let mut orienter = Orienter::new(&weights, OrientConfig::default())?;
//!
//!     let page = image::open("scan.png")?;
//!     let fixed = orienter.straighten_then_classify(&page)?;
//!     eprintln!("orientation: {}°, skew: {:?}", fixed.orientation, fixed.skew_degrees);
//!     fixed.image.save("scan-upright.png")?;
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `orient` and `straighten` binaries (clap + anyhow + tracing-subscriber) |
//! | `onnx`  | on      | ONNX Runtime model backend (ort + ndarray) |
//!
//! Disable both to embed the pipeline with a custom [`OrientationModel`]:
//! ```toml
//! pageorient = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod orient;
pub mod output;
pub mod pipeline;
pub mod raster;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    CorrectionMode, FailurePolicy, OrientConfig, OrientConfigBuilder, OutputOptions, SkewParams,
    TileSelection,
};
pub use error::OrientError;
pub use orient::{deskew_file, load_image, rotate_upright, save_image, Orienter};
pub use output::{CorrectionReport, Corrected};
pub use pipeline::classify::{Classification, ModelWeights, Orientation, OrientationModel, PatchClassifier};
pub use pipeline::sample::{Tile, TileSampler};
pub use pipeline::skew::{ProjectionProfileEstimator, SkewCorrector, SkewEstimator, Straightened};
pub use pipeline::vote::{OrientationAggregator, OrientationVote};

#[cfg(feature = "onnx")]
pub use pipeline::onnx::{OnnxOptions, OnnxOrientationModel};
