//! Configuration types for orientation detection and correction.
//!
//! All pipeline behaviour is controlled through [`OrientConfig`], built via
//! its [`OrientConfigBuilder`]. The defaults describe the standard
//! pipeline: 200 tiles of 32×32 px, a 10 % page margin, a 0.5 confidence
//! threshold and a ±2.5° skew search window.

use crate::error::OrientError;
use serde::{Deserialize, Serialize};

/// Configuration for an orientation pipeline.
///
/// Built via [`OrientConfig::builder()`] or using [`OrientConfig::default()`].
///
/// # Example
/// ```rust
/// use pageorient::OrientConfig;
///
/// let config = OrientConfig::builder()
///     .tile_count(100)
///     .workers(4)
///     .build()
///     .unwrap();
/// assert_eq!(config.tile_count, 100);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientConfig {
    /// Number of tiles classified per page. Default: 200.
    pub tile_count: usize,

    /// Edge length of each square tile in pixels. Default: 32.
    ///
    /// Must match the classifier's fixed input size, otherwise every
    /// classification fails with [`OrientError::InvalidInput`].
    pub tile_size: u32,

    /// Longest page edge considered by the sampler. Default: 2000.
    ///
    /// Larger pages are downscaled before the perplexity scan. This bounds
    /// the cost of scoring every grid cell and has no effect on the output
    /// resolution of the corrected page.
    pub max_dimension: u32,

    /// Fraction of the page ignored on every side. Default: 0.1.
    ///
    /// Dense text clusters toward the page centre; margins carry binding
    /// shadows, punch holes and scanner borders.
    pub edge_margin: f32,

    /// How the final tiles are picked from the perplexity ranking.
    pub selection: TileSelection,

    /// Minimum margin between the two best class scores for a tile to
    /// vote. Default: 0.5. Comparison is strict.
    pub confidence_threshold: f32,

    /// Number of classifier instances used to classify tiles in parallel.
    /// Default: 1 (sequential).
    pub workers: usize,

    /// What to do when inference fails on a single tile. Default: abort.
    pub failure_policy: FailurePolicy,

    /// Skew search parameters used by the straighten stage.
    pub skew: SkewParams,
}

impl Default for OrientConfig {
    fn default() -> Self {
        Self {
            tile_count: 200,
            tile_size: 32,
            max_dimension: 2000,
            edge_margin: 0.1,
            selection: TileSelection::default(),
            confidence_threshold: 0.5,
            workers: 1,
            failure_policy: FailurePolicy::default(),
            skew: SkewParams::default(),
        }
    }
}

impl OrientConfig {
    /// Create a new builder for `OrientConfig`.
    pub fn builder() -> OrientConfigBuilder {
        OrientConfigBuilder {
            config: Self::default(),
        }
    }

    /// Check every constraint the builder enforces.
    ///
    /// Useful for configs deserialised from disk, which bypass the builder.
    pub fn validate(&self) -> Result<(), OrientError> {
        if self.tile_count == 0 {
            return Err(OrientError::InvalidConfig("tile_count must be ≥ 1".into()));
        }
        if self.tile_size < 5 {
            return Err(OrientError::InvalidConfig(format!(
                "tile_size must be ≥ 5, got {}",
                self.tile_size
            )));
        }
        if self.max_dimension < self.tile_size {
            return Err(OrientError::InvalidConfig(format!(
                "max_dimension ({}) must be ≥ tile_size ({})",
                self.max_dimension, self.tile_size
            )));
        }
        if !(0.0..0.5).contains(&self.edge_margin) {
            return Err(OrientError::InvalidConfig(format!(
                "edge_margin must be in [0, 0.5), got {}",
                self.edge_margin
            )));
        }
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(OrientError::InvalidConfig(format!(
                "confidence_threshold must be in [0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if self.workers == 0 {
            return Err(OrientError::InvalidConfig("workers must be ≥ 1".into()));
        }
        if let TileSelection::ShuffledTop { pool_factor, .. } = self.selection {
            if pool_factor == 0 {
                return Err(OrientError::InvalidConfig(
                    "pool_factor must be ≥ 1".into(),
                ));
            }
        }
        self.skew.validate()
    }
}

/// Builder for [`OrientConfig`].
#[derive(Debug)]
pub struct OrientConfigBuilder {
    config: OrientConfig,
}

impl OrientConfigBuilder {
    pub fn tile_count(mut self, n: usize) -> Self {
        self.config.tile_count = n.max(1);
        self
    }

    pub fn tile_size(mut self, px: u32) -> Self {
        self.config.tile_size = px;
        self
    }

    pub fn max_dimension(mut self, px: u32) -> Self {
        self.config.max_dimension = px;
        self
    }

    pub fn edge_margin(mut self, fraction: f32) -> Self {
        self.config.edge_margin = fraction;
        self
    }

    pub fn selection(mut self, selection: TileSelection) -> Self {
        self.config.selection = selection;
        self
    }

    pub fn confidence_threshold(mut self, t: f32) -> Self {
        self.config.confidence_threshold = t.clamp(0.0, 1.0);
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.max(1);
        self
    }

    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    pub fn skew(mut self, params: SkewParams) -> Self {
        self.config.skew = params;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<OrientConfig, OrientError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Tile selection policy applied after ranking candidates by perplexity.
///
/// | Policy | Behaviour |
/// |--------|-----------|
/// | `TopK` | highest-perplexity tiles, lowest variance |
/// | `ShuffledTop` | random draw from the top `pool_factor × tile_count` (default) |
///
/// Both are deterministic for identical inputs. `ShuffledTop` keeps the
/// sample from collapsing onto one dense structure such as a single table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TileSelection {
    /// Take the `tile_count` highest-perplexity tiles.
    TopK,
    /// Shuffle the top `pool_factor × tile_count` tiles with a fixed seed,
    /// then take the first `tile_count`.
    ShuffledTop { pool_factor: usize, seed: u64 },
}

impl Default for TileSelection {
    fn default() -> Self {
        TileSelection::ShuffledTop {
            pool_factor: 3,
            seed: 0x7e57_0123_0456,
        }
    }
}

/// Reaction to an inference failure on one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Abort the whole page on the first failed tile (default).
    #[default]
    Abort,
    /// Log the failure, count the tile as skipped and keep voting.
    SkipTile,
}

/// Which correction a pipeline call applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CorrectionMode {
    /// Quarter-turn correction only (classify → rotate).
    Upright,
    /// Small-angle skew removal only.
    Deskew,
    /// Skew removal, then classification of the straightened page,
    /// then quarter-turn correction (default).
    #[default]
    Full,
}

/// Search window for the skew estimator.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SkewParams {
    /// Most negative angle considered, in degrees. Default: -2.5.
    pub min_degrees: f32,
    /// Most positive angle considered, in degrees. Default: 2.5.
    pub max_degrees: f32,
    /// Angular resolution of the search, in degrees. Default: 0.1.
    pub step_degrees: f32,
    /// Also search the window around 90°, so pages scanned sideways are
    /// rotated onto their long edge first. Default: true.
    pub include_90: bool,
    /// Longest image edge used during the search. Default: 1000.
    pub max_resolution: u32,
}

impl Default for SkewParams {
    fn default() -> Self {
        Self {
            min_degrees: -2.5,
            max_degrees: 2.5,
            step_degrees: 0.1,
            include_90: true,
            max_resolution: 1000,
        }
    }
}

impl SkewParams {
    pub fn validate(&self) -> Result<(), OrientError> {
        if !self.step_degrees.is_finite() || self.step_degrees <= 0.0 {
            return Err(OrientError::InvalidConfig(format!(
                "skew step must be > 0, got {}",
                self.step_degrees
            )));
        }
        if self.min_degrees > self.max_degrees {
            return Err(OrientError::InvalidConfig(format!(
                "skew window is empty: min {} > max {}",
                self.min_degrees, self.max_degrees
            )));
        }
        if self.min_degrees < -45.0 || self.max_degrees > 45.0 {
            return Err(OrientError::InvalidConfig(format!(
                "skew window must lie within ±45°, got [{}, {}]",
                self.min_degrees, self.max_degrees
            )));
        }
        if self.max_resolution < 16 {
            return Err(OrientError::InvalidConfig(format!(
                "skew max_resolution must be ≥ 16, got {}",
                self.max_resolution
            )));
        }
        Ok(())
    }
}

/// Encoding options for corrected pages written to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputOptions {
    /// JPEG quality (1–100) when the output extension is `.jpg`/`.jpeg`.
    /// Default: 95.
    pub jpeg_quality: u8,
    /// Unix permission bits of the written file. Default: `0o644`.
    pub mode: u32,
}

impl Default for OutputOptions {
    fn default() -> Self {
        Self {
            jpeg_quality: 95,
            mode: 0o644,
        }
    }
}
