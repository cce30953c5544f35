//! Tile sampling: pick the most informative square patches of a page.
//!
//! ## Why not a plain grid?
//!
//! Most of a scanned page is blank paper. A classifier shown a blank tile
//! guesses, and enough guesses drown out the real signal. The sampler
//! therefore ranks every grid cell by [`perplexity`] (a count of sharp
//! horizontal intensity transitions, i.e. text strokes) and keeps only the
//! top of the ranking.
//!
//! ## Steps
//!
//! 1. Grayscale and cap the longest edge ([`TileSampler::prepare`]).
//! 2. Drop a fixed margin on every side.
//! 3. Lay a non-overlapping grid of `tile_size` cells over the interior.
//! 4. Rank cells by perplexity, highest first (stable).
//! 5. Select per [`TileSelection`].
//!
//! Sampling is single-threaded and fully deterministic: the same page and
//! configuration always yield the same tile origins in the same order.

use crate::config::{OrientConfig, TileSelection};
use crate::raster::{self, GrayView};
use image::{DynamicImage, GrayImage};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use std::borrow::Cow;
use tracing::debug;

/// Width of the running window used by [`perplexity`].
const WINDOW: usize = 5;

/// Minimum difference between `WINDOW × pixel` and the preceding window sum
/// that counts as a transition.
const TRANSITION_THRESHOLD: i32 = 50;

/// A square view into the sampler's normalised page.
#[derive(Debug, Clone, Copy)]
pub struct Tile<'a> {
    /// Left edge in normalised-page pixels.
    pub x: u32,
    /// Top edge in normalised-page pixels.
    pub y: u32,
    /// Edge length; tiles are square.
    pub size: u32,
    /// Information density score, see [`perplexity`].
    pub perplexity: f32,
    /// Zero-copy pixels; shares the page's stride.
    pub view: GrayView<'a>,
}

/// Extracts a bounded number of high-perplexity tiles from a page.
#[derive(Debug, Clone)]
pub struct TileSampler {
    tile_count: usize,
    tile_size: u32,
    max_dimension: u32,
    edge_margin: f32,
    selection: TileSelection,
}

impl TileSampler {
    /// Sampler with the given tile budget and the default margin, size cap
    /// and selection policy.
    pub fn new(tile_count: usize, tile_size: u32) -> Self {
        let defaults = OrientConfig::default();
        Self {
            tile_count,
            tile_size,
            max_dimension: defaults.max_dimension,
            edge_margin: defaults.edge_margin,
            selection: defaults.selection,
        }
    }

    pub fn from_config(config: &OrientConfig) -> Self {
        Self {
            tile_count: config.tile_count,
            tile_size: config.tile_size,
            max_dimension: config.max_dimension,
            edge_margin: config.edge_margin,
            selection: config.selection,
        }
    }

    pub fn with_selection(mut self, selection: TileSelection) -> Self {
        self.selection = selection;
        self
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    /// Grayscale + size cap. Borrows when the page is already an 8-bit
    /// grayscale image within the cap.
    pub fn prepare<'a>(&self, image: &'a DynamicImage) -> Cow<'a, GrayImage> {
        raster::cap_dimension(raster::to_gray(image), self.max_dimension)
    }

    /// Sample tiles from a page already passed through [`Self::prepare`].
    ///
    /// Returns an empty vector when the page interior cannot hold a single
    /// tile; callers must treat that as "too small to analyse". May return
    /// fewer than `tile_count` tiles.
    pub fn sample<'a>(&self, page: &'a GrayImage) -> Vec<Tile<'a>> {
        let Some(grid) = Grid::fit(page.width(), page.height(), self.tile_size, self.edge_margin)
        else {
            debug!(
                "Page {}x{} too small for {}px tiles",
                page.width(),
                page.height(),
                self.tile_size
            );
            return Vec::new();
        };

        let view = GrayView::from_image(page);
        let mut tiles: Vec<Tile<'a>> = grid
            .origins()
            .filter_map(|(x, y)| {
                let tile = view.crop(x, y, self.tile_size, self.tile_size)?;
                Some(Tile {
                    x,
                    y,
                    size: self.tile_size,
                    perplexity: perplexity(tile),
                    view: tile,
                })
            })
            .collect();
        let candidates = tiles.len();

        tiles.sort_by(|a, b| b.perplexity.total_cmp(&a.perplexity));

        match self.selection {
            TileSelection::TopK => tiles.truncate(self.tile_count),
            TileSelection::ShuffledTop { pool_factor, seed } => {
                tiles.truncate(self.tile_count.saturating_mul(pool_factor));
                let mut rng = StdRng::seed_from_u64(seed);
                tiles.shuffle(&mut rng);
                tiles.truncate(self.tile_count);
            }
        }

        debug!(
            "Sampled {} of {} candidate tiles ({}x{} grid on {}x{} page)",
            tiles.len(),
            candidates,
            grid.cols,
            grid.rows,
            page.width(),
            page.height()
        );
        tiles
    }
}

/// Candidate grid over the page interior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Grid {
    x0: u32,
    y0: u32,
    cols: u32,
    rows: u32,
    size: u32,
}

impl Grid {
    /// `None` when either axis has a negative cell count.
    ///
    /// The last full cell along each axis is dropped, which keeps tiles
    /// clear of the far margin even when the interior span is an exact
    /// multiple of the tile size.
    fn fit(width: u32, height: u32, size: u32, margin: f32) -> Option<Self> {
        if size == 0 {
            return None;
        }
        // Widening 0.1f32 gives 0.10000000149, which would floor 640 × 0.9
        // to 575; margins are meaningful to a millionth at most.
        let margin = (margin as f64 * 1e6).round() / 1e6;
        let x1 = (width as f64 * margin) as i64;
        let x2 = (width as f64 * (1.0 - margin)) as i64;
        let y1 = (height as f64 * margin) as i64;
        let y2 = (height as f64 * (1.0 - margin)) as i64;

        let cols = (x2 - x1) / size as i64 - 1;
        let rows = (y2 - y1) / size as i64 - 1;
        if cols < 0 || rows < 0 {
            return None;
        }
        Some(Self {
            x0: x1 as u32,
            y0: y1 as u32,
            cols: cols as u32,
            rows: rows as u32,
            size,
        })
    }

    /// Cell origins in row-major order.
    fn origins(self) -> impl Iterator<Item = (u32, u32)> {
        (0..self.rows).flat_map(move |row| {
            (0..self.cols).map(move |col| (self.x0 + col * self.size, self.y0 + row * self.size))
        })
    }
}

/// Horizontal-transition density of a grayscale patch.
///
/// Each pixel from the sixth column on is compared with the sum of the five
/// pixels before it; a difference above the threshold (in window-sum units)
/// counts as one transition. The count is normalised by the patch area, so
/// blank paper scores 0 and dense text scores high. Rows narrower than the
/// window contribute nothing.
pub fn perplexity(view: GrayView<'_>) -> f32 {
    let (width, height) = (view.width() as usize, view.height() as usize);
    if width < WINDOW || height == 0 {
        return 0.0;
    }

    let mut transitions = 0usize;
    for y in 0..view.height() {
        let row = view.row(y);
        let mut window: i32 = row[..WINDOW].iter().map(|&p| p as i32).sum();
        for x in WINDOW..width {
            let previous = window;
            window += row[x] as i32 - row[x - WINDOW] as i32;
            if (row[x] as i32 * WINDOW as i32 - previous).abs() > TRANSITION_THRESHOLD {
                transitions += 1;
            }
        }
    }
    transitions as f32 / (width * height) as f32
}
