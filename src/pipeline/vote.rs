//! Page-level orientation by confidence-thresholded majority vote.
//!
//! ## Decision rule
//!
//! Every sampled tile is classified. A tile votes for its class only when
//! its margin confidence is **strictly** above the threshold; the rest
//! abstain. The class with the most votes wins and ties go to the lowest
//! class index. If nobody votes the page is reported as upright, flagged by
//! [`OrientationVote::is_fallback`].
//!
//! ## Parallelism
//!
//! With more than one classifier the tile list is split into contiguous
//! chunks, one per classifier, and the chunks run on the rayon pool. Each
//! worker keeps a private [`Tally`]; tallies are merged after the join, so
//! the outcome is identical to a sequential run.

use super::classify::{Classification, Orientation, PatchClassifier};
use super::sample::{Tile, TileSampler};
use crate::config::{FailurePolicy, OrientConfig};
use crate::error::OrientError;
use image::DynamicImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Outcome of one page vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrientationVote {
    pub orientation: Orientation,
    /// Votes per class in [`Orientation::ALL`] order.
    pub votes: [usize; 4],
    /// Tiles handed to the classifier.
    pub sampled: usize,
    /// Tiles whose confidence did not clear the threshold.
    pub abstained: usize,
    /// Tiles dropped after an inference failure under
    /// [`FailurePolicy::SkipTile`].
    pub skipped: usize,
}

impl OrientationVote {
    pub fn total_votes(&self) -> usize {
        self.votes.iter().sum()
    }

    /// True when no tile voted and the orientation is the upright default.
    pub fn is_fallback(&self) -> bool {
        self.total_votes() == 0
    }

    fn decide(tally: Tally, sampled: usize) -> Self {
        let mut winner = 0;
        for class in 1..4 {
            if tally.votes[class] > tally.votes[winner] {
                winner = class;
            }
        }
        Self {
            orientation: Orientation::ALL[winner],
            votes: tally.votes,
            sampled,
            abstained: tally.abstained,
            skipped: tally.skipped,
        }
    }
}

/// Per-worker vote counts.
#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    votes: [usize; 4],
    abstained: usize,
    skipped: usize,
}

impl Tally {
    fn record(
        &mut self,
        tile: &Tile<'_>,
        outcome: Result<Classification, OrientError>,
        threshold: f32,
        policy: FailurePolicy,
    ) -> Result<(), OrientError> {
        match outcome {
            Ok(c) if c.confidence > threshold => self.votes[c.orientation.index()] += 1,
            Ok(_) => self.abstained += 1,
            Err(e) if policy == FailurePolicy::SkipTile && e.is_tile_local() => {
                warn!("Skipping tile at ({}, {}): {}", tile.x, tile.y, e);
                self.skipped += 1;
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }

    fn merge(mut self, other: Tally) -> Tally {
        for (a, b) in self.votes.iter_mut().zip(other.votes) {
            *a += b;
        }
        self.abstained += other.abstained;
        self.skipped += other.skipped;
        self
    }
}

/// Samples a page, classifies the tiles and reduces them to one decision.
#[derive(Debug)]
pub struct OrientationAggregator {
    sampler: TileSampler,
    classifiers: Vec<PatchClassifier>,
    confidence_threshold: f32,
    failure_policy: FailurePolicy,
}

impl OrientationAggregator {
    /// One classifier per worker; at least one is required.
    pub fn new(
        classifiers: Vec<PatchClassifier>,
        config: &OrientConfig,
    ) -> Result<Self, OrientError> {
        if classifiers.is_empty() {
            return Err(OrientError::model_unavailable(
                "aggregator needs at least one classifier",
            ));
        }
        Ok(Self {
            sampler: TileSampler::from_config(config),
            classifiers,
            confidence_threshold: config.confidence_threshold,
            failure_policy: config.failure_policy,
        })
    }

    pub fn workers(&self) -> usize {
        self.classifiers.len()
    }

    /// Vote on the orientation of `image`.
    ///
    /// # Errors
    /// * [`OrientError::ImageTooSmall`] when the sampler finds no tiles
    /// * the first classifier error, except tile-local failures skipped
    ///   under [`FailurePolicy::SkipTile`]
    pub fn determine_orientation(
        &mut self,
        image: &DynamicImage,
    ) -> Result<OrientationVote, OrientError> {
        let page = self.sampler.prepare(image);
        let tiles = self.sampler.sample(&page);
        if tiles.is_empty() {
            return Err(OrientError::ImageTooSmall {
                width: image.width(),
                height: image.height(),
            });
        }

        let threshold = self.confidence_threshold;
        let policy = self.failure_policy;
        let tally = if self.classifiers.len() == 1 {
            let classifier = &mut self.classifiers[0];
            let mut tally = Tally::default();
            for tile in &tiles {
                let outcome = classifier.classify(tile.view);
                tally.record(tile, outcome, threshold, policy)?;
            }
            tally
        } else {
            let chunk = tiles.len().div_ceil(self.classifiers.len());
            debug!(
                "Classifying {} tiles on {} workers ({} per chunk)",
                tiles.len(),
                self.classifiers.len(),
                chunk
            );
            let partials: Vec<Result<Tally, OrientError>> = tiles
                .par_chunks(chunk)
                .zip(self.classifiers.par_iter_mut())
                .map(|(chunk, classifier)| {
                    let mut tally = Tally::default();
                    for tile in chunk {
                        let outcome = classifier.classify(tile.view);
                        tally.record(tile, outcome, threshold, policy)?;
                    }
                    Ok(tally)
                })
                .collect();
            // Chunks are in tile order, so this reports the earliest failure.
            let mut tally = Tally::default();
            for partial in partials {
                tally = tally.merge(partial?);
            }
            tally
        };

        let vote = OrientationVote::decide(tally, tiles.len());
        if vote.is_fallback() {
            info!(
                "No confident tiles among {} sampled; assuming upright",
                vote.sampled
            );
        } else {
            info!(
                "Orientation {}° ({} of {} tiles voted, {} abstained, {} skipped)",
                vote.orientation.degrees(),
                vote.total_votes(),
                vote.sampled,
                vote.abstained,
                vote.skipped
            );
        }
        debug!("Vote counts: {:?}", vote.votes);
        Ok(vote)
    }

    /// Release every classifier's model.
    pub fn release(&mut self) {
        for classifier in &mut self.classifiers {
            classifier.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TileSelection;
    use crate::pipeline::classify::OrientationModel;
    use crate::raster::GrayView;
    use image::{GrayImage, Luma};

    /// Textured page: every 32px cell has a distinct gray level plus
    /// vertical strokes so every cell scores the same perplexity.
    fn page(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageLuma8(GrayImage::from_fn(width, height, |x, y| {
            if x % 8 < 2 {
                Luma([0])
            } else {
                Luma([(100 + ((x / 32) * 7 + (y / 32) * 13) % 150) as u8])
            }
        }))
    }

    fn config(tile_count: usize) -> OrientConfig {
        OrientConfig::builder()
            .tile_count(tile_count)
            .selection(TileSelection::TopK)
            .build()
            .unwrap()
    }

    fn one_hot(class: usize) -> [f32; 4] {
        let mut s = [0.0; 4];
        s[class] = 1.0;
        s
    }

    struct Fixed([f32; 4]);
    impl OrientationModel for Fixed {
        fn infer(&mut self, _: GrayView<'_>) -> Result<[f32; 4], OrientError> {
            Ok(self.0)
        }
    }

    /// Alternates between two classes call by call.
    struct Alternating(usize, usize, usize);
    impl OrientationModel for Alternating {
        fn infer(&mut self, _: GrayView<'_>) -> Result<[f32; 4], OrientError> {
            self.2 += 1;
            Ok(one_hot(if self.2 % 2 == 0 { self.0 } else { self.1 }))
        }
    }

    /// Fails every `n`th call, otherwise votes 180.
    struct Flaky {
        every: usize,
        calls: usize,
    }
    impl OrientationModel for Flaky {
        fn infer(&mut self, _: GrayView<'_>) -> Result<[f32; 4], OrientError> {
            self.calls += 1;
            if self.calls % self.every == 0 {
                Err(OrientError::inference_failed("backend status -1"))
            } else {
                Ok(one_hot(2))
            }
        }
    }

    /// Class derived from the patch's background level, so the answer
    /// depends only on the tile, never on call order.
    struct ByContent;
    impl OrientationModel for ByContent {
        fn infer(&mut self, patch: GrayView<'_>) -> Result<[f32; 4], OrientError> {
            Ok(one_hot(patch.row(0)[4] as usize % 4))
        }
    }

    fn aggregator(models: Vec<Box<dyn OrientationModel>>, config: &OrientConfig) -> OrientationAggregator {
        let classifiers = models.into_iter().map(PatchClassifier::new).collect();
        OrientationAggregator::new(classifiers, config).unwrap()
    }

    #[test]
    fn unanimous_vote() {
        let mut agg = aggregator(vec![Box::new(Fixed(one_hot(3)))], &config(20));
        let vote = agg.determine_orientation(&page(640, 640)).unwrap();
        assert_eq!(vote.orientation, Orientation::Deg270);
        assert_eq!(vote.votes, [0, 0, 0, 20]);
        assert_eq!(vote.sampled, 20);
        assert!(!vote.is_fallback());
    }

    #[test]
    fn threshold_is_strict() {
        // Margin exactly 0.5 does not clear a 0.5 threshold.
        let mut agg = aggregator(vec![Box::new(Fixed([0.0, 0.75, 0.25, 0.0]))], &config(20));
        let vote = agg.determine_orientation(&page(640, 640)).unwrap();
        assert_eq!(vote.orientation, Orientation::Deg0);
        assert!(vote.is_fallback());
        assert_eq!(vote.abstained, 20);
    }

    #[test]
    fn ties_go_to_lowest_class() {
        let mut agg = aggregator(vec![Box::new(Alternating(3, 1, 0))], &config(20));
        let vote = agg.determine_orientation(&page(640, 640)).unwrap();
        assert_eq!(vote.votes, [0, 10, 0, 10]);
        assert_eq!(vote.orientation, Orientation::Deg90);
    }

    #[test]
    fn too_small_page() {
        let mut agg = aggregator(vec![Box::new(Fixed(one_hot(0)))], &config(20));
        let err = agg.determine_orientation(&page(40, 40)).unwrap_err();
        assert!(
            matches!(err, OrientError::ImageTooSmall { width: 40, height: 40 }),
            "got: {err}"
        );
    }

    #[test]
    fn abort_on_first_failure_by_default() {
        let mut agg = aggregator(vec![Box::new(Flaky { every: 3, calls: 0 })], &config(20));
        let err = agg.determine_orientation(&page(640, 640)).unwrap_err();
        assert!(err.is_tile_local(), "got: {err}");
    }

    #[test]
    fn skip_policy_counts_failures() {
        let cfg = OrientConfig::builder()
            .tile_count(20)
            .selection(TileSelection::TopK)
            .failure_policy(FailurePolicy::SkipTile)
            .build()
            .unwrap();
        let mut agg = aggregator(vec![Box::new(Flaky { every: 4, calls: 0 })], &cfg);
        let vote = agg.determine_orientation(&page(640, 640)).unwrap();
        assert_eq!(vote.skipped, 5);
        assert_eq!(vote.votes, [0, 0, 15, 0]);
        assert_eq!(vote.orientation, Orientation::Deg180);
    }

    #[test]
    fn skip_policy_still_aborts_on_bad_patch_size() {
        let cfg = OrientConfig::builder()
            .tile_count(20)
            .tile_size(24)
            .failure_policy(FailurePolicy::SkipTile)
            .build()
            .unwrap();
        let mut agg = aggregator(vec![Box::new(Fixed(one_hot(0)))], &cfg);
        let err = agg.determine_orientation(&page(640, 640)).unwrap_err();
        assert!(matches!(err, OrientError::InvalidInput { .. }), "got: {err}");
    }

    #[test]
    fn parallel_matches_sequential() {
        let cfg = config(150);
        let image = page(960, 960);

        let mut seq = aggregator(vec![Box::new(ByContent)], &cfg);
        let expected = seq.determine_orientation(&image).unwrap();

        let models: Vec<Box<dyn OrientationModel>> =
            (0..4).map(|_| Box::new(ByContent) as Box<dyn OrientationModel>).collect();
        let mut par = aggregator(models, &cfg);
        assert_eq!(par.workers(), 4);
        let got = par.determine_orientation(&image).unwrap();

        assert_eq!(got, expected);
        assert_eq!(got.sampled, 150);
        assert!(got.votes.iter().filter(|&&v| v > 0).count() > 1, "{:?}", got.votes);
    }

    #[test]
    fn released_aggregator_is_unavailable() {
        let mut agg = aggregator(vec![Box::new(Fixed(one_hot(0)))], &config(5));
        agg.release();
        let err = agg.determine_orientation(&page(640, 640)).unwrap_err();
        assert!(matches!(err, OrientError::ModelUnavailable { .. }), "got: {err}");
    }

    #[test]
    fn needs_a_classifier() {
        let err = OrientationAggregator::new(Vec::new(), &config(5)).unwrap_err();
        assert!(matches!(err, OrientError::ModelUnavailable { .. }));
    }
}
