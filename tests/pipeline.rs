//! Integration tests for the orientation pipeline.
//!
//! No model file is needed: a stub [`OrientationModel`] reads the position
//! of a dark marker inside each 32×32 patch, which is enough to make the
//! classifier rotation-aware on the synthetic page built below.
//!
//! Run with:
//!   cargo test --test pipeline -- --nocapture

use image::{DynamicImage, GrayImage, Luma};
use pageorient::raster::GrayView;
use pageorient::{
    deskew_file, CorrectionMode, FailurePolicy, OrientConfig, OrientError, Orientation,
    OrientationModel, Orienter, OutputOptions, SkewCorrector, SkewEstimator, SkewParams,
    TileSampler,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::borrow::Cow;
use tracing_subscriber::EnvFilter;

// ── Test helpers ─────────────────────────────────────────────────────────────

const CELL: u32 = 32;

/// Upright page: a 12×12 ink block in the top-left quadrant of every
/// 32px cell. Both edges are multiples of 32 so the tile grid stays on
/// cell boundaries after any quarter turn.
fn upright_page() -> DynamicImage {
    DynamicImage::ImageLuma8(GrayImage::from_fn(640, 960, |x, y| {
        let (lx, ly) = (x % CELL, y % CELL);
        if (2..14).contains(&lx) && (2..14).contains(&ly) {
            Luma([0])
        } else {
            Luma([255])
        }
    }))
}

/// Text-like page: one line of irregular strokes per 32px row, set in the
/// upper half of the row (rows 2..14, baseline at 14). Stroke widths, gaps
/// and ascender heights are random, so only the rows line up; the real
/// skew estimator reads this page as level.
fn text_page() -> DynamicImage {
    let (width, height) = (640, 960);
    let mut rng = StdRng::seed_from_u64(7);
    let mut page = GrayImage::from_pixel(width, height, Luma([255]));
    for line in 0..height / CELL {
        let baseline = line * CELL + 14;
        let mut x = rng.random_range(0..8);
        while x < width {
            let stroke = rng.random_range(2..=10);
            let top = if rng.random_bool(0.3) { line * CELL + 2 } else { line * CELL + 6 };
            for sx in x..(x + stroke).min(width) {
                for y in top..baseline {
                    page.put_pixel(sx, y, Luma([0]));
                }
            }
            x += stroke + rng.random_range(2..=8);
        }
    }
    DynamicImage::ImageLuma8(page)
}

fn one_hot(class: usize) -> [f32; 4] {
    let mut scores = [0.1 / 3.0; 4];
    scores[class] = 0.9;
    scores
}

/// Votes for the quadrant holding the most ink: TL → 0°, TR → 90°,
/// BR → 180°, BL → 270°. Rejects strided input.
struct QuadrantModel;

impl OrientationModel for QuadrantModel {
    fn infer(&mut self, patch: GrayView<'_>) -> Result<[f32; 4], OrientError> {
        if patch.stride() != patch.width() as usize {
            return Err(OrientError::inference_failed(format!(
                "patch not dense: stride {} for width {}",
                patch.stride(),
                patch.width()
            )));
        }
        let half = patch.width() / 2;
        let mut ink = [0u64; 4];
        for y in 0..patch.height() {
            for (x, &p) in patch.row(y).iter().enumerate() {
                let quadrant = match (x as u32 >= half, y >= half) {
                    (false, false) => 0,
                    (true, false) => 1,
                    (true, true) => 2,
                    (false, true) => 3,
                };
                ink[quadrant] += 255 - p as u64;
            }
        }
        let best = (0..4).max_by_key(|&i| (ink[i], std::cmp::Reverse(i))).unwrap_or(0);
        Ok(one_hot(best))
    }
}

/// Votes by where the ink sits vertically: upper half → 0°, lower half →
/// 180°. Blank patches abstain.
struct BaselineModel;

impl OrientationModel for BaselineModel {
    fn infer(&mut self, patch: GrayView<'_>) -> Result<[f32; 4], OrientError> {
        let half = patch.height() / 2;
        let (mut upper, mut lower) = (0u64, 0u64);
        for y in 0..patch.height() {
            let ink: u64 = patch.row(y).iter().map(|&p| 255 - p as u64).sum();
            if y < half {
                upper += ink;
            } else {
                lower += ink;
            }
        }
        Ok(match upper.cmp(&lower) {
            std::cmp::Ordering::Greater => one_hot(0),
            std::cmp::Ordering::Less => one_hot(2),
            std::cmp::Ordering::Equal => [0.25; 4],
        })
    }
}

/// Always unsure: margin 0.05.
struct UnsureModel;

impl OrientationModel for UnsureModel {
    fn infer(&mut self, _: GrayView<'_>) -> Result<[f32; 4], OrientError> {
        Ok([0.20, 0.30, 0.25, 0.25])
    }
}

/// Quadrant model that fails every `every`th call.
struct FlakyModel {
    every: usize,
    calls: usize,
}

impl OrientationModel for FlakyModel {
    fn infer(&mut self, patch: GrayView<'_>) -> Result<[f32; 4], OrientError> {
        self.calls += 1;
        if self.calls % self.every == 0 {
            return Err(OrientError::inference_failed("backend status -1"));
        }
        QuadrantModel.infer(patch)
    }
}

/// Reports a fixed skew angle.
struct FixedSkew(f32);

impl SkewEstimator for FixedSkew {
    fn estimate(&self, _: &GrayImage, _: &SkewParams) -> Result<f32, OrientError> {
        Ok(self.0)
    }
}

/// Route library logs through the test harness (`RUST_LOG=pageorient=debug`).
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Orienter with skew pinned to 0°. The block grid of [`upright_page`]
/// projects more sharply onto columns than onto rows, so the real
/// estimator would read it as a 90° page; tests that need the real
/// estimator use [`text_page`] and [`default_orienter`].
fn orienter_with(models: Vec<Box<dyn OrientationModel>>, config: OrientConfig) -> Orienter {
    init_logging();
    Orienter::from_models(models, config)
        .expect("orienter")
        .with_skew_estimator(Box::new(FixedSkew(0.0)))
}

/// Default configuration, including the projection-profile estimator.
fn default_orienter() -> Orienter {
    init_logging();
    Orienter::from_models(vec![Box::new(BaselineModel)], OrientConfig::default())
        .expect("orienter")
}

fn orienter() -> Orienter {
    orienter_with(vec![Box::new(QuadrantModel)], OrientConfig::default())
}

fn rotations(page: &DynamicImage) -> [(DynamicImage, Orientation); 4] {
    [
        (page.clone(), Orientation::Deg0),
        (page.rotate90(), Orientation::Deg90),
        (page.rotate180(), Orientation::Deg180),
        (page.rotate270(), Orientation::Deg270),
    ]
}

// ── Orientation round trip ───────────────────────────────────────────────────

#[test]
fn detects_every_quarter_turn() {
    let mut orienter = orienter();
    for (page, expected) in rotations(&upright_page()) {
        let vote = orienter.determine_orientation(&page).unwrap();
        assert_eq!(vote.orientation, expected, "votes: {:?}", vote.votes);
        assert_eq!(vote.sampled, 200);
        assert_eq!(vote.votes[expected.index()], 200);
    }
}

#[test]
fn make_upright_restores_original_pixels() {
    let upright = upright_page();
    let mut orienter = orienter();
    for (page, expected) in rotations(&upright) {
        let fixed = orienter.make_upright(&page).unwrap();
        assert_eq!(fixed.orientation, expected);
        assert_eq!((fixed.image.width(), fixed.image.height()), (640, 960));
        assert_eq!(fixed.image.as_bytes(), upright.as_bytes(), "{expected:?}");
        assert_eq!(fixed.is_unchanged(), expected == Orientation::Deg0);
    }
}

#[test]
fn colour_pages_are_classified_through_grayscale() {
    let rgb = DynamicImage::ImageRgb8(upright_page().rotate180().to_rgb8());
    let fixed = orienter().make_upright(&rgb).unwrap();
    assert_eq!(fixed.orientation, Orientation::Deg180);
    assert!(fixed.image.as_rgb8().is_some(), "pixel format must be preserved");
}

// ── Vote edge cases ──────────────────────────────────────────────────────────

#[test]
fn unsure_model_falls_back_to_upright() {
    let mut orienter = orienter_with(vec![Box::new(UnsureModel)], OrientConfig::default());
    for (page, _) in rotations(&upright_page()) {
        let fixed = orienter.make_upright(&page).unwrap();
        let vote = fixed.vote.as_ref().unwrap();
        assert_eq!(fixed.orientation, Orientation::Deg0);
        assert!(vote.is_fallback());
        assert_eq!(vote.abstained, vote.sampled);
        assert!(matches!(fixed.image, Cow::Borrowed(_)));
    }
}

#[test]
fn page_too_small_for_a_tile() {
    let tiny = DynamicImage::ImageLuma8(GrayImage::from_pixel(40, 40, Luma([0])));
    let gray = tiny.to_luma8();
    assert!(TileSampler::new(200, 32).sample(&gray).is_empty());

    let err = orienter().determine_orientation(&tiny).unwrap_err();
    assert!(
        matches!(err, OrientError::ImageTooSmall { width: 40, height: 40 }),
        "got: {err}"
    );
}

#[test]
fn sampler_is_deterministic_across_instances() {
    let page = upright_page().to_luma8();
    let config = OrientConfig::default();
    let origins = |sampler: TileSampler| -> Vec<(u32, u32)> {
        sampler.sample(&page).iter().map(|t| (t.x, t.y)).collect()
    };
    let a = origins(TileSampler::from_config(&config));
    let b = origins(TileSampler::from_config(&config));
    assert_eq!(a.len(), 200);
    assert_eq!(a, b);
}

#[test]
fn parallel_workers_agree_with_sequential() {
    let page = upright_page().rotate270();
    let sequential = orienter().determine_orientation(&page).unwrap();

    let config = OrientConfig::builder().workers(4).build().unwrap();
    let models: Vec<Box<dyn OrientationModel>> = (0..4)
        .map(|_| Box::new(QuadrantModel) as Box<dyn OrientationModel>)
        .collect();
    let parallel = orienter_with(models, config)
        .determine_orientation(&page)
        .unwrap();

    assert_eq!(parallel, sequential);
    assert_eq!(parallel.orientation, Orientation::Deg270);
}

#[test]
fn inference_failure_aborts_unless_skipping() {
    let page = upright_page().rotate90();

    let mut strict = orienter_with(
        vec![Box::new(FlakyModel { every: 10, calls: 0 })],
        OrientConfig::default(),
    );
    let err = strict.determine_orientation(&page).unwrap_err();
    assert!(matches!(err, OrientError::InferenceFailed { .. }), "got: {err}");

    let lenient = OrientConfig::builder()
        .failure_policy(FailurePolicy::SkipTile)
        .build()
        .unwrap();
    let mut lenient = orienter_with(vec![Box::new(FlakyModel { every: 10, calls: 0 })], lenient);
    let vote = lenient.determine_orientation(&page).unwrap();
    assert_eq!(vote.orientation, Orientation::Deg90);
    assert_eq!(vote.skipped, 20);
    assert_eq!(vote.total_votes(), 180);
}

#[test]
fn released_orienter_refuses_to_classify() {
    let mut orienter = orienter();
    orienter.release();
    let err = orienter.make_upright(&upright_page()).unwrap_err();
    assert!(matches!(err, OrientError::ModelUnavailable { .. }), "got: {err}");

    // Skew-only work does not need the model.
    let page = upright_page();
    let level = orienter.straighten(&page);
    assert!(level.is_ok());
}

// ── Straighten-first composition ─────────────────────────────────────────────

#[test]
fn straighten_then_classify_upright_page_is_untouched() {
    let page = upright_page();
    let fixed = orienter().straighten_then_classify(&page).unwrap();
    assert_eq!(fixed.orientation, Orientation::Deg0);
    assert_eq!(fixed.skew_degrees, Some(0.0));
    assert!(fixed.is_unchanged());
}

#[test]
fn straighten_then_classify_fixes_upside_down_page() {
    let upright = upright_page();
    let flipped = upright.rotate180();
    let fixed = orienter().straighten_then_classify(&flipped).unwrap();
    assert_eq!(fixed.orientation, Orientation::Deg180);
    assert_eq!(fixed.image.as_bytes(), upright.as_bytes());
}

#[test]
fn default_pipeline_keeps_level_upright_text() {
    let page = text_page();
    let fixed = default_orienter().straighten_then_classify(&page).unwrap();
    assert_eq!(fixed.orientation, Orientation::Deg0);
    assert_eq!(fixed.skew_degrees, Some(0.0));
    assert_eq!((fixed.image.width(), fixed.image.height()), (640, 960));
    assert!(fixed.is_unchanged());
}

#[test]
fn default_pipeline_turns_upside_down_text() {
    let upright = text_page();
    let flipped = upright.rotate180();
    let fixed = default_orienter().straighten_then_classify(&flipped).unwrap();
    assert_eq!(fixed.orientation, Orientation::Deg180);
    assert_eq!(fixed.skew_degrees, Some(0.0));
    assert_eq!(fixed.image.as_bytes(), upright.as_bytes());
}

#[test]
fn deskew_mode_skips_classification() {
    let mut orienter = orienter_with(vec![Box::new(UnsureModel)], OrientConfig::default());
    let page = upright_page().rotate90();
    let out = orienter.correct(&page, CorrectionMode::Deskew).unwrap();
    assert!(out.vote.is_none());
    assert_eq!(out.orientation, Orientation::Deg0);
    assert!(out.is_unchanged());
}

#[test]
fn zero_skew_straighten_borrows_input() {
    let page = upright_page();
    let level = orienter().straighten(&page).unwrap();
    assert_eq!(level.angle, 0.0);
    assert!(matches!(level.image, Cow::Borrowed(_)));
}

// ── File helpers ─────────────────────────────────────────────────────────────

#[test]
fn correct_file_writes_upright_copy() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("turned.png");
    let output = dir.path().join("out/upright.png");
    upright_page().rotate90().save(&input).unwrap();

    let mut orienter = orienter();
    let detected = orienter.orient_file(&input, false).unwrap();
    assert_eq!(detected.orientation_degrees, Some(90));
    assert_eq!(detected.input_dimensions, [960, 640]);
    assert!(detected.output.is_none());

    let report = orienter
        .correct_file(&input, &output, CorrectionMode::Full, &OutputOptions::default())
        .unwrap();
    assert_eq!(report.orientation_degrees, Some(90));
    assert_eq!(report.skew_degrees, Some(0.0));
    assert_eq!(report.output_dimensions, Some([640, 960]));

    let written = image::open(&output).unwrap();
    assert_eq!(written.as_bytes(), upright_page().as_bytes());

    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["vote"]["votes"][1], 200);
}

#[test]
fn deskew_file_needs_no_model() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scan.png");
    let output = dir.path().join("level.png");
    text_page().save(&input).unwrap();

    let corrector = SkewCorrector::new(SkewParams::default());
    let report = deskew_file(&corrector, &input, &output, &OutputOptions::default()).unwrap();
    assert_eq!(report.mode, CorrectionMode::Deskew);
    assert_eq!(report.orientation_degrees, None);
    assert_eq!(report.orientation_line(), "Orientation: not measured");
    assert!(report.vote.is_none());
    assert_eq!(report.skew_degrees, Some(0.0));

    let written = image::open(&output).unwrap();
    assert_eq!(written.as_bytes(), text_page().as_bytes());
}

#[test]
fn correct_file_deskew_mode_reports_no_orientation() {
    let dir = tempfile::tempdir().unwrap();
    let input = dir.path().join("scan.png");
    let output = dir.path().join("level.png");
    text_page().save(&input).unwrap();

    let report = default_orienter()
        .correct_file(&input, &output, CorrectionMode::Deskew, &OutputOptions::default())
        .unwrap();
    assert_eq!(report.orientation_degrees, None);
    assert_eq!(report.output_dimensions, Some([640, 960]));
}

#[test]
fn missing_input_file() {
    let err = orienter()
        .orient_file("/definitely/not/here.png", false)
        .unwrap_err();
    assert!(matches!(err, OrientError::ImageNotFound { .. }), "got: {err}");
}
