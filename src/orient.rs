//! End-to-end entry points: detect, straighten and correct whole pages.
//!
//! ## Compositions
//!
//! | Method | Steps |
//! |--------|-------|
//! | [`Orienter::make_upright`] | classify → quarter turn |
//! | [`Orienter::straighten`] | estimate skew → rotate |
//! | [`Orienter::straighten_then_classify`] | estimate skew → rotate → classify → quarter turn |
//!
//! Every stage that changes nothing hands the caller's image back borrowed,
//! so an upright, level page costs no pixel copies. Any stage error aborts
//! the call; there are no retries and no partial results.
//!
//! The `*_file` helpers add decoding and an atomic write (temp file in the
//! target directory, then rename), so a crash never leaves a truncated
//! output behind.

use crate::config::{CorrectionMode, OrientConfig, OutputOptions};
use crate::error::OrientError;
use crate::output::{CorrectionReport, Corrected};
use crate::pipeline::classify::{Orientation, OrientationModel, PatchClassifier};
use crate::pipeline::skew::{SkewCorrector, SkewEstimator, Straightened};
use crate::pipeline::vote::{OrientationAggregator, OrientationVote};
use crate::raster;
use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, DynamicImage, ImageFormat};
use std::borrow::Cow;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

#[cfg(feature = "onnx")]
use crate::pipeline::classify::ModelWeights;
#[cfg(feature = "onnx")]
use crate::pipeline::onnx::{OnnxOptions, OnnxOrientationModel};

/// Orientation and skew correction for single pages.
///
/// Holds one model handle per configured worker plus the skew corrector.
/// Methods that classify take `&mut self` because model sessions are
/// stateful.
#[derive(Debug)]
pub struct Orienter {
    aggregator: OrientationAggregator,
    skew: SkewCorrector,
    config: OrientConfig,
}

impl Orienter {
    /// Build `config.workers` ONNX sessions from one set of weights.
    #[cfg(feature = "onnx")]
    pub fn new(weights: &ModelWeights, config: OrientConfig) -> Result<Self, OrientError> {
        config.validate()?;
        let options = OnnxOptions::default();
        let models = (0..config.workers)
            .map(|_| {
                OnnxOrientationModel::load(weights, &options)
                    .map(|m| Box::new(m) as Box<dyn OrientationModel>)
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!("Loaded {} orientation model session(s)", models.len());
        Self::from_models(models, config)
    }

    /// Build from caller-supplied models, one per worker. `config.workers`
    /// is ignored in favour of `models.len()`.
    pub fn from_models(
        models: Vec<Box<dyn OrientationModel>>,
        config: OrientConfig,
    ) -> Result<Self, OrientError> {
        config.validate()?;
        if models.len() != config.workers {
            debug!(
                "Using {} model(s); configured workers = {}",
                models.len(),
                config.workers
            );
        }
        let classifiers = models.into_iter().map(PatchClassifier::new).collect();
        Ok(Self {
            aggregator: OrientationAggregator::new(classifiers, &config)?,
            skew: SkewCorrector::new(config.skew),
            config,
        })
    }

    /// Replace the projection-profile skew estimator.
    pub fn with_skew_estimator(mut self, estimator: Box<dyn SkewEstimator>) -> Self {
        self.skew = SkewCorrector::with_estimator(estimator, self.config.skew);
        self
    }

    pub fn config(&self) -> &OrientConfig {
        &self.config
    }

    // ── In-memory operations ─────────────────────────────────────────────

    /// Vote on the orientation of `image` without modifying it.
    pub fn determine_orientation(
        &mut self,
        image: &DynamicImage,
    ) -> Result<OrientationVote, OrientError> {
        self.aggregator.determine_orientation(image)
    }

    /// Remove small-angle skew only.
    pub fn straighten<'a>(&self, image: &'a DynamicImage) -> Result<Straightened<'a>, OrientError> {
        self.skew.straighten(image)
    }

    /// Classify, then undo the detected quarter turn. No skew removal.
    pub fn make_upright<'a>(&mut self, image: &'a DynamicImage) -> Result<Corrected<'a>, OrientError> {
        let vote = self.aggregator.determine_orientation(image)?;
        Ok(Corrected {
            image: rotate_upright(Cow::Borrowed(image), vote.orientation),
            orientation: vote.orientation,
            skew_degrees: None,
            vote: Some(vote),
        })
    }

    /// Straighten, classify the straightened page, then undo the quarter
    /// turn on the straightened page. Uses the same confidence threshold as
    /// [`Self::make_upright`].
    pub fn straighten_then_classify<'a>(
        &mut self,
        image: &'a DynamicImage,
    ) -> Result<Corrected<'a>, OrientError> {
        let Straightened { image: level, angle } = self.skew.straighten(image)?;
        let vote = self.aggregator.determine_orientation(&level)?;
        Ok(Corrected {
            image: rotate_upright(level, vote.orientation),
            orientation: vote.orientation,
            skew_degrees: Some(angle),
            vote: Some(vote),
        })
    }

    /// Dispatch on `mode`.
    pub fn correct<'a>(
        &mut self,
        image: &'a DynamicImage,
        mode: CorrectionMode,
    ) -> Result<Corrected<'a>, OrientError> {
        match mode {
            CorrectionMode::Upright => self.make_upright(image),
            CorrectionMode::Full => self.straighten_then_classify(image),
            CorrectionMode::Deskew => {
                let Straightened { image, angle } = self.skew.straighten(image)?;
                Ok(Corrected {
                    image,
                    orientation: Orientation::Deg0,
                    skew_degrees: Some(angle),
                    vote: None,
                })
            }
        }
    }

    /// Release every model handle. Later classification calls fail with
    /// [`OrientError::ModelUnavailable`]; skew-only calls keep working.
    pub fn release(&mut self) {
        self.aggregator.release();
    }

    // ── File helpers ─────────────────────────────────────────────────────

    /// Detect the orientation of an image file without writing anything.
    ///
    /// With `straighten_first` the vote runs on the deskewed page, as in
    /// [`Self::straighten_then_classify`].
    pub fn orient_file(
        &mut self,
        input: impl AsRef<Path>,
        straighten_first: bool,
    ) -> Result<CorrectionReport, OrientError> {
        let start = Instant::now();
        let input = input.as_ref();
        let image = load_image(input)?;
        info!("Detecting orientation: {}", input.display());

        let (vote, skew_degrees) = if straighten_first {
            let level = self.skew.straighten(&image)?;
            (self.aggregator.determine_orientation(&level.image)?, Some(level.angle))
        } else {
            (self.aggregator.determine_orientation(&image)?, None)
        };

        Ok(CorrectionReport {
            input: input.to_path_buf(),
            output: None,
            mode: if straighten_first {
                CorrectionMode::Full
            } else {
                CorrectionMode::Upright
            },
            orientation_degrees: Some(vote.orientation.degrees()),
            skew_degrees,
            vote: Some(vote),
            input_dimensions: [image.width(), image.height()],
            output_dimensions: None,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Correct an image file and write the result atomically to `output`.
    ///
    /// The output format follows the extension of `output`.
    pub fn correct_file(
        &mut self,
        input: impl AsRef<Path>,
        output: impl AsRef<Path>,
        mode: CorrectionMode,
        options: &OutputOptions,
    ) -> Result<CorrectionReport, OrientError> {
        if mode == CorrectionMode::Deskew {
            return deskew_file(&self.skew, input, output, options);
        }
        let start = Instant::now();
        let (input, output) = (input.as_ref(), output.as_ref());
        let image = load_image(input)?;
        info!("Correcting {} ({:?})", input.display(), mode);

        let corrected = self.correct(&image, mode)?;
        save_image(&corrected.image, output, options)?;

        let report = CorrectionReport {
            input: input.to_path_buf(),
            output: Some(output.to_path_buf()),
            mode,
            orientation_degrees: corrected.vote.as_ref().map(|v| v.orientation.degrees()),
            skew_degrees: corrected.skew_degrees,
            input_dimensions: [image.width(), image.height()],
            output_dimensions: Some([corrected.image.width(), corrected.image.height()]),
            vote: corrected.vote,
            duration_ms: start.elapsed().as_millis() as u64,
        };
        info!(
            "Wrote {} ({}°, {}ms)",
            output.display(),
            corrected.orientation.degrees(),
            report.duration_ms
        );
        Ok(report)
    }
}

/// Remove skew from an image file and write the result atomically.
///
/// No orientation model is involved, so the report carries no orientation
/// and no vote.
pub fn deskew_file(
    skew: &SkewCorrector,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
    options: &OutputOptions,
) -> Result<CorrectionReport, OrientError> {
    let start = Instant::now();
    let (input, output) = (input.as_ref(), output.as_ref());
    let image = load_image(input)?;
    info!("Deskewing {}", input.display());

    let level = skew.straighten(&image)?;
    save_image(&level.image, output, options)?;

    let report = CorrectionReport {
        input: input.to_path_buf(),
        output: Some(output.to_path_buf()),
        mode: CorrectionMode::Deskew,
        orientation_degrees: None,
        skew_degrees: Some(level.angle),
        vote: None,
        input_dimensions: [image.width(), image.height()],
        output_dimensions: Some([level.image.width(), level.image.height()]),
        duration_ms: start.elapsed().as_millis() as u64,
    };
    info!(
        "Wrote {} ({:+.2}° skew, {}ms)",
        output.display(),
        level.angle,
        report.duration_ms
    );
    Ok(report)
}

/// Undo a detected orientation with a lossless quarter turn.
///
/// `Deg90` content (turned clockwise) is turned back counter-clockwise and
/// vice versa. `Deg0` returns `image` unchanged.
pub fn rotate_upright(image: Cow<'_, DynamicImage>, orientation: Orientation) -> Cow<'_, DynamicImage> {
    match orientation.correction_quarters() {
        0 => image,
        quarters => Cow::Owned(raster::quarter_turn(&image, quarters)),
    }
}

/// Decode an image file.
pub fn load_image(path: &Path) -> Result<DynamicImage, OrientError> {
    if !path.exists() {
        return Err(OrientError::ImageNotFound {
            path: path.to_path_buf(),
        });
    }
    let image = image::open(path).map_err(|source| OrientError::ImageDecode {
        path: path.to_path_buf(),
        source,
    })?;
    debug!(
        "Decoded {} ({}x{}, {:?})",
        path.display(),
        image.width(),
        image.height(),
        image.color()
    );
    Ok(image)
}

/// Encode `image` by the extension of `path` and move it into place
/// atomically. Missing parent directories are created.
pub fn save_image(
    image: &DynamicImage,
    path: &Path,
    options: &OutputOptions,
) -> Result<(), OrientError> {
    let encode_err = |source| OrientError::ImageEncode {
        path: path.to_path_buf(),
        source,
    };
    let write_err = |source| OrientError::OutputWriteFailed {
        path: path.to_path_buf(),
        source,
    };

    let format = ImageFormat::from_path(path).map_err(encode_err)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(write_err)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        if format == ImageFormat::Jpeg {
            let quality = options.jpeg_quality.clamp(1, 100);
            jpeg_compatible(image)
                .write_with_encoder(JpegEncoder::new_with_quality(&mut writer, quality))
                .map_err(encode_err)?;
        } else {
            image.write_to(&mut writer, format).map_err(encode_err)?;
        }
        writer.flush().map_err(write_err)?;
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file()
            .set_permissions(std::fs::Permissions::from_mode(options.mode))
            .map_err(write_err)?;
    }

    tmp.persist(path).map_err(|e| write_err(e.error))?;
    debug!("Persisted {}", path.display());
    Ok(())
}

/// JPEG carries no alpha and no 16-bit samples.
fn jpeg_compatible(image: &DynamicImage) -> Cow<'_, DynamicImage> {
    match image.color() {
        ColorType::L8 | ColorType::Rgb8 => Cow::Borrowed(image),
        ColorType::La8 | ColorType::L16 | ColorType::La16 => {
            Cow::Owned(DynamicImage::ImageLuma8(image.to_luma8()))
        }
        _ => Cow::Owned(DynamicImage::ImageRgb8(image.to_rgb8())),
    }
}
