//! Patch classification: one 32×32 grayscale patch in, one orientation
//! class with a margin confidence out.
//!
//! ## Backends
//!
//! The classifier talks to its model through the [`OrientationModel`]
//! trait. The crate ships an ONNX Runtime backend (feature `onnx`, see
//! [`super::onnx`]); tests and embedders can plug in anything that maps a
//! dense patch to four scores.
//!
//! ## Lifecycle
//!
//! Weights are read once into a [`ModelWeights`] blob and passed by
//! reference to every model constructor, so N workers share one copy of the
//! bytes. A [`PatchClassifier`] owns its model handle; [`PatchClassifier::release`]
//! frees it early and `Drop` covers every other exit path. Using a released
//! classifier returns [`OrientError::ModelUnavailable`].

use crate::error::OrientError;
use crate::raster::GrayView;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Edge length of the patches the bundled model was trained on.
pub const PATCH_SIZE: u32 = 32;

// ── Orientation ──────────────────────────────────────────────────────────

/// Discrete page orientation.
///
/// Class *k* means the page content is turned *k* × 90° clockwise from
/// upright. `Deg90` is therefore a page whose text lines run top-to-bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Orientation {
    /// All classes in model output order.
    pub const ALL: [Orientation; 4] = [
        Orientation::Deg0,
        Orientation::Deg90,
        Orientation::Deg180,
        Orientation::Deg270,
    ];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn degrees(self) -> u32 {
        self.index() as u32 * 90
    }

    /// Clockwise quarter turns that bring a page of this orientation
    /// upright.
    pub fn correction_quarters(self) -> u8 {
        ((4 - self.index()) % 4) as u8
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.degrees())
    }
}

/// Result of classifying one patch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub orientation: Orientation,
    /// Top score minus the second-highest score.
    pub confidence: f32,
}

impl Classification {
    /// Argmax over four scores; ties resolve to the lowest class.
    pub fn from_scores(scores: [f32; 4]) -> Self {
        let mut best = 0;
        for (i, &s) in scores.iter().enumerate().skip(1) {
            if s > scores[best] {
                best = i;
            }
        }
        let runner_up = scores
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != best)
            .map(|(_, &s)| s)
            .fold(f32::NEG_INFINITY, f32::max);

        Self {
            orientation: Orientation::ALL[best],
            confidence: scores[best] - runner_up,
        }
    }
}

// ── Model weights ────────────────────────────────────────────────────────

/// Immutable serialized model, shared by every classifier built from it.
#[derive(Clone)]
pub struct ModelWeights {
    bytes: Arc<[u8]>,
}

impl ModelWeights {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, OrientError> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| {
            OrientError::model_unavailable(format!("cannot read '{}': {e}", path.display()))
        })?;
        debug!("Loaded {} bytes of model weights from {}", bytes.len(), path.display());
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Result<Self, OrientError> {
        let bytes = bytes.into();
        if bytes.is_empty() {
            return Err(OrientError::model_unavailable("model weights are empty"));
        }
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; empty blobs are rejected at construction.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for ModelWeights {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelWeights")
            .field("len", &self.bytes.len())
            .finish()
    }
}

// ── Classifier ───────────────────────────────────────────────────────────

/// A 4-way orientation model.
///
/// `patch` is always dense (`stride == width`) and exactly
/// [`PATCH_SIZE`] square. Implementations return one score per class in
/// [`Orientation::ALL`] order and report backend failures as
/// [`OrientError::InferenceFailed`].
pub trait OrientationModel: Send {
    fn infer(&mut self, patch: GrayView<'_>) -> Result<[f32; 4], OrientError>;
}

/// Owns one model handle and enforces the patch contract around it.
pub struct PatchClassifier {
    model: Option<Box<dyn OrientationModel>>,
    patch_size: u32,
}

impl PatchClassifier {
    pub fn new(model: Box<dyn OrientationModel>) -> Self {
        Self {
            model: Some(model),
            patch_size: PATCH_SIZE,
        }
    }

    /// Classify one patch.
    ///
    /// # Errors
    /// * [`OrientError::InvalidInput`] if the patch is not [`PATCH_SIZE`] square
    /// * [`OrientError::ModelUnavailable`] after [`Self::release`]
    /// * whatever the backend returns, normally [`OrientError::InferenceFailed`]
    pub fn classify(&mut self, patch: GrayView<'_>) -> Result<Classification, OrientError> {
        if patch.width() != self.patch_size || patch.height() != self.patch_size {
            return Err(OrientError::InvalidInput {
                width: patch.width(),
                height: patch.height(),
                expected: self.patch_size,
            });
        }
        let model = self
            .model
            .as_mut()
            .ok_or_else(|| OrientError::model_unavailable("classifier has been released"))?;

        let packed = patch.to_dense();
        let dense = GrayView::new(&packed, patch.width(), patch.height(), patch.width() as usize)
            .ok_or_else(|| OrientError::inference_failed("patch buffer shorter than its geometry"))?;

        let scores = model.infer(dense)?;
        Ok(Classification::from_scores(scores))
    }

    /// Drop the model handle now. Idempotent.
    pub fn release(&mut self) {
        if self.model.take().is_some() {
            debug!("Released orientation model");
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    pub fn patch_size(&self) -> u32 {
        self.patch_size
    }
}

impl fmt::Debug for PatchClassifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchClassifier")
            .field("loaded", &self.is_loaded())
            .field("patch_size", &self.patch_size)
            .finish()
    }
}
