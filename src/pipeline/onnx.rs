//! ONNX Runtime backend for [`OrientationModel`].
//!
//! The exported network takes one `[1, 1, 32, 32]` float tensor of pixel
//! intensities scaled to `[0, 1]` and produces four logits in
//! [`Orientation::ALL`](super::classify::Orientation::ALL) order. Logits are
//! turned into probabilities here so that the margin confidence used by the
//! vote always lies in `[0, 1]`.

use super::classify::{ModelWeights, OrientationModel};
use crate::error::OrientError;
use crate::raster::GrayView;
use ndarray::Array4;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionOutputs};
use ort::value::TensorRef;
use tracing::debug;

/// Substitute for non-finite logits; far below any real activation.
const NON_FINITE_LOGIT: f32 = -100.0;

/// Session construction knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnnxOptions {
    /// Threads ONNX Runtime may use inside one inference call. Tile-level
    /// parallelism comes from running several sessions, so 1 is the default.
    pub intra_threads: usize,
}

impl Default for OnnxOptions {
    fn default() -> Self {
        Self { intra_threads: 1 }
    }
}

/// One ONNX Runtime session.
pub struct OnnxOrientationModel {
    session: Session,
}

impl OnnxOrientationModel {
    /// Build a session from in-memory weights.
    ///
    /// # Errors
    /// [`OrientError::ModelUnavailable`] when the bytes are not a loadable
    /// ONNX graph.
    pub fn load(weights: &ModelWeights, options: &OnnxOptions) -> Result<Self, OrientError> {
        let unavailable = |e: ort::Error| OrientError::model_unavailable(e.to_string());
        let session = Session::builder()
            .map_err(unavailable)?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(unavailable)?
            .with_intra_threads(options.intra_threads.max(1))
            .map_err(unavailable)?
            .commit_from_memory(weights.as_bytes())
            .map_err(unavailable)?;
        debug!(
            "ONNX orientation session ready ({} bytes, {} intra threads)",
            weights.len(),
            options.intra_threads.max(1)
        );
        Ok(Self { session })
    }
}

impl OrientationModel for OnnxOrientationModel {
    fn infer(&mut self, patch: GrayView<'_>) -> Result<[f32; 4], OrientError> {
        let (w, h) = (patch.width() as usize, patch.height() as usize);
        let input = Array4::from_shape_fn((1, 1, h, w), |(_, _, y, x)| {
            patch.row(y as u32)[x] as f32 / 255.0
        });

        let failed = |e: ort::Error| OrientError::inference_failed(e.to_string());
        let tensor = TensorRef::from_array_view(input.view()).map_err(failed)?;
        let outputs: SessionOutputs = self.session.run(ort::inputs![tensor]).map_err(failed)?;
        let (shape, logits) = outputs[0].try_extract_tensor::<f32>().map_err(failed)?;

        let logits: [f32; 4] = logits.try_into().map_err(|_| {
            OrientError::inference_failed(format!(
                "expected 4 scores, model returned shape {:?}",
                shape.to_vec()
            ))
        })?;
        Ok(softmax(logits))
    }
}

/// Numerically stable softmax over sanitised logits.
fn softmax(logits: [f32; 4]) -> [f32; 4] {
    let logits = logits.map(|l| if l.is_finite() { l } else { NON_FINITE_LOGIT });
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exp = logits.map(|l| (l - max).exp());
    let sum: f32 = exp.iter().sum();
    exp.map(|e| e / sum)
}
