//! Pipeline stages for page orientation detection and correction.
//!
//! Each submodule implements exactly one step, so every stage can be
//! tested on its own and backends (model, skew estimator) can be swapped
//! without touching the others.
//!
//! ## Data Flow
//!
//! ```text
//! page ──▶ skew ──▶ sample ──▶ classify ×N ──▶ vote ──▶ quarter turn ──▶ upright page
//!       (optional) (top tiles)  (4 scores)   (threshold)
//! ```
//!
//! 1. [`sample`]: grayscale, cap the size, pick the highest-perplexity tiles
//! 2. [`classify`]: run the 4-way orientation model on one dense patch
//! 3. [`vote`]: classify every tile (optionally on several workers) and
//!    reduce to one page decision
//! 4. [`skew`]: estimate and remove small-angle tilt
//! 5. [`onnx`]: ONNX Runtime model backend (feature `onnx`)

pub mod classify;
#[cfg(feature = "onnx")]
pub mod onnx;
pub mod sample;
pub mod skew;
pub mod vote;
