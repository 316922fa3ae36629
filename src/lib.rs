//! # lnfuse
//!
//! LayerNorm fusion for ONNX graphs.
//!
//! This crate finds the multi-node arithmetic decomposition of layer
//! normalization (`ReduceMean`, `Sub`, `Pow`, `ReduceMean`, `Add`, `Sqrt`,
//! `Div`, `Mul`, `Add`) and rewrites each matched region into a single
//! `LayerNormalization` node.
//!
//! ## Features
//!
//! - **Pattern Matching**: A stage-table matcher that either binds the whole
//!   region or reports the first violated constraint
//! - **Node Fusion**: Atomic replacement of the region, preserving
//!   topological order
//! - **Nested Graphs**: `If`/`Loop`/`Scan` bodies are fused in place
//!
//! ## Example
//!
//! ```ignore
//! use lnfuse::prelude::*;
//!
//! let model = load_model("model.onnx")?;
//! let (optimized, stats) = optimize_model(&model, &OptimizationPipeline::default())?;
//! save_model(&optimized, "fused.onnx")?;
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod builder;
pub mod error;
pub mod graph;
pub mod io;
pub mod opset;
pub mod pattern;
pub mod proto;
pub mod tensor;
pub mod traits;
pub mod transform;
pub mod transformers;

#[cfg(test)]
mod testing;

/// Prelude module - import commonly used types with `use lnfuse::prelude::*`
pub mod prelude {
    pub use crate::builder::{build_optimized_model, validate_model};
    pub use crate::error::{OnnxResult, TransformError};
    pub use crate::graph::GraphContext;
    pub use crate::io::{load_model, optimize_file, optimize_model, save_model, OptimizeStats};
    pub use crate::pattern::{LayerNormMatcher, MatchOutcome, POLICY};
    pub use crate::proto::onnx::*;
    pub use crate::traits::Transformer;
    pub use crate::transform::finalize_node_fusion;
    pub use crate::transformers::{
        FuseLayerNorm, OnnxTransformer, OptimizationPipeline, TransformResult,
    };
}

pub use error::{OnnxResult, TransformError};
pub use traits::Transformer;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
