//! ONNX transformers module
//!
//! Ready-to-use graph passes and the pipeline that drives them.
//!
//! # Overview
//!
//! Each transformer implements the [`OnnxTransformer`] trait and can be
//! applied individually or combined.
//!
//! # Example
//!
//! ```ignore
//! use lnfuse::transformers::{FuseLayerNorm, OnnxTransformer};
//! use lnfuse::graph::GraphContext;
//!
//! let mut ctx = GraphContext::from_model(&model)?;
//!
//! let result = FuseLayerNorm::new().transform(&mut ctx)?;
//! println!("Fused {} LayerNorm subgraphs", result.transforms_applied);
//! ```
//!
//! # Using OptimizationPipeline
//!
//! For convenience, use [`OptimizationPipeline`] to run transformers until
//! the graph stops changing:
//!
//! ```ignore
//! use lnfuse::transformers::OptimizationPipeline;
//!
//! let pipeline = OptimizationPipeline::default();
//! let result = pipeline.run(&mut ctx)?;
//! ```

/// Common utilities and types
pub mod common;
/// Fuse Layer Normalization
pub mod fuse_layer_norm;

// Re-export common types
pub use common::{run_transformers, OnnxTransformer, TransformResult};

// Re-export fusion transformers
pub use fuse_layer_norm::FuseLayerNorm;

use std::fmt;

use tracing::debug;

use crate::builder::build_optimized_model;
use crate::error::OnnxResult;
use crate::graph::GraphContext;
use crate::proto::ModelProto;
use crate::traits::Transformer;

/// Optimization pipeline that runs transformers to a fixpoint
pub struct OptimizationPipeline {
    /// Passes, run in order on every iteration
    passes: Vec<Box<dyn OnnxTransformer>>,
    /// Upper bound on iterations
    pub max_iterations: usize,
}

impl Default for OptimizationPipeline {
    fn default() -> Self {
        Self::new().with_pass(FuseLayerNorm::new())
    }
}

impl fmt::Debug for OptimizationPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizationPipeline")
            .field("passes", &self.pass_names())
            .field("max_iterations", &self.max_iterations)
            .finish()
    }
}

impl OptimizationPipeline {
    /// Create an empty pipeline
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            max_iterations: 5,
        }
    }

    /// Append a pass
    pub fn with_pass<T: OnnxTransformer + 'static>(mut self, pass: T) -> Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Set the iteration bound
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Names of the configured passes
    pub fn pass_names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Run the optimization pipeline
    ///
    /// Stops after the first iteration that leaves the graph unchanged.
    pub fn run(&self, ctx: &mut GraphContext) -> OnnxResult<TransformResult> {
        let mut total = TransformResult::new();
        let passes: Vec<&dyn OnnxTransformer> = self.passes.iter().map(|p| p.as_ref()).collect();

        for iteration in 0..self.max_iterations {
            let result = run_transformers(ctx, &passes)?;
            let modified = result.modified();
            debug!(iteration, modified, applied = result.transforms_applied, "pipeline iteration");
            total.merge(result);

            // Stop if no progress
            if !modified {
                break;
            }
        }

        Ok(total)
    }
}

impl Transformer for OptimizationPipeline {
    fn transform(&self, model: ModelProto) -> OnnxResult<ModelProto> {
        let mut ctx = GraphContext::from_model(&model)?;
        self.run(&mut ctx)?;
        Ok(build_optimized_model(&ctx, &model))
    }
}
