//! Core traits for lnfuse
//!
//! Model-level transformation interface.

use crate::error::OnnxResult;
use crate::proto::ModelProto;

/// Transformer trait for model transformations
///
/// Takes ownership of a model and returns the transformed one. Graph-level
/// passes implement [`crate::transformers::OnnxTransformer`] instead and are
/// lifted to models by [`crate::transformers::OptimizationPipeline`].
pub trait Transformer {
    /// Transform the given model
    fn transform(&self, model: ModelProto) -> OnnxResult<ModelProto>;
}
