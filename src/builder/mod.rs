//! Model builder module for ONNX optimization
//!
//! After transformations are applied to a `GraphContext`, the builder module
//! assembles the final optimized model.
//!
//! # Example
//!
//! ```ignore
//! use lnfuse::builder::{build_optimized_model, validate_model};
//!
//! let model = build_optimized_model(&ctx, &original_model);
//! validate_model(&model)?;
//! ```

pub mod model;

// Re-export main functions
pub use model::{
    build_graph_from_context, build_optimized_model, required_onnx_opset, validate_graph,
    validate_model,
};
