//! Tensor utilities for ONNX models
//!
//! Data type mappings used by the type-gated passes.

pub mod dtype;

// Re-export commonly used items
pub use dtype::{i32_to_dtype, type_string};
