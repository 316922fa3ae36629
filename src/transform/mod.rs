//! Graph transformation module
//!
//! Graph edits shared by the fusion passes. Transformations work on a
//! `GraphContext` and modify it in place.
//!
//! - [`fuse`]: Atomic replacement of a node region by one node
//!
//! # Example
//!
//! ```ignore
//! use lnfuse::transform::finalize_node_fusion;
//!
//! let fused = make_node("LayerNormalization", &["X", "gamma", "beta"], &[], "LayerNormalization_0");
//! let result = finalize_node_fusion(&mut ctx, &matched.nodes, fused, &matched.target)?;
//! println!("removed {:?}", result.eliminated_nodes);
//! ```

pub mod fuse;

// Re-export main types and functions
pub use fuse::{finalize_node_fusion, FusionResult};
