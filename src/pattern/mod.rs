//! Pattern matching module for ONNX graph optimization
//!
//! This module identifies fusible regions in ONNX graphs. It only reads the
//! graph; rewriting is done by [`crate::transform`].
//!
//! # Overview
//!
//! The LayerNorm matcher works by:
//! 1. Checking a candidate anchor against the [`FusionPolicy`]
//! 2. Resolving the subtract branch that leads to `Div`
//! 3. Following a fixed transition table, checking every node it reaches
//! 4. Extracting the boundary tensors and attributes of the fused node
//!
//! # Example
//!
//! ```ignore
//! use lnfuse::pattern::{LayerNormMatcher, MatchOutcome, POLICY};
//!
//! let matcher = LayerNormMatcher::new(&ctx, &POLICY);
//!
//! match matcher.try_match("reduce_mean_0")? {
//!     MatchOutcome::Matched(m) => println!("fusible: {:?}", m.nodes),
//!     MatchOutcome::Missed(miss) => println!("{:?} at {}: {}", miss.stage, miss.node, miss.reason),
//! }
//! ```

pub mod layer_norm;
pub mod policy;

// Re-export main types
pub use layer_norm::{
    BiasSource, Edge, FanOut, LayerNormMatch, LayerNormMatcher, MatchMiss, MatchOutcome,
    MissReason, Pick, Stage, Transition, DEFAULT_AXIS, DEFAULT_EPSILON, TRANSITIONS,
};
pub use policy::{FusionPolicy, POLICY};
