//! Graph manipulation module for ONNX models
//!
//! This module provides the graph storage the optimization passes run on:
//!
//! - [`GraphContext`]: Central structure for graph operations with O(1) lookups
//! - [`maps`]: Type definitions and builders for graph maps
//!
//! # Example
//!
//! ```ignore
//! use lnfuse::graph::GraphContext;
//!
//! let mut ctx = GraphContext::from_model(&model)?;
//!
//! // Edge-level traversal
//! let node = ctx.get_node("reduce_mean_0").unwrap();
//! let children = ctx.successor_edges(node)?;
//! let fan_out = ctx.output_edge_count(node);
//!
//! // Version and target checks
//! let since = ctx.since_version(node);
//! let target = ctx.execution_target("reduce_mean_0");
//! ```
//!
//! # Maps
//!
//! | Map | Description |
//! |-----|-------------|
//! | `producer_map` | output_name → producer node name |
//! | `consumer_map` | tensor_name → consumer node names (one per edge) |
//! | `optimizer_map` | node_name → OpEntry (order preserved) |
//! | `initializer_map` | name → TensorProto |
//! | `value_info_map` | name → ValueInfoProto |
//! | `opset_map` | domain → imported opset version |

pub mod accessors;
pub mod context;
pub mod maps;
pub mod mutators;

// Re-export main types
pub use context::GraphContext;
pub use maps::{
    ConsumerMap, GraphIoMap, InitializerMap, OpEntry, OpsetMap, OptimizerMap, OuterScope,
    ProducerMap, ValueInfoMap,
};
