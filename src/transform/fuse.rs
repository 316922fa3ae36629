//! Node fusion transformations
//!
//! Replaces a matched region by a single node. The edit is checked in full
//! before anything is touched, so a failed fusion leaves the graph as it was.

use rustc_hash::FxHashSet;

use crate::error::{OnnxResult, TransformError};
use crate::graph::{GraphContext, OpEntry};
use crate::proto::NodeProto;

/// Result of a fusion operation
#[derive(Debug, Clone)]
pub struct FusionResult {
    /// Name of the fused (new) node
    pub fused_node_name: String,
    /// Names of nodes that were eliminated
    pub eliminated_nodes: Vec<String>,
}

/// Replace `nodes` by `fused`
///
/// The fused node takes over the outputs of the last node in `nodes`, so that
/// node's consumers read from it. It is stored where the last node was, less
/// the removed nodes before it, and runs on `target`.
///
/// # Errors
///
/// `TransformError::Internal` when the edit would break the graph: a listed
/// node is missing, the fused name is taken by a node outside the region, an
/// interior output is read outside the region, or one of the fused node's
/// inputs is produced inside it.
pub fn finalize_node_fusion(
    ctx: &mut GraphContext,
    nodes: &[String],
    mut fused: NodeProto,
    target: &str,
) -> OnnxResult<FusionResult> {
    let last = nodes
        .last()
        .ok_or_else(|| TransformError::Internal("fusion of an empty node list".to_string()))?;

    let mut region: FxHashSet<&str> = FxHashSet::default();
    let mut eliminated = Vec::with_capacity(nodes.len());
    for name in nodes {
        if region.insert(name.as_str()) {
            eliminated.push(name.clone());
        }
    }

    let mut positions = Vec::with_capacity(eliminated.len());
    for name in &eliminated {
        let index = ctx.node_index(name).ok_or_else(|| {
            TransformError::Internal(format!("fused node '{}' not in graph", name))
        })?;
        positions.push(index);
    }

    if ctx.has_node(&fused.name) && !region.contains(fused.name.as_str()) {
        return Err(TransformError::Internal(format!(
            "fused node name '{}' already taken",
            fused.name
        )));
    }

    for name in eliminated.iter().filter(|n| *n != last) {
        let Some(node) = ctx.get_node(name) else {
            continue;
        };
        for output in node.output.iter().filter(|o| !o.is_empty()) {
            let escapes = ctx.is_graph_output(output)
                || ctx
                    .get_consumer_names(output)
                    .is_some_and(|c| c.iter().any(|n| !region.contains(n.as_str())));
            if escapes {
                return Err(TransformError::Internal(format!(
                    "output '{}' of '{}' is read outside the fused region",
                    output, name
                )));
            }
        }
    }

    for input in fused.input.iter().filter(|i| !i.is_empty()) {
        if let Some(producer) = ctx.get_producer_name(input) {
            if region.contains(producer.as_str()) {
                return Err(TransformError::Internal(format!(
                    "fused input '{}' is produced inside the region by '{}'",
                    input, producer
                )));
            }
        }
    }

    // Checked; apply
    fused.output = ctx
        .get_node(last)
        .map(|n| n.output.clone())
        .unwrap_or_default();
    let last_index = ctx.node_index(last).unwrap_or(ctx.node_count());
    let removed_before = positions.iter().filter(|&&p| p < last_index).count();

    for name in &eliminated {
        ctx.remove_node(name);
    }

    let fused_node_name = fused.name.clone();
    ctx.insert_entry_at(last_index - removed_before, OpEntry::with_target(fused, target));

    Ok(FusionResult {
        fused_node_name,
        eliminated_nodes: eliminated,
    })
}
