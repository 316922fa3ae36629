//! LayerNorm Fusion Transformer
//!
//! Fuses the decomposed LayerNorm pattern into a single LayerNormalization op.
//!
//! Pattern detected:
//! ```text
//!   input
//!     ├─────────────────────────┐
//!     ↓                         │
//!   ReduceMean (mean)           │
//!     ↓                         │
//!   Sub ←───────────────────────┘
//!     ├─────────────────────────┐
//!     ↓                         │
//!   Pow (square)                │
//!     ↓                         │
//!   ReduceMean (variance)       │
//!     ↓                         │
//!   Add (epsilon)               │
//!     ↓                         │
//!   Sqrt (std)                  │
//!     ↓                         │
//!   Div ←───────────────────────┘
//!     ↓
//!   Mul (scale/gamma)
//!     ↓
//!   Add (bias/beta)
//!     ↓
//!   output
//! ```
//!
//! `Div` may also read a second, identical `Sub` of the same mean.
//!
//! Fused into:
//! ```text
//!   LayerNormalization(input, scale, bias, axis, epsilon)
//! ```
//!
//! Graphs nested in node attributes (If branches, Loop and Scan bodies) are
//! fused too.

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::builder::build_graph_from_context;
use crate::error::OnnxResult;
use crate::graph::{GraphContext, OpEntry};
use crate::pattern::{BiasSource, LayerNormMatch, LayerNormMatcher, MatchOutcome, POLICY};
use crate::proto::{AttributeProto, GraphProto, NodeProto};
use crate::transform::finalize_node_fusion;
use crate::transformers::common::{OnnxTransformer, TransformResult};

/// Pass name used in diagnostics
pub const PASS_NAME: &str = "LayerNormFusion";

/// Fuse decomposed LayerNorm patterns into LayerNormalization op
#[derive(Debug, Clone, Default)]
pub struct FuseLayerNorm {
    /// Execution targets anchors may run on; empty accepts any
    compatible_targets: FxHashSet<String>,
    bias_source: BiasSource,
}

impl FuseLayerNorm {
    /// Create new FuseLayerNorm transformer
    pub fn new() -> Self {
        Self::default()
    }

    /// Only fuse anchors assigned to one of `targets`
    pub fn with_compatible_targets<I, S>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compatible_targets = targets.into_iter().map(Into::into).collect();
        self
    }

    /// Choose where the bias operand is read from
    pub fn with_bias_source(mut self, source: BiasSource) -> Self {
        self.bias_source = source;
        self
    }

    /// Whether an anchor on `target` may be fused
    pub fn is_compatible_target(&self, target: &str) -> bool {
        self.compatible_targets.is_empty() || self.compatible_targets.contains(target)
    }

    fn matcher<'a>(&'a self, ctx: &'a GraphContext) -> LayerNormMatcher<'a> {
        LayerNormMatcher::new(ctx, &POLICY)
            .with_compatible_targets(&self.compatible_targets)
            .with_bias_source(self.bias_source)
    }

    /// Create LayerNormalization node from a match
    fn create_layer_norm_node(&self, m: &LayerNormMatch, name: String) -> NodeProto {
        NodeProto {
            op_type: "LayerNormalization".to_string(),
            name,
            input: vec![m.input.clone(), m.scale.clone(), m.bias.clone()],
            attribute: vec![
                AttributeProto::new_int("axis", m.axis),
                AttributeProto::new_float("epsilon", m.epsilon),
                AttributeProto::new_int("stash_type", 1),
            ],
            doc_string: "fused LayerNorm subgraphs".to_string(),
            ..Default::default()
        }
    }

    fn fuse(
        &self,
        ctx: &mut GraphContext,
        m: LayerNormMatch,
        result: &mut TransformResult,
    ) -> OnnxResult<()> {
        let name = ctx.generate_node_name("LayerNormalization");
        let node = self.create_layer_norm_node(&m, name);
        let fusion = finalize_node_fusion(ctx, &m.nodes, node, &m.target)?;

        debug!(
            pass = PASS_NAME,
            node = %fusion.fused_node_name,
            removed = fusion.eliminated_nodes.len(),
            scale = %m.scale,
            bias = %m.bias,
            "fused LayerNorm"
        );
        result.record(&fusion.fused_node_name);
        result.record_eliminated(fusion.eliminated_nodes.len());
        Ok(())
    }

    /// Run the pass over every graph held in `node_name`'s attributes
    fn recurse(
        &self,
        ctx: &mut GraphContext,
        node_name: &str,
        result: &mut TransformResult,
    ) -> OnnxResult<()> {
        let Some(node) = ctx.get_node(node_name) else {
            return Ok(());
        };
        if !node.has_subgraphs() {
            return Ok(());
        }

        let mut attributes = node.attribute.clone();
        let mut changed = false;
        for attr in &mut attributes {
            if let Some(graph) = attr.g.as_mut() {
                changed |= self.fuse_subgraph(ctx, node_name, graph, result)?;
            }
            for graph in &mut attr.graphs {
                changed |= self.fuse_subgraph(ctx, node_name, graph, result)?;
            }
        }

        if !changed {
            return Ok(());
        }

        // Re-insert so the consumer map sees the rewritten implicit reads
        let index = ctx.node_index(node_name).unwrap_or(usize::MAX);
        let target = ctx.execution_target(node_name).unwrap_or_default().to_string();
        if let Some(mut node) = ctx.remove_node(node_name) {
            node.attribute = attributes;
            ctx.insert_entry_at(index, OpEntry::with_target(node, &target));
        }
        Ok(())
    }

    fn fuse_subgraph(
        &self,
        ctx: &GraphContext,
        parent: &str,
        graph: &mut GraphProto,
        result: &mut TransformResult,
    ) -> OnnxResult<bool> {
        let mut nested = ctx
            .nested(graph, parent)
            .map_err(|e| e.at_node(PASS_NAME, parent))?;
        let nested_result = self.transform(&mut nested)?;

        let modified = nested_result.modified();
        if modified {
            let doc_string = std::mem::take(&mut graph.doc_string);
            *graph = build_graph_from_context(&nested);
            graph.doc_string = doc_string;
        }
        result.merge(nested_result);
        Ok(modified)
    }
}

impl OnnxTransformer for FuseLayerNorm {
    fn name(&self) -> &'static str {
        PASS_NAME
    }

    #[tracing::instrument(skip_all, fields(pass = PASS_NAME, graph = %ctx.graph_name))]
    fn transform(&self, ctx: &mut GraphContext) -> OnnxResult<TransformResult> {
        let mut result = TransformResult::new();
        let order = ctx.topological_order()?;

        for name in order {
            // Consumed by an earlier fusion
            if !ctx.has_node(&name) {
                continue;
            }

            self.recurse(ctx, &name, &mut result)?;

            let outcome = self
                .matcher(ctx)
                .try_match(&name)
                .map_err(|e| e.at_node(PASS_NAME, &name))?;
            if let MatchOutcome::Matched(m) = outcome {
                result.patterns_matched += 1;
                self.fuse(ctx, m, &mut result)
                    .map_err(|e| e.at_node(PASS_NAME, &name))?;
            }
        }

        Ok(result)
    }
}
