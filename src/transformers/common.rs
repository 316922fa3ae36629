//! Common utilities for transformers
//!
//! The pass interface and the statistics every pass reports.

use crate::error::OnnxResult;
use crate::graph::GraphContext;

/// Transformation result for statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TransformResult {
    /// Number of patterns matched
    pub patterns_matched: usize,
    /// Number of transformations applied
    pub transforms_applied: usize,
    /// Number of nodes eliminated
    pub nodes_eliminated: usize,
    /// Names of nodes created by the transformations
    pub transformed_nodes: Vec<String>,
}

impl TransformResult {
    /// Create empty result
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful transformation
    pub fn record(&mut self, node_name: &str) {
        self.transforms_applied += 1;
        self.transformed_nodes.push(node_name.to_string());
    }

    /// Record eliminated nodes
    pub fn record_eliminated(&mut self, count: usize) {
        self.nodes_eliminated += count;
    }

    /// Whether the graph changed
    pub fn modified(&self) -> bool {
        self.transforms_applied > 0 || self.nodes_eliminated > 0
    }

    /// Merge with another result
    pub fn merge(&mut self, other: TransformResult) {
        self.patterns_matched += other.patterns_matched;
        self.transforms_applied += other.transforms_applied;
        self.nodes_eliminated += other.nodes_eliminated;
        self.transformed_nodes.extend(other.transformed_nodes);
    }
}

/// Trait for individual transformers
pub trait OnnxTransformer {
    /// Name of the transformer
    fn name(&self) -> &'static str;

    /// Apply the transformation
    fn transform(&self, ctx: &mut GraphContext) -> OnnxResult<TransformResult>;

    /// Check if this transformer is applicable to the graph
    fn is_applicable(&self, _ctx: &GraphContext) -> bool {
        true
    }
}

/// Run multiple transformers in sequence
pub fn run_transformers(
    ctx: &mut GraphContext,
    transformers: &[&dyn OnnxTransformer],
) -> OnnxResult<TransformResult> {
    let mut total = TransformResult::new();

    for transformer in transformers {
        if transformer.is_applicable(ctx) {
            let result = transformer.transform(ctx)?;
            total.merge(result);
        }
    }

    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::GraphProto;

    struct Counter;

    impl OnnxTransformer for Counter {
        fn name(&self) -> &'static str {
            "Counter"
        }

        fn transform(&self, ctx: &mut GraphContext) -> OnnxResult<TransformResult> {
            let mut result = TransformResult::new();
            result.patterns_matched = ctx.node_count();
            Ok(result)
        }
    }

    struct Never;

    impl OnnxTransformer for Never {
        fn name(&self) -> &'static str {
            "Never"
        }

        fn transform(&self, _ctx: &mut GraphContext) -> OnnxResult<TransformResult> {
            unreachable!("not applicable")
        }

        fn is_applicable(&self, _ctx: &GraphContext) -> bool {
            false
        }
    }

    #[test]
    fn test_transform_result() {
        let mut result = TransformResult::new();
        assert!(!result.modified());

        result.record("LayerNormalization_0");
        result.record_eliminated(9);

        assert_eq!(result.transforms_applied, 1);
        assert_eq!(result.nodes_eliminated, 9);
        assert_eq!(result.transformed_nodes.len(), 1);
        assert!(result.modified());
    }

    #[test]
    fn test_matches_alone_are_not_modifications() {
        let mut result = TransformResult::new();
        result.patterns_matched = 3;
        assert!(!result.modified());
    }

    #[test]
    fn test_run_transformers_skips_inapplicable() {
        let mut ctx = GraphContext::new(&GraphProto::default());
        let result = run_transformers(&mut ctx, &[&Never, &Counter]).unwrap();
        assert_eq!(result, TransformResult::new());
    }
}
