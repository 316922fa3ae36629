//! ONNX I/O module
//!
//! Loading, saving and one-shot optimization of ONNX model files. The
//! fusion passes never touch files; this is the outer surface only.
//!
//! # Example
//!
//! ```ignore
//! use lnfuse::io::{load_model, save_model, optimize_file};
//!
//! // Load and save
//! let model = load_model("input.onnx")?;
//! save_model(&model, "output.onnx")?;
//!
//! // One-shot optimization
//! let stats = optimize_file("input.onnx", "optimized.onnx", &Default::default())?;
//! println!("Fused {} LayerNorm subgraphs", stats.transform.transforms_applied);
//! ```

pub mod reader;
pub mod writer;

// Re-exports
pub use reader::{load_model, load_model_from_bytes};
pub use writer::{model_size, model_to_bytes, save_model};

use std::path::Path;

use tracing::info;

use crate::builder::{build_optimized_model, validate_model};
use crate::error::{OnnxResult, TransformError};
use crate::graph::GraphContext;
use crate::proto::ModelProto;
use crate::transformers::{OptimizationPipeline, TransformResult};

/// Optimization statistics
#[derive(Debug, Clone, Default)]
pub struct OptimizeStats {
    /// Original node count
    pub original_nodes: usize,
    /// Optimized node count
    pub optimized_nodes: usize,
    /// Nodes reduced
    pub nodes_reduced: usize,
    /// Original encoded size
    pub original_size: usize,
    /// Optimized encoded size
    pub optimized_size: usize,
    /// Transform statistics
    pub transform: TransformResult,
}

impl OptimizeStats {
    /// Calculate reduction percentage
    pub fn node_reduction_percent(&self) -> f64 {
        if self.original_nodes == 0 {
            0.0
        } else {
            (self.nodes_reduced as f64 / self.original_nodes as f64) * 100.0
        }
    }
}

/// Optimize an ONNX model in memory
///
/// The result is validated before it is returned.
pub fn optimize_model(
    model: &ModelProto,
    pipeline: &OptimizationPipeline,
) -> OnnxResult<(ModelProto, OptimizeStats)> {
    let graph = model
        .graph
        .as_ref()
        .ok_or_else(|| TransformError::MissingField("model.graph".to_string()))?;

    let original_nodes = graph.node.len();
    let original_size = model_size(model);

    let mut ctx = GraphContext::from_model(model)?;
    let transform = pipeline.run(&mut ctx)?;
    let optimized = build_optimized_model(&ctx, model);
    validate_model(&optimized)?;

    let optimized_nodes = optimized.graph.as_ref().map(|g| g.node.len()).unwrap_or(0);
    let stats = OptimizeStats {
        original_nodes,
        optimized_nodes,
        nodes_reduced: original_nodes.saturating_sub(optimized_nodes),
        original_size,
        optimized_size: model_size(&optimized),
        transform,
    };

    info!(
        fused = stats.transform.transforms_applied,
        nodes_before = stats.original_nodes,
        nodes_after = stats.optimized_nodes,
        "optimized model"
    );
    Ok((optimized, stats))
}

/// Optimize an ONNX file and save to another file
pub fn optimize_file<P1: AsRef<Path>, P2: AsRef<Path>>(
    input: P1,
    output: P2,
    pipeline: &OptimizationPipeline,
) -> OnnxResult<OptimizeStats> {
    let model = load_model(input)?;
    let (optimized, stats) = optimize_model(&model, pipeline)?;
    save_model(&optimized, output)?;
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::extensions::{make_node, make_tensor_value_info};
    use crate::proto::OperatorSetIdProto;
    use crate::testing::LayerNormGraph;

    fn make_test_model() -> ModelProto {
        ModelProto {
            ir_version: 8,
            producer_name: "test".to_string(),
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: 17,
            }],
            graph: Some(LayerNormGraph::default().build()),
            ..Default::default()
        }
    }

    #[test]
    fn test_optimize_model() {
        let model = make_test_model();
        let (optimized, stats) = optimize_model(&model, &OptimizationPipeline::default()).unwrap();

        assert_eq!(stats.original_nodes, 9);
        assert_eq!(stats.optimized_nodes, 1);
        assert_eq!(stats.nodes_reduced, 8);
        assert_eq!(stats.transform.transforms_applied, 1);
        assert!(stats.optimized_size < stats.original_size);
        assert_eq!(optimized.producer_name, "test");
    }

    #[test]
    fn test_optimize_model_without_graph() {
        let model = ModelProto::default();
        let result = optimize_model(&model, &OptimizationPipeline::default());
        assert!(matches!(result, Err(TransformError::MissingField(_))));
    }

    #[test]
    fn test_optimize_file() {
        let dir = std::env::temp_dir();
        let input = dir.join(format!("lnfuse_in_{}.onnx", std::process::id()));
        let output = dir.join(format!("lnfuse_out_{}.onnx", std::process::id()));
        save_model(&make_test_model(), &input).unwrap();

        let stats = optimize_file(&input, &output, &OptimizationPipeline::default()).unwrap();
        assert_eq!(stats.optimized_nodes, 1);

        let loaded = load_model(&output).unwrap();
        assert_eq!(loaded.graph.unwrap().node[0].op_type, "LayerNormalization");

        std::fs::remove_file(&input).ok();
        std::fs::remove_file(&output).ok();
    }

    #[test]
    fn test_optimize_stats() {
        let stats = OptimizeStats {
            original_nodes: 100,
            optimized_nodes: 80,
            nodes_reduced: 20,
            ..Default::default()
        };

        assert!((stats.node_reduction_percent() - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_optimize_raises_old_opset() {
        let mut model = make_test_model();
        model.opset_import[0].version = 13;

        let (optimized, stats) = optimize_model(&model, &OptimizationPipeline::default()).unwrap();

        assert_eq!(stats.transform.transforms_applied, 1);
        assert_eq!(optimized.opset_import.len(), 1);
        assert_eq!(optimized.opset_import[0].version, 17);
    }

    #[test]
    fn test_optimize_unnamed_nodes() {
        let mut model = make_test_model();
        let graph = model.graph.as_mut().unwrap();
        for node in &mut graph.node {
            node.name.clear();
        }
        graph.node.push(make_node("Relu", &["Y"], &["Z"], ""));
        graph.value_info.push(make_tensor_value_info("Y", 1, &[2, 8]));
        graph.output = vec![make_tensor_value_info("Z", 1, &[2, 8])];

        let (optimized, stats) = optimize_model(&model, &OptimizationPipeline::default()).unwrap();

        assert_eq!(stats.transform.transforms_applied, 1);
        assert_eq!(stats.optimized_nodes, 2);
        let nodes = &optimized.graph.as_ref().unwrap().node;
        assert_eq!(nodes[0].op_type, "LayerNormalization");
        assert_eq!(nodes[1].name, "Relu_0");
        assert_ne!(nodes[0].name, nodes[1].name);
    }
}
