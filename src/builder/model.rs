//! Model builder for ONNX models
//!
//! Reassembles `GraphProto` / `ModelProto` from a transformed context.

use rustc_hash::FxHashSet;
use tracing::debug;

use crate::error::{OnnxResult, TransformError};
use crate::graph::maps::implicit_inputs;
use crate::graph::GraphContext;
use crate::opset::schema_versions;
use crate::proto::extensions::is_onnx_domain;
use crate::proto::{
    GraphProto, ModelProto, NodeProto, OperatorSetIdProto, TensorProto, ValueInfoProto,
};

/// Build a GraphProto from a GraphContext
///
/// Nodes keep their stored order and graph inputs/outputs their declared
/// order. Initializers and value_info no node refers to anymore are dropped;
/// reads from nested graphs count as references.
pub fn build_graph_from_context(ctx: &GraphContext) -> GraphProto {
    let nodes: Vec<NodeProto> = ctx.nodes().cloned().collect();

    let mut used_tensors: FxHashSet<String> = FxHashSet::default();
    for node in &nodes {
        for name in node.input.iter().chain(&node.output) {
            if !name.is_empty() {
                used_tensors.insert(name.clone());
            }
        }
        used_tensors.extend(implicit_inputs(node));
    }
    used_tensors.extend(ctx.graph_input_map.keys().cloned());
    used_tensors.extend(ctx.graph_output_map.keys().cloned());

    let mut initializers: Vec<TensorProto> = ctx
        .initializer_map
        .values()
        .filter(|t| used_tensors.contains(&t.name))
        .cloned()
        .collect();
    initializers.sort_by(|a, b| a.name.cmp(&b.name));

    let inputs: Vec<ValueInfoProto> = ctx.graph_input_map.values().cloned().collect();
    let outputs: Vec<ValueInfoProto> = ctx.graph_output_map.values().cloned().collect();

    // value_info excludes graph inputs/outputs
    let mut value_info: Vec<ValueInfoProto> = ctx
        .value_info_map
        .values()
        .filter(|vi| {
            used_tensors.contains(&vi.name)
                && !ctx.is_graph_input(&vi.name)
                && !ctx.is_graph_output(&vi.name)
        })
        .cloned()
        .collect();
    value_info.sort_by(|a, b| a.name.cmp(&b.name));

    GraphProto {
        node: nodes,
        initializer: initializers,
        input: inputs,
        output: outputs,
        value_info,
        name: ctx.graph_name.clone(),
        ..Default::default()
    }
}

/// Build optimized model from context and original model
///
/// Everything but the graph is taken from `original`, except that the
/// default-domain opset import is raised to the oldest opset defining every
/// operator the graph now uses (opset 17 once a `LayerNormalization` exists).
pub fn build_optimized_model(ctx: &GraphContext, original: &ModelProto) -> ModelProto {
    let mut model = original.clone();
    let doc_string = original
        .graph
        .as_ref()
        .map(|g| g.doc_string.clone())
        .unwrap_or_default();

    let mut graph = build_graph_from_context(ctx);
    graph.doc_string = doc_string;
    model.graph = Some(graph);
    raise_onnx_opset(&mut model);
    model
}

/// Oldest default-domain opset defining every known operator in `graph`
///
/// Nested graphs are included.
pub fn required_onnx_opset(graph: &GraphProto) -> Option<i64> {
    graph
        .node
        .iter()
        .flat_map(|node| {
            let own = schema_versions(&node.op_type, &node.domain)
                .and_then(|versions| versions.first().copied());
            let nested = node
                .attribute
                .iter()
                .flat_map(|a| a.g.iter().chain(&a.graphs))
                .filter_map(required_onnx_opset);
            own.into_iter().chain(nested).collect::<Vec<_>>()
        })
        .max()
}

fn raise_onnx_opset(model: &mut ModelProto) {
    let Some(required) = model.graph.as_ref().and_then(required_onnx_opset) else {
        return;
    };

    match model
        .opset_import
        .iter_mut()
        .find(|o| is_onnx_domain(&o.domain))
    {
        Some(import) if import.version < required => {
            debug!(from = import.version, to = required, "raising default-domain opset");
            import.version = required;
        }
        Some(_) => {}
        None => {
            debug!(to = required, "adding default-domain opset");
            model.opset_import.push(OperatorSetIdProto {
                domain: String::new(),
                version: required,
            });
        }
    }
}

/// Validate model structure
///
/// Checks the top-level graph: node outputs are unique and every tensor a
/// node reads is available (graph input, initializer or an earlier node
/// output) when the node runs. Names read by a node's nested graphs count as
/// reads of that node.
pub fn validate_model(model: &ModelProto) -> OnnxResult<()> {
    let graph = model
        .graph
        .as_ref()
        .ok_or_else(|| TransformError::MissingField("model.graph".to_string()))?;
    validate_graph(graph)
}

/// Validate one graph in isolation
pub fn validate_graph(graph: &GraphProto) -> OnnxResult<()> {
    if graph.output.is_empty() {
        return Err(TransformError::InvalidModel(
            "Graph has no outputs".to_string(),
        ));
    }

    let mut available: FxHashSet<&str> = graph
        .input
        .iter()
        .map(|vi| vi.name.as_str())
        .chain(graph.initializer.iter().map(|t| t.name.as_str()))
        .collect();
    let mut produced: FxHashSet<&str> = FxHashSet::default();

    for node in &graph.node {
        for input in node.input.iter().filter(|i| !i.is_empty()) {
            if !available.contains(input.as_str()) {
                return Err(TransformError::InvalidModel(format!(
                    "Missing input tensor: {} (required by node {})",
                    input, node.name
                )));
            }
        }
        for input in implicit_inputs(node) {
            if !available.contains(input.as_str()) {
                return Err(TransformError::InvalidModel(format!(
                    "Missing outer-scope tensor: {} (read inside node {})",
                    input, node.name
                )));
            }
        }
        for output in node.output.iter().filter(|o| !o.is_empty()) {
            if !produced.insert(output) {
                return Err(TransformError::InvalidModel(format!(
                    "Duplicate output tensor: {}",
                    output
                )));
            }
            available.insert(output);
        }
    }

    for output in &graph.output {
        if !available.contains(output.name.as_str()) {
            return Err(TransformError::InvalidModel(format!(
                "Graph output {} is never produced",
                output.name
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::extensions::{make_node, make_tensor_value_info};
    use crate::proto::AttributeProto;

    fn make_test_model() -> ModelProto {
        ModelProto {
            ir_version: 8,
            producer_name: "test".to_string(),
            opset_import: vec![OperatorSetIdProto {
                domain: String::new(),
                version: 17,
            }],
            graph: Some(GraphProto {
                name: "main".to_string(),
                doc_string: "keep me".to_string(),
                node: vec![
                    make_node("Mul", &["X", "W"], &["scaled"], "mul_0"),
                    make_node("Relu", &["scaled"], &["Y"], "relu_0"),
                ],
                input: vec![make_tensor_value_info("X", 1, &[4])],
                output: vec![make_tensor_value_info("Y", 1, &[4])],
                initializer: vec![
                    TensorProto {
                        name: "W".to_string(),
                        data_type: 1,
                        ..Default::default()
                    },
                    TensorProto {
                        name: "unused".to_string(),
                        data_type: 1,
                        ..Default::default()
                    },
                ],
                value_info: vec![
                    make_tensor_value_info("scaled", 1, &[4]),
                    make_tensor_value_info("gone", 1, &[4]),
                ],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_build_graph_from_context() {
        let model = make_test_model();
        let ctx = GraphContext::new(model.graph.as_ref().unwrap());

        let built = build_graph_from_context(&ctx);

        assert_eq!(built.name, "main");
        assert_eq!(built.node.len(), 2);
        assert_eq!(built.initializer.len(), 1);
        assert_eq!(built.initializer[0].name, "W");
        assert_eq!(built.value_info.len(), 1);
        assert_eq!(built.input.len(), 1);
        assert_eq!(built.output.len(), 1);
    }

    #[test]
    fn test_build_optimized_model_keeps_metadata() {
        let model = make_test_model();
        let mut ctx = GraphContext::new(model.graph.as_ref().unwrap());
        ctx.remove_node("relu_0");

        let optimized = build_optimized_model(&ctx, &model);

        assert_eq!(optimized.producer_name, "test");
        assert_eq!(optimized.opset_import.len(), 1);
        let graph = optimized.graph.as_ref().unwrap();
        assert_eq!(graph.doc_string, "keep me");
        assert_eq!(graph.node.len(), 1);
    }

    #[test]
    fn test_validate_model_valid() {
        assert!(validate_model(&make_test_model()).is_ok());
    }

    #[test]
    fn test_validate_model_missing_input() {
        let mut model = make_test_model();
        let graph = model.graph.as_mut().unwrap();
        graph.node[0].input.push("missing_tensor".to_string());

        assert!(matches!(
            validate_model(&model),
            Err(TransformError::InvalidModel(_))
        ));
    }

    #[test]
    fn test_validate_model_out_of_order() {
        let mut model = make_test_model();
        model.graph.as_mut().unwrap().node.reverse();
        assert!(validate_model(&model).is_err());
    }

    #[test]
    fn test_validate_model_dangling_output() {
        let mut model = make_test_model();
        model.graph.as_mut().unwrap().node.pop();
        assert!(validate_model(&model).is_err());
    }

    fn with_branch_reading(model: &mut ModelProto, name: &str) {
        let branch = GraphProto {
            node: vec![make_node("Relu", &[name], &["branch_out"], "relu_b")],
            output: vec![make_tensor_value_info("branch_out", 1, &[4])],
            ..Default::default()
        };
        let graph = model.graph.as_mut().unwrap();
        graph.input.push(make_tensor_value_info("cond", 9, &[]));
        graph.node.push(NodeProto {
            op_type: "If".to_string(),
            name: "if_0".to_string(),
            input: vec!["cond".to_string()],
            output: vec!["side".to_string()],
            attribute: vec![
                AttributeProto::new_graph("then_branch", branch.clone()),
                AttributeProto::new_graph("else_branch", branch),
            ],
            ..Default::default()
        });
        graph.output.push(make_tensor_value_info("side", 1, &[4]));
    }

    #[test]
    fn test_branch_reads_keep_initializers() {
        let mut model = make_test_model();
        with_branch_reading(&mut model, "unused");
        let ctx = GraphContext::new(model.graph.as_ref().unwrap());

        let built = build_graph_from_context(&ctx);

        let inits: Vec<&str> = built.initializer.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(inits, vec!["W", "unused"]);
        validate_graph(&built).unwrap();
    }

    #[test]
    fn test_validate_missing_outer_tensor() {
        let mut model = make_test_model();
        with_branch_reading(&mut model, "nowhere");

        let err = validate_model(&model).unwrap_err();
        assert!(err.to_string().contains("nowhere"));
    }

    #[test]
    fn test_opset_raised_for_layer_norm() {
        let mut model = make_test_model();
        model.opset_import[0].version = 13;
        let mut ctx = GraphContext::new(model.graph.as_ref().unwrap());
        ctx.insert_node(make_node(
            "LayerNormalization",
            &["Y", "W", "W"],
            &["normed"],
            "ln_0",
        ));

        let optimized = build_optimized_model(&ctx, &model);

        assert_eq!(optimized.opset_import.len(), 1);
        assert_eq!(optimized.opset_import[0].version, 17);
    }

    #[test]
    fn test_opset_kept_without_new_ops() {
        let mut model = make_test_model();
        model.opset_import[0].version = 13;
        model.opset_import.push(OperatorSetIdProto {
            domain: "com.microsoft".to_string(),
            version: 1,
        });
        let ctx = GraphContext::new(model.graph.as_ref().unwrap());

        let optimized = build_optimized_model(&ctx, &model);

        assert_eq!(optimized.opset_import, model.opset_import);
    }

    #[test]
    fn test_required_opset_looks_into_branches() {
        let ln = make_node("LayerNormalization", &["X", "W", "W"], &["Y"], "ln_0");
        let outer = GraphProto {
            node: vec![NodeProto {
                op_type: "If".to_string(),
                attribute: vec![AttributeProto::new_graph(
                    "then_branch",
                    GraphProto {
                        node: vec![ln],
                        ..Default::default()
                    },
                )],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(required_onnx_opset(&outer), Some(17));
        assert_eq!(required_onnx_opset(&GraphProto::default()), None);
    }
}
