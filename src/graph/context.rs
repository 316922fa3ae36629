//! Graph context for ONNX model manipulation
//!
//! `GraphContext` is the central structure for working with ONNX graphs.
//! It maintains efficient maps for node lookup, traversal, and manipulation.

use crate::error::{OnnxResult, TransformError};
use crate::proto::extensions::is_onnx_domain;
use crate::proto::{GraphProto, ModelProto, NodeProto, TensorProto, ValueInfoProto};

use super::maps::{
    build_consumer_map, build_graph_input_map, build_graph_output_map, build_initializer_map,
    build_optimizer_map, build_producer_map, build_value_info_map, ConsumerMap, GraphIoMap,
    uniquely_named, InitializerMap, OpEntry, OpsetMap, OptimizerMap, OuterScope, ProducerMap,
    ValueInfoMap,
};

/// Graph context for efficient graph operations
///
/// Owns a decomposed copy of one `GraphProto`. Passes take it by `&mut`, so a
/// context is exclusively held by whichever pass is running on it.
#[derive(Debug)]
pub struct GraphContext {
    /// Graph name (kept for reassembly)
    pub graph_name: String,

    /// Maps output tensor name → producer node name
    pub producer_map: ProducerMap,

    /// Maps tensor name → consumer node names
    pub consumer_map: ConsumerMap,

    /// Maps node name → OpEntry (preserves insertion order)
    pub optimizer_map: OptimizerMap,

    /// Maps initializer name → TensorProto
    pub initializer_map: InitializerMap,

    /// Maps tensor name → ValueInfoProto (inputs + outputs + value_info)
    pub value_info_map: ValueInfoMap,

    /// Maps graph input name → ValueInfoProto
    pub graph_input_map: GraphIoMap,

    /// Maps graph output name → ValueInfoProto
    pub graph_output_map: GraphIoMap,

    /// Maps operator domain → imported opset version
    pub opset_map: OpsetMap,

    /// Types and constants visible from enclosing graphs
    pub outer_scope: OuterScope,
}

impl GraphContext {
    /// Create a new GraphContext from a GraphProto
    ///
    /// No opsets are imported; use [`GraphContext::from_model`] or
    /// [`GraphContext::set_opset_version`] before running version-gated passes.
    pub fn new(graph: &GraphProto) -> Self {
        Self::with_target(graph, "")
    }

    /// Create a context whose nodes are all assigned to `target`
    ///
    /// Nodes are keyed by name, so unnamed nodes and repeated names are
    /// given fresh `<op_type>_<n>` names first.
    pub fn with_target(graph: &GraphProto, target: &str) -> Self {
        let renamed = uniquely_named(graph);
        let graph = renamed.as_ref().unwrap_or(graph);

        Self {
            graph_name: graph.name.clone(),
            producer_map: build_producer_map(graph),
            consumer_map: build_consumer_map(graph),
            optimizer_map: build_optimizer_map(graph, target),
            initializer_map: build_initializer_map(graph),
            value_info_map: build_value_info_map(graph),
            graph_input_map: build_graph_input_map(graph),
            graph_output_map: build_graph_output_map(graph),
            opset_map: OpsetMap::default(),
            outer_scope: OuterScope::default(),
        }
    }

    /// Create from a ModelProto, importing its opsets
    pub fn from_model(model: &ModelProto) -> OnnxResult<Self> {
        let graph = model
            .graph
            .as_ref()
            .ok_or_else(|| TransformError::MissingField("model.graph".to_string()))?;

        let mut ctx = Self::new(graph);
        for opset in &model.opset_import {
            ctx.set_opset_version(&opset.domain, opset.version);
        }
        Ok(ctx)
    }

    /// Create a context for a graph nested inside `parent` (an If branch,
    /// a Loop body, ...)
    ///
    /// The nested context inherits the opset imports, sees this graph's
    /// values as outer scope, and assigns its nodes to the parent's target.
    pub fn nested(&self, graph: &GraphProto, parent: &str) -> OnnxResult<Self> {
        let target = self.execution_target(parent).ok_or_else(|| {
            TransformError::Internal(format!("parent node '{}' not in graph", parent))
        })?;

        let mut ctx = Self::with_target(graph, target);
        ctx.opset_map = self.opset_map.clone();
        ctx.outer_scope = self.visible_scope();
        Ok(ctx)
    }

    /// Everything a nested graph can see from here
    fn visible_scope(&self) -> OuterScope {
        let mut scope = self.outer_scope.clone();

        // Local definitions shadow the enclosing graphs
        let local = self
            .graph_input_map
            .keys()
            .chain(self.nodes().flat_map(|n| n.output.iter()));
        for name in local {
            scope.constants.remove(name);
            scope.constant_values.remove(name);
        }

        for (name, vi) in &self.value_info_map {
            if let Some(elem_type) = vi.get_elem_type() {
                scope.elem_types.insert(name.clone(), elem_type);
            }
        }
        for (name, tensor) in &self.initializer_map {
            scope.elem_types.insert(name.clone(), tensor.data_type);
            if !self.is_graph_input(name) {
                scope.constants.insert(name.clone());
                scope.constant_values.insert(name.clone(), tensor.clone());
            }
        }
        for node in self.nodes().filter(|n| n.op_type == "Constant") {
            scope.constants.extend(node.output.iter().cloned());
            let value = node.get_attribute("value").and_then(|a| a.t.as_ref());
            if let (Some(output), Some(tensor)) = (node.output.first(), value) {
                scope.constant_values.insert(output.clone(), tensor.clone());
            }
        }

        scope
    }

    // ========================================================================
    // Opsets
    // ========================================================================

    /// Record the imported opset version for a domain
    pub fn set_opset_version(&mut self, domain: &str, version: i64) {
        let key = if is_onnx_domain(domain) { "" } else { domain };
        self.opset_map.insert(key.to_string(), version);
    }

    /// Imported opset version for a domain
    pub fn opset_version(&self, domain: &str) -> Option<i64> {
        let key = if is_onnx_domain(domain) { "" } else { domain };
        self.opset_map.get(key).copied()
    }

    // ========================================================================
    // Node accessors
    // ========================================================================

    /// Get a node by name
    pub fn get_node(&self, name: &str) -> Option<&NodeProto> {
        self.optimizer_map.get(name).map(|e| &e.node)
    }

    /// Get a mutable node by name
    ///
    /// Callers must not change inputs or outputs through this handle; the
    /// producer and consumer maps are not refreshed.
    pub fn get_node_mut(&mut self, name: &str) -> Option<&mut NodeProto> {
        self.optimizer_map.get_mut(name).map(|e| &mut e.node)
    }

    /// Get OpEntry by name
    pub fn get_entry(&self, name: &str) -> Option<&OpEntry> {
        self.optimizer_map.get(name)
    }

    /// Check if a node exists
    pub fn has_node(&self, name: &str) -> bool {
        self.optimizer_map.contains_key(name)
    }

    /// Get the number of nodes
    pub fn node_count(&self) -> usize {
        self.optimizer_map.len()
    }

    /// Iterate over all nodes in order
    pub fn nodes(&self) -> impl Iterator<Item = &NodeProto> {
        self.optimizer_map.values().map(|e| &e.node)
    }

    /// Iterate over node names in order
    pub fn node_names(&self) -> impl Iterator<Item = &String> {
        self.optimizer_map.keys()
    }

    /// Execution target of a node, `None` if the node does not exist
    pub fn execution_target(&self, name: &str) -> Option<&str> {
        self.optimizer_map
            .get(name)
            .map(|e| e.execution_target.as_str())
    }

    // ========================================================================
    // Graph traversal
    // ========================================================================

    /// Get the producer node for a tensor
    pub fn get_producer(&self, tensor_name: &str) -> Option<&NodeProto> {
        self.producer_map
            .get(tensor_name)
            .and_then(|name| self.get_node(name))
    }

    /// Get the producer node name for a tensor
    pub fn get_producer_name(&self, tensor_name: &str) -> Option<&String> {
        self.producer_map.get(tensor_name)
    }

    /// Get consumer nodes for a tensor
    pub fn get_consumers(&self, tensor_name: &str) -> Vec<&NodeProto> {
        self.consumer_map
            .get(tensor_name)
            .map(|names| {
                names
                    .iter()
                    .filter_map(|name| self.get_node(name))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Get consumer node names for a tensor
    pub fn get_consumer_names(&self, tensor_name: &str) -> Option<&[String]> {
        self.consumer_map.get(tensor_name).map(|v| v.as_slice())
    }

    /// Check if a tensor is a graph input
    pub fn is_graph_input(&self, name: &str) -> bool {
        self.graph_input_map.contains_key(name)
    }

    /// Check if a tensor is a graph output
    pub fn is_graph_output(&self, name: &str) -> bool {
        self.graph_output_map.contains_key(name)
    }

    /// Check if a tensor is an initializer
    pub fn is_initializer(&self, name: &str) -> bool {
        self.initializer_map.contains_key(name)
    }

    // ========================================================================
    // Value info and initializer accessors
    // ========================================================================

    /// Get value info for a tensor
    pub fn get_value_info(&self, name: &str) -> Option<&ValueInfoProto> {
        self.value_info_map.get(name)
    }

    /// Get initializer by name
    pub fn get_initializer(&self, name: &str) -> Option<&TensorProto> {
        self.initializer_map.get(name)
    }
}
