//! Advanced graph accessor methods
//!
//! Edge-level queries used by the pattern matchers, plus type, constness and
//! version lookups.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use crate::error::{OnnxResult, TransformError};
use crate::opset;
use crate::proto::NodeProto;

use super::context::GraphContext;
use super::maps::node_reads;

impl GraphContext {
    // ========================================================================
    // Edge queries
    // ========================================================================

    /// Producers of a node's inputs, one entry per input edge, in input order
    ///
    /// Tensors read inside the node's subgraphs follow its own inputs. Inputs
    /// fed by graph inputs, initializers or outer-scope values have no
    /// producer and contribute nothing.
    pub fn predecessor_edges(&self, node: &NodeProto) -> OnnxResult<Vec<&NodeProto>> {
        let mut result = Vec::with_capacity(node.input.len());

        for input in node_reads(node) {
            if let Some(producer) = self.producer_map.get(&input) {
                let producer = self.get_node(producer).ok_or_else(|| {
                    TransformError::Internal(format!(
                        "tensor '{}' read by '{}' names missing producer '{}'",
                        input, node.name, producer
                    ))
                })?;
                result.push(producer);
            }
        }

        Ok(result)
    }

    /// Consumers of a node's outputs, one entry per output edge
    pub fn successor_edges(&self, node: &NodeProto) -> OnnxResult<Vec<&NodeProto>> {
        let mut result = Vec::new();

        for output in &node.output {
            let Some(consumers) = self.consumer_map.get(output) else {
                continue;
            };
            for name in consumers {
                let consumer = self.get_node(name).ok_or_else(|| {
                    TransformError::Internal(format!(
                        "tensor '{}' of '{}' names missing consumer '{}'",
                        output, node.name, name
                    ))
                })?;
                result.push(consumer);
            }
        }

        Ok(result)
    }

    /// Number of consumer edges leaving a node, across all its outputs
    ///
    /// Graph outputs are not edges and are not counted.
    pub fn output_edge_count(&self, node: &NodeProto) -> usize {
        node.output
            .iter()
            .filter_map(|o| self.consumer_map.get(o))
            .map(|c| c.len())
            .sum()
    }

    // ========================================================================
    // Type and constness queries
    // ========================================================================

    /// Get the declared element type of a tensor
    pub fn get_tensor_elem_type(&self, name: &str) -> Option<i32> {
        if let Some(elem_type) = self.value_info_map.get(name).and_then(|vi| vi.get_elem_type())
        {
            return Some(elem_type);
        }

        if let Some(init) = self.initializer_map.get(name) {
            return Some(init.data_type);
        }

        if let Some(elem_type) = self.outer_scope.elem_types.get(name) {
            return Some(*elem_type);
        }

        self.constant_node_tensor(name).map(|t| t.data_type)
    }

    /// Whether a tensor is a compile-time constant
    ///
    /// Initializers that are also graph inputs can be overridden at run time
    /// and do not count.
    pub fn is_constant(&self, name: &str) -> bool {
        (self.is_initializer(name) && !self.is_graph_input(name))
            || self.outer_scope.constants.contains(name)
            || self.constant_node_tensor(name).is_some()
    }

    /// Constant tensor value (initializer, `Constant` node or outer scope)
    pub fn get_constant_tensor(&self, name: &str) -> Option<&crate::proto::TensorProto> {
        if let Some(init) = self.get_initializer(name) {
            return Some(init);
        }
        if self.get_producer(name).is_some() || self.is_graph_input(name) {
            return self.constant_node_tensor(name);
        }
        self.outer_scope.constant_values.get(name)
    }

    fn constant_node_tensor(&self, name: &str) -> Option<&crate::proto::TensorProto> {
        let producer = self.get_producer(name)?;
        if producer.op_type != "Constant" {
            return None;
        }
        producer.get_attribute("value")?.t.as_ref()
    }

    // ========================================================================
    // Version queries
    // ========================================================================

    /// Schema since-version the node resolves to under the imported opsets
    pub fn since_version(&self, node: &NodeProto) -> Option<i64> {
        let opset = self.opset_version(&node.domain)?;
        opset::since_version(&node.op_type, &node.domain, opset)
    }

    // ========================================================================
    // Ordering
    // ========================================================================

    /// Node names in topological order (Kahn's algorithm)
    ///
    /// Ties are broken by stored node order, so the result is deterministic.
    pub fn topological_order(&self) -> OnnxResult<Vec<String>> {
        let mut in_degree: FxHashMap<&str, usize> = FxHashMap::default();

        for (name, entry) in &self.optimizer_map {
            let preds = self.predecessor_edges(&entry.node)?;
            in_degree.insert(name.as_str(), preds.len());
        }

        let mut queue: VecDeque<&str> = self
            .optimizer_map
            .keys()
            .map(|n| n.as_str())
            .filter(|n| in_degree[n] == 0)
            .collect();
        let mut result = Vec::with_capacity(self.optimizer_map.len());

        while let Some(name) = queue.pop_front() {
            result.push(name.to_string());

            let node = &self.optimizer_map[name].node;
            for consumer in self.successor_edges(node)? {
                if let Some(count) = in_degree.get_mut(consumer.name.as_str()) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(consumer.name.as_str());
                    }
                }
            }
        }

        if result.len() != self.optimizer_map.len() {
            return Err(TransformError::InvalidModel(format!(
                "graph '{}' contains a cycle",
                self.graph_name
            )));
        }

        Ok(result)
    }

    /// Find nodes by op type
    pub fn find_nodes_by_op(&self, op_type: &str) -> Vec<&NodeProto> {
        self.nodes().filter(|n| n.op_type == op_type).collect()
    }
}
