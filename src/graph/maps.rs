//! Graph map types and builders
//!
//! Defines the core data structures for efficient graph traversal.

use indexmap::IndexMap;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use crate::proto::{GraphProto, NodeProto, TensorProto, ValueInfoProto};

/// Entry in the optimizer map - a node and the target it is assigned to
#[derive(Debug, Clone)]
pub struct OpEntry {
    /// The node itself
    pub node: NodeProto,
    /// Execution target (backend/device); empty when unassigned
    pub execution_target: String,
}

impl OpEntry {
    /// Create a new entry with the given node and no target
    pub fn new(node: NodeProto) -> Self {
        Self {
            node,
            execution_target: String::new(),
        }
    }

    /// Create an entry already assigned to a target
    pub fn with_target(node: NodeProto, target: &str) -> Self {
        Self {
            node,
            execution_target: target.to_string(),
        }
    }
}

/// Type alias for producer map: output_name → node_name
pub type ProducerMap = FxHashMap<String, String>;

/// Type alias for consumer map: tensor_name → [consumer_node_names]
///
/// One entry per consuming input slot, so a node reading the same tensor
/// twice appears twice.
pub type ConsumerMap = FxHashMap<String, SmallVec<[String; 4]>>;

/// Type alias for optimizer map: node_name → OpEntry (order preserved)
pub type OptimizerMap = IndexMap<String, OpEntry>;

/// Type alias for initializer map: name → TensorProto
pub type InitializerMap = FxHashMap<String, TensorProto>;

/// Type alias for value info map: name → ValueInfoProto
pub type ValueInfoMap = FxHashMap<String, ValueInfoProto>;

/// Type alias for graph input/output maps (declaration order matters)
pub type GraphIoMap = IndexMap<String, ValueInfoProto>;

/// Type alias for opset map: domain → imported version
pub type OpsetMap = FxHashMap<String, i64>;

/// Values visible from an enclosing graph
///
/// Nested graphs (If/Loop/Scan bodies) may read tensors of the graph that
/// owns them. Only what the matcher needs is carried: element types, which
/// names are constants, and the constant values that are known.
#[derive(Debug, Clone, Default)]
pub struct OuterScope {
    /// tensor name → element type
    pub elem_types: FxHashMap<String, i32>,
    /// names of constant tensors
    pub constants: FxHashSet<String>,
    /// constant name → value, for constants stored as tensors
    pub constant_values: FxHashMap<String, TensorProto>,
}

/// Outer-scope names read by the graphs held in a node's attributes
///
/// Names a subgraph defines itself (inputs, initializers, node outputs) are
/// left out. Deeper nesting levels are included. Each name appears once.
pub fn implicit_inputs(node: &NodeProto) -> Vec<String> {
    let mut seen = FxHashSet::default();
    let mut reads = Vec::new();

    for attr in &node.attribute {
        for graph in attr.g.iter().chain(&attr.graphs) {
            for name in graph_outer_reads(graph) {
                if seen.insert(name.clone()) {
                    reads.push(name);
                }
            }
        }
    }

    reads
}

/// Names `graph` reads without defining them
pub fn graph_outer_reads(graph: &GraphProto) -> Vec<String> {
    let defined: FxHashSet<&str> = graph
        .input
        .iter()
        .map(|vi| vi.name.as_str())
        .chain(graph.initializer.iter().map(|t| t.name.as_str()))
        .chain(graph.node.iter().flat_map(|n| n.output.iter().map(String::as_str)))
        .collect();

    let mut seen = FxHashSet::default();
    let mut reads = Vec::new();
    for node in &graph.node {
        for name in node.input.iter().cloned().chain(implicit_inputs(node)) {
            if !name.is_empty() && !defined.contains(name.as_str()) && seen.insert(name.clone()) {
                reads.push(name);
            }
        }
    }

    reads
}

/// Every tensor a node reads: its inputs, then its implicit inputs
pub fn node_reads(node: &NodeProto) -> impl Iterator<Item = String> + '_ {
    node.input
        .iter()
        .filter(|i| !i.is_empty())
        .cloned()
        .chain(implicit_inputs(node))
}

/// Copy of `graph` with unnamed and repeated node names replaced
///
/// Replacement names are `<op_type>_<n>`, avoiding every name already in the
/// graph. Returns `None` when all node names are present and unique.
pub fn uniquely_named(graph: &GraphProto) -> Option<GraphProto> {
    let mut seen: FxHashSet<&str> = FxHashSet::default();
    if graph
        .node
        .iter()
        .all(|n| !n.name.is_empty() && seen.insert(n.name.as_str()))
    {
        return None;
    }

    let mut graph = graph.clone();
    let mut taken: FxHashSet<String> = graph
        .node
        .iter()
        .filter(|n| !n.name.is_empty())
        .map(|n| n.name.clone())
        .collect();
    let mut kept: FxHashSet<String> = FxHashSet::default();

    for node in &mut graph.node {
        if !node.name.is_empty() && kept.insert(node.name.clone()) {
            continue;
        }
        let name = (0..)
            .map(|i| format!("{}_{}", node.op_type, i))
            .find(|candidate| !taken.contains(candidate))
            .unwrap_or_default();
        taken.insert(name.clone());
        kept.insert(name.clone());
        node.name = name;
    }

    Some(graph)
}

/// Build producer map from graph nodes
///
/// Maps each output tensor name to the node that produces it.
pub fn build_producer_map(graph: &GraphProto) -> ProducerMap {
    let mut map = FxHashMap::default();

    for node in &graph.node {
        for output in &node.output {
            if !output.is_empty() {
                map.insert(output.clone(), node.name.clone());
            }
        }
    }

    map
}

/// Build consumer map from graph nodes
///
/// Maps each tensor name to the list of nodes that consume it. A node whose
/// subgraphs read an outer tensor counts as one consumer of it.
pub fn build_consumer_map(graph: &GraphProto) -> ConsumerMap {
    let mut map: ConsumerMap = FxHashMap::default();

    for node in &graph.node {
        for input in node_reads(node) {
            map.entry(input).or_default().push(node.name.clone());
        }
    }

    map
}

/// Build optimizer map from graph nodes
///
/// Preserves node order using IndexMap. Every node gets `target`.
pub fn build_optimizer_map(graph: &GraphProto, target: &str) -> OptimizerMap {
    let mut map = IndexMap::new();

    for node in &graph.node {
        map.insert(node.name.clone(), OpEntry::with_target(node.clone(), target));
    }

    map
}

/// Build initializer map from graph
pub fn build_initializer_map(graph: &GraphProto) -> InitializerMap {
    graph
        .initializer
        .iter()
        .map(|t| (t.name.clone(), t.clone()))
        .collect()
}

/// Build value info map from graph
///
/// Combines graph inputs, outputs, and intermediate value_info.
pub fn build_value_info_map(graph: &GraphProto) -> ValueInfoMap {
    let mut map = FxHashMap::default();

    for vi in graph
        .input
        .iter()
        .chain(&graph.output)
        .chain(&graph.value_info)
    {
        map.insert(vi.name.clone(), vi.clone());
    }

    map
}

/// Build graph input map
pub fn build_graph_input_map(graph: &GraphProto) -> GraphIoMap {
    graph
        .input
        .iter()
        .map(|vi| (vi.name.clone(), vi.clone()))
        .collect()
}

/// Build graph output map
pub fn build_graph_output_map(graph: &GraphProto) -> GraphIoMap {
    graph
        .output
        .iter()
        .map(|vi| (vi.name.clone(), vi.clone()))
        .collect()
}
