//! Graph mutation operations
//!
//! Methods for modifying the graph structure: adding and removing nodes and
//! assigning execution targets. Every method keeps the producer and consumer
//! maps in sync with the stored nodes.

use crate::proto::NodeProto;

use super::context::GraphContext;
use super::maps::{node_reads, OpEntry};

impl GraphContext {
    // ========================================================================
    // Node mutation
    // ========================================================================

    /// Insert a new node at the end of the node order
    ///
    /// Updates all relevant maps.
    pub fn insert_node(&mut self, node: NodeProto) {
        let index = self.optimizer_map.len();
        self.insert_entry_at(index, OpEntry::new(node));
    }

    /// Insert an entry at a position in the node order
    ///
    /// `index` is clamped to the current node count.
    pub fn insert_entry_at(&mut self, index: usize, entry: OpEntry) {
        let name = entry.node.name.clone();

        // Update producer_map for outputs
        for output in &entry.node.output {
            if !output.is_empty() {
                self.producer_map.insert(output.clone(), name.clone());
            }
        }

        // Update consumer_map for inputs, subgraph reads included
        for input in node_reads(&entry.node) {
            self.consumer_map.entry(input).or_default().push(name.clone());
        }

        let index = index.min(self.optimizer_map.len());
        self.optimizer_map.shift_insert(index, name, entry);
    }

    /// Remove a node from the graph, preserving the order of the rest
    ///
    /// Consumers of the removed node's outputs are left untouched; callers
    /// are responsible for not leaving them dangling.
    pub fn remove_node(&mut self, name: &str) -> Option<NodeProto> {
        let entry = self.optimizer_map.shift_remove(name)?;
        let node = entry.node;

        // Remove from producer_map
        for output in &node.output {
            if self.producer_map.get(output).map(|p| p == name) == Some(true) {
                self.producer_map.remove(output);
            }
        }

        // Remove from consumer_map
        for input in node_reads(&node) {
            if let Some(consumers) = self.consumer_map.get_mut(&input) {
                consumers.retain(|n| n != name);
                if consumers.is_empty() {
                    self.consumer_map.remove(&input);
                }
            }
        }

        Some(node)
    }

    /// Position of a node in the stored order
    pub fn node_index(&self, name: &str) -> Option<usize> {
        self.optimizer_map.get_index_of(name)
    }

    /// Assign a node to an execution target
    pub fn set_execution_target(&mut self, name: &str, target: &str) -> bool {
        match self.optimizer_map.get_mut(name) {
            Some(entry) => {
                entry.execution_target = target.to_string();
                true
            }
            None => false,
        }
    }

    /// Generate a node name not yet used in this graph: `<base>_<n>`
    pub fn generate_node_name(&self, base: &str) -> String {
        (0..)
            .map(|i| format!("{}_{}", base, i))
            .find(|name| !self.has_node(name))
            .unwrap_or_else(|| base.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::extensions::make_node;
    use crate::proto::GraphProto;

    fn make_test_graph() -> GraphProto {
        GraphProto {
            node: vec![
                make_node("Sqrt", &["X"], &["s"], "sqrt_0"),
                make_node("Relu", &["s"], &["Y"], "relu_0"),
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_insert_node() {
        let graph = make_test_graph();
        let mut ctx = GraphContext::new(&graph);

        let new_node = make_node("Sigmoid", &["Y"], &["Z"], "sigmoid_0");
        ctx.insert_node(new_node);

        assert!(ctx.has_node("sigmoid_0"));
        assert_eq!(ctx.node_index("sigmoid_0"), Some(2));
        assert_eq!(ctx.get_producer_name("Z"), Some(&"sigmoid_0".to_string()));
        assert!(ctx
            .get_consumer_names("Y")
            .unwrap()
            .contains(&"sigmoid_0".to_string()));
    }

    #[test]
    fn test_insert_entry_at_position() {
        let mut ctx = GraphContext::new(&make_test_graph());

        let entry = OpEntry::with_target(make_node("Abs", &["X"], &["a"], "abs_0"), "CPU");
        ctx.insert_entry_at(1, entry);

        let names: Vec<_> = ctx.node_names().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["sqrt_0", "abs_0", "relu_0"]);
        assert_eq!(ctx.execution_target("abs_0"), Some("CPU"));
    }

    #[test]
    fn test_remove_node_preserves_order() {
        let graph = GraphProto {
            node: vec![
                make_node("Abs", &["X"], &["a"], "n0"),
                make_node("Abs", &["a"], &["b"], "n1"),
                make_node("Abs", &["b"], &["c"], "n2"),
            ],
            ..Default::default()
        };
        let mut ctx = GraphContext::new(&graph);

        let removed = ctx.remove_node("n0").unwrap();
        assert_eq!(removed.op_type, "Abs");
        assert!(ctx.get_producer_name("a").is_none());
        assert!(ctx.get_consumer_names("X").is_none());

        let names: Vec<_> = ctx.node_names().map(|s| s.as_str()).collect();
        assert_eq!(names, vec!["n1", "n2"]);
    }

    #[test]
    fn test_set_execution_target() {
        let mut ctx = GraphContext::new(&make_test_graph());

        assert!(ctx.set_execution_target("relu_0", "CUDA"));
        assert_eq!(ctx.execution_target("relu_0"), Some("CUDA"));
        assert!(!ctx.set_execution_target("missing", "CUDA"));
    }

    #[test]
    fn test_generate_node_name() {
        let mut ctx = GraphContext::new(&make_test_graph());

        assert_eq!(ctx.generate_node_name("LayerNormalization"), "LayerNormalization_0");
        ctx.insert_node(make_node("Abs", &[], &[], "LayerNormalization_0"));
        assert_eq!(ctx.generate_node_name("LayerNormalization"), "LayerNormalization_1");
    }

    #[test]
    fn test_subgraph_reads_follow_insert_and_remove() {
        let mut ctx = GraphContext::new(&make_test_graph());
        let branch = GraphProto {
            node: vec![make_node("Identity", &["s"], &["o"], "id")],
            ..Default::default()
        };
        let mut if_node = make_node("If", &["cond"], &["out"], "if_0");
        if_node
            .attribute
            .push(crate::proto::AttributeProto::new_graph("then_branch", branch));

        ctx.insert_node(if_node);
        assert_eq!(ctx.output_edge_count(ctx.get_node("sqrt_0").unwrap()), 2);

        ctx.remove_node("if_0");
        assert_eq!(
            ctx.get_consumer_names("s"),
            Some(&["relu_0".to_string()][..])
        );
    }
}
