//! Builders for decomposed LayerNorm test graphs

use crate::graph::GraphContext;
use crate::proto::extensions::{make_node, make_scalar_f32, make_tensor_value_info};
use crate::proto::tensor_proto::DataType;
use crate::proto::{AttributeProto, GraphProto, NodeProto, TensorProto, ValueInfoProto};

const FLOAT: i32 = DataType::Float as i32;
const HIDDEN: i64 = 8;

/// One decomposed LayerNorm over `[2, 8]` inputs
///
/// Node and intermediate tensor names are `prefix` + a fixed stem
/// (`rm_mean`, `sub`, `sub_dup`, `pow`, `rm_var`, `add_eps`, `sqrt`, `div`,
/// `mul`, `add_bias`).
#[derive(Debug, Clone)]
pub(crate) struct LayerNormGraph {
    pub prefix: &'static str,
    pub input: &'static str,
    pub output: &'static str,
    /// Feed `Div` from a second subtract instead of sharing one
    pub duplicate_sub: bool,
    pub scale_type: i32,
    /// Declare the scale as a graph input instead of an initializer
    pub scale_is_input: bool,
}

impl Default for LayerNormGraph {
    fn default() -> Self {
        Self {
            prefix: "",
            input: "X",
            output: "Y",
            duplicate_sub: false,
            scale_type: FLOAT,
            scale_is_input: false,
        }
    }
}

impl LayerNormGraph {
    fn name(&self, stem: &str) -> String {
        format!("{}{}", self.prefix, stem)
    }

    pub fn nodes(&self) -> Vec<NodeProto> {
        let [mean, centered, centered_dup, two, sq, var, eps, var_eps, std, norm, gamma, scaled, beta] =
            [
                "mean",
                "centered",
                "centered_dup",
                "two",
                "sq",
                "var",
                "eps",
                "var_eps",
                "std",
                "norm",
                "gamma",
                "scaled",
                "beta",
            ]
            .map(|stem| self.name(stem));
        let x = self.input;
        let div_input = if self.duplicate_sub { &centered_dup } else { &centered };

        let mut nodes = vec![
            make_node("ReduceMean", &[x], &[&mean], &self.name("rm_mean")),
            make_node("Sub", &[x, &mean], &[&centered], &self.name("sub")),
        ];
        if self.duplicate_sub {
            nodes.push(make_node(
                "Sub",
                &[x, &mean],
                &[&centered_dup],
                &self.name("sub_dup"),
            ));
        }
        nodes.extend([
            make_node("Pow", &[&centered, &two], &[&sq], &self.name("pow")),
            make_node("ReduceMean", &[&sq], &[&var], &self.name("rm_var")),
            make_node("Add", &[&var, &eps], &[&var_eps], &self.name("add_eps")),
            make_node("Sqrt", &[&var_eps], &[&std], &self.name("sqrt")),
            make_node("Div", &[div_input, &std], &[&norm], &self.name("div")),
            make_node("Mul", &[&norm, &gamma], &[&scaled], &self.name("mul")),
            make_node("Add", &[&scaled, &beta], &[self.output], &self.name("add_bias")),
        ]);

        for node in nodes.iter_mut().filter(|n| n.op_type == "ReduceMean") {
            node.attribute.push(AttributeProto::new_ints("axes", vec![-1]));
        }
        nodes
    }

    pub fn value_info(&self) -> Vec<ValueInfoProto> {
        let mut wide = vec!["centered", "sq", "norm", "scaled"];
        if self.duplicate_sub {
            wide.push("centered_dup");
        }
        let narrow = ["mean", "var", "var_eps", "std"];

        wide.iter()
            .map(|s| make_tensor_value_info(&self.name(s), FLOAT, &[2, HIDDEN]))
            .chain(
                narrow
                    .iter()
                    .map(|s| make_tensor_value_info(&self.name(s), FLOAT, &[2, 1])),
            )
            .collect()
    }

    pub fn initializers(&self) -> Vec<TensorProto> {
        let mut inits = vec![
            TensorProto {
                name: self.name("beta"),
                dims: vec![HIDDEN],
                data_type: FLOAT,
                float_data: vec![0.0; HIDDEN as usize],
                ..Default::default()
            },
            make_scalar_f32(&self.name("eps"), 1e-6),
            make_scalar_f32(&self.name("two"), 2.0),
        ];
        if !self.scale_is_input {
            inits.push(TensorProto {
                name: self.name("gamma"),
                dims: vec![HIDDEN],
                data_type: self.scale_type,
                float_data: vec![1.0; HIDDEN as usize],
                ..Default::default()
            });
        }
        inits
    }

    pub fn inputs(&self) -> Vec<ValueInfoProto> {
        let mut inputs = vec![make_tensor_value_info(self.input, FLOAT, &[2, HIDDEN])];
        if self.scale_is_input {
            inputs.push(make_tensor_value_info(
                &self.name("gamma"),
                self.scale_type,
                &[HIDDEN],
            ));
        }
        inputs
    }

    /// A graph holding this instance alone
    pub fn build(&self) -> GraphProto {
        GraphProto {
            name: "layer_norm".to_string(),
            node: self.nodes(),
            input: self.inputs(),
            output: vec![make_tensor_value_info(self.output, FLOAT, &[2, HIDDEN])],
            initializer: self.initializers(),
            value_info: self.value_info(),
            ..Default::default()
        }
    }
}

/// A graph holding every instance side by side
pub(crate) fn merged_graph(instances: &[LayerNormGraph]) -> GraphProto {
    let mut graph = GraphProto {
        name: "layer_norms".to_string(),
        ..Default::default()
    };
    for ln in instances {
        graph.node.extend(ln.nodes());
        graph.input.extend(ln.inputs());
        graph
            .output
            .push(make_tensor_value_info(ln.output, FLOAT, &[2, HIDDEN]));
        graph.initializer.extend(ln.initializers());
        graph.value_info.extend(ln.value_info());
    }
    graph
}

/// Context over `graph` importing opset 17
pub(crate) fn layer_norm_context(graph: &GraphProto) -> GraphContext {
    let mut ctx = GraphContext::new(graph);
    ctx.set_opset_version("", 17);
    ctx
}
