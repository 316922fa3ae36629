//! LayerNorm subgraph matcher
//!
//! Recognizes the decomposed form of layer normalization:
//!
//! ```text
//!   X -> ReduceMean -> Sub -> Pow -> ReduceMean -> Add(eps) -> Sqrt --+
//!   |       (anchor)    |                                            |
//!   +-------------------+---------------------------------> Div <----+
//!                                                            |
//!                                  Y <- Add(bias) <- Mul(scale)
//! ```
//!
//! The subtract feeding `Pow` and the one feeding `Div` may be the same node
//! or two identical nodes (the duplicated-subtract variant).
//!
//! Matching starts at a candidate `ReduceMean`, resolves the subtract branch
//! that leads to `Div`, then follows [`TRANSITIONS`]. Every visited node is
//! checked against the [`FusionPolicy`], the anchor's execution target and
//! the fan-out rule of its [`Stage`]. The first violated check ends the
//! attempt with a [`MatchMiss`]; the graph is never touched.

use std::fmt;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::trace;

use crate::error::{OnnxResult, TransformError};
use crate::graph::GraphContext;
use crate::proto::NodeProto;
use crate::tensor::{i32_to_dtype, type_string};

use super::policy::FusionPolicy;

/// Epsilon used when the epsilon `Add` has no constant operand
pub const DEFAULT_EPSILON: f32 = 1e-5;

/// Normalization axis used when the anchor carries no `axes`
pub const DEFAULT_AXIS: i64 = -1;

// ============================================================================
// Stages and transitions
// ============================================================================

/// Role a node plays in the pattern
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// The anchor: mean over the normalized axes
    Mean,
    /// Primary subtract consuming the anchor
    Sub,
    /// Second subtract consuming the anchor
    SubDup,
    /// Divides the centered input by the standard deviation
    Div,
    /// Standard deviation from the shifted variance
    Sqrt,
    /// Adds epsilon to the variance
    EpsilonAdd,
    /// Mean of the squared deviations
    VarianceMean,
    /// Squares the centered input
    Pow,
    /// Subtract feeding `Pow`
    CenteringSub,
    /// Multiplies by the scale
    Mul,
    /// Adds the bias; its outputs become the fused node's outputs
    BiasAdd,
}

impl Stage {
    /// Every stage, in pattern order from the anchor to the final `Add`
    pub const ALL: [Stage; 11] = [
        Stage::Mean,
        Stage::Sub,
        Stage::SubDup,
        Stage::Div,
        Stage::Sqrt,
        Stage::EpsilonAdd,
        Stage::VarianceMean,
        Stage::Pow,
        Stage::CenteringSub,
        Stage::Mul,
        Stage::BiasAdd,
    ];

    /// Operator a node must be to fill this stage
    pub const fn op_type(self) -> &'static str {
        match self {
            Stage::Mean | Stage::VarianceMean => "ReduceMean",
            Stage::Sub | Stage::SubDup | Stage::CenteringSub => "Sub",
            Stage::Div => "Div",
            Stage::Sqrt => "Sqrt",
            Stage::EpsilonAdd | Stage::BiasAdd => "Add",
            Stage::Pow => "Pow",
            Stage::Mul => "Mul",
        }
    }

    /// Consumer edges a node may have to fill this stage
    pub const fn fan_out(self) -> FanOut {
        match self {
            Stage::Mean => FanOut::OneOrTwo,
            Stage::Sub | Stage::CenteringSub | Stage::Mul | Stage::BiasAdd => FanOut::Any,
            Stage::SubDup
            | Stage::Div
            | Stage::Sqrt
            | Stage::EpsilonAdd
            | Stage::VarianceMean
            | Stage::Pow => FanOut::Exactly(1),
        }
    }
}

/// Fan-out rule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanOut {
    /// One or two consumer edges (shared or duplicated subtract)
    OneOrTwo,
    /// This many consumer edges
    Exactly(usize),
    /// No limit; containment is checked once the region is known
    Any,
}

impl FanOut {
    /// Whether `edges` consumer edges satisfy the rule
    pub fn admits(self, edges: usize) -> bool {
        match self {
            FanOut::OneOrTwo => (1..=2).contains(&edges),
            FanOut::Exactly(n) => edges == n,
            FanOut::Any => true,
        }
    }
}

/// Direction of a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Producers of the node's inputs, in input order
    Producer,
    /// Consumers of the node's outputs, in edge order
    Consumer,
}

/// How the next node is picked among the neighbors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    /// The first neighbor, whatever its operator
    First,
    /// The first neighbor whose operator is the target stage's
    FirstOfType,
}

/// One step of the walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    /// Bound stage the step starts from
    pub from: Stage,
    /// Stage filled (or re-checked) by the step
    pub to: Stage,
    /// Neighbors examined
    pub edge: Edge,
    /// Neighbor selection
    pub pick: Pick,
}

const fn step(from: Stage, to: Stage, edge: Edge, pick: Pick) -> Transition {
    Transition {
        from,
        to,
        edge,
        pick,
    }
}

/// Walk performed once the `Div` stage is bound
///
/// A transition into an already bound stage is an identity check: the selected
/// node must be the one bound there.
pub const TRANSITIONS: [Transition; 8] = [
    step(Stage::Div, Stage::Sqrt, Edge::Producer, Pick::FirstOfType),
    step(Stage::Sqrt, Stage::EpsilonAdd, Edge::Producer, Pick::First),
    step(Stage::EpsilonAdd, Stage::VarianceMean, Edge::Producer, Pick::FirstOfType),
    step(Stage::VarianceMean, Stage::Pow, Edge::Producer, Pick::First),
    step(Stage::Pow, Stage::CenteringSub, Edge::Producer, Pick::FirstOfType),
    step(Stage::CenteringSub, Stage::Mean, Edge::Producer, Pick::FirstOfType),
    step(Stage::Div, Stage::Mul, Edge::Consumer, Pick::First),
    step(Stage::Mul, Stage::BiasAdd, Edge::Consumer, Pick::First),
];

// ============================================================================
// Outcomes
// ============================================================================

/// Why a node failed its stage
#[derive(Debug, Clone, PartialEq)]
pub enum MissReason {
    /// Operator differs from the stage's
    OpType {
        /// Operator of the examined node
        found: String,
    },
    /// Node is outside the ONNX domain
    Domain {
        /// Domain of the examined node
        found: String,
    },
    /// Resolved since-version is not accepted
    Version {
        /// Resolved since-version; `None` when unresolvable
        since: Option<i64>,
    },
    /// Execution target differs from the anchor's, or the anchor's is not
    /// compatible
    Target {
        /// Target of the examined node
        found: String,
    },
    /// Consumer edge count outside the stage's [`FanOut`]
    FanOut {
        /// Consumer edges of the examined node
        edges: usize,
    },
    /// The anchor feeds something other than `Sub`
    ForeignConsumer {
        /// Operator of the offending consumer
        op_type: String,
    },
    /// An input has an element type outside the accepted set
    ElemType {
        /// Offending input
        tensor: String,
        /// Its element type, if known
        elem_type: Option<i32>,
    },
    /// No neighbor of the expected operator in the searched direction
    NoNeighbor {
        /// Operator looked for
        expected: &'static str,
    },
    /// The centering subtract does not read the anchor
    NotAnchor {
        /// Node found in the anchor's place
        found: Option<String>,
    },
    /// `Mul` has no constant or graph-input operand
    NoScale,
    /// Final `Add` has no constant or graph-input operand
    NoBias,
    /// Epsilon operand is constant but its value cannot be read
    Epsilon {
        /// The epsilon operand
        tensor: String,
    },
    /// An interior tensor is read outside the matched region
    Escapes {
        /// The escaping tensor
        tensor: String,
    },
}

impl fmt::Display for MissReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissReason::OpType { found } => write!(f, "unexpected op type {}", found),
            MissReason::Domain { found } => write!(f, "unexpected domain '{}'", found),
            MissReason::Version { since: Some(v) } => write!(f, "unsupported since-version {}", v),
            MissReason::Version { since: None } => write!(f, "unresolved schema version"),
            MissReason::Target { found } => write!(f, "execution target '{}' differs", found),
            MissReason::FanOut { edges } => write!(f, "{} consumer edges", edges),
            MissReason::ForeignConsumer { op_type } => write!(f, "anchor feeds {}", op_type),
            MissReason::ElemType { tensor, elem_type } => {
                match elem_type.and_then(i32_to_dtype) {
                    Some(dtype) => write!(f, "tensor '{}' is {}", tensor, type_string(dtype)),
                    None => write!(f, "tensor '{}' has unknown element type", tensor),
                }
            }
            MissReason::NoNeighbor { expected } => write!(f, "no {} neighbor", expected),
            MissReason::NotAnchor { found } => write!(f, "mean is {:?}, not the anchor", found),
            MissReason::NoScale => write!(f, "no constant scale operand"),
            MissReason::NoBias => write!(f, "no constant bias operand"),
            MissReason::Epsilon { tensor } => write!(f, "epsilon '{}' is not readable", tensor),
            MissReason::Escapes { tensor } => write!(f, "tensor '{}' escapes the region", tensor),
        }
    }
}

/// First violated constraint of a match attempt
#[derive(Debug, Clone, PartialEq)]
pub struct MatchMiss {
    /// Stage being filled
    pub stage: Stage,
    /// Node that was examined (or searched from)
    pub node: String,
    /// Violated constraint
    pub reason: MissReason,
}

/// Which operand list the bias is read from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BiasSource {
    /// Last constant or graph-input operand of the final `Add`
    #[default]
    AddOperands,
    /// Qualifying index found on the final `Add`, operand read from `Mul`
    ///
    /// Reproduces the operand choice of older onnxruntime releases.
    MultiplyOperands,
}

/// A complete LayerNorm match
#[derive(Debug, Clone, PartialEq)]
pub struct LayerNormMatch {
    /// Nodes to remove, anchor first and final `Add` last, no duplicates
    pub nodes: Vec<String>,
    /// Input normalized by the fused node
    pub input: String,
    /// Scale operand of the `Mul`
    pub scale: String,
    /// Bias operand, picked per [`BiasSource`]
    pub bias: String,
    /// Value added to the variance
    pub epsilon: f32,
    /// Last entry of the anchor's `axes`, or [`DEFAULT_AXIS`]
    pub axis: i64,
    /// Execution target shared by every matched node
    pub target: String,
    bindings: FxHashMap<Stage, String>,
}

impl LayerNormMatch {
    /// Node bound to `stage`, if that stage was visited
    pub fn node(&self, stage: Stage) -> Option<&str> {
        self.bindings.get(&stage).map(String::as_str)
    }
}

/// Result of one match attempt
#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Every stage bound and every check passed
    Matched(LayerNormMatch),
    /// The first violated constraint
    Missed(MatchMiss),
}

impl MatchOutcome {
    /// The match, discarding a miss
    pub fn matched(self) -> Option<LayerNormMatch> {
        match self {
            MatchOutcome::Matched(m) => Some(m),
            MatchOutcome::Missed(_) => None,
        }
    }

    /// The miss, if the attempt failed
    pub fn miss(&self) -> Option<&MatchMiss> {
        match self {
            MatchOutcome::Matched(_) => None,
            MatchOutcome::Missed(miss) => Some(miss),
        }
    }
}

/// Why an attempt stopped early
enum Abort {
    Miss(MatchMiss),
    Fatal(TransformError),
}

impl From<TransformError> for Abort {
    fn from(err: TransformError) -> Self {
        Abort::Fatal(err)
    }
}

fn miss<T>(stage: Stage, node: &str, reason: MissReason) -> Result<T, Abort> {
    Err(Abort::Miss(MatchMiss {
        stage,
        node: node.to_string(),
        reason,
    }))
}

// ============================================================================
// Match state
// ============================================================================

/// Bindings of one attempt, dropped on a miss
struct MatchState<'a> {
    target: &'a str,
    bound: FxHashMap<Stage, &'a NodeProto>,
    removal: SmallVec<[&'a NodeProto; 12]>,
}

impl<'a> MatchState<'a> {
    fn new(target: &'a str) -> Self {
        Self {
            target,
            bound: FxHashMap::default(),
            removal: SmallVec::new(),
        }
    }

    fn bind(&mut self, stage: Stage, node: &'a NodeProto) {
        trace!(stage = ?stage, node = %node.name, "stage bound");
        self.bound.insert(stage, node);
        if !self.removal.iter().any(|n| n.name == node.name) {
            self.removal.push(node);
        }
    }

    fn get(&self, stage: Stage) -> Result<&'a NodeProto, Abort> {
        self.bound.get(&stage).copied().ok_or_else(|| {
            Abort::Fatal(TransformError::Internal(format!(
                "stage {:?} read before it was bound",
                stage
            )))
        })
    }
}

// ============================================================================
// Matcher
// ============================================================================

/// Matches the decomposed LayerNorm pattern around candidate anchors
pub struct LayerNormMatcher<'a> {
    ctx: &'a GraphContext,
    policy: &'a FusionPolicy,
    compatible_targets: Option<&'a FxHashSet<String>>,
    bias_source: BiasSource,
}

impl<'a> LayerNormMatcher<'a> {
    /// Matcher accepting any execution target
    pub fn new(ctx: &'a GraphContext, policy: &'a FusionPolicy) -> Self {
        Self {
            ctx,
            policy,
            compatible_targets: None,
            bias_source: BiasSource::default(),
        }
    }

    /// Restrict anchors to these targets; an empty set accepts any
    pub fn with_compatible_targets(mut self, targets: &'a FxHashSet<String>) -> Self {
        self.compatible_targets = Some(targets);
        self
    }

    /// Choose where the bias operand is read from
    pub fn with_bias_source(mut self, source: BiasSource) -> Self {
        self.bias_source = source;
        self
    }

    /// Try to match the pattern anchored at node `anchor`
    ///
    /// Misses are returned as [`MatchOutcome::Missed`]. Errors are reserved
    /// for inconsistent graph bookkeeping, such as a missing anchor or a map
    /// naming a node that does not exist.
    pub fn try_match(&self, anchor: &str) -> OnnxResult<MatchOutcome> {
        match self.walk(anchor) {
            Ok(m) => Ok(MatchOutcome::Matched(m)),
            Err(Abort::Miss(miss)) => {
                trace!(
                    anchor,
                    stage = ?miss.stage,
                    node = %miss.node,
                    reason = %miss.reason,
                    "pattern miss"
                );
                Ok(MatchOutcome::Missed(miss))
            }
            Err(Abort::Fatal(err)) => Err(err),
        }
    }

    fn walk(&self, anchor_name: &str) -> Result<LayerNormMatch, Abort> {
        let anchor = self.ctx.get_node(anchor_name).ok_or_else(|| {
            TransformError::Internal(format!("anchor '{}' not in graph", anchor_name))
        })?;
        let target = self.ctx.execution_target(anchor_name).unwrap_or_default();

        let mut state = MatchState::new(target);
        self.check(Stage::Mean, anchor, &state)?;
        state.bind(Stage::Mean, anchor);

        let div = self.resolve_divide(anchor, &mut state)?;
        self.check(Stage::Div, div, &state)?;
        state.bind(Stage::Div, div);

        for transition in &TRANSITIONS {
            self.follow(transition, &mut state)?;
        }

        let (scale, bias) = self.boundary_tensors(&state)?;
        self.check_containment(&state)?;

        let epsilon = self.epsilon(state.get(Stage::EpsilonAdd)?)?;
        let axis = anchor
            .get_attribute_ints("axes")
            .and_then(|axes| axes.last().copied())
            .unwrap_or(DEFAULT_AXIS);
        let input = anchor
            .input
            .first()
            .cloned()
            .ok_or_else(|| TransformError::Internal(format!("anchor '{}' has no input", anchor.name)))?;

        Ok(LayerNormMatch {
            nodes: state.removal.iter().map(|n| n.name.clone()).collect(),
            input,
            scale,
            bias,
            epsilon,
            axis,
            target: target.to_string(),
            bindings: state
                .bound
                .iter()
                .map(|(stage, node)| (*stage, node.name.clone()))
                .collect(),
        })
    }

    /// Pick the subtract branch that leads to `Div`
    ///
    /// The primary subtract is tried first; the duplicate only when the
    /// primary has no `Div` consumer.
    fn resolve_divide(
        &self,
        anchor: &'a NodeProto,
        state: &mut MatchState<'a>,
    ) -> Result<&'a NodeProto, Abort> {
        let mut subs: SmallVec<[&'a NodeProto; 2]> = SmallVec::new();
        for child in self.ctx.successor_edges(anchor)? {
            if child.op_type != Stage::Sub.op_type() {
                return miss(
                    Stage::Sub,
                    &child.name,
                    MissReason::ForeignConsumer {
                        op_type: child.op_type.clone(),
                    },
                );
            }
            subs.push(child);
        }

        // Primary on top
        let mut branches: SmallVec<[(Stage, &'a NodeProto); 2]> = subs
            .iter()
            .enumerate()
            .rev()
            .map(|(i, sub)| (if i == 0 { Stage::Sub } else { Stage::SubDup }, *sub))
            .collect();

        let mut last = anchor;
        while let Some((stage, sub)) = branches.pop() {
            self.check(stage, sub, state)?;
            state.bind(stage, sub);
            if let Some(div) = self.neighbor(sub, Edge::Consumer, Pick::FirstOfType, "Div")? {
                return Ok(div);
            }
            trace!(stage = ?stage, node = %sub.name, "no Div below subtract");
            last = sub;
        }

        miss(Stage::Div, &last.name, MissReason::NoNeighbor { expected: "Div" })
    }

    fn follow(&self, transition: &Transition, state: &mut MatchState<'a>) -> Result<(), Abort> {
        let from = state.get(transition.from)?;
        let expected = transition.to.op_type();
        let found = self.neighbor(from, transition.edge, transition.pick, expected)?;

        if let Some(bound) = state.bound.get(&transition.to) {
            if found.map(|n| n.name.as_str()) != Some(bound.name.as_str()) {
                return miss(
                    transition.to,
                    &from.name,
                    MissReason::NotAnchor {
                        found: found.map(|n| n.name.clone()),
                    },
                );
            }
            return Ok(());
        }

        let Some(node) = found else {
            return miss(transition.to, &from.name, MissReason::NoNeighbor { expected });
        };
        self.check(transition.to, node, state)?;
        state.bind(transition.to, node);
        Ok(())
    }

    fn neighbor(
        &self,
        node: &'a NodeProto,
        edge: Edge,
        pick: Pick,
        op_type: &str,
    ) -> OnnxResult<Option<&'a NodeProto>> {
        let neighbors = match edge {
            Edge::Producer => self.ctx.predecessor_edges(node)?,
            Edge::Consumer => self.ctx.successor_edges(node)?,
        };
        Ok(match pick {
            Pick::First => neighbors.into_iter().next(),
            Pick::FirstOfType => neighbors.into_iter().find(|n| n.op_type == op_type),
        })
    }

    /// Per-node eligibility for `stage`
    fn check(&self, stage: Stage, node: &NodeProto, state: &MatchState<'a>) -> Result<(), Abort> {
        if node.op_type != stage.op_type() {
            return miss(
                stage,
                &node.name,
                MissReason::OpType {
                    found: node.op_type.clone(),
                },
            );
        }
        if !node.is_onnx_domain() {
            return miss(
                stage,
                &node.name,
                MissReason::Domain {
                    found: node.domain.clone(),
                },
            );
        }

        let since = self.ctx.since_version(node);
        if !self.policy.supports_version(&node.op_type, since) {
            return miss(stage, &node.name, MissReason::Version { since });
        }

        let target = self.ctx.execution_target(&node.name).unwrap_or_default();
        let target_ok = match stage {
            Stage::Mean => self.is_compatible_target(target),
            _ => target == state.target,
        };
        if !target_ok {
            return miss(
                stage,
                &node.name,
                MissReason::Target {
                    found: target.to_string(),
                },
            );
        }

        let edges = self.ctx.output_edge_count(node);
        if !stage.fan_out().admits(edges) {
            return miss(stage, &node.name, MissReason::FanOut { edges });
        }

        for input in node.input.iter().filter(|i| !i.is_empty()) {
            let elem_type = self.ctx.get_tensor_elem_type(input);
            if !self.policy.supports_elem_type(elem_type) {
                return miss(
                    stage,
                    &node.name,
                    MissReason::ElemType {
                        tensor: input.clone(),
                        elem_type,
                    },
                );
            }
        }

        Ok(())
    }

    fn is_compatible_target(&self, target: &str) -> bool {
        match self.compatible_targets {
            Some(targets) if !targets.is_empty() => targets.contains(target),
            _ => true,
        }
    }

    fn is_boundary(&self, tensor: &str) -> bool {
        !tensor.is_empty() && (self.ctx.is_constant(tensor) || self.ctx.is_graph_input(tensor))
    }

    /// Scale and bias operands
    fn boundary_tensors(&self, state: &MatchState<'a>) -> Result<(String, String), Abort> {
        let mul = state.get(Stage::Mul)?;
        let add = state.get(Stage::BiasAdd)?;

        let Some(scale) = mul.input.iter().rev().find(|t| self.is_boundary(t)) else {
            return miss(Stage::Mul, &mul.name, MissReason::NoScale);
        };

        let bias = match self.bias_source {
            BiasSource::AddOperands => add.input.iter().rev().find(|t| self.is_boundary(t)),
            BiasSource::MultiplyOperands => add
                .input
                .iter()
                .enumerate()
                .rev()
                .find(|(_, t)| self.is_boundary(t))
                .and_then(|(i, _)| mul.input.get(i)),
        };
        let Some(bias) = bias else {
            return miss(Stage::BiasAdd, &add.name, MissReason::NoBias);
        };

        Ok((scale.clone(), bias.clone()))
    }

    /// Interior outputs must stay inside the region
    fn check_containment(&self, state: &MatchState<'a>) -> Result<(), Abort> {
        let region: FxHashSet<&str> = state.removal.iter().map(|n| n.name.as_str()).collect();
        let interior = &state.removal[..state.removal.len().saturating_sub(1)];

        for node in interior {
            // A shared subtract is bound twice; report its first stage
            let stage = Stage::ALL
                .into_iter()
                .find(|s| state.bound.get(s).is_some_and(|n| n.name == node.name))
                .unwrap_or(Stage::Mean);

            for output in node.output.iter().filter(|o| !o.is_empty()) {
                let leaked = self.ctx.is_graph_output(output)
                    || self
                        .ctx
                        .get_consumer_names(output)
                        .is_some_and(|names| names.iter().any(|c| !region.contains(c.as_str())));
                if leaked {
                    return miss(
                        stage,
                        &node.name,
                        MissReason::Escapes {
                            tensor: output.clone(),
                        },
                    );
                }
            }
        }

        Ok(())
    }

    /// First constant operand of the epsilon `Add`
    ///
    /// Falls back to [`DEFAULT_EPSILON`] only when no operand is constant.
    fn epsilon(&self, add: &NodeProto) -> Result<f32, Abort> {
        let Some(operand) = add.input.iter().find(|i| self.ctx.is_constant(i)) else {
            return Ok(DEFAULT_EPSILON);
        };
        match self.ctx.get_constant_tensor(operand).and_then(|t| t.first_float()) {
            Some(value) => Ok(value),
            None => miss(
                Stage::EpsilonAdd,
                &add.name,
                MissReason::Epsilon {
                    tensor: operand.clone(),
                },
            ),
        }
    }
}
