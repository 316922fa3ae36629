//! Benchmark for LayerNorm matching and fusion
//!
//! Run with: cargo bench

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

use lnfuse::graph::GraphContext;
use lnfuse::pattern::{LayerNormMatcher, POLICY};
use lnfuse::proto::extensions::{make_node, make_scalar_f32, make_tensor_value_info};
use lnfuse::proto::{AttributeProto, GraphProto, TensorProto};
use lnfuse::transformers::{FuseLayerNorm, OnnxTransformer};

const FLOAT: i32 = 1;
const HIDDEN: i64 = 768;

/// `layers` decomposed LayerNorms chained through a Relu each
fn chained_layer_norms(layers: usize) -> GraphProto {
    let mut graph = GraphProto {
        name: "bench".to_string(),
        input: vec![make_tensor_value_info("x_0", FLOAT, &[1, 128, HIDDEN])],
        ..Default::default()
    };

    for i in 0..layers {
        let t = |stem: &str| format!("l{}_{}", i, stem);
        let x = format!("x_{}", i);
        let [mean, centered, two, sq, var, eps, var_eps, std, norm, gamma, scaled, beta, ln] = [
            "mean", "centered", "two", "sq", "var", "eps", "var_eps", "std", "norm", "gamma",
            "scaled", "beta", "ln",
        ]
        .map(t);
        let next = format!("x_{}", i + 1);

        let mut nodes = vec![
            make_node("ReduceMean", &[&x], &[&mean], &t("rm_mean")),
            make_node("Sub", &[&x, &mean], &[&centered], &t("sub")),
            make_node("Pow", &[&centered, &two], &[&sq], &t("pow")),
            make_node("ReduceMean", &[&sq], &[&var], &t("rm_var")),
            make_node("Add", &[&var, &eps], &[&var_eps], &t("add_eps")),
            make_node("Sqrt", &[&var_eps], &[&std], &t("sqrt")),
            make_node("Div", &[&centered, &std], &[&norm], &t("div")),
            make_node("Mul", &[&norm, &gamma], &[&scaled], &t("mul")),
            make_node("Add", &[&scaled, &beta], &[&ln], &t("add_bias")),
            make_node("Relu", &[&ln], &[&next], &t("relu")),
        ];
        for node in nodes.iter_mut().filter(|n| n.op_type == "ReduceMean") {
            node.attribute.push(AttributeProto::new_ints("axes", vec![-1]));
        }
        graph.node.extend(nodes);

        for (name, fill) in [(gamma, 1.0), (beta, 0.0)] {
            graph.initializer.push(TensorProto {
                name,
                dims: vec![HIDDEN],
                data_type: FLOAT,
                float_data: vec![fill; HIDDEN as usize],
                ..Default::default()
            });
        }
        graph.initializer.push(make_scalar_f32(&eps, 1e-5));
        graph.initializer.push(make_scalar_f32(&two, 2.0));
    }

    graph.output.push(make_tensor_value_info(
        &format!("x_{}", layers),
        FLOAT,
        &[1, 128, HIDDEN],
    ));
    graph
}

fn context(graph: &GraphProto) -> GraphContext {
    let mut ctx = GraphContext::new(graph);
    ctx.set_opset_version("", 17);
    ctx
}

fn match_benchmark(c: &mut Criterion) {
    let ctx = context(&chained_layer_norms(1));
    let matcher = LayerNormMatcher::new(&ctx, &POLICY);

    c.bench_function("layer_norm_match", |b| {
        b.iter(|| matcher.try_match(black_box("l0_rm_mean")))
    });
}

fn fusion_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("layer_norm_fusion");
    let pass = FuseLayerNorm::new();

    for layers in [1usize, 12, 48] {
        let graph = chained_layer_norms(layers);
        group.bench_with_input(BenchmarkId::from_parameter(layers), &graph, |b, graph| {
            b.iter_batched(
                || context(graph),
                |mut ctx| pass.transform(&mut ctx),
                BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, match_benchmark, fusion_benchmark);
criterion_main!(benches);
