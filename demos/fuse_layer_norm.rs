//! Fuse decomposed LayerNorm subgraphs in an ONNX model file
//!
//! Usage: cargo run --example fuse_layer_norm -- <input.onnx> [output.onnx]

use std::env;
use std::path::Path;
use std::time::Instant;

use lnfuse::io::{load_model, optimize_model, save_model};
use lnfuse::transformers::OptimizationPipeline;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <input.onnx> [output.onnx]", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);
    println!("LayerNorm fusion: {}", path.display());
    println!("{}", "=".repeat(60));

    let model = load_model(path)?;
    let pipeline = OptimizationPipeline::default();

    let start = Instant::now();
    let (optimized, stats) = optimize_model(&model, &pipeline)?;
    let elapsed = start.elapsed();

    println!("\n## Fusion Results");
    println!("  Transforms applied: {}", stats.transform.transforms_applied);
    println!("  Nodes eliminated: {}", stats.transform.nodes_eliminated);
    println!("  Time: {:?}", elapsed);

    println!("\n## Summary");
    println!("  Original: {} nodes", stats.original_nodes);
    println!("  After fusion: {} nodes", stats.optimized_nodes);
    println!("  Reduction: {:.1}%", stats.node_reduction_percent());

    for (i, name) in stats.transform.transformed_nodes.iter().take(5).enumerate() {
        println!("  {}: {}", i + 1, name);
    }

    if let Some(output) = args.get(2) {
        save_model(&optimized, output)?;
        println!("\nSaved to {}", output);
    }

    Ok(())
}
