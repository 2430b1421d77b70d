use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use miette::{Context, IntoDiagnostic};
use ndarray::{ArrayD, IxDyn};

use tessel_implement::{CompileOptions, ImplementerRegistry, compile_graph};
use tessel_ir::graph::DEFAULT_BLOCK_SIZE;
use tessel_ir::{
    DataType, Expr, FlowGraph, MemoryScope, RegisterScope, Slot, Task, TensorInput, TensorType, Type, Worker,
    compute, dump_graph, dump_module, ops,
};
use tessel_opt::{PassContext, evaluate_graph, lower, optimize};

/// Tessel: tensor program compiler driver
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Built-in program to compile
    #[arg(long, value_enum, default_value_t = Demo::Mlp)]
    demo: Demo,

    /// Output path for the module dump (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write a graph snapshot after every graph pass into this directory
    #[arg(long)]
    save_graphs: Option<PathBuf>,

    /// Print per-pass wall time
    #[arg(long)]
    profile: bool,

    /// Also write the profile report to this file
    #[arg(long, requires = "profile")]
    profile_log: Option<PathBuf>,

    /// Threads per block for grid kernels
    #[arg(long, default_value_t = DEFAULT_BLOCK_SIZE, value_parser = clap::value_parser!(u32).range(1..))]
    block_size: u32,

    /// Skip the module lowering pipeline
    #[arg(long)]
    no_lower: bool,

    /// Dump the optimized graph to stderr
    #[arg(long)]
    emit_graph: bool,

    /// Evaluate the graph before and after optimization and compare
    #[arg(long)]
    check: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Demo {
    /// relu(matmul(x, w) + b)
    Mlp,
    /// relu(conv2d(x, w))
    Conv,
    /// Shared-to-register tile transfer on one warp
    Warp,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let registry = ImplementerRegistry::with_builtins();

    let module = match cli.demo {
        Demo::Warp => {
            // Warp programs are single tasks; there is no graph to optimize.
            let module = registry
                .dispatch(&warp_task())
                .map_err(|e| miette::miette!("{e}"))
                .wrap_err("implementation failed")?;
            if cli.no_lower {
                module
            } else {
                lower(module)
                    .map_err(|e| miette::miette!("{e}"))
                    .wrap_err("lowering failed")?
            }
        }
        Demo::Mlp | Demo::Conv => {
            let graph = if matches!(cli.demo, Demo::Mlp) {
                mlp_graph()
            } else {
                conv_graph()
            }
            .map_err(|e| miette::miette!("{e}"))
            .wrap_err("failed to build the demo graph")?;

            if cli.check {
                check(&graph)?;
            }

            let mut ctx = PassContext::new().verbose(cli.verbose > 0);
            if let Some(dir) = &cli.save_graphs {
                ctx = ctx.save_graphs(dir);
            }
            if cli.profile {
                ctx = ctx.profile(cli.profile_log.clone(), true);
            }
            let options = CompileOptions {
                block_size: cli.block_size,
                lower: !cli.no_lower,
            };
            let compiled = compile_graph(graph, &registry, &mut ctx, &options)
                .map_err(|e| miette::miette!("{e}"))
                .wrap_err("compilation failed")?;

            if cli.emit_graph {
                eprintln!("{}", dump_graph(&compiled.graph));
            }
            log::info!("tasks: {}", compiled.tasks.join(", "));
            compiled.module
        }
    };

    let text = dump_module(&module);
    match &cli.output {
        Some(path) => std::fs::write(path, text)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => print!("{text}"),
    }
    Ok(())
}

fn mlp_graph() -> Result<FlowGraph, tessel_ir::IrError> {
    let mut g = FlowGraph::new();
    let x = ops::input(&mut g, "x", DataType::Float32, &[32, 64]);
    let w = ops::input(&mut g, "w", DataType::Float32, &[64, 128]);
    let b = ops::input(&mut g, "b", DataType::Float32, &[128]);
    let h = ops::matmul(&mut g, x, w)?;
    let h = ops::add(&mut g, h, b)?;
    let y = ops::relu(&mut g, h)?;
    g.mark_output(y);
    Ok(g)
}

fn conv_graph() -> Result<FlowGraph, tessel_ir::IrError> {
    let mut g = FlowGraph::new();
    let x = ops::input(&mut g, "x", DataType::Float32, &[1, 3, 16, 16]);
    let w = ops::input(&mut g, "w", DataType::Float32, &[8, 3, 3, 3]);
    let y = ops::conv2d(&mut g, x, w, [1, 1], [1, 1])?;
    let y = ops::relu(&mut g, y)?;
    g.mark_output(y);
    Ok(g)
}

/// An 8x8 shared tile spread over 32 lanes, two registers per lane.
fn warp_task() -> Task {
    let tile = [8, 8];
    let regs = RegisterScope::cyclic(vec![2, 1], vec![4, 8]);
    let input = TensorInput::new("tile", DataType::Float32, &tile);
    let out = compute("frag", &tile, "i", |ax| input.at(ax.iter().map(Expr::var).collect()));
    let local = regs.local_shape.clone();
    let param_types = vec![
        Type::Tensor(TensorType::new(MemoryScope::Shared, DataType::Float32, &tile)),
        Type::Tensor(TensorType::new(
            MemoryScope::Register(Slot::Known(regs)),
            DataType::Float32,
            &local,
        )),
    ];
    let params = vec![Expr::TensorInput(input), Expr::TensorCompute(Box::new(out.clone()))];
    Task::new("warp_s2r", out, params, param_types, Worker::Warp)
}

/// Runs the graph on synthetic inputs before and after optimization.
fn check(graph: &FlowGraph) -> miette::Result<()> {
    let mut inputs = HashMap::new();
    for &id in graph.inputs() {
        let info = graph.tensor(id).map_err(|e| miette::miette!("{e}"))?;
        let name = match &info.source {
            tessel_ir::graph::TensorSource::Input { name } => name.clone(),
            _ => continue,
        };
        let shape: Vec<usize> = info.shape.iter().map(|&d| d.max(0) as usize).collect();
        let n: usize = shape.iter().product();
        let values = (0..n).map(|v| ((v * 7) % 13) as f64 / 13.0 - 0.5).collect();
        let array = ArrayD::from_shape_vec(IxDyn(&shape), values).into_diagnostic()?;
        inputs.insert(name, array);
    }

    let expected = evaluate_graph(graph, &inputs).map_err(|e| miette::miette!("{e}"))?;
    let optimized = optimize(graph.clone(), &mut PassContext::new()).map_err(|e| miette::miette!("{e}"))?;
    let actual = evaluate_graph(&optimized, &inputs).map_err(|e| miette::miette!("{e}"))?;

    let max_diff = expected
        .iter()
        .zip(&actual)
        .flat_map(|(e, a)| e.iter().zip(a.iter()).map(|(x, y)| (x - y).abs()))
        .fold(0.0_f64, f64::max);
    if max_diff > 1e-6 {
        return Err(miette::miette!(
            "optimized graph diverges from the original (max abs diff {max_diff})"
        ));
    }
    eprintln!("check: optimized graph matches ({} outputs)", expected.len());
    Ok(())
}
