//! Whole-graph compilation: optimize, extract tasks, dispatch, merge, lower.

use tessel_ir::graph::{DEFAULT_BLOCK_SIZE, launch_worker};
use tessel_ir::{FlowGraph, IRModule, Task, Worker};
use tessel_opt::{PassContext, lower, optimize};

use crate::error::ImplementError;
use crate::registry::ImplementerRegistry;

/// Options for [`compile_graph`].
#[derive(Clone, Copy, Debug)]
pub struct CompileOptions {
    /// Threads per block for grid tasks.
    pub block_size: u32,
    /// Run the module lowering pipeline on the merged module.
    pub lower: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            block_size: DEFAULT_BLOCK_SIZE,
            lower: true,
        }
    }
}

/// Result of compiling one graph.
#[derive(Debug)]
pub struct Compiled {
    /// The graph after the graph pass pipeline.
    pub graph: FlowGraph,
    /// Names of the dispatched tasks, in merge order.
    pub tasks: Vec<String>,
    pub module: IRModule,
}

/// Tasks of `graph` in topological order, with grid launches resized to
/// `block_size`.
pub fn extract_tasks(graph: &FlowGraph, block_size: u32) -> Vec<Task> {
    graph
        .tasks()
        .map(|task| {
            let mut task = task.clone();
            if let (Worker::Grid { .. }, Some(numel)) = (task.worker, task.computation.numel()) {
                task.worker = launch_worker(numel, block_size);
            }
            task
        })
        .collect()
}

/// Compiles `graph` into one module. Any failure aborts the whole graph.
pub fn compile_graph(
    graph: FlowGraph,
    registry: &ImplementerRegistry,
    ctx: &mut PassContext,
    options: &CompileOptions,
) -> Result<Compiled, ImplementError> {
    let graph = optimize(graph, ctx)?;
    let tasks = extract_tasks(&graph, options.block_size);
    log::info!("compiling {} tasks", tasks.len());

    let mut module = IRModule::new();
    for task in &tasks {
        module.merge(registry.dispatch(task)?)?;
    }
    if options.lower {
        module = lower(module)?;
    }
    Ok(Compiled {
        graph,
        tasks: tasks.into_iter().map(|t| t.name).collect(),
        module,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_ir::{DataType, dump_module, ops};

    fn mlp() -> FlowGraph {
        let mut g = FlowGraph::new();
        let x = ops::input(&mut g, "x", DataType::Float32, &[4, 8]);
        let w = ops::input(&mut g, "w", DataType::Float32, &[8, 16]);
        let b = ops::input(&mut g, "b", DataType::Float32, &[16]);
        let y = ops::matmul(&mut g, x, w).unwrap();
        let y = ops::add(&mut g, y, b).unwrap();
        let y = ops::relu(&mut g, y).unwrap();
        g.mark_output(y);
        g
    }

    #[test]
    fn fused_graph_compiles_to_one_kernel() {
        let reg = ImplementerRegistry::with_builtins();
        let out = compile_graph(mlp(), &reg, &mut PassContext::new(), &CompileOptions::default()).unwrap();
        assert_eq!(out.tasks, ["fused_matmul_add_relu_t5"]);
        assert_eq!(out.module.names(), ["fused_matmul_add_relu_t5", "fused_matmul_add_relu_t5_packed"]);
    }

    #[test]
    fn block_size_resizes_grid() {
        let reg = ImplementerRegistry::with_builtins();
        let options = CompileOptions {
            block_size: 32,
            lower: false,
        };
        let out = compile_graph(mlp(), &reg, &mut PassContext::new(), &options).unwrap();
        let f = out.module.get("fused_matmul_add_relu_t5").unwrap();
        assert_eq!(f.attrs.worker, Worker::grid(2, 32));
        assert_eq!(out.module.len(), 1);
    }

    #[test]
    fn compilation_is_deterministic() {
        let reg = ImplementerRegistry::with_builtins();
        let opts = CompileOptions::default();
        let a = compile_graph(mlp(), &reg, &mut PassContext::new(), &opts).unwrap();
        let b = compile_graph(mlp(), &reg, &mut PassContext::new(), &opts).unwrap();
        assert_eq!(dump_module(&a.module), dump_module(&b.module));
    }

    #[test]
    fn missing_implementer_aborts_the_graph() {
        let reg = ImplementerRegistry::new();
        let err = compile_graph(mlp(), &reg, &mut PassContext::new(), &CompileOptions::default()).unwrap_err();
        assert!(matches!(err, ImplementError::NoImplementerFound { .. }));
    }
}
