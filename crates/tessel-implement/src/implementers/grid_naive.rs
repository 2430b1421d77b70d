use tessel_ir::{
    DataType, Expr, FunctionBuilder, IRModule, Stmt, StmtBuilder, Task, TaskPattern, TensorComputePattern,
    Type, Worker, primitives,
};

use crate::codegen::{ParamMap, ValueLowering, unravel};
use crate::error::ImplementError;
use crate::matcher::Binding;
use crate::registry::Implementer;

/// Fallback for any grid task: one thread per output element.
///
/// ```text
/// let tid = blockIdx.x * block_dim + threadIdx.x
/// if tid < numel
///     let axes = unravel(tid)
///     out[axes] = value(axes)
/// ```
#[derive(Debug)]
pub struct GridNaive {
    pattern: TaskPattern,
}

impl GridNaive {
    pub fn new() -> Self {
        Self {
            pattern: TaskPattern {
                compute_pattern: Expr::ComputePattern(TensorComputePattern {
                    rank: None,
                    allow_reduce: true,
                }),
                required_params: Vec::new(),
                required_param_types: Vec::new(),
                allow_tensor_extra_params: true,
                worker: Worker::any_grid(),
            },
        }
    }
}

impl Default for GridNaive {
    fn default() -> Self {
        Self::new()
    }
}

impl Implementer for GridNaive {
    fn key(&self) -> &str {
        "grid_naive_implementer"
    }

    fn task_pattern(&self) -> &TaskPattern {
        &self.pattern
    }

    fn implement(&self, task: &Task, _binding: &Binding) -> Result<IRModule, ImplementError> {
        let codegen = |reason: String| ImplementError::Codegen {
            key: self.key().to_string(),
            reason,
        };
        let computation = &task.computation;
        let shape = computation
            .const_shape()
            .ok_or_else(|| codegen(format!("task `{}` has a dynamic shape", task.name)))?;
        let numel: i64 = shape.iter().product();

        let mut fb = FunctionBuilder::new(task.name.clone(), task.worker);
        fb.set_label(self.key());
        let params = ParamMap::declare(&mut fb, task)?;
        let out = params
            .get(&computation.name)
            .cloned()
            .ok_or_else(|| codegen(format!("task `{}` does not bind its output", task.name)))?;

        let block_dim = match task.worker.block_dim() {
            Some(bd) => Expr::int(i64::from(bd)),
            None => primitives::block_dim(),
        };
        let tid = fb.fresh_var("tid", Type::scalar(DataType::Int32));

        let mut sb = StmtBuilder::new();
        sb.enter_let(tid.clone(), primitives::block_idx() * block_dim + primitives::thread_idx());
        sb.enter_if(Expr::var(&tid).lt(Expr::int(numel)));
        for (axis, coord) in computation.axes.iter().zip(unravel(&Expr::var(&tid), &shape)) {
            sb.enter_let(axis.clone(), coord);
        }
        let (prelude, value) = ValueLowering::new(&mut fb, &params).lower(&computation.value)?;
        for stmt in prelude {
            sb.append(stmt);
        }
        sb.append(Stmt::BufferStore {
            buf: Expr::var(&out),
            indices: computation.axes.iter().map(Expr::var).collect(),
            value,
        });
        fb.set_body(sb.finish());

        let mut module = IRModule::new();
        module.add(fb.finish())?;
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::match_task;
    use tessel_ir::{FlowGraph, dump_module, ops};

    fn implement(task: &Task) -> IRModule {
        let imp = GridNaive::new();
        let binding = match_task(imp.task_pattern(), task).unwrap();
        imp.implement(task, &binding).unwrap()
    }

    #[test]
    fn elementwise_kernel() {
        let mut g = FlowGraph::new();
        let x = ops::input(&mut g, "x", DataType::Float32, &[2, 3]);
        ops::relu(&mut g, x).unwrap();
        let task = g.tasks().next().unwrap().clone();
        let m = implement(&task);
        assert_eq!(
            dump_module(&m),
            "def relu_t1(t0: TensorType(float32, [2, 3], global), t1: TensorType(float32, [2, 3], global)) \
             -> VoidType [Grid(1, 256)] label=grid_naive_implementer\n\
             \x20   let tid: int32 = ((blockIdx.x() * 256) + threadIdx.x())\n\
             \x20   if (tid < 6)\n\
             \x20       let t1_i0: int32 = (tid / 3)\n\
             \x20       let t1_i1: int32 = (tid % 3)\n\
             \x20       t1[t1_i0, t1_i1] = max(t0[t1_i0, t1_i1], 0.0)\n"
        );
    }

    #[test]
    fn matmul_kernel_accumulates() {
        let mut g = FlowGraph::new();
        let a = ops::input(&mut g, "a", DataType::Float32, &[2, 3]);
        let b = ops::input(&mut g, "b", DataType::Float32, &[3, 4]);
        ops::matmul(&mut g, a, b).unwrap();
        let task = g.tasks().next().unwrap().clone();
        let m = implement(&task);
        let f = m.get("matmul_t2").unwrap();
        assert_eq!(f.params.len(), 3);
        assert_eq!(f.local_vars.len(), 1);
        assert_eq!(f.body.count(|s| matches!(s, Stmt::For { .. })), 1);
        let text = dump_module(&m);
        assert!(text.contains("acc = (acc + (t0[t2_i0, t2_k0] * t1[t2_k0, t2_i1]))"), "{text}");
        assert!(text.contains("t2[t2_i0, t2_i1] = acc"), "{text}");
    }
}
