use tessel_ir::{
    DataType, Expr, FunctionBuilder, IRModule, MemoryScope, PatternBuilder, RegisterScope, ScalarType, Slot,
    Stmt, StmtBuilder, Task, TaskPattern, TensorCompute, TensorType, Type, Var, Worker, primitives,
};

use crate::error::ImplementError;
use crate::matcher::Binding;
use crate::registry::Implementer;

/// Copies a 2-D shared-memory tile into the registers of a warp.
///
/// Every lane stores each of its local registers from the shared element
/// that the register layout assigns to it, addressed through the lane id
/// `threadIdx.x % 32`.
#[derive(Debug)]
pub struct CudaWarpTransferS2R {
    shape: Vec<Expr>,
    smem_dtype: ScalarType,
    regs_dtype: ScalarType,
    register_scope: MemoryScope,
    pattern: TaskPattern,
}

impl CudaWarpTransferS2R {
    pub fn new() -> Self {
        let mut pb = PatternBuilder::new();
        let shape = pb.any_exprs(2);
        let in_strides = pb.any_exprs(2);
        let input = pb.tensor_input("in");
        let axes = vec![Var::int("i"), Var::int("j")];
        let computation = TensorCompute {
            name: "out".into(),
            shape: shape.clone(),
            value: input.at(axes.iter().map(Expr::var).collect()),
            axes,
        };
        let smem_dtype = pb.any_dtype();
        let regs_dtype = pb.any_dtype();
        let register_scope = pb.any_register_scope();
        let input_type = Type::Tensor(TensorType {
            scope: Slot::Known(MemoryScope::Shared),
            dtype: smem_dtype.clone(),
            shape: None,
            strides: Some(in_strides),
        });
        let output_type = Type::Tensor(TensorType {
            scope: Slot::Known(register_scope.clone()),
            dtype: regs_dtype.clone(),
            shape: None,
            strides: None,
        });
        let computation = Expr::TensorCompute(Box::new(computation));
        let pattern = TaskPattern {
            compute_pattern: computation.clone(),
            required_params: vec![Expr::TensorInput(input), computation],
            required_param_types: vec![input_type, output_type],
            allow_tensor_extra_params: false,
            worker: Worker::Warp,
        };
        Self {
            shape,
            smem_dtype,
            regs_dtype,
            register_scope,
            pattern,
        }
    }

    fn codegen(&self, reason: impl Into<String>) -> ImplementError {
        ImplementError::Codegen {
            key: self.key().to_string(),
            reason: reason.into(),
        }
    }
}

impl Default for CudaWarpTransferS2R {
    fn default() -> Self {
        Self::new()
    }
}

/// Every index of `shape`, row-major.
fn indices(shape: &[i64]) -> Vec<Vec<i64>> {
    let total: i64 = shape.iter().product();
    (0..total)
        .map(|flat| {
            let mut rest = flat;
            let mut index = vec![0; shape.len()];
            for (k, &extent) in shape.iter().enumerate().rev() {
                index[k] = rest % extent;
                rest /= extent;
            }
            index
        })
        .collect()
}

impl Implementer for CudaWarpTransferS2R {
    fn key(&self) -> &str {
        "cuda_warp_transfer_s2r_implementer"
    }

    fn task_pattern(&self) -> &TaskPattern {
        &self.pattern
    }

    fn implement(&self, task: &Task, binding: &Binding) -> Result<IRModule, ImplementError> {
        let shape = self
            .shape
            .iter()
            .map(|e| binding.int(e))
            .collect::<Option<Vec<i64>>>()
            .ok_or_else(|| self.codegen("tile shape is not static"))?;
        let regs_scope: RegisterScope = binding
            .register_scope(&self.register_scope)
            .cloned()
            .ok_or_else(|| self.codegen("output is not held in registers"))?;
        if !regs_scope.is_valid() {
            return Err(self.codegen(format!("invalid register layout {regs_scope}")));
        }
        if regs_scope.global_shape() != shape {
            return Err(self.codegen(format!(
                "register layout covers {:?} but the shared tile is {shape:?}",
                regs_scope.global_shape()
            )));
        }
        let (smem_dtype, regs_dtype) = match (binding.dtype(&self.smem_dtype), binding.dtype(&self.regs_dtype)) {
            (Some(s), Some(r)) => (s, r),
            _ => return Err(self.codegen("element types are unresolved")),
        };
        let smem_type = binding
            .param_index(0)
            .and_then(|i| task.param_types.get(i))
            .cloned()
            .unwrap_or_else(|| Type::Tensor(TensorType::new(MemoryScope::Shared, smem_dtype, &shape)));

        let mut fb = FunctionBuilder::new(task.name.clone(), task.worker);
        fb.set_label(self.key());
        let smem = fb.param("smem", smem_type);
        let regs = fb.param(
            "regs",
            Type::Tensor(TensorType {
                scope: Slot::Known(MemoryScope::Register(Slot::Known(regs_scope.clone()))),
                dtype: Slot::Known(regs_dtype),
                shape: Some(regs_scope.local_shape.iter().map(|&d| Expr::int(d)).collect()),
                strides: None,
            }),
        );
        let lane_id = fb.fresh_var("lane_id", Type::scalar(DataType::Int32));

        let mut sb = StmtBuilder::new();
        sb.enter_let(lane_id.clone(), primitives::lane_id());
        for local in indices(&regs_scope.local_shape) {
            let global = regs_scope.local2global(&Expr::var(&lane_id), &local);
            let mut value = Expr::element(Expr::var(&smem), global);
            if smem_dtype != regs_dtype {
                value = Expr::cast(value, Type::scalar(regs_dtype));
            }
            sb.append(Stmt::BufferStore {
                buf: Expr::var(&regs),
                indices: local.iter().map(|&i| Expr::int(i)).collect(),
                value,
            });
        }
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
    use tessel_ir::{TensorInput, compute, dump_module};

    fn transfer_task(tile: &[i64], regs: RegisterScope) -> Task {
        let input = TensorInput::new("in", DataType::Float32, tile);
        let out = compute("out", tile, "i", |ax| input.at(ax.iter().map(Expr::var).collect()));
        let local: Vec<i64> = regs.local_shape.clone();
        let param_types = vec![
            Type::Tensor(TensorType::new(MemoryScope::Shared, DataType::Float32, tile)),
            Type::Tensor(TensorType::new(MemoryScope::Register(Slot::Known(regs)), DataType::Float32, &local)),
        ];
        let params = vec![Expr::TensorInput(input), Expr::TensorCompute(Box::new(out.clone()))];
        Task::new("s2r", out, params, param_types, Worker::Warp)
    }

    fn run(task: &Task) -> Result<IRModule, ImplementError> {
        let imp = CudaWarpTransferS2R::new();
        let binding = match_task(imp.task_pattern(), task).unwrap();
        imp.implement(task, &binding)
    }

    #[test]
    fn indices_are_row_major() {
        assert_eq!(indices(&[2, 2]), vec![vec![0, 0], vec![0, 1], vec![1, 0], vec![1, 1]]);
        assert_eq!(indices(&[3]).len(), 3);
    }

    #[test]
    fn identity_layout_copies_every_element() {
        let m = run(&transfer_task(&[2, 2], RegisterScope::identity(vec![2, 2]))).unwrap();
        let f = m.get("s2r").unwrap();
        assert_eq!(f.attrs.worker, Worker::Warp);
        assert_eq!(
            f.body.to_string(),
            "let lane_id: int32 = (threadIdx.x() % 32)\n\
             regs[0, 0] = smem[0, 0]\n\
             regs[0, 1] = smem[0, 1]\n\
             regs[1, 0] = smem[1, 0]\n\
             regs[1, 1] = smem[1, 1]\n"
        );
        assert!(dump_module(&m).starts_with("def s2r(smem: TensorType(float32, [2, 2], shared), regs: "));
    }

    #[test]
    fn cyclic_layout_interleaves_lanes() {
        let m = run(&transfer_task(&[8, 8], RegisterScope::cyclic(vec![2, 1], vec![4, 8]))).unwrap();
        let f = m.get("s2r").unwrap();
        assert_eq!(f.body.count(|s| matches!(s, Stmt::BufferStore { .. })), 2);
        let text = f.body.to_string();
        assert!(
            text.contains("regs[1, 0] = smem[(4 + ((lane_id / 8) % 4)), (0 + (lane_id % 8))]"),
            "{text}"
        );
    }

    #[test]
    fn layout_must_cover_the_tile() {
        let err = run(&transfer_task(&[4, 4], RegisterScope::identity(vec![2, 2]))).unwrap_err();
        assert!(matches!(err, ImplementError::Codegen { .. }));
    }

    #[test]
    fn global_output_is_declined() {
        let mut task = transfer_task(&[2, 2], RegisterScope::identity(vec![2, 2]));
        task.param_types[1] = Type::Tensor(TensorType::new(MemoryScope::Global, DataType::Float32, &[2, 2]));
        let imp = CudaWarpTransferS2R::new();
        assert!(match_task(imp.task_pattern(), &task).is_err());
    }
}
