//! Tasks and the execution scopes they run on.

use crate::compute::{TensorCompute, TensorInput};
use crate::error::IrError;
use crate::expr::Expr;
use crate::infer::infer_type;
use crate::types::{DataType, MemoryScope, Slot, TensorType, Type};

/// Number of lanes in a warp.
pub const WARP_SIZE: i64 = 32;

/// The execution scope a task or implementer targets.
///
/// `None` dimensions are unconstrained: a pattern worker with `None` accepts
/// any value for that field.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Worker {
    Host,
    Grid {
        grid_dim: Option<u32>,
        block_dim: Option<u32>,
    },
    ThreadBlock {
        block_dim: Option<u32>,
    },
    Warp,
    Thread,
}

impl Worker {
    /// A grid with both dimensions left open.
    pub fn any_grid() -> Self {
        Self::Grid {
            grid_dim: None,
            block_dim: None,
        }
    }

    pub fn grid(grid_dim: u32, block_dim: u32) -> Self {
        Self::Grid {
            grid_dim: Some(grid_dim),
            block_dim: Some(block_dim),
        }
    }

    /// Returns `true` if a pattern targeting `self` may serve a task on `task`.
    pub fn accepts(&self, task: &Worker) -> bool {
        fn field(pattern: Option<u32>, task: Option<u32>) -> bool {
            pattern.is_none() || pattern == task
        }
        match (*self, *task) {
            (Self::Host, Self::Host) | (Self::Warp, Self::Warp) | (Self::Thread, Self::Thread) => true,
            (
                Self::Grid {
                    grid_dim: pg,
                    block_dim: pb,
                },
                Self::Grid {
                    grid_dim: tg,
                    block_dim: tb,
                },
            ) => field(pg, tg) && field(pb, tb),
            (Self::ThreadBlock { block_dim: pb }, Self::ThreadBlock { block_dim: tb }) => field(pb, tb),
            _ => false,
        }
    }

    /// Threads per block, when known. A warp reports its own width; the block
    /// it runs in may hold several warps.
    pub fn block_dim(&self) -> Option<u32> {
        match *self {
            Self::Grid { block_dim, .. } | Self::ThreadBlock { block_dim } => block_dim,
            Self::Warp => Some(WARP_SIZE as u32),
            Self::Host | Self::Thread => None,
        }
    }

    /// Host functions and grid kernels can be invoked from the host.
    pub fn is_host_callable(&self) -> bool {
        matches!(self, Self::Host | Self::Grid { .. })
    }
}

/// A named, worker-scoped unit of abstract computation.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub name: String,
    pub computation: TensorCompute,
    /// Compute nodes bound as parameters: inputs, then the computation itself.
    pub params: Vec<Expr>,
    /// `param_types[i]` types `params[i]`.
    pub param_types: Vec<Type>,
    pub worker: Worker,
}

impl Task {
    pub fn new(
        name: impl Into<String>,
        computation: TensorCompute,
        params: Vec<Expr>,
        param_types: Vec<Type>,
        worker: Worker,
    ) -> Self {
        Self {
            name: name.into(),
            computation,
            params,
            param_types,
            worker,
        }
    }

    /// A task that reads `inputs` from and writes its result to global memory.
    pub fn from_compute(
        name: impl Into<String>,
        inputs: Vec<TensorInput>,
        computation: TensorCompute,
        worker: Worker,
    ) -> Result<Self, IrError> {
        let mut params = Vec::with_capacity(inputs.len() + 1);
        let mut param_types = Vec::with_capacity(inputs.len() + 1);
        for input in inputs {
            param_types.push(Type::Tensor(TensorType {
                scope: Slot::Known(MemoryScope::Global),
                dtype: input.dtype.clone(),
                shape: input.shape.clone(),
                strides: None,
            }));
            params.push(Expr::TensorInput(input));
        }
        let dtype = value_dtype(&computation)?;
        param_types.push(Type::Tensor(TensorType {
            scope: Slot::Known(MemoryScope::Global),
            dtype: Slot::Known(dtype),
            shape: Some(computation.shape.clone()),
            strides: None,
        }));
        params.push(Expr::TensorCompute(Box::new(computation.clone())));
        Ok(Self::new(name, computation, params, param_types, worker))
    }

    /// Element type of the task's output.
    pub fn output_dtype(&self) -> Result<DataType, IrError> {
        value_dtype(&self.computation)
    }

    /// Position of `node` among the parameters.
    pub fn param_index(&self, node: &Expr) -> Option<usize> {
        self.params.iter().position(|p| p == node)
    }

    /// Fails with [`IrError::Unresolved`] if any part of the task still
    /// carries a pattern hole; such tasks must never reach code generation.
    pub fn check_resolved(&self) -> Result<(), IrError> {
        let compute = Expr::TensorCompute(Box::new(self.computation.clone()));
        if !compute.is_resolved() {
            return Err(IrError::Unresolved {
                what: format!("computation of task `{}`", self.name),
            });
        }
        if let Some(i) = self.param_types.iter().position(|t| !t.is_resolved()) {
            return Err(IrError::Unresolved {
                what: format!("type of parameter {i} of task `{}`", self.name),
            });
        }
        Ok(())
    }
}

fn value_dtype(computation: &TensorCompute) -> Result<DataType, IrError> {
    match infer_type(&computation.value)? {
        Type::Scalar(Slot::Known(dtype)) => Ok(dtype),
        other => Err(IrError::Unresolved {
            what: format!("element type of `{}` ({other:?})", computation.name),
        }),
    }
}
