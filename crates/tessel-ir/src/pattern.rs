//! Pattern dialect: templates describing what an implementer can handle.

use crate::compute::{ReduceKind, ScalarInput, TensorInput};
use crate::expr::Expr;
use crate::task::Worker;
use crate::types::{HoleId, MemoryScope, ScalarType, Slot, Type};

/// Matches any expression and binds it to `hole`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnyExpr {
    pub hole: HoleId,
}

/// Matches any tensor compute, optionally of a fixed rank.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TensorComputePattern {
    /// `None` accepts any rank.
    pub rank: Option<usize>,
    /// Whether the value may contain reductions.
    pub allow_reduce: bool,
}

/// Matches any reduction, optionally of a fixed combinator.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReduceComputePattern {
    pub kind: Option<ReduceKind>,
}

/// Mints holes and placeholder nodes for one pattern.
#[derive(Debug, Default)]
pub struct PatternBuilder {
    next: u32,
}

impl PatternBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hole(&mut self) -> HoleId {
        let id = HoleId(self.next);
        self.next += 1;
        id
    }

    /// A wildcard expression, e.g. an unresolved shape extent.
    pub fn any_expr(&mut self) -> Expr {
        Expr::Any(AnyExpr { hole: self.hole() })
    }

    /// `n` wildcard expressions.
    pub fn any_exprs(&mut self, n: usize) -> Vec<Expr> {
        (0..n).map(|_| self.any_expr()).collect()
    }

    pub fn any_dtype(&mut self) -> ScalarType {
        Slot::Hole(self.hole())
    }

    /// A register scope whose layout binds during matching.
    pub fn any_register_scope(&mut self) -> MemoryScope {
        MemoryScope::Register(Slot::Hole(self.hole()))
    }

    /// A tensor input placeholder of any element type and shape.
    pub fn tensor_input(&mut self, name: impl Into<String>) -> TensorInput {
        TensorInput {
            name: name.into(),
            dtype: self.any_dtype(),
            shape: None,
        }
    }

    pub fn scalar_input(&mut self, name: impl Into<String>) -> ScalarInput {
        ScalarInput {
            name: name.into(),
            dtype: self.any_dtype(),
        }
    }
}

/// Compute-shape template, required parameter types and target worker of an
/// implementer.
///
/// `required_params[i]` is typed by `required_param_types[i]`.
#[derive(Clone, Debug, PartialEq)]
pub struct TaskPattern {
    pub compute_pattern: Expr,
    pub required_params: Vec<Expr>,
    pub required_param_types: Vec<Type>,
    /// Whether the task may carry tensor parameters beyond the required ones.
    pub allow_tensor_extra_params: bool,
    pub worker: Worker,
}
