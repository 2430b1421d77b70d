//! Tessel intermediate representation.
//!
//! A tree-shaped, value-semantics IR for tensor programs: typed expressions
//! and statements, a declarative compute dialect describing *what* a task
//! computes, a pattern dialect describing *what an implementer can handle*,
//! and the operator-level [`FlowGraph`] that feeds task extraction.

mod builder;
mod compute;
mod display;
mod error;
mod expr;
mod func;
pub mod graph;
mod infer;
pub mod ops;
mod pattern;
pub mod primitives;
mod stmt;
mod task;
mod types;

pub use builder::{FunctionBuilder, StmtBuilder};
pub use compute::{ReduceCompute, ReduceKind, ScalarInput, TensorCompute, TensorInput, compute, reduce};
pub use display::{dump_graph, dump_module, dump_task};
pub use error::IrError;
pub use expr::{BinaryOp, ConstValue, Constant, Expr, UnaryOp, Var};
pub use func::{Function, FunctionAttrs, IRModule};
pub use graph::FlowGraph;
pub use infer::infer_type;
pub use pattern::{AnyExpr, PatternBuilder, ReduceComputePattern, TaskPattern, TensorComputePattern};
pub use stmt::Stmt;
pub use task::{Task, WARP_SIZE, Worker};
pub use types::{
    DataType, HoleId, MemoryScope, RegisterLayout, RegisterScope, ScalarType, Slot, TensorType,
    Type,
};
