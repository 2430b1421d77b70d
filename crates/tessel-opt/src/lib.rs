//! Optimization pipelines for Tessel.
//!
//! - [`graph`]: the graph pass pipeline (constant folding, pattern rewriting,
//!   unary/epilogue/prologue fusion) with instrumentation hooks.
//! - [`lower`]: the module lowering pipeline (dead-function elimination,
//!   packed wrappers, tensor flattening, constant and bound-aware
//!   simplification) run in a fixed stage order.

mod error;
pub mod eval;
pub mod graph;
pub mod lower;

pub use error::PassError;
pub use eval::{evaluate, evaluate_graph};
pub use graph::{
    GraphPass, GraphPassInstrument, PassContext, ProfileInstrument, SaveGraphInstrument, default_passes,
    optimize, optimize_with,
};
pub use lower::{Lowerer, ModuleTransform, Stage, lower};
