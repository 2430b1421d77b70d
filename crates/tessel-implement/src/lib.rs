//! Task implementation for Tessel.
//!
//! An [`Implementer`] declares the tasks it can handle through a
//! [`TaskPattern`](tessel_ir::TaskPattern). The [`ImplementerRegistry`]
//! matches each task against every registered pattern, picks the highest
//! priority match and asks it for an [`IRModule`](tessel_ir::IRModule).
//! [`compile_graph`] runs the whole flow for a graph.

pub mod codegen;
mod driver;
mod error;
pub mod implementers;
mod matcher;
mod registry;

pub use driver::{CompileOptions, Compiled, compile_graph, extract_tasks};
pub use error::ImplementError;
pub use matcher::{Binding, NoMatch, match_task, validate_pattern};
pub use registry::{Implementer, ImplementerRegistry};
