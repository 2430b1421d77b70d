//! Graph Pass Pipeline.
//!
//! A [`GraphPass`] takes a [`FlowGraph`] by value and returns the rewritten
//! graph, so no pass can observe a snapshot another stage still holds.
//! [`optimize`] runs the default pass list under a [`PassContext`], notifying
//! its instruments around every pass.

mod const_fold;
mod fusion;
mod instruments;
mod rewrite;

pub use const_fold::ConstantFolding;
pub use fusion::{FuseEpilogue, FusePrologue, FuseUnary, fuse_pair};
pub use instruments::{ProfileInstrument, SaveGraphInstrument};
pub use rewrite::PatternTransform;

use std::fmt::Debug;
use std::path::PathBuf;

use tessel_ir::FlowGraph;

use crate::error::PassError;

/// A graph-to-graph rewrite preserving the graph's inputs and outputs.
pub trait GraphPass: Debug {
    /// Human-readable name of the pass.
    fn name(&self) -> &str;

    /// Rewrites `graph`. A pass with nothing to do returns its input unchanged.
    fn run(&self, graph: FlowGraph) -> Result<FlowGraph, PassError>;
}

/// Observer notified around pipeline stages.
///
/// Hooks cannot fail and cannot change the graph. An instrument that hits an
/// I/O problem logs a warning and carries on.
pub trait GraphPassInstrument: Debug {
    fn before_all_passes(&mut self, _graph: &FlowGraph) {}

    fn before_pass(&mut self, _pass: &str, _graph: &FlowGraph) {}

    fn after_pass(&mut self, _pass: &str, _graph: &FlowGraph) {}

    fn after_all_passes(&mut self, _graph: &FlowGraph) {}
}

/// Configuration of one [`optimize`] run.
#[derive(Debug, Default)]
pub struct PassContext {
    pub instruments: Vec<Box<dyn GraphPassInstrument>>,
    /// Log a per-pass summary at `info` level.
    pub verbose: bool,
}

impl PassContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_instrument(mut self, instrument: Box<dyn GraphPassInstrument>) -> Self {
        self.instruments.push(instrument);
        self
    }

    /// Writes a text snapshot of the graph after every pass into `dir`.
    pub fn save_graphs(self, dir: impl Into<PathBuf>) -> Self {
        self.with_instrument(Box::new(SaveGraphInstrument::new(dir)))
    }

    /// Records per-pass wall time, written to `log_file` and optionally stdout.
    pub fn profile(self, log_file: Option<PathBuf>, print_stdout: bool) -> Self {
        self.with_instrument(Box::new(ProfileInstrument::new(log_file, print_stdout)))
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }
}

/// The canonical pass list, in pipeline order.
pub fn default_passes() -> Vec<Box<dyn GraphPass>> {
    vec![
        Box::new(ConstantFolding),
        Box::new(PatternTransform),
        Box::new(FuseUnary),
        Box::new(FuseEpilogue),
        Box::new(FusePrologue),
    ]
}

/// Runs the default passes over `graph`.
pub fn optimize(graph: FlowGraph, ctx: &mut PassContext) -> Result<FlowGraph, PassError> {
    optimize_with(graph, &default_passes(), ctx)
}

/// Runs `passes` in order over `graph`, then re-derives the node list from
/// the graph outputs.
pub fn optimize_with(
    mut graph: FlowGraph,
    passes: &[Box<dyn GraphPass>],
    ctx: &mut PassContext,
) -> Result<FlowGraph, PassError> {
    graph.update_nodes()?;
    let initial = graph.nodes().len();
    for instrument in &mut ctx.instruments {
        instrument.before_all_passes(&graph);
    }
    for pass in passes {
        for instrument in &mut ctx.instruments {
            instrument.before_pass(pass.name(), &graph);
        }
        let before = graph.nodes().len();
        graph = pass.run(graph)?;
        log::debug!(
            "graph pass `{}`: {} -> {} operators",
            pass.name(),
            before,
            graph.nodes().len()
        );
        for instrument in &mut ctx.instruments {
            instrument.after_pass(pass.name(), &graph);
        }
    }
    graph.update_nodes()?;
    for instrument in ctx.instruments.iter_mut().rev() {
        instrument.after_all_passes(&graph);
    }
    if ctx.verbose {
        log::info!(
            "optimized graph: {} passes, {} -> {} operators",
            passes.len(),
            initial,
            graph.nodes().len()
        );
    }
    Ok(graph)
}
