//! Operator fusion.
//!
//! Fusing a producer into its only consumer inlines the producer's compute
//! definition at every place the consumer reads the producer's output. The
//! fused operator keeps the consumer's output tensor and reads the union of
//! both operators' inputs. Each pass repeats until no pair qualifies, so a
//! second run is a no-op.

use std::collections::HashMap;

use tessel_ir::graph::{OpClass, OpKind};
use tessel_ir::{Expr, FlowGraph};

use super::GraphPass;
use crate::error::PassError;

/// Merges node `producer` into node `consumer`. The fused node takes the
/// consumer's place and `class` becomes its operator class.
pub fn fuse_pair(
    graph: &mut FlowGraph,
    producer: usize,
    consumer: usize,
    class: OpClass,
) -> Result<(), PassError> {
    let (p, c) = (&graph.nodes()[producer], &graph.nodes()[consumer]);
    let source = p.computation().clone();
    let mut computation = c.computation().clone();
    computation.value = computation.value.rewrite_post(&mut |e| match e {
        Expr::TensorElement { base, indices } => match &*base {
            Expr::TensorInput(t) if t.name == source.name => {
                let map: HashMap<String, Expr> = source
                    .axes
                    .iter()
                    .map(|a| a.name.clone())
                    .zip(indices)
                    .collect();
                source.value.clone().substitute(&map)
            }
            _ => Expr::TensorElement { base, indices },
        },
        other => other,
    });

    let mut inputs = Vec::with_capacity(p.inputs.len() + c.inputs.len());
    for &t in &c.inputs {
        let spliced = if t == p.output { p.inputs.as_slice() } else { std::slice::from_ref(&t) };
        for &s in spliced {
            if !inputs.contains(&s) {
                inputs.push(s);
            }
        }
    }
    let kind = OpKind::fuse(&p.kind, &c.kind, class);
    let output = c.output;
    log::debug!("fusing {} into {}", p.task.name, c.task.name);
    let fused = graph.make_operator(kind, inputs, output, computation)?;
    graph.replace_node(consumer, fused);
    graph.remove_node(producer);
    Ok(())
}

/// First `(producer, consumer, fused class)` accepted by `rule`, in node
/// order. The producer's output must feed only the consumer and must not be
/// a graph output.
fn find_pair(
    graph: &FlowGraph,
    rule: fn(OpClass, OpClass) -> Option<OpClass>,
) -> Option<(usize, usize, OpClass)> {
    for (ci, consumer) in graph.nodes().iter().enumerate() {
        for &t in &consumer.inputs {
            let Some(pi) = graph.producer(t) else {
                continue;
            };
            if graph.is_output(t) || graph.consumers(t).len() != 1 {
                continue;
            }
            if let Some(class) = rule(graph.nodes()[pi].class(), consumer.class()) {
                return Some((pi, ci, class));
            }
        }
    }
    None
}

fn fuse_to_fixed_point(
    mut graph: FlowGraph,
    rule: fn(OpClass, OpClass) -> Option<OpClass>,
) -> Result<FlowGraph, PassError> {
    let mut fused = 0usize;
    while let Some((p, c, class)) = find_pair(&graph, rule) {
        fuse_pair(&mut graph, p, c, class)?;
        fused += 1;
    }
    if fused > 0 {
        graph.update_nodes()?;
    }
    Ok(graph)
}

/// Merges chains of unary elementwise operators.
#[derive(Debug)]
pub struct FuseUnary;

impl GraphPass for FuseUnary {
    fn name(&self) -> &str {
        "fuse_unary"
    }

    fn run(&self, graph: FlowGraph) -> Result<FlowGraph, PassError> {
        fuse_to_fixed_point(graph, |p, c| {
            (p == OpClass::UnaryElementwise && c == OpClass::UnaryElementwise)
                .then_some(OpClass::UnaryElementwise)
        })
    }
}

/// Merges elementwise consumers into the anchor operator producing their input.
#[derive(Debug)]
pub struct FuseEpilogue;

impl GraphPass for FuseEpilogue {
    fn name(&self) -> &str {
        "fuse_epilogue"
    }

    fn run(&self, graph: FlowGraph) -> Result<FlowGraph, PassError> {
        fuse_to_fixed_point(graph, |p, c| {
            (p == OpClass::Anchor && c.is_elementwise()).then_some(OpClass::Anchor)
        })
    }
}

/// Merges elementwise producers into the anchor operator reading them.
#[derive(Debug)]
pub struct FusePrologue;

impl GraphPass for FusePrologue {
    fn name(&self) -> &str {
        "fuse_prologue"
    }

    fn run(&self, graph: FlowGraph) -> Result<FlowGraph, PassError> {
        fuse_to_fixed_point(graph, |p, c| {
            (p.is_elementwise() && c == OpClass::Anchor).then_some(OpClass::Anchor)
        })
    }
}
