use std::collections::HashMap;

use tessel_ir::FlowGraph;
use tessel_ir::graph::{BinaryKind, OpKind, Operator, TensorId, UnaryKind};

use super::GraphPass;
use crate::error::PassError;

/// Algebraic simplification of operator sites:
///
/// * `x + 0`, `0 + x`, `x - 0`, `x * 1`, `1 * x`, `x / 1` become `x`,
/// * `neg(neg(x))` becomes `x`,
/// * `relu(relu(x))` becomes `relu(x)`.
///
/// Sites are found on the input graph in one sweep. A site whose output is a
/// graph output is kept so the graph's interface does not change.
#[derive(Debug)]
pub struct PatternTransform;

fn is_splat(graph: &FlowGraph, tensor: TensorId, value: f64) -> Result<bool, PassError> {
    Ok(graph
        .tensor(tensor)?
        .constant()
        .is_some_and(|c| c.iter().all(|&v| v == value)))
}

fn same_type(graph: &FlowGraph, a: TensorId, b: TensorId) -> Result<bool, PassError> {
    let (a, b) = (graph.tensor(a)?, graph.tensor(b)?);
    Ok(a.shape == b.shape && a.dtype == b.dtype)
}

fn producer_kind(graph: &FlowGraph, tensor: TensorId) -> Option<&OpKind> {
    graph.producer(tensor).map(|i| &graph.nodes()[i].kind)
}

/// The tensor `op`'s output can be replaced with, if any rule applies.
fn replacement(graph: &FlowGraph, op: &Operator) -> Result<Option<TensorId>, PassError> {
    let found = match (&op.kind, op.inputs.as_slice()) {
        (OpKind::Binary(kind), &[a, b]) => {
            // (kept operand, constant operand, identity value)
            let candidates: Vec<(TensorId, TensorId, f64)> = match kind {
                BinaryKind::Add => vec![(a, b, 0.0), (b, a, 0.0)],
                BinaryKind::Mul => vec![(a, b, 1.0), (b, a, 1.0)],
                BinaryKind::Sub => vec![(a, b, 0.0)],
                BinaryKind::Div => vec![(a, b, 1.0)],
                BinaryKind::Max => Vec::new(),
            };
            let mut found = None;
            for (x, c, identity) in candidates {
                if is_splat(graph, c, identity)? {
                    found = Some(x);
                    break;
                }
            }
            found
        }
        (OpKind::Unary(UnaryKind::Neg), &[x]) => match (producer_kind(graph, x), graph.producer(x)) {
            (Some(OpKind::Unary(UnaryKind::Neg)), Some(p)) => Some(graph.nodes()[p].inputs[0]),
            _ => None,
        },
        (OpKind::Unary(UnaryKind::Relu), &[x]) => {
            matches!(producer_kind(graph, x), Some(OpKind::Unary(UnaryKind::Relu))).then_some(x)
        }
        _ => None,
    };
    match found {
        Some(x) if same_type(graph, x, op.output)? => Ok(Some(x)),
        _ => Ok(None),
    }
}

fn resolve(map: &HashMap<TensorId, TensorId>, mut tensor: TensorId) -> TensorId {
    while let Some(&next) = map.get(&tensor) {
        tensor = next;
    }
    tensor
}

impl GraphPass for PatternTransform {
    fn name(&self) -> &str {
        "pattern_transform"
    }

    fn run(&self, mut graph: FlowGraph) -> Result<FlowGraph, PassError> {
        let mut map: HashMap<TensorId, TensorId> = HashMap::new();
        for op in graph.nodes() {
            if graph.is_output(op.output) {
                continue;
            }
            if let Some(x) = replacement(&graph, op)? {
                log::debug!("pattern_transform: {} -> {x}", op.task.name);
                map.insert(op.output, x);
            }
        }
        if map.is_empty() {
            return Ok(graph);
        }
        for index in 0..graph.nodes().len() {
            let inputs = graph.nodes()[index].inputs.clone();
            for old in inputs {
                let new = resolve(&map, old);
                if new != old {
                    graph.replace_input(index, old, new)?;
                }
            }
        }
        graph.update_nodes()?;
        Ok(graph)
    }
}
