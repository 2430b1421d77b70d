use std::collections::{HashMap, HashSet};

use ndarray::ArrayD;
use tessel_ir::FlowGraph;
use tessel_ir::graph::TensorId;

use super::GraphPass;
use crate::error::PassError;
use crate::eval::evaluate;

/// Operators producing more elements than this are left to run on device.
const MAX_FOLD_ELEMENTS: i64 = 1 << 16;

/// Evaluates operators whose inputs are all constants and replaces their
/// outputs with constant tensors. A site the evaluator rejects (e.g. integer
/// division by zero) stays in the graph.
#[derive(Debug)]
pub struct ConstantFolding;

impl ConstantFolding {
    fn foldable(graph: &FlowGraph, skip: &HashSet<TensorId>) -> Result<Option<usize>, PassError> {
        for (index, op) in graph.nodes().iter().enumerate() {
            if skip.contains(&op.output) || graph.tensor(op.output)?.numel() > MAX_FOLD_ELEMENTS {
                continue;
            }
            let mut all_const = true;
            for &t in &op.inputs {
                all_const &= graph.tensor(t)?.is_constant();
            }
            if all_const {
                return Ok(Some(index));
            }
        }
        Ok(None)
    }
}

impl GraphPass for ConstantFolding {
    fn name(&self) -> &str {
        "const_fold"
    }

    fn run(&self, mut graph: FlowGraph) -> Result<FlowGraph, PassError> {
        let mut folded = 0usize;
        let mut skip = HashSet::new();
        while let Some(index) = Self::foldable(&graph, &skip)? {
            let op = &graph.nodes()[index];
            let mut values: HashMap<String, ArrayD<f64>> = HashMap::new();
            for &t in &op.inputs {
                if let Some(value) = graph.tensor(t)?.constant() {
                    values.insert(t.name(), value.clone());
                }
            }
            let output = op.output;
            let value = match evaluate(op.computation(), &values) {
                Ok(value) => value,
                Err(e) => {
                    log::debug!("const_fold: {} left in place: {e}", op.task.name);
                    skip.insert(output);
                    continue;
                }
            };
            log::debug!("const_fold: {} folded to a constant", op.task.name);
            graph.set_constant(output, value)?;
            folded += 1;
        }
        if folded > 0 {
            graph.update_nodes()?;
        }
        Ok(graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{IxDyn, array};
    use crate::graph::{PassContext, optimize};
    use tessel_ir::{DataType, ops};

    #[test]
    fn folds_constant_subgraph() {
        let mut g = FlowGraph::new();
        let x = ops::input(&mut g, "x", DataType::Float32, &[2]);
        let c = ops::constant(&mut g, array![-1.0, 4.0].into_dyn(), DataType::Float32);
        let c = ops::relu(&mut g, c).unwrap();
        let c = ops::sqrt(&mut g, c).unwrap();
        let y = ops::add(&mut g, x, c).unwrap();
        g.mark_output(y);

        let g = ConstantFolding.run(g).unwrap();
        assert_eq!(g.nodes().len(), 1);
        let op = &g.nodes()[0];
        assert_eq!(op.inputs[0], x);
        let folded = g.tensor(op.inputs[1]).unwrap().constant().unwrap();
        assert_eq!(folded, &array![0.0, 2.0].into_dyn());
    }

    #[test]
    fn graph_without_constants_is_unchanged() {
        let mut g = FlowGraph::new();
        let x = ops::input(&mut g, "x", DataType::Float32, &[3]);
        let y = ops::exp(&mut g, x).unwrap();
        g.mark_output(y);
        let before = g.clone();
        assert_eq!(ConstantFolding.run(g).unwrap(), before);
    }

    #[test]
    fn large_tensors_are_not_folded() {
        let mut g = FlowGraph::new();
        let c = ops::constant(&mut g, ArrayD::zeros(IxDyn(&[1 << 17])), DataType::Float32);
        let y = ops::neg(&mut g, c).unwrap();
        g.mark_output(y);
        let g = ConstantFolding.run(g).unwrap();
        assert_eq!(g.nodes().len(), 1);
    }

    #[test]
    fn folded_output_stays_a_graph_output() {
        let mut g = FlowGraph::new();
        let c = ops::constant(&mut g, array![[1.0, 2.0], [3.0, 4.0]].into_dyn(), DataType::Float32);
        let y = ops::reduce_sum(&mut g, c, 1).unwrap();
        g.mark_output(y);
        let g = ConstantFolding.run(g).unwrap();
        assert!(g.nodes().is_empty());
        assert_eq!(g.outputs(), [y]);
        assert_eq!(g.tensor(y).unwrap().constant().unwrap(), &array![3.0, 7.0].into_dyn());
    }

    #[test]
    fn unevaluable_site_is_left_in_place() {
        let mut g = FlowGraph::new();
        let x = ops::input(&mut g, "x", DataType::Int32, &[2]);
        let a = ops::constant(&mut g, array![1.0, 1.0].into_dyn(), DataType::Int32);
        let b = ops::constant(&mut g, array![0.0, 0.0].into_dyn(), DataType::Int32);
        let q = ops::div(&mut g, a, b).unwrap();
        let y = ops::add(&mut g, q, x).unwrap();
        g.mark_output(y);

        let folded = ConstantFolding.run(g.clone()).unwrap();
        assert_eq!(folded.nodes().len(), 2);
        assert_eq!(folded.nodes()[0].output, q);

        let g = optimize(g, &mut PassContext::new()).unwrap();
        let labels: Vec<String> = g.nodes().iter().map(|op| op.kind.label()).collect();
        assert!(labels.iter().any(|l| l.contains("div")), "{labels:?}");
        assert_eq!(g.outputs(), [y]);
    }
}
