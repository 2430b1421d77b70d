use std::collections::HashMap;

use ndarray::{ArrayD, IxDyn};
use tessel_ir::{
    DataType, Expr, FlowGraph, MemoryScope, PatternBuilder, RegisterScope, Slot, Task, TaskPattern, TensorCompute,
    TensorInput, TensorType, Type, Var, Worker, compute, ops,
};

/// `relu(matmul(abs(x), w) + b)` with x: [4, 8], w: [8, 16], b: [16].
#[allow(dead_code)]
pub fn mlp() -> FlowGraph {
    let mut g = FlowGraph::new();
    let x = ops::input(&mut g, "x", DataType::Float32, &[4, 8]);
    let w = ops::input(&mut g, "w", DataType::Float32, &[8, 16]);
    let b = ops::input(&mut g, "b", DataType::Float32, &[16]);
    let x = ops::abs(&mut g, x).unwrap();
    let h = ops::matmul(&mut g, x, w).unwrap();
    let h = ops::add(&mut g, h, b).unwrap();
    let y = ops::relu(&mut g, h).unwrap();
    g.mark_output(y);
    g
}

/// Deterministic values in [-1, 1) for every input of [`mlp`].
#[allow(dead_code)]
pub fn mlp_inputs() -> HashMap<String, ArrayD<f64>> {
    HashMap::from([
        ("x".to_string(), ramp(&[4, 8])),
        ("w".to_string(), ramp(&[8, 16])),
        ("b".to_string(), ramp(&[16])),
    ])
}

#[allow(dead_code)]
pub fn ramp(shape: &[usize]) -> ArrayD<f64> {
    let n: usize = shape.iter().product();
    let values = (0..n).map(|v| (v % 8) as f64 * 0.25 - 1.0).collect();
    ArrayD::from_shape_vec(IxDyn(shape), values).unwrap()
}

/// A grid task copying `t0` into `t1` element by element.
#[allow(dead_code)]
pub fn copy_task(shape: &[i64]) -> Task {
    let input = TensorInput::new("t0", DataType::Float32, shape);
    let out = compute("t1", shape, "t1_i", |ax| input.at(ax.iter().map(Expr::var).collect()));
    Task::from_compute("copy_t1", vec![input], out, Worker::grid(1, 256)).unwrap()
}

/// `out[i, j] = in[i, j]` over an unresolved 2-D shape, on any grid.
#[allow(dead_code)]
pub fn copy_pattern() -> TaskPattern {
    let mut pb = PatternBuilder::new();
    let input = pb.tensor_input("in");
    let (i, j) = (Var::int("i"), Var::int("j"));
    let out = TensorCompute {
        name: "out".into(),
        shape: pb.any_exprs(2),
        axes: vec![i.clone(), j.clone()],
        value: input.at(vec![Expr::var(&i), Expr::var(&j)]),
    };
    let any_tensor = Type::Tensor(TensorType {
        scope: Slot::Hole(pb.hole()),
        dtype: pb.any_dtype(),
        shape: None,
        strides: None,
    });
    TaskPattern {
        required_params: vec![Expr::TensorInput(input), Expr::TensorCompute(Box::new(out.clone()))],
        compute_pattern: Expr::TensorCompute(Box::new(out)),
        required_param_types: vec![any_tensor.clone(), any_tensor],
        allow_tensor_extra_params: false,
        worker: Worker::any_grid(),
    }
}

/// A warp task moving a shared-memory `tile` into registers laid out by `regs`.
#[allow(dead_code)]
pub fn transfer_task(name: &str, tile: &[i64], regs: RegisterScope) -> Task {
    let input = TensorInput::new("smem_tile", DataType::Float32, tile);
    let out = compute("regs_tile", tile, "i", |ax| input.at(ax.iter().map(Expr::var).collect()));
    let local = regs.local_shape.clone();
    let param_types = vec![
        Type::Tensor(TensorType::new(MemoryScope::Shared, DataType::Float32, tile)),
        Type::Tensor(TensorType::new(
            MemoryScope::Register(Slot::Known(regs)),
            DataType::Float32,
            &local,
        )),
    ];
    let params = vec![Expr::TensorInput(input), Expr::TensorCompute(Box::new(out.clone()))];
    Task::new(name, out, params, param_types, Worker::Warp)
}
