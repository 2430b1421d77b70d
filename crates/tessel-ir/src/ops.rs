//! Operator constructors.
//!
//! Each constructor appends one operator to a [`FlowGraph`] and defines its
//! task in the compute dialect.

use ndarray::ArrayD;

use crate::compute::{ReduceKind, TensorInput, compute, reduce};
use crate::error::IrError;
use crate::expr::{ConstValue, Expr, Var};
use crate::graph::{BinaryKind, FlowGraph, OpKind, TensorId, UnaryKind};
use crate::primitives;
use crate::types::DataType;

pub fn input(g: &mut FlowGraph, name: &str, dtype: DataType, shape: &[i64]) -> TensorId {
    g.add_input(name, dtype, shape)
}

pub fn constant(g: &mut FlowGraph, value: ArrayD<f64>, dtype: DataType) -> TensorId {
    g.add_constant(value, dtype)
}

fn axis_vars(axes: &[Var]) -> Vec<Expr> {
    axes.iter().map(Expr::var).collect()
}

fn zero(dtype: DataType) -> Expr {
    Expr::constant(ConstValue::Int(0), dtype)
}

/// Applies `kind` to every element of `x`.
pub fn unary(g: &mut FlowGraph, kind: UnaryKind, x: TensorId) -> Result<TensorId, IrError> {
    let info = g.tensor(x)?;
    let (dtype, shape) = (info.dtype, info.shape.clone());
    g.add_operator(OpKind::Unary(kind), &[x], |args, out| {
        compute(out, &shape, &format!("{out}_i"), |ax| {
            let v = args[0].at(axis_vars(ax));
            match kind {
                UnaryKind::Relu => primitives::math("max", vec![v, zero(dtype)]),
                UnaryKind::Neg => -v,
                other => primitives::math(other.name(), vec![v]),
            }
        })
    })
}

pub fn relu(g: &mut FlowGraph, x: TensorId) -> Result<TensorId, IrError> {
    unary(g, UnaryKind::Relu, x)
}

pub fn neg(g: &mut FlowGraph, x: TensorId) -> Result<TensorId, IrError> {
    unary(g, UnaryKind::Neg, x)
}

pub fn exp(g: &mut FlowGraph, x: TensorId) -> Result<TensorId, IrError> {
    unary(g, UnaryKind::Exp, x)
}

pub fn sigmoid(g: &mut FlowGraph, x: TensorId) -> Result<TensorId, IrError> {
    unary(g, UnaryKind::Sigmoid, x)
}

pub fn tanh(g: &mut FlowGraph, x: TensorId) -> Result<TensorId, IrError> {
    unary(g, UnaryKind::Tanh, x)
}

pub fn sqrt(g: &mut FlowGraph, x: TensorId) -> Result<TensorId, IrError> {
    unary(g, UnaryKind::Sqrt, x)
}

pub fn abs(g: &mut FlowGraph, x: TensorId) -> Result<TensorId, IrError> {
    unary(g, UnaryKind::Abs, x)
}

/// Numpy-style broadcast of two shapes.
pub fn broadcast_shape(op: &str, a: &[i64], b: &[i64]) -> Result<Vec<i64>, IrError> {
    let rank = a.len().max(b.len());
    let mut out = vec![0; rank];
    for k in 0..rank {
        let da = dim_from_right(a, rank - 1 - k);
        let db = dim_from_right(b, rank - 1 - k);
        out[k] = match (da, db) {
            (x, y) if x == y => x,
            (1, y) => y,
            (x, 1) => x,
            _ => {
                return Err(IrError::ShapeMismatch {
                    op: op.to_string(),
                    lhs: a.to_vec(),
                    rhs: b.to_vec(),
                });
            }
        };
    }
    Ok(out)
}

fn dim_from_right(shape: &[i64], k: usize) -> i64 {
    if k < shape.len() {
        shape[shape.len() - 1 - k]
    } else {
        1
    }
}

/// Indices into `input` for output coordinates `axes` under broadcasting.
fn broadcast_indices(input: &TensorInput, out_shape: &[i64], axes: &[Var]) -> Vec<Expr> {
    let shape = input.const_shape().unwrap_or_default();
    let offset = out_shape.len() - shape.len();
    shape
        .iter()
        .enumerate()
        .map(|(k, &d)| {
            if d == 1 && out_shape[k + offset] != 1 {
                Expr::int(0)
            } else {
                Expr::var(&axes[k + offset])
            }
        })
        .collect()
}

/// Elementwise `kind` with broadcasting.
pub fn binary(g: &mut FlowGraph, kind: BinaryKind, a: TensorId, b: TensorId) -> Result<TensorId, IrError> {
    let shape = broadcast_shape(kind.name(), &g.tensor(a)?.shape, &g.tensor(b)?.shape)?;
    let inputs = if a == b { vec![a] } else { vec![a, b] };
    g.add_operator(OpKind::Binary(kind), &inputs, |args, out| {
        let (lhs, rhs) = (&args[0], &args[args.len() - 1]);
        compute(out, &shape, &format!("{out}_i"), |ax| {
            let x = lhs.at(broadcast_indices(lhs, &shape, ax));
            let y = rhs.at(broadcast_indices(rhs, &shape, ax));
            match kind {
                BinaryKind::Add => x + y,
                BinaryKind::Sub => x - y,
                BinaryKind::Mul => x * y,
                BinaryKind::Div => x / y,
                BinaryKind::Max => primitives::math("max", vec![x, y]),
            }
        })
    })
}

pub fn add(g: &mut FlowGraph, a: TensorId, b: TensorId) -> Result<TensorId, IrError> {
    binary(g, BinaryKind::Add, a, b)
}

pub fn sub(g: &mut FlowGraph, a: TensorId, b: TensorId) -> Result<TensorId, IrError> {
    binary(g, BinaryKind::Sub, a, b)
}

pub fn mul(g: &mut FlowGraph, a: TensorId, b: TensorId) -> Result<TensorId, IrError> {
    binary(g, BinaryKind::Mul, a, b)
}

pub fn div(g: &mut FlowGraph, a: TensorId, b: TensorId) -> Result<TensorId, IrError> {
    binary(g, BinaryKind::Div, a, b)
}

pub fn maximum(g: &mut FlowGraph, a: TensorId, b: TensorId) -> Result<TensorId, IrError> {
    binary(g, BinaryKind::Max, a, b)
}

fn expect_rank(op: &str, shape: &[i64], rank: usize) -> Result<(), IrError> {
    if shape.len() == rank {
        Ok(())
    } else {
        Err(IrError::InvalidOperand(format!(
            "{op} expects rank {rank}, got shape {shape:?}"
        )))
    }
}

/// `[m, k] x [k, n] -> [m, n]`.
pub fn matmul(g: &mut FlowGraph, a: TensorId, b: TensorId) -> Result<TensorId, IrError> {
    let (sa, sb) = (g.tensor(a)?.shape.clone(), g.tensor(b)?.shape.clone());
    expect_rank("matmul", &sa, 2)?;
    expect_rank("matmul", &sb, 2)?;
    if sa[1] != sb[0] {
        return Err(IrError::ShapeMismatch {
            op: "matmul".into(),
            lhs: sa,
            rhs: sb,
        });
    }
    let inputs = if a == b { vec![a] } else { vec![a, b] };
    g.add_operator(OpKind::MatMul, &inputs, |args, out| {
        let (lhs, rhs) = (&args[0], &args[args.len() - 1]);
        compute(out, &[sa[0], sb[1]], &format!("{out}_i"), |ax| {
            reduce(&[sa[1]], &format!("{out}_k"), ReduceKind::Sum, |k| {
                lhs.at(vec![Expr::var(&ax[0]), Expr::var(&k[0])])
                    * rhs.at(vec![Expr::var(&k[0]), Expr::var(&ax[1])])
            })
        })
    })
}

/// NCHW convolution: `x: [n, c, h, w]`, `w: [o, c, kh, kw]`.
pub fn conv2d(
    g: &mut FlowGraph,
    x: TensorId,
    w: TensorId,
    stride: [i64; 2],
    padding: [i64; 2],
) -> Result<TensorId, IrError> {
    let (sx, sw) = (g.tensor(x)?.shape.clone(), g.tensor(w)?.shape.clone());
    let dtype = g.tensor(x)?.dtype;
    expect_rank("conv2d", &sx, 4)?;
    expect_rank("conv2d", &sw, 4)?;
    if sx[1] != sw[1] || stride.iter().any(|&s| s < 1) || padding.iter().any(|&p| p < 0) {
        return Err(IrError::ShapeMismatch {
            op: "conv2d".into(),
            lhs: sx,
            rhs: sw,
        });
    }
    let oh = (sx[2] + 2 * padding[0] - sw[2]) / stride[0] + 1;
    let ow = (sx[3] + 2 * padding[1] - sw[3]) / stride[1] + 1;
    if oh < 1 || ow < 1 {
        return Err(IrError::ShapeMismatch {
            op: "conv2d".into(),
            lhs: sx,
            rhs: sw,
        });
    }
    let out_shape = [sx[0], sw[0], oh, ow];
    g.add_operator(OpKind::Conv2d { stride, padding }, &[x, w], |args, out| {
        let (input, weight) = (&args[0], &args[1]);
        compute(out, &out_shape, &format!("{out}_i"), |ax| {
            reduce(&[sw[1], sw[2], sw[3]], &format!("{out}_k"), ReduceKind::Sum, |k| {
                let h = Expr::var(&ax[2]) * Expr::int(stride[0]) + Expr::var(&k[1]) - Expr::int(padding[0]);
                let wi = Expr::var(&ax[3]) * Expr::int(stride[1]) + Expr::var(&k[2]) - Expr::int(padding[1]);
                let pixel = input.at(vec![Expr::var(&ax[0]), Expr::var(&k[0]), h.clone(), wi.clone()]);
                let pixel = if padding == [0, 0] {
                    pixel
                } else {
                    let inside = Expr::int(0)
                        .le(h.clone())
                        .and(h.lt(Expr::int(sx[2])))
                        .and(Expr::int(0).le(wi.clone()))
                        .and(wi.lt(Expr::int(sx[3])));
                    Expr::if_then_else(inside, pixel, zero(dtype))
                };
                pixel
                    * weight.at(vec![
                        Expr::var(&ax[1]),
                        Expr::var(&k[0]),
                        Expr::var(&k[1]),
                        Expr::var(&k[2]),
                    ])
            })
        })
    })
}

/// Reduces `x` over `axis`, dropping that dimension.
pub fn reduce_axis(g: &mut FlowGraph, x: TensorId, axis: usize, kind: ReduceKind) -> Result<TensorId, IrError> {
    let shape = g.tensor(x)?.shape.clone();
    if axis >= shape.len() {
        return Err(IrError::InvalidOperand(format!(
            "reduce axis {axis} out of range for shape {shape:?}"
        )));
    }
    let mut out_shape = shape.clone();
    let extent = out_shape.remove(axis);
    g.add_operator(OpKind::Reduce { kind, axis }, &[x], |args, out| {
        compute(out, &out_shape, &format!("{out}_i"), |ax| {
            reduce(&[extent], &format!("{out}_k"), kind, |k| {
                let mut idx = axis_vars(ax);
                idx.insert(axis, Expr::var(&k[0]));
                args[0].at(idx)
            })
        })
    })
}

pub fn reduce_sum(g: &mut FlowGraph, x: TensorId, axis: usize) -> Result<TensorId, IrError> {
    reduce_axis(g, x, axis, ReduceKind::Sum)
}

pub fn reduce_max(g: &mut FlowGraph, x: TensorId, axis: usize) -> Result<TensorId, IrError> {
    reduce_axis(g, x, axis, ReduceKind::Max)
}

pub fn reduce_min(g: &mut FlowGraph, x: TensorId, axis: usize) -> Result<TensorId, IrError> {
    reduce_axis(g, x, axis, ReduceKind::Min)
}

pub fn reduce_avg(g: &mut FlowGraph, x: TensorId, axis: usize) -> Result<TensorId, IrError> {
    reduce_axis(g, x, axis, ReduceKind::Avg)
}
