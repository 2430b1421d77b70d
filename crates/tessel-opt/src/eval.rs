//! Reference interpreter for the compute dialect.
//!
//! Used by constant folding to evaluate operators whose inputs are all
//! known at compile time, and by tests to check that graph rewrites
//! preserve results. The scalar folding helpers are shared with the
//! module-level simplifiers.

use std::cmp::Ordering;
use std::collections::HashMap;

use ndarray::{ArrayD, IxDyn};
use tessel_ir::graph::TensorSource;
use tessel_ir::{
    BinaryOp, ConstValue, DataType, Expr, FlowGraph, ReduceCompute, ReduceKind, Slot, TensorCompute,
    Type, UnaryOp, Var,
};

use crate::error::PassError;

fn eval_err(msg: impl Into<String>) -> PassError {
    PassError::Eval(msg.into())
}

pub fn truthy(v: ConstValue) -> bool {
    v.as_f64() != 0.0
}

fn compare(a: ConstValue, b: ConstValue) -> Option<Ordering> {
    match (a, b) {
        (ConstValue::Int(x), ConstValue::Int(y)) => Some(x.cmp(&y)),
        _ => a.as_f64().partial_cmp(&b.as_f64()),
    }
}

/// Folds `a op b`. Returns `None` for undefined results such as division by
/// zero or bitwise operations on floats.
pub fn fold_binary(op: BinaryOp, a: ConstValue, b: ConstValue) -> Option<ConstValue> {
    use ConstValue::{Bool, Float, Int};
    let ord = || compare(a, b);
    Some(match op {
        BinaryOp::And => Bool(truthy(a) && truthy(b)),
        BinaryOp::Or => Bool(truthy(a) || truthy(b)),
        BinaryOp::Lt => Bool(ord()? == Ordering::Less),
        BinaryOp::Le => Bool(ord()? != Ordering::Greater),
        BinaryOp::Eq => Bool(ord()? == Ordering::Equal),
        BinaryOp::Ne => Bool(ord()? != Ordering::Equal),
        _ => match (a, b) {
            (Int(x), Int(y)) => Int(match op {
                BinaryOp::Add => x.wrapping_add(y),
                BinaryOp::Sub => x.wrapping_sub(y),
                BinaryOp::Mul => x.wrapping_mul(y),
                BinaryOp::Div => x.checked_div(y)?,
                BinaryOp::Mod => x.checked_rem(y)?,
                BinaryOp::BitAnd => x & y,
                BinaryOp::BitOr => x | y,
                BinaryOp::Shl => x.checked_shl(u32::try_from(y).ok()?)?,
                BinaryOp::Shr => x.checked_shr(u32::try_from(y).ok()?)?,
                _ => return None,
            }),
            (Bool(_), Bool(_)) => return None,
            _ => {
                let (x, y) = (a.as_f64(), b.as_f64());
                Float(match op {
                    BinaryOp::Add => x + y,
                    BinaryOp::Sub => x - y,
                    BinaryOp::Mul => x * y,
                    BinaryOp::Div => x / y,
                    BinaryOp::Mod => x % y,
                    _ => return None,
                })
            }
        },
    })
}

pub fn fold_unary(op: UnaryOp, v: ConstValue) -> Option<ConstValue> {
    match (op, v) {
        (UnaryOp::Not, v) => Some(ConstValue::Bool(!truthy(v))),
        (UnaryOp::Neg, ConstValue::Int(i)) => Some(ConstValue::Int(i.wrapping_neg())),
        (UnaryOp::Neg, ConstValue::Float(f)) => Some(ConstValue::Float(-f)),
        (UnaryOp::BitNot, ConstValue::Int(i)) => Some(ConstValue::Int(!i)),
        _ => None,
    }
}

/// Folds a call to a math intrinsic.
pub fn fold_call(func: &str, args: &[ConstValue]) -> Option<ConstValue> {
    use ConstValue::{Float, Int};
    match (func, args) {
        ("abs", [Int(i)]) => Some(Int(i.wrapping_abs())),
        ("max", [Int(x), Int(y)]) => Some(Int(*x.max(y))),
        ("min", [Int(x), Int(y)]) => Some(Int(*x.min(y))),
        ("max", [x, y]) => Some(Float(x.as_f64().max(y.as_f64()))),
        ("min", [x, y]) => Some(Float(x.as_f64().min(y.as_f64()))),
        (_, [x]) => {
            let x = x.as_f64();
            Some(Float(match func {
                "abs" => x.abs(),
                "exp" => x.exp(),
                "log" => x.ln(),
                "sqrt" => x.sqrt(),
                "tanh" => x.tanh(),
                "sigmoid" => 1.0 / (1.0 + (-x).exp()),
                _ => return None,
            }))
        }
        _ => None,
    }
}

/// Calls `f` with every coordinate of `shape` in row-major order.
pub(crate) fn for_each_point(
    shape: &[i64],
    mut f: impl FnMut(&[i64]) -> Result<(), PassError>,
) -> Result<(), PassError> {
    if shape.iter().any(|&d| d <= 0) {
        return Ok(());
    }
    let mut point = vec![0i64; shape.len()];
    loop {
        f(&point)?;
        let mut k = shape.len();
        loop {
            if k == 0 {
                return Ok(());
            }
            k -= 1;
            point[k] += 1;
            if point[k] < shape[k] {
                break;
            }
            point[k] = 0;
        }
    }
}

struct Evaluator<'a> {
    inputs: &'a HashMap<String, ArrayD<f64>>,
    env: HashMap<String, ConstValue>,
}

impl<'a> Evaluator<'a> {
    fn new(inputs: &'a HashMap<String, ArrayD<f64>>) -> Self {
        Self {
            inputs,
            env: HashMap::new(),
        }
    }

    /// Runs `f` with `vars` bound to `values`, restoring shadowed bindings after.
    fn scoped<T>(
        &mut self,
        vars: &[Var],
        values: &[ConstValue],
        f: impl FnOnce(&mut Self) -> Result<T, PassError>,
    ) -> Result<T, PassError> {
        let saved: Vec<(String, Option<ConstValue>)> = vars
            .iter()
            .zip(values)
            .map(|(var, &value)| (var.name.clone(), self.env.insert(var.name.clone(), value)))
            .collect();
        let out = f(self);
        for (name, prev) in saved.into_iter().rev() {
            match prev {
                Some(p) => self.env.insert(name, p),
                None => self.env.remove(&name),
            };
        }
        out
    }

    fn index(&mut self, e: &Expr) -> Result<usize, PassError> {
        match self.eval(e)? {
            ConstValue::Int(i) => usize::try_from(i).map_err(|_| eval_err(format!("negative index {i} in `{e}`"))),
            other => Err(eval_err(format!("non-integer index {other} in `{e}`"))),
        }
    }

    fn eval(&mut self, e: &Expr) -> Result<ConstValue, PassError> {
        match e {
            Expr::Var(v) => self
                .env
                .get(&v.name)
                .copied()
                .ok_or_else(|| eval_err(format!("unbound variable `{}`", v.name))),
            Expr::Constant(c) => Ok(c.value),
            Expr::Unary { op, expr } => {
                let v = self.eval(expr)?;
                fold_unary(*op, v).ok_or_else(|| eval_err(format!("cannot evaluate `{e}`")))
            }
            Expr::Binary { op, lhs, rhs } => {
                let a = self.eval(lhs)?;
                let b = self.eval(rhs)?;
                fold_binary(*op, a, b).ok_or_else(|| eval_err(format!("cannot evaluate `{e}` ({a}, {b})")))
            }
            Expr::Let { var, value, body } => {
                let v = self.eval(value)?;
                self.scoped(std::slice::from_ref(var), &[v], |s| s.eval(body))
            }
            Expr::IfThenElse {
                cond,
                then_expr,
                else_expr,
            } => {
                if truthy(self.eval(cond)?) {
                    self.eval(then_expr)
                } else {
                    self.eval(else_expr)
                }
            }
            Expr::TensorElement { base, indices } => {
                let Expr::TensorInput(t) = &**base else {
                    return Err(eval_err(format!("cannot index `{base}`")));
                };
                let inputs = self.inputs;
                let array = inputs
                    .get(&t.name)
                    .ok_or_else(|| eval_err(format!("no value for tensor `{}`", t.name)))?;
                let idx = indices
                    .iter()
                    .map(|i| self.index(i))
                    .collect::<Result<Vec<_>, _>>()?;
                let v = array
                    .get(idx.as_slice())
                    .copied()
                    .ok_or_else(|| eval_err(format!("index {idx:?} out of bounds for `{}`", t.name)))?;
                let dtype = t.dtype.known().copied().unwrap_or(DataType::Float32);
                Ok(ConstValue::Float(v).cast(dtype))
            }
            Expr::Call { func, args } => {
                let values = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                fold_call(func, &values).ok_or_else(|| eval_err(format!("cannot evaluate call `{e}`")))
            }
            Expr::Cast { expr, target } => {
                let v = self.eval(expr)?;
                match target {
                    Type::Scalar(Slot::Known(dtype)) => Ok(v.cast(*dtype)),
                    other => Err(eval_err(format!("cannot cast to {other}"))),
                }
            }
            Expr::ReduceCompute(r) => self.reduce(r),
            other => Err(eval_err(format!("cannot evaluate `{other}`"))),
        }
    }

    fn reduce(&mut self, r: &ReduceCompute) -> Result<ConstValue, PassError> {
        let shape = r
            .const_shape()
            .ok_or_else(|| eval_err("reduction with symbolic extent"))?;
        let mut acc: Option<ConstValue> = None;
        let mut count = 0i64;
        for_each_point(&shape, |point| {
            let coords: Vec<ConstValue> = point.iter().map(|&i| ConstValue::Int(i)).collect();
            let v = self.scoped(&r.axes, &coords, |s| s.eval(&r.value))?;
            acc = Some(match acc {
                None => v,
                Some(a) => combine(r.kind, a, v).ok_or_else(|| eval_err("reduction combine failed"))?,
            });
            count += 1;
            Ok(())
        })?;
        Ok(match (r.kind, acc) {
            (kind, None) => kind.init(DataType::Float32),
            (ReduceKind::Avg, Some(ConstValue::Int(sum))) => ConstValue::Int(sum / count),
            (ReduceKind::Avg, Some(sum)) => ConstValue::Float(sum.as_f64() / count as f64),
            (_, Some(a)) => a,
        })
    }
}

fn combine(kind: ReduceKind, acc: ConstValue, v: ConstValue) -> Option<ConstValue> {
    match kind {
        ReduceKind::Sum | ReduceKind::Avg => fold_binary(BinaryOp::Add, acc, v),
        ReduceKind::Max => fold_call("max", &[acc, v]),
        ReduceKind::Min => fold_call("min", &[acc, v]),
    }
}

/// Evaluates `computation` with its tensor inputs taken from `inputs` by name.
pub fn evaluate(
    computation: &TensorCompute,
    inputs: &HashMap<String, ArrayD<f64>>,
) -> Result<ArrayD<f64>, PassError> {
    let shape = computation
        .const_shape()
        .ok_or_else(|| eval_err(format!("`{}` has a symbolic shape", computation.name)))?;
    let dims = shape
        .iter()
        .map(|&d| usize::try_from(d))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| eval_err(format!("`{}` has a negative extent", computation.name)))?;
    let mut out = ArrayD::<f64>::zeros(IxDyn(&dims));
    let mut ev = Evaluator::new(inputs);
    for_each_point(&shape, |point| {
        let coords: Vec<ConstValue> = point.iter().map(|&i| ConstValue::Int(i)).collect();
        let v = ev.scoped(&computation.axes, &coords, |s| s.eval(&computation.value))?;
        let idx: Vec<usize> = point.iter().map(|&i| i as usize).collect();
        out[idx.as_slice()] = v.as_f64();
        Ok(())
    })?;
    Ok(out)
}

/// Evaluates every operator of `graph` and returns its outputs in order.
/// `inputs` is keyed by graph input name.
pub fn evaluate_graph(
    graph: &FlowGraph,
    inputs: &HashMap<String, ArrayD<f64>>,
) -> Result<Vec<ArrayD<f64>>, PassError> {
    let mut values: HashMap<String, ArrayD<f64>> = HashMap::new();
    for (id, info) in graph.tensors() {
        match &info.source {
            TensorSource::Input { name } => {
                let value = inputs
                    .get(name)
                    .ok_or_else(|| eval_err(format!("missing graph input `{name}`")))?;
                values.insert(id.name(), value.clone());
            }
            TensorSource::Constant(value) => {
                values.insert(id.name(), value.clone());
            }
            TensorSource::Operator => {}
        }
    }
    for op in graph.nodes() {
        let out = evaluate(op.computation(), &values)?;
        values.insert(op.output.name(), out);
    }
    graph
        .outputs()
        .iter()
        .map(|t| {
            values
                .get(&t.name())
                .cloned()
                .ok_or_else(|| eval_err(format!("output {t} was never computed")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn, array};
    use tessel_ir::ops;

    fn arr(shape: &[usize], data: Vec<f64>) -> ArrayD<f64> {
        ArrayD::from_shape_vec(IxDyn(shape), data).unwrap()
    }

    #[test]
    fn fold_integer_arithmetic() {
        let (a, b) = (ConstValue::Int(7), ConstValue::Int(2));
        assert_eq!(fold_binary(BinaryOp::Div, a, b), Some(ConstValue::Int(3)));
        assert_eq!(fold_binary(BinaryOp::Mod, a, b), Some(ConstValue::Int(1)));
        assert_eq!(fold_binary(BinaryOp::Lt, a, b), Some(ConstValue::Bool(false)));
        assert_eq!(fold_binary(BinaryOp::Div, a, ConstValue::Int(0)), None);
    }

    #[test]
    fn fold_float_and_calls() {
        let v = fold_binary(BinaryOp::Mul, ConstValue::Float(1.5), ConstValue::Float(2.0));
        assert_eq!(v, Some(ConstValue::Float(3.0)));
        assert_eq!(fold_call("max", &[ConstValue::Float(-1.0), ConstValue::Float(0.0)]), Some(ConstValue::Float(0.0)));
        assert_eq!(fold_call("sigmoid", &[ConstValue::Float(0.0)]), Some(ConstValue::Float(0.5)));
        assert_eq!(fold_call("unknown", &[ConstValue::Float(0.0)]), None);
    }

    #[test]
    fn evaluates_matmul_relu() {
        let mut g = FlowGraph::new();
        let a = ops::input(&mut g, "a", DataType::Float32, &[2, 2]);
        let b = ops::input(&mut g, "b", DataType::Float32, &[2, 2]);
        let c = ops::matmul(&mut g, a, b).unwrap();
        let d = ops::relu(&mut g, c).unwrap();
        g.mark_output(d);
        let inputs = HashMap::from([
            ("a".to_string(), array![[1.0, -2.0], [3.0, 4.0]].into_dyn()),
            ("b".to_string(), array![[1.0, 0.0], [0.0, 1.0]].into_dyn()),
        ]);
        let out = evaluate_graph(&g, &inputs).unwrap();
        assert_eq!(out[0], array![[1.0, 0.0], [3.0, 4.0]].into_dyn());
    }

    #[test]
    fn evaluates_reductions() {
        let mut g = FlowGraph::new();
        let x = ops::input(&mut g, "x", DataType::Float32, &[2, 3]);
        let s = ops::reduce_sum(&mut g, x, 1).unwrap();
        let m = ops::reduce_avg(&mut g, x, 0).unwrap();
        g.mark_output(s);
        g.mark_output(m);
        let inputs = HashMap::from([("x".to_string(), arr(&[2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]))]);
        let out = evaluate_graph(&g, &inputs).unwrap();
        assert_eq!(out[0], arr(&[2], vec![6.0, 15.0]));
        assert_eq!(out[1], arr(&[3], vec![2.5, 3.5, 4.5]));
    }

    #[test]
    fn padded_conv_reads_zeros_outside() {
        let mut g = FlowGraph::new();
        let x = ops::input(&mut g, "x", DataType::Float32, &[1, 1, 2, 2]);
        let w = ops::constant(&mut g, ArrayD::from_elem(IxDyn(&[1, 1, 3, 3]), 1.0), DataType::Float32);
        let y = ops::conv2d(&mut g, x, w, [1, 1], [1, 1]).unwrap();
        g.mark_output(y);
        let inputs = HashMap::from([("x".to_string(), arr(&[1, 1, 2, 2], vec![1.0, 2.0, 3.0, 4.0]))]);
        let out = evaluate_graph(&g, &inputs).unwrap();
        // Every 3x3 window covers the whole 2x2 input.
        assert_eq!(out[0], ArrayD::from_elem(IxDyn(&[1, 1, 2, 2]), 10.0));
    }

    #[test]
    fn missing_input_is_reported() {
        let mut g = FlowGraph::new();
        let x = ops::input(&mut g, "x", DataType::Float32, &[2]);
        let y = ops::neg(&mut g, x).unwrap();
        g.mark_output(y);
        let err = evaluate_graph(&g, &HashMap::new()).unwrap_err();
        assert!(matches!(err, PassError::Eval(ref m) if m.contains("`x`")));
    }
}
