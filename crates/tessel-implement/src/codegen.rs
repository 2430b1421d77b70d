//! Emission of compute-dialect definitions as loops and stores.

use std::collections::HashMap;

use tessel_ir::{
    ConstValue, DataType, Expr, FunctionBuilder, IrError, ReduceCompute, ReduceKind, Slot, Stmt,
    StmtBuilder, Task, Type, Var, infer_type,
};

/// Parameters created for a task's compute nodes, keyed by node name.
#[derive(Debug, Default)]
pub struct ParamMap {
    vars: HashMap<String, Var>,
}

impl ParamMap {
    /// Declares one function parameter per task parameter, named after the
    /// compute node it binds and typed by the task.
    pub fn declare(fb: &mut FunctionBuilder, task: &Task) -> Result<Self, IrError> {
        let mut vars = HashMap::new();
        for (param, ty) in task.params.iter().zip(&task.param_types) {
            let name = param
                .compute_name()
                .ok_or_else(|| IrError::InvalidOperand(format!("parameter `{param}` of task `{}`", task.name)))?;
            let var = Var::new(name, ty.clone());
            fb.extend_params([var.clone()]);
            vars.insert(name.to_string(), var);
        }
        Ok(Self { vars })
    }

    pub fn get(&self, name: &str) -> Option<&Var> {
        self.vars.get(name)
    }
}

fn scalar_dtype(e: &Expr) -> Result<DataType, IrError> {
    match infer_type(e)? {
        Type::Scalar(Slot::Known(d)) => Ok(d),
        other => Err(IrError::Unresolved {
            what: format!("scalar type of `{e}` ({other})"),
        }),
    }
}

/// Rewrites compute-dialect values into plain expressions, hoisting every
/// reduction into an accumulator loop.
pub struct ValueLowering<'a> {
    fb: &'a mut FunctionBuilder,
    params: &'a ParamMap,
}

impl<'a> ValueLowering<'a> {
    pub fn new(fb: &'a mut FunctionBuilder, params: &'a ParamMap) -> Self {
        Self { fb, params }
    }

    fn input(&self, name: &str) -> Result<Expr, IrError> {
        self.params
            .get(name)
            .map(Expr::var)
            .ok_or_else(|| IrError::InvalidOperand(format!("`{name}` is not a task parameter")))
    }

    /// Returns the statements that must run first and the lowered value.
    pub fn lower(&mut self, e: &Expr) -> Result<(Vec<Stmt>, Expr), IrError> {
        match e {
            Expr::TensorInput(t) => Ok((Vec::new(), self.input(&t.name)?)),
            Expr::ScalarInput(s) => Ok((Vec::new(), self.input(&s.name)?)),
            Expr::ReduceCompute(r) => self.reduction(r),
            Expr::TensorCompute(c) => Err(IrError::InvalidOperand(format!(
                "nested tensor compute `{}`",
                c.name
            ))),
            other => {
                let mut prelude = Vec::new();
                let mut failed = None;
                let lowered = other.clone().map_children(&mut |child| match self.lower(&child) {
                    Ok((pre, value)) => {
                        prelude.extend(pre);
                        value
                    }
                    Err(err) => {
                        failed.get_or_insert(err);
                        child
                    }
                });
                match failed {
                    Some(err) => Err(err),
                    None => Ok((prelude, lowered)),
                }
            }
        }
    }

    fn reduction(&mut self, r: &ReduceCompute) -> Result<(Vec<Stmt>, Expr), IrError> {
        let dtype = scalar_dtype(&r.value)?;
        let acc = self.fb.declare_local("acc", Type::scalar(dtype));
        let (inner, value) = self.lower(&r.value)?;

        let mut body = inner;
        body.push(Stmt::Assign {
            var: acc.clone(),
            value: r.kind.combine(Expr::var(&acc), value),
        });
        let mut sb = StmtBuilder::new();
        sb.append(Stmt::Assign {
            var: acc.clone(),
            value: Expr::constant(r.kind.init(dtype), dtype),
        });
        for (axis, extent) in r.axes.iter().zip(&r.shape) {
            sb.enter_for(axis.clone(), extent.clone());
        }
        for stmt in body {
            sb.append(stmt);
        }
        for _ in &r.axes {
            sb.exit();
        }
        if r.kind == ReduceKind::Avg {
            let count = r
                .const_shape()
                .map(|s| s.iter().product::<i64>())
                .ok_or_else(|| IrError::Unresolved {
                    what: "extent of an average reduction".into(),
                })?;
            sb.append(Stmt::Assign {
                var: acc.clone(),
                value: Expr::var(&acc) / Expr::constant(ConstValue::Int(count), dtype),
            });
        }
        Ok((vec![sb.finish()], Expr::var(&acc)))
    }
}

/// Row-major coordinates of flat index `flat` within `shape`.
pub fn unravel(flat: &Expr, shape: &[i64]) -> Vec<Expr> {
    let mut coords = Vec::with_capacity(shape.len());
    let mut stride: i64 = shape.iter().product();
    for (k, &extent) in shape.iter().enumerate() {
        stride /= extent.max(1);
        let scaled = if stride == 1 {
            flat.clone()
        } else {
            flat.clone() / Expr::int(stride)
        };
        coords.push(if k == 0 { scaled } else { scaled % Expr::int(extent) });
    }
    coords
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_ir::{TensorInput, Worker, compute, reduce};

    #[test]
    fn unravel_row_major() {
        let i = Expr::var(&Var::int("i"));
        assert_eq!(unravel(&i, &[8]), vec![i.clone()]);
        assert_eq!(
            unravel(&i, &[2, 3, 4]),
            vec![
                i.clone() / Expr::int(12),
                (i.clone() / Expr::int(4)) % Expr::int(3),
                i.clone() % Expr::int(4),
            ]
        );
    }

    #[test]
    fn reductions_become_accumulator_loops() {
        let a = TensorInput::new("t0", DataType::Float32, &[2, 3]);
        let c = compute("t1", &[2], "t1_i", |ax| {
            reduce(&[3], "t1_k", ReduceKind::Avg, |k| a.at(vec![Expr::var(&ax[0]), Expr::var(&k[0])]))
        });
        let task = Task::from_compute("reduce_t1", vec![a], c, Worker::grid(1, 256)).unwrap();
        let mut fb = FunctionBuilder::new("f", Worker::grid(1, 256));
        let params = ParamMap::declare(&mut fb, &task).unwrap();
        let (prelude, value) = ValueLowering::new(&mut fb, &params).lower(&task.computation.value).unwrap();
        assert_eq!(value, Expr::var(&Var::new("acc", Type::scalar(DataType::Float32))));
        assert_eq!(prelude.len(), 1);
        let text = prelude[0].to_string();
        assert!(text.contains("acc = 0"), "{text}");
        assert!(text.contains("for t1_k0 in range(3)"), "{text}");
        assert!(text.contains("acc = (acc + t0[t1_i0, t1_k0])"), "{text}");
        assert!(text.contains("acc = (acc / 3"), "{text}");

        let f = fb.finish();
        assert_eq!(f.local_vars.len(), 1);
        assert_eq!(f.params.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(), ["t0", "t1"]);
    }
}
