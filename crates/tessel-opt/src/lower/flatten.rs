use std::collections::HashMap;

use tessel_ir::{Expr, Function, IRModule, Stmt, TensorType, Type, Var};

use super::{ModuleTransform, Stage};
use crate::error::PassError;

/// Rewrites multi-dimensional tensor parameters and locals into 1-D buffers
/// addressed by `sum(index_k * stride_k)`.
#[derive(Debug)]
pub struct FlattenTensors;

struct Flattened {
    var: Var,
    strides: Vec<Expr>,
}

/// Number of elements the flat buffer must hold.
fn flat_extent(ty: &TensorType, strides: &[Expr]) -> Option<Expr> {
    let shape = ty.shape.as_ref()?;
    if ty.strides.is_some() {
        let mut span = Expr::int(1);
        for (dim, stride) in shape.iter().zip(strides) {
            span = span + (dim.clone() - Expr::int(1)) * stride.clone();
        }
        return Some(super::simplify::fold_expr(span));
    }
    let extent = shape
        .iter()
        .cloned()
        .reduce(|acc, d| acc * d)
        .unwrap_or_else(|| Expr::int(1));
    Some(super::simplify::fold_expr(extent))
}

fn flatten_var(var: &Var) -> Option<Flattened> {
    let Type::Tensor(ty) = &var.ty else {
        return None;
    };
    if ty.rank()? <= 1 && ty.strides.is_none() {
        return None;
    }
    let strides = ty.effective_strides()?;
    let extent = flat_extent(ty, &strides)?;
    let flat = TensorType {
        scope: ty.scope.clone(),
        dtype: ty.dtype.clone(),
        shape: Some(vec![extent]),
        strides: None,
    };
    Some(Flattened {
        var: Var::new(var.name.clone(), Type::Tensor(flat)),
        strides,
    })
}

fn linear_index(indices: Vec<Expr>, strides: &[Expr]) -> Expr {
    indices
        .into_iter()
        .zip(strides)
        .map(|(index, stride)| match stride.as_int() {
            Some(1) => index,
            _ => index * stride.clone(),
        })
        .reduce(|acc, term| acc + term)
        .unwrap_or_else(|| Expr::int(0))
}

fn flatten_function(mut func: Function) -> Function {
    let mut map: HashMap<String, Flattened> = HashMap::new();
    for var in func.params.iter_mut().chain(func.local_vars.iter_mut()) {
        if let Some(flat) = flatten_var(var) {
            *var = flat.var.clone();
            map.insert(var.name.clone(), flat);
        }
    }
    if map.is_empty() {
        return func;
    }
    let rewrite = |buf: &Expr, indices: Vec<Expr>| -> Vec<Expr> {
        let flat = match buf {
            Expr::Var(v) => map.get(&v.name),
            _ => None,
        };
        match flat {
            Some(flat) if indices.len() == flat.strides.len() => {
                vec![linear_index(indices, &flat.strides)]
            }
            _ => indices,
        }
    };
    let mut fe = |e: Expr| {
        e.rewrite_post(&mut |n| match n {
            Expr::Var(v) => match map.get(&v.name) {
                Some(flat) => Expr::Var(flat.var.clone()),
                None => Expr::Var(v),
            },
            Expr::TensorElement { base, indices } => {
                let indices = rewrite(&base, indices);
                Expr::TensorElement { base, indices }
            }
            other => other,
        })
    };
    let mut fs = |s: Stmt| match s {
        Stmt::BufferStore {
            buf,
            indices,
            value,
        } => {
            let indices = rewrite(&buf, indices);
            Stmt::BufferStore {
                buf,
                indices,
                value,
            }
        }
        other => other,
    };
    func.body = func.body.map(&mut fs, &mut fe);
    func
}

impl ModuleTransform for FlattenTensors {
    fn name(&self) -> &str {
        "flatten_tensors"
    }

    fn stage(&self) -> Stage {
        Stage::Flatten
    }

    fn run(&self, module: IRModule) -> Result<IRModule, PassError> {
        let mut out = IRModule::new();
        for func in module {
            out.add(flatten_function(func))?;
        }
        Ok(out)
    }
}
