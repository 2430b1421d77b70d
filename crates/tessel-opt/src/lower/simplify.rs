use tessel_ir::{
    BinaryOp, ConstValue, Constant, DataType, Expr, IRModule, Slot, Stmt, Type, infer_type,
    primitives,
};

use super::{ModuleTransform, Stage};
use crate::error::PassError;
use crate::eval::{fold_binary, fold_call, fold_unary, truthy};

/// Folds constant scalar arithmetic and removes algebraic identities.
#[derive(Debug)]
pub struct ConstSimplify;

fn constant(e: &Expr) -> Option<Constant> {
    match e {
        Expr::Constant(c) => Some(*c),
        _ => None,
    }
}

fn is_value(e: &Expr, v: f64) -> bool {
    constant(e).is_some_and(|c| c.dtype != DataType::Bool && c.value.as_f64() == v)
}

fn is_integer(e: &Expr) -> Option<DataType> {
    match infer_type(e) {
        Ok(Type::Scalar(Slot::Known(d))) if d.is_integer() => Some(d),
        _ => None,
    }
}

fn result_dtype(op: BinaryOp, a: DataType, b: DataType) -> DataType {
    if op.is_comparison() || op.is_logical() {
        DataType::Bool
    } else {
        a.promote(b)
    }
}

/// `e` as a truth value, cast when its type is not already `bool`.
fn as_bool(e: Expr) -> Expr {
    match infer_type(&e) {
        Ok(Type::Scalar(Slot::Known(DataType::Bool))) => e,
        _ => Expr::cast(e, Type::scalar(DataType::Bool)),
    }
}

fn simplify_binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    if let (Some(a), Some(b)) = (constant(&lhs), constant(&rhs)) {
        if let Some(v) = fold_binary(op, a.value, b.value) {
            return Expr::constant(v, result_dtype(op, a.dtype, b.dtype));
        }
    }
    match op {
        BinaryOp::Add if is_value(&rhs, 0.0) => lhs,
        BinaryOp::Add if is_value(&lhs, 0.0) => rhs,
        BinaryOp::Sub if is_value(&rhs, 0.0) => lhs,
        BinaryOp::Mul if is_value(&rhs, 1.0) => lhs,
        BinaryOp::Mul if is_value(&lhs, 1.0) => rhs,
        BinaryOp::Mul if is_value(&rhs, 0.0) || is_value(&lhs, 0.0) => {
            let (x, zero) = if is_value(&rhs, 0.0) { (&lhs, &rhs) } else { (&rhs, &lhs) };
            match (is_integer(x), constant(zero)) {
                (Some(dtype), Some(z)) if z.dtype.is_integer() => Expr::constant(ConstValue::Int(0), dtype),
                _ => Expr::binary(op, lhs, rhs),
            }
        }
        BinaryOp::Div if is_value(&rhs, 1.0) => lhs,
        BinaryOp::Mod if is_value(&rhs, 1.0) && constant(&rhs).is_some_and(|c| c.dtype.is_integer()) => {
            match is_integer(&lhs) {
                Some(dtype) => Expr::constant(ConstValue::Int(0), dtype),
                None => Expr::binary(op, lhs, rhs),
            }
        }
        BinaryOp::And | BinaryOp::Or => {
            let absorbing = op == BinaryOp::Or;
            match (constant(&lhs), constant(&rhs)) {
                (Some(c), _) if truthy(c.value) == absorbing => Expr::bool(absorbing),
                (_, Some(c)) if truthy(c.value) == absorbing => Expr::bool(absorbing),
                (Some(_), _) => as_bool(rhs),
                (_, Some(_)) => as_bool(lhs),
                _ => Expr::binary(op, lhs, rhs),
            }
        }
        _ => Expr::binary(op, lhs, rhs),
    }
}

/// Simplifies a node whose children are already simplified.
pub(crate) fn simplify_node(e: Expr) -> Expr {
    match e {
        Expr::Binary { op, lhs, rhs } => simplify_binary(op, *lhs, *rhs),
        Expr::Unary { op, expr } => match constant(&expr).and_then(|c| fold_unary(op, c.value).map(|v| (c, v))) {
            Some((c, ConstValue::Bool(b))) if c.dtype != DataType::Bool => Expr::bool(b),
            Some((c, v)) => Expr::constant(v, c.dtype),
            None => Expr::Unary { op, expr },
        },
        Expr::IfThenElse {
            cond,
            then_expr,
            else_expr,
        } => match constant(&cond) {
            Some(c) if truthy(c.value) => *then_expr,
            Some(_) => *else_expr,
            None => Expr::IfThenElse {
                cond,
                then_expr,
                else_expr,
            },
        },
        Expr::Cast { expr, target } => match (constant(&expr), &target) {
            (Some(c), Type::Scalar(Slot::Known(dtype))) => Expr::constant(c.value, *dtype),
            _ => Expr::Cast { expr, target },
        },
        Expr::Call { func, args } if primitives::MATH_INTRINSICS.contains(&func.as_str()) => {
            let consts: Option<Vec<Constant>> = args.iter().map(constant).collect();
            let folded = consts.and_then(|cs| {
                let values: Vec<ConstValue> = cs.iter().map(|c| c.value).collect();
                Some((fold_call(&func, &values)?, cs.first()?.dtype))
            });
            match folded {
                Some((v, dtype)) => Expr::constant(v, dtype),
                None => Expr::Call { func, args },
            }
        }
        other => other,
    }
}

/// Bottom-up constant folding of an expression.
pub(crate) fn fold_expr(e: Expr) -> Expr {
    e.rewrite_post(&mut simplify_node)
}

fn push_flat(out: &mut Vec<Stmt>, s: Stmt) {
    match s {
        Stmt::Seq(stmts) => {
            for s in stmts {
                push_flat(out, s);
            }
        }
        other => out.push(other),
    }
}

/// Statement-level simplification of a node whose children are already
/// simplified.
pub(crate) fn simplify_stmt(s: Stmt) -> Stmt {
    match s {
        Stmt::If {
            cond,
            then_body,
            else_body,
        } => match constant(&cond) {
            Some(c) if truthy(c.value) => *then_body,
            Some(_) => else_body.map_or_else(|| Stmt::Seq(Vec::new()), |b| *b),
            None => Stmt::If {
                cond,
                then_body,
                else_body,
            },
        },
        Stmt::For { extent, .. } if constant(&extent).is_some_and(|c| c.value.as_f64() <= 0.0) => {
            Stmt::Seq(Vec::new())
        }
        Stmt::Assert { cond, .. } if constant(&cond).is_some_and(|c| truthy(c.value)) => {
            Stmt::Seq(Vec::new())
        }
        Stmt::Seq(stmts) => {
            let mut flat = Vec::with_capacity(stmts.len());
            for s in stmts {
                push_flat(&mut flat, s);
            }
            Stmt::seq(flat)
        }
        other => other,
    }
}

impl ModuleTransform for ConstSimplify {
    fn name(&self) -> &str {
        "const_simplify"
    }

    fn stage(&self) -> Stage {
        Stage::ConstSimplify
    }

    fn run(&self, module: IRModule) -> Result<IRModule, PassError> {
        let mut out = IRModule::new();
        for mut func in module {
            func.body = func.body.map(&mut simplify_stmt, &mut fold_expr);
            out.add(func)?;
        }
        Ok(out)
    }
}
