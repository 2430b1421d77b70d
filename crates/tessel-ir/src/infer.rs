//! Type inference for expressions.

use crate::error::IrError;
use crate::expr::{Expr, UnaryOp};
use crate::primitives;
use crate::types::{DataType, MemoryScope, ScalarType, Slot, TensorType, Type};

/// Infers the type of `expr`.
///
/// Operands of a binary node must agree in resolved scalar type; a hole on
/// one side takes the other side's type.
pub fn infer_type(expr: &Expr) -> Result<Type, IrError> {
    match expr {
        Expr::Var(v) => Ok(v.ty.clone()),
        Expr::Constant(c) => Ok(Type::scalar(c.dtype)),
        Expr::Unary { op, expr } => {
            let ty = scalar_of(expr)?;
            Ok(match op {
                UnaryOp::Not => Type::scalar(DataType::Bool),
                UnaryOp::Neg | UnaryOp::BitNot => Type::Scalar(ty),
            })
        }
        Expr::Binary { op, lhs, rhs } => {
            let unified = unify(op.symbol(), scalar_of(lhs)?, scalar_of(rhs)?)?;
            if op.is_comparison() || op.is_logical() {
                Ok(Type::scalar(DataType::Bool))
            } else {
                Ok(Type::Scalar(unified))
            }
        }
        Expr::Let { body, .. } => infer_type(body),
        Expr::IfThenElse {
            then_expr,
            else_expr,
            ..
        } => {
            let then_ty = scalar_of(then_expr)?;
            let else_ty = scalar_of(else_expr)?;
            unify("if_then_else", then_ty, else_ty).map(Type::Scalar)
        }
        Expr::TensorElement { base, .. } => match infer_type(base)? {
            Type::Tensor(t) | Type::TensorPointer(t) => Ok(Type::Scalar(t.dtype)),
            Type::Pointer(inner) => Ok(*inner),
            other => Err(IrError::InvalidOperand(format!(
                "cannot index a value of type {other}"
            ))),
        },
        Expr::Call { func, args } => match func.as_str() {
            primitives::THREAD_IDX | primitives::BLOCK_IDX | primitives::BLOCK_DIM => {
                Ok(Type::scalar(DataType::Int32))
            }
            name if primitives::MATH_INTRINSICS.contains(&name) => match args.first() {
                Some(first) => infer_type(first),
                None => Ok(Type::scalar(DataType::Float32)),
            },
            _ => Ok(Type::Void),
        },
        Expr::Cast { target, .. } => Ok(target.clone()),
        Expr::Dereference(inner) => match infer_type(inner)? {
            Type::Pointer(t) | Type::Reference(t) => Ok(*t),
            Type::TensorPointer(t) => Ok(Type::Tensor(t)),
            other => Err(IrError::InvalidOperand(format!(
                "cannot dereference a value of type {other}"
            ))),
        },
        Expr::Address(inner) => Ok(Type::pointer(infer_type(inner)?)),
        Expr::Reference(inner) => Ok(Type::Reference(Box::new(infer_type(inner)?))),
        Expr::ScalarInput(s) => Ok(Type::Scalar(s.dtype.clone())),
        Expr::TensorInput(t) => Ok(Type::Tensor(TensorType {
            scope: Slot::Known(MemoryScope::Global),
            dtype: t.dtype.clone(),
            shape: t.shape.clone(),
            strides: None,
        })),
        Expr::TensorCompute(c) => Ok(Type::Tensor(TensorType {
            scope: Slot::Known(MemoryScope::Global),
            dtype: scalar_of(&c.value)?,
            shape: Some(c.shape.clone()),
            strides: None,
        })),
        Expr::ReduceCompute(r) => infer_type(&r.value),
        Expr::Any(_) | Expr::ComputePattern(_) | Expr::ReducePattern(_) => Err(IrError::Unresolved {
            what: "pattern wildcard has no type".into(),
        }),
    }
}

fn scalar_of(expr: &Expr) -> Result<ScalarType, IrError> {
    match infer_type(expr)? {
        Type::Scalar(s) => Ok(s),
        other => Err(IrError::InvalidOperand(format!(
            "expected a scalar, found {other}"
        ))),
    }
}

fn unify(op: &str, lhs: ScalarType, rhs: ScalarType) -> Result<ScalarType, IrError> {
    match (&lhs, &rhs) {
        (Slot::Known(a), Slot::Known(b)) if a != b => Err(IrError::TypeMismatch {
            op: op.to_string(),
            lhs: a.name().to_string(),
            rhs: b.name().to_string(),
        }),
        (Slot::Hole(_), Slot::Known(_)) => Ok(rhs),
        _ => Ok(lhs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::{ReduceKind, TensorInput, compute, reduce};
    use crate::expr::Var;
    use crate::types::HoleId;

    #[test]
    fn arithmetic_keeps_operand_type() {
        let e = Expr::float(1.0) + Expr::float(2.0);
        assert_eq!(infer_type(&e).unwrap(), Type::scalar(DataType::Float32));
    }

    #[test]
    fn comparison_is_bool() {
        let e = Expr::var(&Var::int("i")).lt(Expr::int(4));
        assert_eq!(infer_type(&e).unwrap(), Type::scalar(DataType::Bool));
    }

    #[test]
    fn mismatched_operands_fail() {
        let e = Expr::int(1) + Expr::float(2.0);
        let err = infer_type(&e).unwrap_err();
        assert!(matches!(err, IrError::TypeMismatch { ref op, .. } if op == "+"));
    }

    #[test]
    fn hole_takes_other_side() {
        let x = Var::new("x", Type::Scalar(Slot::Hole(HoleId(0))));
        let e = Expr::var(&x) * Expr::float(3.0);
        assert_eq!(infer_type(&e).unwrap(), Type::scalar(DataType::Float32));
    }

    #[test]
    fn element_of_tensor_input() {
        let a = TensorInput::new("a", DataType::Float16, &[2, 2]);
        let e = a.at(vec![Expr::int(0), Expr::int(1)]);
        assert_eq!(infer_type(&e).unwrap(), Type::scalar(DataType::Float16));
    }

    #[test]
    fn compute_is_tensor_of_value_type() {
        let a = TensorInput::new("a", DataType::Float32, &[2, 3]);
        let c = compute("s", &[2], "i", |ax| {
            reduce(&[3], "k", ReduceKind::Sum, |k| {
                a.at(vec![Expr::var(&ax[0]), Expr::var(&k[0])])
            })
        });
        let ty = infer_type(&Expr::TensorCompute(Box::new(c))).unwrap();
        let t = ty.as_tensor().unwrap();
        assert_eq!(t.dtype, Slot::Known(DataType::Float32));
        assert_eq!(t.const_shape(), Some(vec![2]));
    }

    #[test]
    fn indexing_a_scalar_fails() {
        let e = Expr::element(Expr::int(3), vec![Expr::int(0)]);
        assert!(matches!(infer_type(&e), Err(IrError::InvalidOperand(_))));
    }
}
