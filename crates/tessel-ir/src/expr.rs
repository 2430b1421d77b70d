//! Expressions: immutable, tree-shaped scalar and tensor values.
//!
//! Each node owns its children. Nodes are compared structurally, never by
//! identity, which is what the pattern matcher relies on.

use std::collections::HashMap;
use std::ops;

use crate::compute::{ReduceCompute, ScalarInput, TensorCompute, TensorInput};
use crate::pattern::{AnyExpr, ReduceComputePattern, TensorComputePattern};
use crate::types::{DataType, Type};

/// A literal value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ConstValue {
    Bool(bool),
    Int(i64),
    Float(f64),
}

impl ConstValue {
    pub fn as_f64(self) -> f64 {
        match self {
            Self::Bool(b) => f64::from(u8::from(b)),
            Self::Int(i) => i as f64,
            Self::Float(f) => f,
        }
    }

    /// Converts the value to the representation used by `dtype`.
    pub fn cast(self, dtype: DataType) -> Self {
        match dtype {
            DataType::Bool => Self::Bool(self.as_f64() != 0.0),
            DataType::Int32 | DataType::Int64 => match self {
                Self::Int(i) => Self::Int(i),
                other => Self::Int(other.as_f64().trunc() as i64),
            },
            _ => Self::Float(self.as_f64()),
        }
    }
}

/// A typed literal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Constant {
    pub value: ConstValue,
    pub dtype: DataType,
}

/// A named variable. Variables are identified by name within a function.
#[derive(Clone, Debug, PartialEq)]
pub struct Var {
    pub name: String,
    pub ty: Type,
}

impl Var {
    pub fn new(name: impl Into<String>, ty: Type) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }

    /// An `int32` scalar variable.
    pub fn int(name: impl Into<String>) -> Self {
        Self::new(name, Type::scalar(DataType::Int32))
    }
}

/// A unary operator.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

/// A binary operator.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Lt,
    Le,
    Eq,
    Ne,
    And,
    Or,
    BitAnd,
    BitOr,
    Shl,
    Shr,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Eq => "==",
            Self::Ne => "!=",
            Self::And => "&&",
            Self::Or => "||",
            Self::BitAnd => "&",
            Self::BitOr => "|",
            Self::Shl => "<<",
            Self::Shr => ">>",
        }
    }

    /// Comparisons produce `bool` regardless of operand type.
    pub fn is_comparison(self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Eq | Self::Ne)
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::And | Self::Or)
    }
}

/// An expression node.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Var(Var),
    Constant(Constant),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    /// `let var = value in body`.
    Let {
        var: Var,
        value: Box<Expr>,
        body: Box<Expr>,
    },
    IfThenElse {
        cond: Box<Expr>,
        then_expr: Box<Expr>,
        else_expr: Box<Expr>,
    },
    /// `base[indices...]`.
    TensorElement {
        base: Box<Expr>,
        indices: Vec<Expr>,
    },
    /// Call of an intrinsic or of another function in the module.
    Call {
        func: String,
        args: Vec<Expr>,
    },
    Cast {
        expr: Box<Expr>,
        target: Type,
    },
    Dereference(Box<Expr>),
    Address(Box<Expr>),
    Reference(Box<Expr>),

    // Compute dialect.
    ScalarInput(ScalarInput),
    TensorInput(TensorInput),
    TensorCompute(Box<TensorCompute>),
    ReduceCompute(Box<ReduceCompute>),

    // Pattern dialect.
    Any(AnyExpr),
    ComputePattern(TensorComputePattern),
    ReducePattern(ReduceComputePattern),
}

impl Expr {
    pub fn int(value: i64) -> Self {
        Self::Constant(Constant {
            value: ConstValue::Int(value),
            dtype: DataType::Int32,
        })
    }

    pub fn float(value: f64) -> Self {
        Self::Constant(Constant {
            value: ConstValue::Float(value),
            dtype: DataType::Float32,
        })
    }

    pub fn bool(value: bool) -> Self {
        Self::Constant(Constant {
            value: ConstValue::Bool(value),
            dtype: DataType::Bool,
        })
    }

    pub fn constant(value: ConstValue, dtype: DataType) -> Self {
        Self::Constant(Constant {
            value: value.cast(dtype),
            dtype,
        })
    }

    pub fn var(var: &Var) -> Self {
        Self::Var(var.clone())
    }

    pub fn unary(op: UnaryOp, expr: Expr) -> Self {
        Self::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Self::Binary {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    pub fn lt(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Lt, self, rhs)
    }

    pub fn le(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Le, self, rhs)
    }

    pub fn eq_to(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::Eq, self, rhs)
    }

    pub fn and(self, rhs: Expr) -> Self {
        Self::binary(BinaryOp::And, self, rhs)
    }

    pub fn if_then_else(cond: Expr, then_expr: Expr, else_expr: Expr) -> Self {
        Self::IfThenElse {
            cond: Box::new(cond),
            then_expr: Box::new(then_expr),
            else_expr: Box::new(else_expr),
        }
    }

    pub fn element(base: Expr, indices: Vec<Expr>) -> Self {
        Self::TensorElement {
            base: Box::new(base),
            indices,
        }
    }

    pub fn call(func: impl Into<String>, args: Vec<Expr>) -> Self {
        Self::Call {
            func: func.into(),
            args,
        }
    }

    pub fn cast(expr: Expr, target: Type) -> Self {
        Self::Cast {
            expr: Box::new(expr),
            target,
        }
    }

    pub fn let_in(var: Var, value: Expr, body: Expr) -> Self {
        Self::Let {
            var,
            value: Box::new(value),
            body: Box::new(body),
        }
    }

    /// Integer value of a constant.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Constant(Constant {
                value: ConstValue::Int(v),
                ..
            }) => Some(*v),
            _ => None,
        }
    }

    pub fn as_const(&self) -> Option<ConstValue> {
        match self {
            Self::Constant(c) => Some(c.value),
            _ => None,
        }
    }

    pub fn as_var(&self) -> Option<&Var> {
        match self {
            Self::Var(v) => Some(v),
            _ => None,
        }
    }

    /// Name of a compute-dialect node (input or tensor compute).
    pub fn compute_name(&self) -> Option<&str> {
        match self {
            Self::ScalarInput(s) => Some(&s.name),
            Self::TensorInput(t) => Some(&t.name),
            Self::TensorCompute(c) => Some(&c.name),
            _ => None,
        }
    }

    /// Returns `true` if the node belongs to the pattern dialect.
    pub fn is_pattern_node(&self) -> bool {
        matches!(
            self,
            Self::Any(_) | Self::ComputePattern(_) | Self::ReducePattern(_)
        )
    }

    /// Returns `true` if neither this node nor any descendant is a pattern
    /// wildcard or carries an unresolved type.
    pub fn is_resolved(&self) -> bool {
        let mut resolved = true;
        self.walk(&mut |e| {
            resolved &= match e {
                Self::ScalarInput(s) => s.dtype.is_resolved(),
                Self::TensorInput(t) => t.dtype.is_resolved() && t.shape.is_some(),
                Self::Var(v) => v.ty.is_resolved(),
                Self::Cast { target, .. } => target.is_resolved(),
                other => !other.is_pattern_node(),
            };
        });
        resolved
    }

    /// Direct sub-expressions in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::Var(_)
            | Self::Constant(_)
            | Self::ScalarInput(_)
            | Self::Any(_)
            | Self::ComputePattern(_)
            | Self::ReducePattern(_) => vec![],
            Self::Unary { expr, .. }
            | Self::Cast { expr, .. }
            | Self::Dereference(expr)
            | Self::Address(expr)
            | Self::Reference(expr) => vec![expr],
            Self::Binary { lhs, rhs, .. } => vec![lhs, rhs],
            Self::Let { value, body, .. } => vec![value, body],
            Self::IfThenElse {
                cond,
                then_expr,
                else_expr,
            } => vec![cond, then_expr, else_expr],
            Self::TensorElement { base, indices } => {
                std::iter::once(&**base).chain(indices).collect()
            }
            Self::Call { args, .. } => args.iter().collect(),
            Self::TensorInput(t) => t.shape.iter().flatten().collect(),
            Self::TensorCompute(c) => c.shape.iter().chain(std::iter::once(&c.value)).collect(),
            Self::ReduceCompute(r) => r.shape.iter().chain(std::iter::once(&r.value)).collect(),
        }
    }

    /// Pre-order traversal.
    pub fn walk(&self, f: &mut dyn FnMut(&Expr)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Rebuilds this node with every direct child replaced by `f(child)`.
    pub fn map_children(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        let mut bx = |e: Box<Expr>| Box::new(f(*e));
        match self {
            leaf @ (Self::Var(_)
            | Self::Constant(_)
            | Self::ScalarInput(_)
            | Self::Any(_)
            | Self::ComputePattern(_)
            | Self::ReducePattern(_)) => leaf,
            Self::Unary { op, expr } => Self::Unary { op, expr: bx(expr) },
            Self::Cast { expr, target } => Self::Cast {
                expr: bx(expr),
                target,
            },
            Self::Dereference(e) => Self::Dereference(bx(e)),
            Self::Address(e) => Self::Address(bx(e)),
            Self::Reference(e) => Self::Reference(bx(e)),
            Self::Binary { op, lhs, rhs } => {
                let lhs = bx(lhs);
                Self::Binary {
                    op,
                    lhs,
                    rhs: bx(rhs),
                }
            }
            Self::Let { var, value, body } => {
                let value = bx(value);
                Self::Let {
                    var,
                    value,
                    body: bx(body),
                }
            }
            Self::IfThenElse {
                cond,
                then_expr,
                else_expr,
            } => {
                let cond = bx(cond);
                let then_expr = bx(then_expr);
                Self::IfThenElse {
                    cond,
                    then_expr,
                    else_expr: bx(else_expr),
                }
            }
            Self::TensorElement { base, indices } => {
                let base = bx(base);
                Self::TensorElement {
                    base,
                    indices: indices.into_iter().map(&mut *f).collect(),
                }
            }
            Self::Call { func, args } => Self::Call {
                func,
                args: args.into_iter().map(&mut *f).collect(),
            },
            Self::TensorInput(mut t) => {
                t.shape = t.shape.map(|s| s.into_iter().map(&mut *f).collect());
                Self::TensorInput(t)
            }
            Self::TensorCompute(mut c) => {
                c.shape = std::mem::take(&mut c.shape).into_iter().map(&mut *f).collect();
                c.value = f(std::mem::replace(&mut c.value, Expr::int(0)));
                Self::TensorCompute(c)
            }
            Self::ReduceCompute(mut r) => {
                r.shape = std::mem::take(&mut r.shape).into_iter().map(&mut *f).collect();
                r.value = f(std::mem::replace(&mut r.value, Expr::int(0)));
                Self::ReduceCompute(r)
            }
        }
    }

    /// Bottom-up rewrite: children first, then `f` on the rebuilt node.
    pub fn rewrite_post(self, f: &mut dyn FnMut(Expr) -> Expr) -> Expr {
        let rebuilt = self.map_children(&mut |child| child.rewrite_post(f));
        f(rebuilt)
    }

    /// Replaces variables by name. Bound names are unique per task, so no
    /// capture-avoidance is performed.
    pub fn substitute(self, map: &HashMap<String, Expr>) -> Expr {
        if map.is_empty() {
            return self;
        }
        self.rewrite_post(&mut |e| match e {
            Expr::Var(v) => map.get(&v.name).cloned().unwrap_or(Expr::Var(v)),
            other => other,
        })
    }
}

impl From<&Var> for Expr {
    fn from(var: &Var) -> Self {
        Self::Var(var.clone())
    }
}

impl From<Var> for Expr {
    fn from(var: Var) -> Self {
        Self::Var(var)
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Self::int(value)
    }
}

macro_rules! impl_binary_operator {
    ($trait:ident, $method:ident, $op:ident) => {
        impl ops::$trait for Expr {
            type Output = Expr;
            fn $method(self, rhs: Expr) -> Expr {
                Expr::binary(BinaryOp::$op, self, rhs)
            }
        }
    };
}

impl_binary_operator!(Add, add, Add);
impl_binary_operator!(Sub, sub, Sub);
impl_binary_operator!(Mul, mul, Mul);
impl_binary_operator!(Div, div, Div);
impl_binary_operator!(Rem, rem, Mod);

impl ops::Neg for Expr {
    type Output = Expr;
    fn neg(self) -> Expr {
        Expr::unary(UnaryOp::Neg, self)
    }
}

impl ops::Not for Expr {
    type Output = Expr;
    fn not(self) -> Expr {
        Expr::unary(UnaryOp::Not, self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operators_build_binary_nodes() {
        let i = Var::int("i");
        let e = Expr::var(&i) * Expr::int(4) + Expr::int(1);
        match &e {
            Expr::Binary { op, lhs, .. } => {
                assert_eq!(*op, BinaryOp::Add);
                assert!(matches!(**lhs, Expr::Binary { op: BinaryOp::Mul, .. }));
            }
            _ => panic!("expected Binary"),
        }
    }

    #[test]
    fn structural_equality() {
        let a = Expr::var(&Var::int("i")) + Expr::int(1);
        let b = Expr::var(&Var::int("i")) + Expr::int(1);
        let c = Expr::int(1) + Expr::var(&Var::int("i"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn substitute_replaces_vars() {
        let i = Var::int("i");
        let e = Expr::var(&i) * Expr::int(2);
        let map = HashMap::from([("i".to_string(), Expr::int(5))]);
        assert_eq!(e.substitute(&map), Expr::int(5) * Expr::int(2));
    }

    #[test]
    fn rewrite_post_visits_children_first() {
        let e = (Expr::int(1) + Expr::int(2)) * Expr::int(3);
        let mut order = Vec::new();
        let _ = e.rewrite_post(&mut |n| {
            order.push(n.as_int());
            n
        });
        assert_eq!(order, vec![Some(1), Some(2), None, Some(3), None]);
    }

    #[test]
    fn const_cast() {
        assert_eq!(ConstValue::Float(2.7).cast(DataType::Int32), ConstValue::Int(2));
        assert_eq!(ConstValue::Int(0).cast(DataType::Bool), ConstValue::Bool(false));
        assert_eq!(ConstValue::Bool(true).cast(DataType::Float32), ConstValue::Float(1.0));
    }

    #[test]
    fn children_of_element() {
        let base = Expr::var(&Var::int("buf"));
        let e = Expr::element(base, vec![Expr::int(0), Expr::int(1)]);
        assert_eq!(e.children().len(), 3);
    }
}
