//! Compute dialect: declarative descriptions of what a task computes.

use crate::expr::{ConstValue, Expr, Var};
use crate::types::{DataType, ScalarType};

/// An unbound scalar input.
#[derive(Clone, Debug, PartialEq)]
pub struct ScalarInput {
    pub name: String,
    pub dtype: ScalarType,
}

/// An unbound tensor input.
#[derive(Clone, Debug, PartialEq)]
pub struct TensorInput {
    pub name: String,
    pub dtype: ScalarType,
    /// `None` only in patterns: any shape of any rank.
    pub shape: Option<Vec<Expr>>,
}

impl TensorInput {
    pub fn new(name: impl Into<String>, dtype: DataType, shape: &[i64]) -> Self {
        Self {
            name: name.into(),
            dtype: dtype.into(),
            shape: Some(shape.iter().map(|&d| Expr::int(d)).collect()),
        }
    }

    pub fn rank(&self) -> Option<usize> {
        self.shape.as_ref().map(Vec::len)
    }

    pub fn const_shape(&self) -> Option<Vec<i64>> {
        self.shape.as_ref()?.iter().map(Expr::as_int).collect()
    }

    /// `self[indices...]` as an expression.
    pub fn at(&self, indices: Vec<Expr>) -> Expr {
        Expr::element(Expr::TensorInput(self.clone()), indices)
    }
}

/// "For each coordinate in `shape`, the element is `value(axes)`".
#[derive(Clone, Debug, PartialEq)]
pub struct TensorCompute {
    pub name: String,
    pub shape: Vec<Expr>,
    pub axes: Vec<Var>,
    pub value: Expr,
}

impl TensorCompute {
    pub fn rank(&self) -> usize {
        self.axes.len()
    }

    pub fn const_shape(&self) -> Option<Vec<i64>> {
        self.shape.iter().map(Expr::as_int).collect()
    }

    /// Number of output elements, when the shape is static.
    pub fn numel(&self) -> Option<i64> {
        self.const_shape().map(|s| s.iter().product())
    }

    /// Returns `true` if the value contains a reduction.
    pub fn has_reduction(&self) -> bool {
        let mut found = false;
        self.value
            .walk(&mut |e| found |= matches!(e, Expr::ReduceCompute(_)));
        found
    }

    /// Names of every tensor input the value reads, in first-use order.
    pub fn input_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        self.value.walk(&mut |e| {
            if let Expr::TensorInput(t) = e {
                if !names.contains(&t.name) {
                    names.push(t.name.clone());
                }
            }
        });
        names
    }
}

/// Commutative combinator of a reduction.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ReduceKind {
    Sum,
    Max,
    Min,
    Avg,
}

impl ReduceKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Max => "max",
            Self::Min => "min",
            Self::Avg => "avg",
        }
    }

    /// Identity element of the combinator for `dtype`.
    pub fn init(self, dtype: DataType) -> ConstValue {
        let float = dtype.is_float();
        match self {
            Self::Sum | Self::Avg if float => ConstValue::Float(0.0),
            Self::Sum | Self::Avg => ConstValue::Int(0),
            Self::Max if float => ConstValue::Float(f64::NEG_INFINITY),
            Self::Max => ConstValue::Int(i64::MIN),
            Self::Min if float => ConstValue::Float(f64::INFINITY),
            Self::Min => ConstValue::Int(i64::MAX),
        }
    }

    /// `acc ⊕ value` as an expression.
    pub fn combine(self, acc: Expr, value: Expr) -> Expr {
        match self {
            Self::Sum | Self::Avg => acc + value,
            Self::Max => Expr::call("max", vec![acc, value]),
            Self::Min => Expr::call("min", vec![acc, value]),
        }
    }
}

/// A scalar-valued reduction over `axes` ranging over `shape`.
#[derive(Clone, Debug, PartialEq)]
pub struct ReduceCompute {
    pub shape: Vec<Expr>,
    pub axes: Vec<Var>,
    pub value: Expr,
    pub kind: ReduceKind,
}

impl ReduceCompute {
    pub fn const_shape(&self) -> Option<Vec<i64>> {
        self.shape.iter().map(Expr::as_int).collect()
    }
}

fn make_axes(prefix: &str, rank: usize) -> Vec<Var> {
    (0..rank).map(|k| Var::int(format!("{prefix}{k}"))).collect()
}

/// Builds a [`TensorCompute`] whose axes are named `{axis_prefix}{k}`.
pub fn compute(
    name: impl Into<String>,
    shape: &[i64],
    axis_prefix: &str,
    value: impl FnOnce(&[Var]) -> Expr,
) -> TensorCompute {
    let axes = make_axes(axis_prefix, shape.len());
    let value = value(&axes);
    TensorCompute {
        name: name.into(),
        shape: shape.iter().map(|&d| Expr::int(d)).collect(),
        axes,
        value,
    }
}

/// Builds a [`ReduceCompute`] expression whose axes are named `{axis_prefix}{k}`.
pub fn reduce(
    shape: &[i64],
    axis_prefix: &str,
    kind: ReduceKind,
    value: impl FnOnce(&[Var]) -> Expr,
) -> Expr {
    let axes = make_axes(axis_prefix, shape.len());
    let value = value(&axes);
    Expr::ReduceCompute(Box::new(ReduceCompute {
        shape: shape.iter().map(|&d| Expr::int(d)).collect(),
        axes,
        value,
        kind,
    }))
}
