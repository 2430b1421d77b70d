//! Structural matching of task patterns against concrete tasks.
//!
//! Matching walks the pattern's compute definition and the task's in
//! lockstep. Holes bind to the concrete value they meet the first time and
//! must meet an equal value every later time. Operators are matched in
//! operand order; no commutativity is assumed.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use tessel_ir::{
    DataType, Expr, HoleId, MemoryScope, RegisterScope, ScalarType, Slot, Task, TaskPattern,
    TensorType, Type, Var,
};

/// Why a pattern declined a task. Declining is an expected outcome.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum NoMatch {
    /// The pattern targets a different worker.
    Worker,
    /// The compute definitions differ in structure.
    Structure,
    /// A parameter type differs from its template.
    ParamType,
    /// A required parameter is not a parameter of the task.
    MissingParam,
    /// The task carries tensor parameters the pattern does not allow.
    ExtraParam,
}

impl fmt::Display for NoMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Worker => "worker mismatch",
            Self::Structure => "compute structure mismatch",
            Self::ParamType => "parameter type mismatch",
            Self::MissingParam => "required parameter not bound",
            Self::ExtraParam => "unexpected extra tensor parameter",
        })
    }
}

type Matched = Result<(), NoMatch>;

fn check(cond: bool) -> Matched {
    if cond { Ok(()) } else { Err(NoMatch::Structure) }
}

/// What every placeholder of a pattern resolved to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Binding {
    exprs: BTreeMap<HoleId, Expr>,
    dtypes: BTreeMap<HoleId, DataType>,
    scopes: BTreeMap<HoleId, MemoryScope>,
    registers: BTreeMap<HoleId, RegisterScope>,
    nodes: BTreeMap<String, Expr>,
    vars: BTreeMap<String, Var>,
    params: Vec<usize>,
}

impl Binding {
    /// The concrete expression `pattern` stands for: a wildcard's binding, or
    /// the pattern itself when it is already concrete.
    pub fn expr(&self, pattern: &Expr) -> Option<Expr> {
        match pattern {
            Expr::Any(any) => self.exprs.get(&any.hole).cloned(),
            other if other.is_resolved() => Some(other.clone()),
            _ => None,
        }
    }

    /// Integer value of a bound shape entry.
    pub fn int(&self, pattern: &Expr) -> Option<i64> {
        self.expr(pattern)?.as_int()
    }

    pub fn dtype(&self, slot: &ScalarType) -> Option<DataType> {
        match slot {
            Slot::Known(d) => Some(*d),
            Slot::Hole(h) => self.dtypes.get(h).copied(),
        }
    }

    pub fn scope<'a>(&'a self, slot: &'a Slot<MemoryScope>) -> Option<&'a MemoryScope> {
        match slot {
            Slot::Known(s) => Some(s),
            Slot::Hole(h) => self.scopes.get(h),
        }
    }

    /// The register scope a `Register` scope template bound to.
    pub fn register_scope<'a>(&'a self, scope: &'a MemoryScope) -> Option<&'a RegisterScope> {
        match scope {
            MemoryScope::Register(Slot::Known(rs)) => Some(rs),
            MemoryScope::Register(Slot::Hole(h)) => self.registers.get(h),
            _ => None,
        }
    }

    /// The task node bound to the pattern node named `name`.
    pub fn node(&self, name: &str) -> Option<&Expr> {
        self.nodes.get(name)
    }

    /// Task parameter index of the `i`-th required parameter.
    pub fn param_index(&self, i: usize) -> Option<usize> {
        self.params.get(i).copied()
    }

    fn bind<K: Ord, V: PartialEq>(map: &mut BTreeMap<K, V>, key: K, value: V) -> Matched {
        match map.get(&key) {
            Some(prev) if *prev != value => Err(NoMatch::Structure),
            Some(_) => Ok(()),
            None => {
                map.insert(key, value);
                Ok(())
            }
        }
    }
}

struct Matcher {
    binding: Binding,
}

impl Matcher {
    fn dtype(&mut self, p: &ScalarType, t: &ScalarType) -> Matched {
        match (p, t) {
            (Slot::Hole(h), Slot::Known(d)) => Binding::bind(&mut self.binding.dtypes, *h, *d),
            (Slot::Known(a), Slot::Known(b)) => check(a == b),
            (_, Slot::Hole(_)) => Err(NoMatch::Structure),
        }
    }

    fn node(&mut self, name: &str, t: &Expr) -> Matched {
        Binding::bind(&mut self.binding.nodes, name.to_string(), t.clone())
    }

    fn axes(&mut self, p: &[Var], t: &[Var]) -> Matched {
        check(p.len() == t.len())?;
        for (pv, tv) in p.iter().zip(t) {
            Binding::bind(&mut self.binding.vars, pv.name.clone(), tv.clone())?;
        }
        Ok(())
    }

    fn exprs(&mut self, p: &[Expr], t: &[Expr]) -> Matched {
        check(p.len() == t.len())?;
        p.iter().zip(t).try_for_each(|(p, t)| self.expr(p, t))
    }

    fn shape(&mut self, p: &Option<Vec<Expr>>, t: &Option<Vec<Expr>>) -> Matched {
        match (p, t) {
            (None, _) => Ok(()),
            (Some(p), Some(t)) => self.exprs(p, t),
            (Some(_), None) => Err(NoMatch::Structure),
        }
    }

    fn expr(&mut self, p: &Expr, t: &Expr) -> Matched {
        match (p, t) {
            (Expr::Any(any), _) => Binding::bind(&mut self.binding.exprs, any.hole, t.clone()),
            (Expr::ComputePattern(cp), Expr::TensorCompute(c)) => {
                check(cp.rank.is_none_or(|r| r == c.rank()))?;
                check(cp.allow_reduce || !c.has_reduction())
            }
            (Expr::ReducePattern(rp), Expr::ReduceCompute(r)) => check(rp.kind.is_none_or(|k| k == r.kind)),
            (Expr::Var(pv), Expr::Var(tv)) => match self.binding.vars.get(&pv.name) {
                Some(bound) => check(bound.name == tv.name),
                // Free pattern variables must match literally.
                None => check(pv == tv),
            },
            (Expr::Constant(a), Expr::Constant(b)) => check(a == b),
            (Expr::Unary { op: a, expr: x }, Expr::Unary { op: b, expr: y }) => {
                check(a == b)?;
                self.expr(x, y)
            }
            (
                Expr::Binary { op: a, lhs: pl, rhs: pr },
                Expr::Binary { op: b, lhs: tl, rhs: tr },
            ) => {
                check(a == b)?;
                self.expr(pl, tl)?;
                self.expr(pr, tr)
            }
            (
                Expr::Let { var: pv, value: pval, body: pb },
                Expr::Let { var: tv, value: tval, body: tb },
            ) => {
                self.expr(pval, tval)?;
                Binding::bind(&mut self.binding.vars, pv.name.clone(), tv.clone())?;
                self.expr(pb, tb)
            }
            (
                Expr::IfThenElse { cond: pc, then_expr: pt, else_expr: pe },
                Expr::IfThenElse { cond: tc, then_expr: tt, else_expr: te },
            ) => {
                self.expr(pc, tc)?;
                self.expr(pt, tt)?;
                self.expr(pe, te)
            }
            (
                Expr::TensorElement { base: pb, indices: pi },
                Expr::TensorElement { base: tb, indices: ti },
            ) => {
                self.expr(pb, tb)?;
                self.exprs(pi, ti)
            }
            (Expr::Call { func: pf, args: pa }, Expr::Call { func: tf, args: ta }) => {
                check(pf == tf)?;
                self.exprs(pa, ta)
            }
            (Expr::Cast { expr: pe, target: pt }, Expr::Cast { expr: te, target: tt }) => {
                self.ty(pt, tt)?;
                self.expr(pe, te)
            }
            (Expr::Dereference(a), Expr::Dereference(b))
            | (Expr::Address(a), Expr::Address(b))
            | (Expr::Reference(a), Expr::Reference(b)) => self.expr(a, b),
            (Expr::ScalarInput(ps), Expr::ScalarInput(ts)) => {
                self.dtype(&ps.dtype, &ts.dtype)?;
                self.node(&ps.name, t)
            }
            (Expr::TensorInput(pi), Expr::TensorInput(ti)) => {
                self.dtype(&pi.dtype, &ti.dtype)?;
                self.shape(&pi.shape, &ti.shape)?;
                self.node(&pi.name, t)
            }
            (Expr::TensorCompute(pc), Expr::TensorCompute(tc)) => {
                self.exprs(&pc.shape, &tc.shape)?;
                self.axes(&pc.axes, &tc.axes)?;
                self.expr(&pc.value, &tc.value)?;
                self.node(&pc.name, t)
            }
            (Expr::ReduceCompute(pr), Expr::ReduceCompute(tr)) => {
                check(pr.kind == tr.kind)?;
                self.exprs(&pr.shape, &tr.shape)?;
                self.axes(&pr.axes, &tr.axes)?;
                self.expr(&pr.value, &tr.value)
            }
            _ => Err(NoMatch::Structure),
        }
    }

    fn scope(&mut self, p: &Slot<MemoryScope>, t: &Slot<MemoryScope>) -> Matched {
        let Slot::Known(ts) = t else {
            return Err(NoMatch::ParamType);
        };
        match p {
            Slot::Hole(h) => Binding::bind(&mut self.binding.scopes, *h, ts.clone()),
            Slot::Known(MemoryScope::Register(Slot::Hole(h))) => match ts {
                MemoryScope::Register(Slot::Known(rs)) => {
                    Binding::bind(&mut self.binding.registers, *h, rs.clone())
                }
                _ => Err(NoMatch::ParamType),
            },
            Slot::Known(ps) => check(ps == ts),
        }
    }

    fn tensor_type(&mut self, p: &TensorType, t: &TensorType) -> Matched {
        self.scope(&p.scope, &t.scope)?;
        self.dtype(&p.dtype, &t.dtype)?;
        self.shape(&p.shape, &t.shape)?;
        match &p.strides {
            None => Ok(()),
            Some(ps) => {
                let ts = t.effective_strides().ok_or(NoMatch::Structure)?;
                self.exprs(ps, &ts)
            }
        }
    }

    fn ty(&mut self, p: &Type, t: &Type) -> Matched {
        match (p, t) {
            (Type::Scalar(a), Type::Scalar(b)) => self.dtype(a, b),
            (Type::Tensor(a), Type::Tensor(b)) | (Type::TensorPointer(a), Type::TensorPointer(b)) => {
                self.tensor_type(a, b)
            }
            (Type::Pointer(a), Type::Pointer(b)) | (Type::Reference(a), Type::Reference(b)) => self.ty(a, b),
            (Type::Void, Type::Void) => Ok(()),
            _ => Err(NoMatch::Structure),
        }
    }
}

/// Matches `pattern` against `task`.
///
/// On success every placeholder reachable from the compute pattern and the
/// required parameter types is bound.
pub fn match_task(pattern: &TaskPattern, task: &Task) -> Result<Binding, NoMatch> {
    if !pattern.worker.accepts(&task.worker) {
        return Err(NoMatch::Worker);
    }
    let mut m = Matcher {
        binding: Binding::default(),
    };
    let computation = Expr::TensorCompute(Box::new(task.computation.clone()));
    m.expr(&pattern.compute_pattern, &computation)?;

    for (param, template) in pattern.required_params.iter().zip(&pattern.required_param_types) {
        let node = param
            .compute_name()
            .and_then(|name| m.binding.node(name))
            .ok_or(NoMatch::MissingParam)?;
        let index = task.param_index(node).ok_or(NoMatch::MissingParam)?;
        let actual = task.param_types.get(index).ok_or(NoMatch::MissingParam)?;
        m.ty(template, actual).map_err(|_| NoMatch::ParamType)?;
        m.binding.params.push(index);
    }

    if !pattern.allow_tensor_extra_params {
        let extra = task.param_types.iter().enumerate().any(|(i, ty)| {
            matches!(ty, Type::Tensor(_) | Type::TensorPointer(_)) && !m.binding.params.contains(&i)
        });
        if extra {
            return Err(NoMatch::ExtraParam);
        }
    }
    Ok(m.binding)
}

/// Checks the internal consistency of a pattern.
pub fn validate_pattern(pattern: &TaskPattern) -> Result<(), String> {
    if pattern.required_params.len() != pattern.required_param_types.len() {
        return Err(format!(
            "{} required parameters but {} parameter types",
            pattern.required_params.len(),
            pattern.required_param_types.len()
        ));
    }
    let mut declared = BTreeSet::new();
    pattern.compute_pattern.walk(&mut |e| {
        if let Some(name) = e.compute_name() {
            declared.insert(name.to_string());
        }
    });
    for (i, param) in pattern.required_params.iter().enumerate() {
        match param.compute_name() {
            Some(name) if declared.contains(name) => {}
            Some(name) => return Err(format!("required parameter `{name}` does not occur in the compute pattern")),
            None => return Err(format!("required parameter {i} is not a compute node")),
        }
    }
    Ok(())
}
