//! Bound-aware simplification.
//!
//! Integer intervals are tracked for loop variables, `let` bindings and the
//! hardware indices of the function's worker. Comparisons decided by those
//! intervals are replaced with constants, and `x % c` / `x / c` collapse when
//! `x` is known to lie in `[0, c)`.

use std::collections::HashMap;

use tessel_ir::{BinaryOp, ConstValue, Expr, Function, IRModule, Stmt, Worker, primitives};

use super::simplify::{simplify_node, simplify_stmt};
use super::{ModuleTransform, Stage};
use crate::error::PassError;

#[derive(Debug)]
pub struct BoundSimplify;

/// Closed integer interval; `None` is unbounded on that side.
#[derive(Clone, Copy, Debug, PartialEq)]
struct Interval {
    lo: Option<i64>,
    hi: Option<i64>,
}

fn both(a: Option<i64>, b: Option<i64>, f: impl Fn(i64, i64) -> Option<i64>) -> Option<i64> {
    f(a?, b?)
}

impl Interval {
    const ANY: Self = Self { lo: None, hi: None };

    fn exact(v: i64) -> Self {
        Self {
            lo: Some(v),
            hi: Some(v),
        }
    }

    fn range(lo: i64, hi: Option<i64>) -> Self {
        Self { lo: Some(lo), hi }
    }

    fn is_non_negative(self) -> bool {
        self.lo.is_some_and(|lo| lo >= 0)
    }

    fn add(self, o: Self) -> Self {
        Self {
            lo: both(self.lo, o.lo, i64::checked_add),
            hi: both(self.hi, o.hi, i64::checked_add),
        }
    }

    fn sub(self, o: Self) -> Self {
        Self {
            lo: both(self.lo, o.hi, i64::checked_sub),
            hi: both(self.hi, o.lo, i64::checked_sub),
        }
    }

    fn mul(self, o: Self) -> Self {
        if let (Some(a), Some(b), Some(c), Some(d)) = (self.lo, self.hi, o.lo, o.hi) {
            let products = [a.checked_mul(c), a.checked_mul(d), b.checked_mul(c), b.checked_mul(d)];
            if let Some(products) = products.into_iter().collect::<Option<Vec<i64>>>() {
                return Self {
                    lo: products.iter().min().copied(),
                    hi: products.iter().max().copied(),
                };
            }
        }
        if self.is_non_negative() && o.is_non_negative() {
            return Self {
                lo: both(self.lo, o.lo, i64::checked_mul),
                hi: both(self.hi, o.hi, i64::checked_mul),
            };
        }
        Self::ANY
    }

    fn div(self, c: i64) -> Self {
        if !self.is_non_negative() {
            return Self::ANY;
        }
        Self {
            lo: self.lo.map(|v| v / c),
            hi: self.hi.map(|v| v / c),
        }
    }

    fn rem(self, c: i64) -> Self {
        if !self.is_non_negative() {
            return Self::ANY;
        }
        let hi = self.hi.map_or(c - 1, |h| h.min(c - 1));
        Self::range(0, Some(hi))
    }

    /// Returns `true` if every value lies in `[0, c)`.
    fn within(self, c: i64) -> bool {
        self.is_non_negative() && self.hi.is_some_and(|h| h < c)
    }
}

fn positive_const(e: &Expr) -> Option<i64> {
    e.as_int().filter(|&c| c > 0)
}

struct Analyzer {
    env: HashMap<String, Interval>,
    thread: Interval,
    block: Interval,
    block_dim: Option<i64>,
}

impl Analyzer {
    fn new(worker: Worker) -> Self {
        let (grid_dim, block_dim) = match worker {
            Worker::Grid { grid_dim, block_dim } => (grid_dim, block_dim),
            Worker::ThreadBlock { block_dim } => (None, block_dim),
            _ => (None, None),
        };
        let upper = |d: Option<u32>| d.map(|d| i64::from(d) - 1);
        Self {
            env: HashMap::new(),
            thread: Interval::range(0, upper(block_dim)),
            block: Interval::range(0, upper(grid_dim)),
            block_dim: block_dim.map(i64::from),
        }
    }

    fn scoped<T>(&mut self, name: &str, iv: Interval, f: impl FnOnce(&mut Self) -> T) -> T {
        let prev = self.env.insert(name.to_string(), iv);
        let out = f(self);
        match prev {
            Some(p) => self.env.insert(name.to_string(), p),
            None => self.env.remove(name),
        };
        out
    }

    fn interval(&self, e: &Expr) -> Interval {
        match e {
            Expr::Constant(c) => match c.value {
                ConstValue::Int(v) => Interval::exact(v),
                _ => Interval::ANY,
            },
            Expr::Var(v) => self.env.get(&v.name).copied().unwrap_or(Interval::ANY),
            Expr::Call { func, args } if args.is_empty() => match func.as_str() {
                primitives::THREAD_IDX => self.thread,
                primitives::BLOCK_IDX => self.block,
                primitives::BLOCK_DIM => self
                    .block_dim
                    .map_or(Interval::range(1, None), Interval::exact),
                _ => Interval::ANY,
            },
            Expr::Binary { op, lhs, rhs } => {
                let a = self.interval(lhs);
                match (op, positive_const(rhs)) {
                    (BinaryOp::Add, _) => a.add(self.interval(rhs)),
                    (BinaryOp::Sub, _) => a.sub(self.interval(rhs)),
                    (BinaryOp::Mul, _) => a.mul(self.interval(rhs)),
                    (BinaryOp::Div, Some(c)) => a.div(c),
                    (BinaryOp::Mod, Some(c)) => a.rem(c),
                    _ => Interval::ANY,
                }
            }
            _ => Interval::ANY,
        }
    }

    fn decide(&self, strict: bool, lhs: &Expr, rhs: &Expr) -> Option<bool> {
        let (a, b) = (self.interval(lhs), self.interval(rhs));
        if let (Some(ah), Some(bl)) = (a.hi, b.lo) {
            if ah < bl || (!strict && ah == bl) {
                return Some(true);
            }
        }
        if let (Some(al), Some(bh)) = (a.lo, b.hi) {
            if al > bh || (strict && al == bh) {
                return Some(false);
            }
        }
        None
    }

    fn simplify_node(&self, e: Expr) -> Expr {
        let e = match e {
            Expr::Binary { op, lhs, rhs } => match (op, positive_const(&rhs)) {
                (BinaryOp::Lt | BinaryOp::Le, _) => match self.decide(op == BinaryOp::Lt, &lhs, &rhs) {
                    Some(b) => Expr::bool(b),
                    None => Expr::Binary { op, lhs, rhs },
                },
                (BinaryOp::Mod, Some(c)) if self.interval(&lhs).within(c) => *lhs,
                (BinaryOp::Div, Some(c)) if self.interval(&lhs).within(c) => {
                    Expr::constant(ConstValue::Int(0), rhs_dtype(&rhs))
                }
                _ => Expr::Binary { op, lhs, rhs },
            },
            other => other,
        };
        simplify_node(e)
    }

    fn expr(&mut self, e: Expr) -> Expr {
        match e {
            Expr::Let { var, value, body } => {
                let value = self.expr(*value);
                let iv = self.interval(&value);
                let body = self.scoped(&var.name, iv, |a| a.expr(*body));
                Expr::Let {
                    var,
                    value: Box::new(value),
                    body: Box::new(body),
                }
            }
            other => {
                let rebuilt = other.map_children(&mut |c| self.expr(c));
                self.simplify_node(rebuilt)
            }
        }
    }

    fn stmt(&mut self, s: Stmt) -> Stmt {
        let s = match s {
            Stmt::For {
                var,
                extent,
                unroll,
                body,
            } => {
                let extent = self.expr(extent);
                let hi = self.interval(&extent).hi.map(|h| h - 1);
                let body = self.scoped(&var.name, Interval::range(0, hi), |a| a.stmt(*body));
                Stmt::For {
                    var,
                    extent,
                    unroll,
                    body: Box::new(body),
                }
            }
            Stmt::Let { var, value, body } => {
                let value = self.expr(value);
                let iv = self.interval(&value);
                let body = self.scoped(&var.name, iv, |a| a.stmt(*body));
                Stmt::Let {
                    var,
                    value,
                    body: Box::new(body),
                }
            }
            Stmt::If {
                cond,
                then_body,
                else_body,
            } => Stmt::If {
                cond: self.expr(cond),
                then_body: Box::new(self.stmt(*then_body)),
                else_body: else_body.map(|b| Box::new(self.stmt(*b))),
            },
            Stmt::Seq(stmts) => Stmt::Seq(stmts.into_iter().map(|s| self.stmt(s)).collect()),
            leaf => leaf.map_exprs(&mut |e| self.expr(e)),
        };
        simplify_stmt(s)
    }
}

fn rhs_dtype(e: &Expr) -> tessel_ir::DataType {
    match e {
        Expr::Constant(c) => c.dtype,
        _ => tessel_ir::DataType::Int32,
    }
}

fn simplify_function(mut func: Function) -> Function {
    let mut analyzer = Analyzer::new(func.attrs.worker);
    let body = std::mem::replace(&mut func.body, Stmt::Seq(Vec::new()));
    func.body = analyzer.stmt(body);
    func
}

impl ModuleTransform for BoundSimplify {
    fn name(&self) -> &str {
        "bound_simplify"
    }

    fn stage(&self) -> Stage {
        Stage::BoundSimplify
    }

    fn run(&self, module: IRModule) -> Result<IRModule, PassError> {
        let mut out = IRModule::new();
        for func in module {
            out.add(simplify_function(func))?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_ir::{Var, primitives::{block_idx, lane_id, thread_idx}};

    fn guarded_kernel(worker: Worker, numel: i64) -> Function {
        let tid = Var::int("tid");
        let store = Stmt::Evaluate(Expr::call("touch", vec![Expr::var(&tid)]));
        let mut f = Function::new("k", worker);
        f.body = Stmt::let_in(
            tid.clone(),
            block_idx() * Expr::int(256) + thread_idx(),
            Stmt::if_then(Expr::var(&tid).lt(Expr::int(numel)), store),
        );
        f
    }

    fn run(f: Function) -> Function {
        let mut m = IRModule::new();
        m.add(f).unwrap();
        BoundSimplify.run(m).unwrap().into_iter().next().unwrap()
    }

    #[test]
    fn exact_grid_drops_bounds_check() {
        let f = run(guarded_kernel(Worker::grid(4, 256), 1024));
        assert_eq!(f.body.count(|s| matches!(s, Stmt::If { .. })), 0);
        assert_eq!(f.body.count(|s| matches!(s, Stmt::Evaluate(_))), 1);
    }

    #[test]
    fn partial_grid_keeps_bounds_check() {
        let f = run(guarded_kernel(Worker::grid(4, 256), 1000));
        assert_eq!(f.body.count(|s| matches!(s, Stmt::If { .. })), 1);
    }

    #[test]
    fn unknown_grid_keeps_bounds_check() {
        let f = run(guarded_kernel(Worker::any_grid(), 1024));
        assert_eq!(f.body.count(|s| matches!(s, Stmt::If { .. })), 1);
    }

    #[test]
    fn loop_bounds_simplify_index_math() {
        let i = Var::int("i");
        let mut f = Function::new("k", Worker::Thread);
        f.body = Stmt::for_range(
            i.clone(),
            Expr::int(4),
            Stmt::Evaluate(Expr::call(
                "touch",
                vec![Expr::var(&i) % Expr::int(4), Expr::var(&i) / Expr::int(4), Expr::var(&i) % Expr::int(3)],
            )),
        );
        let f = run(f);
        let Stmt::For { body, .. } = &f.body else {
            panic!("loop removed");
        };
        assert_eq!(
            **body,
            Stmt::Evaluate(Expr::call(
                "touch",
                vec![Expr::var(&i), Expr::int(0), Expr::var(&i) % Expr::int(3)],
            ))
        );
    }

    #[test]
    fn lane_id_is_below_warp_size() {
        let mut f = Function::new("w", Worker::Warp);
        f.body = Stmt::Assert {
            cond: lane_id().lt(Expr::int(32)),
            msg: "lane".into(),
        };
        let f = run(f);
        assert_eq!(f.body, Stmt::Seq(Vec::new()));
    }

    #[test]
    fn warp_lane_id_keeps_its_modulo() {
        // threadIdx.x of a warp function ranges over the whole enclosing block.
        let mut f = Function::new("w", Worker::Warp);
        let call = Stmt::Evaluate(Expr::call("touch", vec![lane_id()]));
        f.body = call.clone();
        let f = run(f);
        assert_eq!(f.body, call);
    }

    #[test]
    fn negative_ranges_are_not_folded() {
        let i = Var::int("i");
        let mut f = Function::new("k", Worker::Thread);
        let call = Stmt::Evaluate(Expr::call("touch", vec![(Expr::var(&i) - Expr::int(2)) % Expr::int(4)]));
        f.body = Stmt::for_range(i, Expr::int(4), call.clone());
        let f = run(f);
        assert_eq!(f.body.count(|s| *s == call), 1);
    }
}
