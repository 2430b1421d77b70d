//! Statements: imperative code with side effects and control flow.

use crate::expr::{Expr, Var};

/// A statement in the IR.
///
/// Like [`Expr`], statements own their children and compare structurally.
#[derive(Clone, Debug, PartialEq)]
pub enum Stmt {
    /// Evaluate an expression for its side effects.
    Evaluate(Expr),
    /// Assign to a declared local variable.
    Assign { var: Var, value: Expr },
    /// `buf[indices...] = value`.
    BufferStore {
        buf: Expr,
        indices: Vec<Expr>,
        value: Expr,
    },
    /// Bind `var` to `value` for the duration of `body`.
    Let {
        var: Var,
        value: Expr,
        body: Box<Stmt>,
    },
    /// `for var in 0..extent { body }`.
    For {
        var: Var,
        extent: Expr,
        /// `Some(true)` asks the backend to unroll fully.
        unroll: Option<bool>,
        body: Box<Stmt>,
    },
    If {
        cond: Expr,
        then_body: Box<Stmt>,
        else_body: Option<Box<Stmt>>,
    },
    Assert { cond: Expr, msg: String },
    /// Inline assembly. `outputs` and `inputs` are `(constraint, expr)` pairs.
    Asm {
        template: String,
        outputs: Vec<(String, Expr)>,
        inputs: Vec<(String, Expr)>,
        volatile: bool,
    },
    /// Raw backend text; `{}` placeholders in `template` are filled with `exprs`.
    BlackBox { template: String, exprs: Vec<Expr> },
    Return(Option<Expr>),
    Seq(Vec<Stmt>),
}

impl Stmt {
    /// `for var in 0..extent { body }` without an unroll hint.
    pub fn for_range(var: Var, extent: Expr, body: Stmt) -> Self {
        Self::For {
            var,
            extent,
            unroll: None,
            body: Box::new(body),
        }
    }

    pub fn if_then(cond: Expr, then_body: Stmt) -> Self {
        Self::If {
            cond,
            then_body: Box::new(then_body),
            else_body: None,
        }
    }

    pub fn let_in(var: Var, value: Expr, body: Stmt) -> Self {
        Self::Let {
            var,
            value,
            body: Box::new(body),
        }
    }

    /// Wraps `stmts` in a sequence, collapsing the single-statement case.
    pub fn seq(mut stmts: Vec<Stmt>) -> Self {
        if stmts.len() == 1 {
            stmts.remove(0)
        } else {
            Self::Seq(stmts)
        }
    }

    /// Direct sub-statements.
    pub fn children(&self) -> Vec<&Stmt> {
        match self {
            Self::Let { body, .. } | Self::For { body, .. } => vec![body],
            Self::If {
                then_body,
                else_body,
                ..
            } => std::iter::once(&**then_body)
                .chain(else_body.as_deref())
                .collect(),
            Self::Seq(stmts) => stmts.iter().collect(),
            _ => vec![],
        }
    }

    /// Expressions held directly by this statement (not by sub-statements).
    pub fn exprs(&self) -> Vec<&Expr> {
        match self {
            Self::Evaluate(e) => vec![e],
            Self::Assign { value, .. } | Self::Let { value, .. } => vec![value],
            Self::BufferStore {
                buf,
                indices,
                value,
            } => std::iter::once(buf)
                .chain(indices)
                .chain(std::iter::once(value))
                .collect(),
            Self::For { extent, .. } => vec![extent],
            Self::If { cond, .. } | Self::Assert { cond, .. } => vec![cond],
            Self::Asm {
                outputs, inputs, ..
            } => outputs.iter().chain(inputs).map(|(_, e)| e).collect(),
            Self::BlackBox { exprs, .. } => exprs.iter().collect(),
            Self::Return(e) => e.iter().collect(),
            Self::Seq(_) => vec![],
        }
    }

    /// Pre-order traversal over statements.
    pub fn walk(&self, f: &mut dyn FnMut(&Stmt)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }

    /// Visits every expression held anywhere in this statement tree.
    pub fn walk_exprs(&self, f: &mut dyn FnMut(&Expr)) {
        self.walk(&mut |s| {
            for e in s.exprs() {
                e.walk(f);
            }
        });
    }

    /// Rebuilds the tree with every held expression replaced by `f(expr)`.
    ///
    /// `f` sees each top-level expression once; it decides itself whether to
    /// recurse.
    pub fn map_exprs(self, f: &mut dyn FnMut(Expr) -> Expr) -> Stmt {
        self.map(&mut |s| s, f)
    }

    /// Bottom-up rewrite of statements and their expressions: sub-statements
    /// are rebuilt first, then `fs` runs on the rebuilt node.
    pub fn map(
        self,
        fs: &mut dyn FnMut(Stmt) -> Stmt,
        fe: &mut dyn FnMut(Expr) -> Expr,
    ) -> Stmt {
        let rebuilt = match self {
            Self::Evaluate(e) => Self::Evaluate(fe(e)),
            Self::Assign { var, value } => Self::Assign {
                var,
                value: fe(value),
            },
            Self::BufferStore {
                buf,
                indices,
                value,
            } => Self::BufferStore {
                buf: fe(buf),
                indices: indices.into_iter().map(&mut *fe).collect(),
                value: fe(value),
            },
            Self::Let { var, value, body } => Self::Let {
                var,
                value: fe(value),
                body: Box::new((*body).map(fs, fe)),
            },
            Self::For {
                var,
                extent,
                unroll,
                body,
            } => Self::For {
                var,
                extent: fe(extent),
                unroll,
                body: Box::new((*body).map(fs, fe)),
            },
            Self::If {
                cond,
                then_body,
                else_body,
            } => {
                let cond = fe(cond);
                let then_body = Box::new((*then_body).map(fs, fe));
                Self::If {
                    cond,
                    then_body,
                    else_body: else_body.map(|b| Box::new((*b).map(fs, fe))),
                }
            }
            Self::Assert { cond, msg } => Self::Assert {
                cond: fe(cond),
                msg,
            },
            Self::Asm {
                template,
                outputs,
                inputs,
                volatile,
            } => Self::Asm {
                template,
                outputs: outputs.into_iter().map(|(c, e)| (c, fe(e))).collect(),
                inputs: inputs.into_iter().map(|(c, e)| (c, fe(e))).collect(),
                volatile,
            },
            Self::BlackBox { template, exprs } => Self::BlackBox {
                template,
                exprs: exprs.into_iter().map(&mut *fe).collect(),
            },
            Self::Return(e) => Self::Return(e.map(&mut *fe)),
            Self::Seq(stmts) => Self::Seq(stmts.into_iter().map(|s| s.map(fs, fe)).collect()),
        };
        fs(rebuilt)
    }

    /// Number of statements in the tree satisfying `pred`.
    pub fn count(&self, pred: impl Fn(&Stmt) -> bool) -> usize {
        let mut n = 0;
        self.walk(&mut |s| {
            if pred(s) {
                n += 1;
            }
        });
        n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store(i: i64) -> Stmt {
        Stmt::BufferStore {
            buf: Expr::var(&Var::int("buf")),
            indices: vec![Expr::int(i)],
            value: Expr::int(0),
        }
    }

    #[test]
    fn seq_collapses_singletons() {
        assert_eq!(Stmt::seq(vec![store(0)]), store(0));
        assert!(matches!(Stmt::seq(vec![store(0), store(1)]), Stmt::Seq(_)));
    }

    #[test]
    fn walk_reaches_nested_bodies() {
        let i = Var::int("i");
        let body = Stmt::for_range(
            i.clone(),
            Expr::int(4),
            Stmt::if_then(Expr::var(&i).lt(Expr::int(2)), store(1)),
        );
        assert_eq!(body.count(|s| matches!(s, Stmt::BufferStore { .. })), 1);
        let mut consts = 0;
        body.walk_exprs(&mut |e| consts += usize::from(e.as_int().is_some()));
        // extent 4, bound 2, index 1, value 0
        assert_eq!(consts, 4);
    }

    #[test]
    fn map_exprs_rewrites_all_positions() {
        let s = Stmt::seq(vec![store(1), Stmt::Return(Some(Expr::int(1)))]);
        let s = s.map_exprs(&mut |e| if e == Expr::int(1) { Expr::int(7) } else { e });
        let mut sevens = 0;
        s.walk_exprs(&mut |e| sevens += usize::from(e.as_int() == Some(7)));
        assert_eq!(sevens, 2);
    }

    #[test]
    fn if_children_include_else() {
        let s = Stmt::If {
            cond: Expr::bool(true),
            then_body: Box::new(store(0)),
            else_body: Some(Box::new(store(1))),
        };
        assert_eq!(s.children().len(), 2);
    }
}
