//! Builders used by code generators.

use std::collections::HashSet;

use crate::expr::{Expr, Var};
use crate::func::Function;
use crate::stmt::Stmt;
use crate::task::Worker;
use crate::types::Type;

/// Incrementally builds a [`Function`], handing out names that are unique
/// within it.
#[derive(Debug)]
pub struct FunctionBuilder {
    func: Function,
    used: HashSet<String>,
}

impl FunctionBuilder {
    pub fn new(name: impl Into<String>, worker: Worker) -> Self {
        Self {
            func: Function::new(name, worker),
            used: HashSet::new(),
        }
    }

    /// `hint` if unused, otherwise `hint_1`, `hint_2`, ...
    pub fn fresh_name(&mut self, hint: &str) -> String {
        let mut name = hint.to_string();
        let mut k = 0;
        while self.used.contains(&name) {
            k += 1;
            name = format!("{hint}_{k}");
        }
        self.used.insert(name.clone());
        name
    }

    /// A fresh variable; not declared anywhere until bound by a statement.
    pub fn fresh_var(&mut self, hint: &str, ty: Type) -> Var {
        let name = self.fresh_name(hint);
        Var::new(name, ty)
    }

    /// Appends a parameter named after `hint`.
    pub fn param(&mut self, hint: &str, ty: Type) -> Var {
        let var = self.fresh_var(hint, ty);
        self.func.params.push(var.clone());
        var
    }

    /// Appends already-named parameters, reserving their names.
    pub fn extend_params(&mut self, vars: impl IntoIterator<Item = Var>) {
        for var in vars {
            self.used.insert(var.name.clone());
            self.func.params.push(var);
        }
    }

    /// Declares a function-local variable.
    pub fn declare_local(&mut self, hint: &str, ty: Type) -> Var {
        let var = self.fresh_var(hint, ty);
        self.func.local_vars.push(var.clone());
        var
    }

    pub fn set_ret_type(&mut self, ty: Type) {
        self.func.ret_type = ty;
    }

    pub fn set_label(&mut self, label: impl Into<String>) {
        self.func.attrs.label = Some(label.into());
    }

    pub fn set_body(&mut self, body: Stmt) {
        self.func.body = body;
    }

    pub fn finish(self) -> Function {
        self.func
    }
}

#[derive(Debug)]
enum Frame {
    Root,
    Let { var: Var, value: Expr },
    For { var: Var, extent: Expr, unroll: Option<bool> },
    If { cond: Expr },
}

/// Builds nested statements with an explicit scope stack.
///
/// `enter_*` opens a scope whose body collects subsequent statements until
/// the matching [`exit`](Self::exit).
#[derive(Debug)]
pub struct StmtBuilder {
    stack: Vec<(Frame, Vec<Stmt>)>,
}

impl Default for StmtBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StmtBuilder {
    pub fn new() -> Self {
        Self {
            stack: vec![(Frame::Root, Vec::new())],
        }
    }

    pub fn append(&mut self, stmt: Stmt) {
        if let Some((_, body)) = self.stack.last_mut() {
            body.push(stmt);
        }
    }

    pub fn enter_let(&mut self, var: Var, value: Expr) {
        self.stack.push((Frame::Let { var, value }, Vec::new()));
    }

    pub fn enter_for(&mut self, var: Var, extent: Expr) {
        self.enter_for_unrolled(var, extent, None);
    }

    pub fn enter_for_unrolled(&mut self, var: Var, extent: Expr, unroll: Option<bool>) {
        self.stack.push((Frame::For { var, extent, unroll }, Vec::new()));
    }

    pub fn enter_if(&mut self, cond: Expr) {
        self.stack.push((Frame::If { cond }, Vec::new()));
    }

    /// Closes the innermost open scope. Does nothing at the root.
    pub fn exit(&mut self) {
        if self.stack.len() <= 1 {
            return;
        }
        let Some((frame, body)) = self.stack.pop() else {
            return;
        };
        let body = Stmt::seq(body);
        let stmt = match frame {
            Frame::Root => body,
            Frame::Let { var, value } => Stmt::let_in(var, value, body),
            Frame::For { var, extent, unroll } => Stmt::For {
                var,
                extent,
                unroll,
                body: Box::new(body),
            },
            Frame::If { cond } => Stmt::if_then(cond, body),
        };
        self.append(stmt);
    }

    /// Closes every open scope and returns the built statement.
    pub fn finish(mut self) -> Stmt {
        while self.stack.len() > 1 {
            self.exit();
        }
        let body = self.stack.pop().map(|(_, body)| body).unwrap_or_default();
        Stmt::seq(body)
    }
}
