//! Functions and modules: the compiled artifact.

use crate::error::IrError;
use crate::expr::{Expr, Var};
use crate::stmt::Stmt;
use crate::task::Worker;
use crate::types::Type;

/// Attributes carried by every function through the lowering pipeline.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionAttrs {
    /// Where the function runs and how it is launched.
    pub worker: Worker,
    /// Set on a packed wrapper: the entry function it forwards to.
    pub packed_func: Option<String>,
    /// Free-form label, e.g. the implementer that produced the function.
    pub label: Option<String>,
}

impl FunctionAttrs {
    pub fn new(worker: Worker) -> Self {
        Self {
            worker,
            packed_func: None,
            label: None,
        }
    }
}

/// A low-level function.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    /// Formal parameters, in calling order.
    pub params: Vec<Var>,
    pub ret_type: Type,
    /// Function-local variables declared outside any `Let`.
    pub local_vars: Vec<Var>,
    pub body: Stmt,
    pub attrs: FunctionAttrs,
}

impl Function {
    /// Creates an empty `void` function on `worker`.
    pub fn new(name: impl Into<String>, worker: Worker) -> Self {
        Self {
            name: name.into(),
            params: Vec::new(),
            ret_type: Type::Void,
            local_vars: Vec::new(),
            body: Stmt::Seq(Vec::new()),
            attrs: FunctionAttrs::new(worker),
        }
    }

    /// Names of every function or intrinsic called from the body, in first-use order.
    pub fn callees(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        self.body.walk_exprs(&mut |e| {
            if let Expr::Call { func, .. } = e {
                if !names.contains(func) {
                    names.push(func.clone());
                }
            }
        });
        names
    }
}

/// An ordered collection of uniquely named functions.
///
/// Functions keep insertion order, so merging modules in a fixed order
/// always yields the same module.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IRModule {
    functions: Vec<Function>,
}

impl IRModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `func`, rejecting a name already present.
    pub fn add(&mut self, func: Function) -> Result<(), IrError> {
        if self.contains(&func.name) {
            return Err(IrError::DuplicateFunction { name: func.name });
        }
        self.functions.push(func);
        Ok(())
    }

    /// Appends every function of `other`, rejecting name collisions.
    pub fn merge(&mut self, other: IRModule) -> Result<(), IrError> {
        for func in other.functions {
            self.add(func)?;
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Function> {
        self.functions.iter_mut()
    }

    pub fn names(&self) -> Vec<&str> {
        self.functions.iter().map(|f| f.name.as_str()).collect()
    }

    /// Keeps only the functions for which `keep` returns `true`.
    pub fn retain(&mut self, keep: impl FnMut(&Function) -> bool) {
        self.functions.retain(keep);
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl IntoIterator for IRModule {
    type Item = Function;
    type IntoIter = std::vec::IntoIter<Function>;

    fn into_iter(self) -> Self::IntoIter {
        self.functions.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_new() {
        let f = Function::new("k", Worker::Warp);
        assert_eq!(f.name, "k");
        assert!(f.params.is_empty());
        assert_eq!(f.ret_type, Type::Void);
        assert_eq!(f.attrs.worker, Worker::Warp);
    }

    #[test]
    fn duplicate_names_rejected() {
        let mut m = IRModule::new();
        m.add(Function::new("a", Worker::Host)).unwrap();
        let err = m.add(Function::new("a", Worker::Host)).unwrap_err();
        assert!(matches!(err, IrError::DuplicateFunction { ref name } if name == "a"));
    }

    #[test]
    fn merge_preserves_order() {
        let mut a = IRModule::new();
        a.add(Function::new("x", Worker::Host)).unwrap();
        let mut b = IRModule::new();
        b.add(Function::new("z", Worker::Host)).unwrap();
        b.add(Function::new("y", Worker::Host)).unwrap();
        a.merge(b).unwrap();
        assert_eq!(a.names(), vec!["x", "z", "y"]);
    }

    #[test]
    fn callees_are_collected() {
        let mut f = Function::new("host", Worker::Host);
        f.body = Stmt::seq(vec![
            Stmt::Evaluate(Expr::call("kernel", vec![])),
            Stmt::Evaluate(Expr::call("kernel", vec![])),
            Stmt::Evaluate(Expr::call("helper", vec![Expr::var(&Var::int("n"))])),
        ]);
        assert_eq!(f.callees(), vec!["kernel".to_string(), "helper".to_string()]);
    }
}
