use std::collections::{HashSet, VecDeque};

use tessel_ir::IRModule;

use super::{ModuleTransform, Stage};
use crate::error::PassError;

/// Removes functions not reachable through calls from a host-callable entry.
///
/// A module with no host-callable function at all is a device library and is
/// left as is.
#[derive(Debug)]
pub struct DeadFunctionElimination;

impl ModuleTransform for DeadFunctionElimination {
    fn name(&self) -> &str {
        "dead_function_elimination"
    }

    fn stage(&self) -> Stage {
        Stage::DeadCode
    }

    fn run(&self, mut module: IRModule) -> Result<IRModule, PassError> {
        let mut queue: VecDeque<String> = module
            .iter()
            .filter(|f| f.attrs.worker.is_host_callable())
            .map(|f| f.name.clone())
            .collect();
        if queue.is_empty() {
            return Ok(module);
        }
        let mut reachable: HashSet<String> = queue.iter().cloned().collect();
        while let Some(name) = queue.pop_front() {
            let Some(func) = module.get(&name) else {
                continue;
            };
            for callee in func.callees() {
                if module.contains(&callee) && reachable.insert(callee.clone()) {
                    queue.push_back(callee);
                }
            }
        }
        module.retain(|f| {
            let keep = reachable.contains(&f.name);
            if !keep {
                log::debug!("dead_function_elimination: dropping `{}`", f.name);
            }
            keep
        });
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_ir::{Expr, Function, Stmt, Worker};

    fn calling(name: &str, worker: Worker, callees: &[&str]) -> Function {
        let mut f = Function::new(name, worker);
        f.body = Stmt::seq(
            callees
                .iter()
                .map(|c| Stmt::Evaluate(Expr::call(*c, vec![])))
                .collect(),
        );
        f
    }

    #[test]
    fn keeps_transitive_callees() {
        let mut m = IRModule::new();
        m.add(calling("main", Worker::Host, &["kernel"])).unwrap();
        m.add(calling("kernel", Worker::grid(1, 32), &["helper", "threadIdx.x"])).unwrap();
        m.add(calling("helper", Worker::Thread, &[])).unwrap();
        m.add(calling("unused", Worker::Warp, &["helper"])).unwrap();
        let m = DeadFunctionElimination.run(m).unwrap();
        assert_eq!(m.names(), ["main", "kernel", "helper"]);
    }

    #[test]
    fn device_library_is_untouched() {
        let mut m = IRModule::new();
        m.add(calling("a", Worker::Warp, &[])).unwrap();
        m.add(calling("b", Worker::Thread, &[])).unwrap();
        let before = m.clone();
        assert_eq!(DeadFunctionElimination.run(m).unwrap(), before);
    }
}
