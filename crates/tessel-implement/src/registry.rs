//! Implementer trait and the registry that dispatches tasks to implementers.

use std::fmt::Debug;

use tessel_ir::{IRModule, Task, TaskPattern};

use crate::error::ImplementError;
use crate::implementers::{CudaWarpTransferS2R, GridNaive};
use crate::matcher::{Binding, match_task, validate_pattern};

/// A code generator for the tasks its pattern accepts.
pub trait Implementer: Debug + Send + Sync {
    /// Unique registry key.
    fn key(&self) -> &str;

    /// Higher priorities win when several implementers match.
    fn priority(&self) -> i32 {
        0
    }

    fn task_pattern(&self) -> &TaskPattern;

    /// Emits a module defining a function named `task.name` on `task.worker`.
    fn implement(&self, task: &Task, binding: &Binding) -> Result<IRModule, ImplementError>;
}

/// Registered implementers, in registration order.
///
/// Registration takes `&mut self` and dispatch `&self`, so the set of
/// candidates cannot change while tasks are being compiled.
#[derive(Debug, Default)]
pub struct ImplementerRegistry {
    implementers: Vec<Box<dyn Implementer>>,
}

impl ImplementerRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in implementers.
    pub fn with_builtins() -> Self {
        let builtins: [Box<dyn Implementer>; 2] = [Box::new(GridNaive::new()), Box::new(CudaWarpTransferS2R::new())];
        Self {
            implementers: builtins.into(),
        }
    }

    /// Registers an implementer after validating its pattern.
    pub fn register(&mut self, implementer: Box<dyn Implementer>) -> Result<(), ImplementError> {
        let key = implementer.key().to_string();
        if self.get(&key).is_some() {
            return Err(ImplementError::DuplicateRegistration { key });
        }
        validate_pattern(implementer.task_pattern())
            .map_err(|reason| ImplementError::MalformedPattern { key: key.clone(), reason })?;
        log::debug!("registered implementer `{key}` (priority {})", implementer.priority());
        self.implementers.push(implementer);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&dyn Implementer> {
        self.implementers.iter().find(|i| i.key() == key).map(|i| &**i)
    }

    /// Registered keys, in registration order.
    pub fn keys(&self) -> Vec<&str> {
        self.implementers.iter().map(|i| i.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.implementers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.implementers.is_empty()
    }

    /// Picks the implementer for `task`: the highest priority among those
    /// whose pattern matches, the earliest registered on ties.
    pub fn select(&self, task: &Task) -> Result<(&dyn Implementer, Binding), ImplementError> {
        let mut best: Option<(&dyn Implementer, Binding)> = None;
        for candidate in &self.implementers {
            let binding = match match_task(candidate.task_pattern(), task) {
                Ok(binding) => binding,
                Err(reason) => {
                    log::debug!("`{}` declined `{}`: {reason}", candidate.key(), task.name);
                    continue;
                }
            };
            if best.as_ref().is_none_or(|(b, _)| candidate.priority() > b.priority()) {
                best = Some((&**candidate, binding));
            }
        }
        best.ok_or_else(|| ImplementError::NoImplementerFound {
            task: task.name.clone(),
            worker: task.worker,
        })
    }

    /// Compiles `task` with the selected implementer and checks the result.
    pub fn dispatch(&self, task: &Task) -> Result<IRModule, ImplementError> {
        task.check_resolved()?;
        let (implementer, binding) = self.select(task)?;
        log::debug!("dispatching `{}` to `{}`", task.name, implementer.key());
        let module = implementer.implement(task, &binding)?;
        let invalid = |reason: String| ImplementError::InvalidOutput {
            key: implementer.key().to_string(),
            reason,
        };
        let func = module
            .get(&task.name)
            .ok_or_else(|| invalid(format!("no function named `{}`", task.name)))?;
        if func.attrs.worker != task.worker {
            return Err(invalid(format!(
                "function `{}` runs on {} but the task targets {}",
                task.name, func.attrs.worker, task.worker
            )));
        }
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_ir::{DataType, Expr, Function, TensorComputePattern, TensorInput, Worker, compute};

    #[derive(Debug)]
    struct Fixed {
        key: &'static str,
        priority: i32,
        pattern: TaskPattern,
        emit_worker: Option<Worker>,
    }

    impl Fixed {
        fn new(key: &'static str, priority: i32) -> Self {
            Self {
                key,
                priority,
                pattern: TaskPattern {
                    compute_pattern: Expr::ComputePattern(TensorComputePattern {
                        rank: None,
                        allow_reduce: true,
                    }),
                    required_params: vec![],
                    required_param_types: vec![],
                    allow_tensor_extra_params: true,
                    worker: Worker::any_grid(),
                },
                emit_worker: None,
            }
        }
    }

    impl Implementer for Fixed {
        fn key(&self) -> &str {
            self.key
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn task_pattern(&self) -> &TaskPattern {
            &self.pattern
        }

        fn implement(&self, task: &Task, _binding: &Binding) -> Result<IRModule, ImplementError> {
            let mut f = Function::new(task.name.clone(), self.emit_worker.unwrap_or(task.worker));
            f.attrs.label = Some(self.key.to_string());
            let mut m = IRModule::new();
            m.add(f)?;
            Ok(m)
        }
    }

    fn task() -> Task {
        let x = TensorInput::new("t0", DataType::Float32, &[4]);
        let c = compute("t1", &[4], "t1_i", |ax| -x.at(vec![Expr::var(&ax[0])]));
        Task::from_compute("neg_t1", vec![x], c, Worker::grid(1, 256)).unwrap()
    }

    fn chosen(reg: &ImplementerRegistry) -> String {
        let m = reg.dispatch(&task()).unwrap();
        m.get("neg_t1").and_then(|f| f.attrs.label.clone()).unwrap()
    }

    #[test]
    fn highest_priority_wins() {
        let mut reg = ImplementerRegistry::new();
        reg.register(Box::new(Fixed::new("low", 0))).unwrap();
        reg.register(Box::new(Fixed::new("high", 5))).unwrap();
        reg.register(Box::new(Fixed::new("mid", 2))).unwrap();
        assert_eq!(chosen(&reg), "high");
    }

    #[test]
    fn ties_go_to_first_registered() {
        let mut reg = ImplementerRegistry::new();
        reg.register(Box::new(Fixed::new("first", 1))).unwrap();
        reg.register(Box::new(Fixed::new("second", 1))).unwrap();
        assert_eq!(chosen(&reg), "first");
    }

    #[test]
    fn duplicate_keys_are_rejected() {
        let mut reg = ImplementerRegistry::new();
        reg.register(Box::new(Fixed::new("a", 0))).unwrap();
        let err = reg.register(Box::new(Fixed::new("a", 3))).unwrap_err();
        assert!(matches!(err, ImplementError::DuplicateRegistration { ref key } if key == "a"));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn malformed_patterns_are_rejected_at_registration() {
        let mut bad = Fixed::new("bad", 0);
        bad.pattern.required_param_types.push(tessel_ir::Type::Void);
        let mut reg = ImplementerRegistry::new();
        assert!(matches!(
            reg.register(Box::new(bad)),
            Err(ImplementError::MalformedPattern { .. })
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn no_candidate_names_the_task() {
        let mut reg = ImplementerRegistry::new();
        let mut warp_only = Fixed::new("warp", 0);
        warp_only.pattern.worker = Worker::Warp;
        reg.register(Box::new(warp_only)).unwrap();
        let err = reg.dispatch(&task()).unwrap_err();
        assert!(matches!(err, ImplementError::NoImplementerFound { ref task, .. } if task == "neg_t1"));
        assert!(err.to_string().contains("neg_t1"));
    }

    #[test]
    fn output_must_keep_the_task_worker() {
        let mut liar = Fixed::new("liar", 0);
        liar.emit_worker = Some(Worker::Host);
        let mut reg = ImplementerRegistry::new();
        reg.register(Box::new(liar)).unwrap();
        assert!(matches!(
            reg.dispatch(&task()),
            Err(ImplementError::InvalidOutput { .. })
        ));
    }

    #[test]
    fn builtins_are_registered_in_order() {
        let reg = ImplementerRegistry::with_builtins();
        assert_eq!(reg.keys(), ["grid_naive_implementer", "cuda_warp_transfer_s2r_implementer"]);
    }
}
