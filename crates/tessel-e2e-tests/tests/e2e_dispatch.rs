//! Implementer selection: pattern soundness, priority order, and the
//! no-candidate failure.

mod common;

use tessel_implement::implementers::{CudaWarpTransferS2R, GridNaive};
use tessel_implement::{Binding, ImplementError, Implementer, ImplementerRegistry, match_task};
use tessel_ir::{Expr, IRModule, RegisterScope, Stmt, Task, TaskPattern, Worker, dump_module};

/// Grid fallback under a different key and priority. Emitted functions carry
/// the key as their label.
#[derive(Debug)]
struct Tagged {
    key: &'static str,
    priority: i32,
    inner: GridNaive,
}

impl Tagged {
    fn boxed(key: &'static str, priority: i32) -> Box<dyn Implementer> {
        Box::new(Self {
            key,
            priority,
            inner: GridNaive::new(),
        })
    }
}

impl Implementer for Tagged {
    fn key(&self) -> &str {
        self.key
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn task_pattern(&self) -> &TaskPattern {
        self.inner.task_pattern()
    }

    fn implement(&self, task: &Task, binding: &Binding) -> Result<IRModule, ImplementError> {
        let mut module = self.inner.implement(task, binding)?;
        for f in module.iter_mut() {
            f.attrs.label = Some(self.key.to_string());
        }
        Ok(module)
    }
}

fn label_of(module: &IRModule, name: &str) -> Option<String> {
    module.get(name).and_then(|f| f.attrs.label.clone())
}

#[test]
fn unresolved_shape_matches_any_2d_task() {
    let pattern = common::copy_pattern();
    let Expr::TensorCompute(c) = &pattern.compute_pattern else {
        panic!("copy pattern is a tensor compute");
    };
    let b = match_task(&pattern, &common::copy_task(&[4, 4])).unwrap();
    assert_eq!((b.int(&c.shape[0]), b.int(&c.shape[1])), (Some(4), Some(4)));
    let b = match_task(&pattern, &common::copy_task(&[8, 16])).unwrap();
    assert_eq!((b.int(&c.shape[0]), b.int(&c.shape[1])), (Some(8), Some(16)));
    assert!(match_task(&pattern, &common::copy_task(&[2, 4, 4])).is_err());
}

#[test]
fn highest_priority_implementer_is_used() {
    let mut reg = ImplementerRegistry::new();
    reg.register(Tagged::boxed("low", 0)).unwrap();
    reg.register(Tagged::boxed("high", 5)).unwrap();
    reg.register(Tagged::boxed("middle", 2)).unwrap();
    let module = reg.dispatch(&common::copy_task(&[4, 4])).unwrap();
    assert_eq!(label_of(&module, "copy_t1").as_deref(), Some("high"));
}

#[test]
fn equal_priority_goes_to_the_first_registered() {
    let mut reg = ImplementerRegistry::new();
    reg.register(Tagged::boxed("first", 1)).unwrap();
    reg.register(Tagged::boxed("second", 1)).unwrap();
    let task = common::copy_task(&[4, 4]);
    assert_eq!(reg.select(&task).unwrap().0.key(), "first");
    let module = reg.dispatch(&task).unwrap();
    assert_eq!(label_of(&module, "copy_t1").as_deref(), Some("first"));
}

#[test]
fn builtins_split_work_by_worker() {
    let reg = ImplementerRegistry::with_builtins();
    let grid = common::copy_task(&[4, 4]);
    assert_eq!(reg.select(&grid).unwrap().0.key(), "grid_naive_implementer");
    let warp = common::transfer_task("s2r", &[2, 2], RegisterScope::identity(vec![2, 2]));
    assert_eq!(reg.select(&warp).unwrap().0.key(), "cuda_warp_transfer_s2r_implementer");
}

#[test]
fn no_candidate_reports_the_task() {
    let mut reg = ImplementerRegistry::new();
    reg.register(Box::new(CudaWarpTransferS2R::new())).unwrap();
    let err = reg.dispatch(&common::copy_task(&[4, 4])).unwrap_err();
    match &err {
        ImplementError::NoImplementerFound { task, worker } => {
            assert_eq!(task, "copy_t1");
            assert_eq!(*worker, Worker::grid(1, 256));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("copy_t1"));
}

#[test]
fn warp_transfer_stores_every_tile_element() {
    let reg = ImplementerRegistry::with_builtins();
    let task = common::transfer_task("s2r_2x2", &[2, 2], RegisterScope::identity(vec![2, 2]));
    let module = reg.dispatch(&task).unwrap();
    assert_eq!(module.names(), ["s2r_2x2"]);

    let f = module.get("s2r_2x2").unwrap();
    assert_eq!(f.attrs.worker, Worker::Warp);
    let params: Vec<&str> = f.params.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(params, ["smem", "regs"]);
    assert_eq!(f.body.count(|s| matches!(s, Stmt::BufferStore { .. })), 4);

    let text = dump_module(&module);
    for (i, j) in [(0, 0), (0, 1), (1, 0), (1, 1)] {
        assert!(text.contains(&format!("regs[{i}, {j}] = smem[{i}, {j}]")), "{text}");
    }
}

#[test]
fn warp_transfer_survives_lowering() {
    let reg = ImplementerRegistry::with_builtins();
    let task = common::transfer_task("s2r_2x2", &[2, 2], RegisterScope::identity(vec![2, 2]));
    let module = tessel_opt::lower(reg.dispatch(&task).unwrap()).unwrap();
    // Device-only modules get neither a packed wrapper nor dead-code removal.
    assert_eq!(module.names(), ["s2r_2x2"]);
    let f = module.get("s2r_2x2").unwrap();
    assert_eq!(f.attrs.worker, Worker::Warp);
    assert_eq!(f.body.count(|s| matches!(s, Stmt::BufferStore { .. })), 4);
    let text = f.body.to_string();
    assert!(text.contains("regs[3] = smem[3]"), "{text}");
}

#[test]
fn tasks_dispatch_concurrently_against_a_shared_registry() {
    let reg = ImplementerRegistry::with_builtins();
    let tasks: Vec<Task> = [[4, 4], [8, 16], [3, 5]].iter().map(|s| common::copy_task(s)).collect();
    let sequential: Vec<String> = tasks.iter().map(|t| dump_module(&reg.dispatch(t).unwrap())).collect();
    let shared = &reg;
    let parallel: Vec<String> = std::thread::scope(|s| {
        let handles: Vec<_> = tasks
            .iter()
            .map(|t| s.spawn(move || dump_module(&shared.dispatch(t).unwrap())))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(parallel, sequential);
}
