//! Module Lowering Pipeline.
//!
//! Transforms run over whole [`IRModule`]s in a fixed stage order: dead code
//! elimination, packed wrappers, flattening, constant simplification, then
//! bound-aware simplification. [`Lowerer::new`] rejects any transform list
//! that steps back to an earlier stage.

mod bound;
mod dce;
mod flatten;
mod packed;
mod simplify;

pub use bound::BoundSimplify;
pub use dce::DeadFunctionElimination;
pub use flatten::FlattenTensors;
pub use packed::{PackedFunctions, type_code};
pub use simplify::ConstSimplify;

use std::fmt::Debug;

use tessel_ir::IRModule;

use crate::error::PassError;

/// Position of a transform in the lowering order.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum Stage {
    DeadCode,
    Packed,
    Flatten,
    ConstSimplify,
    BoundSimplify,
}

/// An `IRModule`-to-`IRModule` transform.
///
/// Transforms never touch a function's attributes.
pub trait ModuleTransform: Debug {
    fn name(&self) -> &str;

    fn stage(&self) -> Stage;

    fn run(&self, module: IRModule) -> Result<IRModule, PassError>;
}

/// An ordered list of module transforms.
#[derive(Debug)]
pub struct Lowerer {
    transforms: Vec<Box<dyn ModuleTransform>>,
}

impl Lowerer {
    /// Fails with [`PassError::OutOfOrder`] if a transform's stage precedes
    /// the stage of the one before it.
    pub fn new(transforms: Vec<Box<dyn ModuleTransform>>) -> Result<Self, PassError> {
        for pair in transforms.windows(2) {
            if pair[1].stage() < pair[0].stage() {
                return Err(PassError::OutOfOrder {
                    transform: pair[1].name().to_string(),
                    after: pair[0].name().to_string(),
                });
            }
        }
        Ok(Self { transforms })
    }

    /// All five transforms in stage order.
    pub fn canonical() -> Self {
        Self {
            transforms: vec![
                Box::new(DeadFunctionElimination),
                Box::new(PackedFunctions),
                Box::new(FlattenTensors),
                Box::new(ConstSimplify),
                Box::new(BoundSimplify),
            ],
        }
    }

    pub fn names(&self) -> Vec<&str> {
        self.transforms.iter().map(|t| t.name()).collect()
    }

    pub fn run(&self, mut module: IRModule) -> Result<IRModule, PassError> {
        for transform in &self.transforms {
            let before = module.len();
            module = transform.run(module)?;
            log::debug!(
                "lowering `{}`: {} -> {} functions",
                transform.name(),
                before,
                module.len()
            );
        }
        Ok(module)
    }
}

/// Runs the canonical lowering pipeline.
pub fn lower(module: IRModule) -> Result<IRModule, PassError> {
    Lowerer::canonical().run(module)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessel_ir::{Function, Worker};

    #[test]
    fn canonical_order() {
        assert_eq!(
            Lowerer::canonical().names(),
            ["dead_function_elimination", "packed_functions", "flatten_tensors", "const_simplify", "bound_simplify"]
        );
    }

    #[test]
    fn reversed_order_is_rejected() {
        let err = Lowerer::new(vec![Box::new(FlattenTensors), Box::new(DeadFunctionElimination)]).unwrap_err();
        assert!(matches!(
            err,
            PassError::OutOfOrder { ref transform, ref after }
                if transform == "dead_function_elimination" && after == "flatten_tensors"
        ));
    }

    #[test]
    fn repeated_stages_and_subsets_are_accepted() {
        let lowerer = Lowerer::new(vec![
            Box::new(DeadFunctionElimination),
            Box::new(ConstSimplify),
            Box::new(ConstSimplify),
        ])
        .unwrap();
        assert_eq!(lowerer.names().len(), 3);
    }

    #[test]
    fn lower_keeps_attributes() {
        let mut module = IRModule::new();
        let mut kernel = Function::new("kernel", Worker::grid(2, 128));
        kernel.attrs.label = Some("test".into());
        module.add(kernel).unwrap();
        let lowered = lower(module).unwrap();
        let kernel = lowered.get("kernel").unwrap();
        assert_eq!(kernel.attrs.worker, Worker::grid(2, 128));
        assert_eq!(kernel.attrs.label.as_deref(), Some("test"));
        assert_eq!(kernel.attrs.packed_func, None);
        assert_eq!(lowered.names(), ["kernel", "kernel_packed"]);
    }
}
