//! Error types for the optimization pipelines.

use tessel_ir::IrError;

/// Errors raised by graph passes and module transforms.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    /// Malformed IR encountered by a pass.
    #[error(transparent)]
    Ir(#[from] IrError),

    /// Compile-time evaluation of a constant subgraph failed.
    #[error("constant evaluation failed: {0}")]
    Eval(String),

    /// A module transform was scheduled after one of a later stage.
    #[error("lowering transform `{transform}` cannot run after `{after}`")]
    OutOfOrder { transform: String, after: String },
}
