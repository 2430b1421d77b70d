//! Error types for the Tessel IR.

/// Errors that can occur when constructing, typing or validating IR.
#[derive(Debug, thiserror::Error)]
pub enum IrError {
    /// Two operands disagree in resolved scalar type.
    #[error("type mismatch in `{op}`: {lhs} vs {rhs}")]
    TypeMismatch {
        op: String,
        lhs: String,
        rhs: String,
    },

    /// A field that must be resolved still carries a pattern hole.
    #[error("unresolved {what}")]
    Unresolved { what: String },

    /// Operand shapes are incompatible.
    #[error("shape mismatch in {op}: {lhs:?} vs {rhs:?}")]
    ShapeMismatch {
        op: String,
        lhs: Vec<i64>,
        rhs: Vec<i64>,
    },

    /// An expression was used where a different kind of operand is required.
    #[error("invalid operand: {0}")]
    InvalidOperand(String),

    /// Two functions with the same name were merged into one module.
    #[error("duplicate function `{name}` in module")]
    DuplicateFunction { name: String },

    /// A tensor id does not belong to the graph.
    #[error("unknown tensor t{0}")]
    UnknownTensor(u32),

    /// The flow graph contains a cycle.
    #[error("flow graph contains a cycle through `{node}`")]
    CyclicGraph { node: String },
}
