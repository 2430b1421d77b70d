//! Built-in primitives: hardware indices and math intrinsics.
//!
//! Primitives are represented as [`Expr::Call`]s to reserved names, so they
//! survive every pass unchanged and are never mistaken for module functions.

use crate::expr::Expr;
use crate::task::WARP_SIZE;

pub const THREAD_IDX: &str = "threadIdx.x";
pub const BLOCK_IDX: &str = "blockIdx.x";
pub const BLOCK_DIM: &str = "blockDim.x";

/// Math intrinsics understood by code generation and the constant evaluator.
pub const MATH_INTRINSICS: &[&str] = &[
    "abs", "exp", "log", "sqrt", "tanh", "sigmoid", "max", "min",
];

/// Index of the current thread within its block.
pub fn thread_idx() -> Expr {
    Expr::call(THREAD_IDX, vec![])
}

/// Index of the current block within the grid.
pub fn block_idx() -> Expr {
    Expr::call(BLOCK_IDX, vec![])
}

pub fn block_dim() -> Expr {
    Expr::call(BLOCK_DIM, vec![])
}

/// Lane of the current thread within its warp: `threadIdx.x % 32`.
pub fn lane_id() -> Expr {
    thread_idx() % Expr::int(WARP_SIZE)
}

/// Returns `true` if `name` refers to a primitive rather than a module function.
pub fn is_primitive(name: &str) -> bool {
    matches!(name, THREAD_IDX | BLOCK_IDX | BLOCK_DIM) || MATH_INTRINSICS.contains(&name)
}

/// Calls math intrinsic `name` on `args`.
pub fn math(name: &str, args: Vec<Expr>) -> Expr {
    Expr::call(name, args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::BinaryOp;

    #[test]
    fn lane_id_is_thread_mod_warp() {
        match lane_id() {
            Expr::Binary { op, lhs, rhs } => {
                assert_eq!(op, BinaryOp::Mod);
                assert_eq!(*lhs, thread_idx());
                assert_eq!(rhs.as_int(), Some(32));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn primitives_are_recognized() {
        assert!(is_primitive("threadIdx.x"));
        assert!(is_primitive("exp"));
        assert!(!is_primitive("matmul_kernel"));
    }
}
