//! Built-in implementers.

mod grid_naive;
mod warp_transfer;

pub use grid_naive::GridNaive;
pub use warp_transfer::CudaWarpTransferS2R;
