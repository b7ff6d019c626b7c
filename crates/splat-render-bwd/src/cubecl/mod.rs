//! GPU kernels for the backward training pass (C7-C9).

pub mod loss;
pub mod project_bwd;
pub mod rasterize_bwd;
