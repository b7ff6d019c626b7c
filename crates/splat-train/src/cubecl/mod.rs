//! GPU kernels for the optimizer and densify stages (C10-C12).

pub mod adam;
pub mod densify;
pub mod metric;
