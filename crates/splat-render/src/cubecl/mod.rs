//! GPU kernels for the forward rasterization pipeline (C4-C6). Grouped in
//! one module so the backward pass crate can reuse the scalar math in
//! [`helpers`] and the key layout in [`tile_key`] without duplicating them.

pub mod helpers;
pub mod intersect;
pub mod project;
pub mod rasterize;
pub mod sh;
pub mod tile_key;
pub mod tile_range;
