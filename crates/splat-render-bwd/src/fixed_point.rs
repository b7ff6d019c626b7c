//! Fixed-point encoding shared by the backward rasterizer (C8, which only
//! has atomic add on integer buffers for most backends) and backward
//! geometry (C9, which decodes). The scale must be identical on both sides
//! of the accumulation or gradients decode to the wrong magnitude (spec §9).

use burn_cubecl::cubecl::prelude::*;

/// Chosen so a single iteration's per-element gradient magnitude (losses are
/// normalized per-pixel, splats per-tile contribute a bounded number of
/// times) stays well inside `i32`'s range after scaling, while still
/// resolving gradients a few orders of magnitude below 1.0.
pub const GRAD_FIXED_POINT_SCALE: f32 = 1.0e6;

#[cube]
pub fn encode_fixed(v: f32) -> i32 {
    i32::cast_from(v * GRAD_FIXED_POINT_SCALE)
}

#[cube]
pub fn decode_fixed(v: i32) -> f32 {
    f32::cast_from(v) / GRAD_FIXED_POINT_SCALE
}
