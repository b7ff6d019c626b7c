//! GPU-side tile-key construction. Conceptually the same contract as the
//! host encoder in `splat_store::tile_key` (high 16 bits = `tile_id+1`, low
//! 16 bits = a monotonic encoding of depth) but quantizes depth via a plain
//! affine scale-and-cast rather than a float-bit reinterpret: every splat
//! reaching this stage has already survived the forward cull, which
//! guarantees `depth > 0` (camera-space z), so ordering is preserved
//! without needing to touch the IEEE-754 bit pattern from inside the
//! kernel.

use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

/// Depths beyond this are clamped; tiles this far apart in depth never need
/// to be distinguished at finer resolution than the 16-bit quantization
/// below gives anyway.
pub const DEPTH_QUANT_MAX: f32 = 1.0e5;

#[cube]
pub fn encode_depth_key16(depth: f32) -> u32 {
    let clamped = f32::clamp(depth, 0.0, DEPTH_QUANT_MAX);
    let normalized = clamped / DEPTH_QUANT_MAX;
    u32::cast_from(normalized * 65535.0)
}

#[cube]
pub fn encode_tile_key(tile_id: u32, depth: f32) -> u32 {
    let depth_q16 = encode_depth_key16(depth);
    ((tile_id + 1) << 16) | (depth_q16 & 0xffffu32)
}
