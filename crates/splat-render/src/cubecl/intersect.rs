//! Second half of C4: for every compacted, visible splat, walks its screen
//! bbox tile-by-tile and emits one `(tile_key, compact_gid)` pair per tile
//! it actually contributes to. A prepass counts tiles-per-splat so C2 can
//! scan them into write offsets before the emitting pass runs.

use super::helpers::*;
use super::project::PROJECTED_STRIDE;
use super::tile_key::encode_tile_key;
use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

#[cube]
#[allow(clippy::too_many_arguments)]
fn splat_tile_bbox(
    mean_x: f32,
    mean_y: f32,
    conic_a: f32,
    conic_b: f32,
    conic_c: f32,
    opacity: f32,
    tiles_x: u32,
    tiles_y: u32,
) -> (u32, u32, u32, u32) {
    let power_threshold = 2.0 * f32::log(opacity * 128.0);
    let cov = mat2_inverse(conic_a, conic_b, conic_b, conic_c);
    let extent = compute_bbox_extent(cov.0, cov.1, cov.3, power_threshold);
    let extent_x = extent.0 + 2.0;
    let extent_y = extent.1 + 2.0;

    let min_x_f = f32::max(0.0, mean_x - extent_x);
    let min_y_f = f32::max(0.0, mean_y - extent_y);
    let max_x_f = mean_x + extent_x;
    let max_y_f = mean_y + extent_y;

    let min_tx = u32::cast_from(min_x_f) / TILE_WIDTH;
    let min_ty = u32::cast_from(min_y_f) / TILE_WIDTH;
    let mut max_tx = u32::cast_from(f32::max(0.0, max_x_f)) / TILE_WIDTH + 1u32;
    let mut max_ty = u32::cast_from(f32::max(0.0, max_y_f)) / TILE_WIDTH + 1u32;
    max_tx = Min::min(max_tx, tiles_x);
    max_ty = Min::min(max_ty, tiles_y);

    (min_tx, min_ty, max_tx, max_ty)
}

#[cube(launch_unchecked)]
pub fn count_intersects(
    projected: &Tensor<f32>,
    num_visible: &Tensor<u32>,
    tile_counts: &mut Tensor<i32>,
    tiles_x: u32,
    tiles_y: u32,
) {
    let compact_gid = ABSOLUTE_POS;
    let num_vis = num_visible[0];
    if compact_gid >= num_vis {
        terminate!();
    }

    let base = compact_gid * PROJECTED_STRIDE;
    let bbox = splat_tile_bbox(
        projected[base],
        projected[base + 1],
        projected[base + 2],
        projected[base + 3],
        projected[base + 4],
        projected[base + 8],
        tiles_x,
        tiles_y,
    );
    let width = bbox.2 - bbox.0;
    let height = bbox.3 - bbox.1;
    tile_counts[compact_gid] = i32::cast_from(width * height);
}

#[cube(launch_unchecked)]
#[allow(clippy::too_many_arguments)]
pub fn emit_intersects(
    projected: &Tensor<f32>,
    depths: &Tensor<f32>,
    isect_offsets: &Tensor<i32>,
    num_visible: &Tensor<u32>,
    keys_out: &mut Tensor<u32>,
    values_out: &mut Tensor<u32>,
    tiles_x: u32,
    tiles_y: u32,
) {
    let compact_gid = ABSOLUTE_POS;
    let num_vis = num_visible[0];
    if compact_gid >= num_vis {
        terminate!();
    }

    let base = compact_gid * PROJECTED_STRIDE;
    let bbox = splat_tile_bbox(
        projected[base],
        projected[base + 1],
        projected[base + 2],
        projected[base + 3],
        projected[base + 4],
        projected[base + 8],
        tiles_x,
        tiles_y,
    );
    let width = bbox.2 - bbox.0;
    let height = bbox.3 - bbox.1;
    let num_tiles = width * height;

    let write_base = u32::cast_from(isect_offsets[compact_gid]);
    let depth = depths[compact_gid];

    let mut i = 0u32;
    while i < num_tiles {
        let tx = bbox.0 + (i % width);
        let ty = bbox.1 + (i / width);
        let tile_id = tx + ty * tiles_x;
        let key = encode_tile_key(tile_id, depth);
        keys_out[write_base + i] = key;
        values_out[write_base + i] = compact_gid;
        i += 1;
    }
}
