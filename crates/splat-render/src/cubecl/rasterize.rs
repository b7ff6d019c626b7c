//! Tile rasterizer (C6): one workgroup per 16x16 tile, front-to-back
//! alpha-over, with shared-memory batching of the tile's contributors
//! (spec §4.6).

use super::helpers::*;
use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

/// Number of f32 words cached per splat in shared memory: xy(2) + conic(3)
/// + color(3) + opacity(1).
const BATCH_STRIDE: u32 = 9;

#[cube(launch_unchecked)]
#[allow(clippy::too_many_arguments)]
pub fn rasterize_forward(
    compact_gid_from_isect: &Tensor<u32>,
    tile_offsets: &Tensor<u32>,
    projected: &Tensor<f32>,
    out_color: &mut Tensor<f32>,
    out_transmittance: &mut Tensor<f32>,
    out_n_contrib: &mut Tensor<u32>,
    uniforms: &Tensor<f32>, // [img_w, img_h, tiles_x, bg_r, bg_g, bg_b]
) {
    let global_id = ABSOLUTE_POS;

    let img_w = u32::cast_from(uniforms[0]);
    let img_h = u32::cast_from(uniforms[1]);
    let tiles_x = u32::cast_from(uniforms[2]);
    let bg_r = uniforms[3];
    let bg_g = uniforms[4];
    let bg_b = uniforms[5];

    let pix = map_1d_to_2d(global_id, tiles_x);
    let pix_x = pix.0;
    let pix_y = pix.1;
    let inside = pix_x < img_w && pix_y < img_h;
    let pix_id = if inside { pix_x + pix_y * img_w } else { 0u32 };

    let pixel_x = f32::cast_from(pix_x) + 0.5;
    let pixel_y = f32::cast_from(pix_y) + 0.5;

    let tile_id = (pix_x / TILE_WIDTH) + (pix_y / TILE_WIDTH) * tiles_x;
    let range_start = tile_offsets[tile_id];
    let range_end = tile_offsets[tile_id + 1];

    let mut shared_batch = SharedMemory::<f32>::new(TILE_SIZE * BATCH_STRIDE);

    let mut t = 1.0f32;
    let mut pix_r = 0.0f32;
    let mut pix_g = 0.0f32;
    let mut pix_b = 0.0f32;
    let mut n_contrib = 0u32;
    let mut done = !inside;

    let mut batch_start = range_start;
    while batch_start < range_end {
        let remaining = Min::min(TILE_SIZE, range_end - batch_start);

        sync_cube();
        if UNIT_POS < remaining {
            let isect_id = batch_start + UNIT_POS;
            let compact_gid = compact_gid_from_isect[isect_id];
            let src = compact_gid * 9;
            let dst = UNIT_POS * BATCH_STRIDE;
            let mut k = 0u32;
            while k < BATCH_STRIDE {
                shared_batch[dst + k] = projected[src + k];
                k += 1;
            }
        }
        sync_cube();

        let mut t_idx = 0u32;
        while !done && t_idx < remaining {
            let base = t_idx * BATCH_STRIDE;
            let xy_x = shared_batch[base];
            let xy_y = shared_batch[base + 1];
            let conic_a = shared_batch[base + 2];
            let conic_b = shared_batch[base + 3];
            let conic_c = shared_batch[base + 4];
            let color_r = shared_batch[base + 5];
            let color_g = shared_batch[base + 6];
            let color_b = shared_batch[base + 7];
            let opacity = shared_batch[base + 8];

            let sigma = calc_sigma(pixel_x, pixel_y, conic_a, conic_b, conic_c, xy_x, xy_y);
            let alpha = f32::min(0.99, opacity * f32::exp(-sigma));

            if sigma >= 0.0 && alpha >= MIN_ALPHA {
                let next_t = t * (1.0 - alpha);
                if next_t < EPS_STOP {
                    done = true;
                } else {
                    let vis = alpha * t;
                    pix_r += color_r * vis;
                    pix_g += color_g * vis;
                    pix_b += color_b * vis;
                    t = next_t;
                    n_contrib += 1u32;
                }
            }
            t_idx += 1u32;
        }

        batch_start += TILE_SIZE;
    }

    if inside {
        let out_base = pix_id * 4;
        out_color[out_base] = pix_r + t * bg_r;
        out_color[out_base + 1] = pix_g + t * bg_g;
        out_color[out_base + 2] = pix_b + t * bg_b;
        out_color[out_base + 3] = 1.0 - t;
        out_transmittance[pix_id] = t;
        out_n_contrib[pix_id] = n_contrib;
    }
}

/// Repeats a 4-float `fill` value across every pixel of `out`. Used for the
/// zero-Gaussian-scene fast path, which skips the whole pipeline above.
#[cube(launch_unchecked)]
pub fn fill_solid(out: &mut Tensor<f32>, fill: &Tensor<f32>, num_pixels: u32) {
    let pix_id = ABSOLUTE_POS;
    if pix_id < num_pixels {
        let base = pix_id * 4;
        out[base] = fill[0];
        out[base + 1] = fill[1];
        out[base + 2] = fill[2];
        out[base + 3] = fill[3];
    }
}
