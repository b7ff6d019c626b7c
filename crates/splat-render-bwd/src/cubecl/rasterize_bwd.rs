//! Backward rasterizer (C8): walks each tile's sorted contributors in
//! reverse, reconstructing the forward alpha-over to recover per-splat
//! gradients (spec §4.8). Unlike the forward rasterizer this does not batch
//! contributors through shared memory; each pixel thread re-reads the
//! `projected` record for every raw entry in its tile's range directly,
//! trading the forward's shared-memory reuse for a simpler reverse walk that
//! has to skip non-contributing entries (`alpha < MIN_ALPHA`) without
//! knowing their positions ahead of time.

use crate::fixed_point::encode_fixed;
use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;
use splat_render::cubecl::helpers::{MIN_ALPHA, TILE_WIDTH, calc_sigma, map_1d_to_2d};

/// Number of f32 words per compacted projected splat record (must match
/// `splat_render::cubecl::project::PROJECTED_STRIDE`).
const PROJECTED_STRIDE: u32 = 9;

#[cube(launch_unchecked)]
#[allow(clippy::too_many_arguments)]
pub fn rasterize_backward(
    compact_gid_from_isect: &Tensor<u32>,
    tile_offsets: &Tensor<u32>,
    projected: &Tensor<f32>,
    out_transmittance: &Tensor<f32>,
    n_contrib: &Tensor<u32>,
    v_output: &Tensor<f32>,
    v_projected: &mut Tensor<Atomic<i32>>,
    uniforms: &Tensor<f32>, // [img_w, img_h, tiles_x]
) {
    let global_id = ABSOLUTE_POS;
    let img_w = u32::cast_from(uniforms[0]);
    let img_h = u32::cast_from(uniforms[1]);
    let tiles_x = u32::cast_from(uniforms[2]);

    let pix = map_1d_to_2d(global_id, tiles_x);
    let pix_x = pix.0;
    let pix_y = pix.1;
    if pix_x >= img_w || pix_y >= img_h {
        terminate!();
    }
    let pix_id = pix_x + pix_y * img_w;

    let pixel_x = f32::cast_from(pix_x) + 0.5;
    let pixel_y = f32::cast_from(pix_y) + 0.5;

    let tile_id = (pix_x / TILE_WIDTH) + (pix_y / TILE_WIDTH) * tiles_x;
    let range_start = tile_offsets[tile_id];
    let range_end = tile_offsets[tile_id + 1];

    let mut remaining = n_contrib[pix_id];
    let mut t = out_transmittance[pix_id];
    let mut r_r = 0.0f32;
    let mut r_g = 0.0f32;
    let mut r_b = 0.0f32;

    let v_out_r = v_output[pix_id * 4];
    let v_out_g = v_output[pix_id * 4 + 1];
    let v_out_b = v_output[pix_id * 4 + 2];

    let mut idx = range_end;
    while idx > range_start && remaining > 0u32 {
        idx -= 1u32;
        let compact_gid = compact_gid_from_isect[idx];
        let base = compact_gid * PROJECTED_STRIDE;
        let xy_x = projected[base];
        let xy_y = projected[base + 1];
        let conic_a = projected[base + 2];
        let conic_b = projected[base + 3];
        let conic_c = projected[base + 4];
        let color_r = projected[base + 5];
        let color_g = projected[base + 6];
        let color_b = projected[base + 7];
        let opacity = projected[base + 8];

        let sigma = calc_sigma(pixel_x, pixel_y, conic_a, conic_b, conic_c, xy_x, xy_y);
        let exp_neg_sigma = f32::exp(-sigma);
        let alpha_raw = opacity * exp_neg_sigma;

        if sigma >= 0.0 && alpha_raw >= MIN_ALPHA {
            let clamped = alpha_raw > 0.99;
            let alpha = f32::min(0.99, alpha_raw);

            let t_before = t / (1.0 - alpha);

            let v_color_r = alpha * t_before * v_out_r;
            let v_color_g = alpha * t_before * v_out_g;
            let v_color_b = alpha * t_before * v_out_b;

            let dl_dalpha = if clamped {
                0.0
            } else {
                t_before
                    * ((color_r - r_r) * v_out_r
                        + (color_g - r_g) * v_out_g
                        + (color_b - r_b) * v_out_b)
            };

            let d_sigma = if clamped { 0.0 } else { dl_dalpha * (-alpha) };
            let d_opacity = if clamped { 0.0 } else { dl_dalpha * exp_neg_sigma };

            let dx = xy_x - pixel_x;
            let dy = xy_y - pixel_y;
            let v_conic_a = d_sigma * 0.5 * dx * dx;
            let v_conic_b = d_sigma * dx * dy;
            let v_conic_c = d_sigma * 0.5 * dy * dy;
            let v_mean_x = d_sigma * (conic_a * dx + conic_b * dy);
            let v_mean_y = d_sigma * (conic_b * dx + conic_c * dy);

            Atomic::add(&v_projected[base], encode_fixed(v_mean_x));
            Atomic::add(&v_projected[base + 1], encode_fixed(v_mean_y));
            Atomic::add(&v_projected[base + 2], encode_fixed(v_conic_a));
            Atomic::add(&v_projected[base + 3], encode_fixed(v_conic_b));
            Atomic::add(&v_projected[base + 4], encode_fixed(v_conic_c));
            Atomic::add(&v_projected[base + 5], encode_fixed(v_color_r));
            Atomic::add(&v_projected[base + 6], encode_fixed(v_color_g));
            Atomic::add(&v_projected[base + 7], encode_fixed(v_color_b));
            Atomic::add(&v_projected[base + 8], encode_fixed(d_opacity));

            r_r = alpha * color_r + (1.0 - alpha) * r_r;
            r_g = alpha * color_g + (1.0 - alpha) * r_g;
            r_b = alpha * color_b + (1.0 - alpha) * r_b;
            t = t_before;
            remaining -= 1u32;
        }
    }
}
