//! Per-view error metric and per-Gaussian influence counts (C11), four
//! passes per spec §4.11: quantize per-pixel L1 error, reduce to a global
//! min/max, threshold into a binary flag map, then walk each flagged
//! pixel's contributor prefix to tally which Gaussians are responsible.

use splat_render::cubecl::helpers::{MIN_ALPHA, TILE_WIDTH, calc_sigma, map_1d_to_2d};

use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

/// Number of f32 words per compacted projected splat record (must match
/// `splat_render::cubecl::project::PROJECTED_STRIDE`).
const PROJECTED_STRIDE: u32 = 9;

/// Scale quantizing the [0,1]-clamped per-pixel L1 error into `u32` so the
/// min/max reduction can run as plain integer atomics.
const ERROR_QUANT_SCALE: f32 = 1_000_000.0;

/// Pass 1: per-pixel L1 error across RGB, quantized to u32.
#[cube(launch_unchecked)]
pub fn error_pass(pred: &Tensor<f32>, target: &Tensor<f32>, num_pixels: u32, err_buf: &mut Tensor<u32>) {
    let pix_id = ABSOLUTE_POS;
    if pix_id >= num_pixels {
        terminate!();
    }
    let mut l1 = 0.0f32;
    let mut ch = 0u32;
    while ch < 3u32 {
        let idx = pix_id * 4 + ch;
        l1 += f32::abs(pred[idx] - target[idx]);
        ch += 1u32;
    }
    l1 /= 3.0;
    err_buf[pix_id] = u32::cast_from(f32::clamp(l1, 0.0, 1.0) * ERROR_QUANT_SCALE);
}

/// Resets the two-element `(min, max)` accumulator before pass 2 runs.
#[cube(launch_unchecked)]
pub fn init_min_max(min_max: &mut Tensor<Atomic<u32>>) {
    if UNIT_POS == 0u32 {
        Atomic::store(&min_max[0], 0xffff_ffffu32);
        Atomic::store(&min_max[1], 0u32);
    }
}

/// Pass 2: global min/max tree reduction over every pixel's quantized error.
#[cube(launch_unchecked)]
pub fn reduce_min_max(err_buf: &Tensor<u32>, num_pixels: u32, min_max: &mut Tensor<Atomic<u32>>) {
    let pix_id = ABSOLUTE_POS;
    if pix_id >= num_pixels {
        terminate!();
    }
    Atomic::min(&min_max[0], err_buf[pix_id]);
    Atomic::max(&min_max[1], err_buf[pix_id]);
}

/// Pass 3: normalize each pixel's error against the global range and write
/// a binary flag wherever it exceeds `threshold`.
#[cube(launch_unchecked)]
pub fn threshold_pass(
    err_buf: &Tensor<u32>,
    min_max: &Tensor<Atomic<u32>>,
    num_pixels: u32,
    uniforms: &Tensor<f32>, // [threshold]
    metric_map: &mut Tensor<u32>,
) {
    let pix_id = ABSOLUTE_POS;
    if pix_id >= num_pixels {
        terminate!();
    }
    let threshold = uniforms[0];
    let lo = f32::cast_from(Atomic::load(&min_max[0]));
    let hi = f32::cast_from(Atomic::load(&min_max[1]));
    let range = f32::max(hi - lo, 1.0);
    let normalized = (f32::cast_from(err_buf[pix_id]) - lo) / range;
    metric_map[pix_id] = if normalized > threshold { 1u32 } else { 0u32 };
}

/// Pass 4: one thread per pixel (workgroup-per-tile, as §4.11 specifies),
/// walking each flagged pixel's tile-sorted contributor prefix up to
/// `n_contrib[pixel]` and crediting every Gaussian that actually
/// contributed (same front-to-back stopping rule as C6) toward its
/// accumulated influence count.
#[cube(launch_unchecked)]
#[allow(clippy::too_many_arguments)]
pub fn metric_count_pass(
    compact_gid_from_isect: &Tensor<u32>,
    global_from_compact_gid: &Tensor<u32>,
    tile_offsets: &Tensor<u32>,
    projected: &Tensor<f32>,
    n_contrib: &Tensor<u32>,
    metric_map: &Tensor<u32>,
    metric_counts: &mut Tensor<Atomic<u32>>,
    uniforms: &Tensor<f32>, // [img_w, img_h, tiles_x]
) {
    let img_w = u32::cast_from(uniforms[0]);
    let img_h = u32::cast_from(uniforms[1]);
    let tiles_x = u32::cast_from(uniforms[2]);

    let pix = map_1d_to_2d(ABSOLUTE_POS, tiles_x);
    let pix_x = pix.0;
    let pix_y = pix.1;
    if pix_x >= img_w || pix_y >= img_h {
        terminate!();
    }
    let pix_id = pix_x + pix_y * img_w;
    if metric_map[pix_id] == 0u32 {
        terminate!();
    }

    let pixel_x = f32::cast_from(pix_x) + 0.5;
    let pixel_y = f32::cast_from(pix_y) + 0.5;
    let tile_id = (pix_x / TILE_WIDTH) + (pix_y / TILE_WIDTH) * tiles_x;
    let range_start = tile_offsets[tile_id];
    let range_end = tile_offsets[tile_id + 1];
    let target = n_contrib[pix_id];

    let mut contributed = 0u32;
    let mut idx = range_start;
    while idx < range_end && contributed < target {
        let compact_gid = compact_gid_from_isect[idx];
        let base = compact_gid * PROJECTED_STRIDE;
        let xy_x = projected[base];
        let xy_y = projected[base + 1];
        let conic_a = projected[base + 2];
        let conic_b = projected[base + 3];
        let conic_c = projected[base + 4];
        let opacity = projected[base + 8];

        let sigma = calc_sigma(pixel_x, pixel_y, conic_a, conic_b, conic_c, xy_x, xy_y);
        let alpha = f32::min(0.99, opacity * f32::exp(-sigma));

        if sigma >= 0.0 && alpha >= MIN_ALPHA {
            contributed += 1u32;
            if alpha >= MIN_ALPHA {
                let gaussian_idx = global_from_compact_gid[compact_gid];
                Atomic::add(&metric_counts[gaussian_idx], 1u32);
            }
        }
        idx += 1u32;
    }
}

/// After K views, `metric_counts[i] ← metric_counts[i] / K` (integer
/// division, per spec §4.11).
#[cube(launch_unchecked)]
pub fn average_counts(metric_counts: &mut Tensor<u32>, k: u32, n: u32) {
    let gid = ABSOLUTE_POS;
    if gid >= n {
        terminate!();
    }
    metric_counts[gid] /= k;
}
