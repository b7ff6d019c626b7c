//! Adam optimizer step (C10), generic over parameter group width so the same
//! kernel serves `means`(3), `quats`(4), `log_scales`(3), `raw_opacities`(1)
//! and `sh_coeffs`(48) — only the learning rate and the flat stride differ
//! per group (spec §4.10). The f16 repack half of C10 is host-side; see
//! `splat_train::scene::GpuScene::repack` for why.

use burn::cubecl;
use burn_cubecl::cubecl::prelude::*;

/// One `m ← β₁m + (1−β₁)g; v ← β₂v + (1−β₂)g²; θ ← θ − lr·m/(√v+ε)` update
/// per component of every Gaussian in `[0, n)`, skipping Gaussians this
/// iteration never saw (`visible[gid] == 0`). No bias correction, matching
/// the source this engine follows.
#[cube(launch_unchecked)]
#[allow(clippy::too_many_arguments)]
pub fn adam_step(
    param: &mut Tensor<f32>,
    m: &mut Tensor<f32>,
    v: &mut Tensor<f32>,
    grad: &Tensor<f32>,
    visible: &Tensor<u32>,
    width: u32,
    n: u32,
    uniforms: &Tensor<f32>, // [lr, beta1, beta2, eps]
) {
    let gid = ABSOLUTE_POS;
    if gid >= n {
        terminate!();
    }
    if visible[gid] == 0u32 {
        terminate!();
    }

    let lr = uniforms[0];
    let beta1 = uniforms[1];
    let beta2 = uniforms[2];
    let eps = uniforms[3];

    let base = gid * width;
    let mut k = 0u32;
    while k < width {
        let idx = base + k;
        let g = grad[idx];
        let m_new = beta1 * m[idx] + (1.0 - beta1) * g;
        let v_new = beta2 * v[idx] + (1.0 - beta2) * g * g;
        m[idx] = m_new;
        v[idx] = v_new;
        param[idx] -= lr * m_new / (f32::sqrt(v_new) + eps);
        k += 1u32;
    }
}

/// Renormalizes every quaternion back to unit length after an Adam step
/// (spec invariant 9: `|q| ∈ [1−10⁻⁵, 1+10⁻⁵]`).
#[cube(launch_unchecked)]
pub fn renormalize_quat(quats: &mut Tensor<f32>, n: u32) {
    let gid = ABSOLUTE_POS;
    if gid >= n {
        terminate!();
    }
    let base = gid * 4;
    let w = quats[base];
    let x = quats[base + 1];
    let y = quats[base + 2];
    let z = quats[base + 3];
    let len = f32::sqrt(w * w + x * x + y * y + z * z);
    let inv_len = 1.0 / f32::max(len, 1.0e-12);
    quats[base] = w * inv_len;
    quats[base + 1] = x * inv_len;
    quats[base + 2] = y * inv_len;
    quats[base + 3] = z * inv_len;
}

/// Scatters the compact-gid-indexed `tile_counts` from C4's intersect
/// prepass into a global-gid-indexed visibility mask, so `adam_step` can
/// skip Gaussians with no intersecting tile this iteration. `out_visible`
/// must already be zero-filled.
#[cube(launch_unchecked)]
pub fn mark_visible(
    global_from_compact_gid: &Tensor<u32>,
    num_visible: &Tensor<u32>,
    tile_counts: &Tensor<i32>,
    out_visible: &mut Tensor<u32>,
) {
    let compact_gid = ABSOLUTE_POS;
    if compact_gid >= num_visible[0] {
        terminate!();
    }
    if tile_counts[compact_gid] > 0i32 {
        let gid = global_from_compact_gid[compact_gid];
        out_visible[gid] = 1u32;
    }
}
